use crate::{Error, Mapping, Region};
use std::{ptr::NonNull, sync::Arc};
use tracing::warn;

/// A bounds-checked sub-range of a shared [Mapping].
///
/// Read and update operations are validated against the view's own bounds
/// (with overflow-checked arithmetic) and re-validated against the parent
/// before being forwarded translated by the view's offset; an out-of-range
/// request is logged and answered with `None` instead of being forwarded.
///
/// A view is immutable after construction and owns a strong reference to its
/// parent mapping for its own lifetime, independent of cache pinning.
/// Dropping it simply drops that reference.
pub struct RegionView {
    parent: Arc<Mapping>,
    size: u64,
    offset: u64,
    /// Parent size captured at construction, when `offset + size` was
    /// validated against it.
    parent_size: u64,
}

impl std::fmt::Debug for RegionView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionView")
            .field("size", &self.size)
            .field("offset", &self.offset)
            .field("parent_size", &self.parent_size)
            .finish_non_exhaustive()
    }
}

impl PartialEq for RegionView {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.parent, &other.parent)
            && self.size == other.size
            && self.offset == other.offset
    }
}

impl RegionView {
    pub(crate) fn new(parent: Arc<Mapping>, size: u64, offset: u64) -> Result<Self, Error> {
        let parent_size = parent.size();
        let fits = offset
            .checked_add(size)
            .is_some_and(|end| end <= parent_size);
        if !fits {
            return Err(Error::InvalidRange {
                offset,
                size,
                parent: parent_size,
            });
        }
        Ok(Self {
            parent,
            size,
            offset,
            parent_size,
        })
    }

    /// Size of the view in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Offset of the view within its parent mapping.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Parent mapping size captured at construction.
    pub fn parent_size(&self) -> u64 {
        self.parent_size
    }

    /// Mark `[start, start + len)` of the view for reading, returning the
    /// address of the range start within the parent mapping.
    pub fn read_range(&self, start: u64, len: u64) -> Option<NonNull<u8>> {
        let offset = self.translate(start, len, "read")?;
        self.parent.read_range(offset, len)
    }

    /// Mark `[start, start + len)` of the view for updating, returning the
    /// address of the range start within the parent mapping.
    pub fn update_range(&self, start: u64, len: u64) -> Option<NonNull<u8>> {
        let offset = self.translate(start, len, "update")?;
        self.parent.update_range(offset, len)
    }

    /// Mark the whole view for reading.
    pub fn read(&self) -> Option<NonNull<u8>> {
        self.read_range(0, self.size)
    }

    /// Mark the whole view for updating.
    pub fn update(&self) -> Option<NonNull<u8>> {
        self.update_range(0, self.size)
    }

    /// Flush pending updates. Commit applies to the whole backing resource,
    /// not just this sub-range, so it is forwarded unconditionally.
    pub fn commit(&self) {
        self.parent.commit()
    }

    /// The parent's base pointer advanced by the view's offset.
    pub fn as_ptr(&self) -> *mut u8 {
        self.parent.base().wrapping_add(self.offset as usize)
    }

    /// Validate `[start, start + len)` against the view and the parent,
    /// returning the start translated into parent coordinates.
    fn translate(&self, start: u64, len: u64, op: &str) -> Option<u64> {
        let in_view = start.checked_add(len).is_some_and(|end| end <= self.size);
        if !in_view {
            warn!(op, start, len, size = self.size, "range rejected");
            return None;
        }
        // Validated at construction, re-checked against the live parent in
        // case its size changed underneath us.
        let in_parent = self
            .offset
            .checked_add(self.size)
            .is_some_and(|end| end <= self.parent.size());
        if !in_parent {
            warn!(
                op,
                offset = self.offset,
                size = self.size,
                parent = self.parent.size(),
                "view no longer fits its parent"
            );
            return None;
        }
        // Cannot overflow: start <= size and offset + size fits in u64.
        self.offset.checked_add(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mocks::SharedHeap, Config, RegionCache, Token};
    use test_case::test_case;

    const PARENT: u64 = 0x1000;
    const SIZE: u64 = 0x200;
    const OFFSET: u64 = 0x100;

    fn view() -> (Arc<SharedHeap>, Arc<crate::mocks::HeapRegion>, RegionView) {
        let heap = Arc::new(SharedHeap::new());
        let region = heap.register(Token(1), PARENT as usize);
        let cache = RegionCache::new(Config {
            resolver: heap.clone(),
            mapper: heap.clone(),
        });
        let view = cache.map_block(Token(1), SIZE, OFFSET).unwrap();
        (heap, region, view)
    }

    #[test]
    fn test_read_range_translates_offset() {
        let (_heap, region, view) = view();

        let ptr = view.read_range(0x10, 0x20).expect("range must be in view");
        assert_eq!(ptr.as_ptr(), region.base().wrapping_add(0x110));
        assert_eq!(
            region.reads(),
            vec![(OFFSET + 0x10, 0x20)],
            "parent must see translated coordinates"
        );
    }

    #[test]
    fn test_update_range_translates_offset() {
        let (_heap, region, view) = view();

        let ptr = view.update_range(0, 1).unwrap();
        assert_eq!(ptr.as_ptr(), region.base().wrapping_add(OFFSET as usize));
        assert_eq!(region.updates(), vec![(OFFSET, 1)]);
    }

    #[test]
    fn test_whole_view_forms() {
        let (_heap, region, view) = view();

        view.read().expect("whole view must be readable");
        view.update().expect("whole view must be updatable");
        assert_eq!(region.reads(), vec![(OFFSET, SIZE)]);
        assert_eq!(region.updates(), vec![(OFFSET, SIZE)]);
    }

    #[test_case(0, SIZE + 1; "length past end")]
    #[test_case(SIZE, 1; "start at end")]
    #[test_case(SIZE - 1, 2; "straddles end")]
    #[test_case(u64::MAX, 2; "start plus length overflows")]
    #[test_case(1, u64::MAX; "length overflows")]
    #[test_case(u64::MAX, u64::MAX; "both overflow")]
    fn test_out_of_bounds_rejected(start: u64, len: u64) {
        let (_heap, region, view) = view();

        assert!(view.read_range(start, len).is_none());
        assert!(view.update_range(start, len).is_none());
        assert!(
            region.reads().is_empty() && region.updates().is_empty(),
            "rejected ranges must never reach the parent"
        );
    }

    #[test_case(0, 0; "empty at start")]
    #[test_case(SIZE, 0; "empty at end")]
    #[test_case(0, SIZE; "exactly full")]
    fn test_boundary_ranges_accepted(start: u64, len: u64) {
        let (_heap, _region, view) = view();
        assert!(view.read_range(start, len).is_some());
    }

    #[test]
    fn test_commit_forwards_to_parent() {
        let (_heap, region, view) = view();

        view.commit();
        view.commit();
        assert_eq!(region.commits(), 2);
    }

    #[test]
    fn test_pointer_and_accessors() {
        let (_heap, region, view) = view();

        assert_eq!(view.as_ptr(), region.base().wrapping_add(OFFSET as usize));
        assert_eq!(view.size(), SIZE);
        assert_eq!(view.offset(), OFFSET);
        assert_eq!(view.parent_size(), PARENT);
    }

    #[test]
    fn test_zero_sized_view() {
        let heap = Arc::new(SharedHeap::new());
        heap.register(Token(2), 0x100);
        let cache = RegionCache::new(Config {
            resolver: heap.clone(),
            mapper: heap.clone(),
        });

        // A zero-sized view at the very end of the parent is valid but
        // rejects every non-empty access.
        let view = cache.map_block(Token(2), 0, 0x100).unwrap();
        assert!(view.read_range(0, 0).is_some());
        assert!(view.read_range(0, 1).is_none());
    }
}
