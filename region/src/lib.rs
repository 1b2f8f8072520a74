//! Map remote shared-memory capabilities into deduplicated, bounds-checked
//! regions.
//!
//! # Overview
//!
//! A [RegionCache] specializes the generic weak-reference cache from
//! [memshare_cache] over capability [Token]s and mapped memory regions. Two
//! callers presenting equal tokens share one mapping while any strong holder
//! survives; once the last holder disappears (and no pin is outstanding), the
//! mapping evicts its own cache entry and the backing resource is released.
//!
//! The cache consumes two injected collaborators: a [Resolver] that turns a
//! token into a raw [Descriptor] (a one-shot, possibly cross-process call)
//! and a [Mapper] that turns the descriptor into an addressable [Region].
//! Neither the allocation transport nor the mapping syscalls live here.
//!
//! [RegionCache::map_block] carves a [RegionView] out of a mapping: a
//! bounds-checked sub-range that forwards read/update/commit operations
//! translated by its offset and owns a strong reference to its parent for its
//! own lifetime, independent of cache pinning.
//!
//! # Failure model
//!
//! All failures are local: an unresolvable token or an out-of-range request
//! surfaces as an absent result (plus a diagnostic log line), never as a
//! panic. [RegionCache::try_map_block] exposes the distinction between the
//! two as an [Error] for callers that want it.
//!
//! # Example
//!
//! ```
//! use memshare_region::{mocks::SharedHeap, Config, RegionCache, Token};
//! use std::sync::Arc;
//!
//! // An in-memory stand-in for the external resolver and mapper.
//! let heap = Arc::new(SharedHeap::new());
//! heap.register(Token(1), 0x1000);
//!
//! let cache = RegionCache::new(Config {
//!     resolver: heap.clone(),
//!     mapper: heap,
//! });
//!
//! // Carve a 0x200-byte view at offset 0x100 out of the shared mapping.
//! let view = cache.map_block(Token(1), 0x200, 0x100).unwrap();
//! assert_eq!(view.size(), 0x200);
//! assert!(view.read().is_some());
//!
//! // Requests outside the parent mapping are rejected, not forwarded.
//! assert!(cache.map_block(Token(1), 0x200, 0xF00).is_none());
//!
//! // Unknown tokens fail resolution.
//! assert!(cache.map_block(Token(2), 0x10, 0).is_none());
//! ```

use std::{ptr::NonNull, sync::Arc};
use thiserror::Error;

mod cache;
pub use cache::{MapProvider, Mapping, RegionCache, RegionGuard};
mod view;
pub use view::RegionView;
pub mod mocks;

/// Opaque capability token identifying a remote shared-memory resource.
///
/// Tokens are supplied by callers and treated purely as keys: equal tokens
/// must refer to the same remote resource. The cache only ever stores copies.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub u64);

/// Raw mappable handle produced by a [Resolver] and consumed by a [Mapper].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Descriptor(pub u64);

/// Resolves a capability token into a raw mappable descriptor.
///
/// Resolution is a one-shot operation that may block on a cross-process call;
/// it is never invoked with cache bookkeeping locks held. Failure is signaled
/// by absence (no further error taxonomy is assumed) and is not retried.
pub trait Resolver: Send + Sync {
    fn resolve(&self, token: Token) -> Option<Descriptor>;
}

/// Turns a raw descriptor into an addressable mapped region.
pub trait Mapper: Send + Sync {
    fn map(&self, descriptor: Descriptor) -> Box<dyn Region>;
}

/// One fully mapped shared resource.
///
/// Implementations are produced by a [Mapper] and shared across threads by
/// reference counting; the cache serializes its own bookkeeping but never
/// access to the mapped data itself.
pub trait Region: Send + Sync {
    /// Total size of the region in bytes.
    fn size(&self) -> u64;

    /// Base address of the mapping.
    fn base(&self) -> *mut u8;

    /// Mark `[offset, offset + len)` for reading, returning the address of
    /// the range start, or `None` if the range is out of bounds.
    fn read_range(&self, offset: u64, len: u64) -> Option<NonNull<u8>>;

    /// Mark `[offset, offset + len)` for updating, returning the address of
    /// the range start, or `None` if the range is out of bounds.
    fn update_range(&self, offset: u64, len: u64) -> Option<NonNull<u8>>;

    /// Mark the whole region for reading.
    fn read(&self) -> Option<NonNull<u8>> {
        self.read_range(0, self.size())
    }

    /// Mark the whole region for updating.
    fn update(&self) -> Option<NonNull<u8>> {
        self.update_range(0, self.size())
    }

    /// Flush pending updates to the backing resource.
    fn commit(&self);
}

/// Errors surfaced by [RegionCache::try_map_block].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("token could not be resolved: {0:?}")]
    Unresolvable(Token),
    #[error("range out of bounds: offset={offset} size={size} parent={parent}")]
    InvalidRange { offset: u64, size: u64, parent: u64 },
}

/// Configuration for a [RegionCache].
#[derive(Clone)]
pub struct Config {
    /// Resolves capability tokens into raw descriptors (may block on IPC).
    pub resolver: Arc<dyn Resolver>,

    /// Maps raw descriptors into addressable regions.
    pub mapper: Arc<dyn Mapper>,
}
