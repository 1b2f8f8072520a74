//! In-memory stand-ins for the external resolver and mapper, for tests and
//! examples.

use crate::{Descriptor, Mapper, Region, Resolver, Token};
use std::{
    collections::HashMap,
    ptr::NonNull,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

/// Heap-backed [Region] that records the ranges it is asked to read and
/// update and how often it is committed.
pub struct HeapRegion {
    data: Box<[u8]>,
    reads: Mutex<Vec<(u64, u64)>>,
    updates: Mutex<Vec<(u64, u64)>>,
    commits: AtomicUsize,
}

impl HeapRegion {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size].into_boxed_slice(),
            reads: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            commits: AtomicUsize::new(0),
        }
    }

    /// Every `(offset, len)` range forwarded to [Region::read_range].
    pub fn reads(&self) -> Vec<(u64, u64)> {
        self.reads.lock().unwrap().clone()
    }

    /// Every `(offset, len)` range forwarded to [Region::update_range].
    pub fn updates(&self) -> Vec<(u64, u64)> {
        self.updates.lock().unwrap().clone()
    }

    /// Number of [Region::commit] calls observed.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn range(&self, offset: u64, len: u64) -> Option<NonNull<u8>> {
        let end = offset.checked_add(len)?;
        if end > self.size() {
            return None;
        }
        NonNull::new(self.base().wrapping_add(offset as usize))
    }
}

impl Region for HeapRegion {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn base(&self) -> *mut u8 {
        self.data.as_ptr() as *mut u8
    }

    fn read_range(&self, offset: u64, len: u64) -> Option<NonNull<u8>> {
        let ptr = self.range(offset, len)?;
        self.reads.lock().unwrap().push((offset, len));
        Some(ptr)
    }

    fn update_range(&self, offset: u64, len: u64) -> Option<NonNull<u8>> {
        let ptr = self.range(offset, len)?;
        self.updates.lock().unwrap().push((offset, len));
        Some(ptr)
    }

    fn commit(&self) {
        self.commits.fetch_add(1, Ordering::SeqCst);
    }
}

/// Forwards [Region] operations to a shared [HeapRegion] so tests can keep
/// their own handle for inspection.
struct HeapHandle(Arc<HeapRegion>);

impl Region for HeapHandle {
    fn size(&self) -> u64 {
        self.0.size()
    }

    fn base(&self) -> *mut u8 {
        self.0.base()
    }

    fn read_range(&self, offset: u64, len: u64) -> Option<NonNull<u8>> {
        self.0.read_range(offset, len)
    }

    fn update_range(&self, offset: u64, len: u64) -> Option<NonNull<u8>> {
        self.0.update_range(offset, len)
    }

    fn commit(&self) {
        self.0.commit()
    }
}

/// In-memory transport standing in for the external resolver and mapper.
///
/// [Resolver::resolve] hands out a fresh [Descriptor] for every registered
/// token and [Mapper::map] redeems it for the registered region, mirroring
/// the one-shot resolve-then-map flow of the real collaborators.
pub struct SharedHeap {
    registered: Mutex<HashMap<Token, Arc<HeapRegion>>>,
    pending: Mutex<HashMap<Descriptor, Arc<HeapRegion>>>,
    next_descriptor: AtomicU64,
    resolutions: AtomicUsize,
}

impl SharedHeap {
    pub fn new() -> Self {
        Self {
            registered: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_descriptor: AtomicU64::new(0),
            resolutions: AtomicUsize::new(0),
        }
    }

    /// Back `token` with a fresh region of `size` bytes, returning a handle
    /// for inspecting the forwarded operations.
    pub fn register(&self, token: Token, size: usize) -> Arc<HeapRegion> {
        let region = Arc::new(HeapRegion::new(size));
        self.registered.lock().unwrap().insert(token, region.clone());
        region
    }

    /// Make `token` unresolvable again.
    pub fn unregister(&self, token: Token) {
        self.registered.lock().unwrap().remove(&token);
    }

    /// Number of [Resolver::resolve] calls observed (including failures).
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }
}

impl Default for SharedHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver for SharedHeap {
    fn resolve(&self, token: Token) -> Option<Descriptor> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        let region = self.registered.lock().unwrap().get(&token).cloned()?;
        let descriptor = Descriptor(self.next_descriptor.fetch_add(1, Ordering::SeqCst));
        self.pending.lock().unwrap().insert(descriptor, region);
        Some(descriptor)
    }
}

impl Mapper for SharedHeap {
    fn map(&self, descriptor: Descriptor) -> Box<dyn Region> {
        let region = self
            .pending
            .lock()
            .unwrap()
            .remove(&descriptor)
            .expect("descriptor was not produced by this resolver");
        Box::new(HeapHandle(region))
    }
}
