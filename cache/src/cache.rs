use crate::Guard;
use std::{
    collections::{hash_map::Entry, HashMap},
    fmt::Debug,
    hash::Hash,
    sync::{Arc, Mutex, Weak},
};
use tracing::{debug, trace};

/// Produces values for [Cache] misses.
///
/// [Provider::create] is the only cache operation allowed to block on external
/// I/O and is always invoked without the cache mutex held.
pub trait Provider<K, V>: Send + Sync {
    /// Produce a new value for `key`, or `None` if the backing resource cannot
    /// be obtained (the cache records nothing on failure).
    ///
    /// The provided [Evictor] may be captured by the value (typically invoked
    /// from its destructor) to remove the key's cache entry as soon as the
    /// value dies, instead of leaving a dead entry behind for the next fetch
    /// to prune.
    fn create(&self, key: &K, evictor: Evictor<K, V>) -> Option<Arc<V>>;
}

/// Bookkeeping protected by the cache mutex.
struct State<K, V> {
    /// Weak table: every value that may be promoted and shared.
    cached: HashMap<K, Weak<V>>,
    /// Pinned table: values kept alive by an outstanding [Cache::lock].
    pinned: HashMap<K, Arc<V>>,
}

/// Removes a single key's weak-table entry once its value is gone.
///
/// Handed to [Provider::create] so the produced value can evict itself from
/// its destructor. Holds no strong reference to the cache, so it remains safe
/// to invoke after the cache has been dropped.
pub struct Evictor<K, V> {
    state: Weak<Mutex<State<K, V>>>,
    key: K,
}

impl<K: Copy + Eq + Hash, V> Evictor<K, V> {
    /// Remove the key's weak-table entry if it no longer resolves.
    ///
    /// Idempotent, and safe to call without the cache mutex held (required
    /// when invoked from a value's destructor: an unlock or a caller-side drop
    /// may run the destructor with no cache lock active). A live entry is left
    /// in place: when two concurrent misses both created a value, the loser's
    /// destructor must not evict the winner.
    pub fn evict(&self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut state = state.lock().unwrap();
        if let Some(entry) = state.cached.get(&self.key) {
            if entry.strong_count() == 0 {
                state.cached.remove(&self.key);
            }
        }
    }
}

/// A weak-reference cache with explicit pinning.
///
/// Maintains at most one live value per key: fetches promote the existing
/// value while any strong reference survives and create a new one otherwise.
/// See the crate docs for the full sharing and concurrency contract.
pub struct Cache<K, V, P> {
    provider: P,
    state: Arc<Mutex<State<K, V>>>,
}

impl<K, V, P> Cache<K, V, P>
where
    K: Copy + Eq + Hash + Debug,
    P: Provider<K, V>,
{
    /// Create an empty cache that sources values from `provider`.
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            state: Arc::new(Mutex::new(State {
                cached: HashMap::new(),
                pinned: HashMap::new(),
            })),
        }
    }

    /// Promote the live weak entry for `key`, pruning it if dead.
    ///
    /// Only manipulates `Weak` handles, so nothing user-visible is dropped
    /// while the mutex is held.
    fn promote(state: &mut State<K, V>, key: &K) -> Option<Arc<V>> {
        match state.cached.get(key) {
            Some(entry) => match entry.upgrade() {
                Some(value) => Some(value),
                None => {
                    // The value died without evicting itself.
                    state.cached.remove(key);
                    None
                }
            },
            None => None,
        }
    }

    /// Return the shared value for `key`, creating it on a miss.
    ///
    /// Returns `None` iff the provider could not produce a value; nothing is
    /// recorded in that case.
    pub fn fetch(&self, key: K) -> Option<Arc<V>> {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(value) = Self::promote(&mut state, &key) {
                trace!(?key, "cache hit");
                return Some(value);
            }
        }

        // Miss: create without the mutex held so a blocking provider never
        // stalls operations on other keys. Two racing misses on the same key
        // may both create; the last insertion below wins the slot.
        let evictor = Evictor {
            state: Arc::downgrade(&self.state),
            key,
        };
        let value = self.provider.create(&key, evictor)?;
        debug!(?key, "created value on cache miss");

        let mut state = self.state.lock().unwrap();
        state.cached.insert(key, Arc::downgrade(&value));
        Some(value)
    }

    /// Pin the value for `key`, creating it on a miss.
    ///
    /// While pinned, the cache itself holds a strong reference, so the value
    /// survives even with no caller-held references. The pinned table stores
    /// at most one strong handle per key: a second `lock` on an already-pinned
    /// key leaves the table unchanged, so callers must still match `lock` and
    /// `unlock` one-to-one (the first `unlock` releases the pin for everyone).
    ///
    /// Returns whether a value is now pinned.
    pub fn lock(&self, key: K) -> bool {
        let mut state = self.state.lock().unwrap();
        if let Some(value) = Self::promote(&mut state, &key) {
            let leftover = Self::pin(&mut state, key, value);
            drop(state);
            // Dropped outside the mutex: a value's destructor may call back
            // into the cache to evict itself.
            drop(leftover);
            return true;
        }
        drop(state);

        let Some(value) = self.fetch(key) else {
            return false;
        };

        let mut state = self.state.lock().unwrap();
        let leftover = Self::pin(&mut state, key, value);
        drop(state);
        drop(leftover);
        true
    }

    /// Insert into the pinned table unless the key is already pinned,
    /// returning any strong reference the caller must dispose of itself.
    #[must_use]
    fn pin(state: &mut State<K, V>, key: K, value: Arc<V>) -> Option<Arc<V>> {
        match state.pinned.entry(key) {
            Entry::Occupied(_) => Some(value),
            Entry::Vacant(entry) => {
                entry.insert(value);
                None
            }
        }
    }

    /// Release the pin for `key`, returning the previously pinned value.
    ///
    /// Unlocking a key that is not pinned is not an error; it returns `None`.
    pub fn unlock(&self, key: K) -> Option<Arc<V>> {
        let mut state = self.state.lock().unwrap();
        state.pinned.remove(&key)
    }

    /// Remove the weak-table entry for `key`, returning whether one existed.
    ///
    /// Never touches the pinned table: a pinned value stays alive and the next
    /// fetch will create (and cache) a fresh value for the key.
    pub fn flush(&self, key: K) -> bool {
        let mut state = self.state.lock().unwrap();
        state.cached.remove(&key).is_some()
    }

    /// Whether a fetch for `key` would currently hit.
    pub fn cached(&self, key: K) -> bool {
        let state = self.state.lock().unwrap();
        state
            .cached
            .get(&key)
            .is_some_and(|entry| entry.strong_count() > 0)
    }

    /// Pin `key` for the lifetime of the returned [Guard].
    ///
    /// The guard unlocks on drop even when the pin failed; check
    /// [Guard::locked] to learn whether the value was available.
    pub fn scoped_lock(&self, key: K) -> Guard<'_, K, V, P> {
        Guard::new(self, key)
    }

    /// Whether the weak table physically contains an entry for `key`,
    /// resolvable or not.
    #[cfg(test)]
    pub(crate) fn contains(&self, key: K) -> bool {
        self.state.lock().unwrap().cached.contains_key(&key)
    }
}
