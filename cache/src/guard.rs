use crate::{Cache, Provider};
use std::{fmt::Debug, hash::Hash};

/// RAII pin over a single cache key.
///
/// Construction attempts [Cache::lock]; drop unconditionally calls
/// [Cache::unlock], which is a safe no-op when the lock never succeeded.
/// Callers must check [Guard::locked] before relying on the value being
/// pinned.
///
/// Guards do not nest usefully: the pinned table holds one strong handle per
/// key, so dropping any guard for a key releases the pin for all of them.
pub struct Guard<'a, K: Copy + Eq + Hash + Debug, V, P: Provider<K, V>> {
    cache: &'a Cache<K, V, P>,
    key: K,
    locked: bool,
}

impl<'a, K: Copy + Eq + Hash + Debug, V, P: Provider<K, V>> Guard<'a, K, V, P> {
    pub(crate) fn new(cache: &'a Cache<K, V, P>, key: K) -> Self {
        let locked = cache.lock(key);
        Self { cache, key, locked }
    }

    /// Whether the pin was acquired.
    pub fn locked(&self) -> bool {
        self.locked
    }

    /// The key this guard pins.
    pub fn key(&self) -> K {
        self.key
    }
}

impl<K: Copy + Eq + Hash + Debug, V, P: Provider<K, V>> Drop for Guard<'_, K, V, P> {
    fn drop(&mut self) {
        // Unlock even when the lock failed: the key cannot be pinned in that
        // case and unlock of an unpinned key is a no-op by contract.
        let _ = self.cache.unlock(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Evictor;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    struct Switchable {
        fail: Arc<AtomicBool>,
    }

    impl Provider<u64, u64> for Switchable {
        fn create(&self, key: &u64, _evictor: Evictor<u64, u64>) -> Option<Arc<u64>> {
            if self.fail.load(Ordering::SeqCst) {
                return None;
            }
            Some(Arc::new(*key))
        }
    }

    fn cache() -> (Cache<u64, u64, Switchable>, Arc<AtomicBool>) {
        let fail = Arc::new(AtomicBool::new(false));
        (Cache::new(Switchable { fail: fail.clone() }), fail)
    }

    #[test]
    fn test_guard_pins_for_its_lifetime() {
        let (cache, _) = cache();

        let guard = cache.scoped_lock(1);
        assert!(guard.locked());
        assert_eq!(guard.key(), 1);

        // The pin is the only strong holder once this fetch handle is gone.
        drop(cache.fetch(1).unwrap());
        assert!(cache.cached(1), "guard must keep the value alive");

        drop(guard);
        assert!(!cache.cached(1), "drop must release the pin");
        assert!(cache.unlock(1).is_none(), "nothing left to unlock");
    }

    #[test]
    fn test_guard_on_unresolvable_key() {
        let (cache, fail) = cache();
        fail.store(true, Ordering::SeqCst);

        let guard = cache.scoped_lock(2);
        assert!(!guard.locked());
        assert!(!cache.cached(2));

        // Dropping a failed guard is safe and leaves no residue.
        drop(guard);
        assert!(cache.unlock(2).is_none());
    }

    #[test]
    fn test_nested_guards_release_once() {
        let (cache, _) = cache();

        let outer = cache.scoped_lock(3);
        let inner = cache.scoped_lock(3);
        assert!(outer.locked() && inner.locked());

        // Documented hazard of per-key (not per-call) pinning: the inner
        // guard's drop already releases the shared pin.
        drop(inner);
        assert!(cache.unlock(3).is_none());
        drop(outer);
    }
}
