//! Deduplicate expensive-to-create shared resources with weak-reference
//! caching and explicit pinning.
//!
//! # Overview
//!
//! [Cache] maps an opaque key to a reference-counted value, holding each value
//! *weakly*: as long as any caller keeps a strong reference alive, every
//! subsequent [Cache::fetch] for the same key returns the identical value. Once
//! the last strong reference is dropped, the entry no longer resolves and the
//! next fetch creates a fresh value via the caller-supplied [Provider].
//!
//! Callers that need a value to outlive their own strong references can *pin*
//! it with [Cache::lock], which stores a strong reference in the cache until a
//! matching [Cache::unlock]. [Cache::scoped_lock] wraps the pair in an RAII
//! [Guard].
//!
//! Values may remove their own entry eagerly (rather than waiting for a fetch
//! to prune the dead entry) by holding on to the [Evictor] passed to
//! [Provider::create] and invoking it from their destructor.
//!
//! # Concurrency
//!
//! All operations may be called from arbitrary threads. The two internal
//! tables are protected by a single mutex, which is *not* held while
//! [Provider::create] runs: creation may block on external I/O without
//! stalling operations on other keys. As a consequence, two concurrent misses
//! on the same key may both invoke the provider; the last insertion wins the
//! cache slot, and both created values remain individually valid.
//!
//! # Example
//!
//! ```
//! use memshare_cache::{Cache, Evictor, Provider};
//! use std::sync::Arc;
//!
//! struct Greetings;
//!
//! impl Provider<u64, String> for Greetings {
//!     fn create(&self, key: &u64, _evictor: Evictor<u64, String>) -> Option<Arc<String>> {
//!         Some(Arc::new(format!("hello-{key}")))
//!     }
//! }
//!
//! let cache = Cache::new(Greetings);
//!
//! // Repeated fetches share one underlying value.
//! let value = cache.fetch(7).unwrap();
//! assert!(Arc::ptr_eq(&value, &cache.fetch(7).unwrap()));
//!
//! // Once every strong reference is gone, the entry no longer resolves.
//! drop(value);
//! assert!(!cache.cached(7));
//!
//! // Pinning keeps a value alive without any caller-held reference.
//! assert!(cache.lock(7));
//! assert!(cache.cached(7));
//! let pinned = cache.unlock(7).unwrap();
//! assert_eq!(*pinned, "hello-7");
//! ```

mod cache;
pub use cache::{Cache, Evictor, Provider};
mod guard;
pub use guard::Guard;
