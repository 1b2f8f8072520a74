use crate::{Config, Error, Mapper, Region, RegionView, Resolver, Token};
use memshare_cache::{Cache, Evictor, Guard, Provider};
use std::{
    ptr::NonNull,
    sync::{Arc, OnceLock},
};
use tracing::{debug, warn};

/// The process-wide cache installed by [RegionCache::init].
static GLOBAL: OnceLock<Arc<RegionCache>> = OnceLock::new();

/// A cached mapping: the mapped region plus the hook that removes its cache
/// entry when the last strong reference disappears.
///
/// Only constructed by [RegionCache]; callers receive it behind an `Arc` and
/// interact with it through the [Region] operations it forwards.
pub struct Mapping {
    region: Box<dyn Region>,
    evictor: Evictor<Token, Mapping>,
}

impl Region for Mapping {
    fn size(&self) -> u64 {
        self.region.size()
    }

    fn base(&self) -> *mut u8 {
        self.region.base()
    }

    fn read_range(&self, offset: u64, len: u64) -> Option<NonNull<u8>> {
        self.region.read_range(offset, len)
    }

    fn update_range(&self, offset: u64, len: u64) -> Option<NonNull<u8>> {
        self.region.update_range(offset, len)
    }

    fn commit(&self) {
        self.region.commit()
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // Evict our weak-table entry the moment the mapping dies. The evictor
        // only removes an entry that no longer resolves, so when two racing
        // misses created two mappings for one token, the loser's destructor
        // leaves the winner's live entry alone.
        self.evictor.evict();
    }
}

/// Wires the injected resolver and mapper into the generic cache's miss path.
pub struct MapProvider {
    resolver: Arc<dyn Resolver>,
    mapper: Arc<dyn Mapper>,
}

impl Provider<Token, Mapping> for MapProvider {
    fn create(&self, token: &Token, evictor: Evictor<Token, Mapping>) -> Option<Arc<Mapping>> {
        let Some(descriptor) = self.resolver.resolve(*token) else {
            debug!(?token, "token resolution failed");
            return None;
        };
        let region = self.mapper.map(descriptor);
        debug!(?token, ?descriptor, size = region.size(), "mapped region");
        Some(Arc::new(Mapping { region, evictor }))
    }
}

/// RAII pin over the region cache; see [RegionCache::scoped_lock].
pub type RegionGuard<'a> = Guard<'a, Token, Mapping, MapProvider>;

/// Weak-reference cache of mapped shared-memory regions keyed by capability
/// token.
///
/// Distinct requests for equal tokens share one [Mapping] while any strong
/// holder remains; unheld, unpinned mappings are released automatically. See
/// the crate docs for the sharing and failure model.
pub struct RegionCache {
    cache: Cache<Token, Mapping, MapProvider>,
}

impl RegionCache {
    /// Create an independent cache from the injected collaborators.
    pub fn new(config: Config) -> Self {
        Self {
            cache: Cache::new(MapProvider {
                resolver: config.resolver,
                mapper: config.mapper,
            }),
        }
    }

    /// Install (or return) the process-wide cache.
    ///
    /// Deduplication only works when every call site shares one cache, so a
    /// process normally installs a single instance at startup and reaches it
    /// through [RegionCache::get]. The first call wins; later calls return
    /// the same instance and ignore their `config`. The instance lives for
    /// the remainder of the process; there is no teardown.
    pub fn init(config: Config) -> Arc<RegionCache> {
        GLOBAL.get_or_init(|| Arc::new(Self::new(config))).clone()
    }

    /// The process-wide cache, if [RegionCache::init] has run.
    pub fn get() -> Option<Arc<RegionCache>> {
        GLOBAL.get().cloned()
    }

    /// Return the shared mapping for `token`, resolving and mapping it on a
    /// miss. `None` if the token cannot be resolved.
    pub fn fetch(&self, token: Token) -> Option<Arc<Mapping>> {
        self.cache.fetch(token)
    }

    /// Pin the mapping for `token`, resolving it on a miss. Returns whether a
    /// mapping is now pinned.
    pub fn lock(&self, token: Token) -> bool {
        self.cache.lock(token)
    }

    /// Release the pin for `token`, returning the pinned mapping. `None` (not
    /// an error) when the token is not pinned.
    pub fn unlock(&self, token: Token) -> Option<Arc<Mapping>> {
        self.cache.unlock(token)
    }

    /// Drop the weak-table entry for `token`, disconnecting future fetches
    /// from the current mapping without touching pins or live holders.
    pub fn flush(&self, token: Token) -> bool {
        self.cache.flush(token)
    }

    /// Whether a fetch for `token` would currently hit.
    pub fn cached(&self, token: Token) -> bool {
        self.cache.cached(token)
    }

    /// Pin `token` for the lifetime of the returned guard.
    pub fn scoped_lock(&self, token: Token) -> RegionGuard<'_> {
        self.cache.scoped_lock(token)
    }

    /// Carve a `size`-byte view at `offset` out of the mapping for `token`.
    ///
    /// Distinguishes resolution failure from an out-of-range request; see
    /// [RegionCache::map_block] for the plain optional form.
    pub fn try_map_block(&self, token: Token, size: u64, offset: u64) -> Result<RegionView, Error> {
        let parent = self.fetch(token).ok_or(Error::Unresolvable(token))?;
        RegionView::new(parent, size, offset)
    }

    /// Carve a `size`-byte view at `offset` out of the mapping for `token`,
    /// or `None` if the token is unresolvable or the range does not fit the
    /// parent mapping.
    pub fn map_block(&self, token: Token, size: u64, offset: u64) -> Option<RegionView> {
        match self.try_map_block(token, size, offset) {
            Ok(view) => Some(view),
            Err(err @ Error::InvalidRange { .. }) => {
                warn!(?token, %err, "map_block rejected");
                None
            }
            // Resolution failures were already logged by the provider.
            Err(Error::Unresolvable(_)) => None,
        }
    }
}
