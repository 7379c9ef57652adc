//! In-memory cache of root table graphs.
//!
//! # Design
//!
//! - One entry per (entity, schema) key
//! - Build-once-on-miss: each key holds a shared `OnceCell`, so concurrent
//!   callers wait for a single builder instead of racing
//! - Per-entry TTL; expired entries are dropped on the next lookup

mod hash;
pub use hash::{compute_hash, derive_uuid, digest, short_hex};

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::trace;

use crate::error::QueryResult;
use crate::graph::Table;

type CacheKey = (String, Option<String>);

#[derive(Debug)]
struct Entry {
    table: Arc<Table>,
    created: Instant,
}

/// Cache of root table graphs keyed by entity and schema.
#[derive(Debug)]
pub struct GraphCache {
    ttl: Duration,
    entries: DashMap<CacheKey, Arc<OnceCell<Entry>>>,
}

impl GraphCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Return the cached graph for `entity`, building it with `build` on a
    /// miss. A failed build leaves the slot empty for the next caller.
    pub fn get_or_build<F>(
        &self,
        entity: &str,
        schema: Option<&str>,
        build: F,
    ) -> QueryResult<Arc<Table>>
    where
        F: FnOnce() -> QueryResult<Arc<Table>>,
    {
        let key: CacheKey = (entity.to_string(), schema.map(String::from));

        let expired = self.entries.remove_if(&key, |_, cell| {
            cell.get()
                .is_some_and(|entry| entry.created.elapsed() >= self.ttl)
        });
        if expired.is_some() {
            trace!(entity, "graph cache entry expired");
        }

        // Clone the cell out so the shard lock is released before building.
        let cell = Arc::clone(&self.entries.entry(key).or_default());
        if cell.get().is_some() {
            trace!(entity, "graph cache hit");
        } else {
            trace!(entity, "graph cache miss");
        }

        let entry = cell.get_or_try_init(|| {
            build().map(|table| Entry {
                table,
                created: Instant::now(),
            })
        })?;
        Ok(Arc::clone(&entry.table))
    }

    /// Drop every cached graph of `entity`.
    pub fn invalidate(&self, entity: &str) {
        self.entries.retain(|(name, _), _| name != entity);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of built entries.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CatalogBuilder, EntityDef};
    use crate::config::Settings;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn catalog() -> crate::graph::Catalog {
        CatalogBuilder::new()
            .entity(EntityDef::new("Customer", "customers").primary_key("id").column("name"))
            .build(&Settings::default())
            .unwrap()
    }

    #[test]
    fn test_build_once_on_miss() {
        let catalog = catalog();
        let cache = GraphCache::new(Duration::from_secs(60));
        let builds = AtomicUsize::new(0);

        let build = || {
            builds.fetch_add(1, Ordering::SeqCst);
            catalog.instance("Customer")
        };
        let first = cache.get_or_build("Customer", None, build).unwrap();
        let second = cache
            .get_or_build("Customer", None, || {
                builds.fetch_add(1, Ordering::SeqCst);
                catalog.instance("Customer")
            })
            .unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_schema_is_part_of_key() {
        let catalog = catalog();
        let cache = GraphCache::new(Duration::from_secs(60));
        let a = cache
            .get_or_build("Customer", None, || catalog.instance("Customer"))
            .unwrap();
        let b = cache
            .get_or_build("Customer", Some("archive"), || catalog.instance("Customer"))
            .unwrap();
        assert_ne!(a.uuid(), b.uuid());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_expired_entry_is_rebuilt() {
        let catalog = catalog();
        let cache = GraphCache::new(Duration::ZERO);
        let a = cache
            .get_or_build("Customer", None, || catalog.instance("Customer"))
            .unwrap();
        let b = cache
            .get_or_build("Customer", None, || catalog.instance("Customer"))
            .unwrap();
        assert_ne!(a.uuid(), b.uuid());
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let catalog = catalog();
        let cache = GraphCache::new(Duration::from_secs(60));
        assert!(cache
            .get_or_build("Nope", None, || catalog.instance("Nope"))
            .is_err());
        assert!(cache.is_empty());

        cache.invalidate("Customer");
        cache
            .get_or_build("Customer", None, || catalog.instance("Customer"))
            .unwrap();
        cache.invalidate("Customer");
        assert!(cache.is_empty());
    }
}
