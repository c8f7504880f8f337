//! LRU cache of open per-project store handles.
//!
//! Per-project state is cacheable and evictable; the global store never
//! lives here. The cache exists to bound open database handles under
//! sustained multi-project traffic, so eviction always closes the handle it
//! drops.

use crate::config::StoreConfig;
use crate::db::{DEFAULT_BUSY_TIMEOUT_MS, Database};
use crate::error::Result;
use crate::registry::ProjectRegistry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub const DEFAULT_CACHE_CAPACITY: usize = 10;

struct CacheInner {
    entries: HashMap<String, Database>,
    /// Least recently used first.
    order: Vec<String>,
}

fn promote(order: &mut Vec<String>, project_id: &str) {
    if let Some(pos) = order.iter().position(|id| id == project_id) {
        let id = order.remove(pos);
        order.push(id);
    }
}

pub struct ProjectStoreCache {
    registry: Arc<dyn ProjectRegistry>,
    capacity: usize,
    busy_timeout_ms: u32,
    inner: Mutex<CacheInner>,
}

impl ProjectStoreCache {
    pub fn new(registry: Arc<dyn ProjectRegistry>, capacity: usize) -> Self {
        Self {
            registry,
            capacity: capacity.max(1),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    pub fn from_config(registry: Arc<dyn ProjectRegistry>, config: &StoreConfig) -> Self {
        let mut cache = Self::new(registry, config.cache_capacity);
        cache.busy_timeout_ms = config.busy_timeout_ms;
        cache
    }

    /// Open store for a project, from cache when possible.
    ///
    /// The cache lock is held across the registry lookup and the open, so
    /// two concurrent misses for the same project cannot both open a
    /// handle. Store handles serialize their own access internally, so
    /// holding them outside the lock afterwards is fine.
    pub fn get(&self, project_id: &str) -> Result<Database> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(db) = inner.entries.get(project_id) {
            let db = db.clone();
            promote(&mut inner.order, project_id);
            return Ok(db);
        }

        let path = self.registry.lookup(project_id)?;
        let db = Database::open_with(&path, self.busy_timeout_ms)?;
        debug!(project = %project_id, path = %path.display(), "opened project store");

        if inner.entries.len() >= self.capacity {
            let evicted_id = inner.order.remove(0);
            if let Some(evicted) = inner.entries.remove(&evicted_id) {
                if let Err(err) = evicted.close() {
                    warn!(project = %evicted_id, error = %err, "failed to close evicted store");
                } else {
                    debug!(project = %evicted_id, "evicted least recently used store");
                }
            }
        }

        inner.entries.insert(project_id.to_string(), db.clone());
        inner.order.push(project_id.to_string());
        Ok(db)
    }

    /// Close every cached handle. Call once at shutdown; reports the first
    /// close failure after attempting all of them.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.order.clear();

        let mut first_err = None;
        for (project_id, db) in inner.entries.drain() {
            if let Err(err) = db.close() {
                warn!(project = %project_id, error = %err, "failed to close cached store");
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
