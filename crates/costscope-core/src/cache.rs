//! Bounded cache of entity display names

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::lookup::EntityNameLookup;
use crate::schema::BillingField;

type Key = (BillingField, String);

/// Process-wide id to display name cache
///
/// Entries are loaded on first miss and kept until evicted; there is no TTL.
/// Two concurrent misses for one key may both call the lookup, the later
/// insert wins.
pub struct EntityNameCache {
    entries: Mutex<LruCache<Key, String>>,
    lookup: Arc<dyn EntityNameLookup>,
}

impl EntityNameCache {
    /// Cache holding at most `capacity` names
    pub fn new(capacity: usize, lookup: Arc<dyn EntityNameLookup>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            lookup,
        }
    }

    /// Display name for `id`, or `id` itself when it has none
    pub async fn resolve(&self, field: BillingField, id: &str) -> String {
        if !field.requires_name_resolution() {
            return id.to_string();
        }

        let key = (field, id.to_string());
        let cached = self.entries.lock().get(&key).cloned();
        if let Some(name) = cached {
            return name;
        }

        let name = match self.lookup.name(field, id).await {
            Ok(Some(name)) => name,
            Ok(None) => {
                debug!(%field, id, "No display name, using id");
                id.to_string()
            }
            Err(e) => {
                warn!(%field, id, error = %e, "Name lookup failed, using id");
                return id.to_string();
            }
        };
        self.entries.lock().put(key, name.clone());
        name
    }

    /// Number of cached names
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Maximum number of cached names
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}

impl std::fmt::Debug for EntityNameCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityNameCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
