//! Optional inventory caching. `NoOpCache` is always valid; `MemoryInventoryCache` is provided
//! so repositories that want a cache do not need to write their own.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::inventory::Inventory;
use crate::inventory_mapper::{InventoryMapper, JsonInventoryMapper};

/// Caches loaded inventories by object ID. Implementations must be safe to share across
/// threads; the repository façade consults the cache before touching storage and updates it
/// after every successful write.
pub trait InventoryCache: Send + Sync {
    fn get(&self, object_id: &str) -> Option<Inventory>;

    fn put(&self, object_id: &str, inventory: &Inventory);

    fn invalidate(&self, object_id: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpCache;

impl InventoryCache for NoOpCache {
    fn get(&self, _object_id: &str) -> Option<Inventory> {
        None
    }

    fn put(&self, _object_id: &str, _inventory: &Inventory) {}

    fn invalidate(&self, _object_id: &str) {}
}

/// One cached inventory: its serialized bytes plus the two fields `#[serde(skip)]` drops from
/// that serialization (`object_root`, `mutable_head`), so a cache hit can restore them instead
/// of leaving them defaulted.
struct CachedInventory {
    bytes: Vec<u8>,
    object_root: String,
    mutable_head: bool,
}

/// Caches serialized inventory bytes in memory, re-parsing on every `get` so each caller
/// receives its own owned `Inventory` rather than one shared behind interior mutability.
pub struct MemoryInventoryCache {
    entries: Mutex<HashMap<String, CachedInventory>>,
    mapper: JsonInventoryMapper,
}

impl MemoryInventoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            mapper: JsonInventoryMapper,
        }
    }
}

impl Default for MemoryInventoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryCache for MemoryInventoryCache {
    fn get(&self, object_id: &str) -> Option<Inventory> {
        let entries = self.entries.lock().unwrap();
        let cached = entries.get(object_id)?;
        let mut inventory = self.mapper.read(&cached.bytes).ok()?;
        inventory.object_root = cached.object_root.clone();
        inventory.mutable_head = cached.mutable_head;
        Some(inventory)
    }

    fn put(&self, object_id: &str, inventory: &Inventory) {
        if let Ok(bytes) = self.mapper.write(inventory) {
            self.entries.lock().unwrap().insert(
                object_id.to_string(),
                CachedInventory {
                    bytes,
                    object_root: inventory.object_root.clone(),
                    mutable_head: inventory.mutable_head,
                },
            );
        }
    }

    fn invalidate(&self, object_id: &str) {
        self.entries.lock().unwrap().remove(object_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_op_cache_never_returns_anything() {
        let cache = NoOpCache;
        let inv = Inventory::builder("urn:test:1").build().unwrap();
        cache.put("urn:test:1", &inv);
        assert!(cache.get("urn:test:1").is_none());
    }

    #[test]
    fn memory_cache_round_trips() {
        let cache = MemoryInventoryCache::new();
        let inv = Inventory::builder("urn:test:1").build().unwrap();
        cache.put("urn:test:1", &inv);

        let cached = cache.get("urn:test:1").unwrap();
        assert_eq!(inv.id, cached.id);
        assert_eq!(inv.head, cached.head);
    }

    #[test]
    fn memory_cache_invalidate_removes_entry() {
        let cache = MemoryInventoryCache::new();
        let inv = Inventory::builder("urn:test:1").build().unwrap();
        cache.put("urn:test:1", &inv);
        cache.invalidate("urn:test:1");
        assert!(cache.get("urn:test:1").is_none());
    }
}
