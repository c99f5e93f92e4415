//! Shared property space
//!
//! The fast tier lives in a flat string-to-string property space shared by
//! every cache instance in the process. Each property is read and written
//! atomically; nothing coordinates multi-property updates.

use lazy_static::lazy_static;
use parking_lot::RwLock;
use radix_trie::{Trie, TrieCommon};
use std::sync::Arc;
use tracing::debug;

/// Atomic per-property get/set surface backing the fast tier
pub trait PropertyStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;

    fn set(&self, name: &str, value: String);

    fn clear(&self, name: &str);

    /// Remove every property whose name starts with `prefix`, returning the count
    fn clear_prefix(&self, prefix: &str) -> usize;
}

lazy_static! {
    static ref PROCESS_PROPERTIES: Arc<MemoryProperties> = Arc::new(MemoryProperties::new());
}

/// In-process property space using a radix trie for prefix clearing
#[derive(Default)]
pub struct MemoryProperties {
    data: RwLock<Trie<String, String>>,
}

impl MemoryProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide instance shared by every cache that is not given its own
    pub fn shared() -> Arc<MemoryProperties> {
        Arc::clone(&PROCESS_PROPERTIES)
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names with the given prefix
    pub fn names_with_prefix(&self, prefix: &str) -> Vec<String> {
        let data = self.data.read();
        data.get_raw_descendant(prefix)
            .map(|subtrie| {
                subtrie
                    .keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl PropertyStore for MemoryProperties {
    fn get(&self, name: &str) -> Option<String> {
        self.data.read().get(name).cloned()
    }

    fn set(&self, name: &str, value: String) {
        self.data.write().insert(name.to_string(), value);
    }

    fn clear(&self, name: &str) {
        self.data.write().remove(name);
    }

    fn clear_prefix(&self, prefix: &str) -> usize {
        let names = self.names_with_prefix(prefix);
        let mut data = self.data.write();
        let mut removed = 0;
        for name in &names {
            if data.remove(name.as_str()).is_some() {
                removed += 1;
            }
        }
        debug!("Cleared {} properties with prefix {}", removed, prefix);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_clear() {
        let props = MemoryProperties::new();
        assert_eq!(props.get("a"), None);

        props.set("a", "1".to_string());
        props.set("a", "2".to_string());
        assert_eq!(props.get("a"), Some("2".to_string()));
        assert_eq!(props.len(), 1);

        props.clear("a");
        assert!(props.is_empty());
        // Clearing a missing property is a no-op
        props.clear("a");
    }

    #[test]
    fn test_clear_prefix_leaves_other_namespaces() {
        let props = MemoryProperties::new();
        props.set("db_a.db_cache_expr_k1", "1".to_string());
        props.set("db_a.db_cache_data_k1", "{}".to_string());
        props.set("db_b.db_cache_expr_k1", "1".to_string());

        assert_eq!(props.clear_prefix("db_a.db_cache_"), 2);
        assert_eq!(props.len(), 1);
        assert!(props.get("db_b.db_cache_expr_k1").is_some());

        assert_eq!(props.clear_prefix("nothing_here"), 0);
    }

    #[test]
    fn test_shared_is_one_instance() {
        let a = MemoryProperties::shared();
        let b = MemoryProperties::shared();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
