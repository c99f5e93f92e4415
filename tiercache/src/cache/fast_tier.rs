use std::sync::Arc;
use tracing::debug;

use super::properties::PropertyStore;
use crate::core::CacheEntry;

/// Namespaced view of the shared property space for one cache instance.
///
/// Each entry is two properties: `<ns>_expr_<key>` holding the expiry
/// timestamp and `<ns>_data_<key>` holding the payload.
#[derive(Clone)]
pub struct FastTier {
    props: Arc<dyn PropertyStore>,
    namespace: String,
}

impl FastTier {
    pub fn new(props: Arc<dyn PropertyStore>, namespace: impl Into<String>) -> Self {
        Self {
            props,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn expr_name(&self, key: &str) -> String {
        format!("{}_expr_{}", self.namespace, key)
    }

    fn data_name(&self, key: &str) -> String {
        format!("{}_data_{}", self.namespace, key)
    }

    fn marker_name(&self, marker: &str) -> String {
        format!("{}.{}", self.namespace, marker)
    }

    /// Live payload for `key`, checking expiry before touching the payload
    pub fn get(&self, key: &str, now: i64) -> Option<String> {
        let expires = self
            .props
            .get(&self.expr_name(key))
            .and_then(|v| v.parse::<i64>().ok())?;
        if expires <= now {
            debug!("Fast tier entry expired: {}", key);
            return None;
        }
        self.props.get(&self.data_name(key)).filter(|d| !d.is_empty())
    }

    pub fn set(&self, entry: &CacheEntry) {
        self.props
            .set(&self.expr_name(&entry.key), entry.expires_at.to_string());
        self.props
            .set(&self.data_name(&entry.key), entry.payload.clone());
    }

    pub fn clear(&self, key: &str) {
        self.props.clear(&self.expr_name(key));
        self.props.clear(&self.data_name(key));
    }

    /// Drop every entry in this namespace, returning the number of properties removed
    pub fn clear_all(&self) -> usize {
        let expr = format!("{}_expr_", self.namespace);
        let data = format!("{}_data_", self.namespace);
        self.props.clear_prefix(&expr) + self.props.clear_prefix(&data)
    }

    /// Timestamp of the last janitor pass by any instance sharing this namespace
    pub fn last_cleanup(&self) -> Option<i64> {
        self.props
            .get(&self.marker_name("clean.lastexecuted"))
            .and_then(|v| v.parse().ok())
    }

    pub fn set_last_cleanup(&self, at: i64) {
        self.props
            .set(&self.marker_name("clean.lastexecuted"), at.to_string());
    }

    pub fn is_cleaning(&self) -> bool {
        self.props
            .get(&self.marker_name("cleanbusy"))
            .is_some_and(|v| !v.is_empty())
    }

    pub fn set_cleaning(&self, busy: bool) {
        let name = self.marker_name("cleanbusy");
        if busy {
            self.props.set(&name, "busy".to_string());
        } else {
            self.props.clear(&name);
        }
    }
}
