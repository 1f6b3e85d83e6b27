//! Per-run mutable context shared with tools and guardrails.

use std::sync::RwLock;

use serde_json::{Map, Value};

/// A key/value bag owned by exactly one run.
///
/// Tools that run concurrently within a turn may read and write it; writes
/// are last-write-wins.
#[derive(Debug, Default)]
pub struct RunContext {
    values: RwLock<Map<String, Value>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context pre-populated with values (e.g. restored from a snapshot).
    pub fn from_values(values: Map<String, Value>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.write().insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write().remove(key)
    }

    /// Copy of every value, for persistence.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.read().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Map<String, Value>> {
        self.values.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Map<String, Value>> {
        self.values.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let ctx = RunContext::new();
        ctx.set("user_id", Value::from(42));
        assert_eq!(ctx.get("user_id"), Some(Value::from(42)));
        assert_eq!(ctx.remove("user_id"), Some(Value::from(42)));
        assert!(ctx.get("user_id").is_none());
    }

    #[test]
    fn last_write_wins() {
        let ctx = RunContext::new();
        ctx.set("k", Value::from("first"));
        ctx.set("k", Value::from("second"));
        assert_eq!(ctx.get("k"), Some(Value::from("second")));
    }

    #[test]
    fn snapshot_round_trips_through_from_values() {
        let ctx = RunContext::new();
        ctx.set("locale", Value::from("nb-NO"));
        let restored = RunContext::from_values(ctx.snapshot());
        assert_eq!(restored.get("locale"), Some(Value::from("nb-NO")));
    }
}
