use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// One change observed on a collection. Events for a single collection are
/// published in write order; there is no ordering across collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: String,
    pub op: ChangeOp,
    pub row: Value,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Keyed, queryable store the core runs against. Filters are field equality
/// pairs. Rows carrying an integer `version` field support conditional
/// writes via `update_if`; plain `update` is last-write-wins.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn read(&self, collection: &str, filters: &[(&str, String)]) -> Result<Vec<Value>>;

    async fn insert(&self, collection: &str, row: Value) -> Result<Value>;

    async fn update(
        &self,
        collection: &str,
        filters: &[(&str, String)],
        patch: Value,
    ) -> Result<Vec<Value>>;

    /// Conditional write: applies `patch` only to rows that still carry
    /// `expected_version`. Returns false when the row moved on since the
    /// caller's read - the caller lost the race and must re-read.
    async fn update_if(
        &self,
        collection: &str,
        filters: &[(&str, String)],
        expected_version: i64,
        patch: Value,
    ) -> Result<bool>;

    async fn delete(&self, collection: &str, filters: &[(&str, String)]) -> Result<u64>;

    /// Change feed for one collection. Lagging receivers may drop events;
    /// consumers recompute from a fresh snapshot instead of trusting deltas.
    fn subscribe(&self, collection: &str) -> broadcast::Receiver<ChangeEvent>;
}

const FEED_CAPACITY: usize = 256;

/// Per-collection broadcast channels shared by the store implementations.
#[derive(Default)]
pub struct ChangeFeed {
    senders: RwLock<HashMap<String, broadcast::Sender<ChangeEvent>>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, collection: &str) -> broadcast::Receiver<ChangeEvent> {
        let mut senders = self.senders.write().expect("change feed lock poisoned");
        senders
            .entry(collection.to_string())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .subscribe()
    }

    pub fn publish(&self, collection: &str, op: ChangeOp, row: Value) {
        let senders = self.senders.read().expect("change feed lock poisoned");
        if let Some(sender) = senders.get(collection) {
            let event = ChangeEvent {
                collection: collection.to_string(),
                op,
                row,
                occurred_at: Utc::now(),
            };
            // No receivers is fine; nobody is watching this collection.
            let _ = sender.send(event);
        }
    }
}

/// Equality match of a row against filter pairs. Non-string fields are
/// compared through their JSON rendering so numeric ids filter naturally.
pub(crate) fn row_matches(row: &Value, filters: &[(&str, String)]) -> bool {
    filters.iter().all(|(field, expected)| match row.get(*field) {
        Some(Value::String(s)) => s == expected,
        Some(other) => other.to_string() == *expected,
        None => false,
    })
}

pub(crate) fn merge_patch(row: &mut Value, patch: &Value) {
    if let (Some(target), Some(fields)) = (row.as_object_mut(), patch.as_object()) {
        for (key, value) in fields {
            target.insert(key.clone(), value.clone());
        }
    }
}
