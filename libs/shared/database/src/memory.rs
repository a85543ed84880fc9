use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::store::{merge_patch, row_matches, ChangeEvent, ChangeFeed, ChangeOp, SharedStore};

/// In-process store with real compare-and-set semantics under a single lock.
/// Backs local development runs and every cell's integration tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<Value>>>,
    feed: ChangeFeed,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn read(&self, collection: &str, filters: &[(&str, String)]) -> Result<Vec<Value>> {
        let tables = self.tables.read().await;
        let rows = tables
            .get(collection)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row_matches(row, filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn insert(&self, collection: &str, row: Value) -> Result<Value> {
        let mut tables = self.tables.write().await;
        tables
            .entry(collection.to_string())
            .or_default()
            .push(row.clone());
        drop(tables);

        self.feed.publish(collection, ChangeOp::Insert, row.clone());
        debug!("Inserted row into {}", collection);
        Ok(row)
    }

    async fn update(
        &self,
        collection: &str,
        filters: &[(&str, String)],
        patch: Value,
    ) -> Result<Vec<Value>> {
        let mut tables = self.tables.write().await;
        let mut updated = Vec::new();

        if let Some(rows) = tables.get_mut(collection) {
            for row in rows.iter_mut().filter(|row| row_matches(row, filters)) {
                merge_patch(row, &patch);
                updated.push(row.clone());
            }
        }
        drop(tables);

        for row in &updated {
            self.feed.publish(collection, ChangeOp::Update, row.clone());
        }
        Ok(updated)
    }

    async fn update_if(
        &self,
        collection: &str,
        filters: &[(&str, String)],
        expected_version: i64,
        patch: Value,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let mut applied = None;

        if let Some(rows) = tables.get_mut(collection) {
            if let Some(row) = rows.iter_mut().find(|row| row_matches(row, filters)) {
                if row.get("version").and_then(Value::as_i64) == Some(expected_version) {
                    merge_patch(row, &patch);
                    applied = Some(row.clone());
                }
            }
        }
        drop(tables);

        match applied {
            Some(row) => {
                self.feed.publish(collection, ChangeOp::Update, row);
                Ok(true)
            }
            None => {
                debug!(
                    "Conditional write on {} lost the race (expected version {})",
                    collection, expected_version
                );
                Ok(false)
            }
        }
    }

    async fn delete(&self, collection: &str, filters: &[(&str, String)]) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let mut removed = Vec::new();

        if let Some(rows) = tables.get_mut(collection) {
            rows.retain(|row| {
                if row_matches(row, filters) {
                    removed.push(row.clone());
                    false
                } else {
                    true
                }
            });
        }
        drop(tables);

        for row in &removed {
            self.feed.publish(collection, ChangeOp::Delete, row.clone());
        }
        Ok(removed.len() as u64)
    }

    fn subscribe(&self, collection: &str) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe(collection)
    }
}
