use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method,
};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error};

use shared_config::AppConfig;

use crate::store::{ChangeEvent, ChangeFeed, ChangeOp, SharedStore};

/// PostgREST-style store client. The backing API only offers last-write-wins
/// updates, so `update_if` re-states the expected version in the update
/// predicate and treats an empty representation as a lost race.
///
/// Writes made through this process are echoed onto the local change feed;
/// convergence with writes from other processes rides on the poll fallback.
pub struct HttpStore {
    client: Client,
    base_url: String,
    anon_key: String,
    feed: ChangeFeed,
}

impl HttpStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.store_url.clone(),
            anon_key: config.store_anon_key.clone(),
            feed: ChangeFeed::new(),
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(key) = HeaderValue::from_str(&self.anon_key) {
            headers.insert("apikey", key);
        }
        if let Ok(bearer) = HeaderValue::from_str(&format!("Bearer {}", self.anon_key)) {
            headers.insert(AUTHORIZATION, bearer);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        headers
    }

    fn collection_url(&self, collection: &str, filters: &[(&str, String)]) -> String {
        let mut url = format!("{}/rest/v1/{}", self.base_url, collection);
        let mut sep = '?';
        for (field, value) in filters {
            url.push(sep);
            url.push_str(&format!("{}=eq.{}", field, value));
            sep = '&';
        }
        url
    }

    async fn request(&self, method: Method, url: &str, body: Option<Value>) -> Result<Vec<Value>> {
        debug!("Store request {} {}", method, url);

        let mut req = self.client.request(method, url).headers(self.headers());
        if let Some(body) = body {
            req = req.json(&body);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Store error ({}): {}", status, error_text);

            return Err(match status.as_u16() {
                401 | 403 => anyhow!("Store authentication error: {}", error_text),
                404 => anyhow!("Collection not found: {}", error_text),
                _ => anyhow!("Store error ({}): {}", status, error_text),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl SharedStore for HttpStore {
    async fn read(&self, collection: &str, filters: &[(&str, String)]) -> Result<Vec<Value>> {
        let url = self.collection_url(collection, filters);
        self.request(Method::GET, &url, None).await
    }

    async fn insert(&self, collection: &str, row: Value) -> Result<Value> {
        let url = self.collection_url(collection, &[]);
        let inserted = self.request(Method::POST, &url, Some(row)).await?;
        let row = inserted
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Insert into {} returned no representation", collection))?;

        self.feed.publish(collection, ChangeOp::Insert, row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        collection: &str,
        filters: &[(&str, String)],
        patch: Value,
    ) -> Result<Vec<Value>> {
        let url = self.collection_url(collection, filters);
        let updated = self.request(Method::PATCH, &url, Some(patch)).await?;

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
        let mut predicate: Vec<(&str, String)> = filters.to_vec();
        let version = expected_version.to_string();
        predicate.push(("version", version));

        let url = self.collection_url(collection, &predicate);
        let updated = self.request(Method::PATCH, &url, Some(patch)).await?;

        if updated.is_empty() {
            debug!(
                "Conditional write on {} lost the race (expected version {})",
                collection, expected_version
            );
            return Ok(false);
        }
        for row in &updated {
            self.feed.publish(collection, ChangeOp::Update, row.clone());
        }
        Ok(true)
    }

    async fn delete(&self, collection: &str, filters: &[(&str, String)]) -> Result<u64> {
        let url = self.collection_url(collection, filters);
        let removed = self.request(Method::DELETE, &url, None).await?;

        for row in &removed {
            self.feed.publish(collection, ChangeOp::Delete, row.clone());
        }
        Ok(removed.len() as u64)
    }

    fn subscribe(&self, collection: &str) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe(collection)
    }
}
