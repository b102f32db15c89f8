use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;

use crate::cache::SharedCache;
use crate::data_loader::{FieldLoader, Loader};

/// Error an upstream adapter hands back. `Arc` so one failure can settle
/// every caller of a batch.
pub type SourceError = Arc<anyhow::Error>;

/// Per-key outcomes of one batch fetch, aligned with the requested ids.
/// `Ok(None)` is a definite "not found" and is cached as such; `Err` is a
/// per-key fault.
pub type KeyedResults = Vec<Result<Option<Value>, SourceError>>;

/// One entity type of one upstream service, reduced to batch lookup.
#[async_trait::async_trait]
pub trait EntitySource: Send + Sync + 'static {
    async fn fetch_batch(
        &self,
        ids: &[String],
        authorization: Option<&str>,
    ) -> Result<KeyedResults, SourceError>;
}

/// An upstream that can answer per-field lookups for one entity type.
#[async_trait::async_trait]
pub trait FieldSource: Send + Sync + 'static {
    async fn fetch_fields(
        &self,
        id: &str,
        fields: &[String],
        authorization: Option<&str>,
    ) -> Result<HashMap<String, Value>, SourceError>;
}

/// A CMS-style upstream with a draft ("preview") environment next to the
/// published one.
#[async_trait::async_trait]
pub trait ContentSource: Send + Sync + 'static {
    async fn fetch_batch(
        &self,
        ids: &[String],
        preview: bool,
    ) -> Result<KeyedResults, SourceError>;
}

/// Bridges an [EntitySource] into the batching loader, with the
/// request's authorization bound at construction time.
pub struct SourceLoader {
    source: Arc<dyn EntitySource>,
    authorization: Option<String>,
}

impl SourceLoader {
    pub fn new(source: Arc<dyn EntitySource>, authorization: Option<String>) -> Self {
        Self { source, authorization }
    }
}

#[async_trait::async_trait]
impl Loader<String> for SourceLoader {
    type Value = Option<Value>;
    type Error = SourceError;

    async fn load(
        &self,
        keys: &[String],
    ) -> Result<Vec<Result<Self::Value, Self::Error>>, Self::Error> {
        self.source
            .fetch_batch(keys, self.authorization.as_deref())
            .await
    }
}

/// Bridges a [FieldSource] into the field-aware loader.
pub struct FieldSourceLoader {
    source: Arc<dyn FieldSource>,
    authorization: Option<String>,
}

impl FieldSourceLoader {
    pub fn new(source: Arc<dyn FieldSource>, authorization: Option<String>) -> Self {
        Self { source, authorization }
    }
}

#[async_trait::async_trait]
impl FieldLoader<String> for FieldSourceLoader {
    type Value = Value;
    type Error = SourceError;

    async fn fetch_fields(
        &self,
        id: &String,
        fields: &[String],
    ) -> Result<HashMap<String, Value>, Self::Error> {
        self.source
            .fetch_fields(id, fields, self.authorization.as_deref())
            .await
    }
}

/// Routes per-id CMS lookups through the process-wide shared cache, so
/// hot entries survive across requests and bursts collapse onto single
/// upstream calls. Preview-mode lookups address the draft environment
/// and never share cache keys with published content.
pub struct CachedContent {
    source: Arc<dyn ContentSource>,
    cache: Arc<SharedCache<String, Option<Value>>>,
    prefix: &'static str,
    preview: bool,
}

impl CachedContent {
    pub fn new(
        source: Arc<dyn ContentSource>,
        cache: Arc<SharedCache<String, Option<Value>>>,
        prefix: &'static str,
        preview: bool,
    ) -> Self {
        Self { source, cache, prefix, preview }
    }

    fn cache_key(&self, id: &str) -> String {
        let env = if self.preview { "preview" } else { "live" };
        format!("{}:{}:{}", self.prefix, env, id)
    }

    async fn load_entry(&self, id: &str) -> Result<Option<Value>, SourceError> {
        let source = self.source.clone();
        let preview = self.preview;
        let id = id.to_string();
        self.cache
            .get(self.cache_key(&id), move || {
                Box::pin(async move {
                    let results = source
                        .fetch_batch(std::slice::from_ref(&id), preview)
                        .await
                        .map_err(|err| anyhow::anyhow!(err))?;
                    results
                        .into_iter()
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("empty batch response for `{}`", id))?
                        .map_err(|err| anyhow::anyhow!(err))
                })
            })
            .await
            .map_err(|err| Arc::new(anyhow::anyhow!(err)))
    }
}

#[async_trait::async_trait]
impl Loader<String> for CachedContent {
    type Value = Option<Value>;
    type Error = SourceError;

    async fn load(
        &self,
        keys: &[String],
    ) -> Result<Vec<Result<Self::Value, Self::Error>>, Self::Error> {
        let futures = keys.iter().map(|id| self.load_entry(id));
        Ok(join_all(futures).await)
    }
}
