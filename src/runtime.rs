use std::sync::Arc;

use serde_json::Value;

use crate::cache::SharedCache;
use crate::config::Batch;
use crate::source::{ContentSource, EntitySource, FieldSource};

/// The Runtime struct unifies the upstream handles the gateway talks to.
/// It is built once at startup and shared by every request; the loaders
/// wired from it are not.
#[derive(Clone)]
pub struct Runtime {
    /// User-profile service; fetched field-by-field.
    pub users: Arc<dyn FieldSource>,
    /// Activity service entities.
    pub campaigns: Arc<dyn EntitySource>,
    pub posts: Arc<dyn EntitySource>,
    /// Conversation service.
    pub conversations: Arc<dyn EntitySource>,
    /// CMS entities, keyed by id (entries, assets) or slug (pages).
    pub entries: Arc<dyn ContentSource>,
    pub assets: Arc<dyn ContentSource>,
    pub pages: Arc<dyn ContentSource>,
    /// Process-wide stale-while-revalidate cache in front of the CMS.
    pub content_cache: Arc<SharedCache<String, Option<Value>>>,
    /// Batch window applied to every loader.
    pub batch: Batch,
}
