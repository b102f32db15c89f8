use derive_setters::Setters;
use once_cell::sync::OnceCell;

use crate::registry::LoaderRegistry;
use crate::runtime::Runtime;

/// Everything one inbound operation carries through its resolvers.
///
/// Built by the transport layer, passed by reference, dropped when the
/// operation finishes — which is also what bounds the lifetime of the
/// loaders and their caches.
#[derive(Default, Setters)]
pub struct RequestContext {
    /// The caller's `Authorization` header, forwarded to the upstreams
    /// that want it.
    pub authorization: Option<String>,
    /// Serve draft CMS content instead of the published environment.
    pub preview: bool,
    #[setters(skip)]
    loaders: OnceCell<LoaderRegistry>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The loader registry of this request, built on first use and
    /// shared by every resolver of the operation.
    pub fn loaders(&self, runtime: &Runtime) -> &LoaderRegistry {
        self.loaders
            .get_or_init(|| LoaderRegistry::new(runtime, self))
    }
}
