//! Cached, fallback-chained URI resolution.
//!
//! Each URI maps to one [`OnceCell`] in the cache. The first reader drives
//! the fetch; readers arriving while it is in flight await the same cell and
//! observe the same outcome. A failed cell is evicted once settled so a
//! later, non-concurrent read retries the sources.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::DataStoreError;
use crate::handle::{DataHandle, HandleMetadata};
use crate::source::{DataSource, Resolution};
use crate::store::DataStore;

const SCOPE_TARGET: &str = "codeloom_datastore::scope";

type Slot = Arc<OnceCell<Result<DataHandle, DataStoreError>>>;

/// Read access to a set of input artifacts.
///
/// This is the capability handed to a plugin invocation: it can list the
/// identifiers on offer and fetch any of them lazily.
#[async_trait]
pub trait InputScope: Send + Sync {
    /// Lists the identifiers the scope can resolve without guessing.
    async fn enumerate(&self) -> Result<Vec<String>, DataStoreError>;

    /// Resolves `uri` to a handle.
    async fn read(&self, uri: &str) -> Result<DataHandle, DataStoreError>;
}

struct ScopeInner {
    store: DataStore,
    sources: Vec<Arc<dyn DataSource>>,
    cache: DashMap<String, Slot>,
}

/// Resolver over an ordered list of sources with a single-flight cache.
#[derive(Clone)]
pub struct ReadThroughScope {
    inner: Arc<ScopeInner>,
}

impl ReadThroughScope {
    pub(crate) fn new(store: DataStore, sources: Vec<Arc<dyn DataSource>>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                store,
                sources,
                cache: DashMap::new(),
            }),
        }
    }

    /// Returns the number of sources consulted.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.inner.sources.len()
    }

    /// Resolves `uri`, fetching it at most once for concurrent callers.
    ///
    /// # Errors
    ///
    /// Returns [`DataStoreError::SourceUnavailable`] when no source
    /// recognises the URI, [`DataStoreError::SourceReadError`] when a source
    /// recognises it but fails, and [`DataStoreError::Cancelled`] once the
    /// store's token fires.
    pub async fn read(&self, uri: &str) -> Result<DataHandle, DataStoreError> {
        let token = self.inner.store.cancellation().clone();
        if token.is_cancelled() {
            return Err(DataStoreError::Cancelled);
        }

        let slot: Slot = self
            .inner
            .cache
            .entry(uri.to_owned())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let outcome = tokio::select! {
            biased;
            () = token.cancelled() => return Err(DataStoreError::Cancelled),
            outcome = slot.get_or_init(|| self.fetch(uri)) => outcome.clone(),
        };

        if outcome.is_err() {
            self.inner
                .cache
                .remove_if(uri, |_, cached| Arc::ptr_eq(cached, &slot));
        }
        outcome
    }

    /// Resolves `uri`, mapping [`DataStoreError::SourceUnavailable`] to
    /// `None`.
    ///
    /// # Errors
    ///
    /// Returns every other error [`ReadThroughScope::read`] can raise.
    pub async fn try_read(&self, uri: &str) -> Result<Option<DataHandle>, DataStoreError> {
        match self.read(uri).await {
            Ok(handle) => Ok(Some(handle)),
            Err(DataStoreError::SourceUnavailable { .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Lists what every source can enumerate, de-duplicated in source order.
    ///
    /// # Errors
    ///
    /// Propagates the first source failure.
    pub async fn enumerate(&self) -> Result<Vec<String>, DataStoreError> {
        let mut seen = HashSet::new();
        let mut uris = Vec::new();
        for source in &self.inner.sources {
            for uri in source.enumerate().await? {
                if seen.insert(uri.clone()) {
                    uris.push(uri);
                }
            }
        }
        Ok(uris)
    }

    async fn fetch(&self, uri: &str) -> Result<DataHandle, DataStoreError> {
        debug!(target: SCOPE_TARGET, uri, "cache miss");
        for source in &self.inner.sources {
            match source.read(uri).await {
                Ok(None) => {}
                Ok(Some(Resolution::Handle(handle))) => return Ok(handle),
                Ok(Some(Resolution::Content(fetched))) => {
                    let (content, description, media_kind) = fetched.into_parts();
                    let metadata = HandleMetadata {
                        content,
                        description: description.unwrap_or_else(|| uri.to_owned()),
                        source_uri: Some(uri.to_owned()),
                        media_kind,
                    };
                    return self.inner.store.allocate(uri.to_owned(), metadata);
                }
                Err(error) => {
                    warn!(target: SCOPE_TARGET, uri, %error, "source failed");
                    return Err(error);
                }
            }
        }
        Err(DataStoreError::SourceUnavailable {
            uri: uri.to_owned(),
        })
    }
}

#[async_trait]
impl InputScope for ReadThroughScope {
    async fn enumerate(&self) -> Result<Vec<String>, DataStoreError> {
        Self::enumerate(self).await
    }

    async fn read(&self, uri: &str) -> Result<DataHandle, DataStoreError> {
        Self::read(self, uri).await
    }
}

impl std::fmt::Debug for ReadThroughScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadThroughScope")
            .field("sources", &self.inner.sources.len())
            .field("cached", &self.inner.cache.len())
            .finish()
    }
}
