//! The per-run handle registry and its sink factory.
//!
//! A [`DataStore`] is bound to one cancellation token and one run id. Its
//! registry only grows during a run: handles are never removed or edited,
//! and a write under an existing URI allocates a new revision.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::DataStoreError;
use crate::handle::{Artifact, DataHandle, HandleId, HandleMetadata};
use crate::scope::ReadThroughScope;
use crate::source::DataSource;

const STORE_TARGET: &str = "codeloom_datastore::store";

/// How a [`Sink`] derives handle URIs from producer keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdentityPolicy {
    /// The URI embeds the producer's key: `mem://<run>/<sink>/<key>`.
    #[default]
    Keyed,
    /// The URI embeds a per-sink counter: `mem://<run>/<sink>/<n>`. The key
    /// only survives as the default description.
    Sequential,
}

struct StoreInner {
    run_id: Uuid,
    token: CancellationToken,
    by_uri: DashMap<String, Vec<DataHandle>>,
    log: Mutex<Vec<DataHandle>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of every handle produced during one run.
#[derive(Clone)]
pub struct DataStore {
    inner: Arc<StoreInner>,
}

impl DataStore {
    /// Creates an empty store bound to the run's cancellation token.
    #[must_use]
    pub fn new(token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                run_id: Uuid::new_v4(),
                token,
                by_uri: DashMap::new(),
                log: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the run id embedded in every handle identity.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }

    /// Returns the token the store observes.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Returns a write target whose URIs follow `policy`.
    #[must_use]
    pub fn sink(&self, name: impl Into<String>, policy: IdentityPolicy) -> Sink {
        Sink {
            store: self.clone(),
            name: name.into(),
            policy,
            counter: Arc::new(AtomicU64::new(0)),
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns a cached resolver over `sources`, consulted in order.
    #[must_use]
    pub fn read_through_scope(&self, sources: Vec<Arc<dyn DataSource>>) -> ReadThroughScope {
        ReadThroughScope::new(self.clone(), sources)
    }

    /// Returns the newest revision registered under `uri`.
    #[must_use]
    pub fn latest(&self, uri: &str) -> Option<DataHandle> {
        self.inner
            .by_uri
            .get(uri)
            .and_then(|revisions| revisions.last().cloned())
    }

    /// Returns every handle in allocation order.
    #[must_use]
    pub fn handles(&self) -> Vec<DataHandle> {
        lock(&self.inner.log).clone()
    }

    /// Returns the number of handles allocated so far.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner.log).len()
    }

    /// Returns `true` when no handle has been allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocates a new handle under `uri`.
    pub(crate) fn allocate(
        &self,
        uri: String,
        metadata: HandleMetadata,
    ) -> Result<DataHandle, DataStoreError> {
        if self.inner.token.is_cancelled() {
            return Err(DataStoreError::Cancelled);
        }

        let mut revisions = self.inner.by_uri.entry(uri.clone()).or_default();
        let id = HandleId::new(self.inner.run_id, uri, revisions.len() + 1);
        let handle = DataHandle::new(id, metadata);
        revisions.push(handle.clone());
        lock(&self.inner.log).push(handle.clone());
        drop(revisions);

        debug!(
            target: STORE_TARGET,
            handle = %handle.id(),
            bytes = handle.len(),
            "allocated handle"
        );
        Ok(handle)
    }
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore")
            .field("run_id", &self.inner.run_id)
            .field("handles", &self.len())
            .finish()
    }
}

/// Write target that allocates a new [`DataHandle`] per write.
///
/// Clones share the same list of written handles.
#[derive(Clone)]
pub struct Sink {
    store: DataStore,
    name: String,
    policy: IdentityPolicy,
    counter: Arc<AtomicU64>,
    written: Arc<Mutex<Vec<DataHandle>>>,
}

impl Sink {
    /// Returns the sink name used in generated URIs.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Writes `content` under `key`, described by `description`.
    ///
    /// # Errors
    ///
    /// Returns [`DataStoreError::Cancelled`] once the store's token has been
    /// signalled. Otherwise the write always succeeds.
    pub fn write(
        &self,
        key: &str,
        content: impl Into<Bytes>,
        description: &str,
    ) -> Result<DataHandle, DataStoreError> {
        self.write_artifact(Artifact::new(key, content).with_description(description))
    }

    /// Writes a fully described artifact.
    ///
    /// # Errors
    ///
    /// Returns [`DataStoreError::Cancelled`] once the store's token has been
    /// signalled.
    pub fn write_artifact(&self, artifact: Artifact) -> Result<DataHandle, DataStoreError> {
        let (key, metadata) = artifact.into_parts();
        let uri = self.uri_for(&key);
        let handle = self.store.allocate(uri, metadata)?;
        lock(&self.written).push(handle.clone());
        Ok(handle)
    }

    /// Returns the handles written through this sink, in write order.
    #[must_use]
    pub fn handles(&self) -> Vec<DataHandle> {
        lock(&self.written).clone()
    }

    fn uri_for(&self, key: &str) -> String {
        let run = self.store.run_id();
        match self.policy {
            IdentityPolicy::Keyed => {
                format!("mem://{run}/{}/{}", self.name, key.trim_start_matches('/'))
            }
            IdentityPolicy::Sequential => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst);
                format!("mem://{run}/{}/{n}", self.name)
            }
        }
    }
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
