//! Resolvers consulted by a [`ReadThroughScope`](crate::ReadThroughScope).
//!
//! A source either does not recognise a URI (`Ok(None)`), resolves it to an
//! existing handle or to freshly fetched bytes, or recognises it and fails
//! with [`DataStoreError::SourceReadError`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use url::Url;

use crate::error::DataStoreError;
use crate::handle::DataHandle;
use crate::store::DataStore;

const SOURCE_TARGET: &str = "codeloom_datastore::source";

/// Bytes fetched by a source that does not own handles itself.
///
/// The scope turns fetched content into a new handle in its store.
#[derive(Debug, Clone)]
pub struct FetchedContent {
    content: Bytes,
    description: Option<String>,
    media_kind: Option<String>,
}

impl FetchedContent {
    /// Wraps fetched bytes.
    #[must_use]
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            description: None,
            media_kind: None,
        }
    }

    /// Sets the description given to the resulting handle.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the media kind given to the resulting handle.
    #[must_use]
    pub fn with_media_kind(mut self, kind: impl Into<String>) -> Self {
        self.media_kind = Some(kind.into());
        self
    }

    /// Returns the fetched bytes.
    #[must_use]
    pub const fn content(&self) -> &Bytes {
        &self.content
    }

    pub(crate) fn into_parts(self) -> (Bytes, Option<String>, Option<String>) {
        (self.content, self.description, self.media_kind)
    }
}

/// Outcome of a successful source lookup.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// The source already holds a handle for the URI.
    Handle(DataHandle),
    /// The source fetched raw content that still needs a handle.
    Content(FetchedContent),
}

/// A fallback resolver in a read-through scope.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Lists the URIs this source can resolve without being asked.
    ///
    /// Sources that resolve on demand (such as the file system) return an
    /// empty list.
    async fn enumerate(&self) -> Result<Vec<String>, DataStoreError>;

    /// Resolves `uri`, returning `Ok(None)` when the source does not
    /// recognise it.
    async fn read(&self, uri: &str) -> Result<Option<Resolution>, DataStoreError>;
}

/// Resolves `file://` URIs and absolute paths from the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSystemSource;

impl FileSystemSource {
    /// Creates a file system source.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn local_path(uri: &str) -> Option<Result<PathBuf, DataStoreError>> {
        if let Ok(url) = Url::parse(uri) {
            if url.scheme() == "file" {
                return Some(url.to_file_path().map_err(|()| DataStoreError::SourceReadError {
                    uri: uri.to_owned(),
                    message: String::from("not a local file path"),
                    source: None,
                }));
            }
            // Windows drive letters parse as a one-letter scheme.
            if url.scheme().len() > 1 {
                return None;
            }
        }
        let path = Path::new(uri);
        path.is_absolute().then(|| Ok(path.to_path_buf()))
    }
}

/// Guesses a media kind from a file extension.
fn media_kind_for(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "json" => Some("application/json"),
        "yaml" | "yml" => Some("application/yaml"),
        "md" | "markdown" => Some("text/markdown"),
        "txt" => Some("text/plain"),
        _ => None,
    }
}

#[async_trait]
impl DataSource for FileSystemSource {
    async fn enumerate(&self) -> Result<Vec<String>, DataStoreError> {
        Ok(Vec::new())
    }

    async fn read(&self, uri: &str) -> Result<Option<Resolution>, DataStoreError> {
        let Some(local) = Self::local_path(uri) else {
            return Ok(None);
        };
        let path = local?;
        debug!(target: SOURCE_TARGET, path = %path.display(), "reading file");
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|error| DataStoreError::read_failed(uri, error))?;

        let mut fetched = FetchedContent::new(bytes);
        if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
            fetched = fetched.with_description(name);
        }
        if let Some(kind) = media_kind_for(&path) {
            fetched = fetched.with_media_kind(kind);
        }
        Ok(Some(Resolution::Content(fetched)))
    }
}

/// A fixed set of handles resolvable by URI.
#[derive(Debug, Clone, Default)]
pub struct HandleSource {
    handles: Vec<DataHandle>,
}

impl HandleSource {
    /// Creates a source over `handles`. A later handle with the same URI
    /// shadows an earlier one.
    #[must_use]
    pub fn new(handles: impl IntoIterator<Item = DataHandle>) -> Self {
        Self {
            handles: handles.into_iter().collect(),
        }
    }

    /// Returns the number of handles held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns `true` when the source holds no handles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[async_trait]
impl DataSource for HandleSource {
    async fn enumerate(&self) -> Result<Vec<String>, DataStoreError> {
        Ok(unique_uris(self.handles.iter()))
    }

    async fn read(&self, uri: &str) -> Result<Option<Resolution>, DataStoreError> {
        Ok(self
            .handles
            .iter()
            .rev()
            .find(|handle| handle.uri() == uri)
            .cloned()
            .map(Resolution::Handle))
    }
}

/// Resolves URIs against handles already registered in a store.
#[derive(Debug, Clone)]
pub struct StoreSource {
    store: DataStore,
}

impl StoreSource {
    /// Creates a source backed by `store`.
    #[must_use]
    pub const fn new(store: DataStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DataSource for StoreSource {
    async fn enumerate(&self) -> Result<Vec<String>, DataStoreError> {
        Ok(unique_uris(self.store.handles().iter()))
    }

    async fn read(&self, uri: &str) -> Result<Option<Resolution>, DataStoreError> {
        Ok(self.store.latest(uri).map(Resolution::Handle))
    }
}

fn unique_uris<'a>(handles: impl Iterator<Item = &'a DataHandle>) -> Vec<String> {
    let mut seen = HashSet::new();
    handles
        .filter(|handle| seen.insert(handle.uri()))
        .map(|handle| handle.uri().to_owned())
        .collect()
}
