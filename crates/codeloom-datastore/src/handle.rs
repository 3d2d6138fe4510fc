//! Immutable artifact handles.

use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

/// Identity of a [`DataHandle`] within a store.
///
/// The URI alone is not unique: writing the same key twice yields two
/// revisions of one URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandleId {
    run: Uuid,
    uri: String,
    revision: usize,
}

impl HandleId {
    pub(crate) const fn new(run: Uuid, uri: String, revision: usize) -> Self {
        Self { run, uri, revision }
    }

    /// Returns the run that owns the handle.
    #[must_use]
    pub const fn run(&self) -> Uuid {
        self.run
    }

    /// Returns the generated URI.
    #[must_use]
    pub const fn uri(&self) -> &str {
        self.uri.as_str()
    }

    /// Returns the revision of the URI, starting at 1.
    #[must_use]
    pub const fn revision(&self) -> usize {
        self.revision
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.uri, self.revision)
    }
}

/// Content and metadata submitted to a [`Sink`](crate::Sink).
///
/// # Example
///
/// ```
/// use codeloom_datastore::Artifact;
///
/// let artifact = Artifact::new("pet.cs", "class Pet {}")
///     .with_description("Models/Pet.cs")
///     .with_media_kind("text/x-csharp");
/// assert_eq!(artifact.key(), "pet.cs");
/// ```
#[derive(Debug, Clone)]
pub struct Artifact {
    key: String,
    content: Bytes,
    description: Option<String>,
    source_uri: Option<String>,
    media_kind: Option<String>,
}

impl Artifact {
    /// Creates an artifact with the given key and content.
    #[must_use]
    pub fn new(key: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            content: content.into(),
            description: None,
            source_uri: None,
            media_kind: None,
        }
    }

    /// Sets the human-readable description (usually a virtual path).
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Records the URI the content originated from.
    #[must_use]
    pub fn with_source_uri(mut self, uri: impl Into<String>) -> Self {
        self.source_uri = Some(uri.into());
        self
    }

    /// Declares the media kind of the content.
    #[must_use]
    pub fn with_media_kind(mut self, kind: impl Into<String>) -> Self {
        self.media_kind = Some(kind.into());
        self
    }

    /// Returns the key the producer chose.
    #[must_use]
    pub const fn key(&self) -> &str {
        self.key.as_str()
    }

    pub(crate) fn into_parts(self) -> (String, HandleMetadata) {
        let description = self.description.unwrap_or_else(|| self.key.clone());
        (
            self.key,
            HandleMetadata {
                content: self.content,
                description,
                source_uri: self.source_uri,
                media_kind: self.media_kind,
            },
        )
    }
}

/// Everything a handle carries besides its identity.
#[derive(Debug, Clone)]
pub(crate) struct HandleMetadata {
    pub(crate) content: Bytes,
    pub(crate) description: String,
    pub(crate) source_uri: Option<String>,
    pub(crate) media_kind: Option<String>,
}

#[derive(Debug)]
struct HandleData {
    id: HandleId,
    metadata: HandleMetadata,
}

/// Immutable artifact produced or consumed during a run.
///
/// Handles are cheap to clone; clones share the same content buffer. Two
/// handles compare equal only when they have the same identity.
#[derive(Debug, Clone)]
pub struct DataHandle {
    inner: Arc<HandleData>,
}

impl DataHandle {
    pub(crate) fn new(id: HandleId, metadata: HandleMetadata) -> Self {
        Self {
            inner: Arc::new(HandleData { id, metadata }),
        }
    }

    /// Returns the handle identity.
    #[must_use]
    pub fn id(&self) -> &HandleId {
        &self.inner.id
    }

    /// Returns the generated URI.
    #[must_use]
    pub fn uri(&self) -> &str {
        self.inner.id.uri()
    }

    /// Returns the raw content.
    #[must_use]
    pub fn content(&self) -> &Bytes {
        &self.inner.metadata.content
    }

    /// Returns the content as UTF-8 text, or `None` for binary content.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.inner.metadata.content).ok()
    }

    /// Returns the description, usually a virtual output path.
    #[must_use]
    pub fn description(&self) -> &str {
        self.inner.metadata.description.as_str()
    }

    /// Returns the URI the content originated from, if any.
    #[must_use]
    pub fn source_uri(&self) -> Option<&str> {
        self.inner.metadata.source_uri.as_deref()
    }

    /// Returns the declared media kind, if any.
    #[must_use]
    pub fn media_kind(&self) -> Option<&str> {
        self.inner.metadata.media_kind.as_deref()
    }

    /// Returns the content length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.metadata.content.len()
    }

    /// Returns `true` when the content is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.metadata.content.is_empty()
    }
}

impl PartialEq for DataHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for DataHandle {}
