//! Run-scoped artifact store for the Codeloom pipeline.
//!
//! Every artifact produced or consumed during a run is an immutable
//! [`DataHandle`] owned by a [`DataStore`]. Producers write through a
//! [`Sink`], which always allocates a fresh handle; consumers read through a
//! [`ReadThroughScope`], which resolves URIs against an ordered list of
//! [`DataSource`]s and caches the first successful resolution.
//!
//! Concurrent reads of the same URI are coalesced: the underlying source is
//! fetched once and every caller observes the same handle (or the same
//! failure).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use codeloom_datastore::{DataSource, DataStore, IdentityPolicy, StoreSource};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), codeloom_datastore::DataStoreError> {
//! let store = DataStore::new(CancellationToken::new());
//! let sink = store.sink("models", IdentityPolicy::Keyed);
//! let handle = sink.write("pet.cs", "class Pet {}", "Models/Pet.cs")?;
//!
//! let source: Arc<dyn DataSource> = Arc::new(StoreSource::new(store.clone()));
//! let scope = store.read_through_scope(vec![source]);
//! let again = scope.read(handle.uri()).await?;
//! assert_eq!(again.content(), handle.content());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handle;
pub mod scope;
pub mod source;
pub mod store;

pub use self::error::DataStoreError;
pub use self::handle::{Artifact, DataHandle, HandleId};
pub use self::scope::{InputScope, ReadThroughScope};
pub use self::source::{
    DataSource, FetchedContent, FileSystemSource, HandleSource, Resolution, StoreSource,
};
pub use self::store::{DataStore, IdentityPolicy, Sink};
