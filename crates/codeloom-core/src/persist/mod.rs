//! Writing run artifacts to an output directory.
//!
//! Each artifact lands at `<dir>/<description>`. Content is written to a
//! temporary file beside its target and renamed into place, so readers never
//! observe a partially written artifact.

use std::io::Write as _;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use codeloom_datastore::DataHandle;
use thiserror::Error;
use tracing::debug;

const PERSIST_TARGET: &str = "codeloom_core::persist";

/// Errors raised while persisting artifacts.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The artifact's description would escape the output directory.
    #[error("artifact '{uri}' has unsafe output path '{description}'")]
    UnsafePath {
        /// Handle URI of the rejected artifact.
        uri: String,
        /// The offending description.
        description: String,
    },
    /// Writing the artifact failed.
    #[error("failed to write {path}: {source}")]
    Write {
        /// Target path.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}

impl PersistError {
    fn write(path: &Utf8Path, source: std::io::Error) -> Self {
        Self::Write {
            path: path.to_owned(),
            source,
        }
    }
}

/// Writes every artifact under `dir`, named by its description.
///
/// Paths are validated before anything is written, so an unsafe description
/// leaves the directory untouched. When two artifacts share a description
/// the later one wins.
///
/// # Errors
///
/// Returns [`PersistError::UnsafePath`] for an empty, absolute, or
/// parent-relative description, and [`PersistError::Write`] when a file
/// cannot be written.
pub fn persist_artifacts(
    artifacts: &[DataHandle],
    dir: &Utf8Path,
) -> Result<Vec<Utf8PathBuf>, PersistError> {
    let targets = artifacts
        .iter()
        .map(|artifact| relative_target(artifact).map(|relative| dir.join(relative)))
        .collect::<Result<Vec<_>, _>>()?;

    for (artifact, target) in artifacts.iter().zip(&targets) {
        write_atomically(target, artifact.content())?;
        debug!(
            target: PERSIST_TARGET,
            uri = artifact.uri(),
            path = %target,
            bytes = artifact.len(),
            "persisted artifact"
        );
    }
    Ok(targets)
}

fn relative_target(artifact: &DataHandle) -> Result<&Utf8Path, PersistError> {
    let path = Utf8Path::new(artifact.description());
    let safe = path
        .components()
        .any(|component| matches!(component, Utf8Component::Normal(_)))
        && path
            .components()
            .all(|component| matches!(component, Utf8Component::Normal(_) | Utf8Component::CurDir));
    if safe {
        Ok(path)
    } else {
        Err(PersistError::UnsafePath {
            uri: artifact.uri().to_owned(),
            description: artifact.description().to_owned(),
        })
    }
}

fn write_atomically(path: &Utf8Path, content: &[u8]) -> Result<(), PersistError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    std::fs::create_dir_all(parent).map_err(|error| PersistError::write(path, error))?;

    let mut staged =
        tempfile::NamedTempFile::new_in(parent).map_err(|error| PersistError::write(path, error))?;
    staged
        .write_all(content)
        .map_err(|error| PersistError::write(path, error))?;
    staged
        .persist(path)
        .map_err(|error| PersistError::write(path, error.error))?;
    Ok(())
}
