//! Package registries the manager resolves names against.
//!
//! A registry only lists what it offers; picking a version and installing it
//! is the manager's job.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use semver::Version;
use tracing::debug;

use crate::error::ExtensionError;
use crate::manifest::MANIFEST_FILE;
use crate::package::PackageCandidate;

const REGISTRY_TARGET: &str = "codeloom_extension::registry";

/// A source of installable packages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PackageRegistry: Send + Sync {
    /// Lists every version of `name` on offer, in no particular order.
    ///
    /// An unknown name yields an empty list, not an error.
    async fn candidates(&self, name: &str) -> Result<Vec<PackageCandidate>, ExtensionError>;
}

/// A registry backed by a directory laid out as
/// `<root>/<name>/<version>/codeloom-extension.json`.
///
/// Version directories whose name is not a semantic version, or that carry
/// no manifest, are skipped.
#[derive(Debug, Clone)]
pub struct DirectoryRegistry {
    root: PathBuf,
}

impl DirectoryRegistry {
    /// Creates a registry rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the registry root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn listing_error(&self, error: std::io::Error) -> ExtensionError {
        ExtensionError::Registry {
            registry: self.root.display().to_string(),
            message: error.to_string(),
            source: Some(Arc::new(error)),
        }
    }
}

#[async_trait]
impl PackageRegistry for DirectoryRegistry {
    async fn candidates(&self, name: &str) -> Result<Vec<PackageCandidate>, ExtensionError> {
        let package_dir = self.root.join(name);
        let mut entries = match tokio::fs::read_dir(&package_dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(self.listing_error(error)),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|error| self.listing_error(error))?
        {
            let Some(version) = entry
                .file_name()
                .to_str()
                .and_then(|raw| Version::parse(raw).ok())
            else {
                continue;
            };
            let location = entry.path();
            if tokio::fs::try_exists(location.join(MANIFEST_FILE))
                .await
                .unwrap_or(false)
            {
                found.push(PackageCandidate::new(version, location));
            }
        }

        debug!(
            target: REGISTRY_TARGET,
            package = name,
            versions = found.len(),
            "listed package versions"
        );
        Ok(found)
    }
}

#[cfg(test)]
mod tests;
