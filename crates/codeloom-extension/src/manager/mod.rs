//! Resolution and installation of extensions into a local cache.
//!
//! Installed packages live at `<cache_root>/<name>/<version>`. A package is
//! copied into a staging directory next to its final location, validated,
//! and renamed into place, so a half-copied package is never visible.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use semver::Version;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::ExtensionError;
use crate::manifest::{ExtensionManifest, MANIFEST_FILE};
use crate::package::{Package, VersionConstraint};
use crate::process::{LaunchSpec, PluginProcess};
use crate::registry::PackageRegistry;

/// Tracing target for installation and lookup.
const MANAGER_TARGET: &str = "codeloom_extension::manager";

/// Bookkeeping file written next to the manifest of an installed package.
const INSTALL_RECORD_FILE: &str = ".codeloom-install.json";

#[derive(Debug, Serialize, Deserialize)]
struct InstallRecord {
    source: String,
}

/// Returns the default cache root, `$HOME/.codeloom/extensions`.
#[must_use]
pub fn default_cache_root() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".codeloom").join("extensions"))
}

/// An installed, runnable extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    package: Package,
    manifest: ExtensionManifest,
}

impl Extension {
    /// Returns the installed package; its location is the install directory.
    #[must_use]
    pub const fn package(&self) -> &Package {
        &self.package
    }

    /// Returns the extension name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.package.name()
    }

    /// Returns the installed version.
    #[must_use]
    pub const fn version(&self) -> &Version {
        self.package.version()
    }

    /// Returns the installation directory.
    #[must_use]
    pub fn install_dir(&self) -> &Path {
        self.package.location()
    }

    /// Returns the manifest.
    #[must_use]
    pub const fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    /// Starts the extension as a subprocess with piped stdio.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::SpawnError`] if the executable cannot be
    /// launched.
    pub fn start(&self) -> Result<PluginProcess, ExtensionError> {
        let program = self.manifest.program(self.install_dir());
        PluginProcess::spawn(&LaunchSpec {
            name: self.name(),
            program: &program,
            args: self.manifest.args(),
            env: self.manifest.env(),
            working_dir: self.install_dir(),
        })
    }

    async fn load(dir: &Path) -> Result<Self, ExtensionError> {
        let manifest = ExtensionManifest::load(dir).await?;
        let record_path = dir.join(INSTALL_RECORD_FILE);
        let source = match tokio::fs::read(&record_path).await {
            Ok(bytes) => serde_json::from_slice::<InstallRecord>(&bytes)
                .map(|record| record.source)
                .map_err(|error| ExtensionError::Manifest {
                    path: record_path,
                    message: error.to_string(),
                })?,
            Err(_) => String::new(),
        };
        let version = Version::parse(manifest.version()).map_err(|error| {
            ExtensionError::Manifest {
                path: dir.join(MANIFEST_FILE),
                message: error.to_string(),
            }
        })?;
        Ok(Self {
            package: Package::new(manifest.name(), version, source, dir.to_path_buf()),
            manifest,
        })
    }
}

/// Registry of package sources and the local installation cache.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use codeloom_extension::{DirectoryRegistry, ExtensionManager, VersionConstraint};
///
/// # async fn demo() -> Result<(), codeloom_extension::ExtensionError> {
/// let manager = ExtensionManager::create("/tmp/codeloom-cache").await?;
/// manager.add_source("local", Arc::new(DirectoryRegistry::new("/srv/extensions")));
/// let extension = manager
///     .resolve("csharp", &VersionConstraint::Any, "local")
///     .await?;
/// let process = extension.start()?;
/// # drop(process);
/// # Ok(())
/// # }
/// ```
pub struct ExtensionManager {
    cache_root: PathBuf,
    sources: DashMap<String, Arc<dyn PackageRegistry>>,
    install_locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl ExtensionManager {
    /// Opens (and creates if needed) the cache rooted at `cache_root`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::InstallError`] if the directory cannot be
    /// created.
    pub async fn create(cache_root: impl Into<PathBuf>) -> Result<Self, ExtensionError> {
        let root = cache_root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|error| ExtensionError::InstallError {
                name: String::new(),
                version: String::new(),
                message: format!("cannot create cache '{}'", root.display()),
                source: Some(Arc::new(error)),
            })?;
        Ok(Self {
            cache_root: root,
            sources: DashMap::new(),
            install_locks: DashMap::new(),
        })
    }

    /// Returns the cache root.
    #[must_use]
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Registers a package source under `id`, replacing any previous one.
    pub fn add_source(&self, id: impl Into<String>, registry: Arc<dyn PackageRegistry>) {
        self.sources.insert(id.into(), registry);
    }

    /// Finds the highest version of `name` in `source` that satisfies
    /// `constraint`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::UnknownSource`] for an unregistered source,
    /// [`ExtensionError::PackageNotFound`] when nothing matches, and any
    /// listing error the registry raises.
    pub async fn find_package(
        &self,
        name: &str,
        constraint: &VersionConstraint,
        source: &str,
    ) -> Result<Package, ExtensionError> {
        let registry = self
            .sources
            .get(source)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ExtensionError::UnknownSource {
                registry: source.to_owned(),
            })?;

        let best = registry
            .candidates(name)
            .await?
            .into_iter()
            .filter(|candidate| constraint.matches(candidate.version()))
            .max_by(|left, right| left.version().cmp(right.version()))
            .ok_or_else(|| ExtensionError::PackageNotFound {
                name: name.to_owned(),
                constraint: constraint.to_string(),
                registry: source.to_owned(),
            })?;

        debug!(
            target: MANAGER_TARGET,
            package = name,
            %constraint,
            version = %best.version(),
            source,
            "package found"
        );
        Ok(Package::new(
            name,
            best.version().clone(),
            source,
            best.location().to_path_buf(),
        ))
    }

    /// Installs `package` into the cache, or returns the existing
    /// installation of that exact version.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::InstallError`] when copying fails and
    /// [`ExtensionError::Manifest`] when the package manifest is invalid or
    /// names a different package.
    pub async fn install_package(&self, package: &Package) -> Result<Extension, ExtensionError> {
        let target = self.install_dir(package.name(), package.version());
        let lock = Arc::clone(
            self.install_locks
                .entry(target.clone())
                .or_default()
                .value(),
        );
        let _guard = lock.lock().await;

        if tokio::fs::try_exists(target.join(MANIFEST_FILE))
            .await
            .unwrap_or(false)
        {
            debug!(target: MANAGER_TARGET, %package, "already installed");
            return Extension::load(&target).await;
        }

        let staged_package = package.clone();
        let staged_target = target.clone();
        tokio::task::spawn_blocking(move || stage_install(&staged_package, &staged_target))
            .await
            .map_err(|error| ExtensionError::InstallError {
                name: package.name().to_owned(),
                version: package.version().to_string(),
                message: format!("install task failed: {error}"),
                source: None,
            })??;

        info!(
            target: MANAGER_TARGET,
            %package,
            location = %target.display(),
            "installed extension"
        );
        Extension::load(&target).await
    }

    /// Finds and installs a package in one step.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Self::find_package`] or
    /// [`Self::install_package`].
    pub async fn resolve(
        &self,
        name: &str,
        constraint: &VersionConstraint,
        source: &str,
    ) -> Result<Extension, ExtensionError> {
        let package = self.find_package(name, constraint, source).await?;
        self.install_package(&package).await
    }

    /// Lists every installation in the cache, sorted by name and version.
    ///
    /// Directories that do not hold a valid installation are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::InstallError`] if the cache cannot be read.
    pub async fn installed(&self) -> Result<Vec<Extension>, ExtensionError> {
        let cache_error = |error: io::Error| ExtensionError::InstallError {
            name: String::new(),
            version: String::new(),
            message: format!("cannot read cache '{}'", self.cache_root.display()),
            source: Some(Arc::new(error)),
        };
        let mut found = Vec::new();
        let mut names = tokio::fs::read_dir(&self.cache_root)
            .await
            .map_err(cache_error)?;
        while let Some(name_entry) = names.next_entry().await.map_err(cache_error)? {
            let Ok(mut versions) = tokio::fs::read_dir(name_entry.path()).await else {
                continue;
            };
            while let Ok(Some(version_entry)) = versions.next_entry().await {
                let is_version = version_entry
                    .file_name()
                    .to_str()
                    .is_some_and(|raw| Version::parse(raw).is_ok());
                if !is_version {
                    continue;
                }
                if let Ok(extension) = Extension::load(&version_entry.path()).await {
                    found.push(extension);
                }
            }
        }
        found.sort_by(|left, right| {
            left.name()
                .cmp(right.name())
                .then_with(|| left.version().cmp(right.version()))
        });
        Ok(found)
    }

    fn install_dir(&self, name: &str, version: &Version) -> PathBuf {
        self.cache_root.join(name).join(version.to_string())
    }
}

impl std::fmt::Debug for ExtensionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionManager")
            .field("cache_root", &self.cache_root)
            .field("sources", &self.sources.len())
            .finish_non_exhaustive()
    }
}

/// Copies `package` into a staging directory beside `target`, checks its
/// manifest, and renames it into place.
fn stage_install(package: &Package, target: &Path) -> Result<(), ExtensionError> {
    let fail = |message: &str, error: io::Error| {
        ExtensionError::install(package.name(), package.version(), message, error)
    };
    let parent = target
        .parent()
        .ok_or_else(|| fail("install path has no parent", io::Error::other("root path")))?;
    fs::create_dir_all(parent).map_err(|error| fail("cannot create package dir", error))?;

    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(parent)
        .map_err(|error| fail("cannot create staging dir", error))?;
    copy_tree(package.location(), staging.path())
        .map_err(|error| fail("cannot copy package", error))?;

    check_staged_manifest(package, staging.path())?;

    let record = serde_json::to_vec(&InstallRecord {
        source: package.source().to_owned(),
    })
    .map_err(|error| fail("cannot encode install record", io::Error::other(error)))?;
    fs::write(staging.path().join(INSTALL_RECORD_FILE), record)
        .map_err(|error| fail("cannot write install record", error))?;

    match fs::rename(staging.path(), target) {
        Ok(()) => Ok(()),
        // Another process finished the same install first.
        Err(_) if target.join(MANIFEST_FILE).is_file() => Ok(()),
        Err(error) => Err(fail("cannot move package into place", error)),
    }
}

fn check_staged_manifest(package: &Package, dir: &Path) -> Result<(), ExtensionError> {
    let path = dir.join(MANIFEST_FILE);
    let invalid = |message: String| ExtensionError::Manifest {
        path: package.location().join(MANIFEST_FILE),
        message,
    };
    let bytes = fs::read(&path).map_err(|error| invalid(error.to_string()))?;
    let manifest: ExtensionManifest =
        serde_json::from_slice(&bytes).map_err(|error| invalid(error.to_string()))?;
    manifest.validate(&package.location().join(MANIFEST_FILE))?;
    if manifest.name() != package.name() {
        return Err(invalid(format!(
            "manifest names '{}' but package is '{}'",
            manifest.name(),
            package.name()
        )));
    }
    if manifest.version() != package.version().to_string() {
        return Err(invalid(format!(
            "manifest version {} does not match {}",
            manifest.version(),
            package.version()
        )));
    }
    Ok(())
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for item in fs::read_dir(from)? {
        let entry = item?;
        let destination = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &destination)?;
        } else {
            fs::copy(entry.path(), destination)?;
        }
    }
    Ok(())
}
