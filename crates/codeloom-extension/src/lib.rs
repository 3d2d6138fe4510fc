//! Extension discovery, installation, and process start-up for Codeloom.
//!
//! An extension is a plugin package: a directory holding a
//! `codeloom-extension.json` manifest plus whatever the manifest's command
//! needs. Packages are offered by a [`PackageRegistry`], resolved by name and
//! [`VersionConstraint`], and copied into a local cache by the
//! [`ExtensionManager`]. An installed [`Extension`] starts as a
//! [`PluginProcess`] whose stdio carries the plugin protocol.
//!
//! Nothing here knows about the protocol itself; `codeloom-plugins` wraps the
//! process streams.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use codeloom_extension::{
//!     default_cache_root, DirectoryRegistry, ExtensionManager, VersionConstraint,
//! };
//!
//! # async fn demo() -> Result<(), codeloom_extension::ExtensionError> {
//! let root = default_cache_root().unwrap_or_else(|| "/tmp/codeloom".into());
//! let manager = ExtensionManager::create(root).await?;
//! manager.add_source("local", Arc::new(DirectoryRegistry::new("/srv/extensions")));
//! let extension = manager.resolve("csharp", &VersionConstraint::Any, "local").await?;
//! println!("installed {} at {}", extension.name(), extension.install_dir().display());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod manager;
pub mod manifest;
pub mod package;
pub mod process;
pub mod registry;

pub use self::error::ExtensionError;
pub use self::manager::{default_cache_root, Extension, ExtensionManager};
pub use self::manifest::{ExtensionManifest, MANIFEST_FILE};
pub use self::package::{Package, PackageCandidate, VersionConstraint};
pub use self::process::PluginProcess;
pub use self::registry::{DirectoryRegistry, PackageRegistry};
