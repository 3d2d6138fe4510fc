//! The `codeloom-extension.json` manifest shipped with every package.
//!
//! A manifest names the extension, pins its version, and says how to launch
//! it. Relative command paths resolve against the installation directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ExtensionError;

/// File name of the manifest inside a package directory.
pub const MANIFEST_FILE: &str = "codeloom-extension.json";

/// Declarative description of how to run an extension.
///
/// # Example
///
/// ```
/// use codeloom_extension::ExtensionManifest;
///
/// let manifest = ExtensionManifest::new("csharp", "3.0.0", "bin/csharp-plugin")
///     .with_args(vec!["--stdio".into()]);
/// assert_eq!(manifest.name(), "csharp");
/// assert_eq!(manifest.args(), &["--stdio"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    name: String,
    version: String,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

impl ExtensionManifest {
    /// Creates a manifest without arguments or environment overrides.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Sets the arguments passed to the command.
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Adds an environment variable for the child process.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Reads and validates the manifest stored in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::Manifest`] if the file is missing, is not
    /// valid JSON, or fails validation.
    pub async fn load(dir: &Path) -> Result<Self, ExtensionError> {
        let path = dir.join(MANIFEST_FILE);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|error| ExtensionError::Manifest {
                path: path.clone(),
                message: error.to_string(),
            })?;
        let manifest: Self =
            serde_json::from_slice(&bytes).map_err(|error| ExtensionError::Manifest {
                path: path.clone(),
                message: error.to_string(),
            })?;
        manifest.validate(&path)?;
        Ok(manifest)
    }

    /// Validates the manifest read from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::Manifest`] when the name or command is blank
    /// or the version is not a semantic version.
    pub fn validate(&self, path: &Path) -> Result<(), ExtensionError> {
        let fail = |message: String| ExtensionError::Manifest {
            path: path.to_path_buf(),
            message,
        };
        if self.name.trim().is_empty() {
            return Err(fail(String::from("extension name must not be empty")));
        }
        if self.command.trim().is_empty() {
            return Err(fail(String::from("command must not be empty")));
        }
        semver::Version::parse(&self.version)
            .map_err(|error| fail(format!("version '{}': {error}", self.version)))?;
        Ok(())
    }

    /// Returns the extension name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the declared version.
    #[must_use]
    pub const fn version(&self) -> &str {
        self.version.as_str()
    }

    /// Returns the command as written in the manifest.
    #[must_use]
    pub const fn command(&self) -> &str {
        self.command.as_str()
    }

    /// Returns the default arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns environment overrides for the child.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Resolves the command against `install_dir`.
    ///
    /// Absolute paths are kept. Paths with a separator are joined onto the
    /// installation directory. Bare names are left for `PATH` lookup.
    #[must_use]
    pub fn program(&self, install_dir: &Path) -> PathBuf {
        let command = Path::new(&self.command);
        if command.is_absolute() || command.components().count() == 1 {
            command.to_path_buf()
        } else {
            install_dir.join(command)
        }
    }
}
