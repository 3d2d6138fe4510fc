//! Package descriptors and version constraints.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use semver::{Version, VersionReq};

use crate::error::ExtensionError;

/// Which versions of a package are acceptable.
///
/// # Example
///
/// ```
/// use codeloom_extension::VersionConstraint;
///
/// let any: VersionConstraint = "*".parse().expect("wildcard");
/// assert!(any.matches(&semver::Version::new(0, 1, 0)));
///
/// let caret: VersionConstraint = "^2.1".parse().expect("caret");
/// assert!(!caret.matches(&semver::Version::new(3, 0, 0)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VersionConstraint {
    /// Any available version; the highest wins.
    #[default]
    Any,
    /// A semantic version requirement.
    Req(VersionReq),
}

impl VersionConstraint {
    /// Returns `true` when `version` satisfies the constraint.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Any => true,
            Self::Req(req) => req.matches(version),
        }
    }
}

impl FromStr for VersionConstraint {
    type Err = ExtensionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Ok(Self::Any);
        }
        VersionReq::parse(trimmed)
            .map(Self::Req)
            .map_err(|source| ExtensionError::InvalidConstraint {
                constraint: s.to_owned(),
                source,
            })
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Req(req) => write!(f, "{req}"),
        }
    }
}

/// A package version offered by a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageCandidate {
    version: Version,
    location: PathBuf,
}

impl PackageCandidate {
    /// Creates a candidate found at `location`.
    #[must_use]
    pub const fn new(version: Version, location: PathBuf) -> Self {
        Self { version, location }
    }

    /// Returns the offered version.
    #[must_use]
    pub const fn version(&self) -> &Version {
        &self.version
    }

    /// Returns the directory holding the package files.
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }
}

/// A resolved package: one exact version from one registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    name: String,
    version: Version,
    source: String,
    location: PathBuf,
}

impl Package {
    /// Creates a package descriptor.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: Version,
        source: impl Into<String>,
        location: PathBuf,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            source: source.into(),
            location,
        }
    }

    /// Returns the package name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the exact version.
    #[must_use]
    pub const fn version(&self) -> &Version {
        &self.version
    }

    /// Returns the identifier of the registry the package came from.
    #[must_use]
    pub const fn source(&self) -> &str {
        self.source.as_str()
    }

    /// Returns the directory the package files are read from.
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.name, self.version, self.source)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::star("*")]
    #[case::blank("")]
    #[case::padded("  *  ")]
    fn wildcard_forms_parse_as_any(#[case] text: &str) {
        let constraint: VersionConstraint = text.parse().expect("parse");
        assert_eq!(constraint, VersionConstraint::Any);
        assert_eq!(constraint.to_string(), "*");
    }

    #[rstest]
    #[case::caret("^1.2", "1.9.0", true)]
    #[case::caret_major("^1.2", "2.0.0", false)]
    #[case::exact("=3.0.1", "3.0.1", true)]
    #[case::range(">=2, <3", "2.5.0", true)]
    fn requirement_matching(#[case] text: &str, #[case] raw: &str, #[case] expected: bool) {
        let constraint: VersionConstraint = text.parse().expect("parse");
        let version = Version::parse(raw).expect("version");
        assert_eq!(constraint.matches(&version), expected);
    }

    #[test]
    fn garbage_constraint_is_rejected() {
        let error = "not a version"
            .parse::<VersionConstraint>()
            .expect_err("invalid");
        assert!(matches!(error, ExtensionError::InvalidConstraint { .. }));
    }

    #[test]
    fn package_display_names_source() {
        let package = Package::new(
            "csharp",
            Version::new(3, 0, 0),
            "local",
            PathBuf::from("/registry/csharp/3.0.0"),
        );
        assert_eq!(package.to_string(), "csharp@3.0.0 (local)");
    }
}
