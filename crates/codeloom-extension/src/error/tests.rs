//! Unit tests for extension error types.

use std::io;

use rstest::rstest;

use super::*;

#[rstest]
#[case::not_found(
    ExtensionError::PackageNotFound {
        name: "csharp".into(),
        constraint: "^3".into(),
        registry: "local".into(),
    },
    &["csharp", "^3", "local"]
)]
#[case::unknown_source(
    ExtensionError::UnknownSource { registry: "npm".into() },
    &["npm"]
)]
#[case::spawn(
    ExtensionError::SpawnError {
        name: "modeler".into(),
        message: "permission denied".into(),
        source: None,
    },
    &["modeler", "permission denied"]
)]
#[case::manifest(
    ExtensionError::Manifest {
        path: PathBuf::from("/cache/x/1.0.0/codeloom-extension.json"),
        message: "command must not be empty".into(),
    },
    &["codeloom-extension.json", "command must not be empty"]
)]
fn message_names_the_subject(#[case] error: ExtensionError, #[case] fragments: &[&str]) {
    let message = error.to_string();
    for fragment in fragments {
        assert!(
            message.contains(fragment),
            "expected '{fragment}' in message: {message}"
        );
    }
}

#[test]
fn install_helper_keeps_io_source() {
    let version = semver::Version::new(1, 2, 3);
    let error = ExtensionError::install(
        "generator",
        &version,
        "copy failed",
        io::Error::new(io::ErrorKind::StorageFull, "disk full"),
    );

    assert!(error.to_string().contains("generator@1.2.3"));
    assert!(std::error::Error::source(&error).is_some());
}
