//! Unit tests for the directory registry.

use std::fs;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

fn publish(root: &Path, name: &str, version: &str) {
    let dir = root.join(name).join(version);
    fs::create_dir_all(&dir).expect("create version dir");
    let manifest = format!(r#"{{"name":"{name}","version":"{version}","command":"run"}}"#);
    fs::write(dir.join(MANIFEST_FILE), manifest).expect("write manifest");
}

#[fixture]
fn registry_dir() -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    publish(dir.path(), "csharp", "1.0.0");
    publish(dir.path(), "csharp", "2.3.1");
    fs::create_dir_all(dir.path().join("csharp").join("nightly")).expect("stray dir");
    fs::create_dir_all(dir.path().join("csharp").join("3.0.0")).expect("empty version");
    dir
}

#[rstest]
#[tokio::test]
async fn lists_versions_with_manifests(registry_dir: TempDir) {
    let registry = DirectoryRegistry::new(registry_dir.path());

    let mut versions: Vec<String> = registry
        .candidates("csharp")
        .await
        .expect("list")
        .iter()
        .map(|candidate| candidate.version().to_string())
        .collect();
    versions.sort();

    assert_eq!(versions, vec!["1.0.0", "2.3.1"]);
}

#[rstest]
#[tokio::test]
async fn unknown_package_lists_nothing(registry_dir: TempDir) {
    let registry = DirectoryRegistry::new(registry_dir.path());

    let candidates = registry.candidates("python").await.expect("list");

    assert!(candidates.is_empty());
}

#[rstest]
#[tokio::test]
async fn candidate_location_points_at_version_dir(registry_dir: TempDir) {
    let registry = DirectoryRegistry::new(registry_dir.path());

    let candidates = registry.candidates("csharp").await.expect("list");

    assert!(candidates.iter().all(|candidate| {
        candidate
            .location()
            .join(MANIFEST_FILE)
            .is_file()
    }));
}
