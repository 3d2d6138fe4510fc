//! Unit tests for the data store and sinks.

use std::collections::HashSet;
use std::thread;

use rstest::{fixture, rstest};

use super::*;

#[fixture]
fn store() -> DataStore {
    DataStore::new(CancellationToken::new())
}

#[rstest]
fn new_store_is_empty(store: DataStore) {
    assert!(store.is_empty());
    assert!(store.handles().is_empty());
}

#[rstest]
fn write_round_trips_content(store: DataStore) {
    let sink = store.sink("generator", IdentityPolicy::Keyed);

    let handle = sink
        .write("Models/Pet.cs", "class Pet {}", "Models/Pet.cs")
        .expect("write");

    assert_eq!(handle.text(), Some("class Pet {}"));
    assert_eq!(handle.description(), "Models/Pet.cs");
    assert_eq!(
        handle.uri(),
        format!("mem://{}/generator/Models/Pet.cs", store.run_id())
    );
    assert_eq!(store.latest(handle.uri()), Some(handle));
}

#[rstest]
fn colliding_keys_create_new_revisions(store: DataStore) {
    let sink = store.sink("out", IdentityPolicy::Keyed);

    let first = sink.write("a.txt", "one", "a.txt").expect("first write");
    let second = sink.write("a.txt", "two", "a.txt").expect("second write");

    assert_eq!(first.uri(), second.uri());
    assert_ne!(first, second);
    assert_eq!(first.id().revision(), 1);
    assert_eq!(second.id().revision(), 2);
    assert_eq!(first.text(), Some("one"), "earlier revision is untouched");
    assert_eq!(store.latest(first.uri()).expect("latest").text(), Some("two"));
}

#[rstest]
fn sequential_policy_ignores_keys_for_identity(store: DataStore) {
    let sink = store.sink("out", IdentityPolicy::Sequential);

    let first = sink.write("same", "x", "same").expect("first");
    let second = sink.write("same", "y", "same").expect("second");

    assert_ne!(first.uri(), second.uri());
    assert!(first.uri().ends_with("/out/0"));
    assert!(second.uri().ends_with("/out/1"));
    assert_eq!(second.description(), "same");
}

#[rstest]
fn artifact_metadata_is_preserved(store: DataStore) {
    let sink = store.sink("out", IdentityPolicy::Keyed);

    let handle = sink
        .write_artifact(
            Artifact::new("model.yaml", "kind: model")
                .with_source_uri("file:///spec.json")
                .with_media_kind("application/yaml"),
        )
        .expect("write");

    assert_eq!(handle.description(), "model.yaml", "key is default description");
    assert_eq!(handle.source_uri(), Some("file:///spec.json"));
    assert_eq!(handle.media_kind(), Some("application/yaml"));
}

#[rstest]
fn sink_tracks_only_its_own_writes(store: DataStore) {
    let left = store.sink("left", IdentityPolicy::Keyed);
    let right = store.sink("right", IdentityPolicy::Keyed);

    left.write("a", "1", "a").expect("left write");
    right.write("b", "2", "b").expect("right write");
    left.write("c", "3", "c").expect("left write");

    let names: Vec<String> = left
        .handles()
        .iter()
        .map(|h| h.description().to_owned())
        .collect();
    assert_eq!(names, vec!["a", "c"]);
    assert_eq!(store.len(), 3);
}

#[rstest]
fn write_fails_after_cancellation() {
    let token = CancellationToken::new();
    let store = DataStore::new(token.clone());
    let sink = store.sink("out", IdentityPolicy::Keyed);

    token.cancel();
    let error = sink.write("a", "1", "a").expect_err("cancelled store rejects writes");

    assert!(error.is_cancelled());
    assert!(store.is_empty());
}

#[rstest]
fn concurrent_writers_never_share_identity(store: DataStore) {
    let sink = store.sink("out", IdentityPolicy::Keyed);
    let writers: Vec<_> = (0..8)
        .map(|_| {
            let sink = sink.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    sink.write("shared.txt", "payload", "shared.txt")
                        .expect("write");
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().expect("writer thread");
    }

    let ids: HashSet<HandleId> = store.handles().iter().map(|h| h.id().clone()).collect();
    assert_eq!(ids.len(), 200);
    let first = sink.handles().into_iter().next().expect("at least one write");
    let latest = store.latest(first.uri()).expect("latest");
    assert_eq!(latest.id().revision(), 200);
}
