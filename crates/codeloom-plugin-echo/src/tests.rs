//! Unit tests for the reference plugin helpers.

use rstest::rstest;

use super::*;

#[rstest]
#[case("file:///srv/specs/petstore.yaml", "petstore.yaml")]
#[case("C:\\specs\\petstore.yaml", "petstore.yaml")]
#[case("Client.cs", "Client.cs")]
fn file_name_takes_the_last_segment(#[case] uri: &str, #[case] expected: &str) {
    assert_eq!(file_name(uri), expected);
}

#[rstest]
#[case("petstore.yaml", "petstore")]
#[case("archive.tar.gz", "archive.tar")]
#[case(".hidden", ".hidden")]
#[case("Makefile", "Makefile")]
fn stem_drops_the_final_extension(#[case] name: &str, #[case] expected: &str) {
    assert_eq!(stem(name), expected);
}

#[rstest]
#[case("petstore", "Petstore")]
#[case("pet-store_v2", "PetStoreV2")]
#[case(".hidden", "Hidden")]
#[case("---", "Api")]
fn pascal_case_joins_words(#[case] raw: &str, #[case] expected: &str) {
    assert_eq!(pascal_case(raw), expected);
}

#[rstest]
fn server_registers_every_plugin_in_order() {
    assert_eq!(
        server().names(),
        vec!["echo", "validator", "generator", "crash"]
    );
}

#[rstest]
fn generated_classes_name_their_origin() {
    let source = class_source("Pets", "PetstoreClient", "file:///petstore.yaml");

    assert!(source.starts_with("// Generated from file:///petstore.yaml\n"));
    assert!(source.contains("namespace Pets;"));
    assert!(source.contains("public sealed class PetstoreClient"));
}
