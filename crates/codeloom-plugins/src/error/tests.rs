//! Unit tests for protocol error types.

use rstest::rstest;

use super::*;

#[rstest]
#[case::protocol(EndpointError::protocol("modeler", "bad frame"), &["modeler", "bad frame"])]
#[case::crashed(EndpointError::crashed("modeler", "stream closed"), &["modeler", "exited"])]
#[case::remote(
    EndpointError::RemoteError { plugin: "gen".into(), code: -32601, message: "nope".into() },
    &["gen", "-32601", "nope"]
)]
fn endpoint_messages_name_the_plugin(#[case] error: EndpointError, #[case] fragments: &[&str]) {
    let message = error.to_string();
    for fragment in fragments {
        assert!(message.contains(fragment), "expected '{fragment}' in: {message}");
    }
}

#[test]
fn remote_copies_code_and_message() {
    let error = EndpointError::remote("gen", JsonRpcError::new(-32002, "disk on fire"));

    assert!(matches!(
        error,
        EndpointError::RemoteError { code: -32002, ref message, .. } if message == "disk on fire"
    ));
}

#[test]
fn codec_errors_convert() {
    let json_error = serde_json::from_str::<bool>("maybe").expect_err("not a bool");
    let error = EndpointError::from(json_error);

    assert!(matches!(error, EndpointError::Codec(_)));
    assert!(!error.is_cancelled());
}

#[test]
fn sdk_host_error_exposes_code() {
    let error = PluginSdkError::Host {
        method: "ReadFile".into(),
        code: -32001,
        message: "unavailable".into(),
    };

    assert_eq!(error.code(), Some(-32001));
    assert_eq!(PluginSdkError::Cancelled.code(), None);
    assert!(error.to_string().contains("ReadFile"));
}
