//! Unit tests for request routing over a connection.

use std::sync::Mutex;
use std::time::Duration;

use rstest::rstest;
use serde_json::json;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

use super::*;
use crate::jsonrpc::{JsonRpcError, METHOD_NOT_FOUND};

#[derive(Default)]
struct RecordingHandler {
    notifications: Mutex<Vec<String>>,
}

impl RequestHandler for RecordingHandler {
    fn handle_request(
        &self,
        _connection: &RpcConnection,
        _id: i64,
        method: &str,
        params: Value,
    ) -> Dispatch {
        match method {
            "echo" => Dispatch::Inline(Ok(params)),
            "sleep" => Dispatch::Spawn(Box::pin(async move {
                let millis = params.as_u64().unwrap_or_default();
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(params)
            })),
            other => Dispatch::Inline(Err(JsonRpcError::new(
                METHOD_NOT_FOUND,
                format!("unknown method {other}"),
            ))),
        }
    }

    fn handle_notification(&self, _connection: &RpcConnection, method: &str, _params: Value) {
        self.notifications
            .lock()
            .expect("notifications lock")
            .push(method.to_owned());
    }
}

fn connected_pair(handler: Arc<RecordingHandler>) -> (RpcConnection, RpcConnection) {
    let (left, right) = tokio::io::duplex(4096);
    let (left_read, left_write) = tokio::io::split(left);
    let (right_read, right_write) = tokio::io::split(right);
    let client = RpcConnection::start(
        "server",
        left_read,
        left_write,
        Arc::new(RecordingHandler::default()),
    );
    let server = RpcConnection::start("client", right_read, right_write, handler);
    (client, server)
}

type RawPeer = (
    FrameReader<ReadHalf<DuplexStream>>,
    FrameWriter<WriteHalf<DuplexStream>>,
);

fn connection_to_raw_peer() -> (RpcConnection, RawPeer) {
    let (left, right) = tokio::io::duplex(4096);
    let (left_read, left_write) = tokio::io::split(left);
    let (right_read, right_write) = tokio::io::split(right);
    let connection = RpcConnection::start(
        "raw",
        left_read,
        left_write,
        Arc::new(RecordingHandler::default()),
    );
    (
        connection,
        (FrameReader::new(right_read), FrameWriter::new(right_write)),
    )
}

async fn next_request_id(reader: &mut FrameReader<ReadHalf<DuplexStream>>) -> i64 {
    let frame = reader.read_frame().await.expect("read").expect("frame");
    match JsonRpcMessage::from_bytes(&frame).expect("decode") {
        JsonRpcMessage::Request { id, .. } => id,
        other => panic!("expected a request, got {other:?}"),
    }
}

async fn reply(writer: &mut FrameWriter<WriteHalf<DuplexStream>>, id: i64, result: Value) {
    let body = JsonRpcMessage::Response {
        id,
        reply: Ok(result),
    }
    .to_bytes()
    .expect("encode");
    writer.write_frame(&body).await.expect("write");
}

#[rstest]
#[tokio::test]
async fn calls_receive_their_replies() {
    let (client, _server) = connected_pair(Arc::new(RecordingHandler::default()));

    let value = client
        .call("echo", json!({"greeting": "hello"}))
        .await
        .expect("echo");

    assert_eq!(value, json!({"greeting": "hello"}));
}

#[rstest]
#[tokio::test]
async fn spawned_replies_may_overtake_slow_ones() {
    let (client, _server) = connected_pair(Arc::new(RecordingHandler::default()));

    let slow = client.start_call("sleep", json!(200)).expect("slow call");
    let fast = client.call("sleep", json!(1)).await.expect("fast call");

    assert_eq!(fast, json!(1));
    assert_eq!(slow.wait().await.expect("slow reply"), json!(200));
}

#[rstest]
#[tokio::test]
async fn error_replies_become_remote_errors() {
    let (client, _server) = connected_pair(Arc::new(RecordingHandler::default()));

    let error = client
        .call("missing", Value::Null)
        .await
        .expect_err("unknown method");

    assert!(matches!(
        error,
        EndpointError::RemoteError { code: METHOD_NOT_FOUND, .. }
    ));
}

#[rstest]
#[tokio::test]
async fn notifications_are_ordered_before_later_requests() {
    let handler = Arc::new(RecordingHandler::default());
    let (client, _server) = connected_pair(Arc::clone(&handler));

    client.notify("first", Value::Null).expect("notify");
    client.notify("second", Value::Null).expect("notify");
    client.call("echo", Value::Null).await.expect("echo");

    let seen = handler.notifications.lock().expect("lock").clone();
    assert_eq!(seen, vec!["first", "second"]);
}

#[rstest]
#[tokio::test]
async fn malformed_frame_fails_pending_calls_but_keeps_the_connection() {
    let (connection, (mut reader, mut writer)) = connection_to_raw_peer();

    let call = connection.start_call("echo", Value::Null).expect("call");
    next_request_id(&mut reader).await;
    writer.write_frame(b"{not json").await.expect("write");

    let error = call.wait().await.expect_err("protocol error");
    assert!(matches!(error, EndpointError::Protocol { .. }));

    let retry = connection.start_call("echo", Value::Null).expect("retry");
    let id = next_request_id(&mut reader).await;
    reply(&mut writer, id, json!("ok")).await;
    assert_eq!(retry.wait().await.expect("reply"), json!("ok"));
}

#[rstest]
#[tokio::test]
async fn late_reply_to_a_failed_call_does_not_fail_the_next_one() {
    let (connection, (mut reader, mut writer)) = connection_to_raw_peer();

    let failed = connection.start_call("echo", Value::Null).expect("call");
    let failed_id = next_request_id(&mut reader).await;
    writer.write_frame(b"{not json").await.expect("write");
    let error = failed.wait().await.expect_err("protocol error");
    assert!(matches!(error, EndpointError::Protocol { .. }));

    let next = connection.start_call("echo", Value::Null).expect("call");
    let next_id = next_request_id(&mut reader).await;
    reply(&mut writer, failed_id, json!("late")).await;
    reply(&mut writer, next_id, json!("ok")).await;

    assert_eq!(next.wait().await.expect("reply"), json!("ok"));
    assert!(connection.inner.abandoned.is_empty());
}

#[rstest]
#[tokio::test]
async fn broken_header_block_is_a_protocol_error_and_closes() {
    let (left, right) = tokio::io::duplex(4096);
    let (left_read, left_write) = tokio::io::split(left);
    let (right_read, mut right_write) = tokio::io::split(right);
    let connection = RpcConnection::start(
        "raw",
        left_read,
        left_write,
        Arc::new(RecordingHandler::default()),
    );
    let mut reader = FrameReader::new(right_read);

    let call = connection.start_call("echo", Value::Null).expect("call");
    next_request_id(&mut reader).await;
    right_write
        .write_all(b"Bogus header line\r\n\r\n")
        .await
        .expect("write");

    let error = call.wait().await.expect_err("protocol error");
    assert!(
        matches!(error, EndpointError::Protocol { .. }),
        "unexpected error: {error:?}"
    );
    tokio::time::timeout(Duration::from_secs(5), connection.closed())
        .await
        .expect("closed promptly");
}

#[rstest]
#[tokio::test]
async fn closing_forgets_abandoned_calls() {
    let (connection, (mut reader, writer)) = connection_to_raw_peer();

    let abandoned = connection.start_call("echo", Value::Null).expect("call");
    next_request_id(&mut reader).await;
    drop(abandoned);
    assert_eq!(connection.inner.abandoned.len(), 1);

    drop(reader);
    drop(writer);
    tokio::time::timeout(Duration::from_secs(5), connection.closed())
        .await
        .expect("closed promptly");

    assert!(connection.inner.abandoned.is_empty());
}

#[rstest]
#[tokio::test]
async fn unknown_correlation_id_is_a_protocol_error() {
    let (connection, (mut reader, mut writer)) = connection_to_raw_peer();

    let call = connection.start_call("echo", Value::Null).expect("call");
    let id = next_request_id(&mut reader).await;
    reply(&mut writer, id + 100, Value::Null).await;

    let error = call.wait().await.expect_err("protocol error");
    assert!(matches!(error, EndpointError::Protocol { .. }));
}

#[rstest]
#[tokio::test]
async fn late_replies_to_abandoned_calls_are_discarded() {
    let (connection, (mut reader, mut writer)) = connection_to_raw_peer();

    let abandoned = connection.start_call("echo", Value::Null).expect("call");
    let abandoned_id = next_request_id(&mut reader).await;
    drop(abandoned);
    let kept = connection.start_call("echo", Value::Null).expect("call");
    let kept_id = next_request_id(&mut reader).await;

    reply(&mut writer, abandoned_id, json!("late")).await;
    reply(&mut writer, kept_id, json!("kept")).await;

    assert_eq!(kept.wait().await.expect("reply"), json!("kept"));
}

#[rstest]
#[tokio::test]
async fn end_of_stream_fails_pending_and_later_calls() {
    let (connection, (mut reader, writer)) = connection_to_raw_peer();

    let call = connection.start_call("echo", Value::Null).expect("call");
    next_request_id(&mut reader).await;
    drop(reader);
    drop(writer);

    let error = call.wait().await.expect_err("crash");
    assert!(matches!(error, EndpointError::ProcessCrashed { .. }));

    tokio::time::timeout(Duration::from_secs(5), connection.closed())
        .await
        .expect("closed promptly");
    assert!(connection.is_closed());
    let later = connection
        .start_call("echo", Value::Null)
        .expect_err("closed connection");
    assert!(matches!(later, EndpointError::ProcessCrashed { .. }));
}

#[rstest]
#[tokio::test]
async fn dropping_every_handle_closes_the_stream() {
    let (connection, (mut reader, _writer)) = connection_to_raw_peer();

    drop(connection);

    let end = tokio::time::timeout(Duration::from_secs(5), reader.read_frame())
        .await
        .expect("eof promptly")
        .expect("clean eof");
    assert!(end.is_none());
}
