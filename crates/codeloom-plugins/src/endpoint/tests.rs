//! Host endpoint tests driven by in-process plugins over an in-memory pipe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use codeloom_datastore::{DataSource, DataStore, DataStoreError, HandleSource, IdentityPolicy};
use codeloom_message::Channel;
use rstest::{fixture, rstest};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::*;
use crate::jsonrpc::JsonRpcMessage;
use crate::sdk::{OutputFile, Plugin, PluginContext, PluginServer};
use crate::transport::{FrameReader, FrameWriter};
use crate::PluginSdkError;

struct Shouter;

#[async_trait]
impl Plugin for Shouter {
    async fn process(&self, context: PluginContext) -> Result<bool, PluginSdkError> {
        let suffix: String = context.get_typed("suffix").await?.unwrap_or_default();
        for uri in context.list_inputs().await? {
            let input = context.read_file(&uri).await?;
            let loud = input.text().unwrap_or_default().to_uppercase();
            context
                .write_output(
                    OutputFile::new(format!("{}.out", input.description()), format!("{loud}{suffix}"))
                        .with_source_uri(uri.clone()),
                )
                .await?;
        }
        context.message(Channel::Information, "shouted").await?;
        Ok(true)
    }
}

struct Validator;

#[async_trait]
impl Plugin for Validator {
    async fn process(&self, context: PluginContext) -> Result<bool, PluginSdkError> {
        for path in ["paths./pets.get", "paths./pets.post", "paths./owners.get"] {
            context
                .send_message(
                    &Message::new(Channel::Error, "missing operationId")
                        .with_keys(vec![path.to_owned()]),
                )
                .await?;
        }
        Ok(false)
    }
}

struct MissingReader;

#[async_trait]
impl Plugin for MissingReader {
    async fn process(&self, context: PluginContext) -> Result<bool, PluginSdkError> {
        let error = context
            .read_file("missing://nowhere")
            .await
            .expect_err("nothing resolves missing://");
        context
            .message(Channel::Warning, format!("code {}", error.code().unwrap_or_default()))
            .await?;
        Ok(true)
    }
}

struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct Chatty {
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl Plugin for Chatty {
    async fn process(&self, context: PluginContext) -> Result<bool, PluginSdkError> {
        let _guard = SetOnDrop(Arc::clone(&self.stopped));
        for chunk in 0_u32..10_000 {
            context.write_file(&format!("chunk-{chunk}.txt"), "x").await?;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(true)
    }
}

/// A scope whose reads never finish in time.
struct StalledScope {
    started: Arc<Notify>,
}

#[async_trait]
impl InputScope for StalledScope {
    async fn enumerate(&self) -> Result<Vec<String>, DataStoreError> {
        Ok(vec![String::from("secret.txt")])
    }

    async fn read(&self, _uri: &str) -> Result<DataHandle, DataStoreError> {
        self.started.notify_one();
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(DataStoreError::Cancelled)
    }
}

#[derive(Clone, Default)]
struct Recorded {
    files: Arc<Mutex<Vec<DataHandle>>>,
    messages: Arc<Mutex<Vec<Message>>>,
}

impl Recorded {
    fn files(&self) -> Vec<DataHandle> {
        self.files.lock().expect("files lock").clone()
    }

    fn messages(&self) -> Vec<Message> {
        self.messages.lock().expect("messages lock").clone()
    }
}

#[fixture]
fn store() -> DataStore {
    DataStore::new(CancellationToken::new())
}

fn config() -> Arc<dyn ConfigProvider> {
    let mut config = MockConfigProvider::new();
    config
        .expect_get()
        .returning(|key| (key == "suffix").then(|| json!("!")));
    Arc::new(config)
}

fn invocation(store: &DataStore, plugin: &str) -> (ProcessInvocation, Recorded) {
    let inputs = store.sink("inputs", IdentityPolicy::Keyed);
    inputs
        .write("pets.yaml", "openapi: 3.0.0", "pets")
        .expect("seed input");
    let source: Arc<dyn DataSource> = Arc::new(HandleSource::new(inputs.handles()));
    let scope = store.read_through_scope(vec![source]);

    let recorded = Recorded::default();
    let files = Arc::clone(&recorded.files);
    let messages = Arc::clone(&recorded.messages);
    let invocation = ProcessInvocation::new(
        plugin,
        config(),
        Arc::new(scope),
        store.sink(plugin, IdentityPolicy::Keyed),
    )
    .with_on_file(move |handle| files.lock().expect("files lock").push(handle))
    .with_on_message(move |message| messages.lock().expect("messages lock").push(message));
    (invocation, recorded)
}

fn serve(server: PluginServer) -> (PluginEndpoint, JoinHandle<()>) {
    let (host, plugin) = tokio::io::duplex(64 * 1024);
    let (host_read, host_write) = tokio::io::split(host);
    let (plugin_read, plugin_write) = tokio::io::split(plugin);
    let task = tokio::spawn(server.serve(plugin_read, plugin_write));
    (
        PluginEndpoint::from_streams("test-plugins", host_read, host_write),
        task,
    )
}

struct RawPlugin {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter<WriteHalf<DuplexStream>>,
}

impl RawPlugin {
    async fn next(&mut self) -> JsonRpcMessage {
        let frame = self.reader.read_frame().await.expect("read").expect("frame");
        JsonRpcMessage::from_bytes(&frame).expect("decode")
    }

    async fn send(&mut self, message: &JsonRpcMessage) {
        let body = message.to_bytes().expect("encode");
        self.writer.write_frame(&body).await.expect("write");
    }

    async fn expect_process(&mut self) -> (i64, String) {
        match self.next().await {
            JsonRpcMessage::Request { id, method, params } if method == PROCESS => {
                let session = params["sessionId"].as_str().expect("session id").to_owned();
                (id, session)
            }
            other => panic!("expected Process, got {other:?}"),
        }
    }
}

fn raw_endpoint() -> (PluginEndpoint, RawPlugin) {
    let (host, plugin) = tokio::io::duplex(64 * 1024);
    let (host_read, host_write) = tokio::io::split(host);
    let (plugin_read, plugin_write) = tokio::io::split(plugin);
    (
        PluginEndpoint::from_streams("raw", host_read, host_write),
        RawPlugin {
            reader: FrameReader::new(plugin_read),
            writer: FrameWriter::new(plugin_write),
        },
    )
}

#[rstest]
#[tokio::test]
async fn plugin_names_are_stable_across_calls() {
    let server = PluginServer::new()
        .register("shouter", Shouter)
        .register("validator", Validator);
    let (endpoint, _task) = serve(server);
    let token = CancellationToken::new();

    let first = endpoint.get_plugin_names(&token).await.expect("names");
    let second = endpoint.get_plugin_names(&token).await.expect("names again");

    assert_eq!(first, vec!["shouter", "validator"]);
    assert_eq!(first, second);
}

#[rstest]
#[tokio::test]
async fn process_delivers_outputs_and_messages_before_the_result(store: DataStore) {
    let (endpoint, _task) = serve(PluginServer::new().register("shouter", Shouter));
    let (invocation, recorded) = invocation(&store, "shouter");

    let success = endpoint
        .process(invocation, &CancellationToken::new())
        .await
        .expect("process");

    assert!(success);
    let files = recorded.files();
    let file = files.first().expect("one output");
    assert_eq!(files.len(), 1);
    assert_eq!(file.text(), Some("OPENAPI: 3.0.0!"));
    assert_eq!(file.description(), "pets.out");
    assert!(file.uri().ends_with("/shouter/pets.out"));
    assert!(file.source_uri().is_some_and(|uri| uri.ends_with("/inputs/pets.yaml")));

    let messages = recorded.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages.iter().all(|message| message.plugin() == Some("shouter")));
}

#[rstest]
#[tokio::test]
async fn failure_messages_do_not_change_the_result(store: DataStore) {
    let (endpoint, _task) = serve(PluginServer::new().register("validator", Validator));
    let (invocation, recorded) = invocation(&store, "validator");

    let success = endpoint
        .process(invocation, &CancellationToken::new())
        .await
        .expect("process");

    assert!(!success);
    let messages = recorded.messages();
    assert_eq!(messages.len(), 3);
    assert!(messages.iter().all(|message| message.channel() == Channel::Error));
    assert_eq!(
        messages.first().map(Message::keys),
        Some(["paths./pets.get".to_owned()].as_slice())
    );
}

#[rstest]
#[tokio::test]
async fn read_failures_are_reported_to_the_plugin_only(store: DataStore) {
    let (endpoint, _task) = serve(PluginServer::new().register("reader", MissingReader));
    let (invocation, recorded) = invocation(&store, "reader");

    let success = endpoint
        .process(invocation, &CancellationToken::new())
        .await
        .expect("process");

    assert!(success);
    let texts: Vec<String> = recorded
        .messages()
        .iter()
        .map(|message| message.text().to_owned())
        .collect();
    assert_eq!(texts, vec![format!("code {SOURCE_UNAVAILABLE}")]);
}

#[rstest]
#[tokio::test]
async fn cancellation_stops_callbacks_and_the_plugin(store: DataStore) {
    let stopped = Arc::new(AtomicBool::new(false));
    let server = PluginServer::new().register(
        "chatty",
        Chatty {
            stopped: Arc::clone(&stopped),
        },
    );
    let (endpoint, _task) = serve(server);
    let token = CancellationToken::new();
    let trigger = token.clone();
    let (base, recorded) = invocation(&store, "chatty");
    let files = Arc::clone(&recorded.files);
    let chatty = base.with_on_file(move |handle| {
        files.lock().expect("files lock").push(handle);
        trigger.cancel();
    });

    let error = tokio::time::timeout(Duration::from_secs(5), endpoint.process(chatty, &token))
        .await
        .expect("cancelled promptly")
        .expect_err("cancelled");
    assert!(error.is_cancelled());

    let settled = recorded.files().len();
    assert!(settled >= 1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorded.files().len(), settled);

    for _ in 0..100 {
        if stopped.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(stopped.load(Ordering::SeqCst), "plugin saw the cancellation");
    assert!(endpoint.is_alive());
}

#[rstest]
#[tokio::test]
async fn unknown_plugin_is_a_remote_error(store: DataStore) {
    let (endpoint, _task) = serve(PluginServer::new().register("shouter", Shouter));
    let (invocation, _recorded) = invocation(&store, "nobody");

    let error = endpoint
        .process(invocation, &CancellationToken::new())
        .await
        .expect_err("unknown plugin");

    assert!(matches!(error, EndpointError::RemoteError { code: INVALID_PARAMS, .. }));
}

#[rstest]
#[tokio::test]
async fn cancellation_answers_in_flight_reads_as_cancelled(store: DataStore) {
    let (endpoint, mut plugin) = raw_endpoint();
    let started = Arc::new(Notify::new());
    let invocation = ProcessInvocation::new(
        "raw",
        config(),
        Arc::new(StalledScope {
            started: Arc::clone(&started),
        }),
        store.sink("raw", IdentityPolicy::Keyed),
    );
    let token = CancellationToken::new();
    let caller = token.clone();

    let host = tokio::spawn(async move { endpoint.process(invocation, &caller).await });
    let (_process_id, session) = plugin.expect_process().await;
    plugin
        .send(&JsonRpcMessage::Request {
            id: 7,
            method: READ_FILE.to_owned(),
            params: json!({"sessionId": session, "uri": "secret.txt"}),
        })
        .await;
    started.notified().await;
    token.cancel();

    let outcome = host.await.expect("join");
    assert!(matches!(outcome, Err(EndpointError::Cancelled)));
    let reply = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let JsonRpcMessage::Response { id: 7, reply } = plugin.next().await {
                break reply;
            }
        }
    })
    .await
    .expect("read answered promptly");
    let error = reply.expect_err("read was cancelled");
    assert_eq!(error.code(), REQUEST_CANCELLED);
}

#[rstest]
#[tokio::test]
async fn stale_sessions_are_rejected(store: DataStore) {
    let (endpoint, mut plugin) = raw_endpoint();
    let (invocation, recorded) = invocation(&store, "raw");

    let host = tokio::spawn(async move {
        endpoint
            .process(invocation, &CancellationToken::new())
            .await
    });
    let (process_id, _session) = plugin.expect_process().await;
    plugin
        .send(&JsonRpcMessage::Request {
            id: 1,
            method: WRITE_FILE.to_owned(),
            params: json!({"sessionId": "not-a-session", "filename": "a", "content": "b"}),
        })
        .await;
    let reply = plugin.next().await;
    plugin
        .send(&JsonRpcMessage::Response {
            id: process_id,
            reply: Ok(json!(true)),
        })
        .await;

    assert!(matches!(
        reply,
        JsonRpcMessage::Response { id: 1, reply: Err(ref error) } if error.code() == REQUEST_CANCELLED
    ));
    assert!(host.await.expect("join").expect("process"));
    assert!(recorded.files().is_empty());
}

#[rstest]
#[tokio::test]
async fn source_maps_are_stored_beside_their_artifact(store: DataStore) {
    let (endpoint, mut plugin) = raw_endpoint();
    let (invocation, recorded) = invocation(&store, "raw");
    let output = store.clone();

    let host = tokio::spawn(async move {
        endpoint
            .process(invocation, &CancellationToken::new())
            .await
    });
    let (process_id, session) = plugin.expect_process().await;
    plugin
        .send(&JsonRpcMessage::Request {
            id: 1,
            method: WRITE_FILE.to_owned(),
            params: json!({
                "sessionId": session,
                "filename": "Pet.cs",
                "content": "AAEC",
                "encoding": "base64",
                "sourceMap": {"Pet.cs": ["pets.yaml#/components/schemas/Pet"]},
            }),
        })
        .await;
    plugin.next().await;
    plugin
        .send(&JsonRpcMessage::Response {
            id: process_id,
            reply: Ok(json!(true)),
        })
        .await;
    host.await.expect("join").expect("process");

    let files = recorded.files();
    let file = files.first().expect("artifact");
    assert_eq!(files.len(), 1);
    assert_eq!(file.content().as_ref(), &[0_u8, 1, 2]);
    let map = output
        .handles()
        .into_iter()
        .find(|handle| handle.uri().ends_with("/raw/Pet.cs.map"))
        .expect("source map stored");
    assert_eq!(map.media_kind(), Some("application/json"));
    assert_eq!(map.source_uri(), Some(file.uri()));
}

#[rstest]
#[tokio::test]
async fn non_boolean_result_is_a_protocol_error(store: DataStore) {
    let (endpoint, mut plugin) = raw_endpoint();
    let (invocation, _recorded) = invocation(&store, "raw");

    let host = tokio::spawn(async move {
        endpoint
            .process(invocation, &CancellationToken::new())
            .await
    });
    let (process_id, _session) = plugin.expect_process().await;
    plugin
        .send(&JsonRpcMessage::Response {
            id: process_id,
            reply: Ok(json!("yes")),
        })
        .await;

    let error = host.await.expect("join").expect_err("not a boolean");
    assert!(matches!(error, EndpointError::Protocol { .. }));
}

#[rstest]
#[tokio::test]
async fn malformed_frame_is_a_protocol_error(store: DataStore) {
    let (endpoint, mut plugin) = raw_endpoint();
    let (invocation, _recorded) = invocation(&store, "raw");

    let host = tokio::spawn(async move {
        endpoint
            .process(invocation, &CancellationToken::new())
            .await
    });
    plugin.expect_process().await;
    plugin.writer.write_frame(b"][").await.expect("write");

    let error = host.await.expect("join").expect_err("malformed");
    assert!(matches!(error, EndpointError::Protocol { .. }));
}

#[rstest]
#[tokio::test]
async fn crash_mid_call_fails_without_hanging(store: DataStore) {
    let (raw, mut plugin) = raw_endpoint();
    let (invocation, _recorded) = invocation(&store, "raw");
    let endpoint = Arc::new(raw);
    let caller = Arc::clone(&endpoint);

    let host = tokio::spawn(async move {
        caller
            .process(invocation, &CancellationToken::new())
            .await
    });
    plugin.expect_process().await;
    drop(plugin);

    let error = tokio::time::timeout(Duration::from_secs(5), host)
        .await
        .expect("no hang")
        .expect("join")
        .expect_err("crash");
    assert!(matches!(error, EndpointError::ProcessCrashed { .. }));
    assert!(!endpoint.is_alive());
}

#[rstest]
#[tokio::test]
async fn shutdown_stops_the_plugin_server() {
    let (endpoint, task) = serve(PluginServer::new().register("shouter", Shouter));

    endpoint.shutdown().await;

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("server stopped")
        .expect("join");
}
