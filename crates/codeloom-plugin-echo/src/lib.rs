//! Reference plugins served by the `codeloom-plugin-echo` executable.
//!
//! The executable hosts four small plugins that exercise the whole protocol
//! surface:
//!
//! - `echo` copies every input to an output of the same name;
//! - `validator` reports a fixed set of findings per input and succeeds;
//! - `generator` emits C# sources derived from each input's file name;
//! - `crash` exits the process in the middle of an invocation.

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use codeloom_message::{Channel, Message};
use codeloom_plugins::{OutputFile, Plugin, PluginContext, PluginSdkError, PluginServer};
use serde_json::json;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const ECHO_TARGET: &str = "codeloom_plugin_echo";

/// Environment variable holding the plugin's log filter.
pub const LOG_FILTER_ENV: &str = "CODELOOM_PLUGIN_LOG";

/// Namespace used by `generator` when none is configured.
pub const DEFAULT_NAMESPACE: &str = "Codeloom.Generated";

/// Exit status of the `crash` plugin.
pub const CRASH_STATUS: i32 = 70;

/// Findings reported by `validator` for every input, as `(rule, text)`.
pub const VALIDATION_RULES: [(&str, &str); 3] = [
    ("operation-id", "operation is missing an operationId"),
    ("response-schema", "response has no schema"),
    ("tag-description", "tag is missing a description"),
];

/// Builds the server with every reference plugin registered.
#[must_use]
pub fn server() -> PluginServer {
    PluginServer::new()
        .register("echo", Echo)
        .register("validator", Validator)
        .register("generator", Generator)
        .register("crash", Crash)
}

/// Sends logs to stderr; stdout carries the protocol.
pub fn install_logging() {
    let filter =
        EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init()
        .ok();
}

/// Copies each input through unchanged.
struct Echo;

#[async_trait]
impl Plugin for Echo {
    async fn process(&self, context: PluginContext) -> Result<bool, PluginSdkError> {
        let inputs = context.list_inputs().await?;
        for uri in &inputs {
            let input = context.read_file(uri).await?;
            let mut output = OutputFile::new(file_name(uri), input.content().clone())
                .with_source_uri(uri.as_str());
            if let Some(kind) = input.media_kind() {
                output = output.with_media_kind(kind);
            }
            context.write_output(output).await?;
        }
        context
            .message(
                Channel::Information,
                format!("echoed {} input(s)", inputs.len()),
            )
            .await?;
        Ok(true)
    }
}

/// Reports every rule against every input without failing the invocation.
struct Validator;

#[async_trait]
impl Plugin for Validator {
    async fn process(&self, context: PluginContext) -> Result<bool, PluginSdkError> {
        for uri in context.list_inputs().await? {
            let input = context.read_file(&uri).await?;
            debug!(
                target: ECHO_TARGET,
                uri = %uri,
                bytes = input.content().len(),
                "validating input"
            );
            for (rule, text) in VALIDATION_RULES {
                let finding = Message::new(Channel::Error, text)
                    .with_details(json!({ "rule": rule }))
                    .with_keys(vec![uri.clone()]);
                context.send_message(&finding).await?;
            }
        }
        Ok(true)
    }
}

/// Emits a client class and a model class per input.
struct Generator;

#[async_trait]
impl Plugin for Generator {
    async fn process(&self, context: PluginContext) -> Result<bool, PluginSdkError> {
        let namespace = context
            .get_typed::<String>("namespace")
            .await?
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_owned());
        let inputs = context.list_inputs().await?;
        if inputs.is_empty() {
            context
                .message(Channel::Warning, "no inputs to generate from")
                .await?;
            return Ok(false);
        }

        for uri in &inputs {
            let input = context.read_file(uri).await?;
            let type_name = pascal_case(stem(input.description()));
            let client = format!("{type_name}Client");
            context
                .write_output(
                    OutputFile::new(format!("{client}.cs"), class_source(&namespace, &client, uri))
                        .with_source_uri(uri.as_str())
                        .with_media_kind("text/x-csharp"),
                )
                .await?;

            let model = format!("{type_name}Model");
            context
                .write_output(
                    OutputFile::new(
                        format!("Models/{model}.cs"),
                        class_source(&format!("{namespace}.Models"), &model, uri),
                    )
                    .with_source_uri(uri.as_str())
                    .with_media_kind("text/x-csharp")
                    .with_source_map(json!({ "version": 3, "sources": [uri] })),
                )
                .await?;
        }
        Ok(true)
    }
}

/// Announces itself, then takes the whole process down.
struct Crash;

#[async_trait]
impl Plugin for Crash {
    async fn process(&self, context: PluginContext) -> Result<bool, PluginSdkError> {
        context
            .message(Channel::Information, "about to exit")
            .await?;
        std::process::exit(CRASH_STATUS);
    }
}

fn class_source(namespace: &str, class: &str, origin: &str) -> String {
    format!("// Generated from {origin}\nnamespace {namespace};\n\npublic sealed class {class}\n{{\n}}\n")
}

/// Last path segment of a URI or path.
fn file_name(uri: &str) -> &str {
    uri.rsplit(['/', '\\']).next().unwrap_or(uri)
}

/// File name without its final extension.
fn stem(name: &str) -> &str {
    let base = file_name(name);
    match base.rsplit_once('.') {
        Some((head, _)) if !head.is_empty() => head,
        _ => base,
    }
}

/// `pet-store_v2` becomes `PetStoreV2`. Falls back to `Api` when nothing
/// alphanumeric remains.
fn pascal_case(raw: &str) -> String {
    let joined: String = raw
        .split(|character: char| !character.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut characters = word.chars();
            characters.next().map_or_else(String::new, |first| {
                first.to_ascii_uppercase().to_string() + characters.as_str()
            })
        })
        .collect();
    if joined.is_empty() {
        String::from("Api")
    } else {
        joined
    }
}
