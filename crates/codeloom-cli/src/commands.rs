//! Execution of the `run` and `plugins` commands.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};

use codeloom_config::Config;
use codeloom_core::{
    JsonConfig, Pipeline, RunOutcome, RunStatus, Stage, persist_artifacts,
};
use codeloom_extension::{DirectoryRegistry, ExtensionManager, VersionConstraint};
use codeloom_message::Message;
use codeloom_plugins::PluginEndpoint;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{ExtensionArgs, RunArgs};
use crate::{AppError, IoStreams};

const COMMANDS_TARGET: &str = "codeloom_cli::commands";

/// Source id under which the `--registry` directory is registered.
const LOCAL_SOURCE: &str = "local";

/// Exit status for a run stopped by a timeout or interrupt.
const CANCELLED_EXIT: u8 = 130;

/// Prints the plugin names offered by an extension, one per line.
pub(crate) async fn list_plugins<W, E>(
    args: &ExtensionArgs,
    config: &Config,
    io: &mut IoStreams<'_, W, E>,
) -> Result<ExitCode, AppError>
where
    W: Write,
    E: Write,
{
    let endpoint = start_endpoint(args, config).await?;
    let token = run_token(config);
    let names = endpoint.get_plugin_names(&token).await;
    endpoint.shutdown().await;
    for name in names? {
        writeln!(io.stdout, "{name}").map_err(AppError::WriteOutput)?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Runs the requested plugins as a pipeline and reports the outcome.
pub(crate) async fn run_pipeline<W, E>(
    args: &RunArgs,
    config: &Config,
    io: &mut IoStreams<'_, W, E>,
) -> Result<ExitCode, AppError>
where
    W: Write,
    E: Write,
{
    let plugin_config = plugin_config(args)?;
    let inputs = args
        .inputs
        .iter()
        .map(|input| input_uri(input))
        .collect::<Result<Vec<_>, _>>()?;
    let endpoint = Arc::new(start_endpoint(&args.extension, config).await?);

    let mut builder = Pipeline::builder().config(Arc::new(plugin_config));
    for input in inputs {
        builder = builder.input(input);
    }
    let mut previous: Option<&str> = None;
    for plugin in &args.plugins {
        let mut stage = Stage::new(plugin.as_str(), plugin.as_str(), Arc::clone(&endpoint));
        if let Some(dependency) = previous.filter(|_| args.chain) {
            stage = stage.after(dependency);
        }
        builder = builder.stage(stage);
        previous = Some(plugin.as_str());
    }
    let pipeline = builder.build()?;

    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    pipeline.messages().subscribe(move |message: &Message| {
        info!(
            target: COMMANDS_TARGET,
            channel = %message.channel(),
            plugin = message.plugin().unwrap_or_default(),
            "{}",
            message.text()
        );
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
    });

    let outcome = pipeline.run(&run_token(config)).await;
    endpoint.shutdown().await;

    let messages = std::mem::take(&mut *log.lock().unwrap_or_else(PoisonError::into_inner));
    report(&outcome, &messages, args.output_dir.as_deref(), io)?;
    Ok(match outcome.status() {
        RunStatus::Succeeded => ExitCode::SUCCESS,
        RunStatus::Failed => ExitCode::FAILURE,
        RunStatus::Cancelled => ExitCode::from(CANCELLED_EXIT),
    })
}

fn report<W, E>(
    outcome: &RunOutcome,
    messages: &[Message],
    output_dir: Option<&camino::Utf8Path>,
    io: &mut IoStreams<'_, W, E>,
) -> Result<(), AppError>
where
    W: Write,
    E: Write,
{
    for message in messages {
        writeln!(io.stderr, "{message}").map_err(AppError::WriteOutput)?;
    }
    for stage in outcome.stages() {
        writeln!(io.stderr, "stage {} ({}): {}", stage.id(), stage.plugin(), stage.status())
            .map_err(AppError::WriteOutput)?;
    }

    if let Some(dir) = output_dir {
        for path in persist_artifacts(outcome.artifacts(), dir)? {
            writeln!(io.stdout, "{path}").map_err(AppError::WriteOutput)?;
        }
    } else {
        for artifact in outcome.artifacts() {
            writeln!(io.stdout, "{}", artifact.description()).map_err(AppError::WriteOutput)?;
        }
    }
    writeln!(io.stderr, "run {}", outcome.status()).map_err(AppError::WriteOutput)
}

fn plugin_config(args: &RunArgs) -> Result<JsonConfig, AppError> {
    let mut config = JsonConfig::new();
    if let Some(path) = &args.plugin_config {
        config.push_file(path)?;
    }
    for assignment in &args.assignments {
        config.push_assignment(assignment)?;
    }
    Ok(config)
}

/// Turns a path argument into an absolute path; `file://` URIs pass through.
fn input_uri(input: &str) -> Result<String, AppError> {
    if input.starts_with("file://") {
        return Ok(input.to_owned());
    }
    std::path::absolute(Path::new(input))
        .map(|path| path.to_string_lossy().into_owned())
        .map_err(|source| AppError::Input {
            input: input.to_owned(),
            source,
        })
}

async fn start_endpoint(args: &ExtensionArgs, config: &Config) -> Result<PluginEndpoint, AppError> {
    let manager = ExtensionManager::create(config.extension_cache().into_std_path_buf()).await?;
    manager.add_source(
        LOCAL_SOURCE,
        Arc::new(DirectoryRegistry::new(args.registry.as_std_path())),
    );
    let constraint: VersionConstraint = args.extension_version.parse()?;
    let extension = manager
        .resolve(&args.extension, &constraint, LOCAL_SOURCE)
        .await?;
    info!(
        target: COMMANDS_TARGET,
        extension = extension.name(),
        version = %extension.version(),
        "starting extension"
    );
    let process = extension.start()?;
    Ok(PluginEndpoint::from_process(extension.name(), process)?)
}

/// Creates the run token, cancelled on Ctrl-C or when the configured timeout
/// elapses.
fn run_token(config: &Config) -> CancellationToken {
    let token = CancellationToken::new();

    let interrupted = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = interrupted.cancelled() => {}
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    warn!(target: COMMANDS_TARGET, "interrupted; cancelling run");
                    interrupted.cancel();
                }
            }
        }
    });

    if let Some(limit) = config.timeout() {
        let expired = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = expired.cancelled() => {}
                () = tokio::time::sleep(limit) => {
                    warn!(
                        target: COMMANDS_TARGET,
                        seconds = limit.as_secs(),
                        "timeout elapsed; cancelling run"
                    );
                    expired.cancel();
                }
            }
        });
    }
    token
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn file_uris_pass_through() {
        assert_eq!(
            input_uri("file:///srv/specs/petstore.yaml").expect("uri"),
            "file:///srv/specs/petstore.yaml"
        );
    }

    #[rstest]
    fn relative_paths_become_absolute() {
        let uri = input_uri("specs/petstore.yaml").expect("uri");

        assert!(Path::new(&uri).is_absolute());
        assert!(uri.ends_with("petstore.yaml"));
    }
}
