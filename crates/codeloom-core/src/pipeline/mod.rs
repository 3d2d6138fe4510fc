//! Stage sequencing for one code-generation run.
//!
//! A [`Pipeline`] loads its input documents, then invokes each [`Stage`]'s
//! plugin once every stage it depends on has succeeded. Stages without
//! dependencies read the input documents; the others read what their
//! dependencies emitted. Independent stages run concurrently.
//!
//! Every message a plugin emits is forwarded to the pipeline's
//! [`MessageHub`]. An `Error` or `Fatal` message fails the run; a `Fatal`
//! message also aborts the stage that emitted it.

mod outcome;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use codeloom_datastore::{
    DataHandle, DataSource, DataStore, FileSystemSource, HandleSource, IdentityPolicy,
};
use codeloom_message::{Channel, Message, MessageHub};
use codeloom_plugins::{ConfigProvider, EndpointError, PluginEndpoint, ProcessInvocation};
use futures::future::{FutureExt, LocalBoxFuture, join_all};
use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::JsonConfig;

pub use self::outcome::{RunOutcome, RunStatus, StageReport, StageStatus};

const PIPELINE_TARGET: &str = "codeloom_core::pipeline";

/// Errors detected while assembling a pipeline.
///
/// Failures during a run are reported through [`RunOutcome`] and messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// A stage names a dependency that does not exist.
    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency {
        /// Stage declaring the dependency.
        stage: String,
        /// The missing dependency.
        dependency: String,
    },
    /// Two stages share an identifier.
    #[error("stage '{stage}' is declared more than once")]
    DuplicateStage {
        /// The repeated identifier.
        stage: String,
    },
    /// The dependencies form a cycle.
    #[error("stages {stages:?} form a dependency cycle")]
    DependencyCycle {
        /// Stages that could not be ordered.
        stages: Vec<String>,
    },
}

/// One plugin invocation within a pipeline.
#[derive(Clone)]
pub struct Stage {
    id: String,
    plugin: String,
    endpoint: Arc<PluginEndpoint>,
    depends_on: Vec<String>,
}

impl Stage {
    /// Creates a stage `id` running `plugin` hosted by `endpoint`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        plugin: impl Into<String>,
        endpoint: Arc<PluginEndpoint>,
    ) -> Self {
        Self {
            id: id.into(),
            plugin: plugin.into(),
            endpoint,
            depends_on: Vec::new(),
        }
    }

    /// Declares that this stage consumes the outputs of stage `id`.
    #[must_use]
    pub fn after(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    /// Stage identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Plugin the stage invokes.
    #[must_use]
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Endpoint hosting the plugin.
    #[must_use]
    pub const fn endpoint(&self) -> &Arc<PluginEndpoint> {
        &self.endpoint
    }

    /// Stages whose outputs this stage reads.
    #[must_use]
    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("id", &self.id)
            .field("plugin", &self.plugin)
            .field("endpoint", &self.endpoint.name())
            .field("depends_on", &self.depends_on)
            .finish()
    }
}

/// Collects inputs, configuration, and stages for a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    inputs: Vec<String>,
    config: Option<Arc<dyn ConfigProvider>>,
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    /// Adds an input document URI (`file://` or an absolute path).
    #[must_use]
    pub fn input(mut self, uri: impl Into<String>) -> Self {
        self.inputs.push(uri.into());
        self
    }

    /// Sets the configuration plugins read through `GetValue`.
    #[must_use]
    pub fn config(mut self, config: Arc<dyn ConfigProvider>) -> Self {
        self.config = Some(config);
        self
    }

    /// Adds a stage.
    #[must_use]
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Validates the stage graph and builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] for duplicate stage ids, unknown
    /// dependencies, and dependency cycles.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let stages = order_stages(self.stages)?;
        Ok(Pipeline {
            inputs: self.inputs,
            config: self.config.unwrap_or_else(|| Arc::new(JsonConfig::new())),
            stages,
            messages: MessageHub::new(),
        })
    }
}

/// Orders stages so each follows its dependencies, keeping declaration
/// order among independent stages.
fn order_stages(stages: Vec<Stage>) -> Result<Vec<Stage>, PipelineError> {
    let mut ids = HashSet::new();
    for stage in &stages {
        if !ids.insert(stage.id()) {
            return Err(PipelineError::DuplicateStage {
                stage: stage.id().to_owned(),
            });
        }
    }
    for stage in &stages {
        let unknown = stage
            .depends_on()
            .iter()
            .find(|dependency| !ids.contains(dependency.as_str()));
        if let Some(dependency) = unknown {
            return Err(PipelineError::UnknownDependency {
                stage: stage.id().to_owned(),
                dependency: dependency.clone(),
            });
        }
    }

    let mut placed: HashSet<String> = HashSet::new();
    let mut ordered = Vec::with_capacity(stages.len());
    let mut remaining = stages;
    while !remaining.is_empty() {
        let Some(position) = remaining.iter().position(|stage| {
            stage
                .depends_on()
                .iter()
                .all(|dependency| placed.contains(dependency))
        }) else {
            return Err(PipelineError::DependencyCycle {
                stages: remaining.iter().map(|stage| stage.id().to_owned()).collect(),
            });
        };
        let stage = remaining.remove(position);
        placed.insert(stage.id().to_owned());
        ordered.push(stage);
    }
    Ok(ordered)
}

/// A validated set of stages ready to run.
pub struct Pipeline {
    inputs: Vec<String>,
    config: Arc<dyn ConfigProvider>,
    stages: Vec<Stage>,
    messages: MessageHub,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("inputs", &self.inputs)
            .field("stages", &self.stages)
            .field("messages", &self.messages)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Starts assembling a pipeline.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Hub receiving every message emitted during runs.
    ///
    /// Subscribe before calling [`Pipeline::run`] to observe a whole run.
    #[must_use]
    pub const fn messages(&self) -> &MessageHub {
        &self.messages
    }

    /// Stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Input document URIs.
    #[must_use]
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Executes the pipeline once.
    ///
    /// Cancelling `token` stops every running stage promptly and yields
    /// [`RunStatus::Cancelled`]. Artifacts written before a failure or
    /// cancellation are kept in the outcome.
    pub async fn run(&self, token: &CancellationToken) -> RunOutcome {
        let store = DataStore::new(token.child_token());
        let state = Arc::new(RunState::new(self.messages.clone()));
        info!(
            target: PIPELINE_TARGET,
            run = %store.run_id(),
            inputs = self.inputs.len(),
            stages = self.stages.len(),
            "starting run"
        );

        let loaded = self.load_inputs(&store, &state).await;
        let mut reports = HashMap::new();
        if let Some(documents) = loaded.filter(|_| !state.has_failures()) {
            let context = RunContext {
                store: &store,
                config: &self.config,
                state: &state,
                token,
            };
            reports = self.dispatch(context, &documents).await;
        }

        let stages: Vec<StageReport> = self
            .stages
            .iter()
            .map(|stage| {
                reports.remove(stage.id()).unwrap_or_else(|| {
                    let status = if token.is_cancelled() {
                        StageStatus::Cancelled
                    } else {
                        StageStatus::Skipped
                    };
                    StageReport::new(stage.id(), stage.plugin(), status, 0)
                })
            })
            .collect();

        let status = if token.is_cancelled() {
            RunStatus::Cancelled
        } else if state.has_failures()
            || stages.iter().any(|report| !report.status().is_success())
        {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };
        let artifacts = state.take_artifacts();
        info!(
            target: PIPELINE_TARGET,
            run = %store.run_id(),
            %status,
            artifacts = artifacts.len(),
            "run finished"
        );
        RunOutcome::new(status, artifacts, stages)
    }

    /// Reads every input document. Unreadable inputs become `Error`
    /// messages. Returns `None` when cancelled.
    async fn load_inputs(&self, store: &DataStore, state: &RunState) -> Option<Vec<DataHandle>> {
        let source: Arc<dyn DataSource> = Arc::new(FileSystemSource::new());
        let scope = store.read_through_scope(vec![source]);
        let reads = join_all(self.inputs.iter().map(|uri| scope.read(uri))).await;

        let mut documents = Vec::with_capacity(reads.len());
        for (uri, read) in self.inputs.iter().zip(reads) {
            match read {
                Ok(handle) => documents.push(handle),
                Err(error) if error.is_cancelled() => return None,
                Err(error) => state.emit(
                    Message::new(Channel::Error, format!("cannot load input: {error}"))
                        .with_keys(vec![uri.clone()]),
                ),
            }
        }
        debug!(target: PIPELINE_TARGET, documents = documents.len(), "inputs loaded");
        Some(documents)
    }

    /// Runs stages as their dependencies complete and returns their reports.
    async fn dispatch(
        &self,
        context: RunContext<'_>,
        documents: &[DataHandle],
    ) -> HashMap<String, StageReport> {
        let mut reports: HashMap<String, StageReport> = HashMap::new();
        let mut outputs: HashMap<String, Vec<DataHandle>> = HashMap::new();
        let mut waiting: Vec<&Stage> = self.stages.iter().collect();
        let mut running: FuturesUnordered<LocalBoxFuture<'_, StageRun>> = FuturesUnordered::new();

        loop {
            if !context.token.is_cancelled() {
                let mut blocked = Vec::with_capacity(waiting.len());
                for stage in waiting {
                    match readiness(stage, &reports) {
                        Readiness::Ready => {
                            let inputs = stage_inputs(stage, documents, &outputs);
                            running.push(context.execute(stage, inputs).boxed_local());
                        }
                        Readiness::Blocked => {
                            warn!(
                                target: PIPELINE_TARGET,
                                stage = stage.id(),
                                "skipping stage after dependency failure"
                            );
                            reports.insert(
                                stage.id().to_owned(),
                                StageReport::new(
                                    stage.id(),
                                    stage.plugin(),
                                    StageStatus::Skipped,
                                    0,
                                ),
                            );
                        }
                        Readiness::Waiting => blocked.push(stage),
                    }
                }
                waiting = blocked;
            }

            let Some(run) = running.next().await else {
                break;
            };
            outputs.insert(run.report.id().to_owned(), run.outputs);
            reports.insert(run.report.id().to_owned(), run.report);
        }
        reports
    }
}

enum Readiness {
    Ready,
    Waiting,
    Blocked,
}

fn readiness(stage: &Stage, reports: &HashMap<String, StageReport>) -> Readiness {
    let mut ready = true;
    for dependency in stage.depends_on() {
        match reports.get(dependency) {
            Some(report) if !report.status().is_success() => return Readiness::Blocked,
            Some(_) => {}
            None => ready = false,
        }
    }
    if ready {
        Readiness::Ready
    } else {
        Readiness::Waiting
    }
}

fn stage_inputs(
    stage: &Stage,
    documents: &[DataHandle],
    outputs: &HashMap<String, Vec<DataHandle>>,
) -> Vec<DataHandle> {
    if stage.depends_on().is_empty() {
        return documents.to_vec();
    }
    stage
        .depends_on()
        .iter()
        .filter_map(|dependency| outputs.get(dependency))
        .flatten()
        .cloned()
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared bookkeeping for one run.
struct RunState {
    hub: MessageHub,
    failed: AtomicBool,
    artifacts: Mutex<Vec<DataHandle>>,
}

impl RunState {
    const fn new(hub: MessageHub) -> Self {
        Self {
            hub,
            failed: AtomicBool::new(false),
            artifacts: Mutex::new(Vec::new()),
        }
    }

    fn emit(&self, message: Message) {
        if message.channel().is_failure() {
            self.failed.store(true, Ordering::SeqCst);
        }
        self.hub.emit(message);
    }

    fn record(&self, artifact: DataHandle) {
        lock(&self.artifacts).push(artifact);
    }

    fn has_failures(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn take_artifacts(&self) -> Vec<DataHandle> {
        std::mem::take(&mut *lock(&self.artifacts))
    }
}

struct StageRun {
    report: StageReport,
    outputs: Vec<DataHandle>,
}

#[derive(Clone, Copy)]
struct RunContext<'a> {
    store: &'a DataStore,
    config: &'a Arc<dyn ConfigProvider>,
    state: &'a Arc<RunState>,
    token: &'a CancellationToken,
}

impl RunContext<'_> {
    async fn execute(self, stage: &Stage, inputs: Vec<DataHandle>) -> StageRun {
        let stage_token = self.token.child_token();
        let source: Arc<dyn DataSource> = Arc::new(HandleSource::new(inputs));
        let scope = self.store.read_through_scope(vec![source]);
        let produced = Arc::new(Mutex::new(Vec::new()));

        let on_file = {
            let state = Arc::clone(self.state);
            let collected = Arc::clone(&produced);
            move |handle: DataHandle| {
                state.record(handle.clone());
                lock(&collected).push(handle);
            }
        };
        let on_message = {
            let state = Arc::clone(self.state);
            let abort = stage_token.clone();
            move |message: Message| {
                let fatal = message.channel() == Channel::Fatal;
                state.emit(message);
                if fatal {
                    abort.cancel();
                }
            }
        };
        let invocation = ProcessInvocation::new(
            stage.plugin(),
            Arc::clone(self.config),
            Arc::new(scope),
            self.store.sink(stage.id(), IdentityPolicy::Keyed),
        )
        .with_on_file(on_file)
        .with_on_message(on_message);

        info!(
            target: PIPELINE_TARGET,
            stage = stage.id(),
            plugin = stage.plugin(),
            endpoint = stage.endpoint().name(),
            "dispatching stage"
        );
        let status = match stage.endpoint().process(invocation, &stage_token).await {
            Ok(true) => StageStatus::Succeeded,
            Ok(false) => StageStatus::Failed,
            Err(EndpointError::Cancelled) if self.token.is_cancelled() => StageStatus::Cancelled,
            Err(EndpointError::Cancelled) => StageStatus::Aborted,
            Err(error) => {
                self.state.emit(
                    Message::new(
                        Channel::Error,
                        format!("stage '{}' failed: {error}", stage.id()),
                    )
                    .with_plugin(stage.plugin()),
                );
                StageStatus::Errored(error.to_string())
            }
        };

        let outputs = std::mem::take(&mut *lock(&produced));
        info!(
            target: PIPELINE_TARGET,
            stage = stage.id(),
            %status,
            outputs = outputs.len(),
            "stage finished"
        );
        StageRun {
            report: StageReport::new(stage.id(), stage.plugin(), status, outputs.len()),
            outputs,
        }
    }
}
