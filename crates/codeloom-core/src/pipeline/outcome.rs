//! Results reported by a pipeline run.

use std::fmt;

use codeloom_datastore::DataHandle;
use strum::Display;

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    /// Every stage returned `true` and no error or fatal message was seen.
    Succeeded,
    /// A stage failed, was aborted, or an error or fatal message was seen.
    Failed,
    /// The run token fired before the run finished.
    Cancelled,
}

/// Result of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    /// The plugin returned `true`.
    Succeeded,
    /// The plugin returned `false`.
    Failed,
    /// The stage emitted a fatal message and was cancelled.
    Aborted,
    /// The invocation failed at the protocol or process level.
    Errored(String),
    /// The run was cancelled while the stage ran or before it started.
    Cancelled,
    /// The stage never ran because its inputs were unavailable.
    Skipped,
}

impl StageStatus {
    /// Returns `true` when dependents may consume the stage's outputs.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed => f.write_str("failed"),
            Self::Aborted => f.write_str("aborted"),
            Self::Errored(reason) => write!(f, "errored: {reason}"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Skipped => f.write_str("skipped"),
        }
    }
}

/// Per-stage entry in a [`RunOutcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    id: String,
    plugin: String,
    status: StageStatus,
    outputs: usize,
}

impl StageReport {
    pub(crate) fn new(
        id: impl Into<String>,
        plugin: impl Into<String>,
        status: StageStatus,
        outputs: usize,
    ) -> Self {
        Self {
            id: id.into(),
            plugin: plugin.into(),
            status,
            outputs,
        }
    }

    /// Stage identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Plugin the stage invoked.
    #[must_use]
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// How the stage ended.
    #[must_use]
    pub const fn status(&self) -> &StageStatus {
        &self.status
    }

    /// Number of artifacts the stage emitted.
    #[must_use]
    pub const fn outputs(&self) -> usize {
        self.outputs
    }
}

/// Everything a run produced.
///
/// Artifacts are listed in emission order and include those written by
/// stages that later failed.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    status: RunStatus,
    artifacts: Vec<DataHandle>,
    stages: Vec<StageReport>,
}

impl RunOutcome {
    pub(crate) const fn new(
        status: RunStatus,
        artifacts: Vec<DataHandle>,
        stages: Vec<StageReport>,
    ) -> Self {
        Self {
            status,
            artifacts,
            stages,
        }
    }

    /// Returns the overall status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Returns `true` only for [`RunStatus::Succeeded`].
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Artifacts emitted during the run.
    #[must_use]
    pub fn artifacts(&self) -> &[DataHandle] {
        &self.artifacts
    }

    /// Consumes the outcome, returning its artifacts.
    #[must_use]
    pub fn into_artifacts(self) -> Vec<DataHandle> {
        self.artifacts
    }

    /// Stage reports in pipeline order.
    #[must_use]
    pub fn stages(&self) -> &[StageReport] {
        &self.stages
    }

    /// Looks up the report for stage `id`.
    #[must_use]
    pub fn stage(&self, id: &str) -> Option<&StageReport> {
        self.stages.iter().find(|report| report.id() == id)
    }
}
