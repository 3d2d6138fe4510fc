//! Pipeline orchestration for Codeloom.
//!
//! A [`Pipeline`] threads one run-scoped [`DataStore`](codeloom_datastore::DataStore)
//! and one cancellation token through a sequence of plugin invocations,
//! forwards their messages to subscribers, and reports a single
//! [`RunOutcome`]. [`JsonConfig`] supplies the values plugins look up, and
//! [`persist_artifacts`] writes the produced artifacts to disk.

pub mod config;
pub mod persist;
pub mod pipeline;

pub use self::config::{JsonConfig, JsonConfigError};
pub use self::persist::{PersistError, persist_artifacts};
pub use self::pipeline::{
    Pipeline, PipelineBuilder, PipelineError, RunOutcome, RunStatus, Stage, StageReport,
    StageStatus,
};
