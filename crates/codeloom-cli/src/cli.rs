//! CLI argument definitions for the `codeloom` binary.

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// Command-line interface for the Codeloom orchestrator.
#[derive(Parser, Debug)]
#[command(
    name = "codeloom",
    version,
    about = "Drives API descriptions through out-of-process code generators.",
    disable_help_subcommand = true
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Top-level commands.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Runs plugins from an extension over input documents.
    Run(RunArgs),
    /// Lists the plugins an extension provides.
    Plugins(ExtensionArgs),
}

/// Selects the extension hosting the plugins.
#[derive(Args, Debug, Clone)]
pub(crate) struct ExtensionArgs {
    /// Registry directory laid out as `<name>/<version>/codeloom-extension.json`.
    #[arg(long, value_name = "DIR")]
    pub(crate) registry: Utf8PathBuf,
    /// Extension to install and start.
    #[arg(long, value_name = "NAME")]
    pub(crate) extension: String,
    /// Version requirement; `*` selects the highest available version.
    #[arg(long, value_name = "REQ", default_value = "*")]
    pub(crate) extension_version: String,
}

/// Arguments for `codeloom run`.
#[derive(Args, Debug, Clone)]
pub(crate) struct RunArgs {
    #[command(flatten)]
    pub(crate) extension: ExtensionArgs,
    /// Plugin to invoke; repeat to add stages.
    #[arg(long = "plugin", value_name = "NAME", required = true)]
    pub(crate) plugins: Vec<String>,
    /// Feeds each plugin the outputs of the plugin before it.
    #[arg(long)]
    pub(crate) chain: bool,
    /// Input document, as a path or `file://` URI; repeatable.
    #[arg(long = "input", value_name = "PATH")]
    pub(crate) inputs: Vec<String>,
    /// JSON file of plugin configuration values.
    #[arg(long, value_name = "FILE")]
    pub(crate) plugin_config: Option<Utf8PathBuf>,
    /// Plugin configuration value; applied after `--plugin-config`.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub(crate) assignments: Vec<String>,
    /// Directory the produced artifacts are written to.
    #[arg(long, value_name = "DIR")]
    pub(crate) output_dir: Option<Utf8PathBuf>,
}
