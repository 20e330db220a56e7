use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract short-form topics from long-form scripts into a batch manifest.
    Extract(ExtractArgs),
    /// Run the pipeline once per manifest topic, checkpointing after each.
    Execute(ExecuteArgs),
    /// Extract a manifest, then execute it.
    Batch(BatchArgs),
    /// Summarize a results checkpoint.
    Status(StatusArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmEngine {
    Noop,
    Openai,
    Codex,
}

#[derive(Debug, Clone, Args)]
pub struct SourceArgs {
    /// Directory holding long-form run directories.
    #[arg(long, default_value = "output")]
    pub scripts_root: String,

    /// Extract from this one run directory instead of scanning.
    #[arg(long)]
    pub script_dir: Option<String>,

    /// Name prefix of run directories to scan.
    #[arg(long, default_value = crate::scripts::DEFAULT_RUN_DIR_PREFIX)]
    pub prefix: String,

    /// Maximum topics kept per script.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u16).range(1..))]
    pub max_per_episode: u16,

    /// Topic analysis engine (falls back to the heuristic when unavailable).
    #[arg(long, value_enum, default_value_t = LlmEngine::Noop)]
    pub engine: LlmEngine,

    /// Batch name written to the manifest (default: derived from the clock).
    #[arg(long)]
    pub batch_name: Option<String>,

    /// Pipeline kind recorded in the manifest.
    #[arg(long, default_value = "short")]
    pub pipeline_kind: String,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Output path for the results checkpoint.
    #[arg(long, default_value = "batch_results.json")]
    pub results: String,

    /// Skip topics whose id is below this value.
    #[arg(long, default_value_t = 1, conflicts_with = "resume")]
    pub start_from: u32,

    /// Continue from the existing results checkpoint.
    #[arg(long)]
    pub resume: bool,

    /// Per-topic spend cap in USD, passed to the pipeline.
    #[arg(long, value_parser = parse_budget)]
    pub budget: Option<String>,

    /// Pipeline program (default: $TOPICBATCH_PIPELINE_BIN or `short-pipeline`).
    #[arg(long)]
    pub command: Option<String>,

    /// Arguments passed to the pipeline program before `--topic`.
    #[arg(last = true)]
    pub command_args: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct ExtractArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Output path for the batch manifest.
    #[arg(long, default_value = "batch_manifest.json")]
    pub manifest: String,

    /// Overwrite an existing manifest.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ExecuteArgs {
    /// Input path to the batch manifest (created by `extract`).
    #[arg(long, default_value = "batch_manifest.json")]
    pub manifest: String,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Debug, Clone, Args)]
pub struct BatchArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Path for the batch manifest.
    #[arg(long, default_value = "batch_manifest.json")]
    pub manifest: String,

    /// Overwrite an existing manifest.
    #[arg(long)]
    pub force: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    /// Input path to the results checkpoint.
    #[arg(long, default_value = "batch_results.json")]
    pub results: String,

    /// Manifest to compare against (reports topics not yet run).
    #[arg(long)]
    pub manifest: Option<String>,
}

fn parse_budget(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim().trim_start_matches('$');
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => Ok(trimmed.to_owned()),
        _ => Err(format!("budget must be a positive USD amount, got `{raw}`")),
    }
}
