use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::checkpoint;
use crate::cli::{ExecuteArgs, RunArgs};
use crate::engine::{BatchEngine, RunOptions, render_summary};
use crate::formats::{BatchManifest, BatchResults, RunState};
use crate::invoker::CommandInvoker;
use crate::manifest::load_manifest;

/// Exit status for a forced quit, matching a shell's SIGINT convention.
const FORCED_EXIT_CODE: i32 = 130;

pub async fn run(args: ExecuteArgs) -> anyhow::Result<BatchResults> {
    let manifest_path = Path::new(&args.manifest);
    let manifest = load_manifest(manifest_path)
        .with_context(|| format!("load manifest: {}", manifest_path.display()))?;
    run_manifest(&manifest, &args.run).await
}

pub async fn run_manifest(manifest: &BatchManifest, args: &RunArgs) -> anyhow::Result<BatchResults> {
    let results_path = Path::new(&args.results);
    let start_from_id = resolve_start_id(args, results_path)?;

    let invoker = match args.command.as_deref() {
        Some(program) => CommandInvoker::new(program, args.command_args.clone()),
        None => CommandInvoker::from_env(args.command_args.clone()),
    };
    tracing::info!(
        program = %invoker.program,
        results = %results_path.display(),
        "execute: pipeline"
    );

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if watch_interrupts(tokio::signal::ctrl_c, &cancel).await {
                tracing::error!("second interrupt received; exiting without finishing the in-flight topic");
                std::process::exit(FORCED_EXIT_CODE);
            }
        }
    });

    let engine = BatchEngine::new(Arc::new(invoker), results_path).with_cancellation(cancel);
    let options = RunOptions {
        start_from_id,
        budget_usd: args.budget.clone(),
    };
    let outcome = engine.run(manifest, &options).await;
    interrupt.abort();
    let results = outcome?;

    print!("{}", render_summary(&results, engine.results_path()));

    if results.state == RunState::Interrupted {
        anyhow::bail!(
            "batch interrupted; resume with --start-from {} (or --resume)",
            results.next_resume_id()
        );
    }
    Ok(results)
}

/// Waits for interrupts: the first cancels `cancel` for a graceful stop after
/// the in-flight topic, the second returns `true` to request an immediate exit.
/// Returns `false` if the interrupt source fails before a second interrupt.
async fn watch_interrupts<F, Fut>(mut next_interrupt: F, cancel: &CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if next_interrupt().await.is_err() {
        return false;
    }
    tracing::warn!("interrupt received; stopping after the in-flight topic (press Ctrl-C again to quit now)");
    cancel.cancel();

    next_interrupt().await.is_ok()
}

fn resolve_start_id(args: &RunArgs, results_path: &Path) -> anyhow::Result<u32> {
    if !args.resume {
        return Ok(args.start_from);
    }

    let previous: Option<BatchResults> = checkpoint::read_json(results_path)
        .with_context(|| format!("load previous results: {}", results_path.display()))?;
    match previous {
        Some(previous) => {
            let next = previous.next_resume_id();
            tracing::info!(
                previous_state = ?previous.state,
                start_from = next,
                "execute: resuming"
            );
            Ok(next)
        }
        None => {
            tracing::info!(
                results = %results_path.display(),
                "execute: no previous results; starting from the first topic"
            );
            Ok(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{ExecutionRecord, ExecutionStatus};

    fn run_args(results: &Path, resume: bool, start_from: u32) -> RunArgs {
        RunArgs {
            results: results.to_string_lossy().to_string(),
            start_from,
            resume,
            budget: None,
            command: None,
            command_args: Vec::new(),
        }
    }

    #[tokio::test]
    async fn first_interrupt_cancels_and_second_requests_exit() {
        let cancel = CancellationToken::new();
        let mut seen = 0;
        let force = watch_interrupts(
            || {
                seen += 1;
                async { Ok(()) }
            },
            &cancel,
        )
        .await;

        assert!(force);
        assert!(cancel.is_cancelled());
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn interrupt_source_failure_never_forces_exit() {
        let cancel = CancellationToken::new();
        let mut remaining_ok = 1;
        let force = watch_interrupts(
            || {
                let result = if remaining_ok > 0 {
                    remaining_ok -= 1;
                    Ok(())
                } else {
                    Err(std::io::Error::other("signal stream closed"))
                };
                async move { result }
            },
            &cancel,
        )
        .await;
        assert!(!force);
        assert!(cancel.is_cancelled());

        let untouched = CancellationToken::new();
        let force = watch_interrupts(
            || async { Err(std::io::Error::other("no signal support")) },
            &untouched,
        )
        .await;
        assert!(!force);
        assert!(!untouched.is_cancelled());
    }

    #[test]
    fn resolve_start_id_uses_explicit_value_without_resume() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let args = run_args(&temp.path().join("r.json"), false, 4);
        assert_eq!(resolve_start_id(&args, Path::new(&args.results))?, 4);
        Ok(())
    }

    #[test]
    fn resolve_start_id_reads_previous_checkpoint() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("r.json");
        let args = run_args(&path, true, 1);
        assert_eq!(resolve_start_id(&args, &path)?, 1);

        let mut previous = BatchResults::new("b", 3, 1);
        let mut record = ExecutionRecord {
            id: 1,
            topic: "t".to_owned(),
            status: ExecutionStatus::Success,
            duration_seconds: 1.0,
            cost_usd: Some(0.02),
            invoked_pipeline_id: None,
            reported_duration_seconds: None,
            exit_code: Some(0),
            error: None,
            completed_at: chrono::Utc::now(),
        };
        previous.record(record.clone());
        record.id = 2;
        previous.record(record);
        previous.finish(RunState::Interrupted);
        checkpoint::write_json_atomic(&path, &previous)?;

        assert_eq!(resolve_start_id(&args, &path)?, 3);
        Ok(())
    }
}
