use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::checkpoint;
use crate::formats::{
    BatchManifest, BatchResults, ExecutionRecord, ExecutionStatus, RunState, TopicCandidate,
};
use crate::invoker::{InvokeRequest, PipelineInvoker, parse_markers};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub start_from_id: u32,
    pub budget_usd: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            start_from_id: 1,
            budget_usd: None,
        }
    }
}

pub struct BatchEngine {
    invoker: Arc<dyn PipelineInvoker>,
    results_path: PathBuf,
    cancel: CancellationToken,
}

impl BatchEngine {
    pub fn new(invoker: Arc<dyn PipelineInvoker>, results_path: impl Into<PathBuf>) -> Self {
        Self {
            invoker,
            results_path: results_path.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Stops the pass before the next topic once cancelled; the in-flight
    /// topic is still recorded and checkpointed.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn results_path(&self) -> &Path {
        &self.results_path
    }

    /// Drives every manifest topic through the invoker in manifest order.
    ///
    /// Topic failures are recorded, never returned; only checkpoint writes
    /// can fail the pass.
    pub async fn run(
        &self,
        manifest: &BatchManifest,
        options: &RunOptions,
    ) -> anyhow::Result<BatchResults> {
        let mut results = BatchResults::new(
            manifest.batch_name.clone(),
            manifest.topics.len(),
            options.start_from_id,
        );
        let total = manifest.topics.len();
        let mut interrupted = false;

        tracing::info!(
            batch = %manifest.batch_name,
            topics = total,
            start_from = options.start_from_id,
            budget = ?options.budget_usd,
            "execute: start"
        );

        // Resume ids are only meaningful over ascending id order.
        let mut ordered = manifest.topics.iter().collect::<Vec<_>>();
        ordered.sort_by_key(|topic| topic.id);

        for (idx, topic) in ordered.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                interrupted = true;
                break;
            }

            if topic.id < options.start_from_id {
                tracing::debug!(id = topic.id, "skip (below resume threshold)");
                results.record(ExecutionRecord::skipped(topic));
                continue;
            }

            tracing::info!(
                id = topic.id,
                position = idx + 1,
                total,
                topic = %topic.topic,
                "topic: start"
            );
            let record = self.run_topic(topic, options).await;
            tracing::info!(
                id = record.id,
                status = ?record.status,
                duration_s = record.duration_seconds,
                cost_usd = ?record.cost_usd,
                "topic: finish"
            );
            results.record(record);

            self.checkpoint(&results)?;
        }

        let state = if interrupted {
            RunState::Interrupted
        } else {
            RunState::Completed
        };
        results.finish(state);
        self.checkpoint(&results)?;

        tracing::info!(
            state = ?results.state,
            succeeded = results.succeeded,
            failed = results.failed,
            skipped = results.skipped,
            "execute: finish"
        );
        Ok(results)
    }

    async fn run_topic(&self, topic: &TopicCandidate, options: &RunOptions) -> ExecutionRecord {
        let started = Instant::now();
        let request = InvokeRequest {
            id: topic.id,
            topic: &topic.topic,
            budget_usd: options.budget_usd.as_deref(),
        };
        let outcome = self.invoker.invoke(&request).await;
        let duration_seconds = round_tenths(started.elapsed().as_secs_f64());

        let mut record = ExecutionRecord {
            id: topic.id,
            topic: topic.topic.clone(),
            status: ExecutionStatus::Error,
            duration_seconds,
            cost_usd: None,
            invoked_pipeline_id: None,
            reported_duration_seconds: None,
            exit_code: None,
            error: None,
            completed_at: Utc::now(),
        };

        match outcome {
            Ok(invocation) => {
                let markers = parse_markers(&invocation.stdout);
                record.exit_code = Some(invocation.exit_code);
                record.invoked_pipeline_id = markers.pipeline_id;
                record.reported_duration_seconds = markers.duration_seconds;
                if invocation.exit_code == 0 {
                    record.status = ExecutionStatus::Success;
                    record.cost_usd = markers.cost_usd;
                } else {
                    record.status = ExecutionStatus::Failed;
                    record.error = last_line(&invocation.stderr);
                }
            }
            Err(err) => {
                tracing::warn!(id = topic.id, error = %format!("{err:#}"), "topic: invoker error");
                record.error = Some(format!("{err:#}"));
            }
        }

        record
    }

    fn checkpoint(&self, results: &BatchResults) -> anyhow::Result<()> {
        checkpoint::write_json_atomic(&self.results_path, results).with_context(|| {
            format!("write results checkpoint: {}", self.results_path.display())
        })
    }
}

fn round_tenths(seconds: f64) -> f64 {
    (seconds * 10.0).round() / 10.0
}

fn last_line(text: &str) -> Option<String> {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_owned)
}

/// Human-readable end-of-pass report.
pub fn render_summary(results: &BatchResults, results_path: &Path) -> String {
    let state = match results.state {
        RunState::Running => "running",
        RunState::Completed => "completed",
        RunState::Interrupted => "interrupted",
    };

    let mut out = String::new();
    let _ = writeln!(out, "== batch {} ({state}) ==", results.batch_name);
    let _ = writeln!(out, "topics:     {}", results.total_topics);
    let _ = writeln!(out, "succeeded:  {}", results.succeeded);
    let _ = writeln!(out, "failed:     {}", results.failed);
    let _ = writeln!(out, "skipped:    {}", results.skipped);
    if results.unknown_cost_runs > 0 {
        let _ = writeln!(
            out,
            "total cost: ${:.4} (+{} run(s) without a cost marker)",
            results.total_cost_usd, results.unknown_cost_runs
        );
    } else {
        let _ = writeln!(out, "total cost: ${:.4}", results.total_cost_usd);
    }
    let _ = writeln!(out, "duration:   {:.1}s", results.total_duration_seconds);
    let _ = writeln!(out, "results:    {}", results_path.display());
    out
}
