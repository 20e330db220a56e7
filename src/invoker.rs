use std::process::Stdio;
use std::sync::LazyLock;

use anyhow::Context as _;
use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};
use tokio::process::Command;

/// Exit code reported when the pipeline process could not be started.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

const PUMP_CHUNK_BYTES: usize = 8 * 1024;

// Marker format v1, matched case-insensitively; the last occurrence wins.
//   Total Cost: $0.0200
//   Duration: 42.5s
//   Pipeline ID: short_20240101_120000
static RE_COST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)total\s+cost:\s*\$?\s*([0-9]+(?:\.[0-9]+)?)").unwrap()
});
static RE_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bduration:\s*([0-9]+(?:\.[0-9]+)?)\s*(?:s|secs?|seconds)?\b").unwrap()
});
static RE_PIPELINE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*pipeline\s+id:\s*(\S+)").unwrap());

#[derive(Debug, Clone)]
pub struct InvokeRequest<'a> {
    pub id: u32,
    pub topic: &'a str,
    pub budget_usd: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait PipelineInvoker: Send + Sync {
    /// Runs the pipeline for one topic.
    ///
    /// A process that cannot be started is an `Ok` invocation with
    /// [`SPAWN_FAILURE_EXIT_CODE`]; `Err` is reserved for failures while
    /// supervising a started process.
    async fn invoke(&self, request: &InvokeRequest<'_>) -> anyhow::Result<Invocation>;
}

#[derive(Debug, Clone)]
pub struct CommandInvoker {
    pub program: String,
    pub args: Vec<String>,
    pub echo: bool,
}

impl CommandInvoker {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            echo: true,
        }
    }

    pub fn from_env(args: Vec<String>) -> Self {
        let program = std::env::var("TOPICBATCH_PIPELINE_BIN")
            .unwrap_or_else(|_| "short-pipeline".to_owned());
        Self::new(program, args)
    }
}

#[async_trait]
impl PipelineInvoker for CommandInvoker {
    async fn invoke(&self, request: &InvokeRequest<'_>) -> anyhow::Result<Invocation> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--topic")
            .arg(request.topic)
            .env("TOPICBATCH_TOPIC", request.topic)
            .env("TOPICBATCH_TOPIC_ID", request.id.to_string());
        if let Some(budget) = request.budget_usd {
            cmd.arg("--budget")
                .arg(budget)
                .env("TOPICBATCH_BUDGET_USD", budget);
        }

        tracing::debug!(
            program = %self.program,
            args = ?self.args,
            id = request.id,
            "pipeline spawn"
        );

        let mut child = match cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                tracing::warn!(program = %self.program, error = %err, "pipeline spawn failed");
                return Ok(Invocation {
                    exit_code: SPAWN_FAILURE_EXIT_CODE,
                    stdout: String::new(),
                    stderr: format!("spawn pipeline: {}: {err}", self.program),
                });
            }
        };

        let stdout = child.stdout.take().context("open pipeline stdout")?;
        let stderr = child.stderr.take().context("open pipeline stderr")?;
        let stdout_task = tokio::spawn(pump(stdout, Echo::Stdout, self.echo));
        let stderr_task = tokio::spawn(pump(stderr, Echo::Stderr, self.echo));

        let status = child.wait().await.context("wait pipeline process")?;
        let stdout = stdout_task.await.context("join stdout reader")??;
        let stderr = stderr_task.await.context("join stderr reader")??;

        Ok(Invocation {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Echo {
    Stdout,
    Stderr,
}

/// Copies `reader` into a buffer, mirroring each chunk to our own stdout or
/// stderr as it arrives so `\r` progress redraws show up live.
async fn pump<R>(mut reader: R, echo: Echo, enabled: bool) -> anyhow::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut captured = Vec::new();
    let mut chunk = vec![0u8; PUMP_CHUNK_BYTES];

    loop {
        let read = reader
            .read(&mut chunk)
            .await
            .context("read pipeline output")?;
        if read == 0 {
            break;
        }

        if enabled {
            // Best effort: a closed terminal must not fail the topic.
            let _ = match echo {
                Echo::Stdout => mirror(tokio::io::stdout(), &chunk[..read]).await,
                Echo::Stderr => mirror(tokio::io::stderr(), &chunk[..read]).await,
            };
        }
        captured.extend_from_slice(&chunk[..read]);
    }

    // Decoded once so multi-byte characters split across chunks survive.
    Ok(String::from_utf8_lossy(&captured).into_owned())
}

async fn mirror<W>(mut out: W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(bytes).await?;
    out.flush().await
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineMarkers {
    pub cost_usd: Option<f64>,
    pub duration_seconds: Option<f64>,
    pub pipeline_id: Option<String>,
}

/// Scrapes the v1 markers from pipeline stdout. Missing markers stay `None`.
pub fn parse_markers(stdout: &str) -> PipelineMarkers {
    PipelineMarkers {
        cost_usd: last_capture(&RE_COST, stdout).and_then(|v| v.parse().ok()),
        duration_seconds: last_capture(&RE_DURATION, stdout).and_then(|v| v.parse().ok()),
        pipeline_id: last_capture(&RE_PIPELINE_ID, stdout).map(str::to_owned),
    }
}

fn last_capture<'a>(re: &Regex, haystack: &'a str) -> Option<&'a str> {
    re.captures_iter(haystack)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
