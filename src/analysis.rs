use std::io::Write as _;
use std::process::{Command, Stdio};

use anyhow::Context as _;
use async_trait::async_trait;

use crate::cli::LlmEngine;
use crate::openai::{OpenAiClient, OpenAiConfig};

/// A model that answers one instruction/input pair with free text.
#[async_trait]
pub trait Analyst: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, instructions: &str, input: &str) -> anyhow::Result<String>;
}

/// Builds the analyst for `engine`. `Ok(None)` means the engine does not use a model.
pub fn analyst_for(engine: LlmEngine) -> anyhow::Result<Option<Box<dyn Analyst>>> {
    match engine {
        LlmEngine::Noop => Ok(None),
        LlmEngine::Openai => {
            let config = OpenAiConfig::from_env().context("load openai config")?;
            let client = OpenAiClient::new(config)?;
            Ok(Some(Box::new(OpenAiAnalyst { client })))
        }
        LlmEngine::Codex => Ok(Some(Box::new(CodexAnalyst {
            config: CodexConfig::from_env(),
        }))),
    }
}

pub struct OpenAiAnalyst {
    client: OpenAiClient,
}

#[async_trait]
impl Analyst for OpenAiAnalyst {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, instructions: &str, input: &str) -> anyhow::Result<String> {
        tracing::debug!(model = %self.client.model(), "openai analysis request");
        self.client.respond_json(instructions, input).await
    }
}

#[derive(Debug, Clone)]
pub struct CodexConfig {
    pub bin: String,
    pub model: Option<String>,
}

impl CodexConfig {
    pub fn from_env() -> Self {
        let bin = std::env::var("TOPICBATCH_CODEX_BIN").unwrap_or_else(|_| "codex".to_owned());
        let model = std::env::var("TOPICBATCH_CODEX_MODEL").ok();
        Self { bin, model }
    }
}

pub struct CodexAnalyst {
    config: CodexConfig,
}

#[async_trait]
impl Analyst for CodexAnalyst {
    fn name(&self) -> &str {
        "codex"
    }

    async fn complete(&self, instructions: &str, input: &str) -> anyhow::Result<String> {
        let prompt = format!("{instructions}\n\nBEGIN_SCRIPT\n{input}\nEND_SCRIPT\n");
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || codex_exec(&prompt, &config))
            .await
            .context("join codex task")?
    }
}

fn codex_exec(prompt: &str, config: &CodexConfig) -> anyhow::Result<String> {
    let last_message = tempfile::NamedTempFile::new().context("create codex output temp file")?;

    let mut cmd = Command::new(&config.bin);
    if let Some(model) = config.model.as_deref() {
        cmd.args(["--model", model]);
    }
    cmd.args([
        "exec",
        "-",
        "--skip-git-repo-check",
        "--sandbox",
        "read-only",
        "--color",
        "never",
        "--output-last-message",
    ]);
    cmd.arg(last_message.path());

    tracing::debug!(bin = %config.bin, model = ?config.model, "codex analysis request");

    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("spawn codex: {}", config.bin))?;

    {
        let mut stdin = child.stdin.take().context("open codex stdin")?;
        stdin
            .write_all(prompt.as_bytes())
            .context("write codex stdin")?;
    }

    let status = child.wait().context("wait codex")?;
    if !status.success() {
        anyhow::bail!("codex failed ({status})");
    }

    std::fs::read_to_string(last_message.path()).context("read codex last message")
}
