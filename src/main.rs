use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    topicbatch::logging::init().context("init logging")?;

    let cli = topicbatch::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        topicbatch::cli::Command::Extract(args) => {
            topicbatch::manifest::run(args).await.context("extract")?;
        }
        topicbatch::cli::Command::Execute(args) => {
            topicbatch::execute::run(args).await.context("execute")?;
        }
        topicbatch::cli::Command::Batch(args) => {
            topicbatch::batch::run(args).await.context("batch")?;
        }
        topicbatch::cli::Command::Status(args) => {
            topicbatch::status::run(args).context("status")?;
        }
    }

    Ok(())
}
