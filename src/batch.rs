use anyhow::Context as _;

use crate::cli::{BatchArgs, ExtractArgs};
use crate::formats::BatchResults;

pub async fn run(args: BatchArgs) -> anyhow::Result<BatchResults> {
    tracing::info!(manifest = %args.manifest, "batch: extract");
    let manifest = crate::manifest::run(ExtractArgs {
        source: args.source.clone(),
        manifest: args.manifest.clone(),
        force: args.force,
    })
    .await
    .context("extract")?;

    if manifest.topics.is_empty() {
        anyhow::bail!("extraction produced no topics; nothing to execute");
    }

    tracing::info!(topics = manifest.topics.len(), "batch: execute");
    crate::execute::run_manifest(&manifest, &args.run)
        .await
        .context("execute")
}
