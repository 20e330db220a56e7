use std::path::Path;

use anyhow::Context as _;

use crate::checkpoint;
use crate::cli::StatusArgs;
use crate::engine::render_summary;
use crate::formats::{BatchResults, ExecutionStatus};
use crate::manifest::load_manifest;

pub fn run(args: StatusArgs) -> anyhow::Result<()> {
    let results_path = Path::new(&args.results);
    let results: BatchResults = checkpoint::read_json(results_path)?
        .ok_or_else(|| anyhow::anyhow!("results not found: {}", results_path.display()))?;

    print!("{}", render_summary(&results, results_path));
    println!("resume id:  {}", results.next_resume_id());

    if let Some(manifest) = args.manifest.as_deref() {
        let manifest = load_manifest(Path::new(manifest))
            .with_context(|| format!("load manifest: {manifest}"))?;
        let pending = pending_ids(&results, manifest.topics.iter().map(|t| t.id));
        println!("pending:    {}", pending.len());
    }

    Ok(())
}

/// Manifest ids with no processed record in `results`.
fn pending_ids(results: &BatchResults, manifest_ids: impl Iterator<Item = u32>) -> Vec<u32> {
    manifest_ids
        .filter(|id| {
            !results
                .results
                .iter()
                .any(|r| r.id == *id && r.status != ExecutionStatus::Skipped)
        })
        .collect()
}
