use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::Utc;

use crate::checkpoint;
use crate::cli::{ExtractArgs, SourceArgs};
use crate::formats::{BatchManifest, ExtractionStats, ScriptDocument};
use crate::scripts;
use crate::topics::{TopicExtractor, extractor_for};

#[derive(Debug, Clone)]
pub struct ManifestMeta {
    pub batch_name: String,
    pub source: String,
    pub pipeline_kind: String,
}

pub async fn run(args: ExtractArgs) -> anyhow::Result<BatchManifest> {
    let out_path = PathBuf::from(&args.manifest);
    if out_path.exists() && !args.force {
        anyhow::bail!(
            "manifest output already exists: {} (use --force to overwrite)",
            out_path.display()
        );
    }

    let (scripts, source) = load_scripts(&args.source)?;
    if scripts.is_empty() {
        anyhow::bail!(
            "no scripts found under {} (prefix `{}`)",
            args.source.scripts_root,
            args.source.prefix
        );
    }

    let extractor = extractor_for(args.source.engine);
    let meta = ManifestMeta {
        batch_name: args
            .source
            .batch_name
            .clone()
            .unwrap_or_else(default_batch_name),
        source,
        pipeline_kind: args.source.pipeline_kind.clone(),
    };
    let manifest = build_manifest(
        &scripts,
        extractor.as_ref(),
        usize::from(args.source.max_per_episode),
        meta,
    )
    .await;

    write_manifest(&out_path, &manifest)?;
    tracing::info!(
        manifest = %out_path.display(),
        strategy = extractor.strategy(),
        episodes = manifest.extraction_stats.episodes_scanned,
        topics = manifest.extraction_stats.topics_extracted,
        avg_per_episode = manifest.extraction_stats.avg_per_episode,
        "extract: manifest written"
    );
    Ok(manifest)
}

fn load_scripts(source: &SourceArgs) -> anyhow::Result<(Vec<ScriptDocument>, String)> {
    match source.script_dir.as_deref() {
        Some(dir) => {
            let script = scripts::load_script_dir(Path::new(dir))
                .with_context(|| format!("load script: {dir}"))?;
            Ok((vec![script], dir.to_owned()))
        }
        None => {
            let scripts = scripts::scan(Path::new(&source.scripts_root), &source.prefix)?;
            Ok((scripts, source.scripts_root.clone()))
        }
    }
}

fn default_batch_name() -> String {
    format!("batch_{}", Utc::now().format("%Y%m%d_%H%M%S"))
}

/// Extracts every script and numbers the combined topics from 1.
///
/// Topics are ordered by descending viral score; equal scores keep script
/// order, then per-script order.
pub async fn build_manifest(
    scripts: &[ScriptDocument],
    extractor: &dyn TopicExtractor,
    max_per_episode: usize,
    meta: ManifestMeta,
) -> BatchManifest {
    let mut drafts = Vec::new();
    for script in scripts {
        let extracted = extractor.extract(script, max_per_episode).await;
        tracing::info!(
            pipeline_id = %script.pipeline_id,
            title = %script.title,
            topics = extracted.len(),
            "extract: script"
        );
        drafts.extend(extracted);
    }
    drafts.sort_by(|a, b| b.viral_score.cmp(&a.viral_score));

    let topics = drafts
        .into_iter()
        .zip(1u32..)
        .map(|(draft, id)| draft.into_candidate(id))
        .collect::<Vec<_>>();

    BatchManifest {
        batch_name: meta.batch_name,
        created_at: Utc::now(),
        source: meta.source,
        pipeline_kind: meta.pipeline_kind,
        extraction_stats: ExtractionStats::compute(scripts.len(), topics.len()),
        topics,
    }
}

pub fn write_manifest(path: &Path, manifest: &BatchManifest) -> anyhow::Result<()> {
    checkpoint::write_json_atomic(path, manifest)
        .with_context(|| format!("write manifest: {}", path.display()))
}

/// Loads a manifest, tolerating hand-removed or reordered topics but not
/// duplicate ids. Topics come back in ascending id order.
pub fn load_manifest(path: &Path) -> anyhow::Result<BatchManifest> {
    let mut manifest: BatchManifest = checkpoint::read_json(path)?
        .ok_or_else(|| anyhow::anyhow!("manifest not found: {}", path.display()))?;

    let mut seen = HashSet::new();
    for topic in &manifest.topics {
        if !seen.insert(topic.id) {
            anyhow::bail!("duplicate topic id {} in manifest: {}", topic.id, path.display());
        }
    }
    if !manifest.topics.windows(2).all(|w| w[0].id < w[1].id) {
        tracing::debug!(manifest = %path.display(), "sorting manifest topics by id");
        manifest.topics.sort_by_key(|topic| topic.id);
    }

    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::ScriptSection;
    use crate::topics::HeuristicExtractor;

    fn script(pipeline_id: &str, sections: &[(&str, &str)]) -> ScriptDocument {
        ScriptDocument {
            pipeline_id: pipeline_id.to_owned(),
            title: format!("Episode {pipeline_id}"),
            sections: sections
                .iter()
                .map(|(name, text)| ScriptSection {
                    section_name: (*name).to_owned(),
                    text: (*text).to_owned(),
                })
                .collect(),
        }
    }

    fn meta() -> ManifestMeta {
        ManifestMeta {
            batch_name: "test_batch".to_owned(),
            source: "output".to_owned(),
            pipeline_kind: "short".to_owned(),
        }
    }

    fn corpus() -> Vec<ScriptDocument> {
        vec![
            script(
                "ep1",
                &[
                    ("problem", "Nobody tells you that rest is a skill you can practice."),
                    ("solution", "Block thirty minutes every evening for deliberate rest."),
                ],
            ),
            script(
                "ep2",
                &[
                    ("hook", "Eighty percent of burnout starts with a calendar problem."),
                    ("problem", "Meetings expand to fill whatever space you give them."),
                    ("framework", "Sort every task into protect, delegate, or delete today."),
                ],
            ),
        ]
    }

    #[tokio::test]
    async fn build_manifest_assigns_contiguous_global_ids() {
        let scripts = corpus();
        let manifest = build_manifest(&scripts, &HeuristicExtractor, 5, meta()).await;

        let ids = manifest.topics.iter().map(|t| t.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(manifest.extraction_stats.episodes_scanned, 2);
        assert_eq!(manifest.extraction_stats.topics_extracted, 5);
        assert!((manifest.extraction_stats.avg_per_episode - 2.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn build_manifest_orders_by_score_with_stable_ties() {
        let scripts = corpus();
        let manifest = build_manifest(&scripts, &HeuristicExtractor, 5, meta()).await;

        let order = manifest
            .topics
            .iter()
            .map(|t| (t.source_pipeline_id.as_str(), t.source_section.as_str(), t.viral_score))
            .collect::<Vec<_>>();
        assert_eq!(
            order,
            vec![
                ("ep2", "hook", 10),
                ("ep1", "problem", 9),
                ("ep2", "problem", 9),
                ("ep2", "framework", 6),
                ("ep1", "solution", 4),
            ]
        );
    }

    #[tokio::test]
    async fn build_manifest_respects_max_per_episode() {
        let scripts = corpus();
        let manifest = build_manifest(&scripts, &HeuristicExtractor, 1, meta()).await;
        assert_eq!(manifest.topics.len(), 2);
        assert_eq!(manifest.extraction_stats.avg_per_episode, 1.0);
    }

    #[tokio::test]
    async fn manifest_round_trips_through_disk() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("batch_manifest.json");
        let manifest = build_manifest(&corpus(), &HeuristicExtractor, 5, meta()).await;

        write_manifest(&path, &manifest)?;
        let loaded = load_manifest(&path)?;
        assert_eq!(loaded.batch_name, "test_batch");
        assert_eq!(loaded.topics, manifest.topics);
        Ok(())
    }

    #[test]
    fn load_manifest_accepts_hand_edits_but_rejects_duplicate_ids() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("m.json");
        let topic = |id: u32| {
            serde_json::json!({
                "id": id, "topic": "t", "source_section": "hook", "key_insight": "k",
                "hook_style": "contrast", "emotional_trigger": "hope", "viral_score": 5,
                "source_pipeline_id": "p", "source_title": "s"
            })
        };

        let edited = serde_json::json!({
            "batch_name": "b", "created_at": "2026-01-01T00:00:00Z", "source": "output",
            "pipeline_kind": "short", "topics": [topic(1), topic(3)]
        });
        std::fs::write(&path, serde_json::to_vec(&edited)?)?;
        let loaded = load_manifest(&path)?;
        assert_eq!(loaded.topics.len(), 2);

        let duplicated = serde_json::json!({
            "batch_name": "b", "created_at": "2026-01-01T00:00:00Z", "source": "output",
            "pipeline_kind": "short", "topics": [topic(1), topic(1)]
        });
        std::fs::write(&path, serde_json::to_vec(&duplicated)?)?;
        let err = load_manifest(&path).unwrap_err();
        assert!(format!("{err:#}").contains("duplicate topic id 1"));
        Ok(())
    }

    #[test]
    fn load_manifest_orders_reordered_topics_by_id() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("m.json");
        let topic = |id: u32| {
            serde_json::json!({
                "id": id, "topic": format!("t{id}"), "source_section": "hook", "key_insight": "k",
                "hook_style": "contrast", "emotional_trigger": "hope", "viral_score": 5,
                "source_pipeline_id": "p", "source_title": "s"
            })
        };
        let reordered = serde_json::json!({
            "batch_name": "b", "created_at": "2026-01-01T00:00:00Z", "source": "output",
            "pipeline_kind": "short", "topics": [topic(3), topic(1), topic(2)]
        });
        std::fs::write(&path, serde_json::to_vec(&reordered)?)?;

        let loaded = load_manifest(&path)?;
        let ids = loaded.topics.iter().map(|t| t.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(loaded.topics[0].topic, "t1");
        Ok(())
    }

    #[test]
    fn load_manifest_reports_missing_file() {
        let err = load_manifest(Path::new("/nonexistent/batch_manifest.json")).unwrap_err();
        assert!(format!("{err:#}").contains("manifest not found"));
    }
}
