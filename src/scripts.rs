use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;

use crate::formats::{ScriptDocument, ScriptSection};

pub const DEFAULT_RUN_DIR_PREFIX: &str = "longform_";

const ARTIFACT_NAMES: &[&str] = &["script.json", "script.yaml", "script.yml"];

#[derive(Debug, Deserialize)]
struct ScriptArtifact {
    #[serde(default)]
    pipeline_id: Option<String>,
    title: String,
    sections: Vec<ScriptSection>,
}

/// Loads every run directory under `root` whose name starts with `prefix`.
///
/// Directories without a readable script artifact are skipped.
pub fn scan(root: &Path, prefix: &str) -> anyhow::Result<Vec<ScriptDocument>> {
    let mut run_dirs = Vec::new();
    for entry in std::fs::read_dir(root)
        .with_context(|| format!("read scripts root: {}", root.display()))?
    {
        let entry = entry.with_context(|| format!("read dir entry: {}", root.display()))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(prefix) {
            continue;
        }
        run_dirs.push(path);
    }
    run_dirs.sort();

    let mut scripts = Vec::new();
    for dir in &run_dirs {
        match load_script_dir(dir) {
            Ok(script) => scripts.push(script),
            Err(err) => {
                tracing::debug!(dir = %dir.display(), error = %format!("{err:#}"), "skipping run dir");
            }
        }
    }

    tracing::info!(
        root = %root.display(),
        run_dirs = run_dirs.len(),
        scripts = scripts.len(),
        "scripts: scanned"
    );
    Ok(scripts)
}

pub fn load_script_dir(dir: &Path) -> anyhow::Result<ScriptDocument> {
    let path = find_artifact(dir)
        .ok_or_else(|| anyhow::anyhow!("no script artifact in {}", dir.display()))?;
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("read script artifact: {}", path.display()))?;

    let artifact: ScriptArtifact = if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(&contents)
            .with_context(|| format!("parse script json: {}", path.display()))?
    } else {
        serde_yaml::from_str(&contents)
            .with_context(|| format!("parse script yaml: {}", path.display()))?
    };

    if artifact.sections.is_empty() {
        anyhow::bail!("script has no sections: {}", path.display());
    }

    let pipeline_id = match artifact.pipeline_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| dir.display().to_string()),
    };

    Ok(ScriptDocument {
        pipeline_id,
        title: artifact.title,
        sections: artifact.sections,
    })
}

fn find_artifact(dir: &Path) -> Option<PathBuf> {
    ARTIFACT_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}
