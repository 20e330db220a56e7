use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSection {
    pub section_name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptDocument {
    pub pipeline_id: String,
    pub title: String,
    pub sections: Vec<ScriptSection>,
}

impl ScriptDocument {
    /// All section text joined, each block tagged with its section name.
    pub fn tagged_text(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push_str(&format!(
                "[{}]\n{}\n\n",
                section.section_name,
                section.text.trim()
            ));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookStyle {
    ShockingStat,
    ProvocativeQuestion,
    Contrast,
    Reframe,
    Challenge,
    ToughLove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionalTrigger {
    Curiosity,
    Shock,
    Fear,
    Hope,
    Anger,
}

/// A topic as produced by an extractor, before the manifest numbers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicDraft {
    pub topic: String,
    pub source_section: String,
    pub key_insight: String,
    pub hook_style: HookStyle,
    pub emotional_trigger: EmotionalTrigger,
    pub viral_score: u8,
    pub source_pipeline_id: String,
    pub source_title: String,
}

impl TopicDraft {
    pub fn into_candidate(self, id: u32) -> TopicCandidate {
        TopicCandidate {
            id,
            topic: self.topic,
            source_section: self.source_section,
            key_insight: self.key_insight,
            hook_style: self.hook_style,
            emotional_trigger: self.emotional_trigger,
            viral_score: self.viral_score,
            source_pipeline_id: self.source_pipeline_id,
            source_title: self.source_title,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicCandidate {
    pub id: u32,
    pub topic: String,
    pub source_section: String,
    pub key_insight: String,
    pub hook_style: HookStyle,
    pub emotional_trigger: EmotionalTrigger,
    pub viral_score: u8,
    pub source_pipeline_id: String,
    pub source_title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub episodes_scanned: usize,
    pub topics_extracted: usize,
    pub avg_per_episode: f64,
}

impl ExtractionStats {
    pub fn compute(episodes_scanned: usize, topics_extracted: usize) -> Self {
        let avg_per_episode = if episodes_scanned == 0 {
            0.0
        } else {
            let avg = topics_extracted as f64 / episodes_scanned as f64;
            (avg * 10.0).round() / 10.0
        };
        Self {
            episodes_scanned,
            topics_extracted,
            avg_per_episode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchManifest {
    pub batch_name: String,
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub pipeline_kind: String,
    #[serde(default)]
    pub extraction_stats: ExtractionStats,
    pub topics: Vec<TopicCandidate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Skipped,
    Success,
    Failed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: u32,
    pub topic: String,
    pub status: ExecutionStatus,
    pub duration_seconds: f64,
    pub cost_usd: Option<f64>,
    pub invoked_pipeline_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn skipped(topic: &TopicCandidate) -> Self {
        Self {
            id: topic.id,
            topic: topic.topic.clone(),
            status: ExecutionStatus::Skipped,
            duration_seconds: 0.0,
            cost_usd: None,
            invoked_pipeline_id: None,
            reported_duration_seconds: None,
            exit_code: None,
            error: None,
            completed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Completed,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResults {
    pub batch_name: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub start_from_id: u32,
    pub total_topics: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_cost_usd: f64,
    #[serde(default)]
    pub unknown_cost_runs: usize,
    pub total_duration_seconds: f64,
    pub results: Vec<ExecutionRecord>,
}

impl BatchResults {
    pub fn new(batch_name: impl Into<String>, total_topics: usize, start_from_id: u32) -> Self {
        Self {
            batch_name: batch_name.into(),
            state: RunState::Running,
            started_at: Utc::now(),
            completed_at: None,
            start_from_id,
            total_topics,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            total_cost_usd: 0.0,
            unknown_cost_runs: 0,
            total_duration_seconds: 0.0,
            results: Vec::new(),
        }
    }

    /// Appends one record and folds it into the counters.
    ///
    /// Errors count towards `failed` so that
    /// `succeeded + failed + skipped == results.len()` holds after every call.
    pub fn record(&mut self, record: ExecutionRecord) {
        match record.status {
            ExecutionStatus::Skipped => self.skipped += 1,
            ExecutionStatus::Success => {
                self.succeeded += 1;
                self.total_duration_seconds += record.duration_seconds;
                match record.cost_usd {
                    Some(cost) => self.total_cost_usd += cost,
                    None => self.unknown_cost_runs += 1,
                }
            }
            ExecutionStatus::Failed | ExecutionStatus::Error => self.failed += 1,
        }
        self.results.push(record);
    }

    pub fn finish(&mut self, state: RunState) {
        self.state = state;
        self.completed_at = Some(Utc::now());
    }

    pub fn last_processed(&self) -> Option<&ExecutionRecord> {
        self.results
            .iter()
            .rev()
            .find(|r| r.status != ExecutionStatus::Skipped)
    }

    /// The id a follow-up pass should start from.
    pub fn next_resume_id(&self) -> u32 {
        let next = match self.last_processed() {
            Some(last)
                if self.state == RunState::Interrupted
                    && last.status != ExecutionStatus::Success =>
            {
                last.id
            }
            Some(last) => last.id.saturating_add(1),
            None => self.start_from_id,
        };
        next.max(self.start_from_id)
    }
}
