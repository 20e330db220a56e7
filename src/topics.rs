use anyhow::Context as _;
use async_trait::async_trait;
use serde::Deserialize;

use crate::analysis::{Analyst, analyst_for};
use crate::cli::LlmEngine;
use crate::formats::{EmotionalTrigger, HookStyle, ScriptDocument, ScriptSection, TopicDraft};

pub const MAX_TOPIC_CHARS: usize = 80;

const MIN_ANALYSIS_CHARS: usize = 200;
const MAX_ANALYSIS_CHARS: usize = 24_000;
const MIN_SENTENCE_CHARS: usize = 20;
const MAX_SENTENCE_CHARS: usize = 200;

struct SectionRule {
    name: &'static str,
    hook_style: HookStyle,
    emotional_trigger: EmotionalTrigger,
}

// Most shareable narrative sections first.
const SECTION_PRIORITY: &[SectionRule] = &[
    SectionRule {
        name: "hook",
        hook_style: HookStyle::ShockingStat,
        emotional_trigger: EmotionalTrigger::Shock,
    },
    SectionRule {
        name: "problem",
        hook_style: HookStyle::ProvocativeQuestion,
        emotional_trigger: EmotionalTrigger::Curiosity,
    },
    SectionRule {
        name: "agitation",
        hook_style: HookStyle::ToughLove,
        emotional_trigger: EmotionalTrigger::Fear,
    },
    SectionRule {
        name: "revelation",
        hook_style: HookStyle::Reframe,
        emotional_trigger: EmotionalTrigger::Curiosity,
    },
    SectionRule {
        name: "framework",
        hook_style: HookStyle::Contrast,
        emotional_trigger: EmotionalTrigger::Hope,
    },
    SectionRule {
        name: "story",
        hook_style: HookStyle::Reframe,
        emotional_trigger: EmotionalTrigger::Hope,
    },
    SectionRule {
        name: "solution",
        hook_style: HookStyle::Challenge,
        emotional_trigger: EmotionalTrigger::Hope,
    },
];

#[async_trait]
pub trait TopicExtractor: Send + Sync {
    fn strategy(&self) -> &str;
    async fn extract(&self, script: &ScriptDocument, max_per_episode: usize) -> Vec<TopicDraft>;
}

/// Picks the extractor for `engine`, falling back to the heuristic when the
/// model collaborator cannot be configured.
pub fn extractor_for(engine: LlmEngine) -> Box<dyn TopicExtractor> {
    match analyst_for(engine) {
        Ok(Some(analyst)) => Box::new(ModelExtractor::new(analyst)),
        Ok(None) => Box::new(HeuristicExtractor),
        Err(err) => {
            tracing::warn!(
                engine = ?engine,
                error = %format!("{err:#}"),
                "model analysis unavailable; using heuristic extraction"
            );
            Box::new(HeuristicExtractor)
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicExtractor;

#[async_trait]
impl TopicExtractor for HeuristicExtractor {
    fn strategy(&self) -> &str {
        "heuristic"
    }

    async fn extract(&self, script: &ScriptDocument, max_per_episode: usize) -> Vec<TopicDraft> {
        extract_heuristic(script, max_per_episode)
    }
}

/// Deterministic extraction: one topic per prioritized section, taken from
/// its longest sentence and scored by the section's rank.
pub fn extract_heuristic(script: &ScriptDocument, max_per_episode: usize) -> Vec<TopicDraft> {
    let mut drafts = Vec::new();
    let mut first_present = None;

    for (rank, rule) in SECTION_PRIORITY.iter().enumerate() {
        let Some(section) = script
            .sections
            .iter()
            .find(|s| normalize_section_name(&s.section_name) == rule.name)
        else {
            continue;
        };
        if first_present.is_none() {
            first_present = Some((rank, rule, section));
        }

        let Some(sentence) = longest_sentence(&section.text) else {
            continue;
        };
        drafts.push(heuristic_draft(script, section, rule, rank, sentence));
    }

    // Sections present but too thin to quote: still yield the top one.
    if drafts.is_empty()
        && let Some((rank, rule, section)) = first_present
    {
        let insight = if script.title.trim().is_empty() {
            section.section_name.trim()
        } else {
            script.title.trim()
        };
        drafts.push(heuristic_draft(script, section, rule, rank, insight));
    }

    rank_and_truncate(&mut drafts, max_per_episode);
    drafts
}

fn heuristic_draft(
    script: &ScriptDocument,
    section: &ScriptSection,
    rule: &SectionRule,
    rank: usize,
    insight: &str,
) -> TopicDraft {
    TopicDraft {
        topic: clip_title(insight, MAX_TOPIC_CHARS),
        source_section: section.section_name.clone(),
        key_insight: insight.to_owned(),
        hook_style: rule.hook_style,
        emotional_trigger: rule.emotional_trigger,
        viral_score: score_for_rank(rank),
        source_pipeline_id: script.pipeline_id.clone(),
        source_title: script.title.clone(),
    }
}

fn score_for_rank(rank: usize) -> u8 {
    10u8.saturating_sub(rank.min(9) as u8).max(1)
}

fn normalize_section_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|ch| if ch == ' ' || ch == '-' { '_' } else { ch })
        .collect()
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        let end = idx + ch.len_utf8();
        let boundary = match ch {
            '\n' => true,
            '.' | '!' | '?' => chars.peek().is_none_or(|(_, next)| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            push_trimmed(&mut sentences, &text[start..end]);
            start = end;
        }
    }
    push_trimmed(&mut sentences, &text[start..]);

    sentences
}

fn push_trimmed<'a>(sentences: &mut Vec<&'a str>, candidate: &'a str) {
    let trimmed = candidate.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed);
    }
}

fn longest_sentence(text: &str) -> Option<&str> {
    let mut best: Option<(&str, usize)> = None;
    for sentence in split_sentences(text) {
        let len = sentence.chars().count();
        if !(MIN_SENTENCE_CHARS..=MAX_SENTENCE_CHARS).contains(&len) {
            continue;
        }
        if best.is_none_or(|(_, best_len)| len > best_len) {
            best = Some((sentence, len));
        }
    }
    best.map(|(sentence, _)| sentence)
}

/// Shortens `text` to at most `max_chars` characters, cutting on a word
/// boundary and marking the cut with `...`.
pub fn clip_title(text: &str, max_chars: usize) -> String {
    let text = text.trim().trim_end_matches('.').trim_end();
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }

    let head = text
        .chars()
        .take(max_chars.saturating_sub(3))
        .collect::<String>();
    let cut = match head.rfind(char::is_whitespace) {
        Some(pos) if pos > 0 => head[..pos].trim_end(),
        _ => head.as_str(),
    };
    format!("{cut}...")
}

fn rank_and_truncate(drafts: &mut Vec<TopicDraft>, max_per_episode: usize) {
    drafts.sort_by(|a, b| b.viral_score.cmp(&a.viral_score));
    drafts.truncate(max_per_episode);
}

pub struct ModelExtractor {
    analyst: Box<dyn Analyst>,
}

impl ModelExtractor {
    pub fn new(analyst: Box<dyn Analyst>) -> Self {
        Self { analyst }
    }

    async fn analyze(
        &self,
        script: &ScriptDocument,
        text: &str,
        max_per_episode: usize,
    ) -> anyhow::Result<Vec<TopicDraft>> {
        let input = truncate_chars(text, MAX_ANALYSIS_CHARS);
        let instructions = build_analysis_instructions(&script.title, max_per_episode);
        let raw = self
            .analyst
            .complete(&instructions, input)
            .await
            .with_context(|| format!("{} analysis", self.analyst.name()))?;
        parse_analysis(&raw, script, max_per_episode)
    }
}

#[async_trait]
impl TopicExtractor for ModelExtractor {
    fn strategy(&self) -> &str {
        self.analyst.name()
    }

    async fn extract(&self, script: &ScriptDocument, max_per_episode: usize) -> Vec<TopicDraft> {
        if max_per_episode == 0 {
            return Vec::new();
        }

        let text = script.tagged_text();
        if text.trim().chars().count() < MIN_ANALYSIS_CHARS {
            tracing::debug!(
                pipeline_id = %script.pipeline_id,
                "script too short for model analysis; using heuristic extraction"
            );
            return extract_heuristic(script, max_per_episode);
        }

        match self.analyze(script, &text, max_per_episode).await {
            Ok(drafts) => drafts,
            Err(err) => {
                tracing::warn!(
                    pipeline_id = %script.pipeline_id,
                    analyst = self.analyst.name(),
                    error = %format!("{err:#}"),
                    "model analysis rejected; using heuristic extraction"
                );
                extract_heuristic(script, max_per_episode)
            }
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn build_analysis_instructions(title: &str, max_per_episode: usize) -> String {
    format!(
        "You are a short-form video strategist.\n\
\n\
Task: Read the long-form script titled \"{title}\" (sections are tagged as [section_name]) \
and propose up to {max_per_episode} standalone short-form topics.\n\
\n\
Hard rules:\n\
- `topic`: a punchy title, at most {MAX_TOPIC_CHARS} characters.\n\
- `source_section`: the section name the topic comes from.\n\
- `key_insight`: one or two sentences.\n\
- `hook_style`: one of shocking-stat, provocative-question, contrast, reframe, challenge, tough-love.\n\
- `emotional_trigger`: one of curiosity, shock, fear, hope, anger.\n\
- `viral_score`: integer from 1 to 10.\n\
- Sort topics by `viral_score`, highest first.\n\
\n\
Output:\n\
- Output ONLY a single JSON object (no markdown fences, no commentary).\n\
- Schema:\n\
  {{\"topics\":[{{\"topic\":\"...\",\"source_section\":\"...\",\"key_insight\":\"...\",\"hook_style\":\"...\",\"emotional_trigger\":\"...\",\"viral_score\":8}}]}}\n"
    )
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    topics: Vec<AnalysisTopic>,
}

#[derive(Debug, Deserialize)]
struct AnalysisTopic {
    topic: String,
    source_section: String,
    key_insight: String,
    hook_style: HookStyle,
    emotional_trigger: EmotionalTrigger,
    viral_score: u8,
}

fn parse_analysis(
    raw: &str,
    script: &ScriptDocument,
    max_per_episode: usize,
) -> anyhow::Result<Vec<TopicDraft>> {
    let json = extract_json_object(raw).context("extract json object from analysis output")?;
    let response: AnalysisResponse =
        serde_json::from_str(json).context("parse analysis json")?;
    if response.topics.is_empty() {
        anyhow::bail!("analysis returned no topics");
    }

    let mut drafts = Vec::with_capacity(response.topics.len());
    for (idx, topic) in response.topics.into_iter().enumerate() {
        if !(1..=10).contains(&topic.viral_score) {
            anyhow::bail!(
                "topic {idx}: viral_score out of range: {}",
                topic.viral_score
            );
        }
        let title = clip_title(&topic.topic, MAX_TOPIC_CHARS);
        if title.is_empty() {
            anyhow::bail!("topic {idx}: empty topic");
        }
        if topic.key_insight.trim().is_empty() {
            anyhow::bail!("topic {idx}: empty key_insight");
        }
        let wanted = normalize_section_name(&topic.source_section);
        let Some(section) = script
            .sections
            .iter()
            .find(|s| normalize_section_name(&s.section_name) == wanted)
        else {
            anyhow::bail!(
                "topic {idx}: unknown source_section `{}`",
                topic.source_section.trim()
            );
        };

        drafts.push(TopicDraft {
            topic: title,
            source_section: section.section_name.clone(),
            key_insight: topic.key_insight.trim().to_owned(),
            hook_style: topic.hook_style,
            emotional_trigger: topic.emotional_trigger,
            viral_score: topic.viral_score,
            source_pipeline_id: script.pipeline_id.clone(),
            source_title: script.title.clone(),
        });
    }

    rank_and_truncate(&mut drafts, max_per_episode);
    Ok(drafts)
}

fn extract_json_object(text: &str) -> anyhow::Result<&str> {
    let start = text
        .find('{')
        .ok_or_else(|| anyhow::anyhow!("missing `{{`"))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| anyhow::anyhow!("missing `}}`"))?;
    if end <= start {
        anyhow::bail!("invalid json object span");
    }
    Ok(&text[start..=end])
}
