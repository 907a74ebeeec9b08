//! Entry judging and round summaries on top of a text-generation provider.

use super::{GenerateRequest, LlmError, LlmProvider};
use crate::scoring::{EntryLink, LinkStrength};
use crate::types::{CategoryDef, CategoryId, EntryId, PlayerId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Label expected for each plausibility level, index = level - 1
pub const PLAUSIBILITY_LABELS: [&str; 5] = ["IMPOSSIBLE", "UNLIKELY", "PLAUSIBLE", "LIKELY", "INEVITABLE"];

pub const RANKED_CATEGORY_COUNT: usize = 3;
pub const LINK_COUNT: usize = 3;
pub const VARIANT_COUNT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JudgeValidationError {
    #[error("judge response is not valid JSON: {0}")]
    Malformed(String),

    #[error("plausibility level {0} outside 1..=5")]
    LevelOutOfRange(u8),

    #[error("label {label} does not match plausibility level {level}")]
    LabelMismatch { level: u8, label: String },

    #[error("expected {expected} ranked categories, got {actual}")]
    CategoryCount { expected: usize, actual: usize },

    #[error("unknown category {0}")]
    UnknownCategory(String),

    #[error("category {0} ranked more than once")]
    DuplicateCategory(String),

    #[error("expected {expected} link judgments, got {actual}")]
    LinkCount { expected: usize, actual: usize },

    #[error("link references entry {0} which was not offered")]
    UnknownLinkedEntry(String),

    #[error("expected {expected} variants, got {actual}")]
    VariantCount { expected: usize, actual: usize },

    #[error("variant {0} is empty")]
    EmptyVariant(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error(transparent)]
    Provider(#[from] LlmError),

    #[error(transparent)]
    Validation(#[from] JudgeValidationError),
}

/// An earlier scored entry offered to the judge as link candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorEntry {
    pub entry_id: EntryId,
    pub player_id: PlayerId,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct JudgeRequest {
    pub submitted_text: String,
    pub prior_entries: Vec<PriorEntry>,
    pub categories: Vec<CategoryDef>,
}

/// Validated judge output
#[derive(Debug, Clone, PartialEq)]
pub struct Judgement {
    pub plausibility_level: u8,
    pub ranked_categories: Vec<CategoryId>,
    pub links: Vec<EntryLink>,
    pub band_variants: [String; 5],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLink {
    #[serde(default)]
    pub entry_id: Option<EntryId>,
    pub strength: LinkStrength,
}

/// Judge output exactly as the model returned it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawJudgement {
    pub plausibility_level: u8,
    pub plausibility_label: String,
    pub categories: Vec<CategoryId>,
    pub links: Vec<RawLink>,
    pub variants: Vec<String>,
}

impl RawJudgement {
    pub fn parse(text: &str) -> Result<Self, JudgeValidationError> {
        serde_json::from_str(strip_code_fences(text))
            .map_err(|e| JudgeValidationError::Malformed(e.to_string()))
    }

    /// Check the fixed response shape against what the judge was offered
    pub fn validate(self, request: &JudgeRequest) -> Result<Judgement, JudgeValidationError> {
        let level = self.plausibility_level;
        if !(1..=5).contains(&level) {
            return Err(JudgeValidationError::LevelOutOfRange(level));
        }
        let expected_label = PLAUSIBILITY_LABELS[usize::from(level) - 1];
        if !self.plausibility_label.trim().eq_ignore_ascii_case(expected_label) {
            return Err(JudgeValidationError::LabelMismatch {
                level,
                label: self.plausibility_label,
            });
        }

        if self.categories.len() != RANKED_CATEGORY_COUNT {
            return Err(JudgeValidationError::CategoryCount {
                expected: RANKED_CATEGORY_COUNT,
                actual: self.categories.len(),
            });
        }
        let mut seen = HashSet::new();
        for category in &self.categories {
            if !request.categories.iter().any(|c| &c.id == category) {
                return Err(JudgeValidationError::UnknownCategory(category.clone()));
            }
            if !seen.insert(category.as_str()) {
                return Err(JudgeValidationError::DuplicateCategory(category.clone()));
            }
        }

        if self.links.len() != LINK_COUNT {
            return Err(JudgeValidationError::LinkCount {
                expected: LINK_COUNT,
                actual: self.links.len(),
            });
        }
        for link in &self.links {
            if let Some(entry_id) = &link.entry_id {
                if !request.prior_entries.iter().any(|p| &p.entry_id == entry_id) {
                    return Err(JudgeValidationError::UnknownLinkedEntry(entry_id.clone()));
                }
            }
        }

        let variant_count = self.variants.len();
        let band_variants: [String; VARIANT_COUNT] =
            self.variants
                .try_into()
                .map_err(|_| JudgeValidationError::VariantCount {
                    expected: VARIANT_COUNT,
                    actual: variant_count,
                })?;
        if let Some(i) = band_variants.iter().position(|v| v.trim().is_empty()) {
            return Err(JudgeValidationError::EmptyVariant(i + 1));
        }

        Ok(Judgement {
            plausibility_level: level,
            ranked_categories: self.categories,
            links: self
                .links
                .into_iter()
                .map(|l| EntryLink {
                    entry_id: l.entry_id,
                    strength: l.strength,
                })
                .collect(),
            band_variants,
        })
    }
}

/// Strip a surrounding markdown code fence (```json ... ```), if any
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening line
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest.trim_start_matches("json"),
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryLine {
    pub display_name: String,
    pub text: String,
    pub outcome: String,
    pub points: u32,
}

#[derive(Debug, Clone)]
pub struct SummaryRequest {
    pub round_number: u32,
    pub lines: Vec<SummaryLine>,
}

#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, request: JudgeRequest) -> Result<Judgement, JudgeError>;

    /// Narrative recap of a finished round
    async fn summarize(&self, request: SummaryRequest) -> Result<String, LlmError>;
}

const JUDGE_SYSTEM_PROMPT: &str = r#"You judge entries in a collaborative future-history game.
Players write short events that might happen in the future of the solar system.

Answer with a single JSON object and nothing else:
{
  "plausibility_level": 1-5,
  "plausibility_label": "IMPOSSIBLE" | "UNLIKELY" | "PLAUSIBLE" | "LIKELY" | "INEVITABLE",
  "categories": [three distinct category ids, most relevant first],
  "links": [exactly three objects {"entry_id": id of an earlier entry or null, "strength": "STRONG" | "WEAK"}],
  "variants": [five retellings of the event, from the most disastrous outcome (1) to the most triumphant (5)]
}

The label must match the level (1 IMPOSSIBLE, 2 UNLIKELY, 3 PLAUSIBLE, 4 LIKELY, 5 INEVITABLE).
Only reference entry ids from the list of earlier entries. Use null when there is nothing to link."#;

const SUMMARY_SYSTEM_PROMPT: &str = "You are the chronicler of a future-history game. \
    Write a short, vivid recap (at most five sentences) of the events of the round, \
    mentioning the players by name. Plain prose, no lists, no headings.";

/// `Judge` backed by any text-generation provider
pub struct LlmJudge {
    provider: Arc<dyn LlmProvider>,
    timeout: Duration,
    max_tokens: u32,
}

impl LlmJudge {
    pub fn new(provider: Arc<dyn LlmProvider>, timeout: Duration, max_tokens: u32) -> Self {
        Self {
            provider,
            timeout,
            max_tokens,
        }
    }

    fn judge_prompt(request: &JudgeRequest) -> String {
        let mut prompt = String::from("Categories:\n");
        for category in &request.categories {
            prompt.push_str(&format!(
                "- {}: {} ({})\n",
                category.id, category.name, category.description
            ));
        }

        prompt.push_str("\nEarlier entries:\n");
        if request.prior_entries.is_empty() {
            prompt.push_str("(none)\n");
        }
        for prior in &request.prior_entries {
            prompt.push_str(&format!("- [{}] {}\n", prior.entry_id, prior.text));
        }

        prompt.push_str(&format!("\nNew entry:\n{}\n", request.submitted_text));
        prompt
    }

    fn summary_prompt(request: &SummaryRequest) -> String {
        let mut prompt = format!("Round {} events:\n", request.round_number);
        for line in &request.lines {
            prompt.push_str(&format!(
                "- {} wrote \"{}\". What happened: {} ({} points)\n",
                line.display_name, line.text, line.outcome, line.points
            ));
        }
        prompt
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn judge(&self, request: JudgeRequest) -> Result<Judgement, JudgeError> {
        let response = self
            .provider
            .generate(GenerateRequest {
                system_prompt: JUDGE_SYSTEM_PROMPT.to_string(),
                prompt: Self::judge_prompt(&request),
                json_mode: true,
                max_tokens: Some(self.max_tokens),
                timeout: self.timeout,
                model_override: None,
            })
            .await?;

        tracing::debug!(
            provider = %response.metadata.provider,
            model = %response.metadata.model,
            latency_ms = response.metadata.latency_ms,
            "Judge responded"
        );

        let judgement = RawJudgement::parse(&response.text)?.validate(&request)?;
        Ok(judgement)
    }

    async fn summarize(&self, request: SummaryRequest) -> Result<String, LlmError> {
        if request.lines.is_empty() {
            return Ok(format!("Round {} passed quietly. Nobody made history.", request.round_number));
        }

        let response = self
            .provider
            .generate(GenerateRequest {
                system_prompt: SUMMARY_SYSTEM_PROMPT.to_string(),
                prompt: Self::summary_prompt(&request),
                json_mode: false,
                max_tokens: Some(self.max_tokens),
                timeout: self.timeout,
                model_override: None,
            })
            .await?;

        if response.text.is_empty() {
            return Err(LlmError::ParseError("Empty summary".to_string()));
        }
        Ok(response.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerateResponse, LlmResult, ResponseMetadata};
    use crate::types::default_categories;
    use serde_json::json;
    use std::sync::Mutex;

    fn request() -> JudgeRequest {
        JudgeRequest {
            submitted_text: "Venus gets a floating city".to_string(),
            prior_entries: vec![PriorEntry {
                entry_id: "e1".to_string(),
                player_id: "p1".to_string(),
                text: "Cloud mining on Venus".to_string(),
            }],
            categories: default_categories(),
        }
    }

    fn valid_json() -> serde_json::Value {
        json!({
            "plausibility_level": 3,
            "plausibility_label": "PLAUSIBLE",
            "categories": ["venus", "mercury", "jupiter"],
            "links": [
                {"entry_id": "e1", "strength": "STRONG"},
                {"entry_id": null, "strength": "WEAK"},
                {"strength": "WEAK"}
            ],
            "variants": ["v1", "v2", "v3", "v4", "v5"]
        })
    }

    fn validate(value: serde_json::Value) -> Result<Judgement, JudgeValidationError> {
        RawJudgement::parse(&value.to_string())?.validate(&request())
    }

    #[test]
    fn test_valid_judgement() {
        let judgement = validate(valid_json()).unwrap();
        assert_eq!(judgement.plausibility_level, 3);
        assert_eq!(judgement.ranked_categories, ["venus", "mercury", "jupiter"]);
        assert_eq!(judgement.links[0].entry_id.as_deref(), Some("e1"));
        assert_eq!(judgement.links[0].strength, LinkStrength::Strong);
        assert_eq!(judgement.band_variants[4], "v5");
    }

    #[test]
    fn test_label_must_match_level() {
        let mut value = valid_json();
        value["plausibility_label"] = json!("LIKELY");
        assert!(matches!(
            validate(value),
            Err(JudgeValidationError::LabelMismatch { level: 3, .. })
        ));

        let mut value = valid_json();
        value["plausibility_level"] = json!(0);
        assert_eq!(validate(value), Err(JudgeValidationError::LevelOutOfRange(0)));
    }

    #[test]
    fn test_array_lengths_are_enforced() {
        let mut value = valid_json();
        value["categories"] = json!(["venus", "mercury"]);
        assert!(matches!(validate(value), Err(JudgeValidationError::CategoryCount { actual: 2, .. })));

        let mut value = valid_json();
        value["links"] = json!([{"entry_id": null, "strength": "WEAK"}]);
        assert!(matches!(validate(value), Err(JudgeValidationError::LinkCount { actual: 1, .. })));

        let mut value = valid_json();
        value["variants"] = json!(["v1", "v2", "v3", "v4"]);
        assert!(matches!(validate(value), Err(JudgeValidationError::VariantCount { actual: 4, .. })));
    }

    #[test]
    fn test_categories_links_and_variants_are_checked() {
        let mut value = valid_json();
        value["categories"] = json!(["venus", "pluto", "mars"]);
        assert_eq!(
            validate(value),
            Err(JudgeValidationError::UnknownCategory("pluto".to_string()))
        );

        let mut value = valid_json();
        value["categories"] = json!(["venus", "venus", "mars"]);
        assert_eq!(
            validate(value),
            Err(JudgeValidationError::DuplicateCategory("venus".to_string()))
        );

        let mut value = valid_json();
        value["links"][1] = json!({"entry_id": "e-other", "strength": "STRONG"});
        assert_eq!(
            validate(value),
            Err(JudgeValidationError::UnknownLinkedEntry("e-other".to_string()))
        );

        let mut value = valid_json();
        value["variants"][2] = json!("  ");
        assert_eq!(validate(value), Err(JudgeValidationError::EmptyVariant(3)));

        let mut value = valid_json();
        value["links"][0]["strength"] = json!("MEDIUM");
        assert!(matches!(validate(value), Err(JudgeValidationError::Malformed(_))));
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```  "), "{}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    struct ScriptedProvider {
        reply: String,
        seen: Mutex<Vec<GenerateRequest>>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(request);
            }
            Ok(GenerateResponse {
                text: self.reply.clone(),
                metadata: ResponseMetadata {
                    provider: "scripted".to_string(),
                    model: "test".to_string(),
                    tokens_used: None,
                    latency_ms: 1,
                },
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn test_llm_judge_parses_fenced_reply() {
        let provider = Arc::new(ScriptedProvider {
            reply: format!("```json\n{}\n```", valid_json()),
            seen: Mutex::new(Vec::new()),
        });
        let judge = LlmJudge::new(provider.clone(), Duration::from_secs(5), 800);

        let judgement = judge.judge(request()).await.unwrap();
        assert_eq!(judgement.plausibility_level, 3);

        let seen = provider.seen.lock().unwrap();
        assert!(seen[0].json_mode);
        assert!(seen[0].prompt.contains("[e1] Cloud mining on Venus"));
        assert!(seen[0].prompt.contains("Venus gets a floating city"));
    }

    #[tokio::test]
    async fn test_llm_judge_rejects_bad_shape() {
        let provider = Arc::new(ScriptedProvider {
            reply: "I think this is plausible!".to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let judge = LlmJudge::new(provider, Duration::from_secs(5), 800);
        assert!(matches!(
            judge.judge(request()).await,
            Err(JudgeError::Validation(JudgeValidationError::Malformed(_)))
        ));
    }

    #[tokio::test]
    async fn test_summary_of_empty_round_skips_provider() {
        let provider = Arc::new(ScriptedProvider {
            reply: "unused".to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let judge = LlmJudge::new(provider.clone(), Duration::from_secs(5), 800);
        let text = judge
            .summarize(SummaryRequest {
                round_number: 2,
                lines: Vec::new(),
            })
            .await
            .unwrap();
        assert!(text.contains("Round 2"));
        assert!(provider.seen.lock().unwrap().is_empty());
    }
}
