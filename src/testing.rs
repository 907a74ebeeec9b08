//! Test doubles shared by unit tests.

use crate::llm::{Judge, JudgeError, JudgeRequest, Judgement, LlmError, SummaryRequest};
use crate::scoring::{EntryLink, LinkStrength};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Judge that always rates entries PLAUSIBLE, ranks the first three
/// categories offered and links strongly to the most recent prior entry
#[derive(Default)]
pub struct StubJudge {
    fail: bool,
    pub judge_calls: AtomicUsize,
}

impl StubJudge {
    pub fn failing() -> Self {
        Self {
            fail: true,
            judge_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Judge for StubJudge {
    async fn judge(&self, request: JudgeRequest) -> Result<Judgement, JudgeError> {
        self.judge_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(LlmError::ApiError("judge offline".to_string()).into());
        }

        let first_link = EntryLink {
            entry_id: request.prior_entries.first().map(|p| p.entry_id.clone()),
            strength: LinkStrength::Strong,
        };
        let weak = EntryLink {
            entry_id: None,
            strength: LinkStrength::Weak,
        };

        Ok(Judgement {
            plausibility_level: 3,
            ranked_categories: request.categories.iter().take(3).map(|c| c.id.clone()).collect(),
            links: vec![first_link, weak.clone(), weak],
            band_variants: [1, 2, 3, 4, 5].map(|band| format!("{} (band {band})", request.submitted_text)),
        })
    }

    async fn summarize(&self, request: SummaryRequest) -> Result<String, LlmError> {
        if self.fail {
            return Err(LlmError::Timeout(std::time::Duration::from_secs(30)));
        }
        let names: Vec<&str> = request.lines.iter().map(|l| l.display_name.as_str()).collect();
        Ok(format!("Round {}: {}", request.round_number, names.join(", ")))
    }
}
