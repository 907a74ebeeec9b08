pub mod dice;
pub mod planets;
pub mod service;

use crate::types::{ConnectionKind, EntryId, PlayerId, ScoreBreakdown};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub use service::{EvaluationError, EvaluationOrchestrator, EvaluationPayload, EvaluationResult};

/// Externally supplied scoring constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub baseline: u32,
    pub plausibility: PlausibilityTable,
    pub connection: ConnectionTable,
    pub priority_bonus: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlausibilityTable {
    /// Judge level that earns the full plausibility award
    pub target_level: u8,
    pub near_levels: Vec<u8>,
    pub exact_target: u32,
    pub near_target: u32,
    pub other: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTable {
    pub others: u32,
    #[serde(rename = "self")]
    pub own_entry: u32,
    pub none: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            baseline: 10,
            plausibility: PlausibilityTable {
                target_level: 3,
                near_levels: vec![2, 4],
                exact_target: 2,
                near_target: 1,
                other: 0,
            },
            connection: ConnectionTable {
                others: 3,
                own_entry: 1,
                none: 0,
            },
            priority_bonus: 15,
        }
    }
}

impl ScoringConfig {
    /// Load a scoring table from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read scoring config {}: {}", path.display(), e))?;
        serde_json::from_str(&raw)
            .map_err(|e| format!("Invalid scoring config {}: {}", path.display(), e))
    }

    pub fn plausibility_points(&self, level: u8) -> u32 {
        let table = &self.plausibility;
        if level == table.target_level {
            table.exact_target
        } else if table.near_levels.contains(&level) {
            table.near_target
        } else {
            table.other
        }
    }

    pub fn connection_points(&self, connection: ConnectionKind) -> u32 {
        match connection {
            ConnectionKind::Others => self.connection.others,
            ConnectionKind::OwnEntry => self.connection.own_entry,
            ConnectionKind::None => self.connection.none,
        }
    }
}

/// Judge assessment needed for scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreInput {
    /// Plausibility level assigned by the judge, not the dice band
    pub plausibility_level: u8,
    pub connection: ConnectionKind,
}

/// Points for one entry
pub fn compute_score(input: ScoreInput, priority_bonus: u32, config: &ScoringConfig) -> ScoreBreakdown {
    let baseline = config.baseline;
    let plausibility = config.plausibility_points(input.plausibility_level);
    let connection_score = config.connection_points(input.connection);

    ScoreBreakdown {
        baseline,
        plausibility,
        connection_score,
        priority_bonus,
        total: baseline + plausibility + connection_score + priority_bonus,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkStrength {
    Strong,
    Weak,
}

/// One judged link from a submission to an earlier entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryLink {
    pub entry_id: Option<EntryId>,
    pub strength: LinkStrength,
}

/// Resolve links into a single connection kind.
///
/// Precedence is OTHERS > SELF > NONE regardless of link order. Only STRONG
/// links to known entries count.
pub fn classify_connection(
    links: &[EntryLink],
    entry_authors: &HashMap<EntryId, PlayerId>,
    author: &str,
) -> ConnectionKind {
    let mut linked_own = false;
    for link in links.iter().filter(|l| l.strength == LinkStrength::Strong) {
        let Some(linked_author) = link.entry_id.as_ref().and_then(|id| entry_authors.get(id)) else {
            continue;
        };
        if linked_author != author {
            return ConnectionKind::Others;
        }
        linked_own = true;
    }

    if linked_own {
        ConnectionKind::OwnEntry
    } else {
        ConnectionKind::None
    }
}
