//! Priority planet tracking.
//!
//! Each player carries a frequency tally over the session's categories. After
//! every scored entry a new priority category is drawn uniformly from the
//! least-used half of the categories, skipping the one that was just held.
//!
//! Persisted state comes in two shapes:
//! - version 1: `{"version": 1, "tally": {..}, "previous_priority": .., "current_priority": ..}`
//! - legacy: `{"<category>": {"last_used_round": n}, ..}`
//!
//! Legacy state is migrated one way: counts reset to zero and both priority
//! fields are cleared. Recency data cannot be turned into frequencies, so it
//! is dropped.

use crate::types::CategoryId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PLANET_STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanetStateError {
    #[error("unrecognised planet state: {0}")]
    Malformed(String),

    #[error("planet state version {0} is newer than supported version {PLANET_STATE_VERSION}")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanetTallyState {
    #[serde(default = "current_version")]
    pub version: u32,
    pub tally: BTreeMap<CategoryId, u32>,
    pub previous_priority: Option<CategoryId>,
    pub current_priority: Option<CategoryId>,
}

fn current_version() -> u32 {
    PLANET_STATE_VERSION
}

impl Default for PlanetTallyState {
    fn default() -> Self {
        Self {
            version: PLANET_STATE_VERSION,
            tally: BTreeMap::new(),
            previous_priority: None,
            current_priority: None,
        }
    }
}

impl PlanetTallyState {
    /// Fresh state with every category at zero
    pub fn fresh(categories: &[CategoryId]) -> Self {
        let mut state = Self::default();
        state.backfill(categories);
        state
    }

    /// Make sure every known category has a count
    pub fn backfill(&mut self, categories: &[CategoryId]) {
        for category in categories {
            self.tally.entry(category.clone()).or_insert(0);
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LegacyCategoryUsage {
    #[serde(alias = "lastUsedRound")]
    pub last_used_round: Option<u32>,
}

/// Decoded persisted state, before migration
#[derive(Debug, Clone, PartialEq)]
pub enum StoredPlanetState {
    Empty,
    LegacyV0(BTreeMap<CategoryId, LegacyCategoryUsage>),
    TallyV1(PlanetTallyState),
}

const LEGACY_MARKERS: [&str; 2] = ["last_used_round", "lastUsedRound"];

/// Classify raw persisted bytes into one of the known shapes
pub fn decode_planet_state(raw: &serde_json::Value) -> Result<StoredPlanetState, PlanetStateError> {
    let object = match raw {
        serde_json::Value::Null => return Ok(StoredPlanetState::Empty),
        serde_json::Value::Object(map) => map,
        other => {
            return Err(PlanetStateError::Malformed(format!(
                "expected an object, got {other}"
            )))
        }
    };

    if object.is_empty() {
        return Ok(StoredPlanetState::Empty);
    }

    if object.contains_key("tally") {
        let state: PlanetTallyState = serde_json::from_value(raw.clone())
            .map_err(|e| PlanetStateError::Malformed(e.to_string()))?;
        if state.version > PLANET_STATE_VERSION {
            return Err(PlanetStateError::UnsupportedVersion(state.version));
        }
        return Ok(StoredPlanetState::TallyV1(state));
    }

    let looks_legacy = object.values().all(|value| {
        value
            .as_object()
            .is_some_and(|usage| LEGACY_MARKERS.iter().any(|m| usage.contains_key(*m)))
    });
    if looks_legacy {
        let usage = serde_json::from_value(raw.clone())
            .map_err(|e| PlanetStateError::Malformed(e.to_string()))?;
        return Ok(StoredPlanetState::LegacyV0(usage));
    }

    Err(PlanetStateError::Malformed(
        "neither a tally nor per-category usage".to_string(),
    ))
}

/// Bring any stored shape up to the current one, backfilled for `categories`
pub fn migrate_planet_state(stored: StoredPlanetState, categories: &[CategoryId]) -> PlanetTallyState {
    let mut state = match stored {
        StoredPlanetState::Empty => PlanetTallyState::default(),
        StoredPlanetState::TallyV1(state) => state,
        StoredPlanetState::LegacyV0(usage) => {
            tracing::info!(
                legacy_categories = usage.len(),
                "Migrating legacy planet usage to tally; recency data is discarded"
            );
            PlanetTallyState::default()
        }
    };
    state.version = PLANET_STATE_VERSION;
    state.backfill(categories);
    state
}

/// Decode and migrate in one step
pub fn load_planet_state(
    raw: &serde_json::Value,
    categories: &[CategoryId],
) -> Result<PlanetTallyState, PlanetStateError> {
    Ok(migrate_planet_state(decode_planet_state(raw)?, categories))
}

/// Draw the next priority category.
///
/// Categories are ordered by ascending count (ties keep catalogue order), the
/// first `ceil(n/2)` form the candidate set, and `previous` is removed from it
/// unless it is the only candidate.
pub fn select_priority_planet<R: Rng + ?Sized>(
    tally: &BTreeMap<CategoryId, u32>,
    categories: &[CategoryId],
    previous: Option<&str>,
    rng: &mut R,
) -> Option<CategoryId> {
    if categories.is_empty() {
        return None;
    }

    let mut ordered: Vec<(&CategoryId, u32)> = categories
        .iter()
        .map(|c| (c, tally.get(c).copied().unwrap_or(0)))
        .collect();
    ordered.sort_by_key(|(_, count)| *count);

    let half = categories.len().div_ceil(2).max(1);
    let lower_half: Vec<&CategoryId> = ordered.into_iter().take(half).map(|(c, _)| c).collect();

    let without_previous: Vec<&CategoryId> = lower_half
        .iter()
        .copied()
        .filter(|c| Some(c.as_str()) != previous)
        .collect();
    let candidates = if without_previous.is_empty() {
        lower_half
    } else {
        without_previous
    };

    let pick = rng.random_range(0..candidates.len());
    Some(candidates[pick].clone())
}

/// Outcome of applying one scored entry to a player's planet state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityOutcome {
    /// Priority held when the entry was scored
    pub priority_used: Option<CategoryId>,
    pub matched: bool,
    pub bonus: u32,
}

/// Apply one scored entry: settle the priority, award the bonus if any ranked
/// category matches it, count every ranked category, then rotate the priority.
pub fn apply_priority_scoring_and_usage<R: Rng + ?Sized>(
    state: &mut PlanetTallyState,
    ranked_categories: &[CategoryId],
    categories: &[CategoryId],
    priority_bonus: u32,
    rng: &mut R,
) -> PriorityOutcome {
    state.backfill(categories);

    if state.current_priority.is_none() {
        state.current_priority = select_priority_planet(
            &state.tally,
            categories,
            state.previous_priority.as_deref(),
            rng,
        );
    }

    let priority_used = state.current_priority.clone();
    let matched = priority_used
        .as_ref()
        .is_some_and(|p| ranked_categories.contains(p));

    for category in ranked_categories {
        *state.tally.entry(category.clone()).or_insert(0) += 1;
    }

    state.previous_priority = state.current_priority.take();
    state.current_priority = select_priority_planet(
        &state.tally,
        categories,
        state.previous_priority.as_deref(),
        rng,
    );

    PriorityOutcome {
        priority_used,
        matched,
        bonus: if matched { priority_bonus } else { 0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn categories(n: usize) -> Vec<CategoryId> {
        (0..n).map(|i| format!("c{i}")).collect()
    }

    #[test]
    fn test_decode_current_state() {
        let raw = json!({
            "version": 1,
            "tally": {"c0": 2, "c1": 0},
            "previous_priority": "c0",
            "current_priority": "c1"
        });
        match decode_planet_state(&raw).unwrap() {
            StoredPlanetState::TallyV1(state) => {
                assert_eq!(state.tally["c0"], 2);
                assert_eq!(state.current_priority.as_deref(), Some("c1"));
            }
            other => panic!("expected TallyV1, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_unversioned_tally_defaults_to_v1() {
        let raw = json!({"tally": {"c0": 1}, "previous_priority": null, "current_priority": null});
        let state = load_planet_state(&raw, &categories(2)).unwrap();
        assert_eq!(state.version, PLANET_STATE_VERSION);
        assert_eq!(state.tally["c0"], 1);
        assert_eq!(state.tally["c1"], 0);
    }

    #[test]
    fn test_legacy_state_migrates_with_reset() {
        let raw = json!({
            "c0": {"lastUsedRound": 3},
            "c1": {"last_used_round": null}
        });
        assert!(matches!(
            decode_planet_state(&raw).unwrap(),
            StoredPlanetState::LegacyV0(_)
        ));

        let cats = categories(3);
        let state = load_planet_state(&raw, &cats).unwrap();
        assert_eq!(state, PlanetTallyState::fresh(&cats));
        assert!(state.previous_priority.is_none());
        assert!(state.current_priority.is_none());
    }

    #[test]
    fn test_malformed_state_is_rejected() {
        assert!(decode_planet_state(&json!([1, 2])).is_err());
        assert!(decode_planet_state(&json!({"c0": 5})).is_err());
        assert_eq!(
            decode_planet_state(&json!({"version": 9, "tally": {}, "previous_priority": null, "current_priority": null})),
            Err(PlanetStateError::UnsupportedVersion(9))
        );
    }

    #[test]
    fn test_null_state_becomes_fresh() {
        let cats = categories(4);
        let state = load_planet_state(&serde_json::Value::Null, &cats).unwrap();
        assert_eq!(state.tally.len(), 4);
        assert!(state.tally.values().all(|c| *c == 0));
    }

    #[test]
    fn test_backfill_adds_new_categories() {
        let raw = json!({"version": 1, "tally": {"c0": 4}, "previous_priority": null, "current_priority": "c0"});
        let state = load_planet_state(&raw, &categories(3)).unwrap();
        assert_eq!(state.tally["c0"], 4);
        assert_eq!(state.tally["c2"], 0);
        assert_eq!(state.current_priority.as_deref(), Some("c0"));
    }

    #[test]
    fn test_selection_draws_from_lower_half() {
        let cats = categories(6);
        let tally: BTreeMap<_, _> = cats
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i as u32))
            .collect();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let pick = select_priority_planet(&tally, &cats, None, &mut rng).unwrap();
            assert!(["c0", "c1", "c2"].contains(&pick.as_str()), "picked {pick}");
        }
    }

    #[test]
    fn test_selection_never_repeats_previous() {
        let mut rng = StdRng::seed_from_u64(2);
        // From three categories up the lower half always has two members
        for n in 3..=7 {
            let cats = categories(n);
            let tally = BTreeMap::new();
            for previous in &cats {
                for _ in 0..50 {
                    let pick =
                        select_priority_planet(&tally, &cats, Some(previous), &mut rng).unwrap();
                    assert_ne!(&pick, previous, "n={n}");
                }
            }
        }
    }

    #[test]
    fn test_selection_falls_back_when_previous_is_only_candidate() {
        let cats = categories(1);
        let mut rng = StdRng::seed_from_u64(3);
        let pick = select_priority_planet(&BTreeMap::new(), &cats, Some("c0"), &mut rng);
        assert_eq!(pick.as_deref(), Some("c0"));

        // Three categories: lower half is two, excluding previous leaves one
        let cats = categories(3);
        let tally: BTreeMap<_, _> = [("c0".to_string(), 0), ("c1".to_string(), 5), ("c2".to_string(), 5)]
            .into_iter()
            .collect();
        let pick = select_priority_planet(&tally, &cats, Some("c0"), &mut rng).unwrap();
        assert_eq!(pick, "c1");
    }

    #[test]
    fn test_two_categories_alternate() {
        let cats = categories(2);
        let mut state = PlanetTallyState::fresh(&cats);
        state.current_priority = Some("c0".to_string());
        let mut rng = StdRng::seed_from_u64(4);
        let mut last = state.current_priority.clone();
        for _ in 0..10 {
            let ranked: Vec<CategoryId> = state.current_priority.iter().cloned().collect();
            apply_priority_scoring_and_usage(&mut state, &ranked, &cats, 15, &mut rng);
            let current = state.current_priority.clone();
            assert_ne!(current, last);
            last = current;
        }
    }

    #[test]
    fn test_empty_categories_select_nothing() {
        let mut rng = StdRng::seed_from_u64(5);
        assert!(select_priority_planet(&BTreeMap::new(), &[], None, &mut rng).is_none());
    }

    #[test]
    fn test_bonus_awarded_for_any_rank() {
        let cats = categories(6);
        let mut state = PlanetTallyState::fresh(&cats);
        state.current_priority = Some("c4".to_string());
        let mut rng = StdRng::seed_from_u64(6);

        let ranked = vec!["c1".to_string(), "c2".to_string(), "c4".to_string()];
        let outcome = apply_priority_scoring_and_usage(&mut state, &ranked, &cats, 15, &mut rng);

        assert!(outcome.matched);
        assert_eq!(outcome.bonus, 15);
        assert_eq!(outcome.priority_used.as_deref(), Some("c4"));
        assert_eq!(state.previous_priority.as_deref(), Some("c4"));
        assert_ne!(state.current_priority.as_deref(), Some("c4"));
        for c in &ranked {
            assert_eq!(state.tally[c], 1);
        }
        assert_eq!(state.tally["c0"], 0);
    }

    #[test]
    fn test_no_bonus_without_match() {
        let cats = categories(6);
        let mut state = PlanetTallyState::fresh(&cats);
        state.current_priority = Some("c5".to_string());
        let mut rng = StdRng::seed_from_u64(7);

        let ranked = vec!["c0".to_string()];
        let outcome = apply_priority_scoring_and_usage(&mut state, &ranked, &cats, 15, &mut rng);
        assert!(!outcome.matched);
        assert_eq!(outcome.bonus, 0);
    }

    #[test]
    fn test_missing_priority_is_selected_before_scoring() {
        let cats = categories(4);
        let mut state = PlanetTallyState::fresh(&cats);
        let mut rng = StdRng::seed_from_u64(8);

        let outcome = apply_priority_scoring_and_usage(&mut state, &[], &cats, 15, &mut rng);
        assert!(outcome.priority_used.is_some());
        assert_eq!(state.previous_priority, outcome.priority_used);
        assert!(state.current_priority.is_some());
    }

    #[test]
    fn test_tally_converges_when_players_chase_priority() {
        let cats = categories(8);
        let mut state = PlanetTallyState::fresh(&cats);
        let mut rng = StdRng::seed_from_u64(9);

        for _ in 0..800 {
            // Player always writes about their current priority
            let ranked: Vec<CategoryId> = state.current_priority.iter().cloned().collect();
            apply_priority_scoring_and_usage(&mut state, &ranked, &cats, 15, &mut rng);
        }

        let max = *state.tally.values().max().unwrap();
        let min = *state.tally.values().min().unwrap();
        assert!(min > 0, "some category starved: {:?}", state.tally);
        assert!(max - min <= 6, "spread too wide: {:?}", state.tally);
    }
}
