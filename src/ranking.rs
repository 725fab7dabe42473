use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Slot labels handed out to quests, in slot order. A label is assigned once
/// and never moves to another quest.
pub const LABEL_ALPHABET: [&str; 10] = ["A", "B", "C", "D", "E", "F", "G", "H", "I", "J"];

/// Number of quests committed for a quarter when the caller does not say.
pub const DEFAULT_COMMIT_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub label: String,
    pub title: String,
}

impl Candidate {
    #[cfg(test)]
    pub fn new(label: &str, title: &str) -> Self {
        Self {
            id: None,
            label: label.to_string(),
            title: title.to_string(),
        }
    }

    /// Unfilled slots take no part in comparison or ranking.
    pub fn is_filled(&self) -> bool {
        !self.title.trim().is_empty()
    }
}

/// Pair key (`"A-B"`) to winning label. One entry per unordered pair.
pub type Judgments = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinnerSide {
    First,
    Second,
}

impl WinnerSide {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "a" | "first" => Some(Self::First),
            "b" | "second" => Some(Self::Second),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedCandidate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub label: String,
    pub title: String,
    pub score: u32,
}

fn position_of(candidates: &[Candidate], label: &str) -> Option<usize> {
    candidates.iter().position(|c| c.label == label)
}

/// Canonical key for the unordered pair `{a, b}`: the candidate that comes
/// first in `candidates` (the matrix row) is written first.
pub fn canonical_key(candidates: &[Candidate], a: &str, b: &str) -> Option<String> {
    if a == b {
        return None;
    }
    let pa = position_of(candidates, a)?;
    let pb = position_of(candidates, b)?;
    if pa < pb {
        Some(format!("{}-{}", a, b))
    } else {
        Some(format!("{}-{}", b, a))
    }
}

/// The key a comparison between `a` and `b` would be stored under, or `None`
/// when the comparison is not allowed (self pair, unknown label, unfilled slot).
pub fn comparable_key(candidates: &[Candidate], a: &str, b: &str) -> Option<String> {
    let key = canonical_key(candidates, a, b)?;
    let both_filled = candidates
        .iter()
        .filter(|c| c.label == a || c.label == b)
        .all(Candidate::is_filled);
    if !both_filled {
        return None;
    }
    Some(key)
}

/// Returns `judgments` with the outcome of `label_a` vs `label_b` recorded.
/// Comparisons that are not allowed leave the map untouched.
pub fn record_judgment(
    candidates: &[Candidate],
    judgments: &Judgments,
    label_a: &str,
    label_b: &str,
    winner: WinnerSide,
) -> Judgments {
    let mut next = judgments.clone();
    let Some(key) = comparable_key(candidates, label_a, label_b) else {
        return next;
    };
    let winning_label = match winner {
        WinnerSide::First => label_a,
        WinnerSide::Second => label_b,
    };
    next.insert(key, winning_label.to_string());
    next
}

pub fn reset_judgments() -> Judgments {
    Judgments::new()
}

/// Scores filled candidates by judgments won and sorts them best first.
/// Ties keep candidate order. `None` when fewer than two slots are filled.
pub fn compute_ranking(
    candidates: &[Candidate],
    judgments: &Judgments,
) -> Option<Vec<RankedCandidate>> {
    let filled: Vec<&Candidate> = candidates.iter().filter(|c| c.is_filled()).collect();
    if filled.len() < 2 {
        return None;
    }

    let mut ranked: Vec<RankedCandidate> = filled
        .into_iter()
        .map(|c| RankedCandidate {
            id: c.id.clone(),
            label: c.label.clone(),
            title: c.title.clone(),
            score: judgments.values().filter(|w| **w == c.label).count() as u32,
        })
        .collect();
    // sort_by is stable.
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    Some(ranked)
}

pub fn top_k(ranking: &[RankedCandidate], k: usize) -> Vec<RankedCandidate> {
    ranking.iter().take(k).cloned().collect()
}

/// Share of possible pairs that have a judgment, in percent.
///
/// The denominator counts every slot, filled or not, while ranking only looks
/// at filled slots. A half-empty tournament therefore never reaches 100.
pub fn completion_percentage(candidates: &[Candidate], judgments: &Judgments) -> f64 {
    let n = candidates.len();
    if n < 2 {
        return 0.0;
    }
    let total_pairs = n * (n - 1) / 2;
    judgments.len() as f64 / total_pairs as f64 * 100.0
}
