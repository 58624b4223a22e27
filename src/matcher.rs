//! Schema matcher.
//!
//! Proposes a one-to-one mapping from target headers to source headers.
//! Each pair gets a deterministic confidence score in `0..=100`:
//!
//! | Basis | Score |
//! |---|---|
//! | case-insensitive equality | 100 |
//! | equality after dropping separators and punctuation | 90 |
//! | every token of the shorter name found in the longer one, whole or abbreviated | 70–89 |
//! | normalized Levenshtein similarity of the compacted names | 0–69 |
//!
//! Assignment is greedy: the target with the strongest remaining candidate
//! claims it first, and a claimed source leaves the pool. Targets whose best
//! candidate falls below the threshold stay unmapped and are reported as
//! [`MappingGap`]s for manual resolution.

use std::collections::HashSet;

use log::{debug, warn};
use rapidfuzz::distance::levenshtein;
use serde::{Deserialize, Serialize};

use crate::{mapping::ColumnMapping, transform::string_ops};

pub const DEFAULT_MIN_CONFIDENCE: u8 = 50;

const EXACT_SCORE: u8 = 100;
const NORMALIZED_SCORE: u8 = 90;
const TOKEN_FLOOR: u8 = 70;
const TOKEN_SPAN: f64 = 19.0;
const EDIT_CEILING: f64 = 69.0;
/// Overlap credited per long token an acronym letter stands for.
const ACRONYM_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchOptions {
    /// Candidates scoring below this are never auto-assigned.
    pub min_confidence: u8,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchBasis {
    Exact,
    Normalized,
    TokenSubset,
    EditDistance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchScore {
    pub score: u8,
    pub basis: MatchBasis,
}

/// A target the matcher could not fill. `best_candidate` is the strongest
/// still-unclaimed source, offered as a hint for manual resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingGap {
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_candidate: Option<String>,
    pub best_score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchReport {
    /// One entry per target, in target order.
    pub mappings: Vec<ColumnMapping>,
    pub gaps: Vec<MappingGap>,
    pub unused_sources: Vec<String>,
}

impl MatchReport {
    pub fn mapped_count(&self) -> usize {
        self.mappings.iter().filter(|m| m.is_mapped()).count()
    }
}

pub fn score(source: &str, target: &str) -> MatchScore {
    if source.trim().to_lowercase() == target.trim().to_lowercase() {
        return MatchScore {
            score: EXACT_SCORE,
            basis: MatchBasis::Exact,
        };
    }
    let compact_source = string_ops::compact(source);
    let compact_target = string_ops::compact(target);
    if !compact_source.is_empty() && compact_source == compact_target {
        return MatchScore {
            score: NORMALIZED_SCORE,
            basis: MatchBasis::Normalized,
        };
    }
    if let Some(overlap) =
        token_overlap(&string_ops::tokens(source), &string_ops::tokens(target))
    {
        let score = TOKEN_FLOOR + (TOKEN_SPAN * overlap).round() as u8;
        return MatchScore {
            score: score.min(TOKEN_FLOOR + TOKEN_SPAN as u8),
            basis: MatchBasis::TokenSubset,
        };
    }
    let similarity = if compact_source.is_empty() || compact_target.is_empty() {
        0.0
    } else {
        levenshtein::normalized_similarity(compact_source.chars(), compact_target.chars())
    };
    MatchScore {
        score: (EDIT_CEILING * similarity.clamp(0.0, 1.0)).floor() as u8,
        basis: MatchBasis::EditDistance,
    }
}

/// Matches every token of the name with fewer tokens to a distinct token of
/// the other name: exactly, as an abbreviation (see [`abbreviates`]), or as
/// an acronym spanning consecutive tokens (`dob` for `date of birth`).
/// Returns the weighted overlap in `0.0..=1.0`, or `None` when some token has
/// no partner. Single-letter initials only count alongside at least one
/// exact token.
fn token_overlap(left: &[String], right: &[String]) -> Option<f64> {
    if left.is_empty() || right.is_empty() {
        return None;
    }
    let (short, long) = if left.len() <= right.len() {
        (left, right)
    } else {
        (right, left)
    };

    let mut claimed = vec![false; long.len()];
    let mut weights = vec![None; short.len()];
    for (idx, token) in short.iter().enumerate() {
        if let Some(pos) = (0..long.len()).find(|&pos| !claimed[pos] && long[pos] == *token) {
            claimed[pos] = true;
            weights[idx] = Some(1.0);
        }
    }
    let exact_hits = weights.iter().flatten().count();
    for (idx, token) in short.iter().enumerate() {
        if weights[idx].is_some() {
            continue;
        }
        let short_len = token.chars().count();
        if short_len < 2 && exact_hits == 0 {
            return None;
        }
        if let Some(pos) =
            (0..long.len()).find(|&pos| !claimed[pos] && abbreviates(token, &long[pos]))
        {
            claimed[pos] = true;
            let long_len = long[pos].chars().count();
            weights[idx] = Some(short_len.min(long_len) as f64 / short_len.max(long_len) as f64);
            continue;
        }
        let start = acronym_start(token, long, &claimed)?;
        claimed[start..start + short_len].fill(true);
        weights[idx] = Some(short_len as f64 * ACRONYM_WEIGHT);
    }

    let total: f64 = weights.iter().flatten().sum();
    Some(total / long.len() as f64)
}

/// True when the shorter of the two tokens abbreviates the longer one: a
/// prefix (`emp` for `employee`) or an in-order subsequence sharing the first
/// letter (`dept` for `department`, `mgr` for `manager`).
fn abbreviates(left: &str, right: &str) -> bool {
    let (abbr, word) = if left.chars().count() <= right.chars().count() {
        (left, right)
    } else {
        (right, left)
    };
    if word.starts_with(abbr) {
        return true;
    }
    let mut abbr_chars = abbr.chars();
    let mut word_chars = word.chars();
    match (abbr_chars.next(), word_chars.next()) {
        (Some(first), Some(lead)) if first == lead => {
            abbr_chars.all(|ch| word_chars.any(|candidate| candidate == ch))
        }
        _ => false,
    }
}

/// Position of the first run of unclaimed tokens whose initials spell `token`.
fn acronym_start(token: &str, long: &[String], claimed: &[bool]) -> Option<usize> {
    let width = token.chars().count();
    if width < 2 || width > long.len() {
        return None;
    }
    (0..=long.len() - width).find(|&start| {
        claimed[start..start + width].iter().all(|taken| !taken)
            && long[start..start + width]
                .iter()
                .zip(token.chars())
                .all(|(word, initial)| word.starts_with(initial))
    })
}

/// Proposes a mapping for `targets` drawn from `sources`.
pub fn match_headers(sources: &[String], targets: &[String], options: &MatchOptions) -> MatchReport {
    let sources = distinct(sources, "source");
    let targets = distinct(targets, "target");
    let matrix = targets
        .iter()
        .map(|target| {
            sources
                .iter()
                .map(|source| score(source, target))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let mut source_taken = vec![false; sources.len()];
    let mut assigned: Vec<Option<(usize, MatchScore)>> = vec![None; targets.len()];
    let mut pending = (0..targets.len()).collect::<Vec<_>>();

    loop {
        let mut best: Option<(usize, usize, u8)> = None;
        for (pos, &target_idx) in pending.iter().enumerate() {
            for (source_idx, taken) in source_taken.iter().enumerate() {
                if *taken {
                    continue;
                }
                let candidate = matrix[target_idx][source_idx].score;
                if best.is_none_or(|(_, _, current)| candidate > current) {
                    best = Some((pos, source_idx, candidate));
                }
            }
        }
        match best {
            Some((pos, source_idx, candidate)) if candidate >= options.min_confidence => {
                let target_idx = pending.remove(pos);
                source_taken[source_idx] = true;
                let chosen = matrix[target_idx][source_idx];
                debug!(
                    "Matched '{}' <- '{}' ({} via {:?})",
                    targets[target_idx], sources[source_idx], chosen.score, chosen.basis
                );
                assigned[target_idx] = Some((source_idx, chosen));
            }
            _ => break,
        }
    }

    let mut gaps = Vec::new();
    let mappings = targets
        .iter()
        .enumerate()
        .map(|(target_idx, target)| match assigned[target_idx] {
            Some((source_idx, chosen)) => {
                let mut mapping = ColumnMapping::unmapped(target.clone());
                mapping.source = Some(sources[source_idx].clone());
                mapping.confidence = chosen.score;
                mapping
            }
            None => {
                let hint = source_taken
                    .iter()
                    .enumerate()
                    .filter(|(_, taken)| !**taken)
                    .map(|(source_idx, _)| (source_idx, matrix[target_idx][source_idx].score))
                    .fold(None, |best: Option<(usize, u8)>, (idx, candidate)| match best {
                        Some((_, current)) if current >= candidate => best,
                        _ => Some((idx, candidate)),
                    });
                gaps.push(MappingGap {
                    target: target.clone(),
                    best_candidate: hint.map(|(idx, _)| sources[idx].clone()),
                    best_score: hint.map_or(0, |(_, candidate)| candidate),
                });
                ColumnMapping::unmapped(target.clone())
            }
        })
        .collect::<Vec<_>>();

    let unused_sources = sources
        .iter()
        .zip(&source_taken)
        .filter(|(_, taken)| !**taken)
        .map(|(source, _)| source.clone())
        .collect();

    MatchReport {
        mappings,
        gaps,
        unused_sources,
    }
}

/// Resolves a blueprint's saved mappings against incoming `sources`.
///
/// Saved entries whose source header is present keep it with confidence 100;
/// the rest are auto-matched against the sources nobody claimed. Saved
/// metadata (type, required flag, description, transformation) and entry
/// order are preserved.
pub fn resolve_saved(
    sources: &[String],
    saved: &[ColumnMapping],
    options: &MatchOptions,
) -> MatchReport {
    let available = sources.iter().map(String::as_str).collect::<HashSet<_>>();
    let mut claimed = HashSet::new();
    let mut resolved = saved.to_vec();
    let mut pending = Vec::new();

    for (idx, mapping) in resolved.iter_mut().enumerate() {
        match mapping.source.as_deref() {
            Some(source) if available.contains(source) && claimed.insert(source.to_string()) => {
                mapping.confidence = EXACT_SCORE;
            }
            other => {
                if let Some(missing) = other {
                    debug!(
                        "Saved source '{missing}' for '{}' is not available; re-matching",
                        mapping.target
                    );
                }
                mapping.source = None;
                mapping.confidence = 0;
                pending.push(idx);
            }
        }
    }

    let remaining_sources = sources
        .iter()
        .filter(|source| !claimed.contains(source.as_str()))
        .cloned()
        .collect::<Vec<_>>();
    let pending_targets = pending
        .iter()
        .map(|&idx| resolved[idx].target.clone())
        .collect::<Vec<_>>();
    let auto = match_headers(&remaining_sources, &pending_targets, options);
    for (&idx, proposal) in pending.iter().zip(auto.mappings) {
        resolved[idx].source = proposal.source;
        resolved[idx].confidence = proposal.confidence;
    }

    MatchReport {
        mappings: resolved,
        gaps: auto.gaps,
        unused_sources: auto.unused_sources,
    }
}

fn distinct(headers: &[String], role: &str) -> Vec<String> {
    let mut seen = HashSet::with_capacity(headers.len());
    let mut unique = Vec::with_capacity(headers.len());
    for header in headers {
        if seen.insert(header.as_str()) {
            unique.push(header.clone());
        } else {
            warn!("Ignoring duplicate {role} header '{header}'");
        }
    }
    unique
}
