//! Identity matcher: partitions patient records into duplicate groups.
//!
//! Two passes over the normalized keys:
//! 1. Strict pass - bucket by strict key; buckets of size >= 2 become
//!    candidate groups, rejected as ambiguous when members carry
//!    conflicting well-formed national ids.
//! 2. Loose pass - remaining singletons bucketed by compact key to catch
//!    run-together spacing variants, guarded by a word-boundary alignment
//!    check and a fuzzy-similarity threshold.

use std::collections::HashMap;

use strsim::{jaro_winkler, normalized_levenshtein};

use crate::models::{
    valid_national_id, DuplicateGroup, Finding, MatchConfidence, PatientIdentity,
};

use super::NameNormalizer;

/// Minimum combined similarity between loose keys for a loose-pass merge.
const MIN_LOOSE_SIMILARITY: f64 = 0.90;

/// Output of a matching run.
#[derive(Debug, Default)]
pub struct MatchReport {
    /// Accepted duplicate groups, canonical member chosen.
    pub groups: Vec<DuplicateGroup>,
    /// Same-name conflicts surfaced for manual review, never auto-merged.
    pub ambiguous: Vec<Finding>,
}

/// Identity matcher over normalized name keys.
pub struct IdentityMatcher {
    normalizer: NameNormalizer,
}

impl Default for IdentityMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityMatcher {
    pub fn new() -> Self {
        Self {
            normalizer: NameNormalizer::new(),
        }
    }

    pub fn with_normalizer(normalizer: NameNormalizer) -> Self {
        Self { normalizer }
    }

    pub fn normalizer(&self) -> &NameNormalizer {
        &self.normalizer
    }

    /// Partition identities into duplicate groups.
    ///
    /// `exam_counts` maps patient id to attached-exam count and feeds the
    /// canonical-member tie-break.
    pub fn find_duplicate_groups(
        &self,
        identities: &[PatientIdentity],
        exam_counts: &HashMap<String, usize>,
    ) -> MatchReport {
        let mut report = MatchReport::default();

        // Strict pass
        let mut strict_buckets: HashMap<String, Vec<&PatientIdentity>> = HashMap::new();
        for identity in identities {
            let key = self.normalizer.strict_key(&identity.display_name);
            if key.is_empty() {
                continue;
            }
            strict_buckets.entry(key).or_default().push(identity);
        }

        let mut singletons: Vec<&PatientIdentity> = Vec::new();
        let mut keys: Vec<&String> = strict_buckets.keys().collect();
        keys.sort();
        for key in keys {
            let members = &strict_buckets[key];
            if members.len() < 2 {
                singletons.push(members[0]);
                continue;
            }
            match self.accept_group(key, members, exam_counts, MatchConfidence::Strict) {
                Ok(group) => report.groups.push(group),
                Err(finding) => report.ambiguous.push(finding),
            }
        }

        // Loose pass over strict singletons: run-together spacing variants
        let mut compact_buckets: HashMap<String, Vec<&PatientIdentity>> = HashMap::new();
        for identity in singletons {
            let key = self.normalizer.compact_key(&identity.display_name);
            if key.is_empty() {
                continue;
            }
            compact_buckets.entry(key).or_default().push(identity);
        }

        let mut compact_keys: Vec<&String> = compact_buckets.keys().collect();
        compact_keys.sort();
        for key in compact_keys {
            let members = &compact_buckets[key];
            if members.len() < 2 {
                continue;
            }
            if !self.loose_variants_compatible(members) {
                continue;
            }
            match self.accept_group(key, members, exam_counts, MatchConfidence::Loose) {
                Ok(group) => report.groups.push(group),
                Err(finding) => report.ambiguous.push(finding),
            }
        }

        report
    }

    /// Accept a candidate bucket as a group, or reject it as ambiguous
    /// when members carry distinct well-formed national ids.
    fn accept_group(
        &self,
        key: &str,
        members: &[&PatientIdentity],
        exam_counts: &HashMap<String, usize>,
        confidence: MatchConfidence,
    ) -> Result<DuplicateGroup, Finding> {
        // Compare on the digit form so "529.982.247-25" and "52998224725"
        // count as the same identifier.
        let mut strong_ids: Vec<String> = members
            .iter()
            .filter_map(|m| m.national_id.as_deref())
            .filter(|id| valid_national_id(id))
            .map(|id| id.chars().filter(|c| c.is_ascii_digit()).collect())
            .collect();
        strong_ids.sort();
        strong_ids.dedup();

        if strong_ids.len() > 1 {
            return Err(Finding::AmbiguousIdentity {
                normalized_key: key.to_string(),
                patient_ids: members.iter().map(|m| m.id.clone()).collect(),
                national_ids: strong_ids,
            });
        }

        let canonical_id = pick_canonical(members, exam_counts);
        Ok(DuplicateGroup {
            normalized_key: key.to_string(),
            member_ids: members.iter().map(|m| m.id.clone()).collect(),
            canonical_id,
            confidence,
        })
    }

    /// Guard for the loose pass: every member pair must be a
    /// rearrangement-free spacing variant and clear the similarity
    /// threshold. Compact-key equality alone would also unite unrelated
    /// names that happen to share letters once spaces are dropped.
    fn loose_variants_compatible(&self, members: &[&PatientIdentity]) -> bool {
        for (i, a) in members.iter().enumerate() {
            for b in &members[i + 1..] {
                let loose_a = self.normalizer.loose_key(&a.display_name);
                let loose_b = self.normalizer.loose_key(&b.display_name);
                if !is_word_concatenation(&loose_a, &loose_b) {
                    return false;
                }
                if fuzzy_match(&loose_a, &loose_b) < MIN_LOOSE_SIMILARITY {
                    return false;
                }
            }
        }
        true
    }
}

/// Canonical member tie-break: source-system id presence, then attached
/// exam count, then earliest creation.
fn pick_canonical(members: &[&PatientIdentity], exam_counts: &HashMap<String, usize>) -> String {
    let mut sorted: Vec<&&PatientIdentity> = members.iter().collect();
    sorted.sort_by(|a, b| {
        let a_has_source = a.source_system_id.is_some();
        let b_has_source = b.source_system_id.is_some();
        b_has_source
            .cmp(&a_has_source)
            .then_with(|| {
                let a_exams = exam_counts.get(&a.id).copied().unwrap_or(0);
                let b_exams = exam_counts.get(&b.id).copied().unwrap_or(0);
                b_exams.cmp(&a_exams)
            })
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
    sorted[0].id.clone()
}

/// Whether one word sequence is the other with some adjacent words run
/// together - same letters in the same order, word boundaries of the
/// coarser split aligning with boundaries of the finer one.
fn is_word_concatenation(a: &str, b: &str) -> bool {
    let compact_a: String = a.split_whitespace().collect();
    let compact_b: String = b.split_whitespace().collect();
    if compact_a != compact_b {
        return false;
    }

    let boundaries = |s: &str| -> Vec<usize> {
        let mut offsets = Vec::new();
        let mut len = 0;
        for word in s.split_whitespace() {
            len += word.chars().count();
            offsets.push(len);
        }
        offsets
    };

    let bounds_a = boundaries(a);
    let bounds_b = boundaries(b);
    // Every boundary of the coarser split must appear in the finer one.
    let (coarse, fine) = if bounds_a.len() <= bounds_b.len() {
        (&bounds_a, &bounds_b)
    } else {
        (&bounds_b, &bounds_a)
    };
    coarse.iter().all(|offset| fine.contains(offset))
}

/// Combined fuzzy similarity, weighted toward Jaro-Winkler for its prefix
/// sensitivity.
fn fuzzy_match(a: &str, b: &str) -> f64 {
    let jw = jaro_winkler(a, b);
    let lev = normalized_levenshtein(a, b);
    jw * 0.6 + lev * 0.4
}
