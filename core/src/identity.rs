//! Comparable keys for food names and macro profiles, and the heuristics that
//! decide whether two records describe the same food.

use std::collections::{BTreeSet, HashSet};
use std::fmt::Write;

use sha2::{Digest, Sha256};

use crate::config::{FingerprintConfig, SimilarityPolicy};
use crate::models::Macros;

const FINGERPRINT_LEN: usize = 12;

const RAW_STATES: &[&str] = &["raw", "uncooked", "fresh"];
const COOKED_STATES: &[&str] = &["cooked", "boiled", "steamed", "roasted"];

/// Normalize a food name for comparison.
///
/// Lowercases, drops parenthetical spans, turns `,` `.` `-` into spaces and
/// collapses whitespace. Applying it twice gives the same result as once.
#[must_use]
pub fn canonicalize_name(name: &str) -> String {
    let lower = name.to_lowercase();
    let mut stripped = String::with_capacity(lower.len());
    let mut depth = 0usize;
    for c in lower.chars() {
        match c {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            ',' | '.' | '-' if depth == 0 => stripped.push(' '),
            _ if depth == 0 => stripped.push(c),
            _ => {}
        }
    }
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Coarse bucket hash of the four primary macros, using the default widths.
#[must_use]
pub fn macro_fingerprint(kcal: f64, protein: f64, carbs: f64, fat: f64) -> String {
    FingerprintConfig::default().fingerprint(&Macros::new(kcal, protein, carbs, fat))
}

impl FingerprintConfig {
    /// Bucket each macro by `round(value / width)` and hash the bucket tuple.
    /// Distinct foods may share a fingerprint; it is only a candidate filter.
    #[must_use]
    pub fn fingerprint(&self, macros: &Macros) -> String {
        let bucket = |value: f64, width: f64| -> i64 { (value / width).round() as i64 };
        let key = format!(
            "{}|{}|{}|{}",
            bucket(macros.kcal, self.kcal_bucket),
            bucket(macros.protein, self.macro_bucket),
            bucket(macros.carbs, self.macro_bucket),
            bucket(macros.fat, self.macro_bucket),
        );
        let digest = Sha256::digest(key.as_bytes());
        let mut hex = digest
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        hex.truncate(FINGERPRINT_LEN);
        hex
    }
}

fn token_set(canonical: &str) -> HashSet<&str> {
    canonical.split_whitespace().collect()
}

/// Jaccard similarity of the token sets of two canonical names.
#[must_use]
pub fn name_jaccard(canonical_a: &str, canonical_b: &str) -> f64 {
    let a = token_set(canonical_a);
    let b = token_set(canonical_b);
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    intersection as f64 / union as f64
}

/// `1 - mean relative difference` across the four macros. Each difference is
/// relative to the larger value, or 1 when both are below 1.
#[must_use]
pub fn nutrition_similarity(a: &Macros, b: &Macros) -> f64 {
    let rel = |x: f64, y: f64| (x - y).abs() / x.max(y).max(1.0);
    let total = rel(a.kcal, b.kcal)
        + rel(a.protein, b.protein)
        + rel(a.carbs, b.carbs)
        + rel(a.fat, b.fat);
    1.0 - total / 4.0
}

/// Duplicate heuristic with the default thresholds.
#[must_use]
pub fn is_likely_duplicate(name_a: &str, name_b: &str, macros_a: &Macros, macros_b: &Macros) -> bool {
    SimilarityPolicy::default().is_likely_duplicate(name_a, name_b, macros_a, macros_b)
}

impl SimilarityPolicy {
    /// Equal canonical names are always duplicates. Otherwise both the name
    /// overlap and the nutrition similarity must clear their thresholds.
    #[must_use]
    pub fn is_likely_duplicate(
        &self,
        name_a: &str,
        name_b: &str,
        macros_a: &Macros,
        macros_b: &Macros,
    ) -> bool {
        let a = canonicalize_name(name_a);
        let b = canonicalize_name(name_b);
        if a == b {
            return true;
        }
        name_jaccard(&a, &b) > self.name_jaccard_threshold
            && nutrition_similarity(macros_a, macros_b) > self.nutrition_threshold
    }
}

fn naive_number_variant(word: &str) -> String {
    if word.chars().count() > 3 && word.ends_with('s') {
        word[..word.len() - 1].to_string()
    } else {
        format!("{word}s")
    }
}

/// Secondary lookup strings for a food name.
///
/// Contains the canonical name, the lowercase original, per-word
/// singular/plural swaps, and preparation-state variants when the name does
/// not already mention a state. Every alias is longer than two characters.
#[must_use]
pub fn generate_aliases(name: &str) -> BTreeSet<String> {
    let canonical = canonicalize_name(name);
    let mut aliases = BTreeSet::new();
    aliases.insert(canonical.clone());
    aliases.insert(name.trim().to_lowercase());

    let words: Vec<&str> = canonical.split_whitespace().collect();
    for (i, word) in words.iter().enumerate() {
        let variant = naive_number_variant(word);
        let swapped: Vec<&str> = words
            .iter()
            .enumerate()
            .map(|(j, w)| if i == j { variant.as_str() } else { *w })
            .collect();
        aliases.insert(swapped.join(" "));
    }

    let mentions = |states: &[&str]| words.iter().any(|w| states.contains(w));
    if !words.is_empty() && !mentions(RAW_STATES) && !mentions(COOKED_STATES) {
        for state in RAW_STATES.iter().chain(COOKED_STATES) {
            aliases.insert(format!("{canonical} {state}"));
        }
    }

    aliases.retain(|a| a.chars().count() > 2);
    aliases
}
