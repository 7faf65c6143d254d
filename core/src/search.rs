//! Free-text catalog search.
//!
//! A query is expanded into several variants (the whole query, the query
//! with brand phrases removed, and each adjacent token pair). Each variant is
//! searched independently, the hits are merged by id, scored and sorted. When
//! the catalog has too few hits the external database is queried and its
//! results are stored locally before ranking again.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, ScoringConfig};
use crate::db::Database;
use crate::error::SearchError;
use crate::grams::volume_unit_ml;
use crate::importer::default_servings;
use crate::models::{ExternalFoodRecord, Food, FoodSource, NewFood, ServingOption, Verification};
use crate::normalize::{RawNutritionRow, normalize_row};
use crate::service::NutritionLookupProvider;

pub const STOPWORDS: &[&str] = &[
    "the", "brand", "original", "classic", "natural", "organic", "fresh", "premium", "select",
    "choice", "best", "new", "improved", "light", "low", "fat", "free", "sugar", "diet", "zero",
    "calorie",
];

/// Multi-word brand names removed when building the brand-free variant.
/// Written in the token form produced by [`expand_query`].
const BRAND_PHRASES: &[&str] = &[
    "trader joes",
    "kirkland signature",
    "great value",
    "whole foods",
    "365 everyday value",
    "good and gather",
    "market pantry",
    "ben and jerrys",
    "bobs red mill",
    "king arthur",
    "land o lakes",
    "nature valley",
    "quaker oats",
    "uncle bens",
    "simply balanced",
];

const OZ_GRAMS: f64 = 28.35;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpandedQuery {
    pub original: String,
    pub no_brand: String,
    pub bigrams: Vec<String>,
    pub tokens: Vec<String>,
}

/// Expand a raw query into its search variants.
#[must_use]
pub fn expand_query(query: &str) -> ExpandedQuery {
    let original = query.trim().to_lowercase();
    let cleaned: String = original
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();
    let all_tokens: Vec<String> = cleaned.split_whitespace().map(str::to_string).collect();

    let filtered: Vec<String> = all_tokens
        .iter()
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .cloned()
        .collect();
    let tokens = if filtered.is_empty() {
        all_tokens
    } else {
        filtered
    };

    let no_brand = remove_brand_phrases(&tokens).join(" ");
    let bigrams = tokens
        .windows(2)
        .map(|pair| format!("{} {}", pair[0], pair[1]))
        .collect();

    ExpandedQuery {
        original,
        no_brand,
        bigrams,
        tokens,
    }
}

fn remove_brand_phrases(tokens: &[String]) -> Vec<String> {
    let phrases: Vec<Vec<&str>> = BRAND_PHRASES
        .iter()
        .map(|p| p.split_whitespace().collect())
        .collect();

    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    'outer: while i < tokens.len() {
        for phrase in &phrases {
            let end = i + phrase.len();
            if end <= tokens.len() && tokens[i..end].iter().zip(phrase).all(|(t, p)| t == p) {
                i = end;
                continue 'outer;
            }
        }
        out.push(tokens[i].clone());
        i += 1;
    }
    out
}

fn alnum_lower(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Relevance of `food` for `query`. Never negative.
#[must_use]
pub fn calculate_score(food: &Food, query: &ExpandedQuery, weights: &ScoringConfig) -> f64 {
    let name = food.name.to_lowercase();
    let brand = food
        .brand
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_lowercase();

    let mut score = 0.0;

    if !brand.is_empty() && query.original.contains(&brand) {
        score += weights.brand_match;
    }
    if query.bigrams.iter().any(|b| name.contains(b.as_str())) {
        score += weights.bigram_match;
    }
    if query
        .tokens
        .first()
        .is_some_and(|first| name.starts_with(first.as_str()))
    {
        score += weights.prefix_match;
    }

    let haystack = format!("{name} {brand}");
    // vacuously true when every token is a single character
    if query
        .tokens
        .iter()
        .filter(|t| t.chars().count() > 1)
        .all(|t| haystack.contains(t.as_str()))
    {
        score += weights.all_tokens_match;
    }

    let distance = strsim::levenshtein(&alnum_lower(&query.original), &alnum_lower(&name)) as f64;
    if weights.edit_distance_cap > 0.0 {
        score -= weights.edit_distance_penalty * (distance / weights.edit_distance_cap).min(1.0);
    }

    score.max(0.0)
}

/// Merge per-variant hit lists into one list keyed by id. The first
/// occurrence of an id wins and keeps its position.
#[must_use]
pub fn merge_candidates<I>(batches: I) -> Vec<Food>
where
    I: IntoIterator<Item = Vec<Food>>,
{
    let (merged, _) = batches.into_iter().flatten().fold(
        (Vec::new(), HashSet::new()),
        |(mut acc, mut seen): (Vec<Food>, HashSet<i64>), food| {
            if seen.insert(food.id) {
                acc.push(food);
            }
            (acc, seen)
        },
    );
    merged
}

/// Score scaled into `[0.01, 1]`; a zero score stays 0.
#[must_use]
pub fn display_confidence(score: f64, max_score: f64) -> f64 {
    if score <= 0.0 || max_score <= 0.0 {
        0.0
    } else {
        (score / max_score).clamp(0.01, 1.0)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// The food's own serving options followed by generic mass options and,
/// when the density is known, common volume measures. Labels are never
/// repeated.
#[must_use]
pub fn display_serving_options(food: &Food) -> Vec<ServingOption> {
    let mut options = food.serving_options.clone();

    let mut extra = vec![
        ServingOption::new("100 g", 100.0),
        ServingOption::new("1 oz", OZ_GRAMS),
    ];
    if let Some(density) = food.density_gml.filter(|d| *d > 0.0) {
        for unit in ["tbsp", "tsp", "cup"] {
            if let Some(ml) = volume_unit_ml(unit) {
                extra.push(ServingOption::new(&format!("1 {unit}"), round2(ml * density)));
            }
        }
    }

    for option in extra {
        if !options
            .iter()
            .any(|o| o.label.eq_ignore_ascii_case(&option.label))
        {
            options.push(option);
        }
    }
    options
}

/// A ranked search hit. Not persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RankedCandidate {
    #[serde(flatten)]
    pub food: Food,
    pub score: f64,
    pub confidence: f64,
    pub display_serving_options: Vec<ServingOption>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchSources {
    pub local: usize,
    pub external: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub success: bool,
    pub data: Vec<RankedCandidate>,
    pub sources: SearchSources,
}

/// Local hits for a validated query, before any external backfill.
#[derive(Debug, Clone)]
pub struct LocalSearch {
    query: String,
    expanded: ExpandedQuery,
    candidates: Vec<Food>,
}

impl LocalSearch {
    /// The trimmed query, as sent to the external database.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    #[must_use]
    pub fn local_count(&self) -> usize {
        self.candidates.len()
    }
}

pub struct FoodSearcher<'a> {
    db: &'a Database,
    config: &'a EngineConfig,
    provider: Option<&'a dyn NutritionLookupProvider>,
}

impl<'a> FoodSearcher<'a> {
    #[must_use]
    pub fn new(
        db: &'a Database,
        config: &'a EngineConfig,
        provider: Option<&'a dyn NutritionLookupProvider>,
    ) -> Self {
        Self {
            db,
            config,
            provider,
        }
    }

    pub fn search(&self, query: &str) -> Result<SearchResponse, SearchError> {
        let local = self.search_local_phase(query)?;
        let fetched = self
            .provider
            .filter(|_| self.needs_backfill(&local))
            .map(|provider| provider.search_by_text(local.query()));
        self.finish(local, fetched)
    }

    /// Validate and expand `query`, then collect local hits. No external
    /// call is made.
    pub fn search_local_phase(&self, query: &str) -> Result<LocalSearch, SearchError> {
        let trimmed = query.trim();
        let min_chars = self.config.search.min_query_chars;
        if trimmed.chars().count() < min_chars {
            return Err(SearchError::Validation(format!(
                "Query must be at least {min_chars} characters"
            )));
        }

        let expanded = expand_query(trimmed);
        let candidates = self.search_local(&expanded)?;
        Ok(LocalSearch {
            query: trimmed.to_string(),
            expanded,
            candidates,
        })
    }

    #[must_use]
    pub fn needs_backfill(&self, local: &LocalSearch) -> bool {
        local.candidates.len() < self.config.search.result_limit
    }

    /// Store `fetched` external records (if any), re-search and rank.
    /// A failed fetch is logged and the local hits are ranked alone.
    pub fn finish(
        &self,
        local: LocalSearch,
        fetched: Option<anyhow::Result<Vec<ExternalFoodRecord>>>,
    ) -> Result<SearchResponse, SearchError> {
        let LocalSearch {
            query,
            expanded,
            candidates,
        } = local;
        let local_count = candidates.len();
        let mut candidates = candidates;
        let mut external_count = 0;

        match fetched {
            Some(Ok(records)) => {
                let stored = self.store_external_records(&records);
                external_count = stored.len();
                let refreshed = self.search_local(&expanded)?;
                candidates = merge_candidates([refreshed, stored]);
            }
            Some(Err(e)) => {
                warn!(
                    event = "external_backfill_failed",
                    q = %query,
                    error = %format!("{e:#}"),
                    "external lookup failed, returning local results"
                );
            }
            None => {}
        }

        let data = self.rank(candidates, &expanded);

        let top = data.first();
        info!(
            event = "mapping_v2",
            q = %query,
            result_count = data.len(),
            top_id = top.map(|c| c.food.id),
            top_confidence = top.map(|c| c.confidence),
            "food search"
        );

        let sources = SearchSources {
            local: local_count,
            external: external_count,
            total: data.len(),
        };
        Ok(SearchResponse {
            success: true,
            data,
            sources,
        })
    }

    fn search_local(&self, query: &ExpandedQuery) -> anyhow::Result<Vec<Food>> {
        let mut variants: Vec<&str> = vec![query.original.as_str()];
        if !query.no_brand.is_empty() && query.no_brand != query.original {
            variants.push(query.no_brand.as_str());
        }
        for bigram in &query.bigrams {
            if !variants.contains(&bigram.as_str()) {
                variants.push(bigram.as_str());
            }
        }

        let limit = self.config.search.per_variant_limit;
        let batches = variants
            .iter()
            .map(|v| self.db.search_name_or_brand(v, limit))
            .collect::<anyhow::Result<Vec<_>>>()?;
        debug!(variants = ?variants, "searched query variants");
        Ok(merge_candidates(batches))
    }

    /// Upsert external records; failures are logged and skipped.
    fn store_external_records(&self, records: &[ExternalFoodRecord]) -> Vec<Food> {
        let mut stored = Vec::new();
        for record in records {
            let Some(row) = normalize_row(&RawNutritionRow::from(record)) else {
                debug!(external_id = %record.external_id, "external record rejected by normalizer");
                continue;
            };
            let new_food = NewFood {
                name: row.name,
                brand: row.brand,
                source: FoodSource::ExternalLive,
                verification: Verification::Unverified,
                external_id: Some(record.external_id.clone()),
                density_gml: row.density_gml,
                category_id: row.category_id,
                kcal_100g: row.kcal,
                protein_100g: row.protein,
                carbs_100g: row.carbs,
                fat_100g: row.fat,
                fiber_100g: row.fiber,
                sugar_100g: row.sugar,
                popularity: 0.0,
            };

            let food = match self.db.upsert_external_record(&record.external_id, &new_food) {
                Ok(food) => food,
                Err(e) => {
                    warn!(
                        event = "external_upsert_failed",
                        external_id = %record.external_id,
                        error = %format!("{e:#}"),
                        "failed to store external record"
                    );
                    continue;
                }
            };

            let food = match new_food.category_id.as_deref().map(default_servings) {
                Some(defaults) if !defaults.is_empty() => {
                    match self.db.add_missing_serving_options(food.id, &defaults) {
                        Ok(0) => food,
                        Ok(_) => self.db.get_food_by_id(food.id).unwrap_or(food),
                        Err(e) => {
                            warn!(
                                food_id = food.id,
                                error = %format!("{e:#}"),
                                "failed to add serving options to external record"
                            );
                            food
                        }
                    }
                }
                _ => food,
            };
            stored.push(food);
        }
        stored
    }

    fn rank(&self, candidates: Vec<Food>, query: &ExpandedQuery) -> Vec<RankedCandidate> {
        let weights = &self.config.scoring;
        let max_score = weights.max_score();

        let mut scored: Vec<(Food, f64)> = candidates
            .into_iter()
            .map(|food| {
                let score = calculate_score(&food, query, weights);
                (food, score)
            })
            .collect();
        // sort_by is stable, so equal scores keep merge order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(self.config.search.result_limit);

        scored
            .into_iter()
            .map(|(food, score)| RankedCandidate {
                display_serving_options: display_serving_options(&food),
                confidence: display_confidence(score, max_score),
                score,
                food,
            })
            .collect()
    }
}
