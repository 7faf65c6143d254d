use std::path::Path;
use std::sync::atomic::AtomicBool;

use anyhow::Result;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::db::Database;
use crate::error::SearchError;
use crate::grams::{GramsResolution, ParsedIngredientLine, resolve_grams};
use crate::identity::{canonicalize_name, name_jaccard, nutrition_similarity};
use crate::importer::{BulkImporter, ImportOptions, ImportSummary};
use crate::models::{ExternalFoodRecord, Food, FoodAlias, Macros};
use crate::normalize::RawNutritionRow;
use crate::search::{FoodSearcher, LocalSearch, SearchResponse};

/// External nutrition database lookup.
///
/// The CLI implements this with reqwest against USDA FoodData Central. Called
/// synchronously; async callers should invoke `FoodEngine` methods from a
/// blocking thread.
pub trait NutritionLookupProvider: Send + Sync {
    fn search_by_text(&self, query: &str) -> Result<Vec<ExternalFoodRecord>>;
}

/// Side-by-side comparison of two foods for the duplicate heuristic.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateCheck {
    pub canonical_a: String,
    pub canonical_b: String,
    pub fingerprint_a: String,
    pub fingerprint_b: String,
    pub name_jaccard: f64,
    pub nutrition_similarity: f64,
    pub likely_duplicate: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchedFood {
    pub id: i64,
    pub name: String,
    pub density_gml: Option<f64>,
}

/// Grams for an ingredient line, with the food it was resolved against.
#[derive(Debug, Clone, Serialize)]
pub struct GramsLookup {
    pub parsed: ParsedIngredientLine,
    pub food: Option<MatchedFood>,
    #[serde(flatten)]
    pub resolution: GramsResolution,
}

pub struct FoodEngine {
    db: Database,
    config: EngineConfig,
}

impl FoodEngine {
    pub fn new(db_path: &Path, config: EngineConfig) -> Result<Self> {
        let db = Database::open(db_path)?;
        Ok(Self::with_database(db, config))
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::with_database(db, EngineConfig::default()))
    }

    #[must_use]
    pub fn with_database(mut db: Database, config: EngineConfig) -> Self {
        db.set_fingerprint_config(config.fingerprint);
        Self { db, config }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    // --- Import ---

    pub fn import_batch(
        &self,
        rows: &[RawNutritionRow],
        options: &ImportOptions,
        cancel: Option<&AtomicBool>,
    ) -> ImportSummary {
        BulkImporter::new(&self.db, &self.config).import_with_cancel(rows, options, cancel)
    }

    /// Import options seeded from the engine's configured batch size.
    #[must_use]
    pub fn default_import_options(&self) -> ImportOptions {
        ImportOptions {
            batch_size: self.config.import.batch_size,
            ..ImportOptions::default()
        }
    }

    // --- Search ---

    pub fn search(
        &self,
        query: &str,
        provider: Option<&dyn NutritionLookupProvider>,
    ) -> Result<SearchResponse, SearchError> {
        FoodSearcher::new(&self.db, &self.config, provider).search(query)
    }

    /// First half of a search split around the external lookup, for callers
    /// that must not hold the engine while the provider runs. Pair with
    /// [`needs_backfill`](Self::needs_backfill) and
    /// [`finish_search`](Self::finish_search).
    pub fn begin_search(&self, query: &str) -> Result<LocalSearch, SearchError> {
        FoodSearcher::new(&self.db, &self.config, None).search_local_phase(query)
    }

    #[must_use]
    pub fn needs_backfill(&self, local: &LocalSearch) -> bool {
        FoodSearcher::new(&self.db, &self.config, None).needs_backfill(local)
    }

    pub fn finish_search(
        &self,
        local: LocalSearch,
        fetched: Option<Result<Vec<ExternalFoodRecord>>>,
    ) -> Result<SearchResponse, SearchError> {
        FoodSearcher::new(&self.db, &self.config, None).finish(local, fetched)
    }

    pub fn get_food(&self, id: i64) -> Result<Food> {
        self.db.get_food_by_id(id)
    }

    pub fn food_aliases(&self, id: i64) -> Result<Vec<FoodAlias>> {
        self.db.aliases_for(id)
    }

    pub fn count_foods(&self) -> Result<i64> {
        self.db.count_foods()
    }

    // --- Grams ---

    /// Resolve `parsed` against `food_id`, or against the best local match
    /// for the ingredient name when no id is given. Without any food only
    /// mass units resolve.
    pub fn resolve_line(
        &self,
        parsed: &ParsedIngredientLine,
        food_id: Option<i64>,
    ) -> Result<GramsLookup, SearchError> {
        let food = match food_id {
            Some(id) => Some(self.db.get_food_by_id(id)?),
            None if parsed.name.trim().chars().count() >= self.config.search.min_query_chars => {
                self.search(&parsed.name, None)?
                    .data
                    .into_iter()
                    .next()
                    .map(|c| c.food)
            }
            None => None,
        };

        let resolution = match &food {
            Some(f) => resolve_grams(parsed, f.density_gml, &f.serving_options),
            None => resolve_grams(parsed, None, &[]),
        };

        Ok(GramsLookup {
            parsed: parsed.clone(),
            food: food.map(|f| MatchedFood {
                id: f.id,
                name: f.name,
                density_gml: f.density_gml,
            }),
            resolution,
        })
    }

    // --- Identity ---

    #[must_use]
    pub fn compare_foods(
        &self,
        name_a: &str,
        macros_a: &Macros,
        name_b: &str,
        macros_b: &Macros,
    ) -> DuplicateCheck {
        let canonical_a = canonicalize_name(name_a);
        let canonical_b = canonicalize_name(name_b);
        DuplicateCheck {
            name_jaccard: name_jaccard(&canonical_a, &canonical_b),
            nutrition_similarity: nutrition_similarity(macros_a, macros_b),
            likely_duplicate: self
                .config
                .similarity
                .is_likely_duplicate(name_a, name_b, macros_a, macros_b),
            fingerprint_a: self.config.fingerprint.fingerprint(macros_a),
            fingerprint_b: self.config.fingerprint.fingerprint(macros_b),
            canonical_a,
            canonical_b,
        }
    }
}
