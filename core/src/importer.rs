use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, ImportDedupPolicy};
use crate::db::{Database, is_unique_violation};
use crate::identity::{canonicalize_name, generate_aliases};
use crate::models::{FoodSource, Macros, NewFood, ServingOption, Verification};
use crate::normalize::{
    BRAND_FIELDS, ID_FIELDS, NAME_FIELDS, NormalizedRow, RawNutritionRow, normalize_row,
};
use crate::usda::{UsdaFood, usda_food_to_raw_row};

#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    pub dry_run: bool,
    pub batch_size: usize,
    pub skip_duplicates: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            batch_size: 100,
            skip_duplicates: true,
        }
    }
}

/// Counters for one import run. In a dry run `created` counts the rows that
/// would have been created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub created: usize,
    pub skipped: usize,
    pub errors: usize,
    pub dry_run: bool,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Created,
    Invalid,
    Duplicate,
}

/// Serving options attached to every newly imported food of a category.
#[must_use]
pub fn default_servings(category_id: &str) -> Vec<ServingOption> {
    let table: &[(&str, f64)] = match category_id {
        "oil" => &[("1 tbsp", 13.6), ("1 tsp", 4.5)],
        "flour" | "starch" => &[("1 cup", 120.0), ("1 tbsp", 8.0)],
        "whey" => &[("1 scoop", 32.0), ("1 tbsp", 8.0)],
        "liquid" => &[("1 cup", 240.0), ("1 tbsp", 15.0)],
        "grain" | "rice" => &[("1 cup", 185.0), ("1 tbsp", 12.0)],
        "oats" => &[("1 cup", 90.0), ("1 tbsp", 6.0)],
        "sugar" => &[("1 tbsp", 12.5), ("1 tsp", 4.2)],
        _ => &[],
    };
    table
        .iter()
        .map(|(label, grams)| ServingOption::new(label, *grams))
        .collect()
}

fn new_food_from_row(row: &NormalizedRow) -> NewFood {
    NewFood {
        name: row.name.clone(),
        brand: row.brand.clone(),
        source: FoodSource::CuratedBulkImport,
        verification: Verification::Verified,
        external_id: None,
        density_gml: row.density_gml,
        category_id: row.category_id.clone(),
        kcal_100g: row.kcal,
        protein_100g: row.protein,
        carbs_100g: row.carbs,
        fat_100g: row.fat,
        fiber_100g: row.fiber,
        sugar_100g: row.sugar,
        popularity: 1.0,
    }
}

/// Imports bulk nutrition rows into the catalog.
///
/// Rows and batches run strictly in order on the caller's thread. A failing
/// row is logged and counted; it never stops the run.
pub struct BulkImporter<'a> {
    db: &'a Database,
    dedup: ImportDedupPolicy,
    progress_every: usize,
}

impl<'a> BulkImporter<'a> {
    #[must_use]
    pub fn new(db: &'a Database, config: &EngineConfig) -> Self {
        Self {
            db,
            dedup: config.import_dedup,
            progress_every: config.import.progress_every_batches.max(1),
        }
    }

    pub fn import(&self, rows: &[RawNutritionRow], options: &ImportOptions) -> ImportSummary {
        self.import_with_cancel(rows, options, None)
    }

    /// Like [`import`](Self::import), but stops before the next row once
    /// `cancel` is set. Rows already written stay written.
    pub fn import_with_cancel(
        &self,
        rows: &[RawNutritionRow],
        options: &ImportOptions,
        cancel: Option<&AtomicBool>,
    ) -> ImportSummary {
        let batch_size = options.batch_size.max(1);
        let total_batches = rows.len().div_ceil(batch_size);
        let mut summary = ImportSummary {
            dry_run: options.dry_run,
            ..ImportSummary::default()
        };

        info!(
            event = "usda_import_start",
            total_rows = rows.len(),
            batch_size,
            total_batches,
            dry_run = options.dry_run,
            skip_duplicates = options.skip_duplicates,
            "starting bulk import"
        );

        // rows a dry run would have written, so later duplicates still skip
        let mut planned: Vec<(String, Macros)> = Vec::new();

        'batches: for (batch_idx, batch) in rows.chunks(batch_size).enumerate() {
            for raw in batch {
                if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                    summary.cancelled = true;
                    warn!(
                        event = "usda_import_cancelled",
                        batch = batch_idx + 1,
                        created = summary.created,
                        skipped = summary.skipped,
                        errors = summary.errors,
                        "bulk import cancelled"
                    );
                    break 'batches;
                }

                match self.import_row(raw, options, &mut planned) {
                    Ok(RowOutcome::Created) => summary.created += 1,
                    Ok(RowOutcome::Invalid | RowOutcome::Duplicate) => summary.skipped += 1,
                    Err(e) => {
                        summary.errors += 1;
                        warn!(
                            event = "usda_import_row_error",
                            row = %raw.label(),
                            error = %format!("{e:#}"),
                            "failed to import row"
                        );
                    }
                }
            }

            if (batch_idx + 1) % self.progress_every == 0 {
                info!(
                    event = "usda_import_progress",
                    batch = batch_idx + 1,
                    total_batches,
                    created = summary.created,
                    skipped = summary.skipped,
                    errors = summary.errors,
                    "bulk import progress"
                );
            }
        }

        info!(
            event = "usda_import_complete",
            created = summary.created,
            skipped = summary.skipped,
            errors = summary.errors,
            dry_run = summary.dry_run,
            cancelled = summary.cancelled,
            "bulk import finished"
        );

        summary
    }

    fn import_row(
        &self,
        raw: &RawNutritionRow,
        options: &ImportOptions,
        planned: &mut Vec<(String, Macros)>,
    ) -> Result<RowOutcome> {
        let Some(row) = normalize_row(raw) else {
            return Ok(RowOutcome::Invalid);
        };
        let canonical = canonicalize_name(&row.name);
        if canonical.is_empty() {
            return Ok(RowOutcome::Invalid);
        }
        let macros = Macros::new(row.kcal, row.protein, row.carbs, row.fat);

        if options.skip_duplicates {
            if planned
                .iter()
                .any(|(name, m)| *name == canonical || self.within_window(m, &macros))
            {
                debug!(row = %raw.label(), "skipping duplicate of an earlier row in this run");
                return Ok(RowOutcome::Duplicate);
            }

            let existing = self.db.find_by_exact_name_or_macro_range(
                &row.name,
                &macros,
                FoodSource::CuratedBulkImport,
                &self.dedup,
            )?;
            if let Some(existing) = existing {
                debug!(
                    row = %raw.label(),
                    existing_id = existing.id,
                    "skipping duplicate row"
                );
                return Ok(RowOutcome::Duplicate);
            }
        }

        if options.dry_run {
            planned.push((canonical, macros));
            return Ok(RowOutcome::Created);
        }

        let food = self.db.create_food_record(&new_food_from_row(&row))?;

        for alias in generate_aliases(&row.name) {
            if let Err(e) = self.db.create_alias(food.id, &alias) {
                log_secondary_write_error("alias", food.id, &alias, &e);
            }
        }

        if let Some(category) = row.category_id.as_deref() {
            for option in default_servings(category) {
                if let Err(e) = self
                    .db
                    .create_serving_option(food.id, &option.label, option.grams)
                {
                    log_secondary_write_error("serving_option", food.id, &option.label, &e);
                }
            }
        }

        Ok(RowOutcome::Created)
    }

    fn within_window(&self, a: &Macros, b: &Macros) -> bool {
        let k = self.dedup.kcal_tolerance;
        let m = self.dedup.macro_tolerance;
        (a.kcal - b.kcal).abs() <= k
            && (a.protein - b.protein).abs() <= m
            && (a.carbs - b.carbs).abs() <= m
            && (a.fat - b.fat).abs() <= m
    }
}

/// Run a one-off import of `rows` with the given configuration.
pub fn import_rows(
    db: &Database,
    rows: &[RawNutritionRow],
    options: &ImportOptions,
    config: &EngineConfig,
    cancel: Option<&AtomicBool>,
) -> ImportSummary {
    BulkImporter::new(db, config).import_with_cancel(rows, options, cancel)
}

/// Alias and serving writes never fail the row; duplicates are expected.
fn log_secondary_write_error(kind: &str, food_id: i64, value: &str, err: &anyhow::Error) {
    if is_unique_violation(err) {
        debug!(kind, food_id, value, "already exists");
    } else {
        warn!(
            event = "secondary_write_failed",
            kind,
            food_id,
            value,
            error = %format!("{err:#}"),
            "failed to attach to imported food"
        );
    }
}

/// Read raw rows from a CSV file with a header line. Records that cannot be
/// read at all become empty rows so the importer counts them as skipped.
pub fn parse_rows_csv<R: Read>(reader: R) -> Result<Vec<RawNutritionRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("Failed to read CSV headers")?.clone();
    if headers.is_empty() {
        bail!("CSV file has no header row");
    }

    let column = |names: &[&str]| headers.iter().position(|h| names.contains(&h));
    let id_col = column(ID_FIELDS);
    let name_col = column(NAME_FIELDS);
    let brand_col = column(BRAND_FIELDS);

    let mut rows = Vec::new();
    for (line_num, result) in rdr.records().enumerate() {
        let line = line_num + 2;
        let parsed = result
            .map_err(anyhow::Error::from)
            .and_then(|record| {
                let mut row: RawNutritionRow = record.deserialize(Some(&headers))?;
                // csv infers numbers from text like "09040"; keep the field as written
                row.id = csv_text(&record, id_col).or(row.id);
                row.name = csv_text(&record, name_col).or(row.name);
                row.brand = csv_text(&record, brand_col).or(row.brand);
                Ok(row)
            });
        match parsed {
            Ok(row) => rows.push(row),
            Err(e) => {
                warn!(line, error = %e, "unreadable CSV record");
                rows.push(RawNutritionRow {
                    id: Some(format!("line {line}")),
                    ..RawNutritionRow::default()
                });
            }
        }
    }
    Ok(rows)
}

fn csv_text(record: &csv::StringRecord, column: Option<usize>) -> Option<String> {
    column
        .and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Read raw rows from JSON: either an array of row objects, or a USDA
/// FoodData Central download (an object holding a `...Foods` array).
pub fn parse_rows_json<R: Read>(reader: R) -> Result<Vec<RawNutritionRow>> {
    let value: Value = serde_json::from_reader(reader).context("Failed to parse JSON input")?;
    match value {
        Value::Array(items) => Ok(items.into_iter().map(raw_row_from_value).collect()),
        Value::Object(map) => {
            let Some((key, Value::Array(items))) = map
                .into_iter()
                .find(|(k, v)| k.ends_with("Foods") && v.is_array())
            else {
                bail!("JSON object has no '...Foods' array");
            };
            debug!(key = %key, count = items.len(), "reading USDA download");
            Ok(items
                .into_iter()
                .map(|item| match serde_json::from_value::<UsdaFood>(item) {
                    Ok(food) => usda_food_to_raw_row(&food),
                    Err(_) => RawNutritionRow::default(),
                })
                .collect())
        }
        _ => bail!("JSON input must be an array of rows or a USDA download object"),
    }
}

/// Lenient conversion of one JSON value; anything unreadable becomes an
/// empty row that the importer will skip.
#[must_use]
pub fn raw_row_from_value(value: Value) -> RawNutritionRow {
    serde_json::from_value(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str, calories: f64, protein: f64, carbs: f64, fat: f64) -> RawNutritionRow {
        RawNutritionRow {
            id: None,
            name: Some(name.to_string()),
            brand: None,
            calories: Some(calories),
            protein: Some(protein),
            carbs: Some(carbs),
            fat: Some(fat),
            fiber: None,
            sugar: None,
        }
    }

    fn importer(db: &Database) -> BulkImporter<'_> {
        BulkImporter::new(db, &EngineConfig::default())
    }

    #[test]
    fn test_dry_run_all_invalid() {
        let db = Database::open_in_memory().unwrap();
        let rows = vec![
            raw("Water", 0.0, 0.0, 0.0, 0.0),
            raw("Diet Soda", -1.0, 0.0, 0.0, 0.0),
            raw("Ice", 0.0, 0.0, 0.0, 0.0),
        ];
        let options = ImportOptions {
            dry_run: true,
            ..ImportOptions::default()
        };
        let summary = importer(&db).import(&rows, &options);
        assert_eq!(summary.created, 0);
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.errors, 0);
        assert!(summary.dry_run);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let rows = vec![raw("Banana", 89.0, 1.1, 22.8, 0.3)];
        let options = ImportOptions {
            dry_run: true,
            ..ImportOptions::default()
        };
        let summary = importer(&db).import(&rows, &options);
        assert_eq!(summary.created, 1);
        assert_eq!(db.count_foods().unwrap(), 0);
    }

    #[test]
    fn test_dry_run_counts_match_real_run() {
        let rows = vec![
            raw("Banana", 89.0, 1.1, 22.8, 0.3),
            raw("banana", 90.0, 1.0, 23.0, 0.3),
            raw("Cheddar cheese", 403.0, 24.9, 1.3, 33.1),
            raw("Sharp cheddar", 407.0, 23.5, 2.0, 34.0),
            raw("Olive oil", 884.0, 0.0, 0.0, 100.0),
        ];

        let dry_db = Database::open_in_memory().unwrap();
        let dry = importer(&dry_db).import(
            &rows,
            &ImportOptions {
                dry_run: true,
                ..ImportOptions::default()
            },
        );
        assert_eq!(dry_db.count_foods().unwrap(), 0);

        let real_db = Database::open_in_memory().unwrap();
        let real = importer(&real_db).import(&rows, &ImportOptions::default());

        assert_eq!((dry.created, dry.skipped), (3, 2));
        assert_eq!((dry.created, dry.skipped), (real.created, real.skipped));
    }

    #[test]
    fn test_second_import_skips_duplicate() {
        let db = Database::open_in_memory().unwrap();
        let rows = vec![raw("Chicken Breast, Grilled", 165.0, 31.0, 0.0, 3.6)];

        let first = importer(&db).import(&rows, &ImportOptions::default());
        assert_eq!(first.created, 1);
        assert_eq!(first.skipped, 0);

        let second = importer(&db).import(&rows, &ImportOptions::default());
        assert_eq!(second.created, 0);
        assert_eq!(second.skipped, 1);

        assert_eq!(db.count_foods().unwrap(), 1);
    }

    #[test]
    fn test_macro_window_duplicate() {
        let db = Database::open_in_memory().unwrap();
        let rows = vec![
            raw("Cheddar cheese", 403.0, 24.9, 1.3, 33.1),
            // Different name, macros within ±5 kcal / ±2 g
            raw("Sharp cheddar", 407.0, 23.5, 2.0, 34.0),
            // Outside the kcal window
            raw("Mild cheddar", 415.0, 24.9, 1.3, 33.1),
        ];
        let summary = importer(&db).import(&rows, &ImportOptions::default());
        assert_eq!(summary.created, 2);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn test_skip_duplicates_disabled() {
        let db = Database::open_in_memory().unwrap();
        let rows = vec![
            raw("Apple", 52.0, 0.3, 13.8, 0.2),
            raw("Apple", 52.0, 0.3, 13.8, 0.2),
        ];
        let options = ImportOptions {
            skip_duplicates: false,
            ..ImportOptions::default()
        };
        let summary = importer(&db).import(&rows, &options);
        assert_eq!(summary.created, 2);
        // Second row's aliases collide only with its own food id, so no errors
        assert_eq!(summary.errors, 0);
    }

    #[test]
    fn test_created_food_has_aliases_and_default_servings() {
        let db = Database::open_in_memory().unwrap();
        let rows = vec![raw("Olive Oil, Extra-Virgin", 884.0, 0.0, 0.0, 100.0)];
        let summary = importer(&db).import(&rows, &ImportOptions::default());
        assert_eq!(summary.created, 1);

        let food = &db.search_name_or_brand("olive", 10).unwrap()[0];
        assert_eq!(food.source, FoodSource::CuratedBulkImport);
        assert_eq!(food.verification, Verification::Verified);
        assert!((food.popularity - 1.0).abs() < f64::EPSILON);
        assert_eq!(food.density_gml, Some(0.91));
        assert_eq!(
            food.serving_options,
            vec![
                ServingOption::new("1 tbsp", 13.6),
                ServingOption::new("1 tsp", 4.5)
            ]
        );

        let aliases: Vec<String> = db
            .aliases_for(food.id)
            .unwrap()
            .into_iter()
            .map(|a| a.alias)
            .collect();
        assert!(aliases.contains(&"olive oil extra virgin".to_string()));
        assert!(aliases.contains(&"olive oil, extra-virgin".to_string()));
    }

    #[test]
    fn test_uncategorized_food_gets_no_servings() {
        let db = Database::open_in_memory().unwrap();
        let rows = vec![raw("Chicken thigh", 209.0, 26.0, 0.0, 10.9)];
        importer(&db).import(&rows, &ImportOptions::default());
        let food = &db.list_foods(10).unwrap()[0];
        assert!(food.serving_options.is_empty());
    }

    #[test]
    fn test_row_error_is_counted_and_run_continues() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .execute_batch(
                "CREATE TRIGGER reject_broken BEFORE INSERT ON foods
                 WHEN NEW.name = 'Broken'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();
        let rows = vec![
            raw("Pear", 57.0, 0.4, 15.2, 0.1),
            raw("Broken", 250.0, 10.0, 30.0, 9.0),
            raw("Plum", 46.0, 0.7, 11.4, 0.3),
        ];
        let summary = importer(&db).import(&rows, &ImportOptions::default());
        assert_eq!(summary.created, 2);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(db.count_foods().unwrap(), 2);
    }

    #[test]
    fn test_batches_cover_all_rows() {
        let db = Database::open_in_memory().unwrap();
        let rows: Vec<RawNutritionRow> = (0..25)
            .map(|i| raw(&format!("Food {i}"), 100.0 + f64::from(i) * 20.0, 1.0, 1.0, 1.0))
            .collect();
        let options = ImportOptions {
            batch_size: 4,
            ..ImportOptions::default()
        };
        let summary = importer(&db).import(&rows, &options);
        assert_eq!(summary.created, 25);
        assert_eq!(db.count_foods().unwrap(), 25);
    }

    #[test]
    fn test_cancel_before_start() {
        let db = Database::open_in_memory().unwrap();
        let rows = vec![raw("Banana", 89.0, 1.1, 22.8, 0.3)];
        let cancel = AtomicBool::new(true);
        let summary =
            importer(&db).import_with_cancel(&rows, &ImportOptions::default(), Some(&cancel));
        assert!(summary.cancelled);
        assert_eq!(summary.created, 0);
        assert_eq!(db.count_foods().unwrap(), 0);
    }

    #[test]
    fn test_default_servings_table() {
        assert_eq!(default_servings("whey")[0], ServingOption::new("1 scoop", 32.0));
        assert_eq!(default_servings("rice"), default_servings("grain"));
        assert_eq!(default_servings("starch"), default_servings("flour"));
        assert!(default_servings("meat").is_empty());
    }

    #[test]
    fn test_parse_rows_csv() {
        let csv = "\
fdc_id,description,energy_kcal,protein_g,carbohydrate,total_fat,fiber,sugars
171413,\"Oil, olive\",884,0,0,100,,
09040,Banana,89,1.09,22.84,0.33,2.6,12.23
,Water,0,0,0,0,,
";
        let rows = parse_rows_csv(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].name.as_deref(), Some("Oil, olive"));
        assert_eq!(rows[0].calories, Some(884.0));
        assert!(rows[0].fiber.is_none());
        assert_eq!(rows[1].sugar, Some(12.23));
        assert_eq!(rows[1].id.as_deref(), Some("09040"));
        assert_eq!(rows[0].id.as_deref(), Some("171413"));
        assert!(rows[2].id.is_none());
    }

    #[test]
    fn test_parse_rows_json_array() {
        let json = r#"[
            {"name": "Rolled oats", "calories": 379, "protein": 13.2, "carbs": 67.7, "fat": 6.5},
            {"name": "Nothing", "calories": "abc"},
            42
        ]"#;
        let rows = parse_rows_json(json.as_bytes()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].calories, Some(379.0));
        assert!(rows[1].calories.is_none());
        assert!(rows[2].name.is_none());
    }

    #[test]
    fn test_parse_rows_json_usda_download() {
        let json = r#"{"SRLegacyFoods": [{
            "fdcId": 171413,
            "description": "Oil, olive, salad or cooking",
            "foodNutrients": [{"nutrient": {"id": 1008, "number": "208"}, "amount": 884.0}]
        }]}"#;
        let rows = parse_rows_json(json.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].calories, Some(884.0));
        assert_eq!(rows[0].id.as_deref(), Some("171413"));
    }

    #[test]
    fn test_parse_rows_json_rejects_scalar() {
        assert!(parse_rows_json("\"hello\"".as_bytes()).is_err());
        assert!(parse_rows_json("{\"foods\": 1}".as_bytes()).is_err());
    }
}
