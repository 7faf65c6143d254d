use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Local;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::config::{FingerprintConfig, ImportDedupPolicy};
use crate::identity::canonicalize_name;
use crate::models::{
    Food, FoodAlias, FoodSource, Macros, NewFood, ServingOption, Verification, validate_new_food,
};

const FOOD_COLUMNS: &str = "id, uuid, name, brand, source, verification, external_id, density_gml, \
     category_id, kcal_100g, protein_100g, carbs_100g, fat_100g, fiber_100g, sugar_100g, \
     popularity, fingerprint, created_at, updated_at";

/// Column for single-field substring lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    Name,
    Brand,
}

impl SearchField {
    fn column(self) -> &'static str {
        match self {
            Self::Name => "search_name",
            Self::Brand => "search_brand",
        }
    }
}

pub struct Database {
    conn: Connection,
    fingerprint: FingerprintConfig,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database {
            conn,
            fingerprint: FingerprintConfig::default(),
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database {
            conn,
            fingerprint: FingerprintConfig::default(),
        };
        db.migrate()?;
        Ok(db)
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Bucket widths used when computing fingerprints for new records.
    pub fn set_fingerprint_config(&mut self, config: FingerprintConfig) {
        self.fingerprint = config;
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS foods (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    canonical_name TEXT NOT NULL,
                    brand TEXT,
                    source TEXT NOT NULL,
                    verification TEXT NOT NULL,
                    external_id TEXT UNIQUE,
                    density_gml REAL,
                    category_id TEXT,
                    kcal_100g REAL NOT NULL CHECK (kcal_100g > 0),
                    protein_100g REAL NOT NULL CHECK (protein_100g >= 0),
                    carbs_100g REAL NOT NULL CHECK (carbs_100g >= 0),
                    fat_100g REAL NOT NULL CHECK (fat_100g >= 0),
                    fiber_100g REAL,
                    sugar_100g REAL,
                    popularity REAL NOT NULL DEFAULT 0,
                    fingerprint TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS food_aliases (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    food_id INTEGER NOT NULL REFERENCES foods(id) ON DELETE CASCADE,
                    alias TEXT NOT NULL,
                    UNIQUE (food_id, alias)
                );

                CREATE TABLE IF NOT EXISTS serving_options (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    food_id INTEGER NOT NULL REFERENCES foods(id) ON DELETE CASCADE,
                    label TEXT NOT NULL,
                    grams REAL NOT NULL CHECK (grams > 0),
                    position INTEGER NOT NULL,
                    UNIQUE (food_id, label)
                );

                CREATE INDEX IF NOT EXISTS idx_foods_name ON foods(name);
                CREATE INDEX IF NOT EXISTS idx_foods_canonical ON foods(canonical_name);
                CREATE INDEX IF NOT EXISTS idx_foods_fingerprint ON foods(fingerprint);
                CREATE INDEX IF NOT EXISTS idx_foods_source ON foods(source);
                CREATE INDEX IF NOT EXISTS idx_aliases_alias ON food_aliases(alias);

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            // LIKE only folds ASCII, so substring search runs on Rust-lowercased copies
            self.conn.execute_batch(
                "ALTER TABLE foods ADD COLUMN search_name TEXT NOT NULL DEFAULT '';
                 ALTER TABLE foods ADD COLUMN search_brand TEXT;
                 CREATE INDEX IF NOT EXISTS idx_foods_search_name ON foods(search_name);",
            )?;
            self.backfill_search_columns()?;
            self.conn.execute_batch("PRAGMA user_version = 2;")?;
        }

        Ok(())
    }

    fn backfill_search_columns(&self) -> Result<()> {
        let rows = {
            let mut stmt = self.conn.prepare("SELECT id, name, brand FROM foods")?;
            stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?
        };
        for (id, name, brand) in rows {
            self.conn.execute(
                "UPDATE foods SET search_name = ?1, search_brand = ?2 WHERE id = ?3",
                params![search_text(&name), brand.as_deref().map(search_text), id],
            )?;
        }
        Ok(())
    }

    // --- Row mapping helpers ---

    fn food_from_row(row: &rusqlite::Row) -> rusqlite::Result<Food> {
        let source: String = row.get(4)?;
        let verification: String = row.get(5)?;
        Ok(Food {
            id: row.get(0)?,
            uuid: row.get(1)?,
            name: row.get(2)?,
            brand: row.get(3)?,
            source: FoodSource::parse(&source).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
            })?,
            verification: Verification::parse(&verification).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into())
            })?,
            external_id: row.get(6)?,
            density_gml: row.get(7)?,
            category_id: row.get(8)?,
            kcal_100g: row.get(9)?,
            protein_100g: row.get(10)?,
            carbs_100g: row.get(11)?,
            fat_100g: row.get(12)?,
            fiber_100g: row.get(13)?,
            sugar_100g: row.get(14)?,
            popularity: row.get(15)?,
            fingerprint: row.get(16)?,
            serving_options: Vec::new(),
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
        })
    }

    fn with_serving_options(&self, mut foods: Vec<Food>) -> Result<Vec<Food>> {
        for food in &mut foods {
            food.serving_options = self.serving_options_for(food.id)?;
        }
        Ok(foods)
    }

    fn query_foods(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Food>> {
        let mut stmt = self.conn.prepare(sql)?;
        let foods = stmt
            .query_map(params, Self::food_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        self.with_serving_options(foods)
    }

    // --- Foods ---

    pub fn create_food_record(&self, food: &NewFood) -> Result<Food> {
        validate_new_food(food)?;
        let now = Local::now().to_rfc3339();
        let uuid = Uuid::new_v4().to_string();
        let fingerprint = self.fingerprint.fingerprint(&food.macros());
        self.conn.execute(
            "INSERT INTO foods (uuid, name, canonical_name, search_name, brand, search_brand, source,
                verification, external_id, density_gml, category_id, kcal_100g, protein_100g,
                carbs_100g, fat_100g, fiber_100g, sugar_100g, popularity, fingerprint, created_at,
                updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                ?18, ?19, ?20, ?21)",
            params![
                uuid,
                food.name.trim(),
                canonicalize_name(&food.name),
                search_text(&food.name),
                food.brand,
                food.brand.as_deref().map(search_text),
                food.source.as_str(),
                food.verification.as_str(),
                food.external_id,
                food.density_gml,
                food.category_id,
                food.kcal_100g,
                food.protein_100g,
                food.carbs_100g,
                food.fat_100g,
                food.fiber_100g,
                food.sugar_100g,
                food.popularity,
                fingerprint,
                now,
                now,
            ],
        )
        .with_context(|| format!("Failed to insert food '{}'", food.name))?;
        let id = self.conn.last_insert_rowid();
        self.get_food_by_id(id)
    }

    pub fn get_food_by_id(&self, id: i64) -> Result<Food> {
        self.find_food(id)?
            .with_context(|| format!("Food {id} not found"))
    }

    pub fn find_food(&self, id: i64) -> Result<Option<Food>> {
        let food = self
            .conn
            .query_row(
                &format!("SELECT {FOOD_COLUMNS} FROM foods WHERE id = ?1"),
                params![id],
                Self::food_from_row,
            )
            .optional()?;
        match food {
            Some(mut f) => {
                f.serving_options = self.serving_options_for(f.id)?;
                Ok(Some(f))
            }
            None => Ok(None),
        }
    }

    pub fn get_food_by_external_id(&self, external_id: &str) -> Result<Option<Food>> {
        let food = self
            .conn
            .query_row(
                &format!("SELECT {FOOD_COLUMNS} FROM foods WHERE external_id = ?1"),
                params![external_id],
                Self::food_from_row,
            )
            .optional()?;
        match food {
            Some(mut f) => {
                f.serving_options = self.serving_options_for(f.id)?;
                Ok(Some(f))
            }
            None => Ok(None),
        }
    }

    /// Find an existing record of `source` that either has the same canonical
    /// name or whose four macros all fall inside the policy's tolerance window.
    pub fn find_by_exact_name_or_macro_range(
        &self,
        name: &str,
        macros: &Macros,
        source: FoodSource,
        policy: &ImportDedupPolicy,
    ) -> Result<Option<Food>> {
        let canonical = canonicalize_name(name);
        let k = policy.kcal_tolerance;
        let m = policy.macro_tolerance;
        let food = self
            .conn
            .query_row(
                &format!(
                    "SELECT {FOOD_COLUMNS} FROM foods
                     WHERE source = ?1
                       AND (lower(canonical_name) = lower(?2)
                            OR (kcal_100g BETWEEN ?3 AND ?4
                                AND protein_100g BETWEEN ?5 AND ?6
                                AND carbs_100g BETWEEN ?7 AND ?8
                                AND fat_100g BETWEEN ?9 AND ?10))
                     ORDER BY id
                     LIMIT 1"
                ),
                params![
                    source.as_str(),
                    canonical,
                    macros.kcal - k,
                    macros.kcal + k,
                    macros.protein - m,
                    macros.protein + m,
                    macros.carbs - m,
                    macros.carbs + m,
                    macros.fat - m,
                    macros.fat + m,
                ],
                Self::food_from_row,
            )
            .optional()?;
        Ok(food)
    }

    fn like_pattern(text: &str) -> String {
        let escaped = text
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        format!("%{escaped}%")
    }

    /// Case-insensitive substring match on a single column.
    pub fn find_by_substring(
        &self,
        field: SearchField,
        text: &str,
        limit: usize,
    ) -> Result<Vec<Food>> {
        let sql = format!(
            "SELECT {FOOD_COLUMNS} FROM foods WHERE {} LIKE ?1 ESCAPE '\\'
             ORDER BY popularity DESC, name LIMIT ?2",
            field.column()
        );
        self.query_foods(&sql, params![Self::like_pattern(&search_text(text)), limit as i64])
    }

    /// Case-insensitive substring match on name OR brand.
    pub fn search_name_or_brand(&self, text: &str, limit: usize) -> Result<Vec<Food>> {
        let sql = format!(
            "SELECT {FOOD_COLUMNS} FROM foods
             WHERE search_name LIKE ?1 ESCAPE '\\' OR search_brand LIKE ?1 ESCAPE '\\'
             ORDER BY popularity DESC, name LIMIT ?2"
        );
        self.query_foods(&sql, params![Self::like_pattern(&search_text(text)), limit as i64])
    }

    pub fn list_foods(&self, limit: usize) -> Result<Vec<Food>> {
        let sql = format!("SELECT {FOOD_COLUMNS} FROM foods ORDER BY name LIMIT ?1");
        self.query_foods(&sql, params![limit as i64])
    }

    pub fn count_foods(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM foods", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Insert or refresh a record keyed by its external database id. Existing
    /// records keep their identity, aliases and serving options; only the
    /// nutrient fields are updated.
    pub fn upsert_external_record(&self, external_id: &str, food: &NewFood) -> Result<Food> {
        validate_new_food(food)?;
        if let Some(existing) = self.get_food_by_external_id(external_id)? {
            let now = Local::now().to_rfc3339();
            let fingerprint = self.fingerprint.fingerprint(&food.macros());
            self.conn.execute(
                "UPDATE foods SET kcal_100g = ?1, protein_100g = ?2, carbs_100g = ?3, fat_100g = ?4,
                    fiber_100g = ?5, sugar_100g = ?6, fingerprint = ?7, updated_at = ?8
                 WHERE id = ?9",
                params![
                    food.kcal_100g,
                    food.protein_100g,
                    food.carbs_100g,
                    food.fat_100g,
                    food.fiber_100g,
                    food.sugar_100g,
                    fingerprint,
                    now,
                    existing.id,
                ],
            )?;
            return self.get_food_by_id(existing.id);
        }
        let mut new_food = food.clone();
        new_food.external_id = Some(external_id.to_string());
        self.create_food_record(&new_food)
    }

    // --- Aliases ---

    /// Fails on a duplicate `(food_id, alias)` pair; see [`is_unique_violation`].
    pub fn create_alias(&self, food_id: i64, alias: &str) -> Result<()> {
        if alias.chars().count() <= 2 || alias != alias.to_lowercase() {
            bail!("Alias '{alias}' must be lowercase and longer than 2 characters");
        }
        self.conn
            .execute(
                "INSERT INTO food_aliases (food_id, alias) VALUES (?1, ?2)",
                params![food_id, alias],
            )
            .with_context(|| format!("Failed to insert alias '{alias}' for food {food_id}"))?;
        Ok(())
    }

    pub fn aliases_for(&self, food_id: i64) -> Result<Vec<FoodAlias>> {
        let mut stmt = self
            .conn
            .prepare("SELECT food_id, alias FROM food_aliases WHERE food_id = ?1 ORDER BY alias")?;
        let aliases = stmt
            .query_map(params![food_id], |row| {
                Ok(FoodAlias {
                    food_id: row.get(0)?,
                    alias: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(aliases)
    }

    // --- Serving options ---

    /// Fails on a duplicate label for the same food.
    pub fn create_serving_option(&self, food_id: i64, label: &str, grams: f64) -> Result<()> {
        if !(grams.is_finite() && grams > 0.0) {
            bail!("Serving '{label}' must weigh more than 0 g");
        }
        self.conn
            .execute(
                "INSERT INTO serving_options (food_id, label, grams, position)
                 VALUES (?1, ?2, ?3,
                    (SELECT COALESCE(MAX(position) + 1, 0) FROM serving_options WHERE food_id = ?1))",
                params![food_id, label, grams],
            )
            .with_context(|| format!("Failed to insert serving '{label}' for food {food_id}"))?;
        Ok(())
    }

    /// Add any options whose label the food does not have yet. Returns how
    /// many were added.
    pub fn add_missing_serving_options(
        &self,
        food_id: i64,
        options: &[ServingOption],
    ) -> Result<usize> {
        let existing = self.serving_options_for(food_id)?;
        let mut added = 0;
        for option in options {
            if existing
                .iter()
                .any(|e| e.label.eq_ignore_ascii_case(&option.label))
            {
                continue;
            }
            self.create_serving_option(food_id, &option.label, option.grams)?;
            added += 1;
        }
        Ok(added)
    }

    pub fn serving_options_for(&self, food_id: i64) -> Result<Vec<ServingOption>> {
        let mut stmt = self.conn.prepare(
            "SELECT label, grams FROM serving_options WHERE food_id = ?1 ORDER BY position, id",
        )?;
        let options = stmt
            .query_map(params![food_id], |row| {
                Ok(ServingOption {
                    label: row.get(0)?,
                    grams: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(options)
    }
}

/// Lowercased form stored for substring search.
fn search_text(s: &str) -> String {
    s.trim().to_lowercase()
}

/// True when the error chain contains a SQLite UNIQUE or PRIMARY KEY
/// constraint failure.
#[must_use]
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_food() -> NewFood {
        NewFood {
            name: "Olive Oil".to_string(),
            brand: Some("Acme".to_string()),
            source: FoodSource::CuratedBulkImport,
            verification: Verification::Verified,
            external_id: None,
            density_gml: Some(0.91),
            category_id: Some("oil".to_string()),
            kcal_100g: 884.0,
            protein_100g: 0.0,
            carbs_100g: 0.0,
            fat_100g: 100.0,
            fiber_100g: None,
            sugar_100g: None,
            popularity: 1.0,
        }
    }

    #[test]
    fn test_create_and_get_food() {
        let db = Database::open_in_memory().unwrap();
        let food = db.create_food_record(&sample_food()).unwrap();

        assert_eq!(food.name, "Olive Oil");
        assert_eq!(food.brand.as_deref(), Some("Acme"));
        assert_eq!(food.source, FoodSource::CuratedBulkImport);
        assert_eq!(food.verification, Verification::Verified);
        assert_eq!(food.density_gml, Some(0.91));
        assert_eq!(food.fingerprint.len(), 12);
        assert!(!food.uuid.is_empty());

        let fetched = db.get_food_by_id(food.id).unwrap();
        assert_eq!(fetched.name, food.name);
        assert_eq!(db.count_foods().unwrap(), 1);
    }

    #[test]
    fn test_create_food_rejects_zero_kcal() {
        let db = Database::open_in_memory().unwrap();
        let mut food = sample_food();
        food.kcal_100g = 0.0;
        assert!(db.create_food_record(&food).is_err());
        assert_eq!(db.count_foods().unwrap(), 0);
    }

    #[test]
    fn test_get_food_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_food_by_id(999).is_err());
        assert!(db.find_food(999).unwrap().is_none());
    }

    #[test]
    fn test_find_by_exact_name_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        db.create_food_record(&sample_food()).unwrap();
        let policy = ImportDedupPolicy::default();

        let far_macros = Macros::new(10.0, 50.0, 50.0, 0.0);
        let found = db
            .find_by_exact_name_or_macro_range(
                "OLIVE OIL",
                &far_macros,
                FoodSource::CuratedBulkImport,
                &policy,
            )
            .unwrap();
        assert!(found.is_some());

        // Different source never matches
        let other = db
            .find_by_exact_name_or_macro_range(
                "Olive Oil",
                &far_macros,
                FoodSource::Community,
                &policy,
            )
            .unwrap();
        assert!(other.is_none());
    }

    #[test]
    fn test_find_by_macro_range() {
        let db = Database::open_in_memory().unwrap();
        db.create_food_record(&sample_food()).unwrap();
        let policy = ImportDedupPolicy::default();

        let near = Macros::new(888.0, 1.5, 1.0, 98.5);
        let found = db
            .find_by_exact_name_or_macro_range(
                "Canola",
                &near,
                FoodSource::CuratedBulkImport,
                &policy,
            )
            .unwrap();
        assert!(found.is_some());

        let outside = Macros::new(890.0, 0.0, 0.0, 100.0);
        let missing = db
            .find_by_exact_name_or_macro_range(
                "Canola",
                &outside,
                FoodSource::CuratedBulkImport,
                &policy,
            )
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_search_name_or_brand() {
        let db = Database::open_in_memory().unwrap();
        db.create_food_record(&sample_food()).unwrap();

        assert_eq!(db.search_name_or_brand("olive", 20).unwrap().len(), 1);
        assert_eq!(db.search_name_or_brand("ACME", 20).unwrap().len(), 1);
        assert!(db.search_name_or_brand("butter", 20).unwrap().is_empty());
        // LIKE wildcards are escaped
        assert!(db.search_name_or_brand("%", 20).unwrap().is_empty());
    }

    #[test]
    fn test_search_folds_non_ascii_case() {
        let db = Database::open_in_memory().unwrap();
        let mut eclair = sample_food();
        eclair.name = "ÉCLAIR, chocolate".to_string();
        eclair.brand = Some("Pâtisserie ÉTOILE".to_string());
        db.create_food_record(&eclair).unwrap();

        for query in ["éclair", "Éclair", "ÉCLAIR, CHOCOLATE"] {
            assert_eq!(db.search_name_or_brand(query, 20).unwrap().len(), 1, "{query}");
        }
        assert_eq!(db.search_name_or_brand("étoile", 20).unwrap().len(), 1);
        assert_eq!(
            db.find_by_substring(SearchField::Name, "Éclair", 20)
                .unwrap()
                .len(),
            1
        );
        // stored name keeps its original case
        assert_eq!(db.list_foods(1).unwrap()[0].name, "ÉCLAIR, chocolate");
    }

    #[test]
    fn test_migration_fills_search_columns() {
        let db = Database::open_in_memory().unwrap();
        db.create_food_record(&sample_food()).unwrap();
        db.conn
            .execute_batch("UPDATE foods SET search_name = '', search_brand = NULL; PRAGMA user_version = 1;")
            .unwrap();
        db.backfill_search_columns().unwrap();
        assert_eq!(db.search_name_or_brand("OLIVE", 20).unwrap().len(), 1);
        assert_eq!(db.search_name_or_brand("acme", 20).unwrap().len(), 1);
    }

    #[test]
    fn test_find_by_substring_single_field() {
        let db = Database::open_in_memory().unwrap();
        db.create_food_record(&sample_food()).unwrap();

        assert_eq!(
            db.find_by_substring(SearchField::Name, "oil", 20).unwrap().len(),
            1
        );
        assert!(
            db.find_by_substring(SearchField::Brand, "oil", 20)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_alias_uniqueness() {
        let db = Database::open_in_memory().unwrap();
        let food = db.create_food_record(&sample_food()).unwrap();

        db.create_alias(food.id, "olive oil").unwrap();
        let err = db.create_alias(food.id, "olive oil").unwrap_err();
        assert!(is_unique_violation(&err));

        let aliases = db.aliases_for(food.id).unwrap();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].alias, "olive oil");
    }

    #[test]
    fn test_alias_validation_is_not_unique_violation() {
        let db = Database::open_in_memory().unwrap();
        let food = db.create_food_record(&sample_food()).unwrap();
        let err = db.create_alias(food.id, "Oil").unwrap_err();
        assert!(!is_unique_violation(&err));
        let err = db.create_alias(9999, "olive").unwrap_err();
        assert!(!is_unique_violation(&err));
    }

    #[test]
    fn test_serving_options_order_and_uniqueness() {
        let db = Database::open_in_memory().unwrap();
        let food = db.create_food_record(&sample_food()).unwrap();

        db.create_serving_option(food.id, "1 tbsp", 13.6).unwrap();
        db.create_serving_option(food.id, "1 tsp", 4.5).unwrap();
        let err = db.create_serving_option(food.id, "1 tbsp", 14.0).unwrap_err();
        assert!(is_unique_violation(&err));

        let options = db.serving_options_for(food.id).unwrap();
        assert_eq!(options[0], ServingOption::new("1 tbsp", 13.6));
        assert_eq!(options[1], ServingOption::new("1 tsp", 4.5));

        let fetched = db.get_food_by_id(food.id).unwrap();
        assert_eq!(fetched.serving_options.len(), 2);
    }

    #[test]
    fn test_add_missing_serving_options() {
        let db = Database::open_in_memory().unwrap();
        let food = db.create_food_record(&sample_food()).unwrap();
        db.create_serving_option(food.id, "1 tbsp", 13.6).unwrap();

        let added = db
            .add_missing_serving_options(
                food.id,
                &[
                    ServingOption::new("1 TBSP", 15.0),
                    ServingOption::new("1 cup", 218.0),
                ],
            )
            .unwrap();
        assert_eq!(added, 1);
        let options = db.serving_options_for(food.id).unwrap();
        assert_eq!(options.len(), 2);
        assert!((options[0].grams - 13.6).abs() < f64::EPSILON);
    }

    #[test]
    fn test_upsert_external_record() {
        let db = Database::open_in_memory().unwrap();
        let mut food = sample_food();
        food.source = FoodSource::ExternalLive;

        let created = db.upsert_external_record("fdc:171413", &food).unwrap();
        assert_eq!(created.external_id.as_deref(), Some("fdc:171413"));

        food.kcal_100g = 880.0;
        let updated = db.upsert_external_record("fdc:171413", &food).unwrap();
        assert_eq!(updated.id, created.id);
        assert!((updated.kcal_100g - 880.0).abs() < f64::EPSILON);
        assert_eq!(db.count_foods().unwrap(), 1);
    }
}
