//! Ingestion boundary for bulk nutrition rows.
//!
//! Source files disagree on field names and on whether numbers are quoted, so
//! rows are deserialized leniently into [`RawNutritionRow`] and then validated
//! into the strict [`NormalizedRow`] that the rest of the engine consumes.

use serde::{Deserialize, Deserializer};

use crate::models::ExternalFoodRecord;

/// Header names accepted for the text fields of [`RawNutritionRow`].
pub(crate) const ID_FIELDS: &[&str] = &["id", "fdc_id", "external_id", "fdcId"];
pub(crate) const NAME_FIELDS: &[&str] = &["name", "description", "food_name"];
pub(crate) const BRAND_FIELDS: &[&str] = &["brand", "brand_owner", "brands", "brandOwner"];

/// One row from a heterogeneous bulk source. Missing or unparseable numeric
/// fields deserialize to `None`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNutritionRow {
    #[serde(
        default,
        alias = "fdc_id",
        alias = "external_id",
        alias = "fdcId",
        deserialize_with = "lenient_string"
    )]
    pub id: Option<String>,
    #[serde(
        default,
        alias = "description",
        alias = "food_name",
        deserialize_with = "lenient_string"
    )]
    pub name: Option<String>,
    #[serde(
        default,
        alias = "brand_owner",
        alias = "brands",
        alias = "brandOwner",
        deserialize_with = "lenient_string"
    )]
    pub brand: Option<String>,
    #[serde(
        default,
        alias = "kcal",
        alias = "energy_kcal",
        alias = "kcal100",
        alias = "calories_per_100g",
        deserialize_with = "lenient_f64"
    )]
    pub calories: Option<f64>,
    #[serde(
        default,
        alias = "protein_g",
        alias = "protein100",
        alias = "protein_per_100g",
        deserialize_with = "lenient_f64"
    )]
    pub protein: Option<f64>,
    #[serde(
        default,
        alias = "carbohydrates",
        alias = "carbohydrate",
        alias = "carbs100",
        alias = "carbs_per_100g",
        deserialize_with = "lenient_f64"
    )]
    pub carbs: Option<f64>,
    #[serde(
        default,
        alias = "total_fat",
        alias = "fat100",
        alias = "fat_per_100g",
        deserialize_with = "lenient_f64"
    )]
    pub fat: Option<f64>,
    #[serde(
        default,
        alias = "fibre",
        alias = "fiber100",
        deserialize_with = "lenient_f64"
    )]
    pub fiber: Option<f64>,
    #[serde(
        default,
        alias = "sugars",
        alias = "sugar100",
        deserialize_with = "lenient_f64"
    )]
    pub sugar: Option<f64>,
}

impl RawNutritionRow {
    /// Identifier used in logs: the source id when present, else the name.
    #[must_use]
    pub fn label(&self) -> String {
        self.id
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| "<unnamed>".to_string())
    }
}

impl From<&ExternalFoodRecord> for RawNutritionRow {
    fn from(record: &ExternalFoodRecord) -> Self {
        let n = record.per_100g;
        Self {
            id: Some(record.external_id.clone()),
            name: Some(record.name.clone()),
            brand: record.brand.clone(),
            calories: Some(n.kcal),
            protein: Some(n.protein),
            carbs: Some(n.carbs),
            fat: Some(n.fat),
            fiber: Some(n.fiber),
            sugar: Some(n.sugar),
        }
    }
}

/// A validated per-100g row.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub external_id: Option<String>,
    pub name: String,
    pub brand: Option<String>,
    pub category_id: Option<String>,
    pub density_gml: Option<f64>,
    pub kcal: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub fiber: Option<f64>,
    pub sugar: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<NumberOrString> = Option::deserialize(deserializer).unwrap_or(None);
    Ok(match value {
        Some(NumberOrString::Number(n)) => Some(n),
        Some(NumberOrString::Text(s)) => s.trim().parse::<f64>().ok(),
        None => None,
    }
    .filter(|v| v.is_finite()))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<NumberOrString> = Option::deserialize(deserializer).unwrap_or(None);
    Ok(match value {
        Some(NumberOrString::Number(n)) => Some(format_id(n)),
        Some(NumberOrString::Text(s)) => Some(s.trim().to_string()),
        None => None,
    }
    .filter(|s| !s.is_empty()))
}

fn format_id(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Density defaults (g/mL) for categories where volume measures are common.
#[must_use]
pub fn default_density(category_id: &str) -> Option<f64> {
    match category_id {
        "oil" => Some(0.91),
        "flour" | "starch" => Some(0.53),
        "whey" => Some(0.50),
        "liquid" => Some(1.00),
        _ => None,
    }
}

const LIQUID_TOKENS: &[&str] = &["milk", "juice", "water", "broth", "stock", "liquid"];
const GRAIN_TOKENS: &[&str] = &[
    "grain", "grains", "quinoa", "barley", "bulgur", "couscous", "millet",
];

/// Derive a category hint from name and brand text. The first matching rule
/// wins, so "rice flour" is flour and "oat milk" is liquid.
#[must_use]
pub fn detect_category(name: &str, brand: Option<&str>) -> Option<&'static str> {
    let text = match brand {
        Some(b) => format!("{name} {b}"),
        None => name.to_string(),
    }
    .to_lowercase();
    let tokens: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let has = |words: &[&str]| tokens.iter().any(|t| words.contains(t));

    if has(&["oil", "oils"]) {
        Some("oil")
    } else if has(&["whey"]) {
        Some("whey")
    } else if has(&["flour"]) {
        Some("flour")
    } else if has(&["starch", "cornstarch"]) {
        Some("starch")
    } else if has(LIQUID_TOKENS) {
        Some("liquid")
    } else if has(&["oat", "oats", "oatmeal"]) {
        Some("oats")
    } else if has(&["rice"]) {
        Some("rice")
    } else if has(GRAIN_TOKENS) {
        Some("grain")
    } else if has(&["sugar", "sugars"]) {
        Some("sugar")
    } else {
        None
    }
}

/// Turn a raw row into a per-100g row, or `None` when the row has no usable
/// energy value or no name. Dirty rows are skipped rather than reported.
#[must_use]
pub fn normalize_row(raw: &RawNutritionRow) -> Option<NormalizedRow> {
    let kcal = raw.calories.unwrap_or(0.0);
    if !kcal.is_finite() || kcal <= 0.0 {
        return None;
    }
    let name = raw.name.as_deref().map(str::trim).filter(|n| !n.is_empty())?;
    let brand = raw
        .brand
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string);

    let category_id = detect_category(name, brand.as_deref());
    let density_gml = category_id.and_then(default_density);

    let mut protein = raw.protein.unwrap_or(0.0).max(0.0);
    let mut carbs = raw.carbs.unwrap_or(0.0).max(0.0);
    let mut fat = raw.fat.unwrap_or(0.0).max(0.0);

    match category_id {
        Some("oil") => {
            protein = protein.min(100.0);
            fat = fat.min(100.0);
        }
        Some("flour" | "starch") => carbs = carbs.min(100.0),
        _ => {}
    }

    Some(NormalizedRow {
        external_id: raw.id.clone(),
        name: name.to_string(),
        brand,
        category_id: category_id.map(str::to_string),
        density_gml,
        kcal,
        protein,
        carbs,
        fat,
        fiber: clean_optional(raw.fiber),
        sugar: clean_optional(raw.sugar),
    })
}

fn clean_optional(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v > 0.0)
}
