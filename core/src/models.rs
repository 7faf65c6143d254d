use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Where a food record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FoodSource {
    Template,
    CuratedBulkImport,
    Community,
    ExternalLive,
}

impl FoodSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::CuratedBulkImport => "curated-bulk-import",
            Self::Community => "community",
            Self::ExternalLive => "external-live",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "template" => Ok(Self::Template),
            "curated-bulk-import" => Ok(Self::CuratedBulkImport),
            "community" => Ok(Self::Community),
            "external-live" => Ok(Self::ExternalLive),
            other => bail!("Unknown food source '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verification {
    Unverified,
    Verified,
}

impl Verification {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::Verified => "verified",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "unverified" => Ok(Self::Unverified),
            "verified" => Ok(Self::Verified),
            other => bail!("Unknown verification status '{other}'"),
        }
    }
}

/// The four primary per-100g macros used for identity checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Macros {
    pub kcal: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

impl Macros {
    #[must_use]
    pub fn new(kcal: f64, protein: f64, carbs: f64, fat: f64) -> Self {
        Self {
            kcal,
            protein,
            carbs,
            fat,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServingOption {
    pub label: String,
    pub grams: f64,
}

impl ServingOption {
    #[must_use]
    pub fn new(label: &str, grams: f64) -> Self {
        Self {
            label: label.to_string(),
            grams,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Food {
    pub id: i64,
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    pub brand: Option<String>,
    pub source: FoodSource,
    pub verification: Verification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub density_gml: Option<f64>,
    pub category_id: Option<String>,
    pub kcal_100g: f64,
    pub protein_100g: f64,
    pub carbs_100g: f64,
    pub fat_100g: f64,
    pub fiber_100g: Option<f64>,
    pub sugar_100g: Option<f64>,
    pub popularity: f64,
    pub fingerprint: String,
    #[serde(default)]
    pub serving_options: Vec<ServingOption>,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Food {
    #[must_use]
    pub fn macros(&self) -> Macros {
        Macros::new(
            self.kcal_100g,
            self.protein_100g,
            self.carbs_100g,
            self.fat_100g,
        )
    }
}

/// Fields for a food record that has not been persisted yet.
#[derive(Debug, Clone)]
pub struct NewFood {
    pub name: String,
    pub brand: Option<String>,
    pub source: FoodSource,
    pub verification: Verification,
    pub external_id: Option<String>,
    pub density_gml: Option<f64>,
    pub category_id: Option<String>,
    pub kcal_100g: f64,
    pub protein_100g: f64,
    pub carbs_100g: f64,
    pub fat_100g: f64,
    pub fiber_100g: Option<f64>,
    pub sugar_100g: Option<f64>,
    pub popularity: f64,
}

impl NewFood {
    #[must_use]
    pub fn macros(&self) -> Macros {
        Macros::new(
            self.kcal_100g,
            self.protein_100g,
            self.carbs_100g,
            self.fat_100g,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FoodAlias {
    pub food_id: i64,
    pub alias: String,
}

/// Per-100g nutrient values as delivered by an external database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Nutrients {
    pub kcal: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub fiber: f64,
    pub sugar: f64,
}

/// A food returned by the external bulk nutrition database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalFoodRecord {
    pub external_id: String,
    pub name: String,
    pub brand: Option<String>,
    pub source: String,
    pub per_100g: Nutrients,
}

/// Validate fields before a food is written: non-empty name, finite
/// non-negative macros, and strictly positive energy.
pub fn validate_new_food(food: &NewFood) -> Result<()> {
    if food.name.trim().is_empty() {
        bail!("Food name must not be empty");
    }
    if !(food.kcal_100g.is_finite() && food.kcal_100g > 0.0) {
        bail!(
            "kcal_100g must be greater than 0 for '{}', got {}",
            food.name,
            food.kcal_100g
        );
    }
    let required = [
        ("protein_100g", food.protein_100g),
        ("carbs_100g", food.carbs_100g),
        ("fat_100g", food.fat_100g),
    ];
    for (field, value) in required {
        if !value.is_finite() || value < 0.0 {
            bail!("{field} must not be negative for '{}'", food.name);
        }
    }
    for (field, value) in [("fiber_100g", food.fiber_100g), ("sugar_100g", food.sugar_100g)] {
        if value.is_some_and(|v| !v.is_finite() || v < 0.0) {
            bail!("{field} must not be negative for '{}'", food.name);
        }
    }
    if food.density_gml.is_some_and(|d| !d.is_finite() || d <= 0.0) {
        bail!("density_gml must be greater than 0 for '{}'", food.name);
    }
    Ok(())
}
