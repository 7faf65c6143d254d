//! Resolve a parsed ingredient quantity to grams.
//!
//! Order of preference: mass units, a serving whose unit matches exactly,
//! volume × density, a serving whose label loosely matches, then the first
//! serving flagged as a fallback.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::models::ServingOption;

/// Units that are counted rather than measured, accepted by the line parser
/// so they can be matched against serving labels.
const COUNT_UNITS: &[&str] = &[
    "scoop", "scoops", "slice", "slices", "clove", "cloves", "piece", "pieces", "can", "cans",
    "serving", "servings", "stick", "sticks", "pinch", "handful",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedIngredientLine {
    pub qty: f64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_unit: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    Mass,
    ServingExact,
    Density,
    ServingPartial,
    Fallback,
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GramsResolution {
    pub grams: Option<f64>,
    pub used_fallback: bool,
    pub method: ResolutionMethod,
}

/// Map spelled-out or plural unit names to a short canonical form.
#[must_use]
pub fn canonical_unit(unit: &str) -> Option<&'static str> {
    let lower = unit.trim().trim_end_matches('.').to_lowercase();
    match lower.as_str() {
        "g" | "gram" | "grams" | "gr" => Some("g"),
        "kg" | "kilogram" | "kilograms" => Some("kg"),
        "oz" | "ounce" | "ounces" => Some("oz"),
        "lb" | "lbs" | "pound" | "pounds" => Some("lb"),
        "cup" | "cups" | "c" => Some("cup"),
        "tbsp" | "tbs" | "tbl" | "tablespoon" | "tablespoons" | "t" => Some("tbsp"),
        "tsp" | "teaspoon" | "teaspoons" => Some("tsp"),
        "ml" | "milliliter" | "milliliters" | "millilitre" | "millilitres" => Some("ml"),
        "l" | "liter" | "liters" | "litre" | "litres" => Some("l"),
        _ => None,
    }
}

/// Grams per unit for mass units.
#[must_use]
pub fn mass_unit_grams(unit: &str) -> Option<f64> {
    match canonical_unit(unit)? {
        "g" => Some(1.0),
        "kg" => Some(1000.0),
        "oz" => Some(28.35),
        "lb" => Some(454.0),
        _ => None,
    }
}

/// Millilitres per unit for volume units.
#[must_use]
pub fn volume_unit_ml(unit: &str) -> Option<f64> {
    match canonical_unit(unit)? {
        "cup" => Some(240.0),
        "tbsp" => Some(15.0),
        "tsp" => Some(5.0),
        "ml" => Some(1.0),
        "l" => Some(1000.0),
        _ => None,
    }
}

/// Split a serving label such as "1 tbsp" or "2 slices" into its leading
/// quantity (1 when absent) and the lowercase remainder.
fn split_label(label: &str) -> (f64, String) {
    let label = label.trim().to_lowercase();
    let mut parts = label.splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("");
    match parse_quantity(first) {
        Some(q) if q > 0.0 => (q, parts.next().unwrap_or("").trim().to_string()),
        _ => (1.0, label),
    }
}

fn unit_key(unit: &str) -> String {
    canonical_unit(unit).map_or_else(|| unit.trim().to_lowercase(), str::to_string)
}

fn scaled(option: &ServingOption, label_qty: f64, qty: f64) -> f64 {
    option.grams * qty / label_qty
}

/// Resolve `parsed` to grams for a food with the given density and servings.
///
/// `grams` is `None` only when nothing matched and the food has no servings,
/// in which case the caller should ask for a manual weight.
#[must_use]
pub fn resolve_grams(
    parsed: &ParsedIngredientLine,
    density_gml: Option<f64>,
    serving_options: &[ServingOption],
) -> GramsResolution {
    let qty = parsed.qty;
    let unit = parsed.unit.trim();

    if let Some(factor) = mass_unit_grams(unit) {
        return resolved(qty * factor, ResolutionMethod::Mass);
    }

    if !unit.is_empty() {
        let key = unit_key(unit);
        for option in serving_options {
            let (label_qty, label_unit) = split_label(&option.label);
            if !label_unit.is_empty() && unit_key(&label_unit) == key {
                return resolved(scaled(option, label_qty, qty), ResolutionMethod::ServingExact);
            }
        }
    }

    if let (Some(ml), Some(density)) = (volume_unit_ml(unit), density_gml) {
        if density > 0.0 {
            return resolved(qty * ml * density, ResolutionMethod::Density);
        }
    }

    if !unit.is_empty() {
        let lower = unit.to_lowercase();
        for option in serving_options {
            let (label_qty, label_unit) = split_label(&option.label);
            if label_unit.is_empty() {
                continue;
            }
            if label_unit.contains(&lower) || lower.contains(&label_unit) {
                return resolved(
                    scaled(option, label_qty, qty),
                    ResolutionMethod::ServingPartial,
                );
            }
        }
    }

    match serving_options.first() {
        Some(first) => GramsResolution {
            grams: Some(first.grams),
            used_fallback: true,
            method: ResolutionMethod::Fallback,
        },
        None => GramsResolution {
            grams: None,
            used_fallback: false,
            method: ResolutionMethod::Unresolved,
        },
    }
}

fn resolved(grams: f64, method: ResolutionMethod) -> GramsResolution {
    GramsResolution {
        grams: Some(grams),
        used_fallback: false,
        method,
    }
}

/// Parse "2", "1.5", "1/2" or "½" into a number.
fn parse_quantity(s: &str) -> Option<f64> {
    let s = s.trim();
    let vulgar = match s {
        "½" => Some(0.5),
        "⅓" => Some(1.0 / 3.0),
        "⅔" => Some(2.0 / 3.0),
        "¼" => Some(0.25),
        "¾" => Some(0.75),
        _ => None,
    };
    if vulgar.is_some() {
        return vulgar;
    }
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        if den == 0.0 {
            return None;
        }
        return Some(num / den);
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Split "500ml" or "2.5tbsp" into (500.0, "ml") or (2.5, "tbsp").
fn split_number_unit(s: &str) -> Option<(f64, &str)> {
    let idx = s.find(|c: char| c.is_alphabetic())?;
    if idx == 0 {
        return None;
    }
    let (num_part, unit_part) = s.split_at(idx);
    let qty = parse_quantity(num_part)?;
    Some((qty, unit_part))
}

fn is_unit_word(word: &str) -> bool {
    canonical_unit(word).is_some() || COUNT_UNITS.contains(&word.to_lowercase().as_str())
}

impl ParsedIngredientLine {
    /// Parse a simple ingredient line: `[qty [fraction]] [unit] name`.
    ///
    /// Accepts "2 tbsp olive oil", "1 1/2 cups flour", "200g rice" and
    /// "3 eggs" (no unit). A missing quantity means 1.
    pub fn parse(line: &str) -> Result<Self> {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            bail!("Ingredient line is empty");
        }

        let mut idx = 0;
        let mut qty = None;
        let mut raw_unit: Option<String> = None;

        if let Some(q) = parse_quantity(words[0]) {
            qty = Some(q);
            idx = 1;
            let fraction = words
                .get(1)
                .filter(|w| w.contains('/') || !w.is_ascii())
                .and_then(|w| parse_quantity(w));
            if let Some(frac) = fraction {
                qty = Some(q + frac);
                idx = 2;
            }
        } else if let Some((q, unit)) = split_number_unit(words[0]) {
            qty = Some(q);
            raw_unit = Some(unit.to_string());
            idx = 1;
        }

        if raw_unit.is_none() {
            if let Some(word) = words.get(idx).filter(|w| is_unit_word(w)) {
                // a bare "t" or "c" is only a unit when a quantity precedes it
                if qty.is_some() || word.len() > 1 {
                    raw_unit = Some((*word).to_string());
                    idx += 1;
                }
            }
        }

        let name = words[idx..].join(" ");
        if name.is_empty() {
            bail!("Ingredient line '{line}' has no ingredient name");
        }
        let unit = raw_unit.as_deref().map(unit_key).unwrap_or_default();
        let qty = qty.unwrap_or(1.0);
        if qty <= 0.0 {
            bail!("Quantity must be greater than 0 in '{line}'");
        }

        Ok(Self {
            qty,
            unit,
            raw_unit,
            name,
        })
    }

    /// Parse a "<qty> <unit>" pair without an ingredient name.
    pub fn from_quantity(qty: &str, unit: &str, name: &str) -> Result<Self> {
        let qty = parse_quantity(qty).with_context(|| format!("Invalid quantity: '{qty}'"))?;
        if qty <= 0.0 {
            bail!("Quantity must be greater than 0");
        }
        Ok(Self {
            qty,
            unit: unit_key(unit),
            raw_unit: Some(unit.to_string()),
            name: name.to_string(),
        })
    }
}
