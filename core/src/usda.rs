//! USDA FoodData Central response types and their conversion into the
//! shapes the engine consumes.

use serde::Deserialize;

use crate::models::{ExternalFoodRecord, Nutrients};
use crate::normalize::RawNutritionRow;

pub const USDA_SOURCE: &str = "usda-fdc";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default)]
    pub foods: Vec<UsdaFood>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsdaFood {
    pub fdc_id: u64,
    pub description: Option<String>,
    pub brand_owner: Option<String>,
    pub brand_name: Option<String>,
    #[serde(default)]
    pub food_nutrients: Vec<UsdaFoodNutrient>,
}

/// Search results carry `nutrientNumber`/`value`; the details endpoint nests
/// the number under `nutrient` and calls the value `amount`. Both are read.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsdaFoodNutrient {
    pub nutrient_id: Option<u32>,
    pub nutrient_number: Option<String>,
    #[serde(alias = "amount")]
    pub value: Option<f64>,
    pub nutrient: Option<NutrientRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NutrientRef {
    pub id: Option<u32>,
    pub number: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NutrientField {
    Kcal,
    Protein,
    Carbs,
    Fat,
    Fiber,
    Sugar,
}

/// Legacy SR nutrient numbers first, then FDC nutrient ids.
fn field_for(number: Option<&str>, id: Option<u32>) -> Option<NutrientField> {
    let by_number = match number? {
        "208" => Some(NutrientField::Kcal),
        "203" => Some(NutrientField::Protein),
        "205" => Some(NutrientField::Carbs),
        "204" => Some(NutrientField::Fat),
        "291" => Some(NutrientField::Fiber),
        "269" => Some(NutrientField::Sugar),
        _ => None,
    };
    by_number.or_else(|| field_for_id(id))
}

fn field_for_id(id: Option<u32>) -> Option<NutrientField> {
    match id? {
        1008 => Some(NutrientField::Kcal),
        1003 => Some(NutrientField::Protein),
        1005 => Some(NutrientField::Carbs),
        1004 => Some(NutrientField::Fat),
        1079 => Some(NutrientField::Fiber),
        2000 => Some(NutrientField::Sugar),
        _ => None,
    }
}

impl UsdaFoodNutrient {
    fn field(&self) -> Option<NutrientField> {
        let number = self
            .nutrient_number
            .as_deref()
            .or_else(|| self.nutrient.as_ref().and_then(|n| n.number.as_deref()));
        let id = self
            .nutrient_id
            .or_else(|| self.nutrient.as_ref().and_then(|n| n.id));
        match number {
            Some(_) => field_for(number, id),
            None => field_for_id(id),
        }
    }
}

fn brand_of(food: &UsdaFood) -> Option<String> {
    food.brand_name
        .clone()
        .or_else(|| food.brand_owner.clone())
        .filter(|b| !b.trim().is_empty())
}

/// Map a USDA food into the raw row shape. Unknown nutrient codes are ignored.
#[must_use]
pub fn usda_food_to_raw_row(food: &UsdaFood) -> RawNutritionRow {
    let mut row = RawNutritionRow {
        id: Some(food.fdc_id.to_string()),
        name: food.description.clone(),
        brand: brand_of(food),
        ..RawNutritionRow::default()
    };
    for nutrient in &food.food_nutrients {
        let (Some(field), Some(value)) = (nutrient.field(), nutrient.value) else {
            continue;
        };
        let slot = match field {
            NutrientField::Kcal => &mut row.calories,
            NutrientField::Protein => &mut row.protein,
            NutrientField::Carbs => &mut row.carbs,
            NutrientField::Fat => &mut row.fat,
            NutrientField::Fiber => &mut row.fiber,
            NutrientField::Sugar => &mut row.sugar,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }
    row
}

#[must_use]
pub fn usda_food_to_external(food: &UsdaFood) -> Option<ExternalFoodRecord> {
    let name = food.description.clone().filter(|n| !n.trim().is_empty())?;
    let row = usda_food_to_raw_row(food);
    Some(ExternalFoodRecord {
        external_id: format!("fdc:{}", food.fdc_id),
        name,
        brand: row.brand.clone(),
        source: USDA_SOURCE.to_string(),
        per_100g: Nutrients {
            kcal: row.calories.unwrap_or(0.0),
            protein: row.protein.unwrap_or(0.0),
            carbs: row.carbs.unwrap_or(0.0),
            fat: row.fat.unwrap_or(0.0),
            fiber: row.fiber.unwrap_or(0.0),
            sugar: row.sugar.unwrap_or(0.0),
        },
    })
}
