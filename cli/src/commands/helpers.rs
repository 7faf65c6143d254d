use anyhow::{Context, Result, bail};
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use forage_core::models::{Food, Macros, ServingOption};
use forage_core::search::RankedCandidate;

/// Parse "kcal,protein,carbs,fat" per 100 g, e.g. "884,0,0,100".
pub(crate) fn parse_macros(s: &str) -> Result<Macros> {
    let values = s
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .with_context(|| format!("Invalid number '{}' in '{s}'", part.trim()))
        })
        .collect::<Result<Vec<f64>>>()?;
    let [kcal, protein, carbs, fat] = values[..] else {
        bail!("Expected 4 comma-separated values (kcal,protein,carbs,fat), got '{s}'");
    };
    if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
        bail!("Macro values must be non-negative: '{s}'");
    }
    Ok(Macros::new(kcal, protein, carbs, fat))
}

pub(crate) fn print_candidate_table(candidates: &[RankedCandidate]) {
    #[derive(Tabled)]
    struct CandidateRow {
        #[tabled(rename = "#")]
        idx: usize,
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Brand")]
        brand: String,
        #[tabled(rename = "Cal/100g")]
        calories: String,
        #[tabled(rename = "P/100g")]
        protein: String,
        #[tabled(rename = "C/100g")]
        carbs: String,
        #[tabled(rename = "F/100g")]
        fat: String,
        #[tabled(rename = "Score")]
        score: String,
        #[tabled(rename = "Conf")]
        confidence: String,
        #[tabled(rename = "Source")]
        source: String,
    }

    let rows: Vec<CandidateRow> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let f = &c.food;
            CandidateRow {
                idx: i + 1,
                id: f.id,
                name: truncate(&f.name, 35),
                brand: f
                    .brand
                    .as_deref()
                    .map(|b| truncate(b, 20))
                    .unwrap_or_default(),
                calories: format!("{:.0}", f.kcal_100g),
                protein: format!("{:.1}", f.protein_100g),
                carbs: format!("{:.1}", f.carbs_100g),
                fat: format!("{:.1}", f.fat_100g),
                score: format!("{:.2}", c.score),
                confidence: format!("{:.0}%", c.confidence * 100.0),
                source: f.source.as_str().to_string(),
            }
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(4..10)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_food_detail(food: &Food, aliases: &[String]) {
    let brand = food
        .brand
        .as_ref()
        .map(|b| format!(" ({b})"))
        .unwrap_or_default();
    println!("[{}] {}{brand}", food.id, food.name);
    println!(
        "  source: {} ({})",
        food.source.as_str(),
        food.verification.as_str()
    );
    if let Some(ext) = &food.external_id {
        println!("  external id: {ext}");
    }
    println!(
        "  per 100g: {:.0} kcal | P:{:.1}g C:{:.1}g F:{:.1}g",
        food.kcal_100g, food.protein_100g, food.carbs_100g, food.fat_100g
    );
    if let Some(fiber) = food.fiber_100g {
        println!("  fiber: {fiber:.1}g");
    }
    if let Some(sugar) = food.sugar_100g {
        println!("  sugar: {sugar:.1}g");
    }
    if let Some(density) = food.density_gml {
        println!("  density: {density} g/mL");
    }
    if let Some(category) = &food.category_id {
        println!("  category: {category}");
    }
    println!("  fingerprint: {}", food.fingerprint);
    if !food.serving_options.is_empty() {
        println!("  servings: {}", format_servings(&food.serving_options));
    }
    if !aliases.is_empty() {
        println!("  aliases: {}", aliases.join(", "));
    }
}

pub(crate) fn format_servings(options: &[ServingOption]) -> String {
    options
        .iter()
        .map(|o| format!("{} = {}g", o.label, no_neg_zero(o.grams)))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
