use anyhow::Result;
use tabled::{Table, Tabled, settings::Style};

use forage_core::service::FoodEngine;

use super::helpers::parse_macros;

pub(crate) fn cmd_dedup(
    engine: &FoodEngine,
    name_a: &str,
    macros_a: &str,
    name_b: &str,
    macros_b: &str,
    json: bool,
) -> Result<()> {
    let a = parse_macros(macros_a)?;
    let b = parse_macros(macros_b)?;
    let check = engine.compare_foods(name_a, &a, name_b, &b);

    if json {
        println!("{}", serde_json::to_string_pretty(&check)?);
        return Ok(());
    }

    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "")]
        label: &'static str,
        #[tabled(rename = "A")]
        a: String,
        #[tabled(rename = "B")]
        b: String,
    }

    let rows = vec![
        Row {
            label: "canonical",
            a: check.canonical_a.clone(),
            b: check.canonical_b.clone(),
        },
        Row {
            label: "fingerprint",
            a: check.fingerprint_a.clone(),
            b: check.fingerprint_b.clone(),
        },
        Row {
            label: "kcal/P/C/F",
            a: format!("{:.0}/{:.1}/{:.1}/{:.1}", a.kcal, a.protein, a.carbs, a.fat),
            b: format!("{:.0}/{:.1}/{:.1}/{:.1}", b.kcal, b.protein, b.carbs, b.fat),
        },
    ];
    println!("{}", Table::new(&rows).with(Style::rounded()));

    println!("  name overlap:         {:.2}", check.name_jaccard);
    println!("  nutrition similarity: {:.2}", check.nutrition_similarity);
    let verdict = if check.likely_duplicate {
        "likely duplicate"
    } else {
        "distinct"
    };
    println!("  verdict:              {verdict}");

    Ok(())
}
