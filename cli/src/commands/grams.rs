use anyhow::Result;
use std::process;

use forage_core::grams::ParsedIngredientLine;
use forage_core::service::FoodEngine;

pub(crate) fn cmd_grams(
    engine: &FoodEngine,
    line: &str,
    food_id: Option<i64>,
    json: bool,
) -> Result<()> {
    let parsed = ParsedIngredientLine::parse(line)?;
    let lookup = engine.resolve_line(&parsed, food_id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&lookup)?);
        if lookup.resolution.grams.is_none() {
            process::exit(2);
        }
        return Ok(());
    }

    let food = lookup
        .food
        .as_ref()
        .map_or_else(|| "no matching food".to_string(), |f| format!("{} [{}]", f.name, f.id));

    let Some(grams) = lookup.resolution.grams else {
        eprintln!("Could not resolve '{line}' to grams ({food}); enter a weight manually.");
        process::exit(2);
    };

    println!("{line} = {grams:.1} g ({food})");
    if lookup.resolution.used_fallback {
        eprintln!("Note: no unit match, used the food's first serving size.");
    }

    Ok(())
}
