use anyhow::Result;
use std::process;

use forage_core::service::{FoodEngine, NutritionLookupProvider};

use super::helpers::{format_servings, print_candidate_table, print_food_detail};

pub(crate) fn cmd_search(
    engine: &FoodEngine,
    provider: Option<&dyn NutritionLookupProvider>,
    query: &str,
    json: bool,
) -> Result<()> {
    let resp = engine.search(query, provider)?;

    if resp.data.is_empty() {
        if json {
            println!("{}", serde_json::to_string_pretty(&resp)?);
        } else {
            eprintln!("No results found for '{query}'");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&resp)?);
        return Ok(());
    }

    print_candidate_table(&resp.data);
    let top = &resp.data[0];
    println!(
        "\nTop match servings: {}",
        format_servings(&top.display_serving_options)
    );
    let sources = resp.sources;
    println!(
        "{} local, {} external, {} shown",
        sources.local, sources.external, sources.total
    );

    Ok(())
}

pub(crate) fn cmd_show(engine: &FoodEngine, id: i64, json: bool) -> Result<()> {
    let Some(food) = engine.database().find_food(id)? else {
        if json {
            println!("{}", super::helpers::json_error(&format!("Food {id} not found")));
        } else {
            eprintln!("Food {id} not found");
        }
        process::exit(2);
    };
    let aliases: Vec<String> = engine
        .food_aliases(id)?
        .into_iter()
        .map(|a| a.alias)
        .collect();

    if json {
        let mut value = serde_json::to_value(&food)?;
        value["aliases"] = serde_json::json!(aliases);
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print_food_detail(&food, &aliases);
    }

    Ok(())
}
