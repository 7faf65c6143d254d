use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};
use clap::ValueEnum;

use forage_core::importer::{ImportOptions, parse_rows_csv, parse_rows_json};
use forage_core::service::FoodEngine;

use super::helpers::json_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum InputFormat {
    Csv,
    Json,
}

impl InputFormat {
    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub(crate) fn cmd_import(
    engine: &FoodEngine,
    path: &Path,
    format: Option<InputFormat>,
    options: &ImportOptions,
    cancel: &AtomicBool,
    json: bool,
) -> Result<()> {
    let format = format
        .or_else(|| InputFormat::from_path(path))
        .with_context(|| {
            format!(
                "Cannot tell the format of {}; pass --format csv or --format json",
                path.display()
            )
        })?;

    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    let reader = BufReader::new(file);

    let rows = match format {
        InputFormat::Csv => parse_rows_csv(reader)?,
        InputFormat::Json => parse_rows_json(reader)?,
    };

    if rows.is_empty() {
        if json {
            println!("{}", json_error("No rows found in input file"));
        } else {
            eprintln!("No rows found in input file.");
        }
        return Ok(());
    }

    let summary = engine.import_batch(&rows, options, Some(cancel));

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if summary.dry_run {
        println!("Dry run, no changes made.\n");
        println!("  Rows read:       {}", rows.len());
        println!("  Foods to create: {}", summary.created);
    } else {
        println!("Import complete.\n");
        println!("  Rows read:       {}", rows.len());
        println!("  Foods created:   {}", summary.created);
    }
    println!("  Skipped:         {}", summary.skipped);
    println!("  Errors:          {}", summary.errors);
    if summary.cancelled {
        println!("\nImport was interrupted; the counts cover finished rows only.");
    }

    Ok(())
}
