mod commands;
mod config;
mod server;
mod usda;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::commands::{InputFormat, cmd_dedup, cmd_grams, cmd_import, cmd_search, cmd_show};
use crate::config::Config;
use crate::usda::UsdaClient;
use forage_core::importer::ImportOptions;
use forage_core::service::{FoodEngine, NutritionLookupProvider};

#[derive(Parser)]
#[command(
    name = "forage",
    version,
    about = "Food matching and nutrition lookup",
    long_about = "Import nutrition data, find the food an ingredient line refers to, \
                  and convert its quantity to grams."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bulk import nutrition rows from a CSV or JSON file
    Import {
        /// Path to the file (CSV, JSON array, or a USDA FoodData Central download)
        file: PathBuf,
        /// Input format (default: from the file extension)
        #[arg(long, value_enum)]
        format: Option<InputFormat>,
        /// Preview without writing to the database
        #[arg(long)]
        dry_run: bool,
        /// Rows per progress batch
        #[arg(long)]
        batch_size: Option<usize>,
        /// Create rows even if a matching food already exists
        #[arg(long)]
        allow_duplicates: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search for a food, backfilling from USDA when few local matches exist
    Search {
        /// Search query
        query: String,
        /// Only search the local database
        #[arg(long)]
        offline: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a food with its aliases and serving options
    Show {
        /// Food ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Convert an ingredient line (e.g. "2 tbsp olive oil") to grams
    Grams {
        /// Ingredient line
        line: String,
        /// Resolve against this food instead of the best search match
        #[arg(long)]
        food_id: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check whether two foods look like duplicates
    Dedup {
        /// First food name
        name_a: String,
        /// Second food name
        name_b: String,
        /// Macros of the first food per 100 g: kcal,protein,carbs,fat
        #[arg(long = "a", allow_hyphen_values = true)]
        macros_a: String,
        /// Macros of the second food per 100 g: kcal,protein,carbs,fat
        #[arg(long = "b", allow_hyphen_values = true)]
        macros_b: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the HTTP API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable USDA backfill
        #[arg(long)]
        offline: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let engine = FoodEngine::new(&config.db_path, config.engine.clone())?;

    match cli.command {
        Commands::Import {
            file,
            format,
            dry_run,
            batch_size,
            allow_duplicates,
            json,
        } => {
            let defaults = engine.default_import_options();
            let options = ImportOptions {
                dry_run,
                batch_size: batch_size.unwrap_or(defaults.batch_size),
                skip_duplicates: !allow_duplicates,
            };
            if options.batch_size == 0 {
                anyhow::bail!("--batch-size must be at least 1");
            }
            let cancel = cancel_on_ctrl_c();
            tokio::task::block_in_place(|| {
                cmd_import(&engine, &file, format, &options, &cancel, json)
            })
        }
        Commands::Search {
            query,
            offline,
            json,
        } => {
            let provider = lookup_provider(&config, offline);
            tokio::task::block_in_place(|| {
                cmd_search(&engine, provider.as_deref(), &query, json)
            })
        }
        Commands::Show { id, json } => cmd_show(&engine, id, json),
        Commands::Grams {
            line,
            food_id,
            json,
        } => cmd_grams(&engine, &line, food_id, json),
        Commands::Dedup {
            name_a,
            name_b,
            macros_a,
            macros_b,
            json,
        } => cmd_dedup(&engine, &name_a, &macros_a, &name_b, &macros_b, json),
        Commands::Serve {
            port,
            bind,
            offline,
        } => {
            let provider = lookup_provider(&config, offline);
            server::start_server(engine, provider, port, &bind).await
        }
    }
}

/// USDA client unless running offline. A client that cannot be built only
/// disables backfill.
fn lookup_provider(config: &Config, offline: bool) -> Option<Arc<dyn NutritionLookupProvider>> {
    if offline {
        return None;
    }
    match UsdaClient::new(&config.usda_api_key) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!(event = "usda_client_unavailable", error = %e, "continuing without backfill");
            None
        }
    }
}

/// Flag set on the first Ctrl-C so a long import stops between rows.
fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handle = Arc::clone(&flag);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(event = "import_interrupt", "stopping after the current row");
            handle.store(true, Ordering::Relaxed);
        }
    });
    flag
}
