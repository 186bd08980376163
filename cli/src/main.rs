mod commands;
mod config;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{FilterArgs, cmd_dashboard, cmd_filters, cmd_meals, cmd_shopping_list};
use crate::config::Config;
use larder_core::service::LarderService;

#[derive(Parser)]
#[command(
    name = "larder",
    version,
    about = "Meal price history and weekly shopping lists",
    long_about = "Reports meal price history from CSV exports and builds a priced \
shopping list for the meals you pick.\n\nSource files are read from the data directory: \
meal_prices_history.csv, meals.csv, ingredients.csv, meals_ingredients.csv and \
ingredients_history.csv."
)]
struct Cli {
    /// Directory holding the source CSV files (default: $LARDER_DATA_DIR or the platform data dir)
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the filtered price table and ingredient price trend
    Dashboard {
        #[command(flatten)]
        filters: FilterArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the values available for each filter, given the current selection
    Filters {
        #[command(flatten)]
        filters: FilterArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Build a shopping list for one or more meals
    ShoppingList {
        /// Meal names
        meals: Vec<String>,
        /// Select every meal in the catalog
        #[arg(long, conflicts_with = "meals")]
        all: bool,
        /// Also write the list as CSV to this file
        #[arg(long, value_name = "PATH")]
        csv: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List meal names from the catalog
    Meals {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the read-only REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8501")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.data_dir.as_deref())?;
    let mut service = LarderService::new(config.data_dir);

    match cli.command {
        Commands::Dashboard { filters, json } => cmd_dashboard(&mut service, filters, json),
        Commands::Filters { filters, json } => cmd_filters(&mut service, filters, json),
        Commands::ShoppingList {
            meals,
            all,
            csv,
            json,
        } => cmd_shopping_list(&mut service, meals, all, csv.as_deref(), json),
        Commands::Meals { json } => cmd_meals(&mut service, json),
        Commands::Serve { port, bind } => server::start_server(service, port, &bind).await,
    }
}
