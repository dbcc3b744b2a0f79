//! k2filter-sync: CLI tool for refreshing cached filter lists.

use clap::{Parser, Subcommand};
use k2filter::{FilterId, FilterRegistry, SyncConfig};
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

#[derive(Parser)]
#[command(name = "k2filter-sync")]
#[command(author = "Kaitu.io")]
#[command(version)]
#[command(about = "Synchronize filter lists into a local cache", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download filters whose refresh interval has elapsed
    Update {
        /// YAML configuration file
        #[arg(short, long, default_value = "k2filter.yaml")]
        config: PathBuf,

        /// Refresh every enabled filter regardless of the interval
        #[arg(short, long)]
        force: bool,
    },

    /// Load cached filters and print their state
    Status {
        /// YAML configuration file
        #[arg(short, long, default_value = "k2filter.yaml")]
        config: PathBuf,
    },

    /// Delete the cached copy of a filter
    Remove {
        /// YAML configuration file
        #[arg(short, long, default_value = "k2filter.yaml")]
        config: PathBuf,

        /// Filter id
        #[arg(long)]
        id: u64,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Update { config, force } => update(&config, force),
        Commands::Status { config } => status(&config),
        Commands::Remove { config, id } => remove(&config, FilterId::new(id)),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn open(config_path: &PathBuf) -> k2filter::Result<(SyncConfig, FilterRegistry)> {
    let config = SyncConfig::load(config_path)?;
    let registry = FilterRegistry::from_config(&config)?;
    Ok((config, registry))
}

fn update(config_path: &PathBuf, force: bool) -> k2filter::Result<()> {
    let (config, registry) = open(config_path)?;

    let results = if force {
        registry.update_all()
    } else {
        registry.update_due(config.update_interval())
    };

    let mut updated = 0;
    let mut failed = 0;
    for (id, result) in &results {
        match result {
            Ok(true) => updated += 1,
            Ok(false) => {}
            Err(e) => {
                // The service keeps running on whatever is already cached
                log::warn!("Filter {} was not refreshed: {}", id, e);
                failed += 1;
            }
        }
    }

    println!(
        "Checked {} filters: {} updated, {} failed",
        results.len(),
        updated,
        failed
    );
    Ok(())
}

fn status(config_path: &PathBuf) -> k2filter::Result<()> {
    let (_, registry) = open(config_path)?;

    for (id, result) in registry.load_all() {
        if let Err(e) = result {
            log::warn!("Filter {} not loaded: {}", id, e);
        }
    }

    for filter in registry.filters() {
        let rules = match filter.loaded_rules() {
            Some(count) => count.to_string(),
            None => "-".to_string(),
        };
        let updated = filter
            .last_updated
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs().to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:>20}  {:<8} rules={:<8} updated={:<12} {}  {:?}",
            filter.id.get(),
            if filter.enabled { "enabled" } else { "disabled" },
            rules,
            updated,
            filter.name,
            registry.path(filter.id)
        );
    }

    registry.unload_all();
    Ok(())
}

fn remove(config_path: &PathBuf, id: FilterId) -> k2filter::Result<()> {
    let (_, registry) = open(config_path)?;
    let filter = registry.remove(id)?;
    println!("Removed cache of filter {} ({})", id, filter.url);
    Ok(())
}
