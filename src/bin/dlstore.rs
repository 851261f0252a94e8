use std::path::{Path, PathBuf};
use std::process::exit;

use clap::{Parser, Subcommand};
use dlstore::*;
use serde::Serialize;
use tracing::Level;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.dlstore/dlstore.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full startup sequence: open, pre-allocate, create tables.
    Init {
        /// Database file to use instead of the configured one
        #[clap(long)]
        db: Option<PathBuf>,

        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Show page statistics of a database file without modifying it.
    Info {
        /// Database file to use instead of the configured one
        #[clap(long)]
        db: Option<PathBuf>,

        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Show the active configuration.
    Config,
}

#[derive(Serialize)]
struct StatsReport {
    path: String,
    file_size_bytes: Option<u64>,
    page_size: u64,
    page_count: u64,
    freelist_count: u64,
    free_bytes: u64,
    tables: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preallocation: Option<String>,
}

impl StatsReport {
    fn new(path: &Path, stats: DatabaseStats, prealloc: Option<&PreallocOutcome>) -> Self {
        let preallocation = prealloc.map(|outcome| match outcome {
            PreallocOutcome::Skipped {
                free_pages,
                dropped_leftover,
            } => {
                if *dropped_leftover {
                    format!(
                        "skipped ({} free pages, leftover scratch table dropped)",
                        free_pages
                    )
                } else {
                    format!("skipped ({} free pages)", free_pages)
                }
            }
            PreallocOutcome::Grown {
                free_pages_before,
                free_pages_after,
            } => format!(
                "grown (free pages {} -> {})",
                free_pages_before, free_pages_after
            ),
        });

        StatsReport {
            path: path.display().to_string(),
            file_size_bytes: std::fs::metadata(path).ok().map(|m| m.len()),
            page_size: stats.page_size,
            page_count: stats.page_count,
            freelist_count: stats.freelist_count,
            free_bytes: stats.free_bytes(),
            tables: stats.tables,
            preallocation,
        }
    }

    fn print(&self, json: bool) {
        if json {
            match serde_json::to_string_pretty(self) {
                Ok(s) => println!("{}", s),
                Err(e) => eprintln!("ERROR: failed to serialize report: {}", e),
            }
            return;
        }

        println!("Path:           {}", self.path);
        if let Some(size) = self.file_size_bytes {
            println!("File Size:      {}", format_size(size));
        }
        println!("Page Size:      {} B", self.page_size);
        println!("Page Count:     {}", self.page_count);
        println!(
            "Free Pages:     {} ({})",
            self.freelist_count,
            format_size(self.free_bytes)
        );
        println!("Tables:         {}", self.tables.join(", "));
        if let Some(p) = &self.preallocation {
            println!("Pre-allocation: {}", p);
        }
    }
}

fn main() {
    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt()
            // filter spans/events with level INFO or higher.
            .with_max_level(Level::INFO)
            .init();
    }

    let config_file = cli
        .config
        .clone()
        .unwrap_or_else(StoreConfig::config_file_path);
    let config = match StoreConfig::new(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ERROR: unable to load configuration: {}", e);
            exit(1);
        }
    };

    match cli.command {
        Commands::Init { db, json } => {
            let config = match db {
                Some(path) => StoreConfig::at_path(path).with_preallocation(
                    config.prealloc_threshold_pages,
                    config.prealloc_fill_bytes,
                ),
                None => {
                    if let Err(e) = std::fs::create_dir_all(config.data_dir.as_str()) {
                        eprintln!(
                            "ERROR: unable to create data directory {}: {}",
                            config.data_dir, e
                        );
                        exit(1);
                    }
                    config
                }
            };

            let store = match UnopenedStore::new(config).connect() {
                Ok(store) => store,
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    exit(1);
                }
            };

            match store.stats() {
                Ok(stats) => StatsReport::new(store.path(), stats, Some(store.prealloc_outcome()))
                    .print(json),
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    exit(1);
                }
            }
        }
        Commands::Info { db, json } => {
            let path = db.unwrap_or_else(|| config.db_path());
            if !path.exists() {
                eprintln!("ERROR: database file {} does not exist", path.display());
                exit(1);
            }

            match inspect(&path) {
                Ok(stats) => StatsReport::new(&path, stats, None).print(json),
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    exit(1);
                }
            }
        }
        Commands::Config => {
            println!("Config File:        {}", config_file);
            println!("{}", config.summary());
        }
    }
}
