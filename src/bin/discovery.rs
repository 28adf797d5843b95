//! Discovery CLI: run, schedule and inspect background discovery.
//!
//! Usage:
//!   discovery run --user <id> [--db path] [--config path]
//!   discovery serve [--db path] [--config path]
//!   discovery list --user <id> [--type gap] [--min-confidence 0.5] [--limit 20]
//!   discovery import --user <id> <corpus.json>

use clap::{Parser, Subcommand};
use discovery_engine::config::{default_config_path, DiscoveryConfig};
use discovery_engine::coordinator::DiscoveryCoordinator;
use discovery_engine::corpus::{CorpusExport, UserId};
use discovery_engine::discovery::{Discovery, DiscoverySummary, DiscoveryType};
use discovery_engine::engines::EngineRegistry;
use discovery_engine::resources::ModelResourceManager;
use discovery_engine::scheduler::Scheduler;
use discovery_engine::storage::{DiscoveryFilter, DiscoveryRepository, SqliteStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "discovery",
    version,
    about = "Background discovery over document corpora"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Path to YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run discovery for one user now and print the new discoveries
    Run {
        #[arg(long)]
        user: String,
        /// Print discoveries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the periodic scheduler until Ctrl-C
    Serve,
    /// List stored discoveries
    List {
        #[arg(long)]
        user: String,
        /// Only this discovery type (pattern, contradiction, gap, connection, trend, anomaly)
        #[arg(long = "type")]
        discovery_type: Option<DiscoveryType>,
        #[arg(long)]
        min_confidence: Option<f64>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Import a JSON corpus export for a user
    Import {
        #[arg(long)]
        user: String,
        /// File holding {"documents": [...], "passages": [...]}
        #[arg(required = true)]
        path: PathBuf,
    },
}

/// Get the default database path (~/.local/share/discovery-engine/discovery.db)
fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("discovery-engine").join("discovery.db")
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<DiscoveryConfig, String> {
    match path {
        Some(path) => DiscoveryConfig::load(&path),
        None => DiscoveryConfig::load_or_default(&default_config_path()),
    }
    .map_err(|e| format!("Failed to load configuration: {}", e))
}

fn open_store(db: Option<PathBuf>) -> Result<Arc<SqliteStore>, String> {
    let db_path = db.unwrap_or_else(default_db_path);
    SqliteStore::open(&db_path)
        .map(Arc::new)
        .map_err(|e| format!("Failed to open database {}: {}", db_path.display(), e))
}

fn build_coordinator(store: Arc<SqliteStore>, config: &DiscoveryConfig) -> DiscoveryCoordinator {
    let registry = EngineRegistry::from_config(&config.engines, &config.taxonomy);
    let resources = Arc::new(ModelResourceManager::from_config(&config.resources));
    DiscoveryCoordinator::with_store(store, registry, resources).with_config(config.coordinator.clone())
}

fn describe(summary: &DiscoverySummary) -> String {
    match summary {
        DiscoverySummary::Pattern {
            size, key_terms, ..
        } => format!("{} documents around: {}", size, key_terms.join(", ")),
        DiscoverySummary::Contradiction {
            document_a,
            document_b,
            kind,
            ..
        } => format!("{:?} conflict between {} and {}", kind, document_a, document_b),
        DiscoverySummary::Gap {
            topic, coverage, ..
        } => format!("'{}' covered at {:.0}%", topic, coverage * 100.0),
        DiscoverySummary::Connection {
            bridge,
            region_a,
            region_b,
        } => format!(
            "{} bridges {} and {} documents",
            bridge,
            region_a.len(),
            region_b.len()
        ),
        DiscoverySummary::Trend {
            topic,
            direction,
            shape,
            ..
        } => format!("'{}' {:?} ({:?})", topic, direction, shape),
        DiscoverySummary::Anomaly {
            document_id, score, ..
        } => format!("{} is an outlier (score {:.2})", document_id, score),
    }
}

fn print_discoveries(discoveries: &[Discovery], json: bool) -> i32 {
    if json {
        return match serde_json::to_string_pretty(discoveries) {
            Ok(out) => {
                println!("{}", out);
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        };
    }
    if discoveries.is_empty() {
        println!("No discoveries.");
        return 0;
    }
    for d in discoveries {
        println!(
            "{:.2}  {:<13}  {}",
            d.confidence(),
            d.discovery_type().as_str(),
            describe(d.summary())
        );
    }
    0
}

async fn cmd_run(store: Arc<SqliteStore>, config: &DiscoveryConfig, user: &str, json: bool) -> i32 {
    let coordinator = build_coordinator(store, config);
    match coordinator.run_with_report(&UserId::from(user)).await {
        Ok((discoveries, report)) => {
            for engine in &report.engines {
                eprintln!("{:<14} {}", engine.engine, engine.outcome);
            }
            print_discoveries(&discoveries, json)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_serve(store: Arc<SqliteStore>, config: &DiscoveryConfig) -> i32 {
    let coordinator = Arc::new(build_coordinator(store.clone(), config));
    let handle = Scheduler::new(coordinator, store, config.scheduler.clone()).start();
    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Error: cannot listen for Ctrl-C: {}", e);
    }
    handle.shutdown().await;
    0
}

async fn cmd_list(store: Arc<SqliteStore>, filter: DiscoveryFilter, json: bool) -> i32 {
    match store.list(&filter).await {
        Ok(discoveries) => print_discoveries(&discoveries, json),
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_import(store: &SqliteStore, user: &str, path: &Path) -> i32 {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Error: cannot read '{}': {}", path.display(), e);
            return 1;
        }
    };
    let export: CorpusExport = match serde_json::from_str(&raw) {
        Ok(export) => export,
        Err(e) => {
            eprintln!("Error: '{}' is not a corpus export: {}", path.display(), e);
            return 1;
        }
    };
    match store.import_corpus(&UserId::from(user), &export) {
        Ok((documents, passages)) => {
            println!("Imported {} documents and {} passages for '{}'", documents, passages, user);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match load_config(cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };
    let store = match open_store(cli.db) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Run { user, json } => cmd_run(store, &config, &user, json).await,
        Commands::Serve => cmd_serve(store, &config).await,
        Commands::List {
            user,
            discovery_type,
            min_confidence,
            limit,
            json,
        } => {
            let mut filter = DiscoveryFilter::for_user(user);
            if let Some(t) = discovery_type {
                filter = filter.with_type(t);
            }
            if let Some(min) = min_confidence {
                filter = filter.with_min_confidence(min);
            }
            if let Some(limit) = limit {
                filter = filter.with_limit(limit);
            }
            cmd_list(store, filter, json).await
        }
        Commands::Import { user, path } => cmd_import(&store, &user, &path),
    };
    std::process::exit(code);
}
