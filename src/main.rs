use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use hubsync::config::{self, Config};
use hubsync::git::Git2Client;
use hubsync::store::{SqliteStore, Store};
use hubsync::sync::Syncer;
use hubsync::types::Catalog;

#[derive(Parser)]
#[command(name = "hubsync")]
#[command(about = "A Tekton catalog synchronization engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database and register catalogs
    Init {
        /// Data directory for the database
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Catalogs definition file
        #[arg(long, default_value = "./catalogs.toml")]
        catalogs: String,
    },

    /// Sync catalogs once and exit
    Sync {
        /// Data directory for the database
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Workspace directory for catalog checkouts
        #[arg(long)]
        clone_dir: Option<String>,

        /// Catalog name to sync; all catalogs when omitted
        name: Option<String>,
    },

    /// Run the sync worker, refreshing every interval until interrupted
    Run {
        /// Data directory for the database
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Workspace directory for catalog checkouts
        #[arg(long)]
        clone_dir: Option<String>,

        /// Minutes between refresh rounds
        #[arg(long, default_value = "30")]
        interval: u64,
    },
}

fn build_config(data_dir: String, clone_dir: Option<String>) -> Config {
    let data_dir = PathBuf::from(data_dir);
    let clone_dir = clone_dir
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join("catalogs"));

    Config {
        data_dir,
        clone_dir,
        ..Config::default()
    }
}

fn run_init(data_dir: String, catalogs_path: String) -> anyhow::Result<()> {
    let config = build_config(data_dir, None);
    fs::create_dir_all(&config.data_dir)?;

    let store = SqliteStore::new(config.db_path())?;
    store.initialize()?;

    let entries = config::load_catalogs(catalogs_path.as_ref())?;
    let mut registered = 0;

    for entry in entries {
        if let Some(mut existing) = store.get_catalog_by_name(&entry.name)? {
            existing.org = entry.org;
            existing.url = entry.url;
            existing.revision = entry.revision;
            existing.context_dir = entry.context_dir;
            store.update_catalog(&existing)?;
            continue;
        }

        let now = Utc::now();
        store.create_catalog(&Catalog {
            id: Uuid::new_v4().to_string(),
            name: entry.name,
            org: entry.org,
            url: entry.url,
            revision: entry.revision,
            context_dir: entry.context_dir,
            sha: None,
            created_at: now,
            updated_at: now,
        })?;
        registered += 1;
    }

    println!(
        "Initialized {} ({} new catalogs)",
        config.db_path().display(),
        registered
    );

    Ok(())
}

fn open_store(config: &Config) -> anyhow::Result<SqliteStore> {
    if !config.db_path().exists() {
        bail!(
            "Database not found at {}. Run 'hubsync init' first.",
            config.db_path().display()
        );
    }

    let store = SqliteStore::new(config.db_path())?;
    store.initialize()?;
    Ok(store)
}

async fn run_sync(config: Config, name: Option<String>) -> anyhow::Result<()> {
    let store = Arc::new(open_store(&config)?);

    let catalogs = match name {
        Some(name) => match store.get_catalog_by_name(&name)? {
            Some(catalog) => vec![catalog],
            None => bail!("Catalog '{}' not found", name),
        },
        None => store.list_catalogs()?,
    };

    if catalogs.is_empty() {
        bail!("No catalogs registered. Run 'hubsync init' first.");
    }

    let syncer = Syncer::with_retry_delay(
        store.clone(),
        Arc::new(Git2Client),
        config.clone_dir.clone(),
        config.retry_delay,
    );
    syncer.run()?;

    let mut jobs = Vec::new();
    for catalog in &catalogs {
        jobs.push(syncer.enqueue(None, &catalog.id)?);
    }

    // Wait for every enqueued job to reach a terminal state.
    loop {
        let mut pending = 0;
        for job in &jobs {
            if let Some(job) = store.get_sync_job(&job.id)? {
                if !job.status.is_terminal() {
                    pending += 1;
                }
            }
        }

        if pending == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    syncer.stop();

    for catalog in &catalogs {
        let errors = store.list_catalog_errors(&catalog.id)?;
        let resources = store.list_resources(&catalog.id)?;
        println!(
            "{}: {} resources, {} issues",
            catalog.name,
            resources.len(),
            errors.len()
        );
    }

    Ok(())
}

async fn run_worker(config: Config, interval: u64) -> anyhow::Result<()> {
    let store = Arc::new(open_store(&config)?);

    let syncer = Syncer::with_retry_delay(
        store.clone(),
        Arc::new(Git2Client),
        config.clone_dir.clone(),
        config.retry_delay,
    );
    syncer.run()?;

    info!(
        interval_minutes = interval,
        "sync worker started, press Ctrl-C to stop"
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(interval * 60));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for catalog in store.list_catalogs()? {
                    syncer.enqueue(None, &catalog.id)?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    info!("shutting down");
    syncer.stop();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hubsync=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { data_dir, catalogs } => {
            run_init(data_dir, catalogs)?;
        }
        Commands::Sync {
            data_dir,
            clone_dir,
            name,
        } => {
            run_sync(build_config(data_dir, clone_dir), name).await?;
        }
        Commands::Run {
            data_dir,
            clone_dir,
            interval,
        } => {
            run_worker(build_config(data_dir, clone_dir), interval).await?;
        }
    }

    Ok(())
}
