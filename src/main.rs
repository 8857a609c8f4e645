//! pgbatch command line entry point.
//!
//! Reads product documents as JSON and writes them through the pool, one at
//! a time or as a single all-or-nothing batch. Results go to stdout as JSON;
//! logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

use pgbatch::batch::{BatchRequest, BatchTarget};
use pgbatch::config::{AppConfig, StorageBackend};
use pgbatch::domain::Product;
use pgbatch::persistence::memory::{MemoryManager, MemoryStore};
use pgbatch::persistence::models::StoredRecord;
use pgbatch::persistence::postgres::PgManager;
use pgbatch::pool::{ConnectionManager, Pool};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Write JSON product documents to storage, all or nothing."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert one product read from a JSON file (`-` for stdin).
    Insert {
        /// Path to a JSON object.
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
    /// Insert a JSON array of products as one transaction (`-` for stdin).
    Bulk {
        /// Path to a JSON array.
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
    /// Print every stored product document, in insertion order.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::from_env().context("loading configuration")?;
    let target = BatchTarget::new(config.batch_table.as_str(), config.batch_column.as_str())
        .context("BATCH_TABLE / BATCH_COLUMN")?;
    tracing::info!(backend = ?config.backend, %target, "starting pgbatch");

    let output = match config.backend {
        StorageBackend::Postgres => {
            let manager = PgManager::from_url(&config.database_url)?;
            let pool = Pool::connect(manager, config.pool.clone())
                .await
                .context("connecting to PostgreSQL")?;
            let mut checkout = pool.acquire().await?;
            checkout
                .connection_mut()?
                .run_migrations(&config.migrations_dir)
                .await
                .context("applying migrations")?;
            checkout.release()?;
            run(&pool, target, cli.command).await
        }
        StorageBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            store.add_unique_key(target.table(), "product_id");
            let pool = Pool::connect(MemoryManager::new(store), config.pool.clone()).await?;
            run(&pool, target, cli.command).await
        }
    }?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run<M: ConnectionManager>(
    pool: &Pool<M>,
    target: BatchTarget,
    command: Command,
) -> anyhow::Result<serde_json::Value> {
    let output = match command {
        Command::Insert { path } => {
            let product: Product = read_json(&path).await?;
            let request = BatchRequest::from_serializable(target, std::slice::from_ref(&product))?;
            pool.write_batch(request)
                .await?
                .into_result()
                .with_context(|| format!("inserting product {}", product.product_id))?;
            serde_json::to_value(&product)?
        }
        Command::Bulk { path } => {
            let products: Vec<Product> = read_json(&path).await?;
            let request = BatchRequest::from_serializable(target, &products)?;
            let inserted = pool
                .write_batch(request)
                .await?
                .into_result()
                .with_context(|| format!("inserting {} products", products.len()))?;
            serde_json::json!({ "inserted": inserted })
        }
        Command::List => documents(pool.fetch_records(&target).await?),
    };

    tracing::debug!(stats = ?pool.stats(), "done");
    pool.close();
    Ok(output)
}

/// Stored rows as the bare documents they hold, in sequence order.
fn documents(records: Vec<StoredRecord>) -> serde_json::Value {
    serde_json::Value::Array(records.into_iter().map(|record| record.payload).collect())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("reading stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?
    };
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}
