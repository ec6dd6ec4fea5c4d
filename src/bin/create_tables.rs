//! Create the destination table of every configured feed.
//!
//! Run with: cargo run --bin create_tables

use anyhow::{Context, Result};
use feed_pipeline::{Backend, FeedConfig, Settings};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env().context("Invalid settings")?;

    println!("Loading feeds from {}", settings.feeds_dir.display());
    let feeds = FeedConfig::load_all(&settings.feeds_dir)
        .with_context(|| format!("Failed to load feeds from {}", settings.feeds_dir.display()))?;
    println!("   - {} feeds", feeds.len());

    println!("Connecting to {}", settings.warehouse_url);
    let backend = Backend::connect(&settings.warehouse_url)
        .await
        .context("Failed to connect to warehouse")?;

    let warehouse = backend.warehouse();
    for feed in &feeds {
        warehouse
            .ensure_table(&feed.destination.table, &feed.destination.schema)
            .await
            .with_context(|| format!("Failed to create {}", feed.destination.table))?;
        println!(
            "   ✓ {} ({} columns) for feed '{}'",
            feed.destination.table,
            feed.destination.schema.len(),
            feed.name
        );
    }

    println!("\nCreated {} tables", feeds.len());
    Ok(())
}
