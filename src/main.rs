use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use feed_pipeline::{Backend, FeedConfig, Pipeline, RunOptions, RunParams, Settings};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "feed-pipeline")]
#[command(about = "Load CSV exports into the warehouse from declarative feed configs")]
struct Args {
    /// Feed config directory (default: FEEDS_DIR or ./feeds)
    #[arg(long, global = true)]
    feeds_dir: Option<PathBuf>,

    /// Warehouse URL (default: WAREHOUSE_URL)
    #[arg(long, global = true)]
    warehouse_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one feed
    Run {
        feed: String,

        /// Run parameter as key=value; repeatable
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Date stamped into run_date fields (default: today)
        #[arg(long)]
        run_date: Option<NaiveDate>,

        /// Read, map, normalize and resolve only
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate one feed config, or all of them
    Validate { feed: Option<String> },
    /// List configured feeds
    List,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut settings = Settings::from_env().context("Invalid settings")?;
    if let Some(dir) = args.feeds_dir {
        settings.feeds_dir = dir;
    }
    if let Some(url) = args.warehouse_url {
        settings.warehouse_url = url;
    }

    match args.command {
        Command::Run {
            feed,
            params,
            run_date,
            dry_run,
        } => {
            let config = FeedConfig::load(&settings.feeds_dir, &feed)
                .with_context(|| format!("Failed to load feed '{}'", feed))?;
            let run_date = run_date.unwrap_or_else(|| Local::now().date_naive());
            let params = RunParams::from_pairs(params.as_slice(), run_date)?;
            let backend = Backend::connect(&settings.warehouse_url)
                .await
                .context("Failed to connect to warehouse")?;

            let pipeline = Pipeline::new(&settings, backend.warehouse(), backend.references());
            let report = pipeline.run(&config, &params, RunOptions { dry_run }).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.succeeded() {
                bail!(
                    "feed '{}' failed: {}",
                    feed,
                    report.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Command::Validate { feed: Some(name) } => {
            FeedConfig::load(&settings.feeds_dir, &name)?;
            info!("Feed '{}' is valid", name);
        }
        Command::Validate { feed: None } => {
            let mut failures = 0;
            for entry in std::fs::read_dir(&settings.feeds_dir)
                .with_context(|| format!("Cannot read {}", settings.feeds_dir.display()))?
            {
                let path = entry?.path();
                if path.extension().map(|e| e != "json").unwrap_or(true) {
                    continue;
                }
                match FeedConfig::load_file(&path) {
                    Ok(feed) => info!("Feed '{}' is valid", feed.name),
                    Err(e) => {
                        error!("{}", e);
                        failures += 1;
                    }
                }
            }
            if failures > 0 {
                bail!("{} feed config(s) are invalid", failures);
            }
        }
        Command::List => {
            for feed in FeedConfig::load_all(&settings.feeds_dir)? {
                println!(
                    "{:<24} {:<36} {}",
                    feed.name,
                    feed.destination.table,
                    feed.description.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}
