//! Runtime settings read from the environment (and `.env`, loaded by the binaries).

use crate::archive::ArchiveFormat;
use crate::error::{PipelineError, Result};
use crate::retry::RetryPolicy;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Settings {
    pub feeds_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub lock_dir: PathBuf,
    /// Run reports; kept apart from the archive so a failed archive still gets its report
    pub reports_dir: PathBuf,
    /// `sqlite://<path>`, `sqlite::memory:` or `postgres://...`
    pub warehouse_url: String,
    pub write_retries: usize,
    pub write_timeout: Duration,
    pub retry_initial_delay: Duration,
    pub archive_format: ArchiveFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            feeds_dir: PathBuf::from("feeds"),
            archive_dir: PathBuf::from("archive"),
            lock_dir: PathBuf::from(".locks"),
            reports_dir: PathBuf::from("reports"),
            warehouse_url: "sqlite://warehouse.db".to_string(),
            write_retries: 3,
            write_timeout: Duration::from_secs(120),
            retry_initial_delay: Duration::from_millis(500),
            archive_format: ArchiveFormat::Csv,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();
        if let Some(v) = lookup("FEEDS_DIR") {
            settings.feeds_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ARCHIVE_DIR") {
            settings.archive_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LOCK_DIR") {
            settings.lock_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("REPORTS_DIR") {
            settings.reports_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("WAREHOUSE_URL") {
            settings.warehouse_url = v;
        }
        if let Some(v) = lookup("WRITE_RETRIES") {
            settings.write_retries = parse("WRITE_RETRIES", &v)?;
        }
        if let Some(v) = lookup("WRITE_TIMEOUT_SECS") {
            settings.write_timeout = Duration::from_secs(parse("WRITE_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("RETRY_INITIAL_DELAY_MS") {
            settings.retry_initial_delay = Duration::from_millis(parse("RETRY_INITIAL_DELAY_MS", &v)?);
        }
        if let Some(v) = lookup("ARCHIVE_FORMAT") {
            settings.archive_format = ArchiveFormat::from_str(&v)?;
        }
        Ok(settings)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.write_retries, self.retry_initial_delay, self.write_timeout)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| PipelineError::Config(format!("{} has invalid value '{}'", key, value)))
}
