#![allow(dead_code)]

use feed_pipeline::feed::FeedConfig;
use feed_pipeline::record::{MappedRecord, Value};
use feed_pipeline::warehouse::SqliteWarehouse;
use feed_pipeline::Settings;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// A scratch directory laid out like a deployment: uploads, archive, locks.
pub struct Workspace {
    pub dir: TempDir,
    pub settings: Settings,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            feeds_dir: dir.path().join("feeds"),
            archive_dir: dir.path().join("archive"),
            lock_dir: dir.path().join("locks"),
            reports_dir: dir.path().join("reports"),
            warehouse_url: "sqlite::memory:".to_string(),
            write_retries: 2,
            write_timeout: Duration::from_secs(5),
            retry_initial_delay: Duration::from_millis(1),
            ..Settings::default()
        };
        Self { dir, settings }
    }

    pub fn upload_dir(&self, feed: &str) -> PathBuf {
        self.dir.path().join("uploads").join(feed)
    }

    /// Drop a CSV into the feed's upload directory.
    pub fn upload(&self, feed: &str, file: &str, contents: &str) -> PathBuf {
        let dir = self.upload_dir(feed);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(file);
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Parse a feed config, pointing its source at this workspace.
    pub fn feed(&self, json: &str) -> FeedConfig {
        let mut feed: FeedConfig = serde_json::from_str(json).unwrap();
        feed.source.directory = self.upload_dir(&feed.name);
        feed.validate().unwrap();
        feed
    }

    pub fn archived_files(&self) -> Vec<PathBuf> {
        list(&self.settings.archive_dir)
    }

    pub fn reports(&self) -> Vec<PathBuf> {
        list(&self.settings.reports_dir)
    }
}

fn list(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect(),
        Err(_) => Vec::new(),
    }
}

pub fn date(y: i32, m: u32, d: u32) -> Value {
    Value::Date(chrono::NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

pub fn record(pairs: &[(&str, Value)]) -> MappedRecord {
    let mut r = MappedRecord::new(0);
    for (k, v) in pairs {
        r.set(k, v.clone());
    }
    r
}

pub fn at_report_feed() -> &'static str {
    r#"{
        "name": "at-report",
        "source": { "directory": "unused" },
        "columns": {
            "rename": {
                "Student > Name": "name",
                "Student > Student ID": "id",
                "Date": "date",
                "Code": "code"
            }
        },
        "derive": [
            { "rule": "date", "field": "date" },
            { "rule": "school_year", "field": "sy", "from": "date" },
            { "rule": "semester", "field": "semester", "from": "date" }
        ],
        "calendar": {
            "fiscal_start_month": 8,
            "school_year_label": "end_year",
            "label_digits": 2,
            "pivot": { "year": 22, "at_or_above": "2000s" }
        },
        "destination": {
            "table": "attendance.at_report",
            "schema": [
                { "name": "name", "type": "string" },
                { "name": "id", "type": "integer", "nullable": false },
                { "name": "date", "type": "date", "nullable": false },
                { "name": "code", "type": "string" },
                { "name": "sy", "type": "string" },
                { "name": "semester", "type": "string" }
            ],
            "replace": { "policy": "date-range", "date_field": "date" }
        }
    }"#
}

/// Seed the at-report table with one row per given date.
pub async fn seed_at_report(wh: &SqliteWarehouse, feed: &FeedConfig, dates: &[(i32, u32, u32)]) {
    use feed_pipeline::Warehouse;
    let table = &feed.destination.table;
    let schema = &feed.destination.schema;
    wh.ensure_table(table, schema).await.unwrap();
    let order = feed.destination.field_names();
    let rows: Vec<MappedRecord> = dates
        .iter()
        .enumerate()
        .map(|(i, (y, m, d))| {
            let mut r = record(&[
                ("name", Value::text("Old, Row")),
                ("id", Value::Int(9000 + i as i64)),
                ("date", date(*y, *m, *d)),
                ("code", Value::text("P")),
            ]);
            r.project(&order);
            r
        })
        .collect();
    wh.append(table, schema, &rows).await.unwrap();
}
