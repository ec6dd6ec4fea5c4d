//! Pipeline runner: drives one feed through read, map, normalize, resolve,
//! write and archive, recording everything in a [`RunReport`].

use crate::archive::Archiver;
use crate::error::{PipelineError, Result};
use crate::feed::{FeedConfig, RunParams};
use crate::ingestion::{locate_input, map_records, CsvSource, InputSource};
use crate::lock::RunLock;
use crate::normalize::{self, Normalizer};
use crate::record::{Batch, MappedRecord};
use crate::report::{RowIssue, RunReport, RunStatus, Stage};
use crate::resolver::{self, ReferenceStore};
use crate::retry::RetryPolicy;
use crate::settings::Settings;
use crate::warehouse::{ReplaceWindow, Warehouse};
use crate::writer::ReplaceWindowWriter;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Stop after resolution; nothing is written, archived or reported to disk
    pub dry_run: bool,
}

pub struct Pipeline<'a> {
    warehouse: &'a dyn Warehouse,
    references: &'a dyn ReferenceStore,
    archiver: Archiver,
    lock_dir: PathBuf,
    reports_dir: PathBuf,
    retry: RetryPolicy,
}

impl<'a> Pipeline<'a> {
    pub fn new(settings: &Settings, warehouse: &'a dyn Warehouse, references: &'a dyn ReferenceStore) -> Self {
        Self {
            warehouse,
            references,
            archiver: Archiver::new(&settings.archive_dir, settings.archive_format),
            lock_dir: settings.lock_dir.clone(),
            reports_dir: settings.reports_dir.clone(),
            retry: settings.retry_policy(),
        }
    }

    /// Run one feed. Failures are reported, never returned.
    pub async fn run(&self, feed: &FeedConfig, params: &RunParams, options: RunOptions) -> RunReport {
        let mut report = RunReport::new(&feed.name);
        info!("Run {} of feed '{}' starting", report.run_id, feed.name);

        match self.execute(feed, params, options, &mut report).await {
            Ok(()) => info!(
                "Feed '{}' finished {:?}: read {}, dropped {}, written {}",
                feed.name, report.status, report.counts.read, report.counts.dropped, report.counts.written
            ),
            Err(e) => {
                error!("Feed '{}' failed during {}: {}", feed.name, report.stage, e);
                report.fail(&e);
            }
        }

        if !options.dry_run && report.status != RunStatus::NoInput {
            if let Err(e) = report.save(&self.reports_dir) {
                warn!("Could not save run report: {}", e);
            }
        }
        report
    }

    async fn execute(
        &self,
        feed: &FeedConfig,
        params: &RunParams,
        options: RunOptions,
        report: &mut RunReport,
    ) -> Result<()> {
        params.check(&feed.name, &feed.params)?;
        let _lock = RunLock::acquire(&self.lock_dir, &feed.name)?;

        report.advance(Stage::Reading)?;
        let source_path = match locate_input(&feed.source.directory) {
            Ok(path) => path,
            Err(PipelineError::InputNotFound(dir)) => {
                info!("Nothing to load for '{}' in {}", feed.name, dir.display());
                report.finish(RunStatus::NoInput);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        report.source = Some(source_path.clone());
        let mut source = CsvSource::open(&source_path, &feed.source);
        let raw = source.read()?;
        report.counts.read = raw.len();
        info!("Read {} rows from {}", raw.len(), source.source_id());

        report.advance(Stage::Mapping)?;
        let mapped = map_records(raw, &feed.columns)?;
        report.record_issues(mapped.issues);

        report.advance(Stage::Normalizing)?;
        let normalizer = Normalizer::new(feed, params)?;
        let mut batch: Batch = Vec::with_capacity(mapped.records.len());
        let mut issues = Vec::new();
        for mut record in mapped.records {
            match normalizer.normalize(&mut record) {
                Ok(()) => batch.push(record),
                Err(e) => issues.push(row_issue(record.row, Stage::Normalizing, e)?),
            }
        }
        report.record_issues(issues);

        report.advance(Stage::Resolving)?;
        let resolved = resolver::resolve(
            batch,
            &feed.references,
            self.references,
            &feed.destination,
            feed.calendar.as_ref().map(|c| &c.pivot),
        )
        .await?;
        report.counts.resolved = resolved.resolved;
        report.record_issues(resolved.issues);

        let extra = normalizer.extra_rows()?;
        report.counts.extra = extra.len();
        let (batch, issues) = finalize(resolved.records.into_iter().chain(extra), feed)?;
        report.record_issues(issues);

        let window = ReplaceWindow::for_batch(&feed.destination.replace, &batch);
        report.window = window.clone();

        if options.dry_run {
            info!(
                "Dry run: {} rows would be written to {}{}",
                batch.len(),
                feed.destination.table,
                window.as_ref().map(|w| format!(" replacing {}", w)).unwrap_or_default()
            );
            report.advance(Stage::Done)?;
            report.finish(RunStatus::DryRun);
            return Ok(());
        }

        report.advance(Stage::Writing)?;
        let table = &feed.destination.table;
        let schema = &feed.destination.schema;
        self.warehouse.ensure_table(table, schema).await?;
        let writer = ReplaceWindowWriter::new(self.warehouse, self.retry.clone());
        report.counts.written = writer.write(table, schema, &batch, window.as_ref()).await? as usize;

        report.advance(Stage::Archiving)?;
        match self
            .archiver
            .archive(&batch, schema, &source_path, feed.archive_name())
        {
            Ok(path) => report.archive_path = Some(path),
            Err(e) => {
                report.manual_follow_up = true;
                error!(
                    "{} rows are in {} but {} was not archived; move it aside before the next run",
                    batch.len(),
                    table,
                    source_path.display()
                );
                return Err(e);
            }
        }

        report.advance(Stage::Done)?;
        report.finish(RunStatus::Succeeded);
        Ok(())
    }
}

/// Row-level errors become issues; anything else aborts the run.
fn row_issue(row: usize, stage: Stage, error: PipelineError) -> Result<RowIssue> {
    match RowIssue::from_error(row, stage, &error) {
        Some(issue) => Ok(issue),
        None => Err(error),
    }
}

fn finalize(
    records: impl Iterator<Item = MappedRecord>,
    feed: &FeedConfig,
) -> Result<(Batch, Vec<RowIssue>)> {
    let mut batch = Vec::new();
    let mut issues = Vec::new();
    for mut record in records {
        match normalize::finalize(&mut record, &feed.destination) {
            Ok(()) => batch.push(record),
            Err(e) => issues.push(row_issue(record.row, Stage::Resolving, e)?),
        }
    }
    Ok((batch, issues))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::SqliteWarehouse;

    fn settings(root: &std::path::Path) -> Settings {
        Settings {
            archive_dir: root.join("archive"),
            lock_dir: root.join("locks"),
            reports_dir: root.join("reports"),
            ..Settings::default()
        }
    }

    fn feed(upload: &std::path::Path) -> FeedConfig {
        let json = format!(
            r#"{{
            "name": "roster",
            "source": {{ "directory": {:?} }},
            "columns": {{ "rename": {{ "Student ID": "id", "Name": "name" }} }},
            "destination": {{
                "table": "student_info.roster",
                "schema": [
                    {{ "name": "id", "type": "integer", "nullable": false }},
                    {{ "name": "name", "type": "string" }}
                ],
                "replace": {{ "policy": "full" }}
            }}
        }}"#,
            upload.display().to_string()
        );
        let feed: FeedConfig = serde_json::from_str(&json).unwrap();
        feed.validate().unwrap();
        feed
    }

    #[tokio::test]
    async fn test_no_input_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let wh = SqliteWarehouse::open_in_memory().unwrap();
        let pipeline = Pipeline::new(&settings(dir.path()), &wh, &wh);
        let report = pipeline
            .run(&feed(&dir.path().join("uploads")), &RunParams::default(), RunOptions::default())
            .await;
        assert_eq!(report.status, RunStatus::NoInput);
        assert!(report.succeeded());
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let upload = dir.path().join("uploads");
        std::fs::create_dir_all(&upload).unwrap();
        std::fs::write(upload.join("roster.csv"), "Student ID,Name\n1001,Ada\n,\nx,Bad\n").unwrap();
        let wh = SqliteWarehouse::open_in_memory().unwrap();
        let pipeline = Pipeline::new(&settings(dir.path()), &wh, &wh);
        let report = pipeline
            .run(&feed(&upload), &RunParams::default(), RunOptions { dry_run: true })
            .await;
        assert_eq!(report.status, RunStatus::DryRun);
        assert_eq!(report.counts.read, 3);
        assert_eq!(report.counts.dropped, 2);
        assert!(upload.join("roster.csv").exists());
        assert!(wh.count_rows("student_info.roster").is_err());
    }

    #[tokio::test]
    async fn test_missing_param_fails_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let mut feed = feed(&dir.path().join("uploads"));
        feed.params.push(serde_json::from_str(r#"{ "name": "week" }"#).unwrap());
        let wh = SqliteWarehouse::open_in_memory().unwrap();
        let report = Pipeline::new(&settings(dir.path()), &wh, &wh)
            .run(&feed, &RunParams::default(), RunOptions::default())
            .await;
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.failed_stage, Some(Stage::Idle));
    }

    #[tokio::test]
    async fn test_held_lock_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let _held = RunLock::acquire(&settings.lock_dir, "roster").unwrap();
        let wh = SqliteWarehouse::open_in_memory().unwrap();
        let report = Pipeline::new(&settings, &wh, &wh)
            .run(&feed(&dir.path().join("uploads")), &RunParams::default(), RunOptions::default())
            .await;
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.error.unwrap().contains("already running"));
    }
}
