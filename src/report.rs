//! Run lifecycle and the report each run leaves behind.

use crate::error::{PipelineError, Result};
use crate::warehouse::ReplaceWindow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Reading,
    Mapping,
    Normalizing,
    Resolving,
    Writing,
    Archiving,
    Done,
    Failed,
}

impl Stage {
    /// Forward by one step, or into `Failed` from any live stage.
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Idle, Reading)
            | (Reading, Mapping)
            | (Mapping, Normalizing)
            | (Normalizing, Resolving)
            | (Resolving, Writing)
            | (Writing, Archiving)
            | (Archiving, Done) => true,
            // dry runs finish straight after resolution
            (Resolving, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Reading => "reading",
            Stage::Mapping => "mapping",
            Stage::Normalizing => "normalizing",
            Stage::Resolving => "resolving",
            Stage::Writing => "writing",
            Stage::Archiving => "archiving",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    DryRun,
    /// No input file was waiting; nothing was touched
    NoInput,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    BlankRow,
    Filtered,
    InvalidDate,
    InvalidNumber,
    MalformedComposite,
    MissingField,
    Unresolved,
}

/// A dropped row and why.
#[derive(Debug, Clone, Serialize)]
pub struct RowIssue {
    pub row: usize,
    pub stage: Stage,
    pub kind: IssueKind,
    pub message: String,
}

impl RowIssue {
    pub fn new(row: usize, stage: Stage, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            row,
            stage,
            kind,
            message: message.into(),
        }
    }

    /// `None` for run-level errors, which must abort instead.
    pub fn from_error(row: usize, stage: Stage, error: &PipelineError) -> Option<Self> {
        let kind = error.issue_kind()?;
        Some(Self::new(row, stage, kind, error.to_string()))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunCounts {
    pub read: usize,
    pub dropped: usize,
    pub resolved: usize,
    pub written: usize,
    pub extra: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub feed: String,
    pub status: RunStatus,
    pub stage: Stage,
    /// Stage the run was in when it failed
    pub failed_stage: Option<Stage>,
    pub error: Option<String>,
    pub source: Option<PathBuf>,
    pub counts: RunCounts,
    pub issues: Vec<RowIssue>,
    pub window: Option<ReplaceWindow>,
    pub archive_path: Option<PathBuf>,
    /// Set when the warehouse holds the run's rows but the source could not be archived
    pub manual_follow_up: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn new(feed: &str) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            feed: feed.to_string(),
            status: RunStatus::Running,
            stage: Stage::Idle,
            failed_stage: None,
            error: None,
            source: None,
            counts: RunCounts::default(),
            issues: Vec::new(),
            window: None,
            archive_path: None,
            manual_follow_up: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn advance(&mut self, next: Stage) -> Result<()> {
        if !self.stage.can_advance_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.stage.to_string(),
                to: next.to_string(),
            });
        }
        self.stage = next;
        Ok(())
    }

    pub fn record_issues(&mut self, issues: Vec<RowIssue>) {
        self.counts.dropped += issues.len();
        self.issues.extend(issues);
    }

    pub fn fail(&mut self, error: &PipelineError) {
        self.failed_stage = Some(self.stage);
        self.stage = Stage::Failed;
        self.status = RunStatus::Failed;
        self.error = Some(error.to_string());
        self.finished_at = Some(Utc::now());
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn succeeded(&self) -> bool {
        matches!(
            self.status,
            RunStatus::Succeeded | RunStatus::DryRun | RunStatus::NoInput
        )
    }

    /// Write `<dir>/<feed>-<run_id>.json`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}-{}.json", self.feed, self.run_id));
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        info!("Run report written to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_is_enforced() {
        let mut report = RunReport::new("grades");
        assert!(report.advance(Stage::Mapping).is_err());
        report.advance(Stage::Reading).unwrap();
        report.advance(Stage::Mapping).unwrap();
        assert!(report.advance(Stage::Writing).is_err());
        assert_eq!(report.stage, Stage::Mapping);
    }

    #[test]
    fn test_failed_from_any_live_stage() {
        for stage in [Stage::Idle, Stage::Reading, Stage::Writing, Stage::Archiving] {
            assert!(stage.can_advance_to(Stage::Failed));
        }
        assert!(!Stage::Done.can_advance_to(Stage::Failed));
        assert!(!Stage::Failed.can_advance_to(Stage::Reading));
    }

    #[test]
    fn test_fail_records_stage() {
        let mut report = RunReport::new("grades");
        report.advance(Stage::Reading).unwrap();
        report.fail(&PipelineError::RunLocked("grades".into()));
        assert_eq!(report.failed_stage, Some(Stage::Reading));
        assert_eq!(report.status, RunStatus::Failed);
        assert!(!report.succeeded());
    }

    #[test]
    fn test_issue_from_row_error_only() {
        let issue = RowIssue::from_error(4, Stage::Normalizing, &PipelineError::InvalidDate("x".into()));
        assert_eq!(issue.map(|i| i.kind), Some(IssueKind::InvalidDate));
        assert!(RowIssue::from_error(4, Stage::Writing, &PipelineError::Warehouse("down".into())).is_none());
    }

    #[test]
    fn test_save_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = RunReport::new("grades");
        report.record_issues(vec![RowIssue::new(2, Stage::Mapping, IssueKind::BlankRow, "blank")]);
        let path = report.save(dir.path()).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("\"blank_row\""));
        assert_eq!(report.counts.dropped, 1);
    }
}
