//! Archiver: keeps a timestamped copy of each loaded batch and clears the upload.

use crate::error::{PipelineError, Result};
use crate::feed::FieldSpec;
use crate::record::{FieldType, MappedRecord, Value};
use chrono::{DateTime, Local, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    #[default]
    Csv,
    Parquet,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Csv => "csv",
            ArchiveFormat::Parquet => "parquet",
        }
    }
}

impl std::str::FromStr for ArchiveFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(ArchiveFormat::Csv),
            "parquet" => Ok(ArchiveFormat::Parquet),
            other => Err(PipelineError::Config(format!("unknown archive format '{}'", other))),
        }
    }
}

pub struct Archiver {
    dir: PathBuf,
    format: ArchiveFormat,
}

impl Archiver {
    pub fn new(dir: impl Into<PathBuf>, format: ArchiveFormat) -> Self {
        Self {
            dir: dir.into(),
            format,
        }
    }

    /// `<dir>/<name>-<YYYY-MM-DD_HH-MM-SS>.<ext>`, suffixed `-1`, `-2`, ... if taken.
    pub fn target_path(&self, archive_name: &str, at: DateTime<Local>) -> PathBuf {
        let stem = format!("{}-{}", archive_name, at.format("%Y-%m-%d_%H-%M-%S"));
        let ext = self.format.extension();
        let mut path = self.dir.join(format!("{}.{}", stem, ext));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{}-{}.{}", stem, n, ext));
            n += 1;
        }
        path
    }

    /// Write the batch, then remove `source`. The source stays put if writing fails.
    pub fn archive(
        &self,
        batch: &[MappedRecord],
        schema: &[FieldSpec],
        source: &Path,
        archive_name: &str,
    ) -> Result<PathBuf> {
        let failed = |message: String| PipelineError::ArchiveFailed {
            source_file: source.to_path_buf(),
            message,
        };

        std::fs::create_dir_all(&self.dir).map_err(|e| failed(e.to_string()))?;
        let target = self.target_path(archive_name, Local::now());

        let mut df = to_frame(batch, schema).map_err(|e| failed(e.to_string()))?;
        if let Err(e) = self.write_frame(&mut df, &target) {
            let _ = std::fs::remove_file(&target);
            return Err(failed(e.to_string()));
        }

        std::fs::remove_file(source).map_err(|e| failed(format!("archived to {} but {}", target.display(), e)))?;
        info!("Archived {} rows to {}", batch.len(), target.display());
        Ok(target)
    }

    fn write_frame(&self, df: &mut DataFrame, target: &Path) -> Result<()> {
        let mut file = File::create(target)?;
        match self.format {
            ArchiveFormat::Csv => {
                CsvWriter::new(&mut file).include_header(true).finish(df)?;
            }
            ArchiveFormat::Parquet => {
                ParquetWriter::new(&mut file).finish(df)?;
            }
        }
        Ok(())
    }
}

/// Columns in schema order, typed after the destination schema.
pub fn to_frame(batch: &[MappedRecord], schema: &[FieldSpec]) -> Result<DataFrame> {
    // 1970-01-01
    let epoch = NaiveDate::default();
    let mut columns = Vec::with_capacity(schema.len());
    for spec in schema {
        let name = spec.name.as_str();
        let values = batch.iter().map(|r| r.value(name));
        let series = match spec.field_type {
            FieldType::String => Series::new(
                name,
                values.map(|v| v.key_text()).collect::<Vec<Option<String>>>(),
            ),
            FieldType::Integer => Series::new(
                name,
                values
                    .map(|v| match v {
                        Value::Int(i) => Some(*i),
                        _ => None,
                    })
                    .collect::<Vec<Option<i64>>>(),
            ),
            FieldType::Float => Series::new(name, values.map(Value::as_f64).collect::<Vec<Option<f64>>>()),
            FieldType::Boolean => Series::new(
                name,
                values
                    .map(|v| match v {
                        Value::Bool(b) => Some(*b),
                        _ => None,
                    })
                    .collect::<Vec<Option<bool>>>(),
            ),
            FieldType::Date => Series::new(
                name,
                values
                    .map(|v| v.as_date().map(|d| days_since(epoch, d)))
                    .collect::<Vec<Option<i32>>>(),
            )
            .cast(&DataType::Date)?,
        };
        columns.push(series);
    }
    Ok(DataFrame::new(columns)?)
}

fn days_since(epoch: NaiveDate, date: NaiveDate) -> i32 {
    date.signed_duration_since(epoch).num_days() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn schema() -> Vec<FieldSpec> {
        serde_json::from_str(
            r#"[
            { "name": "id", "type": "integer" },
            { "name": "date", "type": "date" },
            { "name": "gradePercent", "type": "float" },
            { "name": "letterGrade", "type": "string" }
        ]"#,
        )
        .unwrap()
    }

    fn batch() -> Vec<MappedRecord> {
        let mut r = MappedRecord::new(1);
        r.set("id", Value::Int(1042));
        r.set("date", Value::Date(NaiveDate::from_ymd_opt(2024, 2, 9).unwrap()));
        r.set("gradePercent", Value::Float(92.5));
        r.set("letterGrade", Value::text("B+"));
        let mut blank = MappedRecord::new(2);
        blank.set("id", Value::Int(1043));
        vec![r, blank]
    }

    #[test]
    fn test_frame_types_follow_schema() {
        let df = to_frame(&batch(), &schema()).unwrap();
        assert_eq!(df.shape(), (2, 4));
        assert_eq!(df.column("date").unwrap().dtype(), &DataType::Date);
        assert_eq!(df.column("id").unwrap().dtype(), &DataType::Int64);
        assert_eq!(df.column("letterGrade").unwrap().null_count(), 1);
    }

    #[test]
    fn test_archive_writes_then_removes_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("grades.csv");
        std::fs::write(&source, "raw").unwrap();
        let archiver = Archiver::new(dir.path().join("archive"), ArchiveFormat::Csv);
        let path = archiver.archive(&batch(), &schema(), &source, "grades").unwrap();
        assert!(!source.exists());
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("grades-") && name.ends_with(".csv"), "{name}");
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("id,date,gradePercent,letterGrade"));
        assert!(text.contains("2024-02-09"));
    }

    #[test]
    fn test_name_collision_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = Archiver::new(dir.path(), ArchiveFormat::Parquet);
        let at = Local.with_ymd_and_hms(2024, 2, 9, 14, 3, 7).unwrap();
        let first = archiver.target_path("grades", at);
        assert_eq!(first.file_name().unwrap(), "grades-2024-02-09_14-03-07.parquet");
        std::fs::write(&first, "").unwrap();
        let second = archiver.target_path("grades", at);
        assert_eq!(second.file_name().unwrap(), "grades-2024-02-09_14-03-07-1.parquet");
    }

    #[test]
    fn test_unwritable_archive_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("grades.csv");
        std::fs::write(&source, "raw").unwrap();
        // a file where the archive directory should be
        let blocked = dir.path().join("archive");
        std::fs::write(&blocked, "").unwrap();
        let archiver = Archiver::new(&blocked, ArchiveFormat::Csv);
        let err = archiver.archive(&batch(), &schema(), &source, "grades").unwrap_err();
        assert!(matches!(err, PipelineError::ArchiveFailed { .. }));
        assert!(source.exists());
    }
}
