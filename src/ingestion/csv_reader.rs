//! CSV source: reads an export into raw rows, cells kept as untrimmed strings.

use crate::error::Result;
use crate::feed::SourceSpec;
use crate::ingestion::InputSource;
use crate::record::RawRecord;
use csv::{ReaderBuilder, StringRecord};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct CsvSource {
    source_id: String,
    path: Option<PathBuf>,
    csv_text: Option<String>,
    skip_lines: usize,
    has_headers: bool,
}

impl CsvSource {
    pub fn open(path: &Path, spec: &SourceSpec) -> Self {
        Self {
            source_id: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            path: Some(path.to_path_buf()),
            csv_text: None,
            skip_lines: spec.skip_lines,
            has_headers: spec.has_headers,
        }
    }

    /// In-memory CSV, mostly for tests.
    pub fn from_text(source_id: &str, csv_text: String) -> Self {
        Self {
            source_id: source_id.to_string(),
            path: None,
            csv_text: Some(csv_text),
            skip_lines: 0,
            has_headers: true,
        }
    }

    pub fn skip_lines(mut self, n: usize) -> Self {
        self.skip_lines = n;
        self
    }

    pub fn has_headers(mut self, yes: bool) -> Self {
        self.has_headers = yes;
        self
    }

    fn load_text(&mut self) -> Result<String> {
        match (self.csv_text.take(), &self.path) {
            (Some(text), _) => Ok(text),
            (None, Some(path)) => Ok(std::fs::read_to_string(path)?),
            (None, None) => Ok(String::new()),
        }
    }

    fn parse(&self, text: &str) -> Result<Vec<RawRecord>> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text).replace("\r\n", "\n");
        let body: String = text.split_inclusive('\n').skip(self.skip_lines).collect();

        let mut rdr = ReaderBuilder::new()
            .has_headers(self.has_headers)
            .flexible(true)
            .from_reader(body.as_bytes());

        let headers: Vec<String> = if self.has_headers {
            rdr.headers()?.iter().map(|h| h.trim().to_string()).collect()
        } else {
            Vec::new()
        };
        let column_name = |idx: usize| {
            headers
                .get(idx)
                .filter(|h| !h.is_empty())
                .cloned()
                .unwrap_or_else(|| format!("c{}", idx))
        };

        let mut out = Vec::new();
        let mut record = StringRecord::new();
        while rdr.read_record(&mut record)? {
            // The reader skips empty lines; they still count as (blank) data rows.
            let start = record.position().map(|p| p.byte() as usize).unwrap_or(0);
            let empty_lines = body.as_bytes()[start.min(body.len())..]
                .iter()
                .take_while(|b| **b == b'\n')
                .count();
            for _ in 0..empty_lines {
                let cells = (0..headers.len()).map(|idx| (column_name(idx), String::new())).collect();
                out.push(RawRecord { row: out.len() + 1, cells });
            }

            let width = headers.len().max(record.len());
            let cells = (0..width)
                .map(|idx| (column_name(idx), record.get(idx).unwrap_or("").to_string()))
                .collect();
            out.push(RawRecord { row: out.len() + 1, cells });
        }
        Ok(out)
    }
}

impl InputSource for CsvSource {
    fn read(&mut self) -> Result<Vec<RawRecord>> {
        let text = self.load_text()?;
        let rows = self.parse(&text)?;
        debug!("Read {} rows from {}", rows.len(), self.source_id);
        Ok(rows)
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_with_headers() {
        let mut src = CsvSource::from_text("t.csv", "Student ID, Name \n1001,Ada\n1002,Grace,extra\n".into());
        let rows = src.read().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Student ID"), Some("1001"));
        assert_eq!(rows[0].get("Name"), Some("Ada"));
        assert_eq!(rows[1].get("c2"), Some("extra"));
        assert_eq!(rows[1].row, 2);
    }

    #[test]
    fn test_skip_banner_lines() {
        let text = "Attendance Report\nGenerated 9/29/23\nid,code\n1001,A\n".to_string();
        let rows = CsvSource::from_text("t.csv", text).skip_lines(2).read().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("code"), Some("A"));
    }

    #[test]
    fn test_headerless_columns_are_positional() {
        let rows = CsvSource::from_text("t.csv", "1001,Ada\n".into())
            .has_headers(false)
            .read()
            .unwrap();
        assert_eq!(rows[0].get("c0"), Some("1001"));
        assert_eq!(rows[0].at(1), "Ada");
    }

    #[test]
    fn test_comma_only_row_is_kept_as_blank() {
        let rows = CsvSource::from_text("t.csv", "a,b\n,\n1,2\n".into()).read().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].is_blank_at(0) && rows[0].is_blank_at(1));
    }

    #[test]
    fn test_empty_line_is_a_blank_row() {
        let rows = CsvSource::from_text("t.csv", "a,b\n1,2\n\n3,4\n".into()).read().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].row, 2);
        assert!(rows[1].is_blank_at(0) && rows[1].is_blank_at(1));
        assert_eq!(rows[1].get("b"), Some(""));
        assert_eq!(rows[2].row, 3);
        assert_eq!(rows[2].get("a"), Some("3"));
    }

    #[test]
    fn test_empty_lines_with_crlf_and_trailing_newlines() {
        let rows = CsvSource::from_text("t.csv", "a\r\n1\r\n\r\n\r\n2\r\n\r\n".into())
            .read()
            .unwrap();
        let numbered: Vec<(usize, &str)> = rows.iter().map(|r| (r.row, r.at(0))).collect();
        assert_eq!(numbered, vec![(1, "1"), (2, ""), (3, ""), (4, "2")]);
    }

    #[test]
    fn test_quoted_newline_is_not_an_empty_line() {
        let rows = CsvSource::from_text("t.csv", "a,b\n\"x\n\ny\",1\n2,3\n".into()).read().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("a"), Some("x\n\ny"));
        assert_eq!(rows[1].row, 2);
    }

    #[test]
    fn test_reads_file_and_strips_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        std::fs::write(&path, "\u{feff}id\n7\n").unwrap();
        let spec: SourceSpec = serde_json::from_str(r#"{ "directory": "." }"#).unwrap();
        let mut src = CsvSource::open(&path, &spec);
        assert_eq!(src.source_id(), "export.csv");
        assert_eq!(src.read().unwrap()[0].get("id"), Some("7"));
    }
}
