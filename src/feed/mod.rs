//! Feed configuration: one JSON document per recurring CSV import.
//!
//! A feed describes where its CSV lands, how columns map onto the destination
//! schema, which values are derived, which reference tables backfill identifiers,
//! and how much of the destination is replaced on each run.

pub mod params;

pub use params::{ParamSpec, RunParams};

use crate::error::{PipelineError, Result};
use crate::ingestion::layout::LayoutRule;
use crate::normalize::dates::CalendarConfig;
use crate::normalize::text::{self, CharRule};
use crate::record::FieldType;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub source: SourceSpec,
    #[serde(default)]
    pub columns: ColumnSpec,
    #[serde(default)]
    pub derive: Vec<Derivation>,
    #[serde(default)]
    pub calendar: Option<CalendarConfig>,
    #[serde(default)]
    pub references: Vec<ReferenceJoin>,
    pub destination: DestinationSpec,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// Rows appended after normalization; values are templates over run params
    #[serde(default)]
    pub extra_rows: Vec<BTreeMap<String, String>>,
    #[serde(default)]
    pub archive_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    pub directory: PathBuf,
    /// Banner lines to skip before the header row
    #[serde(default)]
    pub skip_lines: usize,
    #[serde(default = "default_true")]
    pub has_headers: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnSpec {
    #[serde(default)]
    pub drop: Vec<String>,
    /// Columns renamed by 0-based position, for exports with unreliable headers
    #[serde(default)]
    pub positions: Vec<PositionalField>,
    #[serde(default)]
    pub rename: BTreeMap<String, String>,
    /// Header columns whose names already match destination fields
    #[serde(default)]
    pub keep: Vec<String>,
    #[serde(default)]
    pub layout: Option<LayoutRule>,
    /// Columns examined by the all-empty row filter; empty means every column
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub fill_down: Vec<FillDown>,
    #[serde(default)]
    pub filters: Vec<RowFilter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionalField {
    pub index: usize,
    pub field: String,
}

/// Carry a value from a marker row onto the rows that follow it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillDown {
    pub marker_field: String,
    pub marker_value: String,
    pub value_field: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowFilter {
    pub field: String,
    #[serde(flatten)]
    pub op: FilterOp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FilterOp {
    Equals { value: String },
    NotEquals { value: String },
    StartsWith { value: String },
    NotBlank,
    Numeric,
}

/// Computed fields, applied in configuration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Derivation {
    Date {
        field: String,
        #[serde(default)]
        from: Option<String>,
    },
    Time {
        field: String,
        #[serde(default)]
        from: Option<String>,
    },
    SchoolYear {
        field: String,
        from: String,
    },
    Semester {
        field: String,
        from: String,
    },
    Number {
        field: String,
        #[serde(default)]
        from: Option<String>,
    },
    Split {
        from: String,
        into: [String; 2],
    },
    Extract {
        field: String,
        from: String,
        pattern: String,
    },
    Template {
        field: String,
        template: String,
    },
    Param {
        field: String,
        name: String,
    },
    RunDate {
        field: String,
    },
    Constant {
        field: String,
        value: String,
    },
    Ratio {
        field: String,
        numerator: Vec<String>,
        denominator: String,
        #[serde(default = "default_scale")]
        scale: f64,
    },
    CharCode {
        field: String,
        from: String,
        rules: Vec<CharRule>,
    },
    /// Lookup table keyed by the source value's text; unmatched values take `default`
    Map {
        field: String,
        from: String,
        values: BTreeMap<String, String>,
        #[serde(default)]
        default: Option<String>,
    },
}

fn default_scale() -> f64 {
    1.0
}

impl Derivation {
    /// Fields this derivation writes.
    pub fn outputs(&self) -> Vec<&str> {
        match self {
            Derivation::Split { into, .. } => vec![into[0].as_str(), into[1].as_str()],
            Derivation::Date { field, .. }
            | Derivation::Time { field, .. }
            | Derivation::SchoolYear { field, .. }
            | Derivation::Semester { field, .. }
            | Derivation::Number { field, .. }
            | Derivation::Extract { field, .. }
            | Derivation::Template { field, .. }
            | Derivation::Param { field, .. }
            | Derivation::RunDate { field }
            | Derivation::Constant { field, .. }
            | Derivation::Ratio { field, .. }
            | Derivation::CharCode { field, .. }
            | Derivation::Map { field, .. } => vec![field.as_str()],
        }
    }

    fn needs_calendar(&self) -> bool {
        matches!(
            self,
            Derivation::Date { .. } | Derivation::SchoolYear { .. } | Derivation::Semester { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    /// Only fill fields that are null after mapping
    #[default]
    MissingOnly,
    /// Reference values replace whatever the export carried
    Overwrite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceJoin {
    /// Reference table, e.g. `student_info.roster`
    pub table: String,
    /// Batch field holding the join key
    pub join_field: String,
    /// Reference column matched against `join_field`
    pub reference_key: String,
    /// Destination field -> reference column
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub fill: FillMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplacePolicy {
    #[serde(rename = "full")]
    Full,
    #[serde(rename = "date-range")]
    DateRange,
    #[serde(rename = "none")]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceSpec {
    pub policy: ReplacePolicy,
    #[serde(default)]
    pub date_field: Option<String>,
    /// Further restricts a date-range delete to the batch's school-year tags
    #[serde(default)]
    pub school_year_field: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationSpec {
    pub table: String,
    pub schema: Vec<FieldSpec>,
    pub replace: ReplaceSpec,
}

impl DestinationSpec {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.schema.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.schema.iter().map(|f| f.name.as_str()).collect()
    }
}

impl FeedConfig {
    /// Load `<dir>/<name>.json` and validate it.
    pub fn load(dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        let path = dir.as_ref().join(format!("{}.json", name));
        let feed = Self::load_file(&path)?;
        if feed.name != name {
            return Err(PipelineError::Config(format!(
                "{} declares feed name '{}'",
                path.display(),
                feed.name
            )));
        }
        Ok(feed)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let feed: FeedConfig = serde_json::from_str(&content)
            .map_err(|e| PipelineError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        feed.validate()
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(feed)
    }

    /// Every `*.json` feed in `dir`, sorted by file name.
    pub fn load_all(dir: impl AsRef<Path>) -> Result<Vec<Self>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir.as_ref())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        paths.sort();
        paths.iter().map(|p| Self::load_file(p)).collect()
    }

    pub fn archive_name(&self) -> &str {
        self.archive_name.as_deref().unwrap_or(&self.name)
    }

    pub fn validate(&self) -> Result<()> {
        let config_err = |msg: String| Err(PipelineError::Config(msg));

        if self.name.trim().is_empty() {
            return config_err("feed name is empty".to_string());
        }
        if self.destination.schema.is_empty() {
            return config_err("destination schema is empty".to_string());
        }

        let mut seen = HashSet::new();
        for field in &self.destination.schema {
            if !seen.insert(field.name.as_str()) {
                return config_err(format!("field '{}' declared twice in schema", field.name));
            }
        }

        if let Some(calendar) = &self.calendar {
            calendar.validate()?;
        } else if self.derive.iter().any(Derivation::needs_calendar) {
            return config_err("date and calendar derivations require a calendar".to_string());
        }

        if let Some(layout) = &self.columns.layout {
            layout.validate()?;
        }

        self.validate_derivations()?;
        self.validate_replace()?;
        self.validate_references()?;
        self.validate_totality()
    }

    fn validate_derivations(&self) -> Result<()> {
        let declared: BTreeSet<&str> = self.params.iter().map(|p| p.name.as_str()).collect();
        for derivation in &self.derive {
            match derivation {
                Derivation::Extract { pattern, field, .. } => {
                    let re = Regex::new(pattern).map_err(|e| {
                        PipelineError::Config(format!("pattern for '{}' is invalid: {}", field, e))
                    })?;
                    if re.captures_len() < 2 {
                        return Err(PipelineError::Config(format!(
                            "pattern for '{}' needs a capture group",
                            field
                        )));
                    }
                }
                Derivation::Param { name, field } if !declared.contains(name.as_str()) => {
                    return Err(PipelineError::Config(format!(
                        "'{}' uses undeclared param '{}'",
                        field, name
                    )));
                }
                Derivation::Ratio { denominator, numerator, field, .. }
                    if numerator.is_empty() || denominator.is_empty() =>
                {
                    return Err(PipelineError::Config(format!(
                        "ratio '{}' needs a numerator and a denominator",
                        field
                    )));
                }
                Derivation::Map { values, field, .. } if values.is_empty() => {
                    return Err(PipelineError::Config(format!("map for '{}' has no values", field)));
                }
                Derivation::CharCode { rules, field, .. } if rules.is_empty() => {
                    return Err(PipelineError::Config(format!("char_code for '{}' has no rules", field)));
                }
                _ => {}
            }
        }
        for row in &self.extra_rows {
            for (field, template) in row {
                if self.destination.field(field).is_none() {
                    return Err(PipelineError::Config(format!(
                        "extra row sets unknown field '{}'",
                        field
                    )));
                }
                for name in text::placeholders(template) {
                    if !declared.contains(name.as_str()) {
                        return Err(PipelineError::Config(format!(
                            "extra row field '{}' uses undeclared param '{}'",
                            field, name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_replace(&self) -> Result<()> {
        let replace = &self.destination.replace;
        if replace.policy == ReplacePolicy::DateRange {
            let date_field = replace.date_field.as_deref().ok_or_else(|| {
                PipelineError::Config("date-range replace needs a date_field".to_string())
            })?;
            match self.destination.field(date_field) {
                Some(f) if f.field_type == FieldType::Date => {}
                _ => {
                    return Err(PipelineError::Config(format!(
                        "replace date_field '{}' must be a date field in the schema",
                        date_field
                    )))
                }
            }
        }
        if let Some(sy) = &replace.school_year_field {
            if replace.policy != ReplacePolicy::DateRange {
                return Err(PipelineError::Config(
                    "school_year_field only applies to date-range replace".to_string(),
                ));
            }
            if self.destination.field(sy).is_none() {
                return Err(PipelineError::Config(format!(
                    "replace school_year_field '{}' is not in the schema",
                    sy
                )));
            }
        }
        Ok(())
    }

    fn validate_references(&self) -> Result<()> {
        for join in &self.references {
            if join.fields.is_empty() && !join.mandatory {
                return Err(PipelineError::Config(format!(
                    "reference join on {} fills no fields",
                    join.table
                )));
            }
            for target in join.fields.keys() {
                if self.destination.field(target).is_none() {
                    return Err(PipelineError::Config(format!(
                        "reference {} fills '{}' which is not in the schema",
                        join.table, target
                    )));
                }
            }
        }
        Ok(())
    }

    /// Every destination field must have a declared provider.
    fn validate_totality(&self) -> Result<()> {
        let mut provided: BTreeSet<&str> = BTreeSet::new();
        provided.extend(self.columns.positions.iter().map(|p| p.field.as_str()));
        provided.extend(self.columns.rename.values().map(|s| s.as_str()));
        provided.extend(self.columns.keep.iter().map(|s| s.as_str()));
        provided.extend(self.columns.fill_down.iter().map(|f| f.target.as_str()));
        if let Some(layout) = &self.columns.layout {
            provided.extend(layout.fields());
        }
        for derivation in &self.derive {
            provided.extend(derivation.outputs());
        }
        for join in &self.references {
            provided.extend(join.fields.keys().map(|s| s.as_str()));
        }

        let unmapped: Vec<&str> = self
            .destination
            .schema
            .iter()
            .map(|f| f.name.as_str())
            .filter(|name| !provided.contains(name))
            .collect();
        if unmapped.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Config(format!(
                "fields with no mapping, derivation or reference: {}",
                unmapped.join(", ")
            )))
        }
    }
}
