//! Layout-selection rules for exports whose columns shift.
//!
//! Some student-information exports move every numeric column to the right when an
//! optional earlier column (a name cell, a sub-total) is populated. A [`LayoutRule`]
//! names each alternative explicitly: a predicate over which optional columns are
//! blank, and the fixed offsets that apply when it holds. Rules are checked
//! exhaustively when a feed loads, so a row can never fall through unhandled.

use crate::error::{PipelineError, Result};
use crate::record::RawRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Predicate columns beyond this make the exhaustive check too large to be sensible.
const MAX_PREDICATE_COLUMNS: usize = 12;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchPredicate {
    /// Columns that must be blank
    #[serde(default)]
    pub blank: Vec<usize>,
    /// Columns that must be populated
    #[serde(default)]
    pub non_blank: Vec<usize>,
}

impl BranchPredicate {
    fn holds(&self, is_blank: impl Fn(usize) -> bool) -> bool {
        self.blank.iter().all(|&i| is_blank(i)) && self.non_blank.iter().all(|&i| !is_blank(i))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutBranch {
    pub name: String,
    pub when: BranchPredicate,
    /// Target field -> 0-based column offset
    pub fields: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutRule {
    pub branches: Vec<LayoutBranch>,
}

impl LayoutRule {
    /// Every column any branch predicate inspects.
    pub fn predicate_columns(&self) -> Vec<usize> {
        let cols: BTreeSet<usize> = self
            .branches
            .iter()
            .flat_map(|b| b.when.blank.iter().chain(b.when.non_blank.iter()).copied())
            .collect();
        cols.into_iter().collect()
    }

    /// Fields every branch produces.
    pub fn fields(&self) -> BTreeSet<&str> {
        self.branches
            .iter()
            .flat_map(|b| b.fields.keys().map(|k| k.as_str()))
            .collect()
    }

    /// Checks that exactly one branch applies to every blank/non-blank combination
    /// of the predicate columns, and that all branches yield the same field set.
    pub fn validate(&self) -> Result<()> {
        if self.branches.is_empty() {
            return Err(PipelineError::Layout("layout rule has no branches".to_string()));
        }

        let first: BTreeSet<&String> = self.branches[0].fields.keys().collect();
        for branch in &self.branches[1..] {
            let these: BTreeSet<&String> = branch.fields.keys().collect();
            if these != first {
                return Err(PipelineError::Layout(format!(
                    "branch '{}' maps different fields than branch '{}'",
                    branch.name, self.branches[0].name
                )));
            }
        }

        let cols = self.predicate_columns();
        if cols.len() > MAX_PREDICATE_COLUMNS {
            return Err(PipelineError::Layout(format!(
                "layout predicates inspect {} columns, at most {} supported",
                cols.len(),
                MAX_PREDICATE_COLUMNS
            )));
        }

        for mask in 0u32..(1u32 << cols.len()) {
            let is_blank = |col: usize| {
                let bit = cols.iter().position(|&c| c == col).unwrap_or(0);
                mask & (1 << bit) != 0
            };
            let matching: Vec<&str> = self
                .branches
                .iter()
                .filter(|b| b.when.holds(is_blank))
                .map(|b| b.name.as_str())
                .collect();
            let describe = || {
                cols.iter()
                    .map(|&c| format!("{}={}", c, if is_blank(c) { "blank" } else { "set" }))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            match matching.len() {
                1 => {}
                0 => {
                    return Err(PipelineError::Layout(format!(
                        "no branch handles [{}]",
                        describe()
                    )))
                }
                _ => {
                    return Err(PipelineError::Layout(format!(
                        "branches {:?} all handle [{}]",
                        matching,
                        describe()
                    )))
                }
            }
        }
        Ok(())
    }

    /// The branch for this row. Validated rules always yield exactly one.
    pub fn select(&self, raw: &RawRecord) -> Result<&LayoutBranch> {
        let mut hits = self.branches.iter().filter(|b| b.when.holds(|i| raw.is_blank_at(i)));
        match (hits.next(), hits.next()) {
            (Some(branch), None) => Ok(branch),
            _ => Err(PipelineError::Layout(format!(
                "row {} does not select exactly one layout branch",
                raw.row
            ))),
        }
    }
}
