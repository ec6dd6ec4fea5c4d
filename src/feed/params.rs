//! Run parameters: values an operator used to type at a prompt (week label,
//! checkpoint name, manual error counts), now supplied up front.

use crate::error::{PipelineError, Result};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunParams {
    values: BTreeMap<String, String>,
    /// Date stamped into `run_date` derivations
    pub run_date: NaiveDate,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
            run_date: Local::now().date_naive(),
        }
    }
}

impl RunParams {
    pub fn new(run_date: NaiveDate) -> Self {
        Self {
            values: BTreeMap::new(),
            run_date,
        }
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.values.insert(name.to_string(), value.to_string());
        self
    }

    /// Parse `key=value` pairs as given on the command line.
    pub fn from_pairs<S: AsRef<str>>(pairs: &[S], run_date: NaiveDate) -> Result<Self> {
        let mut params = Self::new(run_date);
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                PipelineError::Config(format!("parameter '{}' is not in key=value form", pair))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(PipelineError::Config(format!("parameter '{}' has an empty name", pair)));
            }
            params.values.insert(key.to_string(), value.trim().to_string());
        }
        Ok(params)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|s| s.as_str())
    }

    /// Fails on missing required params; unknown params are only warned about.
    pub fn check(&self, feed: &str, specs: &[ParamSpec]) -> Result<()> {
        let missing: Vec<&str> = specs
            .iter()
            .filter(|s| s.required && !self.values.contains_key(&s.name))
            .map(|s| s.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::Config(format!(
                "feed '{}' requires parameter(s): {}",
                feed,
                missing.join(", ")
            )));
        }
        for key in self.values.keys() {
            if !specs.iter().any(|s| &s.name == key) {
                warn!("Parameter '{}' is not used by feed '{}'", key, feed);
            }
        }
        Ok(())
    }
}
