//! Date, time and school-calendar normalizers.
//!
//! Feeds disagree on two-digit-year pivots and on how school years are labelled,
//! so both rules are carried in [`CalendarConfig`] rather than fixed here.

use crate::error::{PipelineError, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Century a two-digit year lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Century {
    #[serde(rename = "1900s")]
    Nineteen,
    #[serde(rename = "2000s")]
    Twenty,
}

impl Century {
    fn base(&self) -> i32 {
        match self {
            Century::Nineteen => 1900,
            Century::Twenty => 2000,
        }
    }

    fn other(&self) -> Century {
        match self {
            Century::Nineteen => Century::Twenty,
            Century::Twenty => Century::Nineteen,
        }
    }
}

/// Two-digit years `>= year` go to `at_or_above`, the rest to the other century.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotRule {
    pub year: u8,
    pub at_or_above: Century,
}

impl PivotRule {
    pub fn expand(&self, yy: u32) -> i32 {
        let century = if yy >= self.year as u32 {
            self.at_or_above
        } else {
            self.at_or_above.other()
        };
        century.base() + yy as i32
    }
}

/// Which calendar year names a school year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchoolYearLabel {
    /// Aug 2023 - Jul 2024 is SY2024
    EndYear,
    /// Aug 2023 - Jul 2024 is SY2023
    StartYear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarConfig {
    pub fiscal_start_month: u32,
    pub school_year_label: SchoolYearLabel,
    pub label_digits: u8,
    pub pivot: PivotRule,
}

impl CalendarConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=12).contains(&self.fiscal_start_month) {
            return Err(PipelineError::Config(format!(
                "fiscal_start_month must be 1-12, got {}",
                self.fiscal_start_month
            )));
        }
        if self.label_digits != 2 && self.label_digits != 4 {
            return Err(PipelineError::Config(format!(
                "label_digits must be 2 or 4, got {}",
                self.label_digits
            )));
        }
        if self.pivot.year > 99 {
            return Err(PipelineError::Config(format!(
                "pivot year must be 0-99, got {}",
                self.pivot.year
            )));
        }
        Ok(())
    }
}

/// Parse `M/D/Y` with 1-2 digit month/day and a 2 or 4 digit year.
pub fn parse_mdy(input: &str, pivot: &PivotRule) -> Result<NaiveDate> {
    let invalid = || PipelineError::InvalidDate(input.to_string());
    let parts: Vec<&str> = input.trim().split('/').collect();
    if parts.len() != 3 {
        return Err(invalid());
    }
    let mut nums = [0u32; 3];
    for (slot, part) in nums.iter_mut().zip(&parts) {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        *slot = part.parse().map_err(|_| invalid())?;
    }
    let [month, day, year] = nums;
    let year = match parts[2].len() {
        1 | 2 => pivot.expand(year),
        4 => year as i32,
        _ => return Err(invalid()),
    };
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}

/// Accepts ISO `YYYY-MM-DD`, falling back to `M/D/Y` when a pivot is available.
pub fn parse_date(input: &str, pivot: Option<&PivotRule>) -> Result<NaiveDate> {
    let trimmed = input.trim();
    if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(d);
    }
    match pivot {
        Some(p) => parse_mdy(trimmed, p),
        None => Err(PipelineError::InvalidDate(input.to_string())),
    }
}

pub fn format_iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// `H:M` or `H:M:S` to zero-padded `HH:MM:SS`.
pub fn parse_time(input: &str) -> Result<String> {
    let invalid = || PipelineError::InvalidDate(input.to_string());
    let parts: Vec<&str> = input.trim().split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(invalid());
    }
    let mut hms = [0u32; 3];
    for (slot, part) in hms.iter_mut().zip(&parts) {
        *slot = part.parse().map_err(|_| invalid())?;
    }
    let [h, m, s] = hms;
    if h > 23 || m > 59 || s > 59 {
        return Err(invalid());
    }
    Ok(format!("{:02}:{:02}:{:02}", h, m, s))
}

pub fn school_year(date: NaiveDate, calendar: &CalendarConfig) -> String {
    let in_first_half = date.month() >= calendar.fiscal_start_month;
    let year = match calendar.school_year_label {
        SchoolYearLabel::EndYear if in_first_half => date.year() + 1,
        SchoolYearLabel::EndYear => date.year(),
        SchoolYearLabel::StartYear if in_first_half => date.year(),
        SchoolYearLabel::StartYear => date.year() - 1,
    };
    if calendar.label_digits == 2 {
        format!("SY{:02}", year.rem_euclid(100))
    } else {
        format!("SY{}", year)
    }
}

pub fn semester(date: NaiveDate, calendar: &CalendarConfig) -> &'static str {
    if date.month() >= calendar.fiscal_start_month {
        "S1"
    } else {
        "S2"
    }
}
