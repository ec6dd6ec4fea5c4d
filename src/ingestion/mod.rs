//! Ingestion: locating a feed's input, reading it into raw rows, and mapping
//! those rows onto destination field names.

pub mod csv_reader;
pub mod layout;
pub mod mapper;
pub mod source;

pub use csv_reader::CsvSource;
pub use layout::{BranchPredicate, LayoutBranch, LayoutRule};
pub use mapper::{map_records, MapOutcome};
pub use source::locate_input;

use crate::error::Result;
use crate::record::RawRecord;

/// A source of raw rows for one run.
///
/// Implementations:
/// - CsvSource: a CSV file dropped into the feed's upload directory
pub trait InputSource {
    /// Read every data row. A source is consumed by one read.
    fn read(&mut self) -> Result<Vec<RawRecord>>;

    /// Identifier used in logs, usually the file name
    fn source_id(&self) -> &str;
}
