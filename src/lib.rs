pub mod archive;
pub mod error;
pub mod feed;
pub mod ingestion;
pub mod lock;
pub mod normalize;
pub mod record;
pub mod report;
pub mod resolver;
pub mod retry;
pub mod runner;
pub mod settings;
pub mod warehouse;
pub mod writer;

pub use error::{PipelineError, Result};
pub use feed::{FeedConfig, RunParams};
pub use record::{Batch, FieldType, MappedRecord, RawRecord, Value};
pub use report::{RunReport, RunStatus, Stage};
pub use runner::{Pipeline, RunOptions};
pub use settings::Settings;
pub use warehouse::{Backend, ReplaceWindow, Warehouse};
