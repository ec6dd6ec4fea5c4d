//! Replace-window writer: clear the slice of the destination a batch covers,
//! then append the batch.

use crate::error::{PipelineError, Result, WritePhase};
use crate::feed::FieldSpec;
use crate::record::MappedRecord;
use crate::retry::RetryPolicy;
use crate::warehouse::{ReplaceWindow, Warehouse};
use tracing::{error, info};

pub struct ReplaceWindowWriter<'a> {
    warehouse: &'a dyn Warehouse,
    append_policy: RetryPolicy,
}

impl<'a> ReplaceWindowWriter<'a> {
    pub fn new(warehouse: &'a dyn Warehouse, append_policy: RetryPolicy) -> Self {
        Self {
            warehouse,
            append_policy,
        }
    }

    /// Delete `window` once, then append with retry. Returns rows appended.
    ///
    /// A failed delete aborts before anything is appended. A failed append leaves the
    /// window cleared; that state is logged so the load can be repeated by hand.
    pub async fn write(
        &self,
        table: &str,
        schema: &[FieldSpec],
        batch: &[MappedRecord],
        window: Option<&ReplaceWindow>,
    ) -> Result<u64> {
        if let Some(window) = window {
            let delete = RetryPolicy::once(self.append_policy.attempt_timeout);
            let deleted = delete
                .run("delete", || self.warehouse.delete_window(table, window))
                .await
                .map_err(|e| PipelineError::WriteWindowFailed {
                    table: table.to_string(),
                    phase: WritePhase::Delete,
                    message: e.to_string(),
                })?;
            info!("Cleared {} rows from {} ({})", deleted, table, window);
        }

        if batch.is_empty() {
            return Ok(0);
        }

        match self
            .append_policy
            .run("append", || self.warehouse.append(table, schema, batch))
            .await
        {
            Ok(appended) => {
                info!("Appended {} rows to {}", appended, table);
                Ok(appended)
            }
            Err(e) => {
                match window {
                    Some(window) => error!(
                        "Append to {} failed after the window was cleared ({}); {} rows need reloading: {}",
                        table,
                        window,
                        batch.len(),
                        e
                    ),
                    None => error!("Append of {} rows to {} failed: {}", batch.len(), table, e),
                }
                Err(PipelineError::WriteWindowFailed {
                    table: table.to_string(),
                    phase: WritePhase::Append,
                    message: e.to_string(),
                })
            }
        }
    }
}
