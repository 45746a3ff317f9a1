//! Load side of the pipeline: the [`Sink`] seam, its SQLite and in-memory
//! implementations, and the batching/retrying [`DestinationWriter`].

pub mod memory;
pub mod sqlite;
pub mod writer;

use async_trait::async_trait;
use serde::Serialize;

use crate::dataset::Row;
use crate::error::SinkError;

pub use memory::MemorySink;
pub use sqlite::SqliteSink;
pub use writer::{BatchReport, DestinationWriter, LoadReport};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeCounts {
    pub inserted: usize,
    pub updated: usize,
}

/// A keyed table store. One call applies one batch atomically: rows whose
/// `merge_key` already exists update the non-key columns, the rest insert.
/// Within a batch a repeated key resolves last-write-wins.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn merge_batch(
        &self,
        table: &str,
        merge_key: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<MergeCounts, SinkError>;
}
