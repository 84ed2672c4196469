//! CSV framing over an object writer.

use csv::{Terminator, Writer, WriterBuilder};
use tracing::debug;

use crate::object_store::{ObjectStore, ObjectWriter, PublishedObject};
use crate::{SinkError, SinkResult};

/// CSV sink for one rollup artifact.
///
/// The header is written on creation, so an artifact with zero data rows is
/// still a valid, header-only CSV once committed. Records use CRLF line
/// endings and minimal quoting.
pub struct CsvArtifactSink {
    writer: Writer<Box<dyn ObjectWriter>>,
    columns: usize,
    rows_written: u64,
}

impl CsvArtifactSink {
    pub fn create(
        store: &dyn ObjectStore,
        bucket: &str,
        key: &str,
        header: &[&str],
    ) -> SinkResult<Self> {
        if header.is_empty() {
            return Err(SinkError::message("CSV header must have at least one column"));
        }

        let object = store.open(bucket, key)?;
        let mut writer = WriterBuilder::new()
            .terminator(Terminator::CRLF)
            .from_writer(object);
        writer
            .write_record(header)
            .map_err(|e| SinkError::message(format!("Failed to write CSV header: {}", e)))?;

        debug!("Created CSV sink {}/{} with {} columns", bucket, key, header.len());

        Ok(Self {
            writer,
            columns: header.len(),
            rows_written: 0,
        })
    }

    /// Append one record. The field count must match the header.
    pub fn write_row<I, S>(&mut self, fields: I) -> SinkResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let record: csv::ByteRecord = fields.into_iter().collect();
        if record.len() != self.columns {
            return Err(SinkError::message(format!(
                "Row has {} fields, header has {}",
                record.len(),
                self.columns
            )));
        }
        self.writer
            .write_byte_record(&record)
            .map_err(|e| SinkError::message(format!("Failed to write CSV row: {}", e)))?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Flush and publish the artifact.
    pub fn commit(self) -> SinkResult<PublishedObject> {
        let object = self
            .writer
            .into_inner()
            .map_err(|e| SinkError::io("Failed to flush CSV writer", e.into_error()))?;
        object.finalize()
    }

    /// Discard everything written; any previously published object is kept.
    pub fn rollback(self) {
        debug!("Rolling back CSV sink after {} rows", self.rows_written);
        drop(self);
    }
}
