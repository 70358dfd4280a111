//! Record model, CSV codec and batch partitioning.
//!
//! Everything here is pure data handling with no network access. The record
//! codec handles embedded commas and newlines inside quoted fields, and the
//! partitioner never reorders or drops records.

pub mod partitioner;
pub mod record;
pub mod record_codec;

pub use partitioner::{
    partition, partition_for_bulk, partition_for_composite, Batch, BatchSize,
    BULK_MAX_BATCH_SIZE, COMPOSITE_MAX_BATCH_SIZE, COMPOSITE_MAX_SUBREQUESTS,
};
pub use record::{normalize, Record, RecordSource, ID_FIELD};
pub use record_codec::{csv_to_records, decode_rows, records_to_csv, LineEnding};
