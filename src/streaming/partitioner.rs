//! Order-preserving batch partitioning under Salesforce size limits.
//!
//! Splits a record sequence front-to-back into batches of at most
//! `max_batch_size` records. The composite path additionally enforces the
//! sub-request ceiling before anything is sent.

use crate::error::Error;
use crate::streaming::record::Record;

/// Largest record count one composite sObject collection sub-request accepts.
pub const COMPOSITE_MAX_BATCH_SIZE: usize = 200;

/// Largest number of sub-requests in one composite envelope.
pub const COMPOSITE_MAX_SUBREQUESTS: usize = 25;

/// Largest record count submitted as one bulk ingest job.
pub const BULK_MAX_BATCH_SIZE: usize = 10_000;

/// Batch size presets for Salesforce Bulk and Composite operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchSize {
    /// 10 records per batch
    ExtraSmall,
    /// 200 records per batch
    #[default]
    Small,
    /// 2,000 records per batch
    Medium,
    /// 10,000 records per batch
    Large,
    /// Custom record count
    Custom(usize),
}

impl BatchSize {
    /// Returns the batch size as a record count.
    pub fn as_usize(self) -> usize {
        match self {
            BatchSize::ExtraSmall => 10,
            BatchSize::Small => 200,
            BatchSize::Medium => 2_000,
            BatchSize::Large => 10_000,
            BatchSize::Custom(n) => n,
        }
    }
}

impl From<BatchSize> for usize {
    fn from(batch_size: BatchSize) -> Self {
        batch_size.as_usize()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Batch
// ─────────────────────────────────────────────────────────────────────────────

/// An ordered, immutable run of records produced by [`partition`].
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T = Record> {
    index: usize,
    records: Vec<T>,
}

impl<T> Batch<T> {
    /// Zero-based position of this batch in the partition.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consumes the batch, yielding its records.
    pub fn into_records(self) -> Vec<T> {
        self.records
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Partitioning
// ─────────────────────────────────────────────────────────────────────────────

/// Number of batches `len` records produce at `max_batch_size`.
pub fn batch_count(len: usize, max_batch_size: usize) -> usize {
    if max_batch_size == 0 {
        return 0;
    }
    len.div_ceil(max_batch_size)
}

/// Splits `records` into batches of at most `max_batch_size`, preserving
/// order. The final batch may be smaller. Empty input yields no batches.
///
/// # Errors
///
/// Returns `Error::InvalidBatchSize` unless `1 <= max_batch_size <= ceiling`.
pub fn partition<T>(
    records: Vec<T>,
    max_batch_size: usize,
    ceiling: usize,
) -> Result<Vec<Batch<T>>, Error> {
    validate_batch_size(max_batch_size, ceiling)?;

    let mut batches = Vec::with_capacity(batch_count(records.len(), max_batch_size));
    let mut records = records.into_iter().peekable();
    let mut index = 0;

    while records.peek().is_some() {
        let chunk: Vec<T> = records.by_ref().take(max_batch_size).collect();
        batches.push(Batch {
            index,
            records: chunk,
        });
        index += 1;
    }

    Ok(batches)
}

/// Partitions for a composite envelope: batch size is capped at
/// [`COMPOSITE_MAX_BATCH_SIZE`] and the batch count at
/// [`COMPOSITE_MAX_SUBREQUESTS`]. Both checks run before any batch is built.
pub fn partition_for_composite<T>(
    records: Vec<T>,
    max_batch_size: usize,
) -> Result<Vec<Batch<T>>, Error> {
    validate_batch_size(max_batch_size, COMPOSITE_MAX_BATCH_SIZE)?;

    let count = batch_count(records.len(), max_batch_size);
    if count > COMPOSITE_MAX_SUBREQUESTS {
        return Err(Error::TooManySubrequests {
            count,
            max: COMPOSITE_MAX_SUBREQUESTS,
        });
    }

    partition(records, max_batch_size, COMPOSITE_MAX_BATCH_SIZE)
}

/// Partitions for bulk ingest: one batch per job, capped at
/// [`BULK_MAX_BATCH_SIZE`].
pub fn partition_for_bulk<T>(
    records: Vec<T>,
    max_batch_size: usize,
) -> Result<Vec<Batch<T>>, Error> {
    partition(records, max_batch_size, BULK_MAX_BATCH_SIZE)
}

fn validate_batch_size(size: usize, max: usize) -> Result<(), Error> {
    if size == 0 || size > max {
        return Err(Error::InvalidBatchSize { size, max });
    }
    Ok(())
}
