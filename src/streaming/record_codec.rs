//! Record codec: converts between CSV text and [`Record`]s.
//!
//! Uses the `csv` crate so embedded commas, quotes and newlines inside quoted
//! fields survive both directions (RFC 4180).

use csv::{ReaderBuilder, Terminator, WriterBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::streaming::record::{scalar_to_text, Record};

/// UTF-8 BOM bytes.
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Line ending format for CSV payloads.
///
/// Serializes as `"LF"` / `"CRLF"`, the values the Bulk API expects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum LineEnding {
    /// Unix-style line ending (\\n).
    #[default]
    LF,
    /// Windows-style line ending (\\r\\n).
    CRLF,
}

impl LineEnding {
    fn terminator(self) -> Terminator {
        match self {
            LineEnding::LF => Terminator::Any(b'\n'),
            LineEnding::CRLF => Terminator::CRLF,
        }
    }
}

/// Serializes records to CSV with a header row.
///
/// The header is the union of all field names in first-seen order; a record
/// without a given field writes an empty cell for it. An empty slice encodes
/// to an empty payload, while records that carry no fields at all are
/// rejected.
pub fn records_to_csv(records: &[Record], line_ending: LineEnding) -> Result<Vec<u8>, Error> {
    let mut header: Vec<&str> = Vec::new();
    for record in records {
        for field in record.fields() {
            if !header.contains(&field) {
                header.push(field);
            }
        }
    }

    if header.is_empty() {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        return Err(Error::InvalidRecord(format!(
            "{} record(s) have no fields to write",
            records.len()
        )));
    }

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .terminator(line_ending.terminator())
        .from_writer(Vec::with_capacity(records.len() * 64));

    writer
        .write_record(&header)
        .map_err(|e| Error::CsvEncode(format!("Failed to write header: {}", e)))?;

    let mut row: Vec<String> = Vec::with_capacity(header.len());
    for record in records {
        row.clear();
        row.extend(
            header
                .iter()
                .map(|field| record.get(field).map(scalar_to_text).unwrap_or_default()),
        );
        writer
            .write_record(&row)
            .map_err(|e| Error::CsvEncode(format!("Failed to write record: {}", e)))?;
    }

    writer
        .into_inner()
        .map_err(|e| Error::CsvEncode(format!("Failed to flush writer: {}", e)))
}

/// Parses CSV with a header row into records. All values are strings.
pub fn csv_to_records(data: &[u8]) -> Result<Vec<Record>, Error> {
    let data = strip_bom(data);
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(data);

    let headers = reader
        .headers()
        .map_err(|e| Error::CsvDecode(format!("Failed to read CSV headers: {}", e)))?
        .clone();

    let mut records = Vec::new();
    for result in reader.records() {
        let row = result.map_err(|e| Error::CsvDecode(format!("Failed to read CSV record: {}", e)))?;
        records.push(
            headers
                .iter()
                .zip(row.iter())
                .map(|(field, value)| (field.to_string(), Value::String(value.to_string())))
                .collect(),
        );
    }

    Ok(records)
}

/// Deserializes CSV rows into caller-supplied shapes, matching columns to
/// fields by header name.
pub fn decode_rows<T: DeserializeOwned>(data: &[u8]) -> Result<Vec<T>, Error> {
    let data = strip_bom(data);
    if data.is_empty() {
        return Ok(Vec::new());
    }

    ReaderBuilder::new()
        .has_headers(true)
        .from_reader(data)
        .deserialize()
        .map(|row| row.map_err(|e| Error::CsvDecode(format!("Failed to decode CSV row: {}", e))))
        .collect()
}

/// Returns the payload without its first line (the header row).
/// A payload with a single unterminated line has no data rows.
pub(crate) fn skip_header_row(data: &[u8]) -> &[u8] {
    let data = strip_bom(data);
    match find_line_end(data) {
        Some(pos) => &data[pos..],
        None => &[],
    }
}

/// Finds the position after the first line ending (LF or CRLF).
fn find_line_end(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|&b| b == b'\n').map(|i| i + 1)
}

fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(UTF8_BOM).unwrap_or(data)
}
