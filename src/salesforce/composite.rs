//! Composite API multiplexing of sObject collection operations.
//!
//! Records are partitioned into batches of at most 200, each batch becomes
//! one sub-request, and up to 25 sub-requests travel in a single
//! `POST /composite` call. Per-record results come back flattened in
//! submission order; a failed record never turns into a call-level error.
//!
//! Every check (batch size, sub-request count, required identifiers) runs
//! before anything is sent.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};
use url::form_urlencoded;

use crate::error::Error;
use crate::salesforce::client::{ApiErrorBody, ApiRequest, SalesforceClient};
use crate::streaming::partitioner::{partition_for_composite, Batch};
use crate::streaming::record::{require_field, Record, ID_FIELD};

/// Path of sObject collection resources, relative to the data path.
const SOBJECTS_COLLECTION_PATH: &str = "/composite/sobjects";

/// Prefix of the per-envelope reference ids (`refObj0`, `refObj1`, ...).
const REFERENCE_PREFIX: &str = "refObj";

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// One error reported for a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationError {
    /// Salesforce status code, e.g. `REQUIRED_FIELD_MISSING`.
    #[serde(alias = "errorCode")]
    pub status_code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl From<ApiErrorBody> for OperationError {
    fn from(error: ApiErrorBody) -> Self {
        Self {
            status_code: error.error_code,
            message: error.message,
            fields: error.fields,
        }
    }
}

/// Outcome of one record operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    #[serde(default)]
    pub id: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<OperationError>,
    /// Upsert only: whether the record was created rather than updated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<bool>,
}

/// Flattened results of one composite call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeResponse {
    /// One result per submitted record, in submission order.
    pub results: Vec<OperationResult>,
    /// True if any result reports failure. Informational only.
    pub has_errors: bool,
}

impl CompositeResponse {
    fn from_results(results: Vec<OperationResult>) -> Self {
        let has_errors = results.iter().any(|r| !r.success);
        Self {
            results,
            has_errors,
        }
    }

    /// Results that failed.
    pub fn failures(&self) -> impl Iterator<Item = &OperationResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompositeEnvelope {
    all_or_none: bool,
    composite_request: Vec<SubRequest>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubRequest {
    method: String,
    url: String,
    reference_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<Value>,
}

/// Body of an sObject collection sub-request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SObjectCollection {
    all_or_none: bool,
    records: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompositeEnvelopeResponse {
    composite_response: Vec<SubResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubResponse {
    #[serde(default)]
    body: Value,
    http_status_code: u16,
    reference_id: String,
}

/// A prepared sub-request and the identifiers of the records it carries.
struct PreparedBatch {
    request: SubRequest,
    record_ids: Vec<Option<String>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// CompositeClient
// ─────────────────────────────────────────────────────────────────────────────

/// Client for multiplexed sObject collection operations.
#[derive(Debug, Clone)]
pub struct CompositeClient {
    client: SalesforceClient,
}

impl CompositeClient {
    pub fn new(client: SalesforceClient) -> Self {
        Self { client }
    }

    /// Inserts records of `sobject`.
    pub async fn insert(
        &self,
        sobject: &str,
        records: Vec<Record>,
        all_or_none: bool,
        max_batch_size: usize,
    ) -> Result<CompositeResponse, Error> {
        self.multiplex(
            Method::POST,
            SOBJECTS_COLLECTION_PATH,
            sobject,
            all_or_none,
            max_batch_size,
            records,
        )
        .await
    }

    /// Updates records of `sobject`. Every record must carry an `Id`.
    pub async fn update(
        &self,
        sobject: &str,
        records: Vec<Record>,
        all_or_none: bool,
        max_batch_size: usize,
    ) -> Result<CompositeResponse, Error> {
        require_field(&records, ID_FIELD, |index, field| Error::MissingIdentifier {
            index,
            field,
        })?;

        self.multiplex(
            Method::PATCH,
            SOBJECTS_COLLECTION_PATH,
            sobject,
            all_or_none,
            max_batch_size,
            records,
        )
        .await
    }

    /// Upserts records of `sobject` matched on `external_id_field`, which
    /// every record must carry.
    pub async fn upsert(
        &self,
        sobject: &str,
        external_id_field: &str,
        records: Vec<Record>,
        all_or_none: bool,
        max_batch_size: usize,
    ) -> Result<CompositeResponse, Error> {
        require_field(&records, external_id_field, |index, field| {
            Error::MissingExternalId { index, field }
        })?;

        let target = format!("{}/{}/{}", SOBJECTS_COLLECTION_PATH, sobject, external_id_field);
        self.multiplex(
            Method::PATCH,
            &target,
            sobject,
            all_or_none,
            max_batch_size,
            records,
        )
        .await
    }

    /// Deletes records by `Id`. Identifiers travel in the sub-request URI.
    pub async fn delete(
        &self,
        records: Vec<Record>,
        all_or_none: bool,
        max_batch_size: usize,
    ) -> Result<CompositeResponse, Error> {
        require_field(&records, ID_FIELD, |index, field| Error::MissingIdentifier {
            index,
            field,
        })?;

        let batches = partition_for_composite(records, max_batch_size)?;
        let collection_path = format!("{}{}", self.client.data_path(), SOBJECTS_COLLECTION_PATH);

        let prepared = batches
            .into_iter()
            .map(|batch| {
                let ids: Vec<String> = batch.records().iter().filter_map(Record::id).collect();
                let query = form_urlencoded::Serializer::new(String::new())
                    .append_pair("ids", &ids.join(","))
                    .append_pair("allOrNone", &all_or_none.to_string())
                    .finish();

                PreparedBatch {
                    request: SubRequest {
                        method: Method::DELETE.to_string(),
                        url: format!("{}?{}", collection_path, query),
                        reference_id: reference_id(batch.index()),
                        body: None,
                    },
                    record_ids: ids.into_iter().map(Some).collect(),
                }
            })
            .collect();

        self.send(all_or_none, prepared).await
    }

    /// Sends `records` of `sobject` to the sObject collection resource at
    /// `target_path` (relative to the data path), one sub-request per batch.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidBatchSize` - `max_batch_size` outside 1..=200
    /// - `Error::TooManySubrequests` - more than 25 batches needed
    /// - Transport and remote errors of the composite call itself
    pub async fn multiplex(
        &self,
        method: Method,
        target_path: &str,
        sobject: &str,
        all_or_none: bool,
        max_batch_size: usize,
        records: Vec<Record>,
    ) -> Result<CompositeResponse, Error> {
        let batches = partition_for_composite(records, max_batch_size)?;
        let url = format!("{}{}", self.client.data_path(), target_path);

        let prepared = batches
            .into_iter()
            .map(|batch| prepare_collection(&method, &url, sobject, all_or_none, batch))
            .collect::<Result<Vec<_>, Error>>()?;

        self.send(all_or_none, prepared).await
    }

    /// Sends one envelope and flattens the sub-responses.
    async fn send(
        &self,
        all_or_none: bool,
        prepared: Vec<PreparedBatch>,
    ) -> Result<CompositeResponse, Error> {
        if prepared.is_empty() {
            return Ok(CompositeResponse::default());
        }

        let record_count: usize = prepared.iter().map(|p| p.record_ids.len()).sum();
        let (requests, record_ids): (Vec<SubRequest>, Vec<Vec<Option<String>>>) = prepared
            .into_iter()
            .map(|p| (p.request, p.record_ids))
            .unzip();

        info!(
            "[COMPOSITE] POST /composite ({} sub-requests, {} records)",
            requests.len(),
            record_count
        );

        let envelope = CompositeEnvelope {
            all_or_none,
            composite_request: requests,
        };
        let path = format!("{}/composite", self.client.data_path());
        let response = self
            .client
            .execute(&ApiRequest::post(path).json(&envelope)?)
            .await?;
        let parsed: CompositeEnvelopeResponse = response.json()?;

        let results = flatten_results(parsed.composite_response, &record_ids)?;
        let response = CompositeResponse::from_results(results);

        if response.has_errors {
            warn!(
                "[COMPOSITE] {} of {} records failed",
                response.failures().count(),
                response.results.len()
            );
        } else {
            info!("[COMPOSITE] {} records succeeded", response.results.len());
        }

        Ok(response)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

fn reference_id(index: usize) -> String {
    format!("{}{}", REFERENCE_PREFIX, index)
}

fn reference_index(reference_id: &str) -> Option<usize> {
    reference_id.strip_prefix(REFERENCE_PREFIX)?.parse().ok()
}

/// Builds an sObject collection sub-request for one batch.
fn prepare_collection(
    method: &Method,
    url: &str,
    sobject: &str,
    all_or_none: bool,
    batch: Batch<Record>,
) -> Result<PreparedBatch, Error> {
    let reference_id = reference_id(batch.index());
    let records = batch.into_records();
    let record_ids = records.iter().map(Record::id).collect();

    let wire_records = records
        .into_iter()
        .map(|record| {
            let mut map = Map::with_capacity(record.len() + 1);
            map.insert("attributes".into(), serde_json::json!({ "type": sobject }));
            for (field, value) in record.iter() {
                map.insert(field.to_string(), value.clone());
            }
            Value::Object(map)
        })
        .collect();

    let body = serde_json::to_value(SObjectCollection {
        all_or_none,
        records: wire_records,
    })
    .map_err(|e| Error::InvalidRecord(format!("Failed to serialize records: {}", e)))?;

    Ok(PreparedBatch {
        request: SubRequest {
            method: method.to_string(),
            url: url.to_string(),
            reference_id,
            body: Some(body),
        },
        record_ids,
    })
}

/// Orders sub-responses by reference id and expands each into per-record
/// results. A failed sub-request yields one failed result per record it
/// carried, all sharing the sub-request's errors.
///
/// Every sub-request sent must be answered exactly once, and a successful
/// answer must carry one result per record sent.
fn flatten_results(
    sub_responses: Vec<SubResponse>,
    record_ids: &[Vec<Option<String>>],
) -> Result<Vec<OperationResult>, Error> {
    let mut slots: Vec<Option<SubResponse>> = record_ids.iter().map(|_| None).collect();

    for sub in sub_responses {
        let slot = reference_index(&sub.reference_id)
            .and_then(|index| slots.get_mut(index))
            .ok_or_else(|| {
                Error::UnexpectedResponse(format!("Unknown reference id: {}", sub.reference_id))
            })?;
        if slot.is_some() {
            return Err(Error::UnexpectedResponse(format!(
                "Duplicate reference id: {}",
                sub.reference_id
            )));
        }
        *slot = Some(sub);
    }

    let mut results = Vec::with_capacity(record_ids.iter().map(Vec::len).sum());

    for (index, (slot, ids)) in slots.into_iter().zip(record_ids).enumerate() {
        let sub = slot.ok_or_else(|| {
            Error::UnexpectedResponse(format!("No sub-response for {}", reference_id(index)))
        })?;

        if (200..300).contains(&sub.http_status_code) {
            let batch_results: Vec<OperationResult> = serde_json::from_value(sub.body)
                .map_err(|e| {
                    Error::UnexpectedResponse(format!(
                        "Invalid result list for {}: {}",
                        sub.reference_id, e
                    ))
                })?;
            if batch_results.len() != ids.len() {
                return Err(Error::UnexpectedResponse(format!(
                    "{} returned {} results for {} records",
                    sub.reference_id,
                    batch_results.len(),
                    ids.len()
                )));
            }
            results.extend(batch_results);
            continue;
        }

        let errors: Vec<OperationError> = serde_json::from_value::<Vec<ApiErrorBody>>(sub.body)
            .map(|errors| errors.into_iter().map(OperationError::from).collect())
            .unwrap_or_else(|_| {
                vec![OperationError {
                    status_code: format!("HTTP_{}", sub.http_status_code),
                    message: "Sub-request failed".to_string(),
                    fields: Vec::new(),
                }]
            });

        results.extend(ids.iter().map(|id| OperationResult {
            id: id.clone(),
            success: false,
            errors: errors.clone(),
            created: None,
        }));
    }

    Ok(results)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
