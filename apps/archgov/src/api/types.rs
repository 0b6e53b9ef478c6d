//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API.

use archgov_core::{
    ApplicationRecord, CatalogCompliance, ComplianceResult, FailureDescriptor, GovernanceError,
    LookupRequest, RecordId, RunSummary, Severity, Standard, StandardTally,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum length of a name filter or record id accepted over HTTP.
pub const MAX_FILTER_LENGTH: usize = 256;

/// Trim a lookup field; blank means absent.
fn clean_field(field: &str, value: Option<&str>) -> Result<Option<String>, GovernanceError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.len() > MAX_FILTER_LENGTH => Err(GovernanceError::Precondition(format!(
            "{field} length {} exceeds maximum {MAX_FILTER_LENGTH}",
            v.len()
        ))),
        Some(v) => Ok(Some(v.to_string())),
    }
}

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// RECORDS
// =============================================================================

/// Query string of `GET /records`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordsQuery {
    #[serde(default)]
    pub filter: Option<String>,
}

impl RecordsQuery {
    /// Trimmed filter, `None` when blank. Over-long filters are rejected.
    pub fn validated_filter(&self) -> Result<Option<String>, GovernanceError> {
        clean_field("filter", self.filter.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsResponse {
    pub count: usize,
    pub records: Vec<ApplicationRecord>,
}

impl RecordsResponse {
    pub fn new(records: Vec<ApplicationRecord>) -> Self {
        Self {
            count: records.len(),
            records,
        }
    }
}

// =============================================================================
// COMPLIANCE
// =============================================================================

/// Catalog-wide rule check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceResponse {
    pub total: usize,
    pub compliant: usize,
    pub results: Vec<ComplianceResult>,
    /// Required and violated counts keyed by standard name.
    pub by_standard: BTreeMap<Standard, StandardTally>,
    pub by_severity: BTreeMap<Severity, u32>,
}

impl ComplianceResponse {
    pub fn new(check: CatalogCompliance) -> Self {
        Self {
            total: check.results.len(),
            compliant: check.compliant_count(),
            results: check.results,
            by_standard: check.by_standard,
            by_severity: check.by_severity,
        }
    }
}

// =============================================================================
// RUN REQUEST/RESPONSE
// =============================================================================

/// Body of `POST /runs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub name_filter: Option<String>,
    #[serde(default)]
    pub record_id: Option<String>,
    /// Attach the base64 run archive to the response.
    #[serde(default)]
    pub archive: bool,
}

impl RunRequest {
    /// Validate and convert to a lookup request.
    ///
    /// At least one of `name_filter` and `record_id` must be non-empty.
    pub fn to_lookup(&self) -> Result<LookupRequest, GovernanceError> {
        let name_filter = clean_field("name_filter", self.name_filter.as_deref())?;
        let record_id = clean_field("record_id", self.record_id.as_deref())?;
        if name_filter.is_none() && record_id.is_none() {
            return Err(GovernanceError::Precondition(
                "name_filter or record_id is required".to_string(),
            ));
        }
        Ok(LookupRequest {
            name_filter,
            record_id: record_id.map(RecordId::new),
        })
    }
}

/// Outcome of a run, completed or failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub success: bool,
    pub summary: RunSummary,
    /// Deterministic digest of the run state.
    pub checksum: Option<u64>,
    /// Base64-encoded run archive, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
}

impl RunResponse {
    pub fn new(summary: RunSummary, checksum: Option<u64>, archive: Option<&[u8]>) -> Self {
        Self {
            success: summary.failure.is_none(),
            summary,
            checksum,
            archive: archive
                .map(|data| base64::Engine::encode(&base64::engine::general_purpose::STANDARD, data)),
        }
    }

    pub fn failure(&self) -> Option<&FailureDescriptor> {
        self.summary.failure.as_ref()
    }
}

// =============================================================================
// ERROR RESPONSE
// =============================================================================

/// Error body for requests that never reached the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub kind: Option<String>,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            kind: None,
            error: msg.into(),
        }
    }

    pub fn from_error(error: &GovernanceError) -> Self {
        Self {
            success: false,
            kind: Some(error.kind().as_str().to_string()),
            error: error.to_string(),
        }
    }
}
