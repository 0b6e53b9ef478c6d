//! # Core Type Definitions
//!
//! This module contains the artifact types threaded through the governance
//! pipeline:
//! - Catalog records (`ApplicationRecord`, `Environment`, `Standard`)
//! - Stage artifacts (`Violation`, `RiskFinding`, `RecommendedAction`, `Report`,
//!   `EvaluationResult`)
//! - Artifact identifiers used as reference fields
//! - Error types (`GovernanceError`, `ErrorKind`)
//!
//! ## Traceability
//!
//! Every artifact downstream of the Validation stage refers to exactly one
//! upstream artifact through a typed identifier. Identifiers are assigned by the
//! core in production order, never by the reasoner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique identifier of an application record in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of a violation in the Validation stage output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViolationId(pub u32);

/// Position of a finding in the Risk Assessment stage output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FindingId(pub u32);

/// Identifier of a recommended action. Equal to the id of the finding it remediates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub u32);

/// Content digest of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(pub u64);

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// =============================================================================
// CATALOG ENUMS
// =============================================================================

/// Deployment environment of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[serde(alias = "dev")]
    Sandbox,
    Qa,
    Uat,
    Staging,
    #[serde(alias = "prod")]
    Production,
}

impl Environment {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Sandbox => "sandbox",
            Environment::Qa => "qa",
            Environment::Uat => "uat",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" | "dev" => Ok(Environment::Sandbox),
            "qa" => Ok(Environment::Qa),
            "uat" => Ok(Environment::Uat),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(GovernanceError::InvalidRecord(format!(
                "unknown environment '{other}'"
            ))),
        }
    }
}

/// Compliance standard an application may be subject to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Standard {
    #[serde(rename = "PCI", alias = "pci")]
    Pci,
    #[serde(rename = "GDPR", alias = "gdpr")]
    Gdpr,
    #[serde(rename = "SOC2", alias = "soc2")]
    Soc2,
}

impl Standard {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Standard::Pci => "PCI",
            Standard::Gdpr => "GDPR",
            Standard::Soc2 => "SOC2",
        }
    }
}

impl fmt::Display for Standard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordinal risk level. Declaration order is the severity order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    #[serde(alias = "low", alias = "LOW")]
    Low,
    #[serde(alias = "medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "high", alias = "HIGH")]
    High,
    #[serde(alias = "critical", alias = "CRITICAL")]
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }

    /// High and Critical findings must be surfaced in the report.
    #[must_use]
    pub fn is_urgent(&self) -> bool {
        *self >= Severity::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// APPLICATION RECORD
// =============================================================================

/// An application as held by the record store. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: RecordId,
    pub name: String,
    pub owner: String,
    pub tech_stack: Vec<String>,
    pub environment: Environment,
    pub required_standards: BTreeSet<Standard>,
    pub user_count: u64,
}

impl ApplicationRecord {
    /// Check the record invariants enforced at the store boundary.
    pub fn validate(&self) -> Result<(), GovernanceError> {
        if self.id.as_str().trim().is_empty() {
            return Err(GovernanceError::InvalidRecord(
                "record id must not be empty".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(GovernanceError::InvalidRecord(format!(
                "record '{}' has an empty name",
                self.id
            )));
        }
        if self.owner.trim().is_empty() {
            return Err(GovernanceError::InvalidRecord(format!(
                "record '{}' has an empty owner",
                self.id
            )));
        }
        if self.tech_stack.iter().any(|t| t.trim().is_empty()) {
            return Err(GovernanceError::InvalidRecord(format!(
                "record '{}' lists an empty technology",
                self.id
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn requires(&self, standard: Standard) -> bool {
        self.required_standards.contains(&standard)
    }
}

// =============================================================================
// STAGE ARTIFACTS
// =============================================================================

/// A failed compliance rule. Produced only by the rule engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub id: ViolationId,
    pub standard: Standard,
    pub reason: String,
    pub record_id: RecordId,
}

/// Risk derived from exactly one violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFinding {
    pub id: FindingId,
    pub violation: ViolationId,
    pub severity: Severity,
    pub rationale: String,
}

/// A remediation step for exactly one finding.
///
/// `priority` is 1-based and derived from severity; equal severities keep the
/// order in which their findings were produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendedAction {
    pub id: ActionId,
    pub finding: FindingId,
    pub severity: Severity,
    pub step: String,
    pub priority: u32,
}

/// Stakeholder report compiled for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub record_id: RecordId,
    pub compliant: bool,
    pub summary: String,
    /// Highlighted actions, ordered by priority (High/Critical first).
    pub highlighted_items: Vec<RecommendedAction>,
    pub generated_at: DateTime<Utc>,
}

/// Quality score of a report, in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub report: ReportId,
    pub score: f64,
    pub feedback: String,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Serializable discriminant of [`GovernanceError`], used by outer surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AmbiguousLookup,
    SchemaValidation,
    Extraction,
    Timeout,
    Precondition,
    Cancelled,
    InvalidRecord,
    Storage,
    Serialization,
    Io,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AmbiguousLookup => "ambiguous_lookup",
            ErrorKind::SchemaValidation => "schema_validation",
            ErrorKind::Extraction => "extraction",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Precondition => "precondition",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidRecord => "invalid_record",
            ErrorKind::Storage => "storage",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in the governance pipeline.
///
/// - No silent failures
/// - Stage failures terminate the run and are returned with the partial state
/// - The core never panics; every error is a value
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum GovernanceError {
    /// A required single-record lookup matched nothing.
    #[error("No application matches '{filter}'")]
    NotFound { filter: String },

    /// A lookup matched several records and no disambiguation was given.
    #[error("'{filter}' matches {} applications: {}", .candidates.len(), join_ids(.candidates))]
    AmbiguousLookup {
        filter: String,
        candidates: Vec<RecordId>,
    },

    /// The reasoner output never satisfied the stage schema.
    #[error("Schema validation failed after {attempts} attempt(s): {message}")]
    SchemaValidation {
        message: String,
        attempts: u32,
        raw: Option<String>,
    },

    /// A validated document lacked a field the extractor requires.
    #[error("Extraction failed: missing required field '{field}'")]
    Extraction { field: String },

    /// Every attempt of a reasoning call ran out of time.
    #[error("Reasoning call timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    /// A pure stage received malformed input.
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// The run was cancelled before the stage started.
    #[error("Run cancelled")]
    Cancelled,

    /// A catalog record failed validation.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The record store backend failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

impl GovernanceError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            GovernanceError::NotFound { .. } => ErrorKind::NotFound,
            GovernanceError::AmbiguousLookup { .. } => ErrorKind::AmbiguousLookup,
            GovernanceError::SchemaValidation { .. } => ErrorKind::SchemaValidation,
            GovernanceError::Extraction { .. } => ErrorKind::Extraction,
            GovernanceError::Timeout { .. } => ErrorKind::Timeout,
            GovernanceError::Precondition(_) => ErrorKind::Precondition,
            GovernanceError::Cancelled => ErrorKind::Cancelled,
            GovernanceError::InvalidRecord(_) => ErrorKind::InvalidRecord,
            GovernanceError::Storage(_) => ErrorKind::Storage,
            GovernanceError::Serialization(_) => ErrorKind::Serialization,
            GovernanceError::Io(_) => ErrorKind::Io,
        }
    }

    /// Raw reasoner response attached for diagnostics, if any.
    #[must_use]
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            GovernanceError::SchemaValidation { raw, .. } => raw.as_deref(),
            _ => None,
        }
    }
}

fn join_ids(ids: &[RecordId]) -> String {
    ids.iter()
        .map(RecordId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// TESTS
// =============================================================================
