//! # archgov-core
//!
//! The deterministic governance pipeline for archgov - THE LOGIC.
//!
//! This crate runs one application record through six stages in a fixed
//! order: Lookup, Validation, Risk Assessment, Recommendation, Reporting and
//! Evaluation. The first two are pure (record store and rule engine). The last
//! four delegate content generation to a [`Reasoner`] behind a
//! [`ReasoningAdapter`] that enforces a declared output schema, a retry bound
//! and a timeout.
//!
//! ## Architectural Constraints
//!
//! The CORE:
//! - Owns stage order, identifiers, priorities and compliance verdicts
//! - Accepts only schema-valid, extracted artifacts into pipeline state
//! - Reports every failure with its stage index and error kind
//! - Has NO async, NO network dependencies (pure Rust)

// =============================================================================
// MODULES
// =============================================================================

pub mod adapter;
pub mod export;
pub mod extract;
pub mod pipeline;
pub mod reasoner;
pub mod rules;
pub mod schema;
pub mod stages;
pub mod storage;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    ActionId, ApplicationRecord, Environment, ErrorKind, EvaluationResult, FindingId,
    GovernanceError, RecommendedAction, RecordId, Report, ReportId, RiskFinding, Severity,
    Standard, Violation, ViolationId,
};

// =============================================================================
// RE-EXPORTS: Pipeline
// =============================================================================

pub use adapter::{
    AdapterConfig, AttemptOutcome, AttemptRecord, DEFAULT_RETRY_BOUND, DEFAULT_TIMEOUT,
    ReasoningAdapter,
};
pub use extract::OutputExtractor;
pub use pipeline::{
    CancelToken, Clock, FailureDescriptor, FixedClock, Orchestrator, PipelineFailure,
    PipelineOutcome, PipelineState, RunStatus, RunSummary, SystemClock,
};
pub use reasoner::{
    Reasoner, ReasonerError, ReasoningRequest, RuleBasedReasoner, Scripted, ScriptedReasoner,
};
pub use rules::{
    CatalogCompliance, ComplianceResult, RuleEngine, StandardTally, baseline_severity,
};
pub use schema::OutputSchema;
pub use stages::{StageError, StageId, lookup::LookupRequest};

// =============================================================================
// RE-EXPORTS: Storage and Export
// =============================================================================

pub use export::{CanonicalRun, RunHeader, export_run, import_run, run_checksum, verify_run};
#[cfg(feature = "crypto-hash")]
pub use export::run_crypto_hash;
pub use storage::RedbRecordStore;
pub use store::{MemoryRecordStore, RecordStore, parse_catalog, sample_catalog};
