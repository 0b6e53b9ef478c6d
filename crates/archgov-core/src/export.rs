//! # Run Archive
//!
//! Bit-exact `postcard` export of a [`PipelineState`], for audit and replay
//! verification.
//!
//! Format:
//! ```text
//! [header_len: u32 LE] [RunHeader (postcard)] [CanonicalRun (postcard)]
//! ```
//!
//! The header carries a FNV-1a 64 checksum of the data section. Identical
//! states always export to identical bytes.

use crate::adapter::{AttemptOutcome, AttemptRecord};
use crate::pipeline::{PipelineState, RunStatus, StageAudit};
use crate::stages::StageId;
use crate::stages::lookup::LookupRequest;
use crate::{
    ApplicationRecord, EvaluationResult, GovernanceError, RecommendedAction, Report, RiskFinding,
    Violation,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// ARCHIVE FORMAT
// =============================================================================

/// Magic bytes for run archives.
pub const RUN_MAGIC: [u8; 4] = *b"AGRN";

/// Current archive format version.
pub const RUN_VERSION: u8 = 1;

/// Largest archive accepted by [`import_run`].
pub const MAX_ARCHIVE_BYTES: usize = 16 * 1024 * 1024;

/// FNV-1a 64-bit digest.
pub(crate) fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(PRIME))
}

/// Header of a run archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunHeader {
    pub magic: [u8; 4],
    pub version: u8,
    /// Stages whose artifact is present.
    pub completed_stages: u8,
    /// FNV-1a 64 of the data section.
    pub checksum: u64,
}

impl RunHeader {
    #[must_use]
    pub fn new(completed_stages: u8, checksum: u64) -> Self {
        Self {
            magic: RUN_MAGIC,
            version: RUN_VERSION,
            completed_stages,
            checksum,
        }
    }

    /// Error messages stay generic to avoid describing the format.
    pub fn validate(&self) -> Result<(), GovernanceError> {
        if self.magic != RUN_MAGIC {
            return Err(GovernanceError::Serialization(
                "Invalid file format".to_string(),
            ));
        }
        if self.version != RUN_VERSION {
            return Err(GovernanceError::Serialization(
                "Unsupported file version".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// CANONICAL RUN
// =============================================================================

/// Run status as `(kind, stage index)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalStatus {
    pub kind: u8,
    pub stage: u8,
}

impl From<RunStatus> for CanonicalStatus {
    fn from(status: RunStatus) -> Self {
        let (kind, stage) = match status {
            RunStatus::Pending => (0, 0),
            RunStatus::Running(s) => (1, s.index()),
            RunStatus::Failed(s) => (2, s.index()),
            RunStatus::Cancelled(s) => (3, s.index()),
            RunStatus::Completed => (4, 0),
        };
        Self {
            kind,
            stage: stage as u8,
        }
    }
}

impl TryFrom<CanonicalStatus> for RunStatus {
    type Error = GovernanceError;

    fn try_from(cs: CanonicalStatus) -> Result<Self, Self::Error> {
        let stage = || {
            StageId::from_index(cs.stage as usize)
                .ok_or_else(|| GovernanceError::Serialization("Invalid stage".to_string()))
        };
        match cs.kind {
            0 => Ok(RunStatus::Pending),
            1 => Ok(RunStatus::Running(stage()?)),
            2 => Ok(RunStatus::Failed(stage()?)),
            3 => Ok(RunStatus::Cancelled(stage()?)),
            4 => Ok(RunStatus::Completed),
            _ => Err(GovernanceError::Serialization("Invalid status".to_string())),
        }
    }
}

/// One reasoner attempt as `(outcome kind, detail)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalAttempt {
    pub attempt: u32,
    pub outcome: u8,
    pub detail: String,
    pub raw: Option<String>,
}

impl From<&AttemptRecord> for CanonicalAttempt {
    fn from(record: &AttemptRecord) -> Self {
        let (outcome, detail) = match &record.outcome {
            AttemptOutcome::Accepted => (0, String::new()),
            AttemptOutcome::Rejected { reason } => (1, reason.clone()),
            AttemptOutcome::TimedOut => (2, String::new()),
            AttemptOutcome::Failed { message } => (3, message.clone()),
        };
        Self {
            attempt: record.attempt,
            outcome,
            detail,
            raw: record.raw.clone(),
        }
    }
}

impl TryFrom<CanonicalAttempt> for AttemptRecord {
    type Error = GovernanceError;

    fn try_from(ca: CanonicalAttempt) -> Result<Self, Self::Error> {
        let outcome = match ca.outcome {
            0 => AttemptOutcome::Accepted,
            1 => AttemptOutcome::Rejected { reason: ca.detail },
            2 => AttemptOutcome::TimedOut,
            3 => AttemptOutcome::Failed {
                message: ca.detail,
            },
            _ => {
                return Err(GovernanceError::Serialization(
                    "Invalid attempt outcome".to_string(),
                ));
            }
        };
        Ok(AttemptRecord {
            attempt: ca.attempt,
            outcome,
            raw: ca.raw,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalAudit {
    pub stage: StageId,
    pub attempts: Vec<CanonicalAttempt>,
}

/// A pipeline state in canonical form for bit-exact serialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalRun {
    pub request: LookupRequest,
    pub status: CanonicalStatus,
    pub record: Option<ApplicationRecord>,
    pub violations: Option<Vec<Violation>>,
    pub findings: Option<Vec<RiskFinding>>,
    pub actions: Option<Vec<RecommendedAction>>,
    pub report: Option<Report>,
    pub evaluation: Option<EvaluationResult>,
    pub audit: Vec<CanonicalAudit>,
    pub transitions: Vec<CanonicalStatus>,
}

impl CanonicalRun {
    #[must_use]
    pub fn from_state(state: &PipelineState) -> Self {
        Self {
            request: state.request.clone(),
            status: state.status.into(),
            record: state.record.clone(),
            violations: state.violations.clone(),
            findings: state.findings.clone(),
            actions: state.actions.clone(),
            report: state.report.clone(),
            evaluation: state.evaluation.clone(),
            audit: state
                .audit
                .iter()
                .map(|a| CanonicalAudit {
                    stage: a.stage,
                    attempts: a.attempts.iter().map(CanonicalAttempt::from).collect(),
                })
                .collect(),
            transitions: state.transitions.iter().map(|t| (*t).into()).collect(),
        }
    }

    pub fn into_state(self) -> Result<PipelineState, GovernanceError> {
        let audit = self
            .audit
            .into_iter()
            .map(|a| {
                Ok(StageAudit {
                    stage: a.stage,
                    attempts: a
                        .attempts
                        .into_iter()
                        .map(AttemptRecord::try_from)
                        .collect::<Result<_, GovernanceError>>()?,
                })
            })
            .collect::<Result<Vec<_>, GovernanceError>>()?;
        let transitions = self
            .transitions
            .into_iter()
            .map(RunStatus::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PipelineState {
            request: self.request,
            status: self.status.try_into()?,
            record: self.record,
            violations: self.violations,
            findings: self.findings,
            actions: self.actions,
            report: self.report,
            evaluation: self.evaluation,
            audit,
            transitions,
        })
    }

    fn to_bytes(&self) -> Result<Vec<u8>, GovernanceError> {
        postcard::to_allocvec(self).map_err(|e| GovernanceError::Serialization(format!("Data: {}", e)))
    }
}

// =============================================================================
// EXPORT FUNCTIONS
// =============================================================================

/// Export a run to the archive format.
pub fn export_run(state: &PipelineState) -> Result<Vec<u8>, GovernanceError> {
    let data_bytes = CanonicalRun::from_state(state).to_bytes()?;
    let header = RunHeader::new(state.completed_stages() as u8, fnv1a(&data_bytes));

    let header_bytes = postcard::to_allocvec(&header)
        .map_err(|e| GovernanceError::Serialization(format!("Header: {}", e)))?;

    let mut result = Vec::with_capacity(4 + header_bytes.len() + data_bytes.len());
    result.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    result.extend_from_slice(&header_bytes);
    result.extend_from_slice(&data_bytes);
    Ok(result)
}

/// Import a run archive, checking magic, version, checksum and stage count.
pub fn import_run(data: &[u8]) -> Result<PipelineState, GovernanceError> {
    if data.len() > MAX_ARCHIVE_BYTES {
        return Err(GovernanceError::Serialization(format!(
            "Archive size {} exceeds maximum allowed {}",
            data.len(),
            MAX_ARCHIVE_BYTES
        )));
    }
    let Some((len_bytes, rest)) = data.split_first_chunk::<4>() else {
        return Err(GovernanceError::Serialization("Data too short".to_string()));
    };
    let header_len = u32::from_le_bytes(*len_bytes) as usize;
    if rest.len() < header_len {
        return Err(GovernanceError::Serialization(
            "Data too short for header".to_string(),
        ));
    }
    let (header_bytes, data_bytes) = rest.split_at(header_len);

    let header: RunHeader = postcard::from_bytes(header_bytes)
        .map_err(|e| GovernanceError::Serialization(format!("Header: {}", e)))?;
    header.validate()?;

    let computed = fnv1a(data_bytes);
    if computed != header.checksum {
        return Err(GovernanceError::Serialization(format!(
            "Checksum mismatch: expected {}, got {}",
            header.checksum, computed
        )));
    }

    let canonical: CanonicalRun = postcard::from_bytes(data_bytes)
        .map_err(|e| GovernanceError::Serialization(format!("Data: {}", e)))?;
    let state = canonical.into_state()?;

    if state.completed_stages() != header.completed_stages as usize {
        return Err(GovernanceError::Serialization(
            "Stage count mismatch".to_string(),
        ));
    }
    Ok(state)
}

/// Whether `archive` holds exactly `state`.
pub fn verify_run(state: &PipelineState, archive: &[u8]) -> Result<bool, GovernanceError> {
    let imported = import_run(archive)?;
    Ok(CanonicalRun::from_state(state) == CanonicalRun::from_state(&imported))
}

/// Deterministic digest of a run's canonical form.
pub fn run_checksum(state: &PipelineState) -> Result<u64, GovernanceError> {
    Ok(fnv1a(&CanonicalRun::from_state(state).to_bytes()?))
}

/// BLAKE3 hex digest of the run archive.
///
/// Only available with the `crypto-hash` feature.
#[cfg(feature = "crypto-hash")]
pub fn run_crypto_hash(state: &PipelineState) -> Result<String, GovernanceError> {
    let data = export_run(state)?;
    Ok(blake3::hash(&data).to_hex().to_string())
}

// =============================================================================
// TESTS
// =============================================================================
