//! # Pipeline Stages
//!
//! The six stages of a governance run, in execution order:
//!
//! | Index | Stage | Backed by | Artifact |
//! |-------|-------|-----------|----------|
//! | 0 | Lookup | record store | `ApplicationRecord` |
//! | 1 | Validation | rule engine | `Vec<Violation>` |
//! | 2 | Risk Assessment | reasoner | `Vec<RiskFinding>` |
//! | 3 | Recommendation | reasoner | `Vec<RecommendedAction>` |
//! | 4 | Reporting | reasoner | `Report` |
//! | 5 | Evaluation | reasoner | `EvaluationResult` |
//!
//! Each stage reads a defined subset of upstream artifacts and returns a new
//! one. Non-determinism is confined to calls made through
//! [`crate::adapter::ReasoningAdapter`].

pub mod evaluation;
pub mod lookup;
pub mod recommendation;
pub mod reporting;
pub mod risk;
pub mod validation;

use crate::adapter::AttemptRecord;
use crate::GovernanceError;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// STAGE IDENTIFIER
// =============================================================================

/// Identifier of a pipeline stage. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Lookup,
    Validation,
    RiskAssessment,
    Recommendation,
    Reporting,
    Evaluation,
}

impl StageId {
    /// Every stage, in execution order.
    pub const ALL: [StageId; 6] = [
        StageId::Lookup,
        StageId::Validation,
        StageId::RiskAssessment,
        StageId::Recommendation,
        StageId::Reporting,
        StageId::Evaluation,
    ];

    /// Zero-based position in the pipeline.
    #[must_use]
    pub fn index(&self) -> usize {
        match self {
            StageId::Lookup => 0,
            StageId::Validation => 1,
            StageId::RiskAssessment => 2,
            StageId::Recommendation => 3,
            StageId::Reporting => 4,
            StageId::Evaluation => 5,
        }
    }

    /// Stage at a zero-based position, if any.
    #[must_use]
    pub fn from_index(index: usize) -> Option<StageId> {
        Self::ALL.get(index).copied()
    }

    /// Get the stage name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            StageId::Lookup => "CMDB Lookup",
            StageId::Validation => "Compliance Validation",
            StageId::RiskAssessment => "Risk Assessment",
            StageId::Recommendation => "Recommendation",
            StageId::Reporting => "Reporting",
            StageId::Evaluation => "Evaluation",
        }
    }

    /// Wire identifier, as passed to the reasoner.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Lookup => "lookup",
            StageId::Validation => "validation",
            StageId::RiskAssessment => "risk_assessment",
            StageId::Recommendation => "recommendation",
            StageId::Reporting => "reporting",
            StageId::Evaluation => "evaluation",
        }
    }

    /// Get the next stage, if any.
    #[must_use]
    pub fn next(&self) -> Option<StageId> {
        Self::from_index(self.index().saturating_add(1))
    }

    /// Check if this stage is the last one (Evaluation).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageId::Evaluation)
    }

    /// Whether the stage calls the reasoner.
    #[must_use]
    pub fn is_reasoning_backed(&self) -> bool {
        !matches!(self, StageId::Lookup | StageId::Validation)
    }

    /// Instructions sent to the reasoner alongside the stage payload.
    #[must_use]
    pub fn instructions(&self) -> &'static str {
        match self {
            StageId::Lookup | StageId::Validation => "",
            StageId::RiskAssessment => {
                "You assess risk for compliance violations. For every violation in the payload, \
                 state the primary business or security risk it creates and assign a severity of \
                 Low, Medium, High or Critical. Return exactly one finding per violation, \
                 referencing it by violation_id."
            }
            StageId::Recommendation => {
                "You write remediation steps. For every finding in the payload, write one \
                 specific, single-step action a team can own. Start each step with an imperative \
                 verb such as Migrate, Remove, Update or Disable. Reference the finding by \
                 finding_id."
            }
            StageId::Reporting => {
                "You write a concise compliance report for stakeholders. Summarize the overall \
                 compliance status of the application and list the action ids to highlight. \
                 Every High or Critical action must be highlighted. If the application is \
                 compliant, say so and highlight nothing."
            }
            StageId::Evaluation => {
                "You review a compliance report. Judge whether the summary is accurate, whether \
                 the most critical actions were highlighted and whether every high-severity \
                 risk is addressed. Return a score between 0 and 1 and brief feedback."
            }
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.index(), self.name())
    }
}

// =============================================================================
// STAGE RESULTS
// =============================================================================

/// Artifact produced by a stage, with the reasoner attempts that led to it.
#[derive(Debug, Clone)]
pub struct Staged<T> {
    pub artifact: T,
    pub attempts: Vec<AttemptRecord>,
}

impl<T> Staged<T> {
    /// Artifact produced without calling the reasoner.
    #[must_use]
    pub fn direct(artifact: T) -> Self {
        Self {
            artifact,
            attempts: Vec::new(),
        }
    }
}

/// A stage failure, with the attempts made before giving up.
#[derive(Debug, Clone)]
pub struct StageError {
    pub error: GovernanceError,
    pub attempts: Vec<AttemptRecord>,
}

impl StageError {
    #[must_use]
    pub fn new(error: GovernanceError, attempts: Vec<AttemptRecord>) -> Self {
        Self { error, attempts }
    }
}

impl From<GovernanceError> for StageError {
    fn from(error: GovernanceError) -> Self {
        Self {
            error,
            attempts: Vec::new(),
        }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

// =============================================================================
// TESTS
// =============================================================================
