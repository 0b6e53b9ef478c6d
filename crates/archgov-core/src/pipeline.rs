//! # Sequential Orchestrator
//!
//! Runs the six stages in fixed order over one [`PipelineState`].
//!
//! ## State machine
//!
//! ```text
//! Pending ─▶ Running[0] ─▶ Running[1] ─▶ ... ─▶ Running[5] ─▶ Completed
//!                │              │                    │
//!                ▼              ▼                    ▼
//!            Failed[0]      Failed[1]            Failed[5]
//! ```
//!
//! A cancelled run stops before the next stage starts and ends in
//! `Cancelled[i]`. Terminal states are `Failed[i]`, `Cancelled[i]` and
//! `Completed`.
//!
//! Artifacts of completed stages stay in the state after a later failure. A
//! failed stage contributes nothing but its audit entry. The orchestrator
//! never retries a stage; bounded retry belongs to the adapter.
//!
//! ## Concurrency
//!
//! An [`Orchestrator`] may be shared between threads. Each run owns its state
//! exclusively; the only shared inputs are the read-only record store and the
//! reasoner.

use crate::adapter::{AdapterConfig, AttemptRecord, ReasoningAdapter};
use crate::reasoner::Reasoner;
use crate::stages::lookup::LookupRequest;
use crate::stages::{
    StageError, StageId, Staged, evaluation, lookup, recommendation, reporting, risk, validation,
};
use crate::store::RecordStore;
use crate::{
    ApplicationRecord, ErrorKind, EvaluationResult, GovernanceError, RecommendedAction, Report,
    RiskFinding, Violation,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use thiserror::Error;

// =============================================================================
// RUN STATUS
// =============================================================================

/// Position of a run in the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running(StageId),
    Failed(StageId),
    Cancelled(StageId),
    Completed,
}

impl RunStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Failed(_) | RunStatus::Cancelled(_) | RunStatus::Completed
        )
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match (*self, next) {
            (RunStatus::Pending, RunStatus::Running(StageId::Lookup)) => true,
            (RunStatus::Pending, RunStatus::Cancelled(StageId::Lookup)) => true,
            (RunStatus::Running(current), RunStatus::Running(to)) => current.next() == Some(to),
            (RunStatus::Running(current), RunStatus::Failed(at)) => current == at,
            (RunStatus::Running(current), RunStatus::Cancelled(at)) => current.next() == Some(at),
            (RunStatus::Running(current), RunStatus::Completed) => current.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Pending => f.write_str("Pending"),
            RunStatus::Running(stage) => write!(f, "Running[{}]", stage.index()),
            RunStatus::Failed(stage) => write!(f, "Failed[{}]", stage.index()),
            RunStatus::Cancelled(stage) => write!(f, "Cancelled[{}]", stage.index()),
            RunStatus::Completed => f.write_str("Completed"),
        }
    }
}

// =============================================================================
// PIPELINE STATE
// =============================================================================

/// Reasoner attempts made by one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAudit {
    pub stage: StageId,
    pub attempts: Vec<AttemptRecord>,
}

/// Accumulated artifacts of one run. Owned by exactly one run.
///
/// Every artifact slot is written once, by the stage that produces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub(crate) request: LookupRequest,
    pub(crate) status: RunStatus,
    pub(crate) record: Option<ApplicationRecord>,
    pub(crate) violations: Option<Vec<Violation>>,
    pub(crate) findings: Option<Vec<RiskFinding>>,
    pub(crate) actions: Option<Vec<RecommendedAction>>,
    pub(crate) report: Option<Report>,
    pub(crate) evaluation: Option<EvaluationResult>,
    pub(crate) audit: Vec<StageAudit>,
    pub(crate) transitions: Vec<RunStatus>,
}

impl PipelineState {
    #[must_use]
    pub fn new(request: LookupRequest) -> Self {
        Self {
            request,
            status: RunStatus::Pending,
            record: None,
            violations: None,
            findings: None,
            actions: None,
            report: None,
            evaluation: None,
            audit: Vec::new(),
            transitions: vec![RunStatus::Pending],
        }
    }

    #[must_use]
    pub fn request(&self) -> &LookupRequest {
        &self.request
    }

    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }

    #[must_use]
    pub fn record(&self) -> Option<&ApplicationRecord> {
        self.record.as_ref()
    }

    #[must_use]
    pub fn violations(&self) -> Option<&[Violation]> {
        self.violations.as_deref()
    }

    #[must_use]
    pub fn findings(&self) -> Option<&[RiskFinding]> {
        self.findings.as_deref()
    }

    #[must_use]
    pub fn actions(&self) -> Option<&[RecommendedAction]> {
        self.actions.as_deref()
    }

    #[must_use]
    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    #[must_use]
    pub fn evaluation(&self) -> Option<&EvaluationResult> {
        self.evaluation.as_ref()
    }

    /// Reasoner attempts per reasoning-backed stage, in execution order.
    #[must_use]
    pub fn audit(&self) -> &[StageAudit] {
        &self.audit
    }

    /// Every status the run has been in, starting with `Pending`.
    #[must_use]
    pub fn transitions(&self) -> &[RunStatus] {
        &self.transitions
    }

    /// Number of stages whose artifact is present.
    #[must_use]
    pub fn completed_stages(&self) -> usize {
        [
            self.record.is_some(),
            self.violations.is_some(),
            self.findings.is_some(),
            self.actions.is_some(),
            self.report.is_some(),
            self.evaluation.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }

    fn transition(&mut self, next: RunStatus) -> Result<(), GovernanceError> {
        if !self.status.can_transition_to(next) {
            return Err(GovernanceError::Precondition(format!(
                "illegal transition {} -> {}",
                self.status, next
            )));
        }
        tracing::debug!(from = %self.status, to = %next, "run status changed");
        self.status = next;
        self.transitions.push(next);
        Ok(())
    }

    fn record_audit(&mut self, stage: StageId, attempts: Vec<AttemptRecord>) {
        if stage.is_reasoning_backed() {
            self.audit.push(StageAudit { stage, attempts });
        }
    }
}

fn require<'a, T: ?Sized>(slot: Option<&'a T>, what: &str) -> Result<&'a T, GovernanceError> {
    slot.ok_or_else(|| GovernanceError::Precondition(format!("{what} is not available")))
}

// =============================================================================
// CLOCK & CANCELLATION
// =============================================================================

/// Time source for report timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at one instant. Makes runs reproducible.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Cooperative cancellation flag, checked before each stage starts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// =============================================================================
// RUN RESULTS
// =============================================================================

/// A completed run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub report: Report,
    pub evaluation: EvaluationResult,
    pub state: PipelineState,
}

/// A run that stopped at `stage`, with everything produced before it.
#[derive(Debug, Clone, Error)]
#[error("{stage} failed: {error}")]
pub struct PipelineFailure {
    pub stage: StageId,
    pub error: GovernanceError,
    pub state: PipelineState,
}

impl PipelineFailure {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    #[must_use]
    pub fn descriptor(&self) -> FailureDescriptor {
        FailureDescriptor {
            stage: self.stage,
            stage_index: self.stage.index(),
            kind: self.error.kind(),
            message: self.error.to_string(),
            raw_response: self.error.raw_response().map(str::to_string),
        }
    }
}

/// Caller-facing description of a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDescriptor {
    pub stage: StageId,
    pub stage_index: usize,
    pub kind: ErrorKind,
    pub message: String,
    pub raw_response: Option<String>,
}

/// Number of reasoner attempts a stage needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAttempts {
    pub stage: StageId,
    pub attempts: u32,
}

/// Presentation view of a run. Raw reasoner responses are left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub record: Option<ApplicationRecord>,
    pub violations: Vec<Violation>,
    pub findings: Vec<RiskFinding>,
    pub actions: Vec<RecommendedAction>,
    pub report: Option<Report>,
    pub evaluation: Option<EvaluationResult>,
    pub attempts: Vec<StageAttempts>,
    pub failure: Option<FailureDescriptor>,
}

impl RunSummary {
    #[must_use]
    pub fn from_state(state: &PipelineState) -> Self {
        Self {
            status: state.status,
            record: state.record.clone(),
            violations: state.violations.clone().unwrap_or_default(),
            findings: state.findings.clone().unwrap_or_default(),
            actions: state.actions.clone().unwrap_or_default(),
            report: state.report.clone(),
            evaluation: state.evaluation.clone(),
            attempts: state
                .audit
                .iter()
                .map(|a| StageAttempts {
                    stage: a.stage,
                    attempts: a.attempts.len() as u32,
                })
                .collect(),
            failure: None,
        }
    }

    #[must_use]
    pub fn from_outcome(outcome: &PipelineOutcome) -> Self {
        Self::from_state(&outcome.state)
    }

    #[must_use]
    pub fn from_failure(failure: &PipelineFailure) -> Self {
        Self {
            failure: Some(failure.descriptor()),
            ..Self::from_state(&failure.state)
        }
    }
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

/// Executes governance runs. Holds no per-run state.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn RecordStore>,
    adapter: ReasoningAdapter,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("adapter", &self.adapter)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        reasoner: Arc<dyn Reasoner>,
        config: AdapterConfig,
    ) -> Self {
        Self {
            store,
            adapter: ReasoningAdapter::new(reasoner, config),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source used for report timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> AdapterConfig {
        self.adapter.config()
    }

    /// Run all six stages for one lookup.
    pub fn run(&self, request: &LookupRequest) -> Result<PipelineOutcome, PipelineFailure> {
        self.run_with_cancel(request, &CancelToken::new())
    }

    /// Like [`Orchestrator::run`], stopping before the next stage once
    /// `cancel` is set.
    pub fn run_with_cancel(
        &self,
        request: &LookupRequest,
        cancel: &CancelToken,
    ) -> Result<PipelineOutcome, PipelineFailure> {
        let mut state = PipelineState::new(request.clone());
        let started = Instant::now();

        for stage in StageId::ALL {
            if cancel.is_cancelled() {
                tracing::warn!(stage = stage.as_str(), "run cancelled");
                return Err(self.fail(
                    state,
                    stage,
                    RunStatus::Cancelled(stage),
                    GovernanceError::Cancelled,
                ));
            }
            if let Err(error) = state.transition(RunStatus::Running(stage)) {
                return Err(self.fail(state, stage, RunStatus::Failed(stage), error));
            }

            tracing::info!(stage = stage.as_str(), index = stage.index(), "stage started");
            let stage_started = Instant::now();
            match self.execute(stage, &mut state) {
                Ok(attempts) => {
                    state.record_audit(stage, attempts);
                    tracing::info!(
                        stage = stage.as_str(),
                        elapsed_ms = stage_started.elapsed().as_millis() as u64,
                        "stage completed"
                    );
                }
                Err(StageError { error, attempts }) => {
                    state.record_audit(stage, attempts);
                    tracing::error!(
                        stage = stage.as_str(),
                        kind = error.kind().as_str(),
                        error = %error,
                        "stage failed"
                    );
                    return Err(self.fail(state, stage, RunStatus::Failed(stage), error));
                }
            }
        }

        if let Err(error) = state.transition(RunStatus::Completed) {
            let last = StageId::Evaluation;
            return Err(self.fail(state, last, RunStatus::Failed(last), error));
        }
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run completed"
        );

        match state.report.clone().zip(state.evaluation.clone()) {
            Some((report, evaluation)) => Ok(PipelineOutcome {
                report,
                evaluation,
                state,
            }),
            None => Err(PipelineFailure {
                stage: StageId::Evaluation,
                error: GovernanceError::Precondition("completed run lacks its report".to_string()),
                state,
            }),
        }
    }

    fn fail(
        &self,
        mut state: PipelineState,
        stage: StageId,
        status: RunStatus,
        error: GovernanceError,
    ) -> PipelineFailure {
        if state.status.can_transition_to(status) {
            state.status = status;
            state.transitions.push(status);
        } else if !state.status.is_terminal() {
            state.status = RunStatus::Failed(stage);
            state.transitions.push(state.status);
        }
        PipelineFailure {
            stage,
            error,
            state,
        }
    }

    /// Run one stage and store its artifact. Returns the reasoner attempts.
    fn execute(
        &self,
        stage: StageId,
        state: &mut PipelineState,
    ) -> Result<Vec<AttemptRecord>, StageError> {
        match stage {
            StageId::Lookup => {
                let record = lookup::run(self.store.as_ref(), &state.request)?;
                state.record = Some(record);
                Ok(Vec::new())
            }
            StageId::Validation => {
                let record = require(state.record(), "application record")?;
                let violations = validation::run(record)?;
                state.violations = Some(violations);
                Ok(Vec::new())
            }
            StageId::RiskAssessment => {
                let record = require(state.record(), "application record")?;
                let violations = require(state.violations(), "violations")?;
                let Staged { artifact, attempts } = risk::run(&self.adapter, record, violations)?;
                state.findings = Some(artifact);
                Ok(attempts)
            }
            StageId::Recommendation => {
                let record = require(state.record(), "application record")?;
                let violations = require(state.violations(), "violations")?;
                let findings = require(state.findings(), "risk findings")?;
                let Staged { artifact, attempts } =
                    recommendation::run(&self.adapter, record, violations, findings)?;
                state.actions = Some(artifact);
                Ok(attempts)
            }
            StageId::Reporting => {
                let record = require(state.record(), "application record")?;
                let violations = require(state.violations(), "violations")?;
                let findings = require(state.findings(), "risk findings")?;
                let actions = require(state.actions(), "recommended actions")?;
                let Staged { artifact, attempts } = reporting::run(
                    &self.adapter,
                    record,
                    violations,
                    findings,
                    actions,
                    self.clock.now(),
                )?;
                state.report = Some(artifact);
                Ok(attempts)
            }
            StageId::Evaluation => {
                let record = require(state.record(), "application record")?;
                let violations = require(state.violations(), "violations")?;
                let findings = require(state.findings(), "risk findings")?;
                let actions = require(state.actions(), "recommended actions")?;
                let report = require(state.report(), "report")?;
                let Staged { artifact, attempts } = evaluation::run(
                    &self.adapter,
                    record,
                    violations,
                    findings,
                    actions,
                    report,
                )?;
                state.evaluation = Some(artifact);
                Ok(attempts)
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
