//! # Pipeline Scenario Tests
//!
//! End-to-end runs of the six-stage pipeline with deterministic reasoners.
//!
//! ## Coverage
//! - Non-compliant and compliant reference records
//! - Failure injection at every stage index
//! - Timeout handling under the default retry bound
//! - Cancellation, concurrent runs and run archives

#![allow(clippy::unwrap_used, clippy::panic)]

use archgov_core::{
    AdapterConfig, ApplicationRecord, CancelToken, Environment, ErrorKind, FixedClock,
    GovernanceError, LookupRequest, MemoryRecordStore, Orchestrator, PipelineState, Reasoner,
    ReasonerError, ReasoningRequest, RecordId, RecordStore, RuleBasedReasoner, RunStatus,
    RunSummary, Scripted, ScriptedReasoner, Severity, StageId, Standard, export_run, import_run,
    sample_catalog, verify_run,
};
use chrono::{TimeZone, Utc};
use std::sync::Arc;

// =============================================================================
// HELPERS
// =============================================================================

fn record(
    id: &str,
    name: &str,
    environment: Environment,
    standards: &[Standard],
    user_count: u64,
) -> ApplicationRecord {
    ApplicationRecord {
        id: RecordId::new(id),
        name: name.to_string(),
        owner: "Platform Team".to_string(),
        tech_stack: vec!["Rust".to_string()],
        environment,
        required_standards: standards.iter().copied().collect(),
        user_count,
    }
}

fn orchestrator(store: Arc<dyn RecordStore>, reasoner: Arc<dyn Reasoner>) -> Orchestrator {
    Orchestrator::new(store, reasoner, AdapterConfig::default()).with_clock(Arc::new(FixedClock(
        Utc.with_ymd_and_hms(2025, 3, 14, 10, 0, 0).unwrap(),
    )))
}

fn sample_orchestrator(reasoner: Arc<dyn Reasoner>) -> Orchestrator {
    orchestrator(Arc::new(MemoryRecordStore::sample()), reasoner)
}

/// Which of the six artifact slots are filled, in stage order.
fn artifacts(state: &PipelineState) -> [bool; 6] {
    [
        state.record().is_some(),
        state.violations().is_some(),
        state.findings().is_some(),
        state.actions().is_some(),
        state.report().is_some(),
        state.evaluation().is_some(),
    ]
}

/// Store that hands out records without boundary validation.
struct UncheckedStore(Vec<ApplicationRecord>);

impl RecordStore for UncheckedStore {
    fn get_all(&self) -> Result<Vec<ApplicationRecord>, GovernanceError> {
        Ok(self.0.clone())
    }
}

/// Rule-based answers, but sets the cancel flag while answering `stage`.
struct CancellingReasoner {
    stage: StageId,
    token: CancelToken,
}

impl Reasoner for CancellingReasoner {
    fn invoke(&self, request: &ReasoningRequest) -> Result<String, ReasonerError> {
        if request.stage == self.stage {
            self.token.cancel();
        }
        RuleBasedReasoner.invoke(request)
    }

    fn name(&self) -> &str {
        "cancelling"
    }
}

// =============================================================================
// END-TO-END SCENARIOS
// =============================================================================

#[test]
fn sandbox_record_with_pci_and_soc2() {
    let store = MemoryRecordStore::new(vec![record(
        "42",
        "Checkout Sandbox",
        Environment::Sandbox,
        &[Standard::Pci, Standard::Soc2],
        500,
    )])
    .expect("store");
    let outcome = orchestrator(Arc::new(store), Arc::new(RuleBasedReasoner))
        .run(&LookupRequest::by_name("checkout"))
        .expect("run");
    let state = &outcome.state;

    let violations = state.violations().expect("violations");
    assert_eq!(violations.len(), 2);
    assert_eq!(violations[0].standard, Standard::Pci);
    assert_eq!(violations[1].standard, Standard::Soc2);

    let findings = state.findings().expect("findings");
    assert_eq!(findings.len(), 2);
    for (finding, violation) in findings.iter().zip(violations) {
        assert_eq!(finding.violation, violation.id);
    }

    let actions = state.actions().expect("actions");
    assert_eq!(actions.len(), 2);
    assert_eq!(actions[0].severity, Severity::Critical);
    assert_eq!(actions[0].priority, 1);
    assert_eq!(actions[1].severity, Severity::High);
    assert_eq!(actions[1].priority, 2);

    assert!(!outcome.report.compliant);
    assert_eq!(outcome.report.highlighted_items.len(), 2);
    assert_eq!(outcome.report.highlighted_items, actions.to_vec());
    assert_eq!(outcome.evaluation.report, outcome.report.id);
    assert_eq!(outcome.evaluation.score, 1.0);
    assert_eq!(state.status(), RunStatus::Completed);
}

#[test]
fn production_record_is_compliant() {
    let store = MemoryRecordStore::new(vec![record(
        "7",
        "Ledger",
        Environment::Production,
        &[Standard::Pci, Standard::Gdpr, Standard::Soc2],
        50_000,
    )])
    .expect("store");
    let reasoner = Arc::new(ScriptedReasoner::new());
    let outcome = orchestrator(Arc::new(store), reasoner.clone())
        .run(&LookupRequest::by_name("ledger"))
        .expect("run");

    assert_eq!(outcome.state.violations().map(<[_]>::len), Some(0));
    assert_eq!(outcome.state.findings().map(<[_]>::len), Some(0));
    assert_eq!(outcome.state.actions().map(<[_]>::len), Some(0));
    assert!(outcome.report.compliant);
    assert!(outcome.report.summary.contains("is compliant"));
    assert!(outcome.report.highlighted_items.is_empty());
    assert_eq!(outcome.evaluation.score, 1.0);

    // Empty inputs skip the reasoner for Risk and Recommendation.
    assert_eq!(reasoner.calls(StageId::RiskAssessment), 0);
    assert_eq!(reasoner.calls(StageId::Recommendation), 0);
    assert_eq!(reasoner.total_calls(), 2);
}

#[test]
fn ambiguous_lookup_lists_candidates() {
    let failure = sample_orchestrator(Arc::new(RuleBasedReasoner))
        .run(&LookupRequest::by_name("team"))
        .err();
    // No sample name contains "team"; owners are not searched.
    assert!(matches!(
        failure.map(|f| f.error),
        Some(GovernanceError::NotFound { .. })
    ));

    let failure = sample_orchestrator(Arc::new(RuleBasedReasoner))
        .run(&LookupRequest::by_name("e"))
        .unwrap_err();
    assert_eq!(failure.state.status(), RunStatus::Failed(StageId::Lookup));
    match failure.error {
        GovernanceError::AmbiguousLookup { candidates, .. } => assert_eq!(candidates.len(), 5),
        other => panic!("expected ambiguous lookup, got {other:?}"),
    }

    let outcome = sample_orchestrator(Arc::new(RuleBasedReasoner))
        .run(&LookupRequest::by_name("e").with_record_id("3"))
        .expect("disambiguated run");
    assert_eq!(outcome.report.record_id.as_str(), "3");
}

// =============================================================================
// FAILURE INJECTION
// =============================================================================

#[test]
fn failure_at_each_stage_stops_the_run() {
    for stage in StageId::ALL {
        let (orch, request) = match stage {
            StageId::Lookup => (
                sample_orchestrator(Arc::new(RuleBasedReasoner)),
                LookupRequest::by_name("mainframe"),
            ),
            StageId::Validation => {
                let mut broken = record("9", "Broken", Environment::Qa, &[Standard::Pci], 1);
                broken.owner = String::new();
                (
                    orchestrator(
                        Arc::new(UncheckedStore(vec![broken])),
                        Arc::new(RuleBasedReasoner),
                    ),
                    LookupRequest::by_name("broken"),
                )
            }
            reasoning => {
                let reasoner = ScriptedReasoner::new()
                    .with(reasoning, Scripted::Respond("not json".into()))
                    .with(reasoning, Scripted::Respond("still not json".into()));
                (
                    sample_orchestrator(Arc::new(reasoner)),
                    LookupRequest::by_name("PCI Feature Dev"),
                )
            }
        };

        let failure = orch.run(&request).unwrap_err();
        let i = stage.index();
        assert_eq!(failure.stage, stage);
        assert_eq!(failure.state.status(), RunStatus::Failed(stage));
        assert_eq!(failure.descriptor().stage_index, i);

        let present = artifacts(&failure.state);
        assert!(present[..i].iter().all(|p| *p), "stage {stage}: upstream missing");
        assert!(present[i..].iter().all(|p| !*p), "stage {stage}: downstream present");

        let expected = match stage {
            StageId::Lookup => ErrorKind::NotFound,
            StageId::Validation => ErrorKind::Precondition,
            _ => ErrorKind::SchemaValidation,
        };
        assert_eq!(failure.kind(), expected);
    }
}

#[test]
fn schema_failure_exposes_last_raw_response() {
    let reasoner = ScriptedReasoner::new()
        .with(StageId::Reporting, Scripted::Respond(r#"{"summary": 3}"#.into()))
        .with(StageId::Reporting, Scripted::Respond(r#"{"summary": 4}"#.into()));
    let failure = sample_orchestrator(Arc::new(reasoner))
        .run(&LookupRequest::by_name("PCI Feature Dev"))
        .unwrap_err();

    let descriptor = failure.descriptor();
    assert_eq!(descriptor.kind, ErrorKind::SchemaValidation);
    assert_eq!(descriptor.raw_response.as_deref(), Some(r#"{"summary": 4}"#));

    let summary = RunSummary::from_failure(&failure);
    assert_eq!(summary.failure.as_ref().map(|f| f.stage_index), Some(4));
}

#[test]
fn risk_timeout_uses_exactly_two_attempts() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .with(StageId::RiskAssessment, Scripted::Timeout)
            .with(StageId::RiskAssessment, Scripted::Timeout),
    );
    let failure = sample_orchestrator(reasoner.clone())
        .run(&LookupRequest::by_name("PCI Feature Dev"))
        .unwrap_err();

    assert_eq!(reasoner.calls(StageId::RiskAssessment), 2);
    assert_eq!(failure.state.status(), RunStatus::Failed(StageId::RiskAssessment));
    assert_eq!(failure.error, GovernanceError::Timeout { attempts: 2 });
    assert_eq!(reasoner.calls(StageId::Recommendation), 0);
}

#[test]
fn timeout_then_valid_answer_recovers() {
    let reasoner = Arc::new(ScriptedReasoner::new().with(StageId::RiskAssessment, Scripted::Timeout));
    let outcome = sample_orchestrator(reasoner.clone())
        .run(&LookupRequest::by_name("PCI Feature Dev"))
        .expect("run");

    assert_eq!(reasoner.calls(StageId::RiskAssessment), 2);
    let risk = &outcome.state.audit()[0];
    assert_eq!(risk.stage, StageId::RiskAssessment);
    assert_eq!(risk.attempts.len(), 2);
}

// =============================================================================
// CANCELLATION & CONCURRENCY
// =============================================================================

#[test]
fn cancellation_stops_before_next_stage() {
    let token = CancelToken::new();
    let reasoner = Arc::new(CancellingReasoner {
        stage: StageId::RiskAssessment,
        token: token.clone(),
    });
    let failure = sample_orchestrator(reasoner)
        .run_with_cancel(&LookupRequest::by_name("PCI Feature Dev"), &token)
        .unwrap_err();

    assert_eq!(failure.error, GovernanceError::Cancelled);
    assert_eq!(
        failure.state.status(),
        RunStatus::Cancelled(StageId::Recommendation)
    );
    assert_eq!(artifacts(&failure.state), [true, true, true, false, false, false]);
}

#[test]
fn concurrent_runs_are_isolated() {
    let orch = sample_orchestrator(Arc::new(RuleBasedReasoner));
    let ids: Vec<String> = sample_catalog().into_iter().map(|r| r.id.0).collect();

    let sequential: Vec<_> = ids
        .iter()
        .map(|id| orch.run(&LookupRequest::by_id(id.clone())).expect("run"))
        .collect();

    let concurrent: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = ids
            .iter()
            .map(|id| {
                let orch = &orch;
                scope.spawn(move || orch.run(&LookupRequest::by_id(id.clone())))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("thread").expect("run"))
            .collect()
    });

    for (a, b) in sequential.iter().zip(&concurrent) {
        assert_eq!(a.report, b.report);
        assert_eq!(a.evaluation, b.evaluation);
        assert_eq!(a.state, b.state);
    }
}

// =============================================================================
// RUN ARCHIVE
// =============================================================================

#[test]
fn archived_run_round_trips() {
    let outcome = sample_orchestrator(Arc::new(RuleBasedReasoner))
        .run(&LookupRequest::by_name("User Data"))
        .expect("run");

    let archive = export_run(&outcome.state).expect("export");
    let restored = import_run(&archive).expect("import");
    assert_eq!(restored, outcome.state);
    assert!(verify_run(&outcome.state, &archive).expect("verify"));
}
