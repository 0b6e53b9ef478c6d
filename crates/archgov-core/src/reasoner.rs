//! # Reasoning Capability
//!
//! The single call contract the adapter depends on:
//! `invoke(stage, payload, schema) -> raw text | timeout | error`.
//!
//! The core never inspects how a reasoner produces its answer. Two in-process
//! implementations ship with the crate:
//!
//! - [`RuleBasedReasoner`]: deterministic, schema-valid answers derived from
//!   the payload. Used as the default provider and as a test double.
//! - [`ScriptedReasoner`]: replays canned responses per stage for fault
//!   injection, counting every invocation.
//!
//! Network-backed providers live in the binary.

use crate::rules::baseline_severity;
use crate::stages::StageId;
use crate::stages::evaluation::EvaluationPayload;
use crate::stages::recommendation::RecommendationPayload;
use crate::stages::reporting::ReportingPayload;
use crate::stages::risk::RiskPayload;
use crate::{ApplicationRecord, Severity, Standard, Violation};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// CALL CONTRACT
// =============================================================================

/// One reasoning call as seen by a provider.
#[derive(Debug, Clone, Serialize)]
pub struct ReasoningRequest {
    pub stage: StageId,
    /// Serialized upstream artifacts for the stage.
    pub payload: Value,
    /// JSON Schema the answer must satisfy.
    pub schema: Value,
    pub instructions: String,
    /// 1-based attempt number within one adapter call.
    pub attempt: u32,
    /// Why the previous attempt was rejected, if this is a retry.
    pub correction: Option<String>,
    /// Budget for this attempt. Providers should give up once it elapses.
    #[serde(skip)]
    pub timeout: Duration,
}

/// Failure of a reasoning call that produced no usable text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReasonerError {
    #[error("reasoning call timed out")]
    Timeout,
    #[error("reasoner unavailable: {0}")]
    Unavailable(String),
    #[error("reasoner rejected the request: {0}")]
    InvalidRequest(String),
}

/// External reasoning capability.
///
/// Implementations must be shareable between concurrent runs; a call may
/// block the calling thread for at most the request timeout.
pub trait Reasoner: Send + Sync {
    /// Answer one stage request with raw text.
    ///
    /// Must return `ReasonerError::Timeout` rather than block past
    /// `request.timeout`. The adapter also discards answers that arrive after
    /// the deadline, but it cannot interrupt a call that never returns.
    fn invoke(&self, request: &ReasoningRequest) -> Result<String, ReasonerError>;

    /// Provider name recorded in logs.
    fn name(&self) -> &str;
}

fn decode_payload<T: DeserializeOwned>(request: &ReasoningRequest) -> Result<T, ReasonerError> {
    serde_json::from_value(request.payload.clone()).map_err(|e| {
        ReasonerError::InvalidRequest(format!("{} payload: {e}", request.stage.as_str()))
    })
}

// =============================================================================
// RULE-BASED REASONER
// =============================================================================

/// Deterministic reasoner that answers every stage from the payload alone.
///
/// Finding severities follow [`baseline_severity`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedReasoner;

impl RuleBasedReasoner {
    #[must_use]
    pub fn severity_for(standard: Standard) -> Severity {
        baseline_severity(standard)
    }

    fn rationale(record: &ApplicationRecord, violation: &Violation) -> String {
        match violation.standard {
            Standard::Pci => format!(
                "Cardholder data for {} is processed in '{}', outside PCI DSS controls; \
                 exposure risks card data theft and certification loss.",
                record.name, record.environment
            ),
            Standard::Gdpr => format!(
                "Personal data of {} users reaches a pre-production environment, \
                 creating exposure to GDPR fines and breach notification duties.",
                record.user_count
            ),
            Standard::Soc2 => format!(
                "{} runs in '{}' without audited access and change controls, \
                 breaking SOC2 evidence for the service.",
                record.name, record.environment
            ),
        }
    }

    fn step(record: &ApplicationRecord, standard: Standard) -> String {
        match standard {
            Standard::Pci => format!(
                "Migrate {} from '{}' to a PCI-certified production environment.",
                record.name, record.environment
            ),
            Standard::Gdpr => format!(
                "Restrict {} in uat to anonymized data for at most {} users.",
                record.name,
                crate::rules::GDPR_UAT_USER_THRESHOLD
            ),
            Standard::Soc2 => format!(
                "Move {} into a SOC2-audited environment with access logging enabled.",
                record.name
            ),
        }
    }

    fn risk(payload: RiskPayload) -> Value {
        let findings: Vec<Value> = payload
            .violations
            .iter()
            .map(|v| {
                json!({
                    "violation_id": v.id,
                    "severity": Self::severity_for(v.standard),
                    "rationale": Self::rationale(&payload.record, v),
                })
            })
            .collect();
        json!({ "findings": findings })
    }

    fn recommendation(payload: RecommendationPayload) -> Result<Value, ReasonerError> {
        let by_id: BTreeMap<_, _> = payload.violations.iter().map(|v| (v.id, v)).collect();
        let actions = payload
            .findings
            .iter()
            .map(|f| {
                let violation = by_id.get(&f.violation).ok_or_else(|| {
                    ReasonerError::InvalidRequest(format!(
                        "finding {} references unknown violation {}",
                        f.id.0, f.violation.0
                    ))
                })?;
                Ok(json!({
                    "finding_id": f.id,
                    "step": Self::step(&payload.record, violation.standard),
                }))
            })
            .collect::<Result<Vec<_>, ReasonerError>>()?;
        Ok(json!({ "actions": actions }))
    }

    fn reporting(payload: ReportingPayload) -> Value {
        let record = &payload.record;
        if payload.compliant {
            let standards: Vec<&str> = record.required_standards.iter().map(|s| s.as_str()).collect();
            let scope = if standards.is_empty() {
                "no compliance standards apply".to_string()
            } else {
                format!("it meets every required standard ({})", standards.join(", "))
            };
            return json!({
                "summary": format!(
                    "{} ({}) is compliant: {}.",
                    record.name, record.environment, scope
                ),
                "highlighted": [],
            });
        }

        let urgent: Vec<_> = payload
            .actions
            .iter()
            .filter(|a| a.severity.is_urgent())
            .map(|a| a.id)
            .collect();
        let mut standards: Vec<&str> = payload.violations.iter().map(|v| v.standard.as_str()).collect();
        standards.dedup();
        json!({
            "summary": format!(
                "{} ({}) is not compliant: {} violation(s) across {}. {} action(s) require urgent attention.",
                record.name,
                record.environment,
                payload.violations.len(),
                standards.join(", "),
                urgent.len()
            ),
            "highlighted": urgent,
        })
    }

    fn evaluation(payload: EvaluationPayload) -> Value {
        let urgent = payload.actions.iter().filter(|a| a.severity.is_urgent()).count();
        let covered = payload
            .report
            .highlighted_items
            .iter()
            .filter(|a| a.severity.is_urgent())
            .count();
        let addressed = payload.findings.len() == payload.actions.len();
        let status_matches = payload.report.compliant == payload.violations.is_empty();

        let mut percent = if urgent == 0 {
            100
        } else {
            covered.saturating_mul(100) / urgent
        };
        if !addressed {
            percent = percent.saturating_sub(25);
        }
        if !status_matches {
            percent = percent.saturating_sub(50);
        }

        let feedback = if payload.report.compliant && status_matches {
            "The report correctly states that the application is compliant.".to_string()
        } else {
            format!(
                "The report highlights {covered} of {urgent} urgent action(s) and addresses {} of {} finding(s).",
                payload.actions.len(),
                payload.findings.len()
            )
        };
        json!({ "score": fraction(percent as u32), "feedback": feedback })
    }
}

/// `percent / 100` as a score in `[0, 1]`.
#[allow(clippy::float_arithmetic)]
fn fraction(percent: u32) -> f64 {
    f64::from(percent.min(100)) / 100.0
}

impl Reasoner for RuleBasedReasoner {
    fn invoke(&self, request: &ReasoningRequest) -> Result<String, ReasonerError> {
        let answer = match request.stage {
            StageId::RiskAssessment => Self::risk(decode_payload(request)?),
            StageId::Recommendation => Self::recommendation(decode_payload(request)?)?,
            StageId::Reporting => Self::reporting(decode_payload(request)?),
            StageId::Evaluation => Self::evaluation(decode_payload(request)?),
            StageId::Lookup | StageId::Validation => {
                return Err(ReasonerError::InvalidRequest(format!(
                    "{} is not a reasoning stage",
                    request.stage.as_str()
                )));
            }
        };
        Ok(answer.to_string())
    }

    fn name(&self) -> &str {
        "rule-based"
    }
}

// =============================================================================
// SCRIPTED REASONER
// =============================================================================

/// One canned outcome of a scripted call.
#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(String),
    /// Report a timeout without waiting.
    Timeout,
    Fail(String),
    /// Sleep, then respond. Lets tests exercise the adapter deadline.
    Delayed(Duration, String),
}

/// Reasoner that replays queued outcomes per stage.
///
/// When a stage queue is empty the call is answered by [`RuleBasedReasoner`],
/// so a script only needs to cover the calls under test.
#[derive(Debug, Default)]
pub struct ScriptedReasoner {
    scripts: Mutex<BTreeMap<StageId, VecDeque<Scripted>>>,
    requests: Mutex<Vec<ReasoningRequest>>,
}

impl ScriptedReasoner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome for the next call of `stage`.
    #[must_use]
    pub fn with(self, stage: StageId, outcome: Scripted) -> Self {
        self.push(stage, outcome);
        self
    }

    pub fn push(&self, stage: StageId, outcome: Scripted) {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(stage)
            .or_default()
            .push_back(outcome);
    }

    /// Number of invocations received for `stage`.
    #[must_use]
    pub fn calls(&self, stage: StageId) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.stage == stage)
            .count()
    }

    /// Total invocations across all stages.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Every request received, in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<ReasoningRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Reasoner for ScriptedReasoner {
    fn invoke(&self, request: &ReasoningRequest) -> Result<String, ReasonerError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let next = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&request.stage)
            .and_then(VecDeque::pop_front);

        match next {
            Some(Scripted::Respond(raw)) => Ok(raw),
            Some(Scripted::Timeout) => Err(ReasonerError::Timeout),
            Some(Scripted::Fail(message)) => Err(ReasonerError::Unavailable(message)),
            Some(Scripted::Delayed(delay, raw)) => {
                std::thread::sleep(delay);
                Ok(raw)
            }
            None => RuleBasedReasoner.invoke(request),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::rules::RuleEngine;
    use crate::{Environment, RecordId};
    use std::collections::BTreeSet;

    fn sandbox_record() -> ApplicationRecord {
        ApplicationRecord {
            id: RecordId::new("9"),
            name: "Card Vault".to_string(),
            owner: "Payments".to_string(),
            tech_stack: vec!["Rust".to_string()],
            environment: Environment::Sandbox,
            required_standards: BTreeSet::from([Standard::Pci, Standard::Soc2]),
            user_count: 500,
        }
    }

    fn request(stage: StageId, payload: Value) -> ReasoningRequest {
        ReasoningRequest {
            stage,
            payload,
            schema: Value::Null,
            instructions: stage.instructions().to_string(),
            attempt: 1,
            correction: None,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn severity_policy() {
        assert_eq!(RuleBasedReasoner::severity_for(Standard::Pci), Severity::Critical);
        assert_eq!(RuleBasedReasoner::severity_for(Standard::Gdpr), Severity::High);
        assert_eq!(RuleBasedReasoner::severity_for(Standard::Soc2), Severity::High);
    }

    #[test]
    fn risk_answers_every_violation() {
        let record = sandbox_record();
        let violations = RuleEngine::evaluate(&record).unwrap();
        let payload = serde_json::to_value(RiskPayload {
            record,
            violations,
        })
        .unwrap();

        let raw = RuleBasedReasoner
            .invoke(&request(StageId::RiskAssessment, payload))
            .unwrap();
        let doc: Value = serde_json::from_str(&raw).unwrap();
        let findings = doc["findings"].as_array().unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0]["violation_id"], 0);
        assert_eq!(findings[0]["severity"], "Critical");
        assert_eq!(findings[1]["severity"], "High");
    }

    #[test]
    fn rule_based_is_deterministic() {
        let record = sandbox_record();
        let violations = RuleEngine::evaluate(&record).unwrap();
        let payload = serde_json::to_value(RiskPayload {
            record,
            violations,
        })
        .unwrap();
        let req = request(StageId::RiskAssessment, payload);
        assert_eq!(
            RuleBasedReasoner.invoke(&req).unwrap(),
            RuleBasedReasoner.invoke(&req).unwrap()
        );
    }

    #[test]
    fn non_reasoning_stage_rejected() {
        let err = RuleBasedReasoner
            .invoke(&request(StageId::Lookup, Value::Null))
            .unwrap_err();
        assert!(matches!(err, ReasonerError::InvalidRequest(_)));
    }

    #[test]
    fn malformed_payload_rejected() {
        let err = RuleBasedReasoner
            .invoke(&request(StageId::Reporting, json!({"nope": 1})))
            .unwrap_err();
        assert!(matches!(err, ReasonerError::InvalidRequest(_)));
    }

    #[test]
    fn scripted_replays_then_falls_back() {
        let reasoner = ScriptedReasoner::new()
            .with(StageId::RiskAssessment, Scripted::Respond("first".to_string()))
            .with(StageId::RiskAssessment, Scripted::Timeout);

        let record = sandbox_record();
        let violations = RuleEngine::evaluate(&record).unwrap();
        let payload = serde_json::to_value(RiskPayload {
            record,
            violations,
        })
        .unwrap();
        let req = request(StageId::RiskAssessment, payload);

        assert_eq!(reasoner.invoke(&req).unwrap(), "first");
        assert_eq!(reasoner.invoke(&req).unwrap_err(), ReasonerError::Timeout);
        assert!(reasoner.invoke(&req).unwrap().contains("findings"));
        assert_eq!(reasoner.calls(StageId::RiskAssessment), 3);
        assert_eq!(reasoner.calls(StageId::Reporting), 0);
        assert_eq!(reasoner.total_calls(), 3);
    }

    #[test]
    fn fraction_clamps() {
        assert_eq!(fraction(100), 1.0);
        assert_eq!(fraction(50), 0.5);
        assert_eq!(fraction(250), 1.0);
    }
}
