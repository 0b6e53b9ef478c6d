//! Stage 2: assess the risk created by each violation.
//!
//! The reasoner returns one finding per violation. The core checks that the
//! findings and violations are in one-to-one correspondence, then assigns
//! finding ids in violation order.

use super::{StageError, StageId, Staged};
use crate::adapter::{ReasoningAdapter, WireOutput};
use crate::schema::{Field, OutputSchema, SEVERITY_NAMES, ScalarKind, Shape};
use crate::{ApplicationRecord, FindingId, RiskFinding, Severity, Violation, ViolationId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Input sent to the reasoner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskPayload {
    pub record: ApplicationRecord,
    pub violations: Vec<Violation>,
}

/// Reasoner answer for one violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingDraft {
    pub violation_id: ViolationId,
    pub severity: Severity,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskOutput {
    pub findings: Vec<FindingDraft>,
}

static RISK_SCHEMA: OutputSchema = OutputSchema {
    name: "risk_assessment",
    root: Shape::Object(&[Field::required(
        "findings",
        Shape::Array(&Shape::Object(&[
            Field::required("violation_id", Shape::Scalar(ScalarKind::Integer)),
            Field::required("severity", Shape::Enum(SEVERITY_NAMES)),
            Field::required("rationale", Shape::Scalar(ScalarKind::String)),
        ])),
    )]),
};

impl WireOutput for RiskOutput {
    fn schema() -> &'static OutputSchema {
        &RISK_SCHEMA
    }
}

/// Every violation answered exactly once, with a non-empty rationale.
pub fn check(violations: &[Violation], output: &RiskOutput) -> Result<(), String> {
    let mut seen = BTreeSet::new();
    for draft in &output.findings {
        if !violations.iter().any(|v| v.id == draft.violation_id) {
            return Err(format!("unknown violation_id {}", draft.violation_id.0));
        }
        if !seen.insert(draft.violation_id) {
            return Err(format!(
                "violation_id {} is assessed more than once",
                draft.violation_id.0
            ));
        }
        if draft.rationale.trim().is_empty() {
            return Err(format!(
                "finding for violation_id {} has an empty rationale",
                draft.violation_id.0
            ));
        }
    }
    if let Some(missing) = violations.iter().find(|v| !seen.contains(&v.id)) {
        return Err(format!("violation_id {} has no finding", missing.id.0));
    }
    Ok(())
}

/// Produce one finding per violation. No violations means no reasoning call.
pub fn run(
    adapter: &ReasoningAdapter,
    record: &ApplicationRecord,
    violations: &[Violation],
) -> Result<Staged<Vec<RiskFinding>>, StageError> {
    if violations.is_empty() {
        return Ok(Staged::direct(Vec::new()));
    }

    let payload = RiskPayload {
        record: record.clone(),
        violations: violations.to_vec(),
    };
    let reasoned = adapter.call(StageId::RiskAssessment, &payload, |out: &RiskOutput| {
        check(violations, out)
    })?;

    let mut drafts: BTreeMap<ViolationId, FindingDraft> = reasoned
        .output
        .findings
        .into_iter()
        .map(|d| (d.violation_id, d))
        .collect();

    let findings = violations
        .iter()
        .enumerate()
        .filter_map(|(i, violation)| {
            drafts.remove(&violation.id).map(|draft| RiskFinding {
                id: FindingId(i as u32),
                violation: violation.id,
                severity: draft.severity,
                rationale: draft.rationale.trim().to_string(),
            })
        })
        .collect();

    Ok(Staged {
        artifact: findings,
        attempts: reasoned.attempts,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::adapter::AdapterConfig;
    use crate::reasoner::{RuleBasedReasoner, Scripted, ScriptedReasoner};
    use crate::rules::RuleEngine;
    use crate::store::sample_catalog;
    use crate::{GovernanceError, Standard};
    use std::sync::Arc;

    fn sandbox_pci_soc2() -> ApplicationRecord {
        let mut record = sample_catalog()[4].clone();
        record.required_standards.insert(Standard::Pci);
        record
    }

    #[test]
    fn findings_follow_violation_order() {
        let record = sandbox_pci_soc2();
        let violations = RuleEngine::evaluate(&record).unwrap();
        let adapter = ReasoningAdapter::new(Arc::new(RuleBasedReasoner), AdapterConfig::default());

        let staged = run(&adapter, &record, &violations).unwrap();
        let findings = staged.artifact;
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].id, FindingId(0));
        assert_eq!(findings[0].violation, violations[0].id);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[1].violation, violations[1].id);
        assert_eq!(staged.attempts.len(), 1);
    }

    #[test]
    fn reordered_answer_is_realigned() {
        let record = sandbox_pci_soc2();
        let violations = RuleEngine::evaluate(&record).unwrap();
        let raw = r#"{"findings": [
            {"violation_id": 1, "severity": "medium", "rationale": "second"},
            {"violation_id": 0, "severity": "LOW", "rationale": "first"}
        ]}"#;
        let reasoner = Arc::new(
            ScriptedReasoner::new().with(StageId::RiskAssessment, Scripted::Respond(raw.into())),
        );
        let adapter = ReasoningAdapter::new(reasoner, AdapterConfig::default());

        let findings = run(&adapter, &record, &violations).unwrap().artifact;
        assert_eq!(findings[0].rationale, "first");
        assert_eq!(findings[0].severity, Severity::Low);
        assert_eq!(findings[1].rationale, "second");
        assert_eq!(findings[1].id, FindingId(1));
    }

    #[test]
    fn empty_violations_skip_reasoner() {
        let record = sample_catalog()[0].clone();
        let reasoner = Arc::new(ScriptedReasoner::new());
        let adapter = ReasoningAdapter::new(reasoner.clone(), AdapterConfig::default());
        let staged = run(&adapter, &record, &[]).unwrap();
        assert!(staged.artifact.is_empty());
        assert_eq!(reasoner.total_calls(), 0);
    }

    #[test]
    fn missing_finding_is_rejected() {
        let record = sandbox_pci_soc2();
        let violations = RuleEngine::evaluate(&record).unwrap();
        let partial = r#"{"findings": [{"violation_id": 0, "severity": "High", "rationale": "r"}]}"#;
        let reasoner = Arc::new(
            ScriptedReasoner::new()
                .with(StageId::RiskAssessment, Scripted::Respond(partial.into()))
                .with(StageId::RiskAssessment, Scripted::Respond(partial.into())),
        );
        let adapter = ReasoningAdapter::new(reasoner, AdapterConfig::default());
        let err = run(&adapter, &record, &violations).unwrap_err();
        match err.error {
            GovernanceError::SchemaValidation { message, .. } => {
                assert_eq!(message, "violation_id 1 has no finding");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn check_rejects_duplicates_and_blank_rationale() {
        let record = sandbox_pci_soc2();
        let violations = RuleEngine::evaluate(&record).unwrap();
        let draft = |id: u32, rationale: &str| FindingDraft {
            violation_id: ViolationId(id),
            severity: Severity::High,
            rationale: rationale.to_string(),
        };

        let dup = RiskOutput {
            findings: vec![draft(0, "a"), draft(0, "b")],
        };
        assert!(check(&violations, &dup).unwrap_err().contains("more than once"));

        let blank = RiskOutput {
            findings: vec![draft(0, "a"), draft(1, "  ")],
        };
        assert!(check(&violations, &blank).unwrap_err().contains("empty rationale"));

        let unknown = RiskOutput {
            findings: vec![draft(7, "a")],
        };
        assert!(check(&violations, &unknown).unwrap_err().contains("unknown"));
    }
}
