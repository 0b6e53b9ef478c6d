//! Stage 3: turn each risk finding into one remediation step.
//!
//! The reasoner writes the step text. Priorities are assigned by the core:
//! findings are stably sorted by descending severity and numbered from 1, so
//! equal severities keep their finding order.

use super::{StageError, StageId, Staged};
use crate::adapter::{ReasoningAdapter, WireOutput};
use crate::schema::{Field, OutputSchema, ScalarKind, Shape};
use crate::{
    ActionId, ApplicationRecord, FindingId, GovernanceError, RecommendedAction, RiskFinding,
    Violation,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Leading words that mark a step as a statement rather than a command.
const NON_IMPERATIVE_OPENERS: &[&str] = &[
    "a", "an", "the", "this", "that", "these", "those", "it", "its", "we", "you", "they", "i",
    "our", "your", "their", "there", "is", "are", "should", "must", "will", "would", "could",
    "can", "may", "might",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationPayload {
    pub record: ApplicationRecord,
    pub violations: Vec<Violation>,
    pub findings: Vec<RiskFinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDraft {
    pub finding_id: FindingId,
    pub step: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationOutput {
    pub actions: Vec<ActionDraft>,
}

static RECOMMENDATION_SCHEMA: OutputSchema = OutputSchema {
    name: "recommendation",
    root: Shape::Object(&[Field::required(
        "actions",
        Shape::Array(&Shape::Object(&[
            Field::required("finding_id", Shape::Scalar(ScalarKind::Integer)),
            Field::required("step", Shape::Scalar(ScalarKind::String)),
        ])),
    )]),
};

impl WireOutput for RecommendationOutput {
    fn schema() -> &'static OutputSchema {
        &RECOMMENDATION_SCHEMA
    }
}

/// A step must open with a capitalized verb in the imperative mood.
pub fn check_imperative(step: &str) -> Result<(), String> {
    let Some(first) = step.split_whitespace().next() else {
        return Err("step is empty".to_string());
    };
    let word = first.trim_end_matches(|c: char| c.is_ascii_punctuation());
    if word.is_empty() || !word.chars().all(char::is_alphabetic) {
        return Err(format!("step must start with a verb, found '{first}'"));
    }
    if !word.chars().next().is_some_and(char::is_uppercase) {
        return Err(format!("step must start with a capitalized verb, found '{word}'"));
    }
    let lower = word.to_lowercase();
    if NON_IMPERATIVE_OPENERS.contains(&lower.as_str()) {
        return Err(format!("step is not imperative: starts with '{word}'"));
    }
    if lower.len() > 5 && lower.ends_with("ing") {
        return Err(format!("step is not imperative: starts with gerund '{word}'"));
    }
    Ok(())
}

/// Every finding covered exactly once, every step imperative.
pub fn check(findings: &[RiskFinding], output: &RecommendationOutput) -> Result<(), String> {
    let mut seen = BTreeSet::new();
    for draft in &output.actions {
        if !findings.iter().any(|f| f.id == draft.finding_id) {
            return Err(format!("unknown finding_id {}", draft.finding_id.0));
        }
        if !seen.insert(draft.finding_id) {
            return Err(format!(
                "finding_id {} has more than one action",
                draft.finding_id.0
            ));
        }
        check_imperative(draft.step.trim())
            .map_err(|e| format!("finding_id {}: {e}", draft.finding_id.0))?;
    }
    if let Some(missing) = findings.iter().find(|f| !seen.contains(&f.id)) {
        return Err(format!("finding_id {} has no action", missing.id.0));
    }
    Ok(())
}

/// 1-based priority per finding: stable sort by descending severity.
///
/// Pure; fails only when finding ids are not unique.
pub fn prioritize(findings: &[RiskFinding]) -> Result<BTreeMap<FindingId, u32>, GovernanceError> {
    let mut order: Vec<&RiskFinding> = findings.iter().collect();
    order.sort_by(|a, b| b.severity.cmp(&a.severity));

    let mut priorities = BTreeMap::new();
    for (rank, finding) in order.iter().enumerate() {
        if priorities.insert(finding.id, rank as u32 + 1).is_some() {
            return Err(GovernanceError::Precondition(format!(
                "duplicate finding id {}",
                finding.id.0
            )));
        }
    }
    Ok(priorities)
}

/// Produce one action per finding, ordered by priority.
pub fn run(
    adapter: &ReasoningAdapter,
    record: &ApplicationRecord,
    violations: &[Violation],
    findings: &[RiskFinding],
) -> Result<Staged<Vec<RecommendedAction>>, StageError> {
    if findings.is_empty() {
        return Ok(Staged::direct(Vec::new()));
    }
    let priorities = prioritize(findings)?;

    let payload = RecommendationPayload {
        record: record.clone(),
        violations: violations.to_vec(),
        findings: findings.to_vec(),
    };
    let reasoned = adapter.call(
        StageId::Recommendation,
        &payload,
        |out: &RecommendationOutput| check(findings, out),
    )?;

    let mut steps: BTreeMap<FindingId, String> = reasoned
        .output
        .actions
        .into_iter()
        .map(|d| (d.finding_id, d.step.trim().to_string()))
        .collect();

    let mut actions: Vec<RecommendedAction> = findings
        .iter()
        .filter_map(|finding| {
            let step = steps.remove(&finding.id)?;
            let priority = priorities.get(&finding.id).copied()?;
            Some(RecommendedAction {
                id: ActionId(finding.id.0),
                finding: finding.id,
                severity: finding.severity,
                step,
                priority,
            })
        })
        .collect();
    actions.sort_by_key(|a| a.priority);

    Ok(Staged {
        artifact: actions,
        attempts: reasoned.attempts,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::Severity;
    use crate::adapter::AdapterConfig;
    use crate::reasoner::{Scripted, ScriptedReasoner};
    use crate::store::sample_catalog;
    use crate::ViolationId;
    use std::sync::Arc;

    fn finding(id: u32, severity: Severity) -> RiskFinding {
        RiskFinding {
            id: FindingId(id),
            violation: ViolationId(id),
            severity,
            rationale: format!("risk {id}"),
        }
    }

    #[test]
    fn imperative_steps() {
        assert!(check_imperative("Migrate the service to production.").is_ok());
        assert!(check_imperative("Bring logging under audit").is_ok());
        assert!(check_imperative("Disable: public access").is_ok());

        assert!(check_imperative("").is_err());
        assert!(check_imperative("migrate the service").is_err());
        assert!(check_imperative("The service should move").is_err());
        assert!(check_imperative("Migrating the service").is_err());
        assert!(check_imperative("We must migrate").is_err());
        assert!(check_imperative("1. Migrate").is_err());
    }

    #[test]
    fn priority_is_stable_by_severity() {
        let findings = vec![
            finding(0, Severity::High),
            finding(1, Severity::Critical),
            finding(2, Severity::Low),
            finding(3, Severity::High),
        ];
        let p = prioritize(&findings).unwrap();
        assert_eq!(p[&FindingId(1)], 1);
        assert_eq!(p[&FindingId(0)], 2);
        assert_eq!(p[&FindingId(3)], 3);
        assert_eq!(p[&FindingId(2)], 4);
    }

    #[test]
    fn duplicate_finding_ids_are_precondition_failures() {
        let findings = vec![finding(0, Severity::High), finding(0, Severity::Low)];
        assert!(matches!(
            prioritize(&findings),
            Err(GovernanceError::Precondition(_))
        ));
    }

    #[test]
    fn actions_sorted_by_priority() {
        let record = sample_catalog()[2].clone();
        let findings = vec![finding(0, Severity::Medium), finding(1, Severity::Critical)];
        let raw = r#"{"actions": [
            {"finding_id": 0, "step": "Rotate the credentials."},
            {"finding_id": 1, "step": "Migrate out of sandbox.", "why": "noise"}
        ]}"#;
        let reasoner = Arc::new(
            ScriptedReasoner::new().with(StageId::Recommendation, Scripted::Respond(raw.into())),
        );
        let adapter = ReasoningAdapter::new(reasoner, AdapterConfig::default());

        let actions = run(&adapter, &record, &[], &findings).unwrap().artifact;
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].id, ActionId(1));
        assert_eq!(actions[0].priority, 1);
        assert_eq!(actions[0].severity, Severity::Critical);
        assert_eq!(actions[1].step, "Rotate the credentials.");
        assert_eq!(actions[1].priority, 2);
    }

    #[test]
    fn non_imperative_answer_retried() {
        let record = sample_catalog()[2].clone();
        let findings = vec![finding(0, Severity::High)];
        let reasoner = Arc::new(
            ScriptedReasoner::new()
                .with(
                    StageId::Recommendation,
                    Scripted::Respond(
                        r#"{"actions": [{"finding_id": 0, "step": "You should migrate."}]}"#.into(),
                    ),
                )
                .with(
                    StageId::Recommendation,
                    Scripted::Respond(
                        r#"{"actions": [{"finding_id": 0, "step": "Migrate now."}]}"#.into(),
                    ),
                ),
        );
        let adapter = ReasoningAdapter::new(reasoner.clone(), AdapterConfig::default());
        let staged = run(&adapter, &record, &[], &findings).unwrap();
        assert_eq!(staged.artifact[0].step, "Migrate now.");
        assert_eq!(staged.attempts.len(), 2);
        assert_eq!(reasoner.calls(StageId::Recommendation), 2);
    }

    #[test]
    fn every_finding_needs_an_action() {
        let findings = vec![finding(0, Severity::High), finding(1, Severity::Low)];
        let output = RecommendationOutput {
            actions: vec![ActionDraft {
                finding_id: FindingId(1),
                step: "Patch it".to_string(),
            }],
        };
        assert_eq!(
            check(&findings, &output).unwrap_err(),
            "finding_id 0 has no action"
        );
    }
}
