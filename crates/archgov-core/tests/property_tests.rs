//! # Property-Based Tests
//!
//! Determinism and ordering invariants of the pipeline, checked with proptest.

#![allow(clippy::unwrap_used, clippy::panic)]

use archgov_core::adapter::WireOutput;
use archgov_core::extract::parse_document;
use archgov_core::stages::evaluation::normalize_score;
use archgov_core::stages::recommendation::prioritize;
use archgov_core::stages::risk::{self, RiskOutput};
use archgov_core::{
    AdapterConfig, ApplicationRecord, Environment, FindingId, OutputExtractor, ReasoningAdapter,
    RecordId, RiskFinding, RuleBasedReasoner, RuleEngine, Severity, Standard, ViolationId,
};
use proptest::collection::{btree_set, vec};
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

// =============================================================================
// STRATEGIES
// =============================================================================

fn environment() -> impl Strategy<Value = Environment> {
    prop_oneof![
        Just(Environment::Sandbox),
        Just(Environment::Qa),
        Just(Environment::Uat),
        Just(Environment::Staging),
        Just(Environment::Production),
    ]
}

fn standard() -> impl Strategy<Value = Standard> {
    prop_oneof![Just(Standard::Pci), Just(Standard::Gdpr), Just(Standard::Soc2)]
}

fn severity() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Low),
        Just(Severity::Medium),
        Just(Severity::High),
        Just(Severity::Critical),
    ]
}

fn application() -> impl Strategy<Value = ApplicationRecord> {
    (
        "[a-z0-9]{1,8}",
        "[A-Za-z][A-Za-z ]{0,20}",
        environment(),
        btree_set(standard(), 0..=3),
        0u64..100_000,
    )
        .prop_map(|(id, name, environment, required_standards, user_count)| {
            ApplicationRecord {
                id: RecordId::new(id),
                name,
                owner: "Owner".to_string(),
                tech_stack: vec!["Go".to_string()],
                environment,
                required_standards,
                user_count,
            }
        })
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Same record produces the same violations, ids numbered in order.
    #[test]
    fn rule_engine_is_deterministic(record in application()) {
        let first = RuleEngine::evaluate(&record).expect("evaluate");
        let second = RuleEngine::evaluate(&record).expect("evaluate");
        prop_assert_eq!(&first, &second);

        for (i, violation) in first.iter().enumerate() {
            prop_assert_eq!(violation.id, ViolationId(i as u32));
            prop_assert!(record.requires(violation.standard));
            prop_assert_eq!(&violation.record_id, &record.id);
        }
        let standards: BTreeSet<Standard> = first.iter().map(|v| v.standard).collect();
        prop_assert_eq!(standards.len(), first.len());
    }

    /// Every finding refers to exactly one input violation, and vice versa.
    #[test]
    fn risk_findings_biject_with_violations(record in application()) {
        let violations = RuleEngine::evaluate(&record).expect("evaluate");
        let adapter = ReasoningAdapter::new(Arc::new(RuleBasedReasoner), AdapterConfig::default());
        let findings = risk::run(&adapter, &record, &violations).expect("risk").artifact;

        prop_assert_eq!(findings.len(), violations.len());
        let referenced: BTreeSet<ViolationId> = findings.iter().map(|f| f.violation).collect();
        let expected: BTreeSet<ViolationId> = violations.iter().map(|v| v.id).collect();
        prop_assert_eq!(referenced, expected);
    }

    /// Priorities are a stable sort by descending severity.
    #[test]
    fn priority_is_stable_descending_severity(severities in vec(severity(), 0..30)) {
        let findings: Vec<RiskFinding> = severities
            .iter()
            .enumerate()
            .map(|(i, severity)| RiskFinding {
                id: FindingId(i as u32),
                violation: ViolationId(i as u32),
                severity: *severity,
                rationale: "r".to_string(),
            })
            .collect();
        let priorities = prioritize(&findings).expect("prioritize");

        let assigned: BTreeSet<u32> = priorities.values().copied().collect();
        let expected: BTreeSet<u32> = (1..=findings.len() as u32).collect();
        prop_assert_eq!(assigned, expected);

        for a in &findings {
            for b in &findings {
                let (pa, pb) = (priorities[&a.id], priorities[&b.id]);
                if a.severity > b.severity {
                    prop_assert!(pa < pb);
                }
                if a.severity == b.severity && a.id < b.id {
                    prop_assert!(pa < pb);
                }
            }
        }
    }

    /// Extracting an already extracted document changes nothing.
    #[test]
    fn extraction_is_idempotent(
        drafts in vec((0u32..50, severity(), "[a-z ]{1,12}"), 0..8),
        wrap in any::<bool>(),
    ) {
        let findings: Vec<_> = drafts
            .iter()
            .map(|(id, severity, rationale)| json!({
                "violation_id": id,
                "severity": severity.as_str(),
                "rationale": rationale,
                "confidence": "high",
            }))
            .collect();
        let document = if wrap {
            json!({ "result": { "findings": findings }, "model": "stub" })
        } else {
            json!({ "findings": findings, "notes": null })
        };

        let schema = RiskOutput::schema();
        let once = OutputExtractor::canonical(schema, &document).expect("extract");
        let twice = OutputExtractor::canonical(schema, &once).expect("extract");
        prop_assert_eq!(&once, &twice);
        prop_assert!(once.get("notes").is_none());
    }

    /// A document survives prose containing brackets and braces on both sides.
    #[test]
    fn extraction_ignores_bracketed_prose(
        drafts in vec((0u32..50, severity(), "[a-z ]{1,12}"), 0..6),
        before in "[a-z ]{0,10}\\[[a-z0-9]{0,4}\\][a-z ]{0,10}",
        after in "[a-z ]{0,10}\\{[a-z]{0,6}\\}[a-z ]{0,10}",
    ) {
        let findings: Vec<_> = drafts
            .iter()
            .map(|(id, severity, rationale)| json!({
                "violation_id": id,
                "severity": severity.as_str(),
                "rationale": rationale,
            }))
            .collect();
        let document = json!({ "findings": findings });
        let raw = format!("{before} {document} {after}");

        let parsed = parse_document(&raw).expect("parse");
        let schema = RiskOutput::schema();
        prop_assert_eq!(
            OutputExtractor::canonical(schema, &parsed).expect("extract"),
            OutputExtractor::canonical(schema, &document).expect("extract")
        );
    }

    /// Percentages map into [0, 1]; out-of-range scores are rejected.
    #[test]
    fn score_normalization_bounds(percent in 0u32..=1000) {
        let score = f64::from(percent);
        match normalize_score(score) {
            Some(normalized) => {
                prop_assert!(percent <= 100);
                prop_assert!((0.0..=1.0).contains(&normalized));
            }
            None => prop_assert!(percent > 100),
        }
    }
}
