//! Stage 5: score the report.
//!
//! Reasoners answer either with a fraction in `[0, 1]` or with a percentage in
//! `(1, 100]`; the core normalizes to `[0, 1]` and rejects everything else.

use super::{StageError, StageId, Staged};
use crate::adapter::{ReasoningAdapter, WireOutput};
use crate::schema::{Field, OutputSchema, ScalarKind, Shape};
use crate::{
    ApplicationRecord, EvaluationResult, RecommendedAction, Report, RiskFinding, Violation,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationPayload {
    pub record: ApplicationRecord,
    pub violations: Vec<Violation>,
    pub findings: Vec<RiskFinding>,
    pub actions: Vec<RecommendedAction>,
    pub report: Report,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationOutput {
    pub score: f64,
    pub feedback: String,
}

static EVALUATION_SCHEMA: OutputSchema = OutputSchema {
    name: "evaluation",
    root: Shape::Object(&[
        Field::required("score", Shape::Scalar(ScalarKind::Number)),
        Field::required("feedback", Shape::Scalar(ScalarKind::String)),
    ]),
};

impl WireOutput for EvaluationOutput {
    fn schema() -> &'static OutputSchema {
        &EVALUATION_SCHEMA
    }
}

/// Score in `[0, 1]`, or `None` when out of range.
#[allow(clippy::float_arithmetic)]
#[must_use]
pub fn normalize_score(score: f64) -> Option<f64> {
    if !score.is_finite() {
        None
    } else if (0.0..=1.0).contains(&score) {
        Some(score)
    } else if score > 1.0 && score <= 100.0 {
        Some(score / 100.0)
    } else {
        None
    }
}

pub fn check(output: &EvaluationOutput) -> Result<(), String> {
    if normalize_score(output.score).is_none() {
        return Err(format!(
            "score {} is outside [0, 1] and (1, 100]",
            output.score
        ));
    }
    if output.feedback.trim().is_empty() {
        return Err("feedback is empty".to_string());
    }
    Ok(())
}

pub fn run(
    adapter: &ReasoningAdapter,
    record: &ApplicationRecord,
    violations: &[Violation],
    findings: &[RiskFinding],
    actions: &[RecommendedAction],
    report: &Report,
) -> Result<Staged<EvaluationResult>, StageError> {
    let payload = EvaluationPayload {
        record: record.clone(),
        violations: violations.to_vec(),
        findings: findings.to_vec(),
        actions: actions.to_vec(),
        report: report.clone(),
    };
    let reasoned = adapter.call(StageId::Evaluation, &payload, check)?;

    // check() already accepted the score
    let score = normalize_score(reasoned.output.score).unwrap_or_default();
    Ok(Staged {
        artifact: EvaluationResult {
            report: report.id,
            score,
            feedback: reasoned.output.feedback.trim().to_string(),
        },
        attempts: reasoned.attempts,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::adapter::AdapterConfig;
    use crate::reasoner::{Scripted, ScriptedReasoner};
    use crate::store::sample_catalog;
    use crate::{GovernanceError, ReportId};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn report() -> Report {
        Report {
            id: ReportId(42),
            record_id: sample_catalog()[0].id.clone(),
            compliant: true,
            summary: "Compliant.".to_string(),
            highlighted_items: vec![],
            generated_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn evaluate(responses: &[&str]) -> Result<Staged<EvaluationResult>, StageError> {
        let reasoner = ScriptedReasoner::new();
        for raw in responses {
            reasoner.push(StageId::Evaluation, Scripted::Respond((*raw).to_string()));
        }
        let adapter = ReasoningAdapter::new(Arc::new(reasoner), AdapterConfig::default());
        run(&adapter, &sample_catalog()[0], &[], &[], &[], &report())
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_score(0.0), Some(0.0));
        assert_eq!(normalize_score(0.75), Some(0.75));
        assert_eq!(normalize_score(1.0), Some(1.0));
        assert_eq!(normalize_score(85.0), Some(0.85));
        assert_eq!(normalize_score(100.0), Some(1.0));
        assert_eq!(normalize_score(100.5), None);
        assert_eq!(normalize_score(-0.1), None);
        assert_eq!(normalize_score(f64::NAN), None);
    }

    #[test]
    fn result_references_report() {
        let result = evaluate(&[r#"{"score": 92, "feedback": "Clear and complete."}"#])
            .unwrap()
            .artifact;
        assert_eq!(result.report, ReportId(42));
        assert_eq!(result.score, 0.92);
        assert_eq!(result.feedback, "Clear and complete.");
    }

    #[test]
    fn out_of_range_score_exhausts_retries() {
        let err = evaluate(&[
            r#"{"score": 250, "feedback": "x"}"#,
            r#"{"score": -1, "feedback": "x"}"#,
        ])
        .unwrap_err();
        assert!(matches!(
            err.error,
            GovernanceError::SchemaValidation { attempts: 2, .. }
        ));
    }

    #[test]
    fn blank_feedback_rejected() {
        let output = EvaluationOutput {
            score: 0.5,
            feedback: "  ".to_string(),
        };
        assert_eq!(check(&output).unwrap_err(), "feedback is empty");
    }
}
