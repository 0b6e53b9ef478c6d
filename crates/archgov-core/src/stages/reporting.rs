//! Stage 4: compile the stakeholder report.
//!
//! The reasoner writes the summary and picks the actions to highlight. The
//! core decides compliance from the violations, orders the highlighted items
//! by priority and derives the report id from the report content.

use super::{StageError, StageId, Staged};
use crate::adapter::{ReasoningAdapter, WireOutput};
use crate::export::fnv1a;
use crate::schema::{Field, OutputSchema, ScalarKind, Shape};
use crate::{
    ActionId, ApplicationRecord, GovernanceError, RecommendedAction, RecordId, Report, ReportId,
    RiskFinding, Violation,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingPayload {
    pub record: ApplicationRecord,
    pub compliant: bool,
    pub violations: Vec<Violation>,
    pub findings: Vec<RiskFinding>,
    pub actions: Vec<RecommendedAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportOutput {
    pub summary: String,
    #[serde(default)]
    pub highlighted: Vec<ActionId>,
}

static REPORT_SCHEMA: OutputSchema = OutputSchema {
    name: "report",
    root: Shape::Object(&[
        Field::required("summary", Shape::Scalar(ScalarKind::String)),
        Field::optional("highlighted", Shape::Array(&Shape::Scalar(ScalarKind::Integer))),
    ]),
};

impl WireOutput for ReportOutput {
    fn schema() -> &'static OutputSchema {
        &REPORT_SCHEMA
    }
}

/// Non-empty summary; highlighted ids known, unique, and covering every
/// High or Critical action.
pub fn check(actions: &[RecommendedAction], output: &ReportOutput) -> Result<(), String> {
    if output.summary.trim().is_empty() {
        return Err("summary is empty".to_string());
    }
    let mut seen = BTreeSet::new();
    for id in &output.highlighted {
        if !actions.iter().any(|a| a.id == *id) {
            return Err(format!("unknown action id {} in highlighted", id.0));
        }
        if !seen.insert(*id) {
            return Err(format!("action id {} is highlighted more than once", id.0));
        }
    }
    if let Some(missed) = actions
        .iter()
        .find(|a| a.severity.is_urgent() && !seen.contains(&a.id))
    {
        return Err(format!(
            "{} action {} must be highlighted",
            missed.severity, missed.id.0
        ));
    }
    Ok(())
}

/// Report fields covered by the report id.
#[derive(Serialize)]
struct ReportContent<'a> {
    record_id: &'a RecordId,
    compliant: bool,
    summary: &'a str,
    highlighted_items: &'a [RecommendedAction],
    generated_at: &'a DateTime<Utc>,
}

/// Deterministic digest of the report content.
pub fn report_id(
    record_id: &RecordId,
    compliant: bool,
    summary: &str,
    highlighted_items: &[RecommendedAction],
    generated_at: &DateTime<Utc>,
) -> Result<ReportId, GovernanceError> {
    let content = ReportContent {
        record_id,
        compliant,
        summary,
        highlighted_items,
        generated_at,
    };
    let bytes = postcard::to_allocvec(&content)
        .map_err(|e| GovernanceError::Serialization(format!("report digest: {e}")))?;
    Ok(ReportId(fnv1a(&bytes)))
}

pub fn run(
    adapter: &ReasoningAdapter,
    record: &ApplicationRecord,
    violations: &[Violation],
    findings: &[RiskFinding],
    actions: &[RecommendedAction],
    generated_at: DateTime<Utc>,
) -> Result<Staged<Report>, StageError> {
    let compliant = violations.is_empty();
    let payload = ReportingPayload {
        record: record.clone(),
        compliant,
        violations: violations.to_vec(),
        findings: findings.to_vec(),
        actions: actions.to_vec(),
    };
    let reasoned = adapter.call(StageId::Reporting, &payload, |out: &ReportOutput| {
        check(actions, out)
    })?;

    let selected: BTreeSet<ActionId> = reasoned.output.highlighted.iter().copied().collect();
    // actions arrive sorted by priority
    let highlighted_items: Vec<RecommendedAction> = actions
        .iter()
        .filter(|a| selected.contains(&a.id))
        .cloned()
        .collect();
    let summary = reasoned.output.summary.trim().to_string();

    let id = report_id(&record.id, compliant, &summary, &highlighted_items, &generated_at)?;
    Ok(Staged {
        artifact: Report {
            id,
            record_id: record.id.clone(),
            compliant,
            summary,
            highlighted_items,
            generated_at,
        },
        attempts: reasoned.attempts,
    })
}
