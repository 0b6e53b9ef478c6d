//! Stage 1: evaluate the compliance rules against the looked-up record.

use crate::rules::RuleEngine;
use crate::{ApplicationRecord, GovernanceError, Violation};

/// Pure; fails only on a malformed record (`Precondition`).
pub fn run(record: &ApplicationRecord) -> Result<Vec<Violation>, GovernanceError> {
    let violations = RuleEngine::evaluate(record)?;
    tracing::debug!(
        record = %record.id,
        violations = violations.len(),
        "compliance rules evaluated"
    );
    Ok(violations)
}
