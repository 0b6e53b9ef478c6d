//! # Rule Engine
//!
//! Pure compliance rules evaluated against a single application record.
//!
//! | Standard | Violated when |
//! |----------|---------------|
//! | PCI  | environment is `sandbox` or `qa` |
//! | GDPR | environment is `uat` and `user_count > 10_000` |
//! | SOC2 | environment is `sandbox` |
//!
//! Rules are independent: a record may violate several. A standard that is not
//! in `required_standards` never produces a violation. Output order follows the
//! rule table, so identical input always yields an identical sequence.
//!
//! Catalog checks also aggregate per standard (how many applications require
//! it, how many violate it) and per severity, using [`baseline_severity`].

use crate::{
    ApplicationRecord, Environment, GovernanceError, RecordId, Severity, Standard, Violation,
    ViolationId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Users above which a GDPR application may not run in UAT.
pub const GDPR_UAT_USER_THRESHOLD: u64 = 10_000;

/// One compliance rule: the standard it guards and its check.
struct Rule {
    standard: Standard,
    check: fn(&ApplicationRecord) -> Option<String>,
}

const RULES: [Rule; 3] = [
    Rule {
        standard: Standard::Pci,
        check: pci_rule,
    },
    Rule {
        standard: Standard::Gdpr,
        check: gdpr_rule,
    },
    Rule {
        standard: Standard::Soc2,
        check: soc2_rule,
    },
];

fn pci_rule(record: &ApplicationRecord) -> Option<String> {
    matches!(record.environment, Environment::Sandbox | Environment::Qa).then(|| {
        format!(
            "PCI-scoped application is deployed in a non-certified '{}' environment",
            record.environment
        )
    })
}

fn gdpr_rule(record: &ApplicationRecord) -> Option<String> {
    (record.environment == Environment::Uat && record.user_count > GDPR_UAT_USER_THRESHOLD).then(
        || {
            format!(
                "GDPR-scoped application serves {} users in 'uat', above the {} user threshold",
                record.user_count, GDPR_UAT_USER_THRESHOLD
            )
        },
    )
}

fn soc2_rule(record: &ApplicationRecord) -> Option<String> {
    (record.environment == Environment::Sandbox).then(|| {
        format!(
            "SOC2-scoped application is deployed in a '{}' environment",
            record.environment
        )
    })
}

/// Default severity of a violated standard.
///
/// | Standard | Severity |
/// |----------|----------|
/// | PCI  | Critical |
/// | GDPR | High |
/// | SOC2 | High |
#[must_use]
pub fn baseline_severity(standard: Standard) -> Severity {
    match standard {
        Standard::Pci => Severity::Critical,
        Standard::Gdpr | Standard::Soc2 => Severity::High,
    }
}

// =============================================================================
// RULE ENGINE
// =============================================================================

/// Stateless evaluator for the compliance rule table.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEngine;

impl RuleEngine {
    /// Evaluate one record. Violation ids are assigned in output order.
    ///
    /// A record that fails its own invariants is a precondition violation.
    pub fn evaluate(record: &ApplicationRecord) -> Result<Vec<Violation>, GovernanceError> {
        record
            .validate()
            .map_err(|e| GovernanceError::Precondition(e.to_string()))?;

        let violations = RULES
            .iter()
            .filter(|rule| record.requires(rule.standard))
            .filter_map(|rule| (rule.check)(record).map(|reason| (rule.standard, reason)))
            .enumerate()
            .map(|(i, (standard, reason))| Violation {
                id: ViolationId(i as u32),
                standard,
                reason,
                record_id: record.id.clone(),
            })
            .collect();

        Ok(violations)
    }

    /// Evaluate every record of a catalog and aggregate the verdicts.
    pub fn check_catalog(
        records: &[ApplicationRecord],
    ) -> Result<CatalogCompliance, GovernanceError> {
        let mut by_standard: BTreeMap<Standard, StandardTally> = BTreeMap::new();
        let mut by_severity: BTreeMap<Severity, u32> = BTreeMap::new();
        let mut results = Vec::with_capacity(records.len());

        for record in records {
            let violations = Self::evaluate(record)?;
            for standard in &record.required_standards {
                let tally = by_standard.entry(*standard).or_default();
                tally.required = tally.required.saturating_add(1);
            }

            let mut severities: BTreeMap<Severity, u32> = BTreeMap::new();
            for violation in &violations {
                let tally = by_standard.entry(violation.standard).or_default();
                tally.violated = tally.violated.saturating_add(1);
                let severity = baseline_severity(violation.standard);
                bump(&mut severities, severity);
                bump(&mut by_severity, severity);
            }

            results.push(ComplianceResult {
                record_id: record.id.clone(),
                name: record.name.clone(),
                compliant: violations.is_empty(),
                violations,
                severities,
            });
        }

        Ok(CatalogCompliance {
            results,
            by_standard,
            by_severity,
        })
    }
}

fn bump(counts: &mut BTreeMap<Severity, u32>, severity: Severity) {
    let n = counts.entry(severity).or_default();
    *n = n.saturating_add(1);
}

/// Compliance verdict for one record of a catalog-wide check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceResult {
    pub record_id: RecordId,
    pub name: String,
    pub compliant: bool,
    pub violations: Vec<Violation>,
    /// Violations of this record counted by baseline severity.
    pub severities: BTreeMap<Severity, u32>,
}

/// How a standard fares across a catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardTally {
    /// Applications that list the standard as required.
    pub required: u32,
    /// Applications violating it.
    pub violated: u32,
}

/// Catalog-wide check: one result per record plus the aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogCompliance {
    pub results: Vec<ComplianceResult>,
    /// Only standards that some record requires appear.
    pub by_standard: BTreeMap<Standard, StandardTally>,
    pub by_severity: BTreeMap<Severity, u32>,
}

impl CatalogCompliance {
    #[must_use]
    pub fn compliant_count(&self) -> usize {
        self.results.iter().filter(|r| r.compliant).count()
    }
}

// =============================================================================
// TESTS
// =============================================================================
