//! # Record Store
//!
//! Read-only catalog of application records.
//!
//! The store answers two questions: "what is in the catalog" (`get_all`) and
//! "which records match this name" (`find`). Resolving several matches into one
//! record is the Lookup stage's job, not the store's.
//!
//! ## Backends
//!
//! - [`MemoryRecordStore`]: records held in a `Vec`, insertion order preserved
//! - [`crate::storage::RedbRecordStore`]: disk-backed catalog using redb

use crate::{ApplicationRecord, Environment, GovernanceError, RecordId, Standard};
use serde::Deserialize;
use std::collections::BTreeSet;

/// Maximum number of records accepted in one catalog import.
pub const MAX_CATALOG_SIZE: usize = 100_000;

// =============================================================================
// STORE TRAIT
// =============================================================================

/// Lookup interface consumed by the Lookup stage.
///
/// Implementations must be safe to share between concurrent pipeline runs and
/// must not change while a run is in progress.
pub trait RecordStore: Send + Sync {
    /// Every record, in catalog order.
    fn get_all(&self) -> Result<Vec<ApplicationRecord>, GovernanceError>;

    /// Records whose name contains `name_filter` (case-insensitive).
    /// Returns every record when the filter is absent.
    fn find(&self, name_filter: Option<&str>) -> Result<Vec<ApplicationRecord>, GovernanceError> {
        let all = self.get_all()?;
        Ok(match name_filter {
            Some(filter) => all
                .into_iter()
                .filter(|record| name_matches(&record.name, filter))
                .collect(),
            None => all,
        })
    }

    /// Like [`RecordStore::find`] but fails with `NotFound` on zero matches.
    fn find_required(
        &self,
        name_filter: Option<&str>,
    ) -> Result<Vec<ApplicationRecord>, GovernanceError> {
        let matches = self.find(name_filter)?;
        if matches.is_empty() {
            return Err(GovernanceError::NotFound {
                filter: name_filter.unwrap_or_default().to_string(),
            });
        }
        Ok(matches)
    }
}

/// Case-insensitive substring match used by every backend.
#[must_use]
pub fn name_matches(name: &str, filter: &str) -> bool {
    name.to_lowercase().contains(&filter.trim().to_lowercase())
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// Record store backed by a vector of validated records.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    records: Vec<ApplicationRecord>,
}

impl MemoryRecordStore {
    /// Build a store, validating every record and rejecting duplicate ids.
    pub fn new(records: Vec<ApplicationRecord>) -> Result<Self, GovernanceError> {
        validate_catalog(&records)?;
        Ok(Self { records })
    }

    /// Store pre-loaded with [`sample_catalog`].
    #[must_use]
    pub fn sample() -> Self {
        Self {
            records: sample_catalog(),
        }
    }

    /// Parse a JSON catalog (see [`parse_catalog`]) into a store.
    pub fn from_json(data: &[u8]) -> Result<Self, GovernanceError> {
        Self::new(parse_catalog(data)?)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordStore for MemoryRecordStore {
    fn get_all(&self) -> Result<Vec<ApplicationRecord>, GovernanceError> {
        Ok(self.records.clone())
    }

    fn find(&self, name_filter: Option<&str>) -> Result<Vec<ApplicationRecord>, GovernanceError> {
        Ok(self
            .records
            .iter()
            .filter(|record| name_filter.is_none_or(|f| name_matches(&record.name, f)))
            .cloned()
            .collect())
    }
}

/// Validate each record and check id uniqueness across the catalog.
pub fn validate_catalog(records: &[ApplicationRecord]) -> Result<(), GovernanceError> {
    if records.len() > MAX_CATALOG_SIZE {
        return Err(GovernanceError::InvalidRecord(format!(
            "catalog size {} exceeds maximum {}",
            records.len(),
            MAX_CATALOG_SIZE
        )));
    }

    let mut seen = BTreeSet::new();
    for record in records {
        record.validate()?;
        if !seen.insert(record.id.clone()) {
            return Err(GovernanceError::InvalidRecord(format!(
                "duplicate record id '{}'",
                record.id
            )));
        }
    }
    Ok(())
}

// =============================================================================
// CATALOG PARSING
// =============================================================================

/// Record ids may arrive as numbers or strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

/// Technology may be a single "Java/Spring" string or a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawStack {
    One(String),
    Many(Vec<String>),
}

/// Wire shape of a catalog entry. Accepts the legacy CMDB field names.
#[derive(Debug, Deserialize)]
struct CatalogEntry {
    id: RawId,
    #[serde(alias = "application")]
    name: String,
    owner: String,
    #[serde(default, alias = "technology")]
    tech_stack: Option<RawStack>,
    #[serde(alias = "deployment", alias = "deployment_env")]
    environment: String,
    #[serde(default, alias = "compliance")]
    required_standards: Vec<Standard>,
    #[serde(default, alias = "users")]
    user_count: u64,
}

impl CatalogEntry {
    fn into_record(self) -> Result<ApplicationRecord, GovernanceError> {
        let id = match self.id {
            RawId::Number(n) => RecordId::new(n.to_string()),
            RawId::Text(s) => RecordId::new(s),
        };
        let tech_stack = match self.tech_stack {
            None => Vec::new(),
            Some(RawStack::One(s)) => s
                .split('/')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            Some(RawStack::Many(v)) => v,
        };
        let environment: Environment = self.environment.parse()?;

        let record = ApplicationRecord {
            id,
            name: self.name,
            owner: self.owner,
            tech_stack,
            environment,
            required_standards: self.required_standards.into_iter().collect(),
            user_count: self.user_count,
        };
        record.validate()?;
        Ok(record)
    }
}

/// Parse a JSON array of catalog entries.
pub fn parse_catalog(data: &[u8]) -> Result<Vec<ApplicationRecord>, GovernanceError> {
    let entries: Vec<CatalogEntry> = serde_json::from_slice(data)
        .map_err(|e| GovernanceError::Serialization(format!("catalog: {e}")))?;

    let records = entries
        .into_iter()
        .map(CatalogEntry::into_record)
        .collect::<Result<Vec<_>, _>>()?;
    validate_catalog(&records)?;
    Ok(records)
}

// =============================================================================
// SAMPLE CATALOG
// =============================================================================

/// The five reference applications shipped for demos and tests.
#[must_use]
pub fn sample_catalog() -> Vec<ApplicationRecord> {
    fn record(
        id: &str,
        name: &str,
        owner: &str,
        stack: &[&str],
        environment: Environment,
        standards: &[Standard],
        user_count: u64,
    ) -> ApplicationRecord {
        ApplicationRecord {
            id: RecordId::new(id),
            name: name.to_string(),
            owner: owner.to_string(),
            tech_stack: stack.iter().map(|s| (*s).to_string()).collect(),
            environment,
            required_standards: standards.iter().copied().collect(),
            user_count,
        }
    }

    vec![
        record(
            "1",
            "Customer Payments Gateway",
            "Finance Team",
            &["Java", "Spring"],
            Environment::Production,
            &[Standard::Pci, Standard::Soc2],
            150_000,
        ),
        record(
            "2",
            "User Data Analytics",
            "Marketing Team",
            &["Python", "Flask"],
            Environment::Uat,
            &[Standard::Gdpr],
            25_000,
        ),
        record(
            "3",
            "PCI Feature Dev",
            "Payments Dev Team",
            &["Java", "Spring"],
            Environment::Sandbox,
            &[Standard::Pci],
            15,
        ),
        record(
            "4",
            "Internal HR Portal",
            "HR Team",
            &["Node.js", "React"],
            Environment::Production,
            &[Standard::Soc2],
            800,
        ),
        record(
            "5",
            "SOC2 Staging Env",
            "Core Platform",
            &["Go"],
            Environment::Sandbox,
            &[Standard::Soc2],
            50,
        ),
    ]
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn find_is_case_insensitive_substring() {
        let store = MemoryRecordStore::sample();
        let hits = store.find(Some("payments")).expect("find");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Customer Payments Gateway");

        let hits = store.find(Some("SOC2")).expect("find");
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn find_without_filter_returns_all() {
        let store = MemoryRecordStore::sample();
        assert_eq!(store.find(None).expect("find").len(), 5);
    }

    #[test]
    fn find_returns_every_match() {
        let store = MemoryRecordStore::sample();
        let hits = store.find(Some("a")).expect("find");
        assert_eq!(hits.len(), 5);
    }

    #[test]
    fn find_required_fails_on_zero_matches() {
        let store = MemoryRecordStore::sample();
        let err = store.find_required(Some("mainframe")).unwrap_err();
        assert!(matches!(err, GovernanceError::NotFound { filter } if filter == "mainframe"));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let mut records = sample_catalog();
        records[1].id = records[0].id.clone();
        assert!(matches!(
            MemoryRecordStore::new(records),
            Err(GovernanceError::InvalidRecord(_))
        ));
    }

    #[test]
    fn parse_legacy_cmdb_shape() {
        let json = br#"[
            {"id": 1, "name": "Customer Payments Gateway", "owner": "Finance Team",
             "technology": "Java/Spring", "deployment": "prod",
             "compliance": ["PCI", "SOC2"], "users": 150000}
        ]"#;
        let records = parse_catalog(json).expect("parse");
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id.as_str(), "1");
        assert_eq!(record.tech_stack, vec!["Java", "Spring"]);
        assert_eq!(record.environment, Environment::Production);
        assert!(record.requires(Standard::Pci));
        assert_eq!(record.user_count, 150_000);
    }

    #[test]
    fn parse_rejects_unknown_environment() {
        let json = br#"[{"id": "a", "name": "x", "owner": "y", "environment": "mars"}]"#;
        assert!(matches!(
            parse_catalog(json),
            Err(GovernanceError::InvalidRecord(_))
        ));
    }

    #[test]
    fn sample_catalog_is_valid() {
        assert!(validate_catalog(&sample_catalog()).is_ok());
        assert_eq!(sample_catalog().len(), 5);
    }
}
