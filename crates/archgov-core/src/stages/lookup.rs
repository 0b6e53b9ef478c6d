//! Stage 0: resolve the target application in the record store.

use crate::store::RecordStore;
use crate::{ApplicationRecord, GovernanceError, RecordId};
use serde::{Deserialize, Serialize};

/// What the caller asked to govern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRequest {
    /// Case-insensitive name fragment.
    #[serde(default)]
    pub name_filter: Option<String>,
    /// Picks one record when the filter matches several (or selects directly
    /// when no filter is given).
    #[serde(default)]
    pub record_id: Option<RecordId>,
}

impl LookupRequest {
    #[must_use]
    pub fn by_name(filter: impl Into<String>) -> Self {
        Self {
            name_filter: Some(filter.into()),
            record_id: None,
        }
    }

    #[must_use]
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            name_filter: None,
            record_id: Some(RecordId::new(id)),
        }
    }

    /// Narrow an existing name lookup to one candidate.
    #[must_use]
    pub fn with_record_id(mut self, id: impl Into<String>) -> Self {
        self.record_id = Some(RecordId::new(id));
        self
    }

    fn describe(&self) -> String {
        match (&self.name_filter, &self.record_id) {
            (Some(filter), Some(id)) => format!("{filter} (id {id})"),
            (Some(filter), None) => filter.clone(),
            (None, Some(id)) => format!("id {id}"),
            (None, None) => String::new(),
        }
    }
}

/// Resolve exactly one record.
///
/// - zero matches: `NotFound`
/// - several matches: `AmbiguousLookup` listing the candidates, unless
///   `record_id` names one of them
/// - a `record_id` outside the matches: `NotFound`
pub fn run(
    store: &dyn RecordStore,
    request: &LookupRequest,
) -> Result<ApplicationRecord, GovernanceError> {
    let not_found = || GovernanceError::NotFound {
        filter: request.describe(),
    };

    let candidates = store
        .find_required(request.name_filter.as_deref())
        .map_err(|e| match e {
            GovernanceError::NotFound { .. } => not_found(),
            other => other,
        })?;

    if let Some(id) = &request.record_id {
        return candidates
            .into_iter()
            .find(|record| &record.id == id)
            .ok_or_else(not_found);
    }

    match <[ApplicationRecord; 1]>::try_from(candidates) {
        Ok([record]) => Ok(record),
        Err(candidates) => Err(GovernanceError::AmbiguousLookup {
            filter: request.describe(),
            candidates: candidates.into_iter().map(|record| record.id).collect(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;

    #[test]
    fn unique_match() {
        let store = MemoryRecordStore::sample();
        let record = run(&store, &LookupRequest::by_name("hr portal")).unwrap();
        assert_eq!(record.name, "Internal HR Portal");
    }

    #[test]
    fn no_match_is_not_found() {
        let store = MemoryRecordStore::sample();
        let err = run(&store, &LookupRequest::by_name("Mainframe")).unwrap_err();
        assert_eq!(
            err,
            GovernanceError::NotFound {
                filter: "Mainframe".to_string()
            }
        );
    }

    #[test]
    fn several_matches_are_ambiguous() {
        let store = MemoryRecordStore::sample();
        let err = run(&store, &LookupRequest::by_name("e")).unwrap_err();
        match err {
            GovernanceError::AmbiguousLookup { filter, candidates } => {
                assert_eq!(filter, "e");
                let ids: Vec<&str> = candidates.iter().map(RecordId::as_str).collect();
                assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn record_id_disambiguates() {
        let store = MemoryRecordStore::sample();
        let request = LookupRequest::by_name("e").with_record_id("4");
        assert_eq!(run(&store, &request).unwrap().name, "Internal HR Portal");

        let request = LookupRequest::by_name("Payments").with_record_id("5");
        assert!(matches!(
            run(&store, &request),
            Err(GovernanceError::NotFound { .. })
        ));
    }

    #[test]
    fn id_only_lookup() {
        let store = MemoryRecordStore::sample();
        assert_eq!(
            run(&store, &LookupRequest::by_id("3")).unwrap().name,
            "PCI Feature Dev"
        );
    }

    #[test]
    fn empty_catalog_reports_the_whole_request() {
        let store = MemoryRecordStore::new(Vec::new()).unwrap();
        let err = run(&store, &LookupRequest::by_id("3")).unwrap_err();
        assert_eq!(
            err,
            GovernanceError::NotFound {
                filter: "id 3".to_string()
            }
        );
    }

    #[test]
    fn empty_request_over_catalog_is_ambiguous() {
        let store = MemoryRecordStore::sample();
        let err = run(&store, &LookupRequest::default()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::AmbiguousLookup);
    }
}
