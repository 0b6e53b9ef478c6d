//! # redb-backed Record Store
//!
//! A disk-backed catalog using the redb embedded database.
//!
//! Records are serialized with postcard and keyed by an insertion sequence
//! number, so `get_all` returns them in catalog order. A second table maps
//! record ids to sequence numbers for duplicate detection.
//!
//! The store is written only through [`RedbRecordStore::import`]. Pipeline
//! runs hold a shared reference and only read.

use crate::store::{RecordStore, name_matches, validate_catalog};
use crate::{ApplicationRecord, GovernanceError};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;

/// Table for records: sequence(u64) -> serialized ApplicationRecord bytes
const RECORDS: TableDefinition<u64, &[u8]> = TableDefinition::new("records");

/// Table for the id index: RecordId -> sequence(u64)
const RECORD_IDS: TableDefinition<&str, u64> = TableDefinition::new("record_ids");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

fn storage_err(e: impl std::fmt::Display) -> GovernanceError {
    GovernanceError::Storage(e.to_string())
}

/// A disk-backed record store using redb.
pub struct RedbRecordStore {
    db: Database,
}

impl std::fmt::Debug for RedbRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbRecordStore").finish_non_exhaustive()
    }
}

impl RedbRecordStore {
    /// Open or create a catalog database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GovernanceError> {
        let db = Database::create(path.as_ref()).map_err(storage_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(storage_err)?;
            let _ = write_txn.open_table(RECORDS).map_err(storage_err)?;
            let _ = write_txn.open_table(RECORD_IDS).map_err(storage_err)?;
            let _ = write_txn.open_table(METADATA).map_err(storage_err)?;
            write_txn.commit().map_err(storage_err)?;
        }

        tracing::debug!(path = %path.as_ref().display(), "record store opened");
        Ok(Self { db })
    }

    /// Append a batch of records in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `GovernanceError::InvalidRecord` if any record is invalid, the
    /// batch repeats an id, or an id is already stored. All records are
    /// validated before the transaction opens; a rejected batch writes nothing.
    pub fn import(&self, records: &[ApplicationRecord]) -> Result<usize, GovernanceError> {
        if records.is_empty() {
            return Ok(0);
        }
        validate_catalog(records)?;

        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut records_table = write_txn.open_table(RECORDS).map_err(storage_err)?;
            let mut ids_table = write_txn.open_table(RECORD_IDS).map_err(storage_err)?;
            let mut meta_table = write_txn.open_table(METADATA).map_err(storage_err)?;

            let mut next_seq = meta_table
                .get("next_seq")
                .map_err(storage_err)?
                .map(|v| v.value())
                .unwrap_or(0);

            for record in records {
                if ids_table
                    .get(record.id.as_str())
                    .map_err(storage_err)?
                    .is_some()
                {
                    // Dropping the transaction without commit discards the batch.
                    return Err(GovernanceError::InvalidRecord(format!(
                        "record id '{}' already exists",
                        record.id
                    )));
                }

                let bytes = postcard::to_allocvec(record)
                    .map_err(|e| GovernanceError::Serialization(e.to_string()))?;
                records_table
                    .insert(next_seq, bytes.as_slice())
                    .map_err(storage_err)?;
                ids_table
                    .insert(record.id.as_str(), next_seq)
                    .map_err(storage_err)?;
                next_seq = next_seq.saturating_add(1);
            }

            meta_table
                .insert("next_seq", next_seq)
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;

        tracing::info!(count = records.len(), "records imported");
        Ok(records.len())
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<usize, GovernanceError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(RECORDS).map_err(storage_err)?;
        Ok(table.len().map_err(storage_err)? as usize)
    }

    pub fn is_empty(&self) -> Result<bool, GovernanceError> {
        Ok(self.len()? == 0)
    }
}

impl RecordStore for RedbRecordStore {
    fn get_all(&self) -> Result<Vec<ApplicationRecord>, GovernanceError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(RECORDS).map_err(storage_err)?;

        let mut records = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (_, value) = entry.map_err(storage_err)?;
            let record: ApplicationRecord = postcard::from_bytes(value.value())
                .map_err(|e| GovernanceError::Serialization(e.to_string()))?;
            records.push(record);
        }
        Ok(records)
    }

    fn find(&self, name_filter: Option<&str>) -> Result<Vec<ApplicationRecord>, GovernanceError> {
        let mut records = self.get_all()?;
        if let Some(filter) = name_filter {
            records.retain(|record| name_matches(&record.name, filter));
        }
        Ok(records)
    }
}
