//! # Storage Module
//!
//! Persistent record store backends.
//!
//! - [`RedbRecordStore`]: catalog held in an embedded redb database

pub mod redb_store;

pub use redb_store::RedbRecordStore;
