//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::{api, config::AppConfig};
use archgov_core::{
    GovernanceError, LookupRequest, Orchestrator, PipelineState, RecordId, RedbRecordStore,
    RuleEngine, RunSummary, Severity, export_run, import_run, parse_catalog, run_checksum,
    run_crypto_hash, sample_catalog, verify_run,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum catalog file size for import (50 MB).
const MAX_CATALOG_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Maximum run archive size (16 MB).
const MAX_ARCHIVE_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), GovernanceError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| GovernanceError::Io(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(GovernanceError::Serialization(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Canonicalize an input path and make sure it names a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, GovernanceError> {
    let canonical = path.canonicalize().map_err(|e| {
        GovernanceError::Io(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(GovernanceError::Io(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path against its canonical parent directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, GovernanceError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        GovernanceError::Io(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(GovernanceError::Io(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| GovernanceError::Io("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

fn print_json(value: &impl serde::Serialize) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(
    config: &AppConfig,
    database: Option<&Path>,
    host: &str,
    port: u16,
) -> Result<(), GovernanceError> {
    let orchestrator = build_orchestrator(config, database)?;

    println!("archgov Governance Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:     {}", host);
    println!("  Port:     {}", port);
    println!("  Reasoner: {:?}", config.reasoner.kind);
    println!("  Retries:  {}", orchestrator.config().retry_bound);
    println!();
    println!("Endpoints:");
    println!("  GET  /health     - Health check");
    println!("  GET  /records    - List catalog records");
    println!("  GET  /compliance - Check the whole catalog");
    println!("  POST /runs       - Execute a governance run");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, orchestrator).await
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Execute one governance run.
///
/// A failed run prints its failure descriptor and returns the stage error,
/// so the process exits non-zero.
pub async fn cmd_run(
    config: &AppConfig,
    database: Option<&Path>,
    json_mode: bool,
    name: Option<String>,
    id: Option<String>,
    archive: Option<&Path>,
) -> Result<(), GovernanceError> {
    let request = LookupRequest {
        name_filter: name.filter(|n| !n.trim().is_empty()),
        record_id: id.filter(|i| !i.trim().is_empty()).map(RecordId::new),
    };
    if request.name_filter.is_none() && request.record_id.is_none() {
        return Err(GovernanceError::Precondition(
            "pass --name or --id".to_string(),
        ));
    }
    let archive_path = archive.map(validate_output_path).transpose()?;

    let orchestrator = build_orchestrator(config, database)?;
    let result = tokio::task::spawn_blocking(move || orchestrator.run(&request))
        .await
        .map_err(|e| GovernanceError::Io(format!("pipeline task failed: {e}")))?;

    let (state, summary, error) = match result {
        Ok(outcome) => {
            let summary = RunSummary::from_outcome(&outcome);
            (outcome.state, summary, None)
        }
        Err(failure) => {
            let summary = RunSummary::from_failure(&failure);
            (failure.state, summary, Some(failure.error))
        }
    };

    if let Some(path) = &archive_path {
        let data = export_run(&state)?;
        std::fs::write(path, &data)
            .map_err(|e| GovernanceError::Io(format!("Write archive: {}", e)))?;
        tracing::info!(path = %path.display(), bytes = data.len(), "run archive written");
    }

    if json_mode {
        print_json(&summary);
    } else {
        print_summary(&summary);
        println!("Checksum: {}", run_checksum(&state)?);
        if let Some(path) = &archive_path {
            println!("Archive:  {:?}", path);
        }
    }

    match error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn print_summary(summary: &RunSummary) {
    println!("Governance Run");
    println!("==============");
    println!("Status: {}", summary.status);

    if let Some(record) = &summary.record {
        println!(
            "Record: {} {} ({}, {} users)",
            record.id, record.name, record.environment, record.user_count
        );
    }

    if !summary.violations.is_empty() {
        println!();
        println!("Violations:");
        for v in &summary.violations {
            println!("  [{}] {}: {}", v.id.0, v.standard, v.reason);
        }
    }

    if !summary.actions.is_empty() {
        println!();
        println!("Actions (by priority):");
        for a in &summary.actions {
            println!("  {}. [{}] {}", a.priority, a.severity, a.step);
        }
    }

    if let Some(report) = &summary.report {
        println!();
        println!("Report {} (compliant: {})", report.id, report.compliant);
        println!("  {}", report.summary);
    }

    if let Some(evaluation) = &summary.evaluation {
        println!();
        println!("Score: {:.2}", evaluation.score);
        println!("  {}", evaluation.feedback);
    }

    if let Some(failure) = &summary.failure {
        println!();
        println!(
            "Failed at stage {} ({}): {}",
            failure.stage_index,
            failure.stage.as_str(),
            failure.message
        );
        println!("  Kind: {}", failure.kind.as_str());
        if let Some(raw) = &failure.raw_response {
            println!("  Last response: {}", raw);
        }
    }

    println!();
    for a in &summary.attempts {
        println!("  {:<16} {} attempt(s)", a.stage.as_str(), a.attempts);
    }
}

// =============================================================================
// LIST COMMAND
// =============================================================================

/// List catalog records.
pub fn cmd_list(
    config: &AppConfig,
    database: Option<&Path>,
    json_mode: bool,
    filter: Option<&str>,
) -> Result<(), GovernanceError> {
    let store = config.open_store(database)?;
    let records = store.find(filter)?;

    if json_mode {
        print_json(&records);
        return Ok(());
    }

    println!("Catalog ({} records)", records.len());
    println!("=======");
    for r in &records {
        println!(
            "  {:<10} {:<28} {:<12} {}",
            r.id.as_str(),
            r.name,
            r.environment.as_str(),
            r.owner
        );
    }
    Ok(())
}

// =============================================================================
// CHECK COMMAND
// =============================================================================

/// Rule check over the whole catalog.
pub fn cmd_check(
    config: &AppConfig,
    database: Option<&Path>,
    json_mode: bool,
) -> Result<(), GovernanceError> {
    let store = config.open_store(database)?;
    let records = store.get_all()?;
    let check = RuleEngine::check_catalog(&records)?;

    if json_mode {
        print_json(&check);
        return Ok(());
    }

    println!(
        "Compliance: {}/{} records compliant",
        check.compliant_count(),
        check.results.len()
    );
    for result in &check.results {
        let mark = if result.compliant { "ok" } else { "FAIL" };
        println!("  {:<4} {}{}", mark, result.record_id, severity_breakdown(&result.severities));
        for v in &result.violations {
            println!("       {}: {}", v.standard, v.reason);
        }
    }

    println!();
    println!("  {:<8} {:>8} {:>8}", "Standard", "Required", "Violated");
    for (standard, tally) in &check.by_standard {
        println!("  {:<8} {:>8} {:>8}", standard, tally.required, tally.violated);
    }
    if !check.by_severity.is_empty() {
        println!("Violations by severity:{}", severity_breakdown(&check.by_severity));
    }
    Ok(())
}

/// " Critical=1 High=2", most severe first; empty when there is nothing to show.
fn severity_breakdown(counts: &BTreeMap<Severity, u32>) -> String {
    counts
        .iter()
        .rev()
        .map(|(severity, n)| format!(" {}={}", severity, n))
        .collect()
}

// =============================================================================
// IMPORT COMMAND
// =============================================================================

/// Import a JSON catalog into the redb store.
pub fn cmd_import(
    config: &AppConfig,
    database: Option<&Path>,
    file: &Path,
) -> Result<(), GovernanceError> {
    let validated_path = validate_file_path(file)?;
    validate_file_size(&validated_path, MAX_CATALOG_FILE_SIZE)?;

    let data = std::fs::read(&validated_path)
        .map_err(|e| GovernanceError::Io(format!("Read file: {}", e)))?;
    let records = parse_catalog(&data)?;

    let db_path = redb_path(config, database);
    let store = RedbRecordStore::open(&db_path)?;
    let imported = store.import(&records)?;

    println!(
        "Imported {} records into {:?} ({} total)",
        imported,
        db_path,
        store.len()?
    );
    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize a new redb store.
pub fn cmd_init(
    config: &AppConfig,
    database: Option<&Path>,
    force: bool,
    sample: bool,
) -> Result<(), GovernanceError> {
    let db_path = redb_path(config, database);
    if db_path.exists() {
        if !force {
            return Err(GovernanceError::Precondition(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(&db_path)
            .map_err(|e| GovernanceError::Io(format!("Remove database: {}", e)))?;
    }

    let store = RedbRecordStore::open(&db_path)?;
    if sample {
        let imported = store.import(&sample_catalog())?;
        println!(
            "Initialized new redb database at {:?} with {} sample records",
            db_path, imported
        );
    } else {
        println!("Initialized new redb database at {:?}", db_path);
    }
    Ok(())
}

// =============================================================================
// VERIFY COMMAND
// =============================================================================

/// Check a run archive and print its digests.
pub fn cmd_verify(archive: &Path, json_mode: bool) -> Result<(), GovernanceError> {
    let validated_path = validate_file_path(archive)?;
    validate_file_size(&validated_path, MAX_ARCHIVE_FILE_SIZE)?;

    let data = std::fs::read(&validated_path)
        .map_err(|e| GovernanceError::Io(format!("Read file: {}", e)))?;
    let state = import_run(&data)?;
    if !verify_run(&state, &data)? {
        return Err(GovernanceError::Serialization(
            "Archive does not reproduce its own run".to_string(),
        ));
    }
    let checksum = run_checksum(&state)?;
    let hash = run_crypto_hash(&state)?;

    if json_mode {
        print_json(&serde_json::json!({
            "status": state.status(),
            "completed_stages": state.completed_stages(),
            "record": state.record().map(|r| r.id.as_str()),
            "checksum": checksum,
            "blake3": hash,
        }));
        return Ok(());
    }

    print_archive(&state);
    println!("Checksum: {}", checksum);
    println!("BLAKE3:   {}", hash);
    Ok(())
}

fn print_archive(state: &PipelineState) {
    println!("Run Archive");
    println!("===========");
    println!("Status:           {}", state.status());
    println!("Completed stages: {}", state.completed_stages());
    if let Some(record) = state.record() {
        println!("Record:           {} {}", record.id, record.name);
    }
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Build an orchestrator from the config. Must run inside the tokio runtime
/// when the HTTP reasoner is configured.
pub fn build_orchestrator(
    config: &AppConfig,
    database: Option<&Path>,
) -> Result<Orchestrator, GovernanceError> {
    let store = config.open_store(database)?;
    let reasoner = config.build_reasoner()?;
    tracing::info!(reasoner = reasoner.name(), "orchestrator ready");
    Ok(Orchestrator::new(store, reasoner, config.adapter_config()))
}

fn redb_path(config: &AppConfig, database: Option<&Path>) -> PathBuf {
    database.map_or_else(|| config.store.path.clone(), Path::to_path_buf)
}

// =============================================================================
// TESTS
// =============================================================================
