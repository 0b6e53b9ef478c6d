//! # Reasoning Stage Adapter
//!
//! Wraps one reasoning call with schema validation, bounded retry, a per-call
//! deadline and output extraction.
//!
//! ## Attempt loop
//!
//! ```text
//! attempt 1 ─▶ invoke ─▶ parse ─▶ locate ─▶ schema check ─▶ extract ─▶ decode ─▶ stage check ─▶ Ok
//!                │          │                    │                       │            │
//!                └──────────┴──── rejected ──────┴───────────────────────┴────────────┘
//!                                    │
//!                    attempt 2 (with corrective instruction) ... up to 1 + retry_bound
//! ```
//!
//! A timeout counts as one failed attempt. Once attempts are exhausted the
//! call fails with `Timeout` if the last attempt timed out, otherwise with
//! `SchemaValidation` carrying the last raw response.
//!
//! An extraction failure after the schema check passed is a contract defect
//! and is surfaced immediately without retry.
//!
//! The adapter keeps no state between calls.

use crate::extract::{OutputExtractor, locate, parse_document};
use crate::reasoner::{Reasoner, ReasonerError, ReasoningRequest};
use crate::schema::OutputSchema;
use crate::stages::{StageError, StageId};
use crate::GovernanceError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Retries after the first attempt unless configured otherwise.
pub const DEFAULT_RETRY_BOUND: u32 = 1;

/// Per-call deadline unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on configured retries.
pub const MAX_RETRY_BOUND: u32 = 10;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Retry and timeout policy, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Additional attempts after the first.
    pub retry_bound: u32,
    /// Budget for each individual attempt.
    pub timeout: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            retry_bound: DEFAULT_RETRY_BOUND,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl AdapterConfig {
    #[must_use]
    pub fn new(retry_bound: u32, timeout: Duration) -> Self {
        Self {
            retry_bound: retry_bound.min(MAX_RETRY_BOUND),
            timeout,
        }
    }

    /// Total attempts per call.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.retry_bound.min(MAX_RETRY_BOUND).saturating_add(1)
    }
}

// =============================================================================
// ATTEMPT RECORDS
// =============================================================================

/// What happened to one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Accepted,
    Rejected { reason: String },
    TimedOut,
    Failed { message: String },
}

/// Audit entry for one reasoning attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based.
    pub attempt: u32,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
    /// Raw reasoner text, when any arrived.
    pub raw: Option<String>,
}

/// Stage output type produced by a reasoning call.
pub trait WireOutput: DeserializeOwned {
    fn schema() -> &'static OutputSchema;
}

/// An accepted reasoning result.
#[derive(Debug, Clone)]
pub struct Reasoned<T> {
    pub output: T,
    /// Canonical document the output was decoded from.
    pub document: Value,
    pub raw: String,
    pub attempts: Vec<AttemptRecord>,
}

enum Rejection {
    Invalid(String),
    Defect(GovernanceError),
}

// =============================================================================
// ADAPTER
// =============================================================================

/// Calls the reasoner on behalf of a stage.
#[derive(Clone)]
pub struct ReasoningAdapter {
    reasoner: Arc<dyn Reasoner>,
    config: AdapterConfig,
}

impl std::fmt::Debug for ReasoningAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReasoningAdapter")
            .field("reasoner", &self.reasoner.name())
            .field("config", &self.config)
            .finish()
    }
}

impl ReasoningAdapter {
    #[must_use]
    pub fn new(reasoner: Arc<dyn Reasoner>, config: AdapterConfig) -> Self {
        Self { reasoner, config }
    }

    #[must_use]
    pub fn config(&self) -> AdapterConfig {
        self.config
    }

    /// Run one reasoning call for `stage`.
    ///
    /// `check` applies the stage's own rules to a decoded output (referential
    /// integrity, imperative phrasing, ...). A failing check is a rejected
    /// attempt, retried like a schema failure.
    pub fn call<T, P, F>(&self, stage: StageId, payload: &P, check: F) -> Result<Reasoned<T>, StageError>
    where
        T: WireOutput,
        P: Serialize + ?Sized,
        F: Fn(&T) -> Result<(), String>,
    {
        let schema = T::schema();
        let payload = serde_json::to_value(payload)
            .map_err(|e| GovernanceError::Serialization(format!("{} payload: {e}", stage.as_str())))?;
        let described = schema.describe();
        let max_attempts = self.config.max_attempts();

        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut correction: Option<String> = None;
        let mut last_message = String::new();
        let mut last_raw: Option<String> = None;
        let mut last_timed_out = false;

        for attempt in 1..=max_attempts {
            let request = ReasoningRequest {
                stage,
                payload: payload.clone(),
                schema: described.clone(),
                instructions: stage.instructions().to_string(),
                attempt,
                correction: correction.take(),
                timeout: self.config.timeout,
            };

            tracing::debug!(
                stage = stage.as_str(),
                attempt,
                reasoner = self.reasoner.name(),
                "invoking reasoner"
            );
            let started = Instant::now();
            // The reasoner enforces request.timeout; late answers are only detected here.
            let result = self.reasoner.invoke(&request);
            let late = started.elapsed() > self.config.timeout;

            let (outcome, raw) = match result {
                Err(ReasonerError::Timeout) => (AttemptOutcome::TimedOut, None),
                Ok(raw) if late => (AttemptOutcome::TimedOut, Some(raw)),
                Err(other) => (
                    AttemptOutcome::Failed {
                        message: other.to_string(),
                    },
                    None,
                ),
                Ok(raw) => match Self::accept::<T, F>(schema, &raw, &check) {
                    Ok((output, document)) => {
                        attempts.push(AttemptRecord {
                            attempt,
                            outcome: AttemptOutcome::Accepted,
                            raw: Some(raw.clone()),
                        });
                        tracing::debug!(stage = stage.as_str(), attempt, "reasoner output accepted");
                        return Ok(Reasoned {
                            output,
                            document,
                            raw,
                            attempts,
                        });
                    }
                    Err(Rejection::Defect(error)) => {
                        tracing::error!(
                            stage = stage.as_str(),
                            attempt,
                            error = %error,
                            "validated output failed extraction"
                        );
                        attempts.push(AttemptRecord {
                            attempt,
                            outcome: AttemptOutcome::Failed {
                                message: error.to_string(),
                            },
                            raw: Some(raw),
                        });
                        return Err(StageError::new(error, attempts));
                    }
                    Err(Rejection::Invalid(reason)) => {
                        (AttemptOutcome::Rejected { reason }, Some(raw))
                    }
                },
            };

            last_timed_out = matches!(outcome, AttemptOutcome::TimedOut);
            last_message = match &outcome {
                AttemptOutcome::Rejected { reason } => reason.clone(),
                AttemptOutcome::Failed { message } => message.clone(),
                AttemptOutcome::TimedOut => format!(
                    "no response within {} ms",
                    self.config.timeout.as_millis()
                ),
                AttemptOutcome::Accepted => String::new(),
            };
            last_raw.clone_from(&raw);
            tracing::warn!(
                stage = stage.as_str(),
                attempt,
                max_attempts,
                reason = %last_message,
                "reasoner attempt failed"
            );

            correction = Some(corrective_instruction(&outcome));
            attempts.push(AttemptRecord {
                attempt,
                outcome,
                raw,
            });
        }

        let error = if last_timed_out {
            GovernanceError::Timeout {
                attempts: max_attempts,
            }
        } else {
            GovernanceError::SchemaValidation {
                message: last_message,
                attempts: max_attempts,
                raw: last_raw,
            }
        };
        Err(StageError::new(error, attempts))
    }

    fn accept<T, F>(schema: &OutputSchema, raw: &str, check: &F) -> Result<(T, Value), Rejection>
    where
        T: WireOutput,
        F: Fn(&T) -> Result<(), String>,
    {
        let document = parse_document(raw).map_err(Rejection::Invalid)?;
        let located = locate(schema, &document);
        schema.validate(&located).map_err(Rejection::Invalid)?;

        let canonical = OutputExtractor::canonical(schema, &located).map_err(Rejection::Defect)?;
        let output: T = serde_json::from_value(canonical.clone())
            .map_err(|e| Rejection::Invalid(format!("output does not decode: {e}")))?;
        check(&output).map_err(Rejection::Invalid)?;
        Ok((output, canonical))
    }
}

fn corrective_instruction(outcome: &AttemptOutcome) -> String {
    match outcome {
        AttemptOutcome::Rejected { reason } => format!(
            "Your previous answer was rejected: {reason}. Return only a JSON document that \
             satisfies the schema."
        ),
        AttemptOutcome::TimedOut => {
            "Your previous answer did not arrive in time. Answer concisely with only the JSON \
             document."
                .to_string()
        }
        AttemptOutcome::Failed { .. } | AttemptOutcome::Accepted => {
            "The previous attempt failed. Return only a JSON document that satisfies the schema."
                .to_string()
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::reasoner::{Scripted, ScriptedReasoner};
    use crate::schema::{Field, ScalarKind, Shape};
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Echo {
        word: String,
    }

    static ECHO: OutputSchema = OutputSchema {
        name: "echo",
        root: Shape::Object(&[Field::required("word", Shape::Scalar(ScalarKind::String))]),
    };

    impl WireOutput for Echo {
        fn schema() -> &'static OutputSchema {
            &ECHO
        }
    }

    const STAGE: StageId = StageId::Reporting;

    fn adapter(reasoner: &Arc<ScriptedReasoner>, retry_bound: u32) -> ReasoningAdapter {
        ReasoningAdapter::new(
            reasoner.clone(),
            AdapterConfig::new(retry_bound, Duration::from_millis(200)),
        )
    }

    fn no_check(_: &Echo) -> Result<(), String> {
        Ok(())
    }

    #[test]
    fn default_config() {
        let config = AdapterConfig::default();
        assert_eq!(config.retry_bound, 1);
        assert_eq!(config.max_attempts(), 2);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn accepts_noisy_valid_output() {
        let reasoner = Arc::new(ScriptedReasoner::new().with(
            STAGE,
            Scripted::Respond("Sure:\n```json\n{\"word\": \"hi\", \"trace\": [1]}\n```".into()),
        ));
        let result = adapter(&reasoner, 1).call(STAGE, &json!({}), no_check).unwrap();
        assert_eq!(result.output.word, "hi");
        assert_eq!(result.document, json!({"word": "hi"}));
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.attempts[0].outcome, AttemptOutcome::Accepted);
        assert_eq!(reasoner.calls(STAGE), 1);
    }

    #[test]
    fn retries_once_with_correction() {
        let reasoner = Arc::new(
            ScriptedReasoner::new()
                .with(STAGE, Scripted::Respond("{\"word\": 5}".into()))
                .with(STAGE, Scripted::Respond("{\"word\": \"ok\"}".into())),
        );
        let result = adapter(&reasoner, 1).call(STAGE, &json!({}), no_check).unwrap();
        assert_eq!(result.output.word, "ok");
        assert_eq!(result.attempts.len(), 2);
        assert!(matches!(result.attempts[0].outcome, AttemptOutcome::Rejected { .. }));

        let requests = reasoner.requests();
        assert_eq!(requests[0].correction, None);
        assert!(requests[1].correction.as_deref().unwrap().contains("$.word"));
        assert_eq!(requests[1].attempt, 2);
    }

    #[test]
    fn exhausted_retries_carry_raw_response() {
        let reasoner = Arc::new(
            ScriptedReasoner::new()
                .with(STAGE, Scripted::Respond("not json".into()))
                .with(STAGE, Scripted::Respond("{\"other\": 1}".into())),
        );
        let err = adapter(&reasoner, 1).call(STAGE, &json!({}), no_check).unwrap_err();
        match err.error {
            GovernanceError::SchemaValidation { attempts, raw, .. } => {
                assert_eq!(attempts, 2);
                assert_eq!(raw.as_deref(), Some("{\"other\": 1}"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.attempts.len(), 2);
        assert_eq!(reasoner.calls(STAGE), 2);
    }

    #[test]
    fn stage_check_rejection_is_retried() {
        let reasoner = Arc::new(
            ScriptedReasoner::new()
                .with(STAGE, Scripted::Respond("{\"word\": \"\"}".into()))
                .with(STAGE, Scripted::Respond("{\"word\": \"full\"}".into())),
        );
        let check = |e: &Echo| {
            if e.word.is_empty() {
                Err("word must not be empty".to_string())
            } else {
                Ok(())
            }
        };
        let result = adapter(&reasoner, 1).call(STAGE, &json!({}), check).unwrap();
        assert_eq!(result.output.word, "full");
    }

    #[test]
    fn timeouts_exhaust_to_timeout_error() {
        let reasoner = Arc::new(
            ScriptedReasoner::new()
                .with(STAGE, Scripted::Timeout)
                .with(STAGE, Scripted::Timeout),
        );
        let err = adapter(&reasoner, 1).call(STAGE, &json!({}), no_check).unwrap_err();
        assert_eq!(err.error, GovernanceError::Timeout { attempts: 2 });
        assert_eq!(reasoner.calls(STAGE), 2);
        assert!(err.attempts.iter().all(|a| a.outcome == AttemptOutcome::TimedOut));
    }

    #[test]
    fn late_response_counts_as_timeout() {
        let reasoner = Arc::new(ScriptedReasoner::new().with(
            STAGE,
            Scripted::Delayed(Duration::from_millis(300), "{\"word\": \"late\"}".into()),
        ));
        let err = adapter(&reasoner, 0).call(STAGE, &json!({}), no_check).unwrap_err();
        assert_eq!(err.error, GovernanceError::Timeout { attempts: 1 });
        assert_eq!(err.attempts[0].raw.as_deref(), Some("{\"word\": \"late\"}"));
    }

    #[test]
    fn timeout_then_rejection_is_schema_error() {
        let reasoner = Arc::new(
            ScriptedReasoner::new()
                .with(STAGE, Scripted::Timeout)
                .with(STAGE, Scripted::Respond("[]".into())),
        );
        let err = adapter(&reasoner, 1).call(STAGE, &json!({}), no_check).unwrap_err();
        assert_eq!(err.error.kind(), crate::ErrorKind::SchemaValidation);
    }

    #[test]
    fn zero_retry_bound_makes_one_attempt() {
        let reasoner = Arc::new(ScriptedReasoner::new().with(STAGE, Scripted::Fail("down".into())));
        let err = adapter(&reasoner, 0).call(STAGE, &json!({}), no_check).unwrap_err();
        assert_eq!(reasoner.calls(STAGE), 1);
        assert!(err.error.to_string().contains("down"));
    }

    #[test]
    fn retry_bound_is_capped() {
        assert_eq!(AdapterConfig::new(1_000, DEFAULT_TIMEOUT).max_attempts(), MAX_RETRY_BOUND + 1);
    }
}
