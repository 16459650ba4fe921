//! The Agent's error taxonomy (kinds, not wire formats).
//!
//! Each stage collects its own `AgentError`s into the Run's error list
//! rather than bailing the whole run, except for the fatal variants noted
//! on each arm below. `main.rs` and the tool-router handlers flatten this
//! into `anyhow`/`String` at the edge, mapping internal errors to
//! `Result<Json<_>, String>`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum AgentError {
    /// Network/5xx/throttled after retries. Fail-open at S1, candidate-skipping at S2.
    #[error("provider unavailable for {symbol}: {message}")]
    ProviderUnavailable { symbol: String, message: String },

    /// Provider reports the symbol does not exist.
    #[error("unknown symbol: {0}")]
    SymbolUnknown(String),

    /// Unknown factor key or invalid weight configuration. Fatal; run fails before S1.
    #[error("IPS schema error: {0}")]
    IpsSchemaError(String),

    /// Per-run provider call budget exhausted. Not surfaced unless a timeout also hits.
    #[error("provider call budget exhausted ({used}/{limit})")]
    BudgetExhausted { used: u32, limit: u32 },

    /// LLM response could not be reduced to the required JSON shape.
    #[error("reasoning response was not valid JSON: {0}")]
    ReasoningUnparseable(String),

    /// Deadline or explicit cancellation. Fatal to the run.
    #[error("run cancelled")]
    Cancelled,

    /// An invariant that should be structurally impossible slipped through. Fatal, logged.
    #[error("internal invariant violated: {0}")]
    InternalInvariantViolation(String),
}

impl AgentError {
    /// Stable kind tag, used for `Run.status` / `error_kind` and for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::ProviderUnavailable { .. } => "ProviderUnavailable",
            AgentError::SymbolUnknown(_) => "SymbolUnknown",
            AgentError::IpsSchemaError(_) => "IPSSchemaError",
            AgentError::BudgetExhausted { .. } => "BudgetExhausted",
            AgentError::ReasoningUnparseable(_) => "ReasoningUnparseable",
            AgentError::Cancelled => "Cancelled",
            AgentError::InternalInvariantViolation(_) => "InternalInvariantViolation",
        }
    }

    /// Whether this error is fatal to the whole run (vs. recorded and survived).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::IpsSchemaError(_)
                | AgentError::Cancelled
                | AgentError::InternalInvariantViolation(_)
        )
    }
}
