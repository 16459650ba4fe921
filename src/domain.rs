//! Core data model: Run, IPSConfig/Factor, OptionContract, Candidate,
//! ReasoningDecision, HistoricalAnalysis, JobProgress.
//!
//! A Run exclusively owns its Candidates, ReasoningDecisions and raw chain
//! snapshots; they are never shared across runs. IPSConfig is immutable for
//! the duration of one run.

use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Backtest,
    Paper,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// Monotonic transition check.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunError {
    pub kind: String,
    pub message: String,
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Run {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub initial_symbols: Vec<String>,
    pub ips_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    pub errors: Vec<RunError>,
    /// Set together with `error_message` when `status` becomes `Failed`.
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl Run {
    pub fn new(run_id: Uuid, initial_symbols: Vec<String>, mode: RunMode, ips_id: String, user_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            mode,
            initial_symbols,
            ips_id,
            user_id,
            started_at,
            status: RunStatus::Pending,
            errors: Vec::new(),
            error_kind: None,
            error_message: None,
        }
    }

    /// Transition status, enforcing the monotonic state machine. Returns the
    /// prior status on success so callers can log the edge.
    pub fn transition(&mut self, next: RunStatus) -> Result<RunStatus, crate::error::AgentError> {
        if !self.status.can_transition_to(next) {
            return Err(crate::error::AgentError::InternalInvariantViolation(format!(
                "illegal run status transition {:?} -> {:?}",
                self.status, next
            )));
        }
        let prior = self.status;
        self.status = next;
        Ok(prior)
    }

    /// Marks the run `Failed`, recording `error_kind`/`error_message`
    /// together with the transition so neither can diverge from the other.
    pub fn fail(&mut self, err: &crate::error::AgentError) -> Result<RunStatus, crate::error::AgentError> {
        self.error_kind = Some(err.kind().to_string());
        self.error_message = Some(err.to_string());
        self.transition(RunStatus::Failed)
    }
}

// --- IPS model -------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FactorScope {
    General,
    Chain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,
    Between,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Factor {
    pub key: String,
    pub display_name: String,
    pub scope: FactorScope,
    /// Post-normalization weight; Σ over an IPS's enabled factors = 1.
    pub weight: f64,
    pub direction: Direction,
    pub threshold: f64,
    pub threshold_max: Option<f64>,
    pub enabled: bool,
}

impl Factor {
    /// Invariant: `direction=between` requires both thresholds, ordered.
    pub fn validate_shape(&self) -> Result<(), crate::error::AgentError> {
        if self.direction == Direction::Between {
            match self.threshold_max {
                Some(max) if max >= self.threshold => Ok(()),
                Some(_) => Err(crate::error::AgentError::IpsSchemaError(format!(
                    "factor {}: threshold_max must be >= threshold for `between`",
                    self.key
                ))),
                None => Err(crate::error::AgentError::IpsSchemaError(format!(
                    "factor {}: `between` requires threshold_max",
                    self.key
                ))),
            }
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IpsConfig {
    pub id: String,
    pub name: String,
    pub factors: Vec<Factor>,
}

// --- Options chain ----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContractType {
    P,
    C,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OptionContract {
    pub symbol: String,
    pub expiry: NaiveDate,
    pub strike: f64,
    #[serde(rename = "type")]
    pub contract_type: ContractType,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub iv: Option<f64>,
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub oi: Option<u64>,
    pub volume: Option<u64>,
    pub asof: DateTime<Utc>,
}

impl OptionContract {
    pub fn mid(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(b), Some(a)) => Some((b + a) / 2.0),
            _ => None,
        }
    }

    /// Invariant: bid ≤ ask when both present.
    pub fn has_valid_quote(&self) -> bool {
        match (self.bid, self.ask) {
            (Some(b), Some(a)) => b <= a,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CandidateLeg {
    pub contract: OptionContract,
    /// true for the leg sold short (e.g. the short put in a put credit spread).
    pub short: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    PutCreditSpread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    None,
    Speculative,
    Quality,
    Elite,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FactorResult {
    pub key: String,
    pub display_name: String,
    pub value: Option<f64>,
    pub target: String,
    pub passed: bool,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HistoricalAnalysis {
    pub has_data: bool,
    pub trade_count: usize,
    pub win_rate: f64,
    pub avg_roi: f64,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Med,
    High,
}

impl HistoricalAnalysis {
    pub fn no_data() -> Self {
        Self { has_data: false, trade_count: 0, win_rate: 0.0, avg_roi: 0.0, confidence: Confidence::Low }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Rationale {
    pub rationale: String,
    pub news_summary: Option<String>,
    pub macro_context: Option<String>,
    pub out_of_ips_justification: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Candidate {
    pub id: Uuid,
    pub symbol: String,
    pub strategy: Strategy,
    /// GICS-style sector label for diversification caps; required to
    /// evaluate "at most 3 per sector" — sourced from the underlying's
    /// company overview at S1.
    pub sector: Option<String>,
    pub legs: Vec<CandidateLeg>,
    pub entry_mid: f64,
    pub max_profit: f64,
    pub max_loss: f64,
    pub breakeven: f64,
    pub est_pop: f64,

    // Attached by downstream stages:
    pub factor_results: Vec<FactorResult>,
    pub yield_score: Option<f64>,
    pub ips_score: Option<f64>,
    pub tier: Tier,
    pub historical: Option<HistoricalAnalysis>,
    pub composite_score: Option<f64>,
    pub diversity_score: Option<f64>,
    pub rationale: Option<Rationale>,
}

impl Candidate {
    /// Invariant: `max_profit + max_loss == width` (short - long strike), to cent.
    pub fn width(&self) -> f64 {
        self.max_profit + self.max_loss
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Proceed,
    ProceedWithCaution,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Checkpoint {
    C1,
    C2,
    C3,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ThresholdAdjustment {
    pub factor: String,
    pub old_threshold: f64,
    pub new_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReasoningDecision {
    pub checkpoint: Checkpoint,
    pub decision: Decision,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
    pub threshold_adjustments: Vec<ThresholdAdjustment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobProgress {
    pub current_step: String,
    pub completed_steps: u32,
    pub total_steps: u32,
    pub symbols_processed: u32,
    pub total_symbols: u32,
    pub candidates_found: u32,
    pub message: String,
}

impl JobProgress {
    pub fn init(total_symbols: u32) -> Self {
        Self {
            current_step: "init".into(),
            completed_steps: 0,
            total_steps: 8,
            symbols_processed: 0,
            total_symbols,
            candidates_found: 0,
            message: "run created".into(),
        }
    }

    /// Advances to the next named step; `completed_steps` is monotonic.
    pub fn advance(&mut self, step: &str, message: impl Into<String>) {
        self.current_step = step.to_string();
        self.completed_steps = (self.completed_steps + 1).min(self.total_steps);
        self.message = message.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_transitions_are_monotonic() {
        let mut run = Run::new(Uuid::nil(), vec![], RunMode::Backtest, "ips1".into(), "u1".into(), Utc::now());
        assert!(run.transition(RunStatus::Running).is_ok());
        assert!(run.transition(RunStatus::Completed).is_ok());
        // Completed is terminal: no transition out.
        assert!(run.transition(RunStatus::Running).is_err());
    }

    #[test]
    fn run_status_cannot_skip_running() {
        let mut run = Run::new(Uuid::nil(), vec![], RunMode::Backtest, "ips1".into(), "u1".into(), Utc::now());
        assert!(run.transition(RunStatus::Completed).is_err());
    }

    #[test]
    fn factor_between_requires_ordered_thresholds() {
        let mut f = Factor {
            key: "k".into(),
            display_name: "K".into(),
            scope: FactorScope::Chain,
            weight: 0.5,
            direction: Direction::Between,
            threshold: 10.0,
            threshold_max: Some(5.0),
            enabled: true,
        };
        assert!(f.validate_shape().is_err());
        f.threshold_max = Some(20.0);
        assert!(f.validate_shape().is_ok());
    }

    #[test]
    fn option_contract_mid_requires_both_sides() {
        let mut c = sample_contract();
        c.bid = Some(1.0);
        c.ask = None;
        assert_eq!(c.mid(), None);
        c.ask = Some(2.0);
        assert_eq!(c.mid(), Some(1.5));
    }

    #[test]
    fn option_contract_valid_quote_rejects_crossed_book() {
        let mut c = sample_contract();
        c.bid = Some(2.0);
        c.ask = Some(1.0);
        assert!(!c.has_valid_quote());
    }

    #[test]
    fn historical_analysis_no_data_defaults() {
        let h = HistoricalAnalysis::no_data();
        assert!(!h.has_data);
        assert_eq!(h.win_rate, 0.0);
        assert_eq!(h.avg_roi, 0.0);
        assert_eq!(h.confidence, Confidence::Low);
    }

    #[test]
    fn job_progress_completed_steps_never_exceeds_total() {
        let mut p = JobProgress::init(3);
        for _ in 0..12 {
            p.advance("step", "msg");
        }
        assert_eq!(p.completed_steps, p.total_steps);
    }

    fn sample_contract() -> OptionContract {
        OptionContract {
            symbol: "AAA".into(),
            expiry: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            strike: 100.0,
            contract_type: ContractType::P,
            bid: None,
            ask: None,
            last: None,
            iv: None,
            delta: None,
            gamma: None,
            theta: None,
            vega: None,
            oi: None,
            volume: None,
            asof: Utc::now(),
        }
    }
}
