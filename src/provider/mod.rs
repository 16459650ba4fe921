//! Provider Gateway: the single funnel for all outbound I/O.
//!
//! `Provider` is the trait every concrete data source implements; `gateway`
//! wraps any `Provider` with the rate-limiting/retry/budget/tool-log policy
//! so stage code never talks to a concrete provider directly, giving the
//! whole crate a single policy chokepoint instead of scattering it across
//! call sites.

pub mod gateway;
pub mod stub;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::OptionContract;
use crate::error::AgentError;
use uuid::Uuid;

/// Deadline + cancellation propagated into every gateway call.
#[derive(Clone)]
pub struct CallContext {
    pub cancellation: CancellationToken,
    pub deadline: Option<Instant>,
    /// Tags every tool-log entry this call produces with its owning run, so
    /// the run-scoped log (`RunRepository::log_tool`) can be reconstructed
    /// from the gateway's process-wide log after the fact.
    pub run_id: Option<Uuid>,
}

impl CallContext {
    pub fn new(cancellation: CancellationToken) -> Self {
        Self { cancellation, deadline: None, run_id: None }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub volume: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsChainResponse {
    pub asof: DateTime<Utc>,
    pub contracts: Vec<OptionContract>,
}

/// Stringly-typed fundamentals mirror of the source payload; missing
/// fields are absent, never defaulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OverviewValue {
    Text(String),
    Number(f64),
}

pub type CompanyOverview = HashMap<String, OverviewValue>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SmaResult {
    pub value: f64,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NewsSentiment {
    pub average_score: f64,
    pub count: u32,
    pub pos: u32,
    pub neg: u32,
    pub neu: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub snippet: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MacroPoint {
    pub value: f64,
    pub asof: NaiveDate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IvPoint {
    pub date: NaiveDate,
    pub iv_atm_30d: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorFilter {
    pub ips_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub score: f64,
    pub payload: serde_json::Value,
}

/// Single funnel for all outbound I/O. Every method normalizes its source's
/// response into one of the shapes above; wire formats of the concrete
/// source are this trait's sole concern, never the caller's.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn quote(&self, ctx: &CallContext, symbol: &str) -> Result<Quote, AgentError>;

    /// Empty contract list if the symbol has no listed options (not an error).
    async fn options_chain(&self, ctx: &CallContext, symbol: &str) -> Result<OptionsChainResponse, AgentError>;

    async fn company_overview(&self, ctx: &CallContext, symbol: &str) -> Result<CompanyOverview, AgentError>;

    async fn sma(&self, ctx: &CallContext, symbol: &str, window: u32, interval: &str, series: &str) -> Result<SmaResult, AgentError>;

    async fn mom(&self, ctx: &CallContext, symbol: &str, interval: &str, period: u32, series: &str) -> Result<f64, AgentError>;

    async fn news_sentiment(&self, ctx: &CallContext, symbol: &str, limit: u32) -> Result<NewsSentiment, AgentError>;

    async fn news(&self, ctx: &CallContext, query: &str, topic: Option<&str>, days: u32, max_results: u32) -> Result<Vec<NewsItem>, AgentError>;

    async fn macro_series(&self, ctx: &CallContext, series_id: &str) -> Result<MacroPoint, AgentError>;

    async fn historical_iv_series(&self, ctx: &CallContext, symbol: &str, lookback_days: u32) -> Result<Vec<IvPoint>, AgentError>;

    async fn vector_search(&self, ctx: &CallContext, embedding: &[f32], k: usize, filter: &VectorFilter) -> Result<Vec<VectorHit>, AgentError>;

    async fn embed(&self, ctx: &CallContext, text: &str) -> Result<Vec<f32>, AgentError>;

    /// A single-shot call to the reasoning LLM. Returns raw text; JSON
    /// extraction happens in `crate::reasoning`, not here.
    async fn reason(&self, ctx: &CallContext, prompt: &str) -> Result<String, AgentError>;
}
