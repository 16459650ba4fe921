//! `RateLimitedGateway<P>`: wraps any concrete `Provider` with the token
//! bucket, retry/backoff, hard call-count budget and tool log. Policy
//! lives here exactly once, centralizing rate limiting and backoff behind
//! a single throttled-request path rather than scattering it across call
//! sites.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

use super::{
    CallContext, CompanyOverview, IvPoint, MacroPoint, NewsItem, NewsSentiment,
    OptionsChainResponse, Provider, Quote, SmaResult, VectorFilter, VectorHit,
};
use crate::config::RunnerConfig;
use crate::error::AgentError;

/// Per-call record appended to the process-wide tool log.
#[derive(Debug, Clone, Serialize)]
pub struct ToolLogEntry {
    pub run_id: Option<Uuid>,
    pub operation: String,
    pub symbol: Option<String>,
    pub latency_ms: u64,
    pub success: bool,
    pub error_kind: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Default)]
pub struct ToolLog(Mutex<Vec<ToolLogEntry>>);

impl ToolLog {
    async fn record(&self, entry: ToolLogEntry) {
        self.0.lock().await.push(entry);
    }

    pub async fn snapshot(&self) -> Vec<ToolLogEntry> {
        self.0.lock().await.clone()
    }

    /// Removes and returns every entry tagged with `run_id`, so a completed
    /// run's slice of this process-wide log can be handed to
    /// `RunRepository::log_tool` without the log growing unbounded.
    pub async fn drain_for_run(&self, run_id: Uuid) -> Vec<ToolLogEntry> {
        let mut guard = self.0.lock().await;
        let (matching, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut *guard).into_iter().partition(|e| e.run_id == Some(run_id));
        *guard = rest;
        matching
    }
}

/// Caps concurrent in-flight requests and bursts per second. A process-wide,
/// concurrency-safe leaky bucket — re-entrant across concurrent runs.
struct RateLimiter {
    semaphore: Semaphore,
    rate_per_second: f64,
    recent: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    fn new(concurrency_cap: u32, rate_per_second: f64) -> Self {
        Self {
            semaphore: Semaphore::new(concurrency_cap as usize),
            rate_per_second,
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// Blocks until a concurrency slot and a burst-rate slot are both free.
    async fn acquire(&self) -> tokio::sync::SemaphorePermit<'_> {
        let permit = self.semaphore.acquire().await.expect("semaphore never closed");
        loop {
            let wait = {
                let mut recent = self.recent.lock().await;
                let now = Instant::now();
                let window_start = now - Duration::from_secs(1);
                while matches!(recent.front(), Some(t) if *t < window_start) {
                    recent.pop_front();
                }
                if (recent.len() as f64) < self.rate_per_second {
                    recent.push_back(now);
                    None
                } else {
                    Some(*recent.front().unwrap() + Duration::from_secs(1) - now)
                }
            };
            match wait {
                None => return permit,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

/// Hard call-count budget with a cooldown-then-reset policy.
struct Budget {
    limit: u32,
    cooldown: Duration,
    used: AtomicU32,
    cooldown_until: Mutex<Option<Instant>>,
}

impl Budget {
    fn new(limit: u32, cooldown: Duration) -> Self {
        Self { limit, cooldown, used: AtomicU32::new(0), cooldown_until: Mutex::new(None) }
    }

    /// Blocks past the cooldown window on exhaustion, then resets. Returns
    /// `BudgetExhausted` only if the caller's deadline passes while waiting.
    async fn acquire(&self, ctx: &CallContext) -> Result<(), AgentError> {
        loop {
            {
                let mut cooldown = self.cooldown_until.lock().await;
                if let Some(until) = *cooldown {
                    if Instant::now() >= until {
                        *cooldown = None;
                        self.used.store(0, Ordering::SeqCst);
                    } else {
                        let wait = until - Instant::now();
                        drop(cooldown);
                        if let Some(deadline) = ctx.deadline {
                            if Instant::now() + wait > deadline {
                                return Err(AgentError::BudgetExhausted { used: self.used.load(Ordering::SeqCst), limit: self.limit });
                            }
                        }
                        tokio::time::sleep(wait.min(Duration::from_millis(200))).await;
                        continue;
                    }
                }
            }
            let used = self.used.fetch_add(1, Ordering::SeqCst) + 1;
            if used > self.limit {
                let mut cooldown = self.cooldown_until.lock().await;
                if cooldown.is_none() {
                    *cooldown = Some(Instant::now() + self.cooldown);
                }
                continue;
            }
            return Ok(());
        }
    }
}

pub struct RateLimitedGateway<P: Provider> {
    inner: P,
    limiter: RateLimiter,
    budget: Budget,
    max_retries: u32,
    provider_timeout: Duration,
    reasoning_timeout: Duration,
    pub tool_log: Arc<ToolLog>,
}

impl<P: Provider> RateLimitedGateway<P> {
    pub fn new(inner: P, config: &RunnerConfig) -> Self {
        Self {
            inner,
            limiter: RateLimiter::new(config.concurrency_cap, config.rate_per_second),
            budget: Budget::new(config.provider_call_budget, config.budget_cooldown),
            max_retries: config.max_retries,
            provider_timeout: config.provider_timeout,
            reasoning_timeout: config.reasoning_timeout,
            tool_log: Arc::new(ToolLog::default()),
        }
    }

    /// Runs `make` under the budget, rate limiter, per-call timeout and
    /// retry-with-backoff policy, logging exactly one entry per attempt.
    async fn run_with_policy<T, Fut>(
        &self,
        ctx: &CallContext,
        operation: &str,
        symbol: Option<&str>,
        timeout: Duration,
        mut make: impl FnMut() -> Fut,
    ) -> Result<T, AgentError>
    where
        Fut: Future<Output = Result<T, AgentError>>,
    {
        if ctx.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let mut attempt = 0;
        loop {
            self.budget.acquire(ctx).await?;
            let _permit = self.limiter.acquire().await;

            let start = Instant::now();
            let result = tokio::time::timeout(timeout, make()).await;
            let latency_ms = start.elapsed().as_millis() as u64;

            let result = match result {
                Ok(r) => r,
                Err(_) => Err(AgentError::ProviderUnavailable {
                    symbol: symbol.unwrap_or_default().to_string(),
                    message: format!("{operation} timed out after {timeout:?}"),
                }),
            };

            let (success, error_kind) = match &result {
                Ok(_) => (true, None),
                Err(e) => (false, Some(e.kind().to_string())),
            };
            self.tool_log
                .record(ToolLogEntry {
                    run_id: ctx.run_id,
                    operation: operation.to_string(),
                    symbol: symbol.map(str::to_string),
                    latency_ms,
                    success,
                    error_kind,
                    at: Utc::now(),
                })
                .await;

            match result {
                Ok(v) => return Ok(v),
                Err(AgentError::ProviderUnavailable { symbol, message }) if attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = Duration::from_millis(200 * 2u64.pow(attempt - 1));
                    tracing::warn!(%symbol, %message, attempt, "provider call failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<P: Provider> Provider for RateLimitedGateway<P> {
    async fn quote(&self, ctx: &CallContext, symbol: &str) -> Result<Quote, AgentError> {
        self.run_with_policy(ctx, "quote", Some(symbol), self.provider_timeout, || self.inner.quote(ctx, symbol)).await
    }

    async fn options_chain(&self, ctx: &CallContext, symbol: &str) -> Result<OptionsChainResponse, AgentError> {
        self.run_with_policy(ctx, "options_chain", Some(symbol), self.provider_timeout, || self.inner.options_chain(ctx, symbol)).await
    }

    async fn company_overview(&self, ctx: &CallContext, symbol: &str) -> Result<CompanyOverview, AgentError> {
        self.run_with_policy(ctx, "company_overview", Some(symbol), self.provider_timeout, || self.inner.company_overview(ctx, symbol)).await
    }

    async fn sma(&self, ctx: &CallContext, symbol: &str, window: u32, interval: &str, series: &str) -> Result<SmaResult, AgentError> {
        self.run_with_policy(ctx, "sma", Some(symbol), self.provider_timeout, || self.inner.sma(ctx, symbol, window, interval, series)).await
    }

    async fn mom(&self, ctx: &CallContext, symbol: &str, interval: &str, period: u32, series: &str) -> Result<f64, AgentError> {
        self.run_with_policy(ctx, "mom", Some(symbol), self.provider_timeout, || self.inner.mom(ctx, symbol, interval, period, series)).await
    }

    async fn news_sentiment(&self, ctx: &CallContext, symbol: &str, limit: u32) -> Result<NewsSentiment, AgentError> {
        self.run_with_policy(ctx, "news_sentiment", Some(symbol), self.provider_timeout, || self.inner.news_sentiment(ctx, symbol, limit)).await
    }

    async fn news(&self, ctx: &CallContext, query: &str, topic: Option<&str>, days: u32, max_results: u32) -> Result<Vec<NewsItem>, AgentError> {
        self.run_with_policy(ctx, "news", None, self.provider_timeout, || self.inner.news(ctx, query, topic, days, max_results)).await
    }

    async fn macro_series(&self, ctx: &CallContext, series_id: &str) -> Result<MacroPoint, AgentError> {
        self.run_with_policy(ctx, "macro_series", None, self.provider_timeout, || self.inner.macro_series(ctx, series_id)).await
    }

    async fn historical_iv_series(&self, ctx: &CallContext, symbol: &str, lookback_days: u32) -> Result<Vec<IvPoint>, AgentError> {
        self.run_with_policy(ctx, "historical_iv_series", Some(symbol), self.provider_timeout, || self.inner.historical_iv_series(ctx, symbol, lookback_days)).await
    }

    async fn vector_search(&self, ctx: &CallContext, embedding: &[f32], k: usize, filter: &VectorFilter) -> Result<Vec<VectorHit>, AgentError> {
        self.run_with_policy(ctx, "vector_search", None, self.provider_timeout, || self.inner.vector_search(ctx, embedding, k, filter)).await
    }

    async fn embed(&self, ctx: &CallContext, text: &str) -> Result<Vec<f32>, AgentError> {
        self.run_with_policy(ctx, "embed", None, self.provider_timeout, || self.inner.embed(ctx, text)).await
    }

    async fn reason(&self, ctx: &CallContext, prompt: &str) -> Result<String, AgentError> {
        self.run_with_policy(ctx, "reason", None, self.reasoning_timeout, || self.inner.reason(ctx, prompt)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::stub::StubProvider;

    fn ctx() -> CallContext {
        CallContext::new(tokio_util::sync::CancellationToken::new())
    }

    #[tokio::test]
    async fn passthrough_succeeds_and_logs() {
        let stub = StubProvider::new();
        stub.set_quote("AAA", Quote { price: 100.0, volume: 1_000, timestamp: Utc::now() });
        let gw = RateLimitedGateway::new(stub, &RunnerConfig::default());
        let q = gw.quote(&ctx(), "AAA").await.unwrap();
        assert_eq!(q.price, 100.0);
        let log = gw.tool_log.snapshot().await;
        assert_eq!(log.len(), 1);
        assert!(log[0].success);
    }

    #[tokio::test]
    async fn retries_on_provider_unavailable_then_succeeds() {
        let stub = StubProvider::new();
        stub.fail_next_n_quotes("AAA", 2);
        stub.set_quote("AAA", Quote { price: 50.0, volume: 10, timestamp: Utc::now() });
        let gw = RateLimitedGateway::new(stub, &RunnerConfig::default());
        let q = gw.quote(&ctx(), "AAA").await.unwrap();
        assert_eq!(q.price, 50.0);
        let log = gw.tool_log.snapshot().await;
        assert_eq!(log.len(), 3);
        assert!(!log[0].success && !log[1].success && log[2].success);
    }

    #[tokio::test]
    async fn exhausts_retries_and_surfaces_error() {
        let stub = StubProvider::new();
        stub.fail_next_n_quotes("AAA", 10);
        let gw = RateLimitedGateway::new(stub, &RunnerConfig::default());
        let err = gw.quote(&ctx(), "AAA").await.unwrap_err();
        assert_eq!(err.kind(), "ProviderUnavailable");
        let log = gw.tool_log.snapshot().await;
        assert_eq!(log.len(), 4); // 1 + 3 retries
    }

    #[tokio::test]
    async fn symbol_unknown_is_not_retried() {
        let stub = StubProvider::new();
        stub.set_symbol_unknown("ZZZ");
        let gw = RateLimitedGateway::new(stub, &RunnerConfig::default());
        let err = gw.quote(&ctx(), "ZZZ").await.unwrap_err();
        assert_eq!(err.kind(), "SymbolUnknown");
        let log = gw.tool_log.snapshot().await;
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn budget_exhaustion_blocks_then_resumes() {
        let mut config = RunnerConfig::default();
        config.provider_call_budget = 1;
        config.budget_cooldown = Duration::from_millis(50);
        let stub = StubProvider::new();
        stub.set_quote("AAA", Quote { price: 1.0, volume: 1, timestamp: Utc::now() });
        stub.set_quote("BBB", Quote { price: 2.0, volume: 1, timestamp: Utc::now() });
        let gw = RateLimitedGateway::new(stub, &config);
        assert!(gw.quote(&ctx(), "AAA").await.is_ok());
        // Second call exceeds the budget of 1; it should block through the
        // cooldown and then succeed rather than error.
        let result = gw.quote(&ctx(), "BBB").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();
        let stub = StubProvider::new();
        let gw = RateLimitedGateway::new(stub, &RunnerConfig::default());
        let err = gw.quote(&CallContext::new(token), "AAA").await.unwrap_err();
        assert_eq!(err.kind(), "Cancelled");
    }
}
