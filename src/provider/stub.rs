//! Deterministic `Provider` test double. Every response is pre-seeded by the
//! test; nothing here reaches a network. The LLM/data client sits behind
//! an interface whose fake can be wired into tests without touching
//! transport code.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::{
    CallContext, CompanyOverview, IvPoint, MacroPoint, NewsItem, NewsSentiment,
    OptionsChainResponse, Provider, Quote, SmaResult, VectorFilter, VectorHit,
};
use crate::error::AgentError;

#[derive(Default)]
pub struct StubProvider {
    quote_queue: Mutex<HashMap<String, VecDeque<Result<Quote, AgentError>>>>,
    chains: Mutex<HashMap<String, OptionsChainResponse>>,
    overviews: Mutex<HashMap<String, CompanyOverview>>,
    smas: Mutex<HashMap<String, SmaResult>>,
    moms: Mutex<HashMap<String, f64>>,
    news_sentiments: Mutex<HashMap<String, NewsSentiment>>,
    news_items: Mutex<Vec<NewsItem>>,
    macro_points: Mutex<HashMap<String, MacroPoint>>,
    iv_series: Mutex<HashMap<String, Vec<IvPoint>>>,
    vector_hits: Mutex<Vec<VectorHit>>,
    embedding: Mutex<Vec<f32>>,
    reasoning_queue: Mutex<VecDeque<Result<String, AgentError>>>,
}

impl StubProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_quote(&self, symbol: &str, quote: Quote) {
        self.quote_queue.lock().unwrap().entry(symbol.to_string()).or_default().push_back(Ok(quote));
    }

    pub fn fail_next_n_quotes(&self, symbol: &str, n: u32) {
        let mut map = self.quote_queue.lock().unwrap();
        let queue = map.entry(symbol.to_string()).or_default();
        for _ in 0..n {
            queue.push_back(Err(AgentError::ProviderUnavailable {
                symbol: symbol.to_string(),
                message: "stubbed failure".to_string(),
            }));
        }
    }

    pub fn set_symbol_unknown(&self, symbol: &str) {
        self.quote_queue
            .lock()
            .unwrap()
            .entry(symbol.to_string())
            .or_default()
            .push_back(Err(AgentError::SymbolUnknown(symbol.to_string())));
    }

    pub fn set_chain(&self, symbol: &str, chain: OptionsChainResponse) {
        self.chains.lock().unwrap().insert(symbol.to_string(), chain);
    }

    pub fn set_overview(&self, symbol: &str, overview: CompanyOverview) {
        self.overviews.lock().unwrap().insert(symbol.to_string(), overview);
    }

    pub fn set_sma(&self, symbol: &str, result: SmaResult) {
        self.smas.lock().unwrap().insert(symbol.to_string(), result);
    }

    pub fn set_mom(&self, symbol: &str, value: f64) {
        self.moms.lock().unwrap().insert(symbol.to_string(), value);
    }

    pub fn set_news_sentiment(&self, symbol: &str, sentiment: NewsSentiment) {
        self.news_sentiments.lock().unwrap().insert(symbol.to_string(), sentiment);
    }

    pub fn push_news_item(&self, item: NewsItem) {
        self.news_items.lock().unwrap().push(item);
    }

    pub fn set_macro_point(&self, series_id: &str, point: MacroPoint) {
        self.macro_points.lock().unwrap().insert(series_id.to_string(), point);
    }

    pub fn set_iv_series(&self, symbol: &str, series: Vec<IvPoint>) {
        self.iv_series.lock().unwrap().insert(symbol.to_string(), series);
    }

    pub fn push_vector_hit(&self, hit: VectorHit) {
        self.vector_hits.lock().unwrap().push(hit);
    }

    pub fn set_embedding(&self, embedding: Vec<f32>) {
        *self.embedding.lock().unwrap() = embedding;
    }

    pub fn push_reasoning_response(&self, response: impl Into<String>) {
        self.reasoning_queue.lock().unwrap().push_back(Ok(response.into()));
    }

    pub fn fail_next_reasoning(&self, message: impl Into<String>) {
        self.reasoning_queue
            .lock()
            .unwrap()
            .push_back(Err(AgentError::ProviderUnavailable { symbol: String::new(), message: message.into() }));
    }
}

#[async_trait]
impl Provider for StubProvider {
    async fn quote(&self, _ctx: &CallContext, symbol: &str) -> Result<Quote, AgentError> {
        let mut queue = self.quote_queue.lock().unwrap();
        match queue.get_mut(symbol).and_then(VecDeque::pop_front) {
            Some(result) => result,
            None => Err(AgentError::SymbolUnknown(symbol.to_string())),
        }
    }

    async fn options_chain(&self, _ctx: &CallContext, symbol: &str) -> Result<OptionsChainResponse, AgentError> {
        Ok(self
            .chains
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .unwrap_or(OptionsChainResponse { asof: Utc::now(), contracts: Vec::new() }))
    }

    async fn company_overview(&self, _ctx: &CallContext, symbol: &str) -> Result<CompanyOverview, AgentError> {
        Ok(self.overviews.lock().unwrap().get(symbol).cloned().unwrap_or_default())
    }

    async fn sma(&self, _ctx: &CallContext, symbol: &str, _window: u32, _interval: &str, _series: &str) -> Result<SmaResult, AgentError> {
        self.smas
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| AgentError::ProviderUnavailable { symbol: symbol.to_string(), message: "no stubbed sma".to_string() })
    }

    async fn mom(&self, _ctx: &CallContext, symbol: &str, _interval: &str, _period: u32, _series: &str) -> Result<f64, AgentError> {
        self.moms
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| AgentError::ProviderUnavailable { symbol: symbol.to_string(), message: "no stubbed mom".to_string() })
    }

    async fn news_sentiment(&self, _ctx: &CallContext, symbol: &str, _limit: u32) -> Result<NewsSentiment, AgentError> {
        Ok(self.news_sentiments.lock().unwrap().get(symbol).copied().unwrap_or(NewsSentiment {
            average_score: 0.0,
            count: 0,
            pos: 0,
            neg: 0,
            neu: 0,
        }))
    }

    async fn news(&self, _ctx: &CallContext, _query: &str, _topic: Option<&str>, _days: u32, max_results: u32) -> Result<Vec<NewsItem>, AgentError> {
        let items = self.news_items.lock().unwrap();
        Ok(items.iter().take(max_results as usize).cloned().collect())
    }

    async fn macro_series(&self, _ctx: &CallContext, series_id: &str) -> Result<MacroPoint, AgentError> {
        self.macro_points
            .lock()
            .unwrap()
            .get(series_id)
            .copied()
            .ok_or_else(|| AgentError::ProviderUnavailable { symbol: series_id.to_string(), message: "no stubbed macro series".to_string() })
    }

    async fn historical_iv_series(&self, _ctx: &CallContext, symbol: &str, _lookback_days: u32) -> Result<Vec<IvPoint>, AgentError> {
        Ok(self.iv_series.lock().unwrap().get(symbol).cloned().unwrap_or_default())
    }

    async fn vector_search(&self, _ctx: &CallContext, _embedding: &[f32], k: usize, _filter: &VectorFilter) -> Result<Vec<VectorHit>, AgentError> {
        let hits = self.vector_hits.lock().unwrap();
        Ok(hits.iter().take(k).cloned().collect())
    }

    async fn embed(&self, _ctx: &CallContext, _text: &str) -> Result<Vec<f32>, AgentError> {
        let embedding = self.embedding.lock().unwrap();
        if embedding.is_empty() {
            Ok(vec![0.0; 8])
        } else {
            Ok(embedding.clone())
        }
    }

    async fn reason(&self, _ctx: &CallContext, _prompt: &str) -> Result<String, AgentError> {
        self.reasoning_queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AgentError::ProviderUnavailable { symbol: String::new(), message: "no stubbed reasoning response".to_string() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CallContext {
        CallContext::new(tokio_util::sync::CancellationToken::new())
    }

    #[tokio::test]
    async fn unconfigured_symbol_is_unknown() {
        let stub = StubProvider::new();
        let err = stub.quote(&ctx(), "ZZZ").await.unwrap_err();
        assert_eq!(err.kind(), "SymbolUnknown");
    }

    #[tokio::test]
    async fn missing_chain_returns_empty_not_error() {
        let stub = StubProvider::new();
        let chain = stub.options_chain(&ctx(), "AAA").await.unwrap();
        assert!(chain.contracts.is_empty());
    }

    #[tokio::test]
    async fn reasoning_responses_are_consumed_in_order() {
        let stub = StubProvider::new();
        stub.push_reasoning_response("first");
        stub.push_reasoning_response("second");
        assert_eq!(stub.reason(&ctx(), "p").await.unwrap(), "first");
        assert_eq!(stub.reason(&ctx(), "p").await.unwrap(), "second");
    }
}
