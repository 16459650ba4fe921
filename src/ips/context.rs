//! The data bundle a factor is evaluated against: overview,
//! chain-aggregate metrics, a single leg's greeks/microstructure, market
//! technicals, macro series, news/sentiment and historical IV. Stage code
//! assembles one of these per symbol (general-scope evaluation) or per
//! candidate leg (chain-scope evaluation); the registry never reaches back
//! into a provider itself.

use std::collections::HashMap;

use crate::provider::{CompanyOverview, OverviewValue};

#[derive(Debug, Clone, Default)]
pub struct ChainAggregateMetrics {
    pub put_call_volume_ratio: Option<f64>,
    pub put_call_oi_ratio: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct LegContext {
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub iv: Option<f64>,
    pub open_interest: Option<f64>,
    pub bid_ask_spread: Option<f64>,
    pub last_trade_age_minutes: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct MarketMetrics {
    pub price: Option<f64>,
    pub sma50: Option<f64>,
    pub sma200: Option<f64>,
    pub week52_high: Option<f64>,
    pub week52_low: Option<f64>,
    pub analyst_target: Option<f64>,
    pub mom10: Option<f64>,
    pub rsi14: Option<f64>,
    pub macd: Option<f64>,
    pub golden_cross: Option<bool>,
}

/// Sample count drives the non-blocking rule for IV rank/percentile.
#[derive(Debug, Clone, Default)]
pub struct HistoricalIvContext {
    pub iv_rank: Option<f64>,
    pub iv_percentile: Option<f64>,
    pub sample_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct NewsContext {
    pub sentiment_avg: Option<f64>,
    pub news_volume: Option<f64>,
    pub social_sentiment_avg: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub earnings_within_n_days: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct FactorContext {
    pub overview: Option<CompanyOverview>,
    pub chain: ChainAggregateMetrics,
    pub leg: Option<LegContext>,
    pub market: MarketMetrics,
    pub macro_series: HashMap<String, f64>,
    pub news: NewsContext,
    pub historical_iv: HistoricalIvContext,
    pub event: EventContext,
}

impl FactorContext {
    /// Reads a numeric fundamentals field out of the raw overview payload;
    /// absent or non-numeric keys are `None`, never coerced to zero.
    pub fn overview_num(&self, key: &str) -> Option<f64> {
        match self.overview.as_ref()?.get(key)? {
            OverviewValue::Number(n) => Some(*n),
            OverviewValue::Text(s) => s.parse().ok(),
        }
    }
}
