//! Assembles `FactorContext` bundles from Provider Gateway responses (spec
//! §4.2, §4.4 S1/S3). One function per context shape: general (per symbol,
//! no chain touched) and chain (per symbol, chain-aggregate + per-leg).

use std::collections::HashMap;

use crate::domain::OptionContract;
use crate::error::AgentError;
use crate::ips::context::{ChainAggregateMetrics, EventContext, FactorContext, HistoricalIvContext, LegContext, MarketMetrics, NewsContext};
use crate::provider::{CallContext, CompanyOverview, OverviewValue, Provider};

/// Minimum historical-IV sample size before rank/percentile are meaningful.
/// Non-blocking below this, so a thin series is fine to carry through —
/// the factor evaluator is what treats it as a pass.
const IV_HISTORY_LOOKBACK_DAYS: u32 = 252;

fn overview_num(overview: &CompanyOverview, key: &str) -> Option<f64> {
    match overview.get(key)? {
        OverviewValue::Number(n) => Some(*n),
        OverviewValue::Text(s) => s.parse().ok(),
    }
}

/// General-scope context: overview, SMA50/200, MOM(10),
/// news/sentiment from two providers, no options chain touched.
pub async fn build_general_context(provider: &dyn Provider, ctx: &CallContext, symbol: &str) -> Result<FactorContext, AgentError> {
    let overview = provider.company_overview(ctx, symbol).await?;
    let quote = provider.quote(ctx, symbol).await?;
    let sma50 = provider.sma(ctx, symbol, 50, "daily", "close").await.ok();
    let sma200 = provider.sma(ctx, symbol, 200, "daily", "close").await.ok();
    let mom10 = provider.mom(ctx, symbol, "daily", 10, "close").await.ok();
    let sentiment = provider.news_sentiment(ctx, symbol, 20).await.ok();

    // Two news providers: the symbol-scoped feed and a markets-topic feed.
    let symbol_news = provider.news(ctx, symbol, None, 7, 10).await.unwrap_or_default();
    let topic_news = provider.news(ctx, symbol, Some("financial_markets"), 7, 10).await.unwrap_or_default();

    let golden_cross = match (sma50.map(|s| s.value), sma200.map(|s| s.value)) {
        (Some(s50), Some(s200)) => Some(s50 > s200),
        _ => None,
    };

    let market = MarketMetrics {
        price: Some(quote.price),
        sma50: sma50.map(|s| s.value),
        sma200: sma200.map(|s| s.value),
        week52_high: overview_num(&overview, "52WeekHigh"),
        week52_low: overview_num(&overview, "52WeekLow"),
        analyst_target: overview_num(&overview, "AnalystTargetPrice"),
        mom10,
        rsi14: None,
        macd: None,
        golden_cross,
    };

    let news = NewsContext {
        sentiment_avg: sentiment.map(|s| s.average_score),
        news_volume: Some((symbol_news.len() + topic_news.len()) as f64),
        social_sentiment_avg: None,
    };

    Ok(FactorContext {
        overview: Some(overview),
        chain: ChainAggregateMetrics::default(),
        leg: None,
        market,
        macro_series: HashMap::new(),
        news,
        historical_iv: HistoricalIvContext::default(),
        event: EventContext::default(),
    })
}

/// Fetches macro series for a symbol's general-scope macro factors (spec
/// §4.2: CPI, unemployment, fed funds, 10Y yield). Calls are independent of
/// the symbol; callers typically fetch these once per run and merge.
pub async fn build_macro_series(provider: &dyn Provider, ctx: &CallContext) -> HashMap<String, f64> {
    let mut out = HashMap::new();
    for series_id in ["CPI", "UNEMPLOYMENT", "FEDERAL_FUNDS_RATE", "TREASURY_YIELD_10Y"] {
        if let Ok(point) = provider.macro_series(ctx, series_id).await {
            out.insert(series_id.to_string(), point.value);
        }
    }
    out
}

/// Chain-aggregate metrics over the full normalized chain: put/call
/// ratios by volume and by open interest.
pub fn chain_aggregate_metrics(contracts: &[OptionContract]) -> ChainAggregateMetrics {
    use crate::domain::ContractType;

    let put_volume: u64 = contracts.iter().filter(|c| c.contract_type == ContractType::P).filter_map(|c| c.volume).sum();
    let call_volume: u64 = contracts.iter().filter(|c| c.contract_type == ContractType::C).filter_map(|c| c.volume).sum();
    let put_oi: u64 = contracts.iter().filter(|c| c.contract_type == ContractType::P).filter_map(|c| c.oi).sum();
    let call_oi: u64 = contracts.iter().filter(|c| c.contract_type == ContractType::C).filter_map(|c| c.oi).sum();

    ChainAggregateMetrics {
        put_call_volume_ratio: if call_volume > 0 { Some(put_volume as f64 / call_volume as f64) } else { None },
        put_call_oi_ratio: if call_oi > 0 { Some(put_oi as f64 / call_oi as f64) } else { None },
    }
}

/// IV rank/percentile of `current_iv` against the trailing 252-day ATM IV
/// series. Time-series interpretation only, never cross-strike.
/// `None` sample_count guard is the caller's job; this just computes the two
/// numbers once a series is in hand.
pub fn iv_rank_and_percentile(history: &[crate::provider::IvPoint], current_iv: f64) -> (Option<f64>, Option<f64>) {
    if history.is_empty() {
        return (None, None);
    }
    let min = history.iter().map(|p| p.iv_atm_30d).fold(f64::MAX, f64::min);
    let max = history.iter().map(|p| p.iv_atm_30d).fold(f64::MIN, f64::max);
    let rank = if (max - min).abs() > f64::EPSILON { Some(((current_iv - min) / (max - min) * 100.0).clamp(0.0, 100.0)) } else { Some(50.0) };
    let below_or_equal = history.iter().filter(|p| p.iv_atm_30d <= current_iv).count();
    let percentile = Some(below_or_equal as f64 / history.len() as f64 * 100.0);
    (rank, percentile)
}

/// Fetches a symbol's historical IV series via the provider's
/// `historical_iv_series` operation, used to populate `HistoricalIvContext` for chain-scope S3
/// evaluation. Errors are non-fatal: an empty series is a thin history,
/// which the registry already treats as non-blocking.
pub async fn build_historical_iv(provider: &dyn Provider, ctx: &CallContext, symbol: &str, current_atm_iv: Option<f64>) -> HistoricalIvContext {
    let series = provider.historical_iv_series(ctx, symbol, IV_HISTORY_LOOKBACK_DAYS).await.unwrap_or_default();
    let sample_count = series.len();
    let (iv_rank, iv_percentile) = match current_atm_iv {
        Some(iv) => iv_rank_and_percentile(&series, iv),
        None => (None, None),
    };
    HistoricalIvContext { iv_rank, iv_percentile, sample_count }
}

/// Per-leg context for chain-scope factor evaluation: greeks and
/// microstructure off a single contract.
pub fn leg_context(contract: &OptionContract, now: chrono::DateTime<chrono::Utc>) -> LegContext {
    let bid_ask_spread = match (contract.bid, contract.ask) {
        (Some(b), Some(a)) => Some((a - b).abs()),
        _ => None,
    };
    let last_trade_age_minutes = Some((now - contract.asof).num_minutes().max(0) as f64);

    LegContext {
        delta: contract.delta,
        gamma: contract.gamma,
        theta: contract.theta,
        vega: contract.vega,
        iv: contract.iv,
        open_interest: contract.oi.map(|v| v as f64),
        bid_ask_spread,
        last_trade_age_minutes,
    }
}
