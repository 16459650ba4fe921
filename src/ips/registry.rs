//! Factor dispatch table: a registration table of
//! `{key → (extractor, tolerance)}` pairs built once at startup, with alias
//! keys pointing at the same entry — the (a) option from the design notes,
//! matching the historical aliasing by both key and display name. This
//! generalizes a tagged-dispatch table from a DataFrame transform to a
//! scalar extractor over a `FactorContext`.

use std::collections::HashMap;
use std::sync::OnceLock;

use super::context::FactorContext;
use super::factors;
use crate::domain::{Direction, Factor, FactorResult};

/// Widens the passing region for the two factors that carry a calibration
/// tolerance; every other factor compares with strict arithmetic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tolerance {
    None,
    /// ±0.01 absolute, for delta comparisons.
    Delta,
    /// +$0.02 above threshold, for bid-ask-spread comparisons.
    BidAskSpread,
}

impl Tolerance {
    fn amount(self) -> f64 {
        match self {
            Tolerance::None => 0.0,
            Tolerance::Delta => 0.01,
            Tolerance::BidAskSpread => 0.02,
        }
    }
}

#[derive(Clone, Copy)]
pub struct FactorEntry {
    pub canonical_key: &'static str,
    pub extract: fn(&FactorContext) -> Option<f64>,
    pub tolerance: Tolerance,
    /// `Some(n)`: a `None` extraction is treated as PASS rather than fail,
    /// because the underlying sample size is below `n` (IV rank/percentile).
    pub non_blocking_on_missing: bool,
}

type Registry = HashMap<&'static str, FactorEntry>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

macro_rules! entry {
    ($registry:expr, $canonical:literal, $extract:expr, $tolerance:expr, $non_blocking:expr, [$($alias:literal),* $(,)?]) => {{
        let e = FactorEntry { canonical_key: $canonical, extract: $extract, tolerance: $tolerance, non_blocking_on_missing: $non_blocking };
        $registry.insert($canonical, e);
        $(
            $registry.insert($alias, e);
        )*
    }};
}

fn build_registry() -> Registry {
    let mut r = Registry::new();
    entry!(r, "opt-delta", factors::opt_delta, Tolerance::Delta, false, ["delta", "opt_delta"]);
    entry!(r, "opt-gamma", factors::opt_gamma, Tolerance::None, false, ["gamma"]);
    entry!(r, "opt-theta", factors::opt_theta, Tolerance::None, false, ["theta"]);
    entry!(r, "opt-vega", factors::opt_vega, Tolerance::None, false, ["vega"]);
    entry!(r, "opt-iv", factors::opt_iv, Tolerance::None, false, ["iv", "implied_volatility"]);
    entry!(r, "opt-open-interest", factors::opt_open_interest, Tolerance::None, false, ["open_interest", "oi"]);
    entry!(r, "opt-bid-ask-spread", factors::opt_bid_ask_spread, Tolerance::BidAskSpread, false, ["bid_ask_spread", "spread"]);
    entry!(r, "opt-last-trade-age", factors::opt_last_trade_age, Tolerance::None, false, ["last_trade_age"]);

    entry!(r, "chain-iv-rank", factors::chain_iv_rank, Tolerance::None, true, ["iv_rank"]);
    entry!(r, "chain-iv-percentile", factors::chain_iv_percentile, Tolerance::None, true, ["iv_percentile"]);
    entry!(r, "chain-put-call-volume-ratio", factors::chain_put_call_volume_ratio, Tolerance::None, false, ["put_call_volume_ratio"]);
    entry!(r, "chain-put-call-oi-ratio", factors::chain_put_call_oi_ratio, Tolerance::None, false, ["put_call_oi_ratio"]);

    entry!(r, "fund-market-cap", factors::fund_market_cap, Tolerance::None, false, ["market_cap"]);
    entry!(r, "fund-pe", factors::fund_pe, Tolerance::None, false, ["pe_ratio", "p_e"]);
    entry!(r, "fund-pb", factors::fund_pb, Tolerance::None, false, ["pb_ratio", "p_b"]);
    entry!(r, "fund-ev-ebitda", factors::fund_ev_ebitda, Tolerance::None, false, ["ev_ebitda"]);
    entry!(r, "fund-roe", factors::fund_roe, Tolerance::None, false, ["roe"]);
    entry!(r, "fund-roa", factors::fund_roa, Tolerance::None, false, ["roa"]);
    entry!(r, "fund-profit-margin", factors::fund_profit_margin, Tolerance::None, false, ["profit_margin"]);
    entry!(r, "fund-revenue-growth-yoy", factors::fund_revenue_growth_yoy, Tolerance::None, false, ["revenue_growth_yoy"]);
    entry!(r, "fund-eps-growth-yoy", factors::fund_eps_growth_yoy, Tolerance::None, false, ["eps_growth_yoy"]);
    entry!(r, "fund-dividend-yield", factors::fund_dividend_yield, Tolerance::None, false, ["dividend_yield"]);

    entry!(r, "price-dist-52w-high", factors::price_dist_52w_high, Tolerance::None, false, ["dist_52w_high"]);
    entry!(r, "price-dist-52w-low", factors::price_dist_52w_low, Tolerance::None, false, ["dist_52w_low"]);
    entry!(r, "price-analyst-target-dist", factors::price_analyst_target_dist, Tolerance::None, false, ["analyst_target_dist"]);
    entry!(r, "price-sma50-ratio", factors::price_sma50_ratio, Tolerance::None, false, ["price_sma50_ratio"]);
    entry!(r, "price-sma200-ratio", factors::price_sma200_ratio, Tolerance::None, false, ["price_sma200_ratio"]);

    entry!(r, "mom-10", factors::mom_10, Tolerance::None, false, ["momentum_10"]);
    entry!(r, "rsi-14", factors::rsi_14, Tolerance::None, false, ["rsi"]);
    entry!(r, "macd", factors::macd, Tolerance::None, false, []);
    entry!(r, "golden-cross", factors::golden_cross, Tolerance::None, false, ["golden_cross"]);

    entry!(r, "macro-cpi", factors::macro_cpi, Tolerance::None, false, ["cpi"]);
    entry!(r, "macro-unemployment", factors::macro_unemployment, Tolerance::None, false, ["unemployment_rate"]);
    entry!(r, "macro-fed-funds", factors::macro_fed_funds, Tolerance::None, false, ["fed_funds_rate"]);
    entry!(r, "macro-10y-yield", factors::macro_10y_yield, Tolerance::None, false, ["treasury_10y_yield"]);

    entry!(r, "news-sentiment-avg", factors::news_sentiment_avg, Tolerance::None, false, ["news_sentiment"]);
    entry!(r, "news-volume", factors::news_volume, Tolerance::None, false, []);
    entry!(r, "social-sentiment-avg", factors::social_sentiment_avg, Tolerance::None, false, ["social_sentiment"]);

    entry!(r, "event-earnings-within-n-days", factors::event_earnings_within_n_days, Tolerance::None, false, ["earnings_within_n_days"]);
    r
}

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(build_registry)
}

pub fn lookup(key: &str) -> Option<FactorEntry> {
    registry().get(key).copied()
}

/// True two-sided `between`. The original source collapses it to `gte` in
/// some paths — treated here as a bug, not as intended behavior.
fn compare(value: f64, direction: Direction, threshold: f64, threshold_max: Option<f64>, tolerance: Tolerance) -> bool {
    let tol = tolerance.amount();
    match direction {
        Direction::Lt => value < threshold + tol,
        Direction::Lte => value <= threshold + tol,
        Direction::Gt => value > threshold - tol,
        Direction::Gte => value >= threshold - tol,
        Direction::Eq => (value - threshold).abs() <= tol.max(f64::EPSILON),
        Direction::Neq => (value - threshold).abs() > tol,
        Direction::Between => {
            let max = threshold_max.unwrap_or(threshold);
            value >= threshold - tol && value <= max + tol
        }
    }
}

/// Evaluates one factor against one context bundle, producing the
/// `{value, target, passed}` triple the cascade attaches to candidates.
/// Looking up an unknown key is a caller bug by this point — the loader
/// (`super::model`) already rejected unknown keys at IPS-load time.
pub fn evaluate(ctx: &FactorContext, factor: &Factor) -> FactorResult {
    let entry = lookup(&factor.key);
    let target = describe_target(factor);
    let (value, passed) = match entry {
        None => (None, false),
        Some(entry) => {
            let value = (entry.extract)(ctx);
            let passed = match value {
                Some(v) => compare(v, factor.direction, factor.threshold, factor.threshold_max, entry.tolerance),
                None => entry.non_blocking_on_missing,
            };
            (value, passed)
        }
    };
    FactorResult { key: factor.key.clone(), display_name: factor.display_name.clone(), value, target, passed, weight: factor.weight }
}

fn describe_target(factor: &Factor) -> String {
    match factor.direction {
        Direction::Lt => format!("< {}", factor.threshold),
        Direction::Lte => format!("<= {}", factor.threshold),
        Direction::Gt => format!("> {}", factor.threshold),
        Direction::Gte => format!(">= {}", factor.threshold),
        Direction::Eq => format!("== {}", factor.threshold),
        Direction::Neq => format!("!= {}", factor.threshold),
        Direction::Between => format!("between {} and {}", factor.threshold, factor.threshold_max.unwrap_or(factor.threshold)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FactorScope;
    use crate::ips::context::LegContext;

    fn delta_factor(direction: Direction, threshold: f64) -> Factor {
        Factor {
            key: "opt-delta".into(),
            display_name: "Delta".into(),
            scope: FactorScope::Chain,
            weight: 0.5,
            direction,
            threshold,
            threshold_max: None,
            enabled: true,
        }
    }

    fn ctx_with_delta(delta: f64) -> FactorContext {
        let mut ctx = FactorContext::default();
        ctx.leg = Some(LegContext { delta: Some(delta), ..Default::default() });
        ctx
    }

    #[test]
    fn delta_tolerance_boundary_passes_at_threshold_plus_point_01() {
        let factor = delta_factor(Direction::Lte, 0.20);
        assert!(evaluate(&ctx_with_delta(0.21), &factor).passed);
        assert!(!evaluate(&ctx_with_delta(0.211), &factor).passed);
    }

    #[test]
    fn bid_ask_spread_tolerance_boundary() {
        let factor = Factor {
            key: "opt-bid-ask-spread".into(),
            display_name: "Spread".into(),
            scope: FactorScope::Chain,
            weight: 0.2,
            direction: Direction::Lte,
            threshold: 0.10,
            threshold_max: None,
            enabled: true,
        };
        let mut ctx = FactorContext::default();
        ctx.leg = Some(LegContext { bid_ask_spread: Some(0.12), ..Default::default() });
        assert!(evaluate(&ctx, &factor).passed);
        ctx.leg = Some(LegContext { bid_ask_spread: Some(0.121), ..Default::default() });
        assert!(!evaluate(&ctx, &factor).passed);
    }

    #[test]
    fn missing_value_fails_by_default() {
        let factor = delta_factor(Direction::Lte, 0.20);
        let ctx = FactorContext::default();
        assert!(!evaluate(&ctx, &factor).passed);
    }

    #[test]
    fn iv_rank_passes_when_history_thin() {
        let factor = Factor {
            key: "chain-iv-rank".into(),
            display_name: "IV Rank".into(),
            scope: FactorScope::Chain,
            weight: 0.1,
            direction: Direction::Gte,
            threshold: 50.0,
            threshold_max: None,
            enabled: true,
        };
        let mut ctx = FactorContext::default();
        ctx.historical_iv.sample_count = 5;
        assert!(evaluate(&ctx, &factor).passed);
    }

    #[test]
    fn between_is_two_sided() {
        let factor = Factor {
            key: "rsi-14".into(),
            display_name: "RSI".into(),
            scope: FactorScope::General,
            weight: 0.1,
            direction: Direction::Between,
            threshold: 30.0,
            threshold_max: Some(70.0),
            enabled: true,
        };
        let mut ctx = FactorContext::default();
        ctx.market.rsi14 = Some(80.0);
        assert!(!evaluate(&ctx, &factor).passed);
        ctx.market.rsi14 = Some(50.0);
        assert!(evaluate(&ctx, &factor).passed);
    }

    #[test]
    fn alias_keys_resolve_to_the_same_entry() {
        assert!(lookup("delta").is_some());
        assert_eq!(lookup("delta").unwrap().canonical_key, "opt-delta");
    }

    #[test]
    fn evaluating_twice_is_idempotent() {
        let factor = delta_factor(Direction::Lte, 0.20);
        let ctx = ctx_with_delta(0.18);
        let first = evaluate(&ctx, &factor);
        let second = evaluate(&ctx, &factor);
        assert_eq!(first.value, second.value);
        assert_eq!(first.passed, second.passed);
    }
}
