//! One `extract` function per registry entry.
//! Each returns `None` on missing input; nothing here defaults a gap to zero.

use super::context::FactorContext;

pub fn opt_delta(ctx: &FactorContext) -> Option<f64> {
    ctx.leg.as_ref()?.delta.map(f64::abs)
}

pub fn opt_gamma(ctx: &FactorContext) -> Option<f64> {
    ctx.leg.as_ref()?.gamma
}

pub fn opt_theta(ctx: &FactorContext) -> Option<f64> {
    ctx.leg.as_ref()?.theta
}

pub fn opt_vega(ctx: &FactorContext) -> Option<f64> {
    ctx.leg.as_ref()?.vega
}

pub fn opt_iv(ctx: &FactorContext) -> Option<f64> {
    ctx.leg.as_ref()?.iv
}

pub fn opt_open_interest(ctx: &FactorContext) -> Option<f64> {
    ctx.leg.as_ref()?.open_interest
}

pub fn opt_bid_ask_spread(ctx: &FactorContext) -> Option<f64> {
    ctx.leg.as_ref()?.bid_ask_spread
}

pub fn opt_last_trade_age(ctx: &FactorContext) -> Option<f64> {
    ctx.leg.as_ref()?.last_trade_age_minutes
}

/// Returns `None` when the history is shorter than 20 samples; the registry
/// entry marks that `None` as non-blocking rather than a fail.
pub fn chain_iv_rank(ctx: &FactorContext) -> Option<f64> {
    if ctx.historical_iv.sample_count < 20 {
        return None;
    }
    ctx.historical_iv.iv_rank
}

pub fn chain_iv_percentile(ctx: &FactorContext) -> Option<f64> {
    if ctx.historical_iv.sample_count < 20 {
        return None;
    }
    ctx.historical_iv.iv_percentile
}

pub fn chain_put_call_volume_ratio(ctx: &FactorContext) -> Option<f64> {
    ctx.chain.put_call_volume_ratio
}

pub fn chain_put_call_oi_ratio(ctx: &FactorContext) -> Option<f64> {
    ctx.chain.put_call_oi_ratio
}

pub fn fund_market_cap(ctx: &FactorContext) -> Option<f64> {
    ctx.overview_num("MarketCapitalization")
}

pub fn fund_pe(ctx: &FactorContext) -> Option<f64> {
    ctx.overview_num("PERatio")
}

pub fn fund_pb(ctx: &FactorContext) -> Option<f64> {
    ctx.overview_num("PriceToBookRatio")
}

pub fn fund_ev_ebitda(ctx: &FactorContext) -> Option<f64> {
    ctx.overview_num("EVToEBITDA")
}

pub fn fund_roe(ctx: &FactorContext) -> Option<f64> {
    ctx.overview_num("ReturnOnEquityTTM")
}

pub fn fund_roa(ctx: &FactorContext) -> Option<f64> {
    ctx.overview_num("ReturnOnAssetsTTM")
}

pub fn fund_profit_margin(ctx: &FactorContext) -> Option<f64> {
    ctx.overview_num("ProfitMargin")
}

pub fn fund_revenue_growth_yoy(ctx: &FactorContext) -> Option<f64> {
    ctx.overview_num("QuarterlyRevenueGrowthYOY")
}

pub fn fund_eps_growth_yoy(ctx: &FactorContext) -> Option<f64> {
    ctx.overview_num("QuarterlyEarningsGrowthYOY")
}

pub fn fund_dividend_yield(ctx: &FactorContext) -> Option<f64> {
    ctx.overview_num("DividendYield")
}

pub fn price_dist_52w_high(ctx: &FactorContext) -> Option<f64> {
    let price = ctx.market.price?;
    let high = ctx.market.week52_high?;
    if high == 0.0 {
        return None;
    }
    Some((price - high) / high)
}

pub fn price_dist_52w_low(ctx: &FactorContext) -> Option<f64> {
    let price = ctx.market.price?;
    let low = ctx.market.week52_low?;
    if low == 0.0 {
        return None;
    }
    Some((price - low) / low)
}

pub fn price_analyst_target_dist(ctx: &FactorContext) -> Option<f64> {
    let price = ctx.market.price?;
    let target = ctx.market.analyst_target?;
    if target == 0.0 {
        return None;
    }
    Some((price - target) / target)
}

pub fn price_sma50_ratio(ctx: &FactorContext) -> Option<f64> {
    let price = ctx.market.price?;
    let sma = ctx.market.sma50?;
    if sma == 0.0 {
        return None;
    }
    Some(price / sma)
}

pub fn price_sma200_ratio(ctx: &FactorContext) -> Option<f64> {
    let price = ctx.market.price?;
    let sma = ctx.market.sma200?;
    if sma == 0.0 {
        return None;
    }
    Some(price / sma)
}

pub fn mom_10(ctx: &FactorContext) -> Option<f64> {
    ctx.market.mom10
}

pub fn rsi_14(ctx: &FactorContext) -> Option<f64> {
    ctx.market.rsi14
}

pub fn macd(ctx: &FactorContext) -> Option<f64> {
    ctx.market.macd
}

pub fn golden_cross(ctx: &FactorContext) -> Option<f64> {
    ctx.market.golden_cross.map(|b| if b { 1.0 } else { 0.0 })
}

pub fn macro_cpi(ctx: &FactorContext) -> Option<f64> {
    ctx.macro_series.get("CPI").copied()
}

pub fn macro_unemployment(ctx: &FactorContext) -> Option<f64> {
    ctx.macro_series.get("UNEMPLOYMENT").copied()
}

pub fn macro_fed_funds(ctx: &FactorContext) -> Option<f64> {
    ctx.macro_series.get("FEDERAL_FUNDS_RATE").copied()
}

pub fn macro_10y_yield(ctx: &FactorContext) -> Option<f64> {
    ctx.macro_series.get("TREASURY_YIELD_10Y").copied()
}

pub fn news_sentiment_avg(ctx: &FactorContext) -> Option<f64> {
    ctx.news.sentiment_avg
}

pub fn news_volume(ctx: &FactorContext) -> Option<f64> {
    ctx.news.news_volume
}

pub fn social_sentiment_avg(ctx: &FactorContext) -> Option<f64> {
    ctx.news.social_sentiment_avg
}

pub fn event_earnings_within_n_days(ctx: &FactorContext) -> Option<f64> {
    ctx.event.earnings_within_n_days.map(|b| if b { 1.0 } else { 0.0 })
}
