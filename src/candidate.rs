//! Candidate Generator: enumerates put credit spread candidates
//! from a normalized options chain and the underlying's current price.
//!
//! Scoped by a `StrategyKind` so a second strategy (call credit spread, iron
//! condor) slots in beside `PutCreditSpread` without restructuring this
//! module — only `PutCreditSpread` is implemented today; anything else is
//! absence, not a stub. Strategy lookup and leg selection (closest-delta
//! short leg, offset long leg) stay split the way a dedicated delta-scan
//! helper would, just over a plain slice of normalized contracts.

use uuid::Uuid;

use crate::domain::{Candidate, CandidateLeg, ContractType, FactorResult, OptionContract, Strategy, Tier};

/// Strikes scanned per expiry.
const MAX_STRIKES_PER_EXPIRY: usize = 50;
/// Expiries considered, nearest first.
const MAX_EXPIRIES: usize = 3;
/// Strikes between short and long leg (the "i+2" rule).
const LONG_LEG_OFFSET: usize = 2;
/// Minimum risk/reward to accept a candidate: strict `<`.
const MIN_RISK_REWARD: f64 = 0.15;
/// Deep-ITM/ATM exclusion on the short leg.
const MAX_SHORT_DELTA: f64 = 0.5;
/// Fallback POP when the short leg's delta is absent.
const FALLBACK_POP: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    PutCreditSpread,
}

/// Enumerates every valid put credit spread in `contracts` for one underlying.
/// `current_price` gates which puts are OTM enough to be a short-leg candidate.
/// `sector` is attached verbatim to every candidate, for downstream diversification caps.
pub fn generate(kind: StrategyKind, symbol: &str, sector: Option<&str>, current_price: f64, contracts: &[OptionContract]) -> Vec<Candidate> {
    match kind {
        StrategyKind::PutCreditSpread => put_credit_spreads(symbol, sector, current_price, contracts),
    }
}

fn put_credit_spreads(symbol: &str, sector: Option<&str>, current_price: f64, contracts: &[OptionContract]) -> Vec<Candidate> {
    // Step 1: OTM puts with a two-sided quote.
    let mut puts: Vec<&OptionContract> = contracts
        .iter()
        .filter(|c| c.contract_type == ContractType::P && c.strike < current_price && c.has_valid_quote())
        .collect();

    // Step 2: group by expiry, keep the first three ascending.
    puts.sort_by_key(|c| c.expiry);
    let mut expiries: Vec<chrono::NaiveDate> = puts.iter().map(|c| c.expiry).collect();
    expiries.dedup();
    expiries.truncate(MAX_EXPIRIES);

    let mut candidates = Vec::new();
    for expiry in expiries {
        // Step 3: within the expiry, strikes descending, first N scanned.
        let mut chain: Vec<&OptionContract> = puts.iter().copied().filter(|c| c.expiry == expiry).collect();
        chain.sort_by(|a, b| b.strike.partial_cmp(&a.strike).unwrap_or(std::cmp::Ordering::Equal));
        chain.truncate(MAX_STRIKES_PER_EXPIRY);

        for (i, short) in chain.iter().enumerate() {
            // Step 4: skip deep-ITM/ATM shorts; only shallow deltas qualify.
            let short_delta_abs = short.delta.map(f64::abs);
            if short_delta_abs.is_some_and(|d| d > MAX_SHORT_DELTA) {
                continue;
            }

            let long_index = if i + LONG_LEG_OFFSET < chain.len() { i + LONG_LEG_OFFSET } else { chain.len() - 1 };
            if long_index == i {
                continue;
            }
            let long = chain[long_index];

            if let Some(candidate) = build_candidate(symbol, sector, short, long) {
                candidates.push(candidate);
            }
        }
    }
    candidates
}

fn build_candidate(symbol: &str, sector: Option<&str>, short: &OptionContract, long: &OptionContract) -> Option<Candidate> {
    let short_mid = short.mid()?;
    let long_mid = long.mid()?;

    let width = short.strike - long.strike;
    let entry_mid = short_mid - long_mid;
    // Step 5: reject non-credit or non-positive-width pairings.
    if entry_mid <= 0.0 || width <= 0.0 {
        return None;
    }

    // Step 6: spread economics.
    let max_profit = entry_mid;
    let max_loss = width - entry_mid;
    let breakeven = short.strike - entry_mid;
    let est_pop = short.delta.map_or(FALLBACK_POP, |d| 1.0 - d.abs());

    // Risk/reward floor, strict `<`.
    if max_loss <= 0.0 || max_profit / max_loss < MIN_RISK_REWARD {
        return None;
    }

    Some(Candidate {
        id: Uuid::new_v4(),
        symbol: symbol.to_string(),
        strategy: Strategy::PutCreditSpread,
        sector: sector.map(str::to_string),
        legs: vec![
            CandidateLeg { contract: short.clone(), short: true },
            CandidateLeg { contract: long.clone(), short: false },
        ],
        entry_mid,
        max_profit,
        max_loss,
        breakeven,
        est_pop,
        factor_results: Vec::new(),
        yield_score: None,
        ips_score: None,
        tier: Tier::None,
        historical: None,
        composite_score: None,
        diversity_score: None,
        rationale: None,
    })
}

/// Count of low-weight `FactorResult`s that failed, for the S4 pass rule.
pub fn failed_low_weight_count(results: &[FactorResult]) -> usize {
    results.iter().filter(|r| !r.passed).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn put(strike: f64, expiry: NaiveDate, bid: f64, ask: f64, delta: f64) -> OptionContract {
        OptionContract {
            symbol: "AAA".into(),
            expiry,
            strike,
            contract_type: ContractType::P,
            bid: Some(bid),
            ask: Some(ask),
            last: None,
            iv: Some(0.3),
            delta: Some(delta),
            gamma: None,
            theta: None,
            vega: None,
            oi: Some(250),
            volume: Some(100),
            asof: Utc::now(),
        }
    }

    #[test]
    fn short_95_delta_018_long_90_delta_008_economics() {
        // Short 95 delta -0.18, long 90 delta -0.08.
        let expiry = NaiveDate::from_ymd_opt(2026, 3, 20).unwrap();
        let contracts = vec![put(95.0, expiry, 1.05, 1.07, -0.18), put(90.0, expiry, 0.35, 0.37, -0.08)];
        let candidates = generate(StrategyKind::PutCreditSpread, "AAA", None, 100.0, &contracts);
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert!((c.max_profit - 0.70).abs() < 1e-6, "max_profit={}", c.max_profit);
        assert!((c.max_loss - 4.30).abs() < 1e-6, "max_loss={}", c.max_loss);
        assert!((c.width() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn width_invariant_holds_to_the_cent() {
        let expiry = NaiveDate::from_ymd_opt(2026, 3, 20).unwrap();
        let contracts = vec![put(95.0, expiry, 1.05, 1.07, -0.18), put(90.0, expiry, 0.35, 0.37, -0.08)];
        let candidates = generate(StrategyKind::PutCreditSpread, "AAA", None, 100.0, &contracts);
        let c = &candidates[0];
        assert!((c.width() - (c.legs[0].contract.strike - c.legs[1].contract.strike)).abs() < 1e-9);
    }

    #[test]
    fn delta_boundary_half_is_considered_but_above_is_skipped() {
        let expiry = NaiveDate::from_ymd_opt(2026, 3, 20).unwrap();
        let eps = 1e-9;
        let at_boundary = vec![
            put(95.0, expiry, 1.0, 1.1, -(MAX_SHORT_DELTA - eps)),
            put(90.0, expiry, 0.3, 0.4, -0.1),
        ];
        assert_eq!(generate(StrategyKind::PutCreditSpread, "AAA", None, 100.0, &at_boundary).len(), 1);

        let above_boundary = vec![
            put(95.0, expiry, 1.0, 1.1, -(MAX_SHORT_DELTA + eps)),
            put(90.0, expiry, 0.3, 0.4, -0.1),
        ];
        assert_eq!(generate(StrategyKind::PutCreditSpread, "AAA", None, 100.0, &above_boundary).len(), 0);
    }

    #[test]
    fn risk_reward_exactly_0_15_is_rejected() {
        // width=5, want max_profit/max_loss == 0.15 exactly: entry_mid = 0.15*(5-entry_mid)
        // => entry_mid = 0.75/1.15 = 0.652173913...
        let expiry = NaiveDate::from_ymd_opt(2026, 3, 20).unwrap();
        let entry_mid = 0.15 * 5.0 / 1.15;
        let short_mid = 50.0;
        let long_mid = short_mid - entry_mid;
        let contracts = vec![
            put(55.0, expiry, short_mid - 0.01, short_mid + 0.01, -0.2),
            put(50.0, expiry, long_mid - 0.01, long_mid + 0.01, -0.05),
        ];
        assert_eq!(generate(StrategyKind::PutCreditSpread, "AAA", None, 60.0, &contracts).len(), 0);
    }

    #[test]
    fn falls_back_to_lowest_strike_when_fewer_than_two_remain() {
        let expiry = NaiveDate::from_ymd_opt(2026, 3, 20).unwrap();
        // Only two strikes total: i=0 (short) has no i+2, falls back to last (i=1).
        let contracts = vec![put(95.0, expiry, 1.0, 1.1, -0.2), put(90.0, expiry, 0.3, 0.4, -0.05)];
        let candidates = generate(StrategyKind::PutCreditSpread, "AAA", None, 100.0, &contracts);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].legs[1].contract.strike, 90.0);
    }

    #[test]
    fn empty_chain_yields_no_candidates() {
        assert!(generate(StrategyKind::PutCreditSpread, "AAA", None, 100.0, &[]).is_empty());
    }

    #[test]
    fn only_first_three_expiries_are_considered() {
        let base = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let mut contracts = Vec::new();
        for week in 0..5 {
            let expiry = base + chrono::Duration::weeks(week);
            contracts.push(put(95.0, expiry, 1.0, 1.1, -0.2));
            contracts.push(put(90.0, expiry, 0.3, 0.4, -0.05));
        }
        let candidates = generate(StrategyKind::PutCreditSpread, "AAA", None, 100.0, &contracts);
        let distinct_expiries: std::collections::HashSet<_> = candidates.iter().map(|c| c.legs[0].contract.expiry).collect();
        assert_eq!(distinct_expiries.len(), MAX_EXPIRIES);
    }
}
