//! S4 — low-weight chain filter: re-evaluates S3 survivors
//! against every `scope=chain` factor with normalized weight below
//! `high_weight_threshold`. A candidate passes iff fewer than half of those
//! factors fail (`failed_count < ceil(0.5 * N_low)`); the full S3+S4
//! factor-result set stays attached for scoring downstream.

use std::collections::HashMap;

use crate::config::RunnerConfig;
use crate::domain::{Candidate, Factor, FactorScope, IpsConfig};
use crate::ips::context::{FactorContext, HistoricalIvContext};
use crate::ips::registry::evaluate;

use super::context;
use super::stage2::SymbolChain;

pub struct Stage4Result {
    pub passing: Vec<Candidate>,
    pub near_misses: Vec<Candidate>,
}

fn low_weight_chain_factors<'a>(ips: &'a IpsConfig, config: &RunnerConfig) -> Vec<&'a Factor> {
    ips.factors.iter().filter(|f| f.scope == FactorScope::Chain && f.enabled && f.weight < config.high_weight_threshold).collect()
}

pub fn run(ips: &IpsConfig, config: &RunnerConfig, chains: &HashMap<String, SymbolChain>, historical_iv: &HashMap<String, HistoricalIvContext>, survivors: Vec<Candidate>) -> Stage4Result {
    let factors = low_weight_chain_factors(ips, config);
    let max_failures = (factors.len() as f64 * 0.5).ceil() as usize;

    let mut passing = Vec::new();
    let mut near_misses = Vec::new();

    for mut cand in survivors {
        let Some(chain) = chains.get(&cand.symbol) else {
            // Chain vanished between S3 and S4 (shouldn't happen in one run, but
            // nothing to evaluate against, so treat as a near-miss rather than panic).
            near_misses.push(cand);
            continue;
        };
        let short_leg = cand.legs.iter().find(|l| l.short).expect("generator always attaches a short leg");
        let now = chrono::Utc::now();
        let fc = FactorContext {
            leg: Some(context::leg_context(&short_leg.contract, now)),
            chain: chain.metrics.clone(),
            historical_iv: historical_iv.get(&cand.symbol).cloned().unwrap_or_default(),
            market: crate::ips::context::MarketMetrics { price: Some(chain.price), ..Default::default() },
            ..FactorContext::default()
        };

        let mut failed = 0usize;
        for factor in &factors {
            let result = evaluate(&fc, factor);
            if !result.passed {
                failed += 1;
            }
            cand.factor_results.push(result);
        }

        if factors.is_empty() || failed < max_failures {
            passing.push(cand);
        } else {
            near_misses.push(cand);
        }
    }

    Stage4Result { passing, near_misses }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Candidate, CandidateLeg, ContractType, Direction, OptionContract, Strategy, Tier};
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn put(strike: f64, oi: u64) -> OptionContract {
        OptionContract {
            symbol: "AAA".into(),
            expiry: NaiveDate::from_ymd_opt(2026, 3, 20).unwrap(),
            strike,
            contract_type: ContractType::P,
            bid: Some(1.0),
            ask: Some(1.1),
            last: None,
            iv: Some(0.3),
            delta: Some(-0.18),
            gamma: None,
            theta: None,
            vega: None,
            oi: Some(oi),
            volume: Some(10),
            asof: Utc::now(),
        }
    }

    fn candidate(symbol: &str, oi: u64) -> Candidate {
        Candidate {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            strategy: Strategy::PutCreditSpread,
            sector: None,
            legs: vec![CandidateLeg { contract: put(95.0, oi), short: true }, CandidateLeg { contract: put(90.0, oi), short: false }],
            entry_mid: 0.70,
            max_profit: 0.70,
            max_loss: 4.30,
            breakeven: 94.30,
            est_pop: 0.7,
            factor_results: vec![],
            yield_score: None,
            ips_score: None,
            tier: Tier::None,
            historical: None,
            composite_score: None,
            diversity_score: None,
            rationale: None,
        }
    }

    fn low_factor(key: &str, direction: Direction, threshold: f64) -> Factor {
        Factor { key: key.into(), display_name: key.into(), scope: FactorScope::Chain, weight: 0.02, direction, threshold, threshold_max: None, enabled: true }
    }

    fn chains_with(symbol: &str, price: f64) -> HashMap<String, SymbolChain> {
        let mut m = HashMap::new();
        m.insert(symbol.to_string(), SymbolChain { price, contracts: vec![], metrics: Default::default() });
        m
    }

    #[test]
    fn majority_pass_keeps_candidate() {
        let ips = IpsConfig {
            id: "ips1".into(),
            name: "t".into(),
            factors: vec![low_factor("opt-open-interest", Direction::Gte, 100.0), low_factor("opt-bid-ask-spread", Direction::Lte, 1.0)],
        };
        let config = RunnerConfig::default();
        let chains = chains_with("AAA", 100.0);
        let result = run(&ips, &config, &chains, &HashMap::new(), vec![candidate("AAA", 250)]);
        assert_eq!(result.passing.len(), 1);
        assert!(result.near_misses.is_empty());
    }

    #[test]
    fn majority_fail_drops_to_near_miss() {
        let ips = IpsConfig {
            id: "ips1".into(),
            name: "t".into(),
            factors: vec![low_factor("opt-open-interest", Direction::Gte, 10_000.0), low_factor("opt-bid-ask-spread", Direction::Lte, 0.0001)],
        };
        let config = RunnerConfig::default();
        let chains = chains_with("AAA", 100.0);
        let result = run(&ips, &config, &chains, &HashMap::new(), vec![candidate("AAA", 250)]);
        assert!(result.passing.is_empty());
        assert_eq!(result.near_misses.len(), 1);
    }

    #[test]
    fn missing_chain_is_a_near_miss_not_a_panic() {
        let ips = IpsConfig { id: "ips1".into(), name: "t".into(), factors: vec![] };
        let config = RunnerConfig::default();
        let result = run(&ips, &config, &HashMap::new(), &HashMap::new(), vec![candidate("ZZZ", 250)]);
        assert_eq!(result.near_misses.len(), 1);
    }
}
