//! S3 — high-weight chain filter: generates candidates per
//! symbol, evaluates every `scope=chain`, normalized-weight ≥
//! `high_weight_threshold` factor against the short leg. A candidate passes
//! iff all such factors pass; failures go to a parallel near-miss list
//! tagged with both their violation count and the violation strings.

use std::collections::HashMap;

use crate::candidate::{self, StrategyKind};
use crate::config::RunnerConfig;
use crate::domain::{Candidate, Factor, FactorScope, IpsConfig};
use crate::ips::context::{FactorContext, HistoricalIvContext};
use crate::ips::registry::evaluate;
use crate::provider::{CallContext, Provider};

use super::context;
use super::stage2::SymbolChain;

#[derive(Debug, Clone)]
pub struct NearMiss {
    pub candidate: Candidate,
    pub violation_count: usize,
    pub violations: Vec<String>,
}

pub struct Stage3Result {
    pub passing: Vec<Candidate>,
    pub near_misses: Vec<NearMiss>,
    /// Historical IV context per symbol, computed once here and reused by
    /// S4 so the low-weight pass doesn't refetch the same series.
    pub historical_iv: HashMap<String, HistoricalIvContext>,
}

fn high_weight_chain_factors<'a>(ips: &'a IpsConfig, config: &RunnerConfig) -> Vec<&'a Factor> {
    ips.factors.iter().filter(|f| f.scope == FactorScope::Chain && f.enabled && f.weight >= config.high_weight_threshold).collect()
}

/// Finds the ATM contract (closest strike to `price`) to source the
/// current-IV anchor for the chain's IV-rank/percentile factors.
fn atm_iv(contracts: &[crate::domain::OptionContract], price: f64) -> Option<f64> {
    contracts.iter().min_by(|a, b| (a.strike - price).abs().partial_cmp(&(b.strike - price).abs()).unwrap_or(std::cmp::Ordering::Equal)).and_then(|c| c.iv)
}

pub async fn run(
    provider: &dyn Provider,
    ctx: &CallContext,
    ips: &IpsConfig,
    config: &RunnerConfig,
    chains: &HashMap<String, SymbolChain>,
    sectors: &HashMap<String, String>,
) -> Stage3Result {
    let factors = high_weight_chain_factors(ips, config);
    let mut passing = Vec::new();
    let mut near_misses = Vec::new();
    let mut historical_iv_by_symbol = HashMap::new();

    for (symbol, chain) in chains {
        let sector = sectors.get(symbol).map(String::as_str);
        let candidates = candidate::generate(StrategyKind::PutCreditSpread, symbol, sector, chain.price, &chain.contracts);
        if candidates.is_empty() {
            continue;
        }

        let current_iv = atm_iv(&chain.contracts, chain.price);
        let historical_iv = context::build_historical_iv(provider, ctx, symbol, current_iv).await;
        historical_iv_by_symbol.insert(symbol.clone(), historical_iv.clone());

        for mut cand in candidates {
            let short_leg = cand.legs.iter().find(|l| l.short).expect("generator always attaches a short leg");
            let now = chrono::Utc::now();
            let mut fc = FactorContext {
                leg: Some(context::leg_context(&short_leg.contract, now)),
                chain: chain.metrics.clone(),
                historical_iv: historical_iv.clone(),
                ..FactorContext::default()
            };
            fc.market.price = Some(chain.price);

            let mut violations = Vec::new();
            for factor in &factors {
                let result = evaluate(&fc, factor);
                if !result.passed {
                    violations.push(format!("{} ({})", factor.display_name, result.target));
                }
                cand.factor_results.push(result);
            }
            // fc is consumed only for evaluation above; no further use.
            let _ = &mut fc;

            if violations.is_empty() {
                passing.push(cand);
            } else {
                let violation_count = violations.len();
                near_misses.push(NearMiss { candidate: cand, violation_count, violations });
            }
        }
    }

    Stage3Result { passing, near_misses, historical_iv: historical_iv_by_symbol }
}
