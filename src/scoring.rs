//! Scorer & Selector: yield/IPS/historical composite scoring,
//! tier assignment, RAG-based historical correlation, diversification-
//! constrained selection and rationale attachment.
//!
//! Structured as many small pure functions over a `Candidate`, the same
//! shape as a stat-rollup module over a trade set, with `ordered-float`
//! giving `select` a deterministic float-keyed sort.

use std::collections::HashMap;

use ordered_float::OrderedFloat;

use crate::config::RunnerConfig;
use crate::domain::{Candidate, Confidence, HistoricalAnalysis, Tier};
use crate::error::AgentError;
use crate::provider::{CallContext, Provider, VectorFilter};

/// `min(100, (max_profit / max(max_loss, 1)) * 100)`.
pub fn yield_score(candidate: &Candidate) -> f64 {
    (candidate.max_profit / candidate.max_loss.max(1.0) * 100.0).min(100.0)
}

/// Weighted pass-rate over a candidate's attached factor results:
/// `Σ(weight × (passed ? 100 : 50)) / Σ(weight)`.
pub fn ips_score(candidate: &Candidate) -> f64 {
    let total_weight: f64 = candidate.factor_results.iter().map(|f| f.weight).sum();
    if total_weight <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = candidate.factor_results.iter().map(|f| f.weight * if f.passed { 100.0 } else { 50.0 }).sum();
    weighted / total_weight
}

pub fn tier_for(score: f64, config: &RunnerConfig) -> Tier {
    if score >= config.tier_elite {
        Tier::Elite
    } else if score >= config.tier_quality {
        Tier::Quality
    } else if score >= config.tier_speculative {
        Tier::Speculative
    } else {
        Tier::None
    }
}

/// `0.4·yield + 0.3·ips + 0.3·(win_rate×100)` with data, else `0.6·yield + 0.4·ips`.
pub fn composite_score(yield_score: f64, ips_score: f64, historical: &HistoricalAnalysis) -> f64 {
    if historical.has_data {
        0.4 * yield_score + 0.3 * ips_score + 0.3 * (historical.win_rate * 100.0)
    } else {
        0.6 * yield_score + 0.4 * ips_score
    }
}

fn describe_candidate(candidate: &Candidate) -> String {
    let short = candidate.legs.iter().find(|l| l.short);
    let long = candidate.legs.iter().find(|l| !l.short);
    let (short_strike, long_strike, dte, delta) = match (short, long) {
        (Some(s), Some(l)) => {
            let dte = (s.contract.expiry - chrono::Utc::now().date_naive()).num_days().max(0);
            (s.contract.strike, l.contract.strike, dte, s.contract.delta.unwrap_or(0.0))
        }
        _ => (0.0, 0.0, 0, 0.0),
    };
    format!(
        "{} {:?}: short {short_strike} long {long_strike} dte {dte} delta {delta:.3}",
        candidate.symbol, candidate.strategy
    )
}

/// Bucket confidence by sample size: ≥20 high, ≥8 med, else low.
fn confidence_for(trade_count: usize) -> Confidence {
    if trade_count >= 20 {
        Confidence::High
    } else if trade_count >= 8 {
        Confidence::Med
    } else {
        Confidence::Low
    }
}

/// Embeds a textual description of the candidate and queries the vector
/// store filtered by ips_id/user_id; `has_data=true` requires at
/// least `config.vector_store_k` results.
pub async fn historical_correlation(
    provider: &dyn Provider,
    ctx: &CallContext,
    config: &RunnerConfig,
    candidate: &Candidate,
    ips_id: &str,
    user_id: &str,
) -> Result<HistoricalAnalysis, AgentError> {
    let description = describe_candidate(candidate);
    let embedding = provider.embed(ctx, &description).await?;
    let filter = VectorFilter { ips_id: Some(ips_id.to_string()), user_id: Some(user_id.to_string()) };
    let hits = provider.vector_search(ctx, &embedding, config.vector_store_k, &filter).await?;

    if hits.len() < config.vector_store_k {
        return Ok(HistoricalAnalysis::no_data());
    }

    let mut wins = 0usize;
    let mut roi_sum = 0.0;
    for hit in &hits {
        let pnl = hit.payload.get("realized_pnl").and_then(serde_json::Value::as_f64).unwrap_or(0.0);
        let roi = hit.payload.get("roi").and_then(serde_json::Value::as_f64).unwrap_or(0.0);
        if pnl > 0.0 {
            wins += 1;
        }
        roi_sum += roi;
    }

    Ok(HistoricalAnalysis {
        has_data: true,
        trade_count: hits.len(),
        win_rate: wins as f64 / hits.len() as f64,
        avg_roi: roi_sum / hits.len() as f64,
        confidence: confidence_for(hits.len()),
    })
}

/// Per-candidate diversity relative to the accumulated selection so far:
/// higher when sector/symbol/strategy are less represented.
fn diversity_score(candidate: &Candidate, sector_count: &HashMap<String, usize>, symbol_count: &HashMap<String, usize>, strategy_count: &HashMap<String, usize>) -> f64 {
    let sector_penalty = candidate.sector.as_ref().map_or(0, |s| *sector_count.get(s).unwrap_or(&0));
    let symbol_penalty = *symbol_count.get(&candidate.symbol).unwrap_or(&0);
    let strategy_key = format!("{:?}", candidate.strategy);
    let strategy_penalty = *strategy_count.get(&strategy_key).unwrap_or(&0);
    let total_penalty = (sector_penalty + symbol_penalty + strategy_penalty) as f64;
    (100.0 / (1.0 + total_penalty)).clamp(0.0, 100.0)
}

/// Sorts by `(tier desc, composite desc)`, ties broken `(symbol asc, short
/// strike asc)` for determinism, then applies per-tier slot caps and
/// diversification caps, computing each selected candidate's
/// diversity score along the way.
pub fn select(mut candidates: Vec<Candidate>, config: &RunnerConfig) -> Vec<Candidate> {
    candidates.sort_by_key(|c| (std::cmp::Reverse(c.tier), std::cmp::Reverse(OrderedFloat(c.composite_score.unwrap_or(0.0))), c.symbol.clone(), OrderedFloat(short_strike(c))));

    let mut elite_used = 0;
    let mut quality_used = 0;
    let mut speculative_used = 0;
    let mut sector_count: HashMap<String, usize> = HashMap::new();
    let mut symbol_count: HashMap<String, usize> = HashMap::new();
    let mut strategy_count: HashMap<String, usize> = HashMap::new();

    let mut selected = Vec::new();
    for mut candidate in candidates {
        let slot_ok = match candidate.tier {
            Tier::Elite => elite_used < config.max_elite,
            Tier::Quality => quality_used < config.max_quality,
            Tier::Speculative => speculative_used < config.max_speculative,
            Tier::None => false,
        };
        if !slot_ok {
            continue;
        }

        let sector_ok = match &candidate.sector {
            Some(s) => *sector_count.get(s).unwrap_or(&0) < config.max_per_sector,
            None => true,
        };
        let symbol_ok = *symbol_count.get(&candidate.symbol).unwrap_or(&0) < config.max_per_symbol;
        let strategy_key = format!("{:?}", candidate.strategy);
        let strategy_ok = *strategy_count.get(&strategy_key).unwrap_or(&0) < config.max_per_strategy;
        if !sector_ok || !symbol_ok || !strategy_ok {
            continue;
        }

        candidate.diversity_score = Some(diversity_score(&candidate, &sector_count, &symbol_count, &strategy_count));

        match candidate.tier {
            Tier::Elite => elite_used += 1,
            Tier::Quality => quality_used += 1,
            Tier::Speculative => speculative_used += 1,
            Tier::None => {}
        }
        if let Some(sector) = &candidate.sector {
            *sector_count.entry(sector.clone()).or_insert(0) += 1;
        }
        *symbol_count.entry(candidate.symbol.clone()).or_insert(0) += 1;
        *strategy_count.entry(strategy_key).or_insert(0) += 1;

        selected.push(candidate);
    }
    selected
}

fn short_strike(candidate: &Candidate) -> f64 {
    candidate.legs.iter().find(|l| l.short).map_or(0.0, |l| l.contract.strike)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CandidateLeg, ContractType, OptionContract, Strategy};
    use chrono::Utc;
    use uuid::Uuid;

    fn bare_candidate(symbol: &str, sector: Option<&str>, short_strike: f64, tier: Tier, composite: f64) -> Candidate {
        let leg = OptionContract {
            symbol: symbol.into(),
            expiry: Utc::now().date_naive(),
            strike: short_strike,
            contract_type: ContractType::P,
            bid: Some(1.0),
            ask: Some(1.1),
            last: None,
            iv: None,
            delta: Some(-0.2),
            gamma: None,
            theta: None,
            vega: None,
            oi: None,
            volume: None,
            asof: Utc::now(),
        };
        Candidate {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            strategy: Strategy::PutCreditSpread,
            sector: sector.map(str::to_string),
            legs: vec![CandidateLeg { contract: leg, short: true }],
            entry_mid: 0.7,
            max_profit: 0.7,
            max_loss: 4.3,
            breakeven: short_strike - 0.7,
            est_pop: 0.8,
            factor_results: Vec::new(),
            yield_score: None,
            ips_score: None,
            tier,
            historical: None,
            composite_score: Some(composite),
            diversity_score: None,
            rationale: None,
        }
    }

    #[test]
    fn yield_score_caps_at_100() {
        let mut c = bare_candidate("AAA", None, 95.0, Tier::Elite, 90.0);
        c.max_profit = 10.0;
        c.max_loss = 1.0;
        assert_eq!(yield_score(&c), 100.0);
    }

    #[test]
    fn scenario_2_all_pass_yields_score_100() {
        let mut c = bare_candidate("AAA", None, 95.0, Tier::None, 0.0);
        c.factor_results = vec![
            crate::domain::FactorResult { key: "opt-delta".into(), display_name: "Delta".into(), value: Some(0.18), target: "<= 0.2".into(), passed: true, weight: 0.5 },
            crate::domain::FactorResult { key: "opt-open-interest".into(), display_name: "OI".into(), value: Some(250.0), target: ">= 100".into(), passed: true, weight: 0.5 },
        ];
        assert_eq!(ips_score(&c), 100.0);
    }

    #[test]
    fn no_data_historical_has_zeroed_fields() {
        let h = HistoricalAnalysis::no_data();
        assert_eq!(composite_score(80.0, 70.0, &h), 0.6 * 80.0 + 0.4 * 70.0);
    }

    #[test]
    fn sector_cap_drops_fourth_candidate_in_same_sector() {
        let config = RunnerConfig::default();
        let mut candidates = Vec::new();
        for i in 0..4 {
            let mut c = bare_candidate(&format!("SYM{i}"), Some("Tech"), 95.0, Tier::Elite, 90.0 - i as f64);
            c.tier = Tier::Elite;
            candidates.push(c);
        }
        let selected = select(candidates, &config);
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn symbol_cap_is_two() {
        let config = RunnerConfig::default();
        let mut candidates = Vec::new();
        for i in 0..3 {
            candidates.push(bare_candidate("AAA", Some("Tech"), 90.0 + i as f64, Tier::Quality, 80.0 - i as f64));
        }
        let selected = select(candidates, &config);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn tier_none_is_never_selected() {
        let config = RunnerConfig::default();
        let candidates = vec![bare_candidate("AAA", None, 95.0, Tier::None, 50.0)];
        assert!(select(candidates, &config).is_empty());
    }

    #[test]
    fn selection_order_is_deterministic_by_symbol_then_strike() {
        let config = RunnerConfig::default();
        let candidates = vec![
            bare_candidate("BBB", None, 90.0, Tier::Quality, 80.0),
            bare_candidate("AAA", None, 95.0, Tier::Quality, 80.0),
            bare_candidate("AAA", None, 90.0, Tier::Quality, 80.0),
        ];
        let selected = select(candidates, &config);
        assert_eq!(selected[0].symbol, "AAA");
        assert_eq!(short_strike(&selected[0]), 90.0);
    }
}
