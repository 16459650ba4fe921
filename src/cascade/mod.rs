//! The filter cascade: S1 → C1 → S2 → S3 → C2 → S4 → C3, run
//! strictly sequentially per run — no intra-run loops beyond this
//! fixed 7-step sequence. Each checkpoint can stop the run early; the
//! driving loop here is the only place that sequence is encoded.

pub mod checkpoints;
pub mod context;
pub mod stage1;
pub mod stage2;
pub mod stage3;
pub mod stage4;

use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::domain::{Candidate, IpsConfig, ReasoningDecision, RunError};
use crate::error::AgentError;
use crate::provider::{CallContext, Provider};
use crate::repository::RunRepository;

use checkpoints::{c1, c2, c3, C3Outcome, CheckpointOutcome};
use stage3::NearMiss;

pub struct RunOutcome {
    pub selected: Vec<Candidate>,
    pub decisions: Vec<ReasoningDecision>,
    pub errors: Vec<RunError>,
    /// True when `selected` came from the C3 near-miss fallback: those
    /// candidates already carry an IPS score/tier and must skip
    /// composite-scoring, historical correlation and rationale generation.
    pub bypass_scoring: bool,
    /// Set when the cascade must abort the run rather than complete it —
    /// currently only `Cancelled`, detected at every stage boundary.
    /// `selected`/`decisions`/`errors` still hold whatever was accumulated
    /// before the abort; the caller is responsible for marking the run
    /// `Failed` rather than `Completed`.
    pub fatal: Option<AgentError>,
}

/// Called between every stage so a cancellation requested mid-run is
/// noticed at the next boundary rather than only after the whole cascade
/// (and its fail-open per-symbol error handling) has run to completion.
fn check_cancelled(ctx: &CallContext, decisions: Vec<ReasoningDecision>, errors: Vec<RunError>) -> Option<RunOutcome> {
    ctx.is_cancelled().then(|| RunOutcome { selected: vec![], decisions, errors, bypass_scoring: false, fatal: Some(AgentError::Cancelled) })
}

fn near_miss_violation_count(candidate: &Candidate) -> usize {
    candidate.factor_results.iter().filter(|r| !r.passed).count()
}

pub async fn run(
    provider: &dyn Provider,
    ctx: &CallContext,
    repo: &dyn RunRepository,
    run_id: Uuid,
    ips: &IpsConfig,
    config: &RunnerConfig,
    watchlist: &[String],
    on_progress: &(dyn Fn(&str, &str) + Sync),
) -> RunOutcome {
    let mut errors = Vec::new();
    let mut decisions = Vec::new();

    if let Some(aborted) = check_cancelled(ctx, decisions.clone(), errors.clone()) {
        return aborted;
    }

    let s1 = stage1::run(provider, ctx, ips, config, watchlist).await;
    errors.extend(s1.errors);
    let sectors = s1.sectors;
    on_progress("prefilter", "general pre-filter complete");
    if let Some(aborted) = check_cancelled(ctx, decisions.clone(), errors.clone()) {
        return aborted;
    }

    let survivors = match c1(provider, ctx, s1.survivors, watchlist).await {
        CheckpointOutcome::Continue(survivors) => survivors,
        CheckpointOutcome::Terminal { decision } => {
            decisions.push(decision);
            return RunOutcome { selected: vec![], decisions, errors, bypass_scoring: false, fatal: None };
        }
    };

    let s2 = stage2::run(provider, ctx, repo, run_id, &survivors).await;
    errors.extend(s2.errors);
    on_progress("chain_fetch", "options chains fetched");
    if let Some(aborted) = check_cancelled(ctx, decisions.clone(), errors.clone()) {
        return aborted;
    }

    let s3 = stage3::run(provider, ctx, ips, config, &s2.chains, &sectors).await;
    on_progress("high_weight", "high-weight chain filter complete");
    if let Some(aborted) = check_cancelled(ctx, decisions.clone(), errors.clone()) {
        return aborted;
    }

    let (s3_passing, _threshold_adjustments) = match c2(provider, ctx, s3.passing, s3.near_misses.len()).await {
        CheckpointOutcome::Continue(value) => value,
        CheckpointOutcome::Terminal { decision } => {
            decisions.push(decision);
            return RunOutcome { selected: vec![], decisions, errors, bypass_scoring: false, fatal: None };
        }
    };

    let s4 = stage4::run(ips, config, &s2.chains, &s3.historical_iv, s3_passing);
    on_progress("low_weight", "low-weight filter complete");
    if let Some(aborted) = check_cancelled(ctx, decisions.clone(), errors.clone()) {
        return aborted;
    }

    let mut all_near_misses: Vec<NearMiss> = s3.near_misses;
    all_near_misses.extend(s4.near_misses.into_iter().map(|candidate| {
        let violation_count = near_miss_violation_count(&candidate);
        NearMiss { candidate, violation_count, violations: vec![] }
    }));

    match c3(provider, ctx, config, s4.passing, all_near_misses).await {
        C3Outcome::Proceed(selected) => RunOutcome { selected, decisions, errors, bypass_scoring: false, fatal: None },
        C3Outcome::RejectedWithNearMisses { candidates, decision } => {
            decisions.push(decision);
            RunOutcome { selected: candidates, decisions, errors, bypass_scoring: true, fatal: None }
        }
        C3Outcome::Terminal { decision } => {
            decisions.push(decision);
            RunOutcome { selected: vec![], decisions, errors, bypass_scoring: false, fatal: None }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, Factor, FactorScope};
    use crate::provider::stub::StubProvider;
    use crate::provider::{CompanyOverview, OptionsChainResponse, Quote};
    use crate::repository::InMemoryRunRepository;
    use chrono::Utc;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> CallContext {
        CallContext::new(CancellationToken::new())
    }

    fn no_op_progress(_step: &str, _detail: &str) {}

    fn put(strike: f64, delta: f64, oi: u64) -> crate::domain::OptionContract {
        crate::domain::OptionContract {
            symbol: "AAA".into(),
            expiry: chrono::NaiveDate::from_ymd_opt(2026, 3, 20).unwrap(),
            strike,
            contract_type: crate::domain::ContractType::P,
            bid: Some(strike * 0.01),
            ask: Some(strike * 0.01 + 0.02),
            last: None,
            iv: Some(0.3),
            delta: Some(delta),
            gamma: None,
            theta: None,
            vega: None,
            oi: Some(oi),
            volume: Some(10),
            asof: Utc::now(),
        }
    }

    #[tokio::test]
    async fn empty_watchlist_terminates_at_c1_with_no_selected() {
        let stub = StubProvider::new();
        stub.push_reasoning_response("not json");
        let repo = InMemoryRunRepository::new();
        let ips = IpsConfig { id: "ips1".into(), name: "t".into(), factors: vec![] };
        let config = RunnerConfig::default();
        let outcome = run(&stub, &ctx(), &repo, Uuid::new_v4(), &ips, &config, &[], &no_op_progress).await;
        assert!(outcome.selected.is_empty());
        assert_eq!(outcome.decisions.len(), 1);
    }

    #[tokio::test]
    async fn single_symbol_all_pass_reaches_c3_proceed() {
        let stub = StubProvider::new();
        stub.set_quote("AAA", Quote { price: 100.0, volume: 1000, timestamp: Utc::now() });
        stub.set_overview("AAA", CompanyOverview::new());
        stub.set_chain("AAA", OptionsChainResponse { asof: Utc::now(), contracts: vec![put(95.0, -0.18, 250), put(90.0, -0.08, 200)] });
        let repo = InMemoryRunRepository::new();
        let ips = IpsConfig { id: "ips1".into(), name: "t".into(), factors: vec![] };
        let config = RunnerConfig::default();
        let outcome = run(&stub, &ctx(), &repo, Uuid::new_v4(), &ips, &config, &["AAA".to_string()], &no_op_progress).await;
        assert!(!outcome.selected.is_empty());
        assert!(outcome.decisions.is_empty());
        assert!(!outcome.bypass_scoring);
    }

    #[tokio::test]
    async fn near_miss_candidates_surface_at_c3_when_all_fail_high_weight() {
        let stub = StubProvider::new();
        stub.set_quote("AAA", Quote { price: 100.0, volume: 1000, timestamp: Utc::now() });
        stub.set_overview("AAA", CompanyOverview::new());
        stub.set_chain("AAA", OptionsChainResponse { asof: Utc::now(), contracts: vec![put(95.0, -0.60, 250), put(90.0, -0.50, 200)] });
        let repo = InMemoryRunRepository::new();
        let ips = IpsConfig {
            id: "ips1".into(),
            name: "t".into(),
            factors: vec![Factor { key: "opt-delta".into(), display_name: "Delta".into(), scope: FactorScope::Chain, weight: 1.0, direction: Direction::Lte, threshold: 0.2, threshold_max: None, enabled: true }],
        };
        let config = RunnerConfig::default();
        let outcome = run(&stub, &ctx(), &repo, Uuid::new_v4(), &ips, &config, &["AAA".to_string()], &no_op_progress).await;
        assert!(outcome.bypass_scoring);
        assert!(!outcome.selected.is_empty());
        assert_eq!(outcome.decisions.len(), 1);
    }
}
