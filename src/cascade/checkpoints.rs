//! Checkpoints C1/C2/C3: each decides PROCEED / REJECT /
//! PROCEED_WITH_CAUTION. At most one `ReasoningDecision` is logged per
//! checkpoint per run, in order C1, C2, C3 — never more than three. A
//! parse failure degrades to REJECT rather than retrying the LLM.

use crate::config::RunnerConfig;
use crate::domain::{Candidate, Checkpoint, Decision, ReasoningDecision};
use crate::error::AgentError;
use crate::provider::{CallContext, Provider};
use crate::reasoning;

use super::stage3::NearMiss;

/// Outcome of a single checkpoint evaluation: either the cascade continues,
/// or the run is terminal here.
pub enum CheckpointOutcome<T> {
    Continue(T),
    Terminal { decision: ReasoningDecision },
}

fn log_entry(checkpoint: Checkpoint, decision: Decision, reasoning: String, threshold_adjustments: Vec<crate::domain::ThresholdAdjustment>) -> ReasoningDecision {
    ReasoningDecision { checkpoint, decision, reasoning, timestamp: chrono::Utc::now(), threshold_adjustments }
}

/// C1, evaluated right after S1. PROCEED automatically if at least one
/// symbol survived; otherwise asks the reasoning provider whether to widen
/// the watchlist (`symbols_to_add`) or give up.
pub async fn c1(provider: &dyn Provider, ctx: &CallContext, survivors: Vec<String>, watchlist: &[String]) -> CheckpointOutcome<Vec<String>> {
    if !survivors.is_empty() {
        return CheckpointOutcome::Continue(survivors);
    }

    let prompt = reasoning::c1_prompt(survivors.len(), watchlist);
    let response = match provider.reason(ctx, &prompt).await {
        Ok(raw) => reasoning::parse_c1(&raw),
        Err(e) => Err(e),
    };

    match response {
        Ok(parsed) if parsed.decision != Decision::Reject => {
            let mut merged = survivors;
            merged.extend(parsed.symbols_to_add.iter().cloned());
            merged.sort();
            merged.dedup();
            CheckpointOutcome::Continue(merged)
        }
        Ok(parsed) => CheckpointOutcome::Terminal { decision: log_entry(Checkpoint::C1, Decision::Reject, parsed.reasoning, vec![]) },
        Err(e) => CheckpointOutcome::Terminal { decision: unparseable(Checkpoint::C1, &e) },
    }
}

fn unparseable(checkpoint: Checkpoint, e: &AgentError) -> ReasoningDecision {
    log_entry(checkpoint, Decision::Reject, format!("reasoning response unparseable: {e}"), vec![])
}

/// C2, evaluated after S3. PROCEED automatically if at least one candidate
/// passed; otherwise asks whether any threshold should be relaxed. A re-run
/// of S3 under the adjusted thresholds is left as a future extension — this
/// crate records the adjustments and lets the cascade decide whether to
/// re-invoke S3, rather than looping here.
pub async fn c2(
    provider: &dyn Provider,
    ctx: &CallContext,
    passing: Vec<Candidate>,
    near_miss_count: usize,
) -> CheckpointOutcome<(Vec<Candidate>, Vec<crate::domain::ThresholdAdjustment>)> {
    if !passing.is_empty() {
        return CheckpointOutcome::Continue((passing, vec![]));
    }

    let prompt = reasoning::c2_prompt(passing.len(), near_miss_count);
    let response = match provider.reason(ctx, &prompt).await {
        Ok(raw) => reasoning::parse_c2(&raw),
        Err(e) => Err(e),
    };

    match response {
        Ok(parsed) if parsed.decision != Decision::Reject => CheckpointOutcome::Continue((passing, parsed.threshold_adjustments)),
        Ok(parsed) => CheckpointOutcome::Terminal { decision: log_entry(Checkpoint::C2, Decision::Reject, parsed.reasoning, vec![]) },
        Err(e) => CheckpointOutcome::Terminal { decision: unparseable(Checkpoint::C2, &e) },
    }
}

/// Near-miss candidates retained for the C3 "no passing candidates"
/// fallback: sorted by fewest violations first, then by richest
/// premium, capped at 20.
fn rank_near_misses(mut near_misses: Vec<NearMiss>) -> Vec<NearMiss> {
    near_misses.sort_by(|a, b| a.violation_count.cmp(&b.violation_count).then(b.candidate.entry_mid.partial_cmp(&a.candidate.entry_mid).unwrap_or(std::cmp::Ordering::Equal)));
    near_misses.truncate(20);
    near_misses
}

pub enum C3Outcome {
    Proceed(Vec<Candidate>),
    RejectedWithNearMisses { candidates: Vec<Candidate>, decision: ReasoningDecision },
    Terminal { decision: ReasoningDecision },
}

/// C3, evaluated after S4. PROCEED automatically if candidates remain.
/// If none remain but near-misses exist, surfaces up to 20 of them (ranked,
/// IPS/tier scored) as a REJECT result rather than an empty one. Only when
/// neither exists does it fall back to a final reasoning call.
pub async fn c3(
    provider: &dyn Provider,
    ctx: &CallContext,
    config: &RunnerConfig,
    passing: Vec<Candidate>,
    near_misses: Vec<NearMiss>,
) -> C3Outcome {
    if !passing.is_empty() {
        return C3Outcome::Proceed(passing);
    }

    if !near_misses.is_empty() {
        let ranked = rank_near_misses(near_misses);
        let candidates: Vec<Candidate> = ranked
            .into_iter()
            .map(|nm| {
                let mut cand = nm.candidate;
                cand.ips_score = Some(crate::scoring::ips_score(&cand));
                cand.tier = crate::scoring::tier_for(cand.ips_score.unwrap_or(0.0), config);
                cand
            })
            .collect();
        let decision = log_entry(Checkpoint::C3, Decision::Reject, format!("{} candidates surfaced from near-misses; no candidate fully passed the cascade.", candidates.len()), vec![]);
        return C3Outcome::RejectedWithNearMisses { candidates, decision };
    }

    let prompt = reasoning::c3_prompt(0, 0);
    let response = match provider.reason(ctx, &prompt).await {
        Ok(raw) => reasoning::parse_c3(&raw),
        Err(e) => Err(e),
    };

    match response {
        Ok(parsed) => C3Outcome::Terminal { decision: log_entry(Checkpoint::C3, parsed.decision, parsed.reasoning, vec![]) },
        Err(e) => C3Outcome::Terminal { decision: unparseable(Checkpoint::C3, &e) },
    }
}
