//! LLM checkpoint/rationale prompt contracts.
//!
//! Every checkpoint and the rationale step parse the reasoning provider's
//! raw text the same way: tolerate surrounding prose, extract the first
//! balanced `{...}` block, then deserialize. That shared extractor lives
//! here once rather than being reimplemented at each call site.

use serde::{Deserialize, Serialize};

use crate::domain::{Decision, ThresholdAdjustment};
use crate::error::AgentError;

/// Finds the first balanced `{...}` block in `text` and returns its slice.
/// Tolerates leading/trailing prose around the JSON block. Returns `None`
/// if braces never balance.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<T, AgentError> {
    let block = extract_json_object(raw).ok_or_else(|| AgentError::ReasoningUnparseable(raw.to_string()))?;
    serde_json::from_str(block).map_err(|e| AgentError::ReasoningUnparseable(format!("{e}: {block}")))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct C1Response {
    pub decision: Decision,
    #[serde(default)]
    pub symbols_to_add: Vec<String>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct C2Response {
    pub decision: Decision,
    #[serde(default)]
    pub threshold_adjustments: Vec<ThresholdAdjustment>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct C3Response {
    pub decision: Decision,
    pub reasoning: String,
    #[serde(default)]
    pub recommendation: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RationaleResponse {
    pub rationale: String,
    #[serde(default)]
    pub news_summary: Option<String>,
    #[serde(default)]
    pub macro_context: Option<String>,
    #[serde(default)]
    pub out_of_ips_justification: Option<String>,
}

pub fn parse_c1(raw: &str) -> Result<C1Response, AgentError> {
    parse(raw)
}

pub fn parse_c2(raw: &str) -> Result<C2Response, AgentError> {
    parse(raw)
}

pub fn parse_c3(raw: &str) -> Result<C3Response, AgentError> {
    parse(raw)
}

pub fn parse_rationale(raw: &str) -> Result<RationaleResponse, AgentError> {
    parse(raw)
}

pub fn c1_prompt(survivor_count: usize, watchlist: &[String]) -> String {
    format!(
        "General pre-filter survivors: {survivor_count} of {} symbols: {:?}.\n\
         Respond as a single JSON object: {{\"decision\": \"PROCEED\"|\"REJECT\"|\"PROCEED_WITH_CAUTION\", \
         \"symbols_to_add\": string[], \"reasoning\": string}}.",
        watchlist.len(),
        watchlist
    )
}

pub fn c2_prompt(candidate_count: usize, near_miss_count: usize) -> String {
    format!(
        "High-weight chain filter: {candidate_count} candidates passed, {near_miss_count} near-missed.\n\
         Respond as a single JSON object: {{\"decision\": \"PROCEED\"|\"REJECT\"|\"PROCEED_WITH_CAUTION\", \
         \"threshold_adjustments\": [{{\"factor\": string, \"old_threshold\": number, \"new_threshold\": number}}], \
         \"reasoning\": string}}."
    )
}

pub fn c3_prompt(candidate_count: usize, near_miss_count: usize) -> String {
    format!(
        "Low-weight filter complete: {candidate_count} candidates survive, {near_miss_count} near-misses available.\n\
         Respond as a single JSON object: {{\"decision\": \"PROCEED\"|\"REJECT\", \"reasoning\": string, \
         \"recommendation\": string}}."
    )
}

pub fn rationale_prompt(symbol: &str, strategy: &str, composite: f64, tier: &str) -> String {
    format!(
        "Candidate {symbol} ({strategy}), composite score {composite:.1}, tier {tier}.\n\
         Respond as a single JSON object: {{\"rationale\": string, \"news_summary\": string|null, \
         \"macro_context\": string|null, \"out_of_ips_justification\": string|null}}."
    )
}

/// Synthesized fallback when the rationale call doesn't parse — the run
/// must not fail just because rationale generation did.
pub fn fallback_rationale(symbol: &str, composite: f64, tier: &str, yield_score: f64, ips_score: f64) -> RationaleResponse {
    RationaleResponse {
        rationale: format!(
            "{symbol}: composite {composite:.1} (tier {tier}), yield score {yield_score:.1}, IPS score {ips_score:.1}."
        ),
        news_summary: None,
        macro_context: None,
        out_of_ips_justification: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_balanced_block_with_surrounding_prose() {
        let text = "Sure, here you go:\n{\"decision\": \"PROCEED\", \"symbols_to_add\": [], \"reasoning\": \"ok\"}\nHope that helps!";
        let block = extract_json_object(text).unwrap();
        assert!(block.starts_with('{') && block.ends_with('}'));
        let parsed: C1Response = parse(text).unwrap();
        assert_eq!(parsed.decision, Decision::Proceed);
    }

    #[test]
    fn nested_braces_stay_balanced() {
        let text = "{\"decision\": \"PROCEED\", \"symbols_to_add\": [], \"reasoning\": \"nested {braces} inside\"}";
        let block = extract_json_object(text).unwrap();
        assert_eq!(block, text);
    }

    #[test]
    fn garbage_response_is_unparseable() {
        let err = parse_c3("sure thing!").unwrap_err();
        assert_eq!(err.kind(), "ReasoningUnparseable");
    }

    #[test]
    fn fallback_rationale_never_panics_and_carries_numbers() {
        let r = fallback_rationale("AAA", 72.5, "quality", 80.0, 65.0);
        assert!(r.rationale.contains("AAA"));
        assert!(r.news_summary.is_none());
    }
}
