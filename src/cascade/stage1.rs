//! S1 — general pre-filter: evaluates every `scope=general`,
//! normalized-weight ≥ `high_weight_threshold` factor against each watchlist
//! symbol. A symbol survives iff all such factors pass; provider fetch
//! errors fail the symbol open (it survives, error recorded) rather than
//! dropping it, since its mandatory inputs (quote, overview) are the only
//! hard dependency.

use std::collections::HashMap;

use futures::future::join_all;

use super::context;
use crate::config::RunnerConfig;
use crate::domain::{Factor, FactorScope, IpsConfig, RunError};
use crate::ips::registry::evaluate;
use crate::provider::{CallContext, OverviewValue, Provider};

pub struct Stage1Result {
    pub survivors: Vec<String>,
    pub sectors: HashMap<String, String>,
    pub errors: Vec<RunError>,
}

fn high_weight_general_factors<'a>(ips: &'a IpsConfig, config: &RunnerConfig) -> Vec<&'a Factor> {
    ips.factors.iter().filter(|f| f.scope == FactorScope::General && f.enabled && f.weight >= config.high_weight_threshold).collect()
}

pub async fn run(provider: &dyn Provider, ctx: &CallContext, ips: &IpsConfig, config: &RunnerConfig, watchlist: &[String]) -> Stage1Result {
    let macro_series = context::build_macro_series(provider, ctx).await;
    let factors = high_weight_general_factors(ips, config);

    let tasks = watchlist.iter().map(|symbol| {
        let macro_series = macro_series.clone();
        async move {
            let result = context::build_general_context(provider, ctx, symbol).await;
            (symbol.clone(), result, macro_series)
        }
    });
    let outcomes = join_all(tasks).await;

    let mut survivors = Vec::new();
    let mut sectors = HashMap::new();
    let mut errors = Vec::new();

    for (symbol, result, macro_series) in outcomes {
        match result {
            Ok(mut fc) => {
                fc.macro_series = macro_series;
                if let Some(OverviewValue::Text(sector)) = fc.overview.as_ref().and_then(|o| o.get("Sector")) {
                    sectors.insert(symbol.clone(), sector.clone());
                }
                let all_pass = factors.iter().all(|f| evaluate(&fc, f).passed);
                if all_pass {
                    survivors.push(symbol);
                }
            }
            Err(e) => {
                // Fail-open: mandatory-data fetch error, symbol survives anyway.
                errors.push(RunError { kind: e.kind().to_string(), message: e.to_string(), symbol: Some(symbol.clone()) });
                survivors.push(symbol);
            }
        }
    }

    Stage1Result { survivors, sectors, errors }
}
