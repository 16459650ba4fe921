//! S2 — chain fetch: for each surviving symbol, fetches quote +
//! options chain, computes chain-aggregate metrics, and persists the raw
//! chain (summary + contract rows) under the run id.

use std::collections::HashMap;

use futures::future::join_all;
use uuid::Uuid;

use super::context;
use crate::domain::{OptionContract, RunError};
use crate::ips::context::ChainAggregateMetrics;
use crate::provider::{CallContext, Provider};
use crate::repository::{RawOptionsSnapshot, RunRepository};

pub struct SymbolChain {
    pub price: f64,
    pub contracts: Vec<OptionContract>,
    pub metrics: ChainAggregateMetrics,
}

pub struct Stage2Result {
    pub chains: HashMap<String, SymbolChain>,
    pub errors: Vec<RunError>,
}

pub async fn run(provider: &dyn Provider, ctx: &CallContext, repo: &dyn RunRepository, run_id: Uuid, survivors: &[String]) -> Stage2Result {
    let tasks = survivors.iter().map(|symbol| async move {
        let quote = provider.quote(ctx, symbol).await?;
        let chain = provider.options_chain(ctx, symbol).await?;
        Ok::<_, crate::error::AgentError>((symbol.clone(), quote.price, chain))
    });
    let outcomes = join_all(tasks).await;

    let mut chains = HashMap::new();
    let mut errors = Vec::new();

    for outcome in outcomes {
        match outcome {
            Ok((symbol, price, chain_response)) => {
                let metrics = context::chain_aggregate_metrics(&chain_response.contracts);
                let _ = repo
                    .persist_raw_options(run_id, RawOptionsSnapshot { symbol: symbol.clone(), asof: chain_response.asof, contract_count: chain_response.contracts.len() })
                    .await;
                let _ = repo.persist_contracts(run_id, &symbol, &chain_response.contracts).await;
                chains.insert(symbol, SymbolChain { price, contracts: chain_response.contracts, metrics });
            }
            Err(e) => {
                // Candidate-skipping: the symbol simply has no chain entry downstream.
                errors.push(crate::domain::RunError { kind: e.kind().to_string(), message: e.to_string(), symbol: None });
            }
        }
    }

    Stage2Result { chains, errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::stub::StubProvider;
    use crate::provider::{OptionsChainResponse, Quote};
    use crate::repository::InMemoryRunRepository;
    use chrono::Utc;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> CallContext {
        CallContext::new(CancellationToken::new())
    }

    #[tokio::test]
    async fn empty_chain_does_not_error_the_stage() {
        let stub = StubProvider::new();
        stub.set_quote("AAA", Quote { price: 100.0, volume: 1, timestamp: Utc::now() });
        stub.set_chain("AAA", OptionsChainResponse { asof: Utc::now(), contracts: vec![] });
        let repo = InMemoryRunRepository::new();
        let result = run(&stub, &ctx(), &repo, Uuid::new_v4(), &["AAA".to_string()]).await;
        assert!(result.chains.contains_key("AAA"));
        assert!(result.chains["AAA"].contracts.is_empty());
    }

    #[tokio::test]
    async fn missing_quote_drops_the_symbol_from_chains() {
        let stub = StubProvider::new();
        let repo = InMemoryRunRepository::new();
        let result = run(&stub, &ctx(), &repo, Uuid::new_v4(), &["ZZZ".to_string()]).await;
        assert!(!result.chains.contains_key("ZZZ"));
        assert_eq!(result.errors.len(), 1);
    }
}
