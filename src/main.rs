#![cfg_attr(test, allow(clippy::float_cmp))]

use std::sync::Arc;

use anyhow::Result;
use rmcp::ServiceExt;
use tracing_subscriber::{self, EnvFilter};

use ips_candidate_agent::config::RunnerConfig;
use ips_candidate_agent::ips::model::InMemoryIpsStore;
use ips_candidate_agent::provider::gateway::RateLimitedGateway;
use ips_candidate_agent::provider::stub::StubProvider;
use ips_candidate_agent::repository::InMemoryRunRepository;
use ips_candidate_agent::run::RunController;
use ips_candidate_agent::server::CandidateAgentServer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = RunnerConfig::from_env();

    // The Agent depends only on the `Provider` trait (Provider Gateway);
    // wiring a concrete market-data/LLM backend is an external concern.
    // `StubProvider` keeps this binary runnable out of the box — swap it
    // for a real `Provider` impl behind `RateLimitedGateway::new`.
    let gateway = RateLimitedGateway::new(StubProvider::new(), &config);
    let tool_log = gateway.tool_log.clone();
    let ips_store = InMemoryIpsStore::new();
    let repo = InMemoryRunRepository::new();

    let controller = Arc::new(RunController::new(Arc::new(gateway), Arc::new(ips_store), Arc::new(repo), config).with_tool_log(tool_log));

    if let Ok(port) = std::env::var("PORT") {
        use rmcp::transport::streamable_http_server::{session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService};

        let service = StreamableHttpService::new(
            move || Ok(CandidateAgentServer::new(controller.clone())),
            LocalSessionManager::default().into(),
            StreamableHttpServerConfig::default(),
        );

        let app = axum::Router::new()
            .nest_service("/mcp", service)
            .route("/health", axum::routing::get(|| async { "ok" }))
            .layer(tower_http::cors::CorsLayer::permissive());

        let addr = format!("0.0.0.0:{port}");
        tracing::info!("Starting ips-candidate-agent HTTP server on {addr}");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
    } else {
        tracing::info!("Starting ips-candidate-agent MCP server (stdio)");

        let server = CandidateAgentServer::new(controller);
        let service = server.serve(rmcp::transport::stdio()).await?;
        service.waiting().await?;
    }

    Ok(())
}
