use std::sync::Arc;

use garde::Validate;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Json},
    model::{Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ServerHandler,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Candidate, JobProgress, ReasoningDecision, RunError, RunMode, RunStatus};
use crate::run::RunController;

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct StartRunParams {
    /// Watchlist to evaluate; empty is valid and immediately reaches C1.
    #[garde(length(max = 500))]
    pub symbols: Vec<String>,
    /// "backtest" | "paper" | "live".
    #[garde(skip)]
    pub mode: RunMode,
    /// Which IPS configuration to screen candidates against.
    #[garde(length(min = 1, max = 200))]
    pub ips_id: String,
    /// Owning user id, forwarded to the vector store filter for historical correlation.
    #[garde(length(min = 1, max = 200))]
    pub user_id: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct StartRunResponse {
    pub run_id: Uuid,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct GetRunParams {
    #[garde(skip)]
    pub run_id: Uuid,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct GetRunResponse {
    pub status: RunStatus,
    pub progress: JobProgress,
    pub selected: Vec<Candidate>,
    pub errors: Vec<RunError>,
    pub decisions: Vec<ReasoningDecision>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct CancelRunParams {
    #[garde(skip)]
    pub run_id: Uuid,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct CancelRunResponse {
    pub cancelled: bool,
}

#[derive(Clone)]
pub struct CandidateAgentServer {
    pub controller: Arc<RunController>,
    tool_router: ToolRouter<Self>,
}

impl CandidateAgentServer {
    pub fn new(controller: Arc<RunController>) -> Self {
        Self { controller, tool_router: Self::tool_router() }
    }
}

#[tool_router]
impl CandidateAgentServer {
    /// Start a new candidate-generation run over a watchlist against an IPS.
    ///
    /// Runs asynchronously: returns a run id immediately. Poll `get_run` for
    /// progress and the eventual selected candidate set.
    #[tool(
        name = "start_run",
        annotations(destructive_hint = false, idempotent_hint = false, open_world_hint = true)
    )]
    async fn start_run(&self, Parameters(params): Parameters<StartRunParams>) -> Result<Json<StartRunResponse>, String> {
        params.validate().map_err(|e| format!("Validation error: {e}"))?;
        let run_id = self
            .controller
            .start_run(params.symbols, params.mode, params.ips_id, params.user_id)
            .await
            .map_err(|e| format!("Error: {e}"))?;
        Ok(Json(StartRunResponse { run_id }))
    }

    /// Fetch a run's current status, progress, and (once complete) its
    /// selected candidates, errors and checkpoint reasoning decisions.
    #[tool(name = "get_run", annotations(read_only_hint = true))]
    async fn get_run(&self, Parameters(params): Parameters<GetRunParams>) -> Result<Json<GetRunResponse>, String> {
        params.validate().map_err(|e| format!("Validation error: {e}"))?;
        let view = self.controller.get_run(params.run_id).ok_or_else(|| format!("unknown run id: {}", params.run_id))?;
        Ok(Json(GetRunResponse {
            status: view.status,
            progress: view.progress,
            selected: view.selected,
            errors: view.errors,
            decisions: view.decisions,
            error_kind: view.error_kind,
            error_message: view.error_message,
        }))
    }

    /// Request cancellation of an in-progress run. Cancellation is checked at
    /// provider-call boundaries, so an in-flight call completes before the
    /// run unwinds.
    #[tool(
        name = "cancel_run",
        annotations(destructive_hint = true, idempotent_hint = true, open_world_hint = false)
    )]
    async fn cancel_run(&self, Parameters(params): Parameters<CancelRunParams>) -> Result<Json<CancelRunResponse>, String> {
        params.validate().map_err(|e| format!("Validation error: {e}"))?;
        Ok(Json(CancelRunResponse { cancelled: self.controller.cancel_run(params.run_id) }))
    }
}

#[tool_handler]
impl ServerHandler for CandidateAgentServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "ips-candidate-agent".into(),
                title: Some("IPS Candidate Generation Agent".into()),
                version: "0.1.0".into(),
                description: Some("Screens a watchlist against an Investment Policy Statement and proposes ranked, risk-scored options candidates".into()),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Candidate generation agent. \
                \n\n1. start_run({ symbols, mode, ips_id, user_id }) — kick off a run; \
                returns a run_id immediately. \
                \n2. get_run({ run_id }) — poll for progress; once status is \"completed\", \
                inspect selected (ranked, scored, rationale-attached candidates), errors \
                (non-fatal provider failures encountered along the way) and decisions \
                (the checkpoint reasoning log, at most three entries: C1/C2/C3). \
                \n3. cancel_run({ run_id }) — request early termination of a run still in progress."
                    .into(),
            ),
        }
    }
}
