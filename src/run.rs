//! Run Controller: owns a run end to end — opens it, drives the
//! cascade, scores and ranks survivors, attaches rationale, and exposes
//! `StartRun`/`GetRun`/`CancelRun` as plain async methods for the
//! transport layer to call. It is the one place that owns `JobProgress`
//! and a run's lifecycle.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cascade;
use crate::config::RunnerConfig;
use crate::domain::{Candidate, HistoricalAnalysis, JobProgress, ReasoningDecision, Run, RunError, RunMode, RunStatus};
use crate::error::AgentError;
use crate::ips::model::IpsStore;
use crate::provider::gateway::ToolLog;
use crate::provider::{CallContext, Provider};
use crate::reasoning;
use crate::repository::RunRepository;
use crate::scoring;

struct RunHandle {
    cancellation: CancellationToken,
    progress: JobProgress,
    status: RunStatus,
    selected: Vec<Candidate>,
    errors: Vec<RunError>,
    decisions: Vec<ReasoningDecision>,
    error_kind: Option<String>,
    error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunView {
    pub status: RunStatus,
    pub progress: JobProgress,
    pub selected: Vec<Candidate>,
    pub errors: Vec<RunError>,
    pub decisions: Vec<ReasoningDecision>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

pub struct RunController {
    provider: Arc<dyn Provider>,
    ips_store: Arc<dyn IpsStore>,
    repo: Arc<dyn RunRepository>,
    config: RunnerConfig,
    handles: DashMap<Uuid, RunHandle>,
    /// The gateway's process-wide tool log, if the wired `Provider` is a
    /// `RateLimitedGateway`. When present, each run's slice of entries is
    /// drained and persisted via `RunRepository::log_tool` at completion.
    tool_log: Option<Arc<ToolLog>>,
}

impl RunController {
    pub fn new(provider: Arc<dyn Provider>, ips_store: Arc<dyn IpsStore>, repo: Arc<dyn RunRepository>, config: RunnerConfig) -> Self {
        Self { provider, ips_store, repo, config, handles: DashMap::new(), tool_log: None }
    }

    /// Wires the gateway's tool log so completed runs persist their own
    /// slice of it through the repository's `LogTool` operation.
    pub fn with_tool_log(mut self, tool_log: Arc<ToolLog>) -> Self {
        self.tool_log = Some(tool_log);
        self
    }

    /// Creates a run and drives it to completion in the background, returning
    /// its id immediately without blocking on the full cascade.
    pub async fn start_run(self: &Arc<Self>, symbols: Vec<String>, mode: RunMode, ips_id: String, user_id: String) -> Result<Uuid, AgentError> {
        let ips = self.ips_store.load(&ips_id)?;

        let run_id = Uuid::new_v4();
        let run = Run::new(run_id, symbols.clone(), mode, ips_id.clone(), user_id.clone(), chrono::Utc::now());
        self.repo.open_run(&run).await?;

        let cancellation = CancellationToken::new();
        self.handles.insert(
            run_id,
            RunHandle {
                cancellation: cancellation.clone(),
                progress: JobProgress::init(symbols.len() as u32),
                status: RunStatus::Pending,
                selected: Vec::new(),
                errors: Vec::new(),
                decisions: Vec::new(),
                error_kind: None,
                error_message: None,
            },
        );

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller.drive(run_id, run, ips, symbols, user_id, cancellation).await;
        });

        Ok(run_id)
    }

    fn advance(&self, run_id: Uuid, step: &str, message: impl Into<String>) {
        if let Some(mut handle) = self.handles.get_mut(&run_id) {
            handle.progress.advance(step, message);
        }
    }

    async fn drive(&self, run_id: Uuid, mut run: Run, ips: crate::domain::IpsConfig, symbols: Vec<String>, user_id: String, cancellation: CancellationToken) {
        if let Some(mut handle) = self.handles.get_mut(&run_id) {
            handle.status = RunStatus::Running;
        }
        if let Err(e) = run.transition(RunStatus::Running) {
            tracing::error!(%run_id, error = %e, "illegal run transition to running");
            return;
        }

        let ctx = CallContext::new(cancellation).with_run_id(run_id);
        self.advance(run_id, "fetch_ips", "ips loaded");

        let on_progress = |step: &str, message: &str| self.advance(run_id, step, message.to_string());
        let cascade_outcome = cascade::run(self.provider.as_ref(), &ctx, self.repo.as_ref(), run_id, &ips, &self.config, &symbols, &on_progress).await;

        let mut errors = cascade_outcome.errors;
        let mut selected = cascade_outcome.selected;
        let decisions = cascade_outcome.decisions;

        if let Some(fatal) = cascade_outcome.fatal {
            self.finish_failed(run_id, &mut run, fatal, errors, selected, decisions).await;
            return;
        }

        if !cascade_outcome.bypass_scoring {
            for candidate in &mut selected {
                candidate.yield_score = Some(scoring::yield_score(candidate));
                candidate.ips_score = Some(scoring::ips_score(candidate));

                let historical = match scoring::historical_correlation(self.provider.as_ref(), &ctx, &self.config, candidate, &ips.id, &user_id).await {
                    Ok(h) => h,
                    Err(e) => {
                        errors.push(RunError { kind: e.kind().to_string(), message: e.to_string(), symbol: Some(candidate.symbol.clone()) });
                        HistoricalAnalysis::no_data()
                    }
                };
                candidate.composite_score = Some(scoring::composite_score(candidate.yield_score.unwrap_or(0.0), candidate.ips_score.unwrap_or(0.0), &historical));
                candidate.tier = scoring::tier_for(candidate.ips_score.unwrap_or(0.0), &self.config);
                candidate.historical = Some(historical);
            }
            self.advance(run_id, "scoring", "scored");

            selected = scoring::select(selected, &self.config);

            for candidate in &mut selected {
                let tier_label = format!("{:?}", candidate.tier).to_lowercase();
                let prompt = reasoning::rationale_prompt(&candidate.symbol, &format!("{:?}", candidate.strategy), candidate.composite_score.unwrap_or(0.0), &tier_label);
                let rationale = match self.provider.reason(&ctx, &prompt).await {
                    Ok(raw) => match reasoning::parse_rationale(&raw) {
                        Ok(parsed) => crate::domain::Rationale {
                            rationale: parsed.rationale,
                            news_summary: parsed.news_summary,
                            macro_context: parsed.macro_context,
                            out_of_ips_justification: parsed.out_of_ips_justification,
                        },
                        Err(_) => fallback_rationale(candidate, &tier_label),
                    },
                    Err(_) => fallback_rationale(candidate, &tier_label),
                };
                candidate.rationale = Some(rationale);
                let _ = self.repo.persist_candidate(run_id, candidate).await;
            }
        } else {
            for candidate in &selected {
                let _ = self.repo.persist_candidate(run_id, candidate).await;
            }
        }

        if let Some(tool_log) = &self.tool_log {
            for entry in tool_log.drain_for_run(run_id).await {
                let _ = self.repo.log_tool(run_id, entry).await;
            }
        }

        run.errors = errors.clone();
        let final_status = RunStatus::Completed;
        if run.transition(final_status).is_ok() {
            let _ = self.repo.close_run(&run).await;
        }

        if let Some(mut handle) = self.handles.get_mut(&run_id) {
            handle.status = final_status;
            handle.progress.advance("complete", format!("{} candidates selected", selected.len()));
            handle.progress.candidates_found = selected.len() as u32;
            handle.errors = errors;
            handle.decisions = decisions;
            handle.selected = selected;
        }
    }

    /// Marks `run` `Failed` with the cascade's fatal error, persists whatever
    /// partial state it had accumulated, and leaves scoring/rationale/tool-log
    /// persistence untouched — those only ever run for a completed cascade.
    async fn finish_failed(&self, run_id: Uuid, run: &mut Run, fatal: AgentError, errors: Vec<RunError>, selected: Vec<Candidate>, decisions: Vec<ReasoningDecision>) {
        run.errors = errors.clone();
        let error_kind = fatal.kind().to_string();
        let error_message = fatal.to_string();
        if run.fail(&fatal).is_ok() {
            let _ = self.repo.close_run(run).await;
        }

        if let Some(mut handle) = self.handles.get_mut(&run_id) {
            handle.status = RunStatus::Failed;
            handle.progress.advance(&error_kind, error_message.clone());
            handle.errors = errors;
            handle.decisions = decisions;
            handle.selected = selected;
            handle.error_kind = Some(error_kind);
            handle.error_message = Some(error_message);
        }
    }

    /// Returns the current view of a run.
    pub fn get_run(&self, run_id: Uuid) -> Option<RunView> {
        let handle = self.handles.get(&run_id)?;
        Some(RunView {
            status: handle.status,
            progress: handle.progress.clone(),
            selected: handle.selected.clone(),
            errors: handle.errors.clone(),
            decisions: handle.decisions.clone(),
            error_kind: handle.error_kind.clone(),
            error_message: handle.error_message.clone(),
        })
    }

    /// Signals cancellation. The run's cancellation token is checked at
    /// every provider call boundary; in-flight work unwinds to whatever
    /// stage it's in rather than stopping mid-call.
    pub fn cancel_run(&self, run_id: Uuid) -> bool {
        if let Some(handle) = self.handles.get(&run_id) {
            handle.cancellation.cancel();
            true
        } else {
            false
        }
    }
}

fn fallback_rationale(candidate: &Candidate, tier_label: &str) -> crate::domain::Rationale {
    let fallback = reasoning::fallback_rationale(&candidate.symbol, candidate.composite_score.unwrap_or(0.0), tier_label, candidate.yield_score.unwrap_or(0.0), candidate.ips_score.unwrap_or(0.0));
    crate::domain::Rationale { rationale: fallback.rationale, news_summary: fallback.news_summary, macro_context: fallback.macro_context, out_of_ips_justification: fallback.out_of_ips_justification }
}
