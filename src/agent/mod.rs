//! Main orchestrator
//!
//! REQUEST → PLAN → {CLARIFY | EXECUTE → AGGREGATE}
//!
//! One instance serves every request. The capability registry is shared
//! read-only; each run gets its own context store.

use crate::aggregate::Aggregator;
use crate::capabilities::{create_default_registry, CapabilityDescriptor, CapabilityRegistry};
use crate::clarification::{self, Handoff};
use crate::config::OrchestratorConfig;
use crate::context::ContextStore;
use crate::execution::PipelineExecutor;
use crate::gemini::GeminiClient;
use crate::models::{Outcome, Request};
use crate::planner::{GeminiInterpreter, HeuristicInterpreter, Planner};
use crate::runner::AgentRunner;
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Orchestrator {
    registry: Arc<CapabilityRegistry>,
    planner: Planner,
    executor: PipelineExecutor,
    aggregator: Aggregator,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        planner: Planner,
        executor: PipelineExecutor,
        aggregator: Aggregator,
    ) -> Self {
        Self {
            registry,
            planner,
            executor,
            aggregator,
        }
    }

    /// Wire the baseline capabilities and interpreters from configuration.
    ///
    /// With a Gemini key the LLM plans and the keyword interpreter is the
    /// fallback; without one the keyword interpreter plans alone.
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        let registry = Arc::new(create_default_registry(config)?);

        let planner = match &config.gemini_api_key {
            Some(key) => {
                let client = GeminiClient::new(key.clone(), &config.gemini_model)?;
                Planner::new(Box::new(GeminiInterpreter::new(client)), config.max_plan_steps)
                    .with_fallback(Box::new(HeuristicInterpreter))
            }
            None => {
                warn!("GEMINI_API_KEY not set, planning with keyword heuristics only");
                Planner::new(Box::new(HeuristicInterpreter), config.max_plan_steps)
            }
        };

        let executor = PipelineExecutor::new(AgentRunner::new(registry.clone(), config.step_timeout));

        Ok(Self::new(
            registry,
            planner,
            executor,
            Aggregator::new(config.preview_rows),
        ))
    }

    pub fn capabilities(&self) -> Vec<&CapabilityDescriptor> {
        self.registry.all()
    }

    pub async fn submit(&self, request: Request) -> Result<Outcome> {
        self.submit_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Run one request end to end. Cancellation takes effect at the next
    /// step boundary.
    pub async fn submit_with_cancellation(
        &self,
        request: Request,
        cancel: CancellationToken,
    ) -> Result<Outcome> {
        let start_time = Instant::now();

        info!(
            request_id = %request.request_id,
            text = %request.text,
            hints = !request.hints.is_empty(),
            "Orchestrator: request received"
        );

        // === PLAN ===
        let plan = self.planner.plan(&request, &self.registry).await?;

        // === CLARIFY? ===
        let steps = match clarification::handle(plan, request.request_id) {
            Handoff::Terminal(outcome) => return Ok(outcome),
            Handoff::Execute(steps) => steps,
        };

        // === EXECUTE ===
        let mut context = ContextStore::for_request(&request)?;
        let state = self.executor.execute(&steps, &mut context, &cancel).await?;

        // === AGGREGATE ===
        let bundle = self.aggregator.aggregate(&context);

        info!(
            request_id = %request.request_id,
            run_id = %bundle.run_id,
            ?state,
            succeeded = bundle.succeeded.len(),
            failed = bundle.failed.len(),
            skipped = bundle.skipped.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Orchestrator: run complete"
        );

        Ok(Outcome::Completed {
            request_id: request.request_id,
            bundle,
        })
    }
}
