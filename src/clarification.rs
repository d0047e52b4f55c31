//! Clarification handler
//!
//! Pure branch between planning and execution: a clarification question
//! ends the run, an executable plan moves on to the pipeline.

use crate::models::{Outcome, Plan, PlanStep};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum Handoff {
    /// Run ends here; no capability is invoked
    Terminal(Outcome),
    Execute(Vec<PlanStep>),
}

pub fn handle(plan: Plan, request_id: Uuid) -> Handoff {
    match plan {
        Plan::ClarificationNeeded { question } => {
            info!(%request_id, "Returning clarification question instead of executing");
            Handoff::Terminal(Outcome::ClarificationNeeded {
                request_id,
                question,
            })
        }
        Plan::Executable { steps, .. } => Handoff::Execute(steps),
    }
}
