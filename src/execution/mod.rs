//! Pipeline executor
//!
//! Drives a validated plan through the agent runner, strictly in order.
//! Step failures never leave this module as errors: after a failure the
//! remaining steps are dry-run against the fields still obtainable, and
//! the pipeline either continues or skips everything left and aborts.

use crate::capabilities::CapabilityRegistry;
use crate::context::ContextStore;
use crate::models::{PlanStep, StepError, StepErrorKind, StepExecutionRecord, StepStatus};
use crate::runner::AgentRunner;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Pending,
    Running { step: usize },
    /// Every step was attempted
    Completed,
    /// A failed step left later steps unsatisfiable; they were skipped
    Aborted { failed_step: usize },
    /// Stopped at a step boundary on request
    Cancelled { at_step: usize },
}

pub struct PipelineExecutor {
    runner: AgentRunner,
}

impl PipelineExecutor {
    pub fn new(runner: AgentRunner) -> Self {
        Self { runner }
    }

    /// Execute `steps` in order against `context`, appending one trace
    /// record per step. Only run-terminating runner errors are returned.
    pub async fn execute(
        &self,
        steps: &[PlanStep],
        context: &mut ContextStore,
        cancel: &CancellationToken,
    ) -> Result<PipelineState> {
        let mut state = PipelineState::Pending;
        debug!(run_id = %context.run_id(), steps = steps.len(), ?state, "Starting pipeline");

        let mut index = 0;
        while index < steps.len() {
            if cancel.is_cancelled() {
                warn!(run_id = %context.run_id(), step_index = index, "Run cancelled");
                skip_remaining(
                    context,
                    steps,
                    index,
                    StepError::new(StepErrorKind::Cancelled, "run cancelled before this step"),
                );
                return Ok(PipelineState::Cancelled { at_step: index });
            }

            state = PipelineState::Running { step: index };
            debug!(?state, capability = %steps[index].capability, "Running step");

            let record = self.runner.run(index, &steps[index], context).await?;
            let failed = record.status == StepStatus::Failed;
            context.record(record);
            index += 1;

            if !failed {
                continue;
            }

            match first_unsatisfiable(self.runner.registry(), context, &steps[index..]) {
                Some((offset, field)) => {
                    let failed_step = index - 1;
                    warn!(
                        run_id = %context.run_id(),
                        failed_step,
                        blocked_step = index + offset,
                        missing_field = %field,
                        "Aborting pipeline, remaining steps depend on failed output"
                    );
                    skip_remaining(
                        context,
                        steps,
                        index,
                        StepError::new(
                            StepErrorKind::DependencyFailed,
                            format!(
                                "step {} ({}) failed; '{}' can no longer be produced",
                                failed_step, steps[failed_step].capability, field
                            ),
                        ),
                    );
                    return Ok(PipelineState::Aborted { failed_step });
                }
                None => {
                    debug!(
                        failed_step = index - 1,
                        "Remaining steps are independent of the failure, continuing"
                    );
                }
            }
        }

        state = PipelineState::Completed;
        info!(run_id = %context.run_id(), steps = steps.len(), ?state, "Pipeline finished");
        Ok(state)
    }
}

/// Dry-run `remaining` over the fields currently present, assuming each
/// step succeeds. Returns the first step (by offset) whose required field
/// cannot be obtained.
fn first_unsatisfiable(
    registry: &CapabilityRegistry,
    context: &ContextStore,
    remaining: &[PlanStep],
) -> Option<(usize, String)> {
    let mut available: BTreeSet<String> = context.field_names().map(str::to_string).collect();

    for (offset, step) in remaining.iter().enumerate() {
        let Ok(descriptor) = registry.describe(&step.capability) else {
            // Surfaced as UnknownCapability when the step is reached
            continue;
        };
        if let Some(field) = descriptor.requires.iter().find(|f| !available.contains(*f)) {
            return Some((offset, field.clone()));
        }
        available.extend(descriptor.produces.iter().cloned());
    }

    None
}

fn skip_remaining(context: &mut ContextStore, steps: &[PlanStep], from: usize, reason: StepError) {
    for (index, step) in steps.iter().enumerate().skip(from) {
        context.record(StepExecutionRecord::skipped(index, step, reason.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::fetch::summary_stats;
    use crate::capabilities::records::Dataset;
    use crate::capabilities::{
        ANALYZE, DATASET, FETCH, METRICS, NARRATIVE, SUMMARIZE, SUMMARY_STATS, VISUALIZE, VISUALS,
    };
    use crate::context::FieldWriter;
    use crate::error::OrchestrationError;
    use crate::models::Request;
    use crate::test_support::{baseline_registry, registry_with, sample_records, StubCapability};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    fn executor(registry: CapabilityRegistry) -> PipelineExecutor {
        PipelineExecutor::new(AgentRunner::new(
            Arc::new(registry),
            Some(Duration::from_secs(5)),
        ))
    }

    fn plan(names: &[&str]) -> Vec<PlanStep> {
        names.iter().map(|n| PlanStep::new(*n)).collect()
    }

    fn statuses(context: &ContextStore) -> Vec<(String, StepStatus)> {
        context
            .trace()
            .iter()
            .map(|r| (r.capability.clone(), r.status))
            .collect()
    }

    fn context() -> ContextStore {
        ContextStore::for_request(&Request::new("Quarterly profit report")).unwrap()
    }

    #[tokio::test]
    async fn test_full_plan_completes() {
        let executor = executor(baseline_registry());
        let mut context = context();

        let state = executor
            .execute(
                &plan(&[FETCH, ANALYZE, VISUALIZE, SUMMARIZE]),
                &mut context,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(state, PipelineState::Completed);
        assert!(context
            .trace()
            .iter()
            .all(|r| r.status == StepStatus::Succeeded));
        assert!(context.contains(NARRATIVE));
    }

    #[tokio::test]
    async fn test_independent_step_failure_does_not_stop_pipeline() {
        let registry = registry_with(VISUALIZE, Arc::new(StubCapability::failing("renderer crashed")));
        let executor = executor(registry);
        let mut context = context();

        let state = executor
            .execute(
                &plan(&[FETCH, ANALYZE, VISUALIZE, SUMMARIZE]),
                &mut context,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(state, PipelineState::Completed);
        assert_eq!(
            statuses(&context),
            vec![
                (FETCH.to_string(), StepStatus::Succeeded),
                (ANALYZE.to_string(), StepStatus::Succeeded),
                (VISUALIZE.to_string(), StepStatus::Failed),
                (SUMMARIZE.to_string(), StepStatus::Succeeded),
            ]
        );
        assert!(context.contains(NARRATIVE));
        assert!(!context.contains(VISUALS));
    }

    #[tokio::test]
    async fn test_dependent_steps_are_skipped_after_failure() {
        let failing_fetch = StubCapability::failing("data source unavailable");
        let registry = registry_with(FETCH, Arc::new(failing_fetch));
        let executor = executor(registry);
        let mut context = context();

        let state = executor
            .execute(
                &plan(&[FETCH, ANALYZE, SUMMARIZE]),
                &mut context,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(state, PipelineState::Aborted { failed_step: 0 });
        assert_eq!(
            statuses(&context),
            vec![
                (FETCH.to_string(), StepStatus::Failed),
                (ANALYZE.to_string(), StepStatus::Skipped),
                (SUMMARIZE.to_string(), StepStatus::Skipped),
            ]
        );
        let skipped = &context.trace()[1];
        assert_eq!(skipped.error.as_ref().unwrap().kind, StepErrorKind::DependencyFailed);
        assert!(!context.contains(DATASET));
        assert!(!context.contains(METRICS));
    }

    #[tokio::test]
    async fn test_abort_skips_independent_steps_before_the_blocked_one() {
        let registry = registry_with(ANALYZE, Arc::new(StubCapability::failing("bad numbers")));
        let executor = executor(registry);
        let mut context = context();

        let state = executor
            .execute(
                &plan(&[FETCH, ANALYZE, VISUALIZE, SUMMARIZE]),
                &mut context,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        // summarize needs metrics, so everything after analyze is skipped
        assert_eq!(state, PipelineState::Aborted { failed_step: 1 });
        assert_eq!(
            statuses(&context),
            vec![
                (FETCH.to_string(), StepStatus::Succeeded),
                (ANALYZE.to_string(), StepStatus::Failed),
                (VISUALIZE.to_string(), StepStatus::Skipped),
                (SUMMARIZE.to_string(), StepStatus::Skipped),
            ]
        );
        assert!(context.contains(DATASET));
        assert!(!context.contains(VISUALS));
    }

    #[tokio::test]
    async fn test_later_producer_of_failed_output_keeps_pipeline_running() {
        let rows = sample_records();
        let fetch = StubCapability::failing_once(
            "transient read error",
            [
                (
                    DATASET,
                    serde_json::to_value(Dataset::new(rows.clone(), serde_json::json!({}))).unwrap(),
                ),
                (SUMMARY_STATS, summary_stats(&rows)),
            ],
        );
        let fetch_calls = fetch.calls();
        let executor = executor(registry_with(FETCH, Arc::new(fetch)));
        let mut context = context();

        let state = executor
            .execute(
                &plan(&[FETCH, FETCH, ANALYZE]),
                &mut context,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(state, PipelineState::Completed);
        assert_eq!(
            statuses(&context),
            vec![
                (FETCH.to_string(), StepStatus::Failed),
                (FETCH.to_string(), StepStatus::Succeeded),
                (ANALYZE.to_string(), StepStatus::Succeeded),
            ]
        );
        assert_eq!(fetch_calls.load(Ordering::SeqCst), 2);
        assert!(context.contains(METRICS));
    }

    #[tokio::test]
    async fn test_cancellation_skips_remaining_steps() {
        let analyze = StubCapability::failing("unused");
        let analyze_calls = analyze.calls();
        let executor = executor(registry_with(ANALYZE, Arc::new(analyze)));
        let mut context = context();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let state = executor
            .execute(&plan(&[FETCH, ANALYZE]), &mut context, &cancel)
            .await
            .unwrap();

        assert_eq!(state, PipelineState::Cancelled { at_step: 0 });
        assert!(context
            .trace()
            .iter()
            .all(|r| r.error.as_ref().map(|e| e.kind) == Some(StepErrorKind::Cancelled)));
        assert_eq!(analyze_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unvalidated_plan_surfaces_runner_error() {
        let executor = executor(baseline_registry());
        let mut context = context();

        let err = executor
            .execute(&plan(&[ANALYZE]), &mut context, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestrationError::MissingContextField { .. }));
    }

    #[tokio::test]
    async fn test_fields_written_only_after_requirements_present() {
        let executor = executor(baseline_registry());
        let registry = baseline_registry();
        let mut context = context();

        executor
            .execute(
                &plan(&[FETCH, ANALYZE, VISUALIZE, SUMMARIZE]),
                &mut context,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        for record in context.trace() {
            let descriptor = registry.describe(&record.capability).unwrap();
            for field in &descriptor.requires {
                let writer = &context.entry(field).unwrap().written_by;
                match writer {
                    FieldWriter::Request => {}
                    FieldWriter::Step { index, .. } => assert!(*index < record.step_index),
                }
                assert!(context.entry(field).unwrap().written_at <= record.finished_at);
            }
        }
    }
}
