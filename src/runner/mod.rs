//! Agent runner
//!
//! Executes exactly one plan step against the context store: contract
//! checks, collaborator call under the step timeout, then an atomic commit
//! of the declared outputs. Collaborator failures become failed records;
//! only contract violations are returned as errors.

use crate::capabilities::{CapabilityDescriptor, CapabilityRegistry, Fields};
use crate::context::{ContextStore, FieldWriter};
use crate::error::OrchestrationError;
use crate::models::{PlanStep, StepError, StepErrorKind, StepExecutionRecord, StepStatus};
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct AgentRunner {
    registry: Arc<CapabilityRegistry>,
    step_timeout: Option<Duration>,
}

impl AgentRunner {
    pub fn new(registry: Arc<CapabilityRegistry>, step_timeout: Option<Duration>) -> Self {
        Self {
            registry,
            step_timeout,
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Run one step. The returned record is not appended to the trace; that
    /// is left to the caller. On `Err` the context is untouched.
    pub async fn run(
        &self,
        step_index: usize,
        step: &PlanStep,
        context: &mut ContextStore,
    ) -> Result<StepExecutionRecord> {
        let descriptor = self.registry.describe(&step.capability)?;
        let collaborator = self.registry.collaborator(&step.capability)?;

        if let Some(field) = context.first_missing(&descriptor.requires) {
            return Err(OrchestrationError::MissingContextField {
                capability: step.capability.clone(),
                field: field.to_string(),
            });
        }

        let inputs = context.subset(descriptor.requires.iter().chain(descriptor.optional.iter()));

        debug!(
            step_index,
            capability = %step.capability,
            inputs = inputs.len(),
            "Invoking capability"
        );

        let started_at = Utc::now();
        let start = Instant::now();

        let invocation = collaborator.invoke(&inputs, &step.parameters);
        let outcome = match self.step_timeout {
            Some(limit) => match tokio::time::timeout(limit, invocation).await {
                Ok(result) => result.map_err(collaborator_error),
                Err(_) => Err(StepError::new(
                    StepErrorKind::Timeout,
                    format!("step exceeded {}s timeout", limit.as_secs_f64()),
                )),
            },
            None => invocation.await.map_err(collaborator_error),
        };

        let committed = outcome.and_then(|produced| {
            let produced = declared_outputs(descriptor, produced)?;
            let writer = FieldWriter::Step {
                index: step_index,
                capability: step.capability.clone(),
            };
            context
                .commit(writer, produced, descriptor.overwrites)
                .map_err(|conflict| StepError::new(StepErrorKind::FieldConflict, conflict.to_string()))
        });

        let finished_at = Utc::now();
        let duration_ms = start.elapsed().as_millis() as u64;

        let (status, fields_written, error) = match committed {
            Ok(written) => {
                debug!(
                    step_index,
                    capability = %step.capability,
                    duration_ms,
                    fields = ?written,
                    "Step succeeded"
                );
                (StepStatus::Succeeded, written, None)
            }
            Err(error) => {
                warn!(
                    step_index,
                    capability = %step.capability,
                    kind = ?error.kind,
                    error = %error.message,
                    "Step failed"
                );
                (StepStatus::Failed, Vec::new(), Some(error))
            }
        };

        Ok(StepExecutionRecord {
            step_index,
            capability: step.capability.clone(),
            parameters: step.parameters.clone(),
            status,
            started_at,
            finished_at,
            duration_ms,
            fields_written,
            error,
        })
    }
}

fn collaborator_error(err: OrchestrationError) -> StepError {
    StepError::new(StepErrorKind::Collaborator, err.to_string())
}

/// Keep only the declared fields; every declared field must be present.
fn declared_outputs(
    descriptor: &CapabilityDescriptor,
    mut produced: Fields,
) -> std::result::Result<Fields, StepError> {
    let mut outputs = Fields::new();

    for field in &descriptor.produces {
        match produced.remove(field) {
            Some(value) => {
                outputs.insert(field.clone(), value);
            }
            None => {
                return Err(StepError::new(
                    StepErrorKind::MalformedOutput,
                    format!("'{}' did not produce declared field '{}'", descriptor.name, field),
                ))
            }
        }
    }

    if !produced.is_empty() {
        warn!(
            capability = %descriptor.name,
            undeclared = ?produced.keys().collect::<Vec<_>>(),
            "Dropping undeclared output fields"
        );
    }

    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{
        analyze_descriptor, CapabilityDescriptor, ANALYZE, DATASET, FETCH, METRICS,
    };
    use crate::models::Request;
    use crate::capabilities::records::Dataset;
    use crate::test_support::{baseline_registry, sample_records, StubCapability};
    use serde_json::json;

    fn runner(registry: CapabilityRegistry) -> AgentRunner {
        AgentRunner::new(Arc::new(registry), Some(Duration::from_secs(5)))
    }

    fn context() -> ContextStore {
        ContextStore::for_request(&Request::new("Show profit trends for Canada")).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_capability_leaves_context_unmodified() {
        let runner = runner(baseline_registry());
        let mut context = context();
        let before = context.digest();

        let err = runner
            .run(0, &PlanStep::new("forecast"), &mut context)
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestrationError::UnknownCapability(name) if name == "forecast"));
        assert_eq!(context.digest(), before);
        assert!(context.trace().is_empty());
    }

    #[tokio::test]
    async fn test_missing_required_field_names_first_absent() {
        let runner = runner(baseline_registry());
        let mut context = context();

        let err = runner
            .run(0, &PlanStep::new(ANALYZE), &mut context)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestrationError::MissingContextField { capability, field }
                if capability == ANALYZE && field == DATASET
        ));
        assert!(!context.contains(METRICS));
    }

    #[tokio::test]
    async fn test_success_writes_declared_fields_with_attribution() {
        let runner = runner(baseline_registry());
        let mut context = context();

        let fetched = runner.run(0, &PlanStep::new(FETCH), &mut context).await.unwrap();
        assert_eq!(fetched.status, StepStatus::Succeeded);

        let analyzed = runner.run(1, &PlanStep::new(ANALYZE), &mut context).await.unwrap();
        assert_eq!(analyzed.status, StepStatus::Succeeded);
        assert_eq!(analyzed.fields_written, vec![METRICS.to_string()]);
        assert_eq!(
            context.entry(METRICS).unwrap().written_by,
            FieldWriter::Step {
                index: 1,
                capability: ANALYZE.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_oversized_fetch_window_returns_a_record() {
        let runner = runner(baseline_registry());
        let mut context = context();
        let step = PlanStep::new(FETCH).with_parameters(json!({ "years": 400_000_000 }));

        let record = runner.run(0, &step, &mut context).await.unwrap();

        assert_eq!(record.status, StepStatus::Succeeded);
        let dataset = Dataset::from_value(context.get(DATASET).unwrap()).unwrap();
        assert_eq!(dataset.rows.len(), sample_records().len());
    }

    #[tokio::test]
    async fn test_collaborator_failure_is_recorded_without_writes() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(
                CapabilityDescriptor::new("load", "loads").produces([DATASET]),
                Arc::new(StubCapability::failing("source offline")),
            )
            .unwrap();
        let runner = runner(registry);
        let mut context = context();

        let record = runner.run(0, &PlanStep::new("load"), &mut context).await.unwrap();

        assert_eq!(record.status, StepStatus::Failed);
        let error = record.error.unwrap();
        assert_eq!(error.kind, StepErrorKind::Collaborator);
        assert!(error.message.contains("source offline"));
        assert!(!context.contains(DATASET));
    }

    #[tokio::test]
    async fn test_partial_output_is_malformed_and_not_committed() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(
                CapabilityDescriptor::new("load", "loads").produces([DATASET, "summary_stats"]),
                Arc::new(StubCapability::producing([(DATASET, json!({ "rows": [] }))])),
            )
            .unwrap();
        let runner = runner(registry);
        let mut context = context();

        let record = runner.run(0, &PlanStep::new("load"), &mut context).await.unwrap();

        assert_eq!(record.status, StepStatus::Failed);
        assert_eq!(record.error.unwrap().kind, StepErrorKind::MalformedOutput);
        assert!(!context.contains(DATASET));
    }

    #[tokio::test]
    async fn test_timeout_is_a_step_failure() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(
                CapabilityDescriptor::new("slow", "never returns in time").produces([DATASET]),
                Arc::new(StubCapability::slow(
                    Duration::from_secs(5),
                    [(DATASET, json!([]))],
                )),
            )
            .unwrap();
        let runner = AgentRunner::new(Arc::new(registry), Some(Duration::from_millis(20)));
        let mut context = context();

        let record = runner.run(0, &PlanStep::new("slow"), &mut context).await.unwrap();

        assert_eq!(record.status, StepStatus::Failed);
        assert_eq!(record.error.unwrap().kind, StepErrorKind::Timeout);
        assert!(!context.contains(DATASET));
    }

    #[tokio::test]
    async fn test_repeated_non_owner_step_conflicts() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(
                analyze_descriptor().requires(Vec::<String>::new()),
                Arc::new(StubCapability::producing([(METRICS, json!({ "total_profit": 1 }))])),
            )
            .unwrap();
        let runner = runner(registry);
        let mut context = context();

        let first = runner.run(0, &PlanStep::new(ANALYZE), &mut context).await.unwrap();
        assert_eq!(first.status, StepStatus::Succeeded);

        let second = runner.run(1, &PlanStep::new(ANALYZE), &mut context).await.unwrap();
        assert_eq!(second.status, StepStatus::Failed);
        assert_eq!(second.error.unwrap().kind, StepErrorKind::FieldConflict);
        assert_eq!(
            context.entry(METRICS).unwrap().written_by,
            FieldWriter::Step {
                index: 0,
                capability: ANALYZE.to_string()
            }
        );
    }
}
