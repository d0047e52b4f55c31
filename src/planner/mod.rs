//! Planner and reasoning collaborators
//!
//! The reasoning collaborator turns request text into a candidate plan.
//! Its output is untrusted: the planner parses and validates it against
//! the capability registry, asks for one corrected plan on rejection, and
//! gives up with `PlanningFailed` after that.

use crate::capabilities::{CapabilityDescriptor, CapabilityRegistry, REQUEST_FIELDS};
use crate::error::OrchestrationError;
use crate::models::{empty_parameters, Plan, PlanStep, Request};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod gemini;
pub mod heuristic;

pub use gemini::GeminiInterpreter;
pub use heuristic::HeuristicInterpreter;

/// Initial attempt plus one correction
pub const MAX_PLANNING_ATTEMPTS: usize = 2;

const DEFAULT_CLARIFICATION: &str =
    "Could you describe in more detail which financial data and what kind of report you need?";

/// External natural-language interpretation service
#[async_trait]
pub trait ReasoningCollaborator: Send + Sync {
    fn name(&self) -> &str;

    /// Return a plan-shaped JSON response for `request`. `correction`
    /// carries the validation error of the previous attempt, if any.
    async fn interpret(
        &self,
        request: &Request,
        capabilities: &[CapabilityDescriptor],
        correction: Option<&str>,
    ) -> Result<String>;
}

/// Why a candidate plan was not accepted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanRejection {
    #[error("the plan has no steps")]
    EmptyPlan,

    #[error("the plan has {count} steps, at most {max} are allowed")]
    TooManySteps { count: usize, max: usize },

    #[error("step {step} names unknown capability '{name}'")]
    UnknownCapability { step: usize, name: String },

    #[error("step {step} ({capability}) has invalid parameters: {reason}")]
    InvalidParameters {
        step: usize,
        capability: String,
        reason: String,
    },

    #[error("step {step} ({capability}) requires '{field}', which no earlier step or the request produces")]
    ForwardReference {
        step: usize,
        capability: String,
        field: String,
    },

    #[error("step {step} ({capability}) would overwrite '{field}' without owning it")]
    FieldConflict {
        step: usize,
        capability: String,
        field: String,
    },

    #[error("response is not a valid plan: {0}")]
    Malformed(String),
}

pub struct Planner {
    interpreter: Box<dyn ReasoningCollaborator>,
    /// Used when the primary interpreter cannot be reached
    fallback: Option<Box<dyn ReasoningCollaborator>>,
    max_steps: usize,
}

impl Planner {
    pub fn new(interpreter: Box<dyn ReasoningCollaborator>, max_steps: usize) -> Self {
        Self {
            interpreter,
            fallback: None,
            max_steps,
        }
    }

    pub fn with_fallback(mut self, fallback: Box<dyn ReasoningCollaborator>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Produce a validated plan or a clarification question for `request`.
    pub async fn plan(&self, request: &Request, registry: &CapabilityRegistry) -> Result<Plan> {
        let descriptors: Vec<CapabilityDescriptor> = registry.all().into_iter().cloned().collect();
        let initial_fields: BTreeSet<String> =
            REQUEST_FIELDS.iter().map(|f| f.to_string()).collect();

        let mut interpreter = self.interpreter.as_ref();
        let mut switched = false;
        let mut correction: Option<String> = None;
        let mut last_plan: Option<String> = None;
        let mut reason = String::new();
        let mut attempt = 0;

        while attempt < MAX_PLANNING_ATTEMPTS {
            attempt += 1;
            debug!(
                request_id = %request.request_id,
                attempt,
                interpreter = interpreter.name(),
                "Requesting plan"
            );

            let raw = match interpreter
                .interpret(request, &descriptors, correction.as_deref())
                .await
            {
                Ok(raw) => raw,
                Err(e) => {
                    match self.fallback.as_deref() {
                        Some(fallback) if !switched => {
                            warn!(
                                error = %e,
                                from = interpreter.name(),
                                to = fallback.name(),
                                "Reasoning collaborator unavailable, switching to fallback"
                            );
                            interpreter = fallback;
                            switched = true;
                            // The failed call produced no plan to judge
                            attempt -= 1;
                        }
                        _ => {
                            warn!(error = %e, attempt, "Reasoning collaborator failed");
                            reason = format!("reasoning collaborator failed: {}", e);
                        }
                    }
                    continue;
                }
            };

            let rejection = match parse_response(&raw) {
                Ok(Candidate::Clarification(question)) => {
                    info!(request_id = %request.request_id, "Request needs clarification");
                    return Ok(Plan::ClarificationNeeded { question });
                }
                Ok(Candidate::Steps { steps, rationale }) => {
                    match validate_plan(steps, registry, &initial_fields, self.max_steps) {
                        Ok(steps) => {
                            info!(
                                request_id = %request.request_id,
                                attempt,
                                steps = ?steps.iter().map(|s| s.capability.as_str()).collect::<Vec<_>>(),
                                "Plan accepted"
                            );
                            return Ok(Plan::Executable { steps, rationale });
                        }
                        Err(rejection) => rejection,
                    }
                }
                Err(rejection) => rejection,
            };

            warn!(attempt, rejection = %rejection, "Plan rejected");
            reason = rejection.to_string();
            correction = Some(correction_prompt(&rejection));
            last_plan = Some(raw);
        }

        Err(OrchestrationError::PlanningFailed {
            reason: format!("no valid plan after {} attempts: {}", attempt, reason),
            last_plan,
        })
    }
}

fn correction_prompt(rejection: &PlanRejection) -> String {
    format!(
        "Your previous plan was rejected: {}. Return a corrected plan that uses only the \
         listed capabilities and orders the steps so every required field is produced \
         by the request or by an earlier step.",
        rejection
    )
}

/// Check a candidate plan against the registry.
///
/// Walks the steps in order while tracking which fields are guaranteed to
/// exist; `null` parameters are normalized to an empty object.
pub fn validate_plan(
    steps: Vec<PlanStep>,
    registry: &CapabilityRegistry,
    initial_fields: &BTreeSet<String>,
    max_steps: usize,
) -> std::result::Result<Vec<PlanStep>, PlanRejection> {
    if steps.is_empty() {
        return Err(PlanRejection::EmptyPlan);
    }
    if steps.len() > max_steps {
        return Err(PlanRejection::TooManySteps {
            count: steps.len(),
            max: max_steps,
        });
    }

    let mut available = initial_fields.clone();
    let mut validated = Vec::with_capacity(steps.len());

    for (index, mut step) in steps.into_iter().enumerate() {
        let descriptor =
            registry
                .describe(&step.capability)
                .map_err(|_| PlanRejection::UnknownCapability {
                    step: index,
                    name: step.capability.clone(),
                })?;

        if step.parameters.is_null() {
            step.parameters = empty_parameters();
        }
        if !step.parameters.is_object() {
            return Err(PlanRejection::InvalidParameters {
                step: index,
                capability: step.capability,
                reason: "parameters must be a JSON object".to_string(),
            });
        }

        if let Some(field) = descriptor.requires.iter().find(|f| !available.contains(*f)) {
            return Err(PlanRejection::ForwardReference {
                step: index,
                capability: step.capability,
                field: field.clone(),
            });
        }

        if !descriptor.overwrites {
            if let Some(field) = descriptor.produces.iter().find(|f| available.contains(*f)) {
                return Err(PlanRejection::FieldConflict {
                    step: index,
                    capability: step.capability,
                    field: field.clone(),
                });
            }
        }

        available.extend(descriptor.produces.iter().cloned());
        validated.push(step);
    }

    Ok(validated)
}

//
// ================= Response parsing =================
//

#[derive(Debug, PartialEq)]
enum Candidate {
    Clarification(String),
    Steps {
        steps: Vec<PlanStep>,
        rationale: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct InterpreterResponse {
    #[serde(default)]
    clarification_needed: bool,
    #[serde(default)]
    clarification_questions: Vec<String>,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    steps: Option<Vec<RawStep>>,
    #[serde(default)]
    execution_order: Vec<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(alias = "name", alias = "tool_name")]
    capability: String,
    #[serde(default = "empty_parameters", alias = "tool_input")]
    parameters: Value,
}

fn parse_response(raw: &str) -> std::result::Result<Candidate, PlanRejection> {
    let body = strip_code_fence(raw);

    let response: InterpreterResponse = serde_json::from_str(body)
        .or_else(|first| match (body.find('{'), body.rfind('}')) {
            (Some(start), Some(end)) if start < end => serde_json::from_str(&body[start..=end]),
            _ => Err(first),
        })
        .map_err(|e| PlanRejection::Malformed(e.to_string()))?;

    if response.clarification_needed {
        let question = response
            .question
            .filter(|q| !q.trim().is_empty())
            .or_else(|| {
                let questions: Vec<&str> = response
                    .clarification_questions
                    .iter()
                    .map(|q| q.trim())
                    .filter(|q| !q.is_empty())
                    .collect();
                (!questions.is_empty()).then(|| questions.join("\n"))
            })
            .unwrap_or_else(|| DEFAULT_CLARIFICATION.to_string());
        return Ok(Candidate::Clarification(question));
    }

    let steps = match response.steps {
        Some(steps) => steps
            .into_iter()
            .map(|s| PlanStep::new(s.capability).with_parameters(s.parameters))
            .collect(),
        None => response.execution_order.into_iter().map(PlanStep::new).collect(),
    };

    Ok(Candidate::Steps {
        steps,
        rationale: response.reasoning,
    })
}

/// Strip a surrounding ```json fence, if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
