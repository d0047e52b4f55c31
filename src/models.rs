//! Core data models for the report orchestrator

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

//
// ================= Request =================
//

/// Immutable input of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_id: Uuid,
    pub text: String,
    #[serde(default)]
    pub hints: RequestHints,
    pub received_at: DateTime<Utc>,
}

impl Request {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            text: text.into(),
            hints: RequestHints::default(),
            received_at: Utc::now(),
        }
    }

    pub fn with_hints(mut self, hints: RequestHints) -> Self {
        self.hints = hints;
        self
    }
}

/// Structured hints supplied by the caller alongside the request text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    /// Answers to a previous clarification round, keyed by question
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub clarification_answers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl RequestHints {
    pub fn is_empty(&self) -> bool {
        self.date_range.is_none() && self.clarification_answers.is_empty() && self.extra.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

//
// ================= Plan =================
//

/// Validated output of the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Plan {
    ClarificationNeeded {
        question: String,
    },
    Executable {
        steps: Vec<PlanStep>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
    },
}

impl Plan {
    pub fn is_executable(&self) -> bool {
        matches!(self, Plan::Executable { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub capability: String,
    #[serde(default = "empty_parameters")]
    pub parameters: Value,
}

impl PlanStep {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            parameters: empty_parameters(),
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

pub(crate) fn empty_parameters() -> Value {
    Value::Object(serde_json::Map::new())
}

//
// ================= Execution Trace =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    /// The collaborator returned an error
    Collaborator,
    Timeout,
    /// The collaborator omitted a field it declared
    MalformedOutput,
    /// A produced field is already owned by an earlier writer
    FieldConflict,
    /// Not executed because an earlier step failed
    DependencyFailed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// One entry of the execution trace; never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecutionRecord {
    pub step_index: usize,
    pub capability: String,
    pub parameters: Value,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields_written: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

impl StepExecutionRecord {
    pub fn skipped(step_index: usize, step: &PlanStep, error: StepError) -> Self {
        let now = Utc::now();
        Self {
            step_index,
            capability: step.capability.clone(),
            parameters: step.parameters.clone(),
            status: StepStatus::Skipped,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            fields_written: Vec::new(),
            error: Some(error),
        }
    }
}

//
// ================= Result Bundle =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Line,
    Bar,
    /// Stacked panels sharing one x axis
    Combo,
}

/// Handle to a visual artifact; rendering happens outside the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualArtifact {
    pub id: String,
    pub kind: ChartKind,
    pub title: String,
    pub caption: String,
    pub spec: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPreview {
    pub columns: Vec<String>,
    pub rows: Vec<Value>,
    pub total_rows: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_stats: Option<Value>,
}

/// Final output of a run; built once by the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultBundle {
    pub run_id: Uuid,
    pub request: String,
    pub narrative: Option<String>,
    pub metrics: Option<Value>,
    pub visuals: Vec<VisualArtifact>,
    pub data_preview: Option<DataPreview>,
    pub trace: Vec<StepExecutionRecord>,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    pub context_digest: String,
}

//
// ================= Outcome =================
//

/// Terminal outcome of `submit` when planning succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    ClarificationNeeded {
        request_id: Uuid,
        question: String,
    },
    Completed {
        request_id: Uuid,
        bundle: ResultBundle,
    },
}

impl Outcome {
    pub fn bundle(&self) -> Option<&ResultBundle> {
        match self {
            Outcome::Completed { bundle, .. } => Some(bundle),
            Outcome::ClarificationNeeded { .. } => None,
        }
    }

    pub fn question(&self) -> Option<&str> {
        match self {
            Outcome::ClarificationNeeded { question, .. } => Some(question),
            Outcome::Completed { .. } => None,
        }
    }
}
