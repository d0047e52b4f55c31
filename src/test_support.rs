//! Deterministic collaborators and fixtures shared by unit tests

use crate::capabilities::records::InMemoryRecordSource;
use crate::capabilities::{
    analyze_descriptor, fetch_descriptor, summarize_descriptor, visualize_descriptor,
    AnalyzeCapability, Capability, CapabilityDescriptor, CapabilityRegistry, FetchCapability,
    Fields, FinancialRecord, SummarizeCapability, VisualizeCapability,
};
use crate::error::OrchestrationError;
use crate::models::Request;
use crate::planner::ReasoningCollaborator;
use crate::Result;
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Collaborator with a fixed answer
pub struct StubCapability {
    produced: Fields,
    failure: Option<String>,
    /// Fail on the first call only
    fail_once: bool,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl StubCapability {
    pub fn empty() -> Self {
        Self {
            produced: Fields::new(),
            failure: None,
            fail_once: false,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn producing<'a, I>(fields: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        Self {
            produced: fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            ..Self::empty()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::empty()
        }
    }

    /// Fails the first call, then produces `fields`.
    pub fn failing_once<'a, I>(message: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        Self {
            failure: Some(message.to_string()),
            fail_once: true,
            ..Self::producing(fields)
        }
    }

    pub fn slow<'a, I>(delay: Duration, fields: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        Self {
            delay: Some(delay),
            ..Self::producing(fields)
        }
    }

    /// Shared invocation counter
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait::async_trait]
impl Capability for StubCapability {
    async fn invoke(&self, _inputs: &Fields, _parameters: &Value) -> Result<Fields> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(message) if !self.fail_once || call == 0 => {
                Err(OrchestrationError::CapabilityError(message.clone()))
            }
            _ => Ok(self.produced.clone()),
        }
    }
}

/// The four baseline capabilities backed by in-memory data and offline narratives.
pub fn baseline_registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    let source = Arc::new(InMemoryRecordSource::new(sample_records()));

    registry
        .register(fetch_descriptor(), Arc::new(FetchCapability::new(source)))
        .unwrap();
    registry
        .register(analyze_descriptor(), Arc::new(AnalyzeCapability))
        .unwrap();
    registry
        .register(visualize_descriptor(), Arc::new(VisualizeCapability))
        .unwrap();
    registry
        .register(summarize_descriptor(), Arc::new(SummarizeCapability::offline()))
        .unwrap();
    registry
}

/// Baseline registry with one capability's collaborator replaced.
pub fn registry_with(name: &str, collaborator: Arc<dyn Capability>) -> CapabilityRegistry {
    let baseline = baseline_registry();
    let mut registry = CapabilityRegistry::new();

    for descriptor in baseline.all() {
        let chosen = if descriptor.name == name {
            collaborator.clone()
        } else {
            baseline.collaborator(&descriptor.name).unwrap()
        };
        registry.register(descriptor.clone(), chosen).unwrap();
    }
    registry
}

pub fn record(
    segment: &str,
    country: &str,
    product: &str,
    date: &str,
    profit: f64,
    gross_sales: f64,
) -> FinancialRecord {
    FinancialRecord {
        segment: segment.to_string(),
        country: country.to_string(),
        product: product.to_string(),
        date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        units_sold: 100.0,
        gross_sales,
        cogs: gross_sales - profit,
        profit,
    }
}

/// A year of sales across three segments and countries, unsorted.
pub fn sample_records() -> Vec<FinancialRecord> {
    vec![
        record("Government", "Canada", "Carretera", "2014-01-01", 16185.0, 32370.0),
        record("Midmarket", "Mexico", "Montana", "2014-02-01", 4320.0, 26920.0),
        record("Enterprise", "Germany", "Paseo", "2014-03-01", -4150.0, 125000.0),
        record("Government", "Mexico", "Velo", "2014-04-01", 13210.0, 52840.0),
        record("Government", "Canada", "Amarilla", "2014-06-01", 14370.0, 43110.0),
        record("Enterprise", "Canada", "VTT", "2014-05-01", 2580.0, 110400.0),
        record("Midmarket", "Germany", "Carretera", "2014-07-01", 5460.0, 36400.0),
        record("Government", "Germany", "Paseo", "2014-09-01", 21840.0, 72800.0),
        record("Midmarket", "Canada", "Montana", "2014-08-01", 3780.0, 25200.0),
        record("Government", "Canada", "Velo", "2014-10-01", 18800.0, 63500.0),
        record("Enterprise", "Mexico", "Amarilla", "2014-11-01", 1250.0, 95000.0),
        record("Government", "Canada", "Paseo", "2014-12-01", 22400.0, 70000.0),
    ]
}

/// Reasoning collaborator replaying canned responses in order.
pub struct CannedInterpreter {
    responses: Mutex<VecDeque<String>>,
    corrections: Arc<Mutex<Vec<Option<String>>>>,
}

impl CannedInterpreter {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            corrections: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every call fails as a transport error.
    pub fn unreachable() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            corrections: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Correction text received on each call, in call order
    pub fn corrections(&self) -> Arc<Mutex<Vec<Option<String>>>> {
        self.corrections.clone()
    }
}

#[async_trait::async_trait]
impl ReasoningCollaborator for CannedInterpreter {
    fn name(&self) -> &str {
        "canned"
    }

    async fn interpret(
        &self,
        _request: &Request,
        _capabilities: &[CapabilityDescriptor],
        correction: Option<&str>,
    ) -> Result<String> {
        self.corrections
            .lock()
            .unwrap()
            .push(correction.map(str::to_string));

        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| OrchestrationError::LlmError("no canned response left".to_string()))
    }
}
