//! Capability descriptors, collaborator trait and registry
//!
//! A capability is a descriptor (its context-field contract) plus the
//! collaborator that does the actual work. The registry is built once at
//! startup and shared read-only across runs.

use crate::config::OrchestratorConfig;
use crate::error::OrchestrationError;
use crate::gemini::GeminiClient;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::info;

pub mod analyze;
pub mod fetch;
pub mod records;
pub mod summarize;
pub mod visualize;

pub use analyze::AnalyzeCapability;
pub use fetch::FetchCapability;
pub use records::{FinancialRecord, HttpRecordSource, InMemoryRecordSource, JsonFileRecordSource, RecordSource};
pub use summarize::SummarizeCapability;
pub use visualize::VisualizeCapability;

/// Named values exchanged between the context store and a collaborator
pub type Fields = BTreeMap<String, Value>;

// Context field names
pub const REQUEST_TEXT: &str = "request_text";
pub const HINTS: &str = "hints";
pub const DATASET: &str = "dataset";
pub const SUMMARY_STATS: &str = "summary_stats";
pub const METRICS: &str = "metrics";
pub const VISUALS: &str = "visuals";
pub const NARRATIVE: &str = "narrative";

/// Fields every run starts with, seeded from the request
pub const REQUEST_FIELDS: [&str; 2] = [REQUEST_TEXT, HINTS];

// Baseline capability names
pub const FETCH: &str = "fetch";
pub const ANALYZE: &str = "analyze";
pub const VISUALIZE: &str = "visualize";
pub const SUMMARIZE: &str = "summarize";

/// Static input/output contract of a capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub requires: Vec<String>,
    /// Read when present, never required
    #[serde(default)]
    pub optional: Vec<String>,
    pub produces: Vec<String>,
    /// Whether this capability may replace fields that already exist
    #[serde(default)]
    pub overwrites: bool,
}

impl CapabilityDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            requires: Vec::new(),
            optional: Vec::new(),
            produces: Vec::new(),
            overwrites: false,
        }
    }

    pub fn requires<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn optional<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn produces<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.produces = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn allow_overwrite(mut self) -> Self {
        self.overwrites = true;
        self
    }

    /// One-line form used in planning prompts.
    pub fn summary_line(&self) -> String {
        format!(
            "{} – {} (requires: [{}], produces: [{}])",
            self.name,
            self.description,
            self.requires.join(", "),
            self.produces.join(", ")
        )
    }
}

/// External collaborator behind a capability
#[async_trait::async_trait]
pub trait Capability: Send + Sync {
    /// `inputs` holds the declared required fields plus any optional ones present.
    async fn invoke(&self, inputs: &Fields, parameters: &Value) -> Result<Fields>;
}

struct RegisteredCapability {
    descriptor: CapabilityDescriptor,
    collaborator: Arc<dyn Capability>,
}

/// Closed set of capabilities known to the process
pub struct CapabilityRegistry {
    entries: HashMap<String, RegisteredCapability>,
    /// Registration order, so `all()` is stable
    order: Vec<String>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(
        &mut self,
        descriptor: CapabilityDescriptor,
        collaborator: Arc<dyn Capability>,
    ) -> Result<()> {
        validate_descriptor(&descriptor)?;

        if self.entries.contains_key(&descriptor.name) {
            return Err(OrchestrationError::InvalidRegistry(format!(
                "capability '{}' registered twice",
                descriptor.name
            )));
        }

        self.order.push(descriptor.name.clone());
        self.entries.insert(
            descriptor.name.clone(),
            RegisteredCapability {
                descriptor,
                collaborator,
            },
        );
        Ok(())
    }

    pub fn describe(&self, name: &str) -> Result<&CapabilityDescriptor> {
        self.entries
            .get(name)
            .map(|entry| &entry.descriptor)
            .ok_or_else(|| OrchestrationError::UnknownCapability(name.to_string()))
    }

    pub fn collaborator(&self, name: &str) -> Result<Arc<dyn Capability>> {
        self.entries
            .get(name)
            .map(|entry| entry.collaborator.clone())
            .ok_or_else(|| OrchestrationError::UnknownCapability(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn all(&self) -> Vec<&CapabilityDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(|entry| &entry.descriptor)
            .collect()
    }

    /// Capabilities declaring `field` among their produced fields.
    pub fn producers_of(&self, field: &str) -> Vec<&CapabilityDescriptor> {
        self.all()
            .into_iter()
            .filter(|d| d.produces.iter().any(|p| p == field))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_descriptor(descriptor: &CapabilityDescriptor) -> Result<()> {
    let invalid = |msg: String| -> Result<()> { Err(OrchestrationError::InvalidRegistry(msg)) };

    if descriptor.name.trim().is_empty() {
        return invalid("capability name must not be empty".to_string());
    }
    if descriptor.produces.is_empty() {
        return invalid(format!("capability '{}' produces no fields", descriptor.name));
    }

    let mut seen = BTreeSet::new();
    for field in &descriptor.produces {
        if !seen.insert(field) {
            return invalid(format!(
                "capability '{}' declares '{}' twice",
                descriptor.name, field
            ));
        }
        if REQUEST_FIELDS.contains(&field.as_str()) && !descriptor.overwrites {
            return invalid(format!(
                "capability '{}' would overwrite request field '{}'",
                descriptor.name, field
            ));
        }
    }

    Ok(())
}

//
// ================= Baseline descriptors =================
//

pub fn fetch_descriptor() -> CapabilityDescriptor {
    CapabilityDescriptor::new(
        FETCH,
        "Retrieve financial sales records (segment, country, product, profit, sales, COGS) \
         filtered by segment/country/product/time window",
    )
    .optional([HINTS])
    .produces([DATASET, SUMMARY_STATS])
    .allow_overwrite()
}

pub fn analyze_descriptor() -> CapabilityDescriptor {
    CapabilityDescriptor::new(
        ANALYZE,
        "Compute trend, quarterly, margin and segment/country/product metrics over the dataset",
    )
    .requires([DATASET])
    .produces([METRICS])
}

pub fn visualize_descriptor() -> CapabilityDescriptor {
    CapabilityDescriptor::new(
        VISUALIZE,
        "Create chart specifications (profit trend, quarterly, segment breakdown, units sold)",
    )
    .requires([DATASET])
    .optional([METRICS])
    .produces([VISUALS])
}

pub fn summarize_descriptor() -> CapabilityDescriptor {
    CapabilityDescriptor::new(
        SUMMARIZE,
        "Write a narrative business summary from the computed metrics",
    )
    .requires([METRICS])
    .optional([REQUEST_TEXT, SUMMARY_STATS, VISUALS])
    .produces([NARRATIVE])
}

/// Create the registry with the four baseline capabilities.
pub fn create_default_registry(config: &OrchestratorConfig) -> Result<CapabilityRegistry> {
    let source: Arc<dyn RecordSource> = match &config.financial_api_base_url {
        Some(base_url) => Arc::new(HttpRecordSource::new(base_url.clone())?),
        None => Arc::new(JsonFileRecordSource::new(config.data_path.clone())),
    };

    let narrator = match &config.gemini_api_key {
        Some(key) => Some(GeminiClient::new(key.clone(), &config.gemini_model)?),
        None => None,
    };

    let mut registry = CapabilityRegistry::new();
    registry.register(fetch_descriptor(), Arc::new(FetchCapability::new(source)))?;
    registry.register(analyze_descriptor(), Arc::new(AnalyzeCapability))?;
    registry.register(visualize_descriptor(), Arc::new(VisualizeCapability))?;
    registry.register(summarize_descriptor(), Arc::new(SummarizeCapability::new(narrator)))?;

    info!(capabilities = registry.len(), "Capability registry initialized");

    Ok(registry)
}

/// Read a required input, failing as a collaborator error when absent.
pub(crate) fn require_input<'a>(inputs: &'a Fields, field: &str) -> Result<&'a Value> {
    inputs.get(field).ok_or_else(|| {
        OrchestrationError::CapabilityError(format!("input field '{}' not supplied", field))
    })
}

pub(crate) fn ensure_object_parameters(parameters: &Value) -> Result<()> {
    if parameters.is_object() || parameters.is_null() {
        Ok(())
    } else {
        Err(OrchestrationError::InvalidParameters(
            "parameters must be a JSON object".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubCapability;

    #[test]
    fn test_describe_unknown_capability() {
        let registry = CapabilityRegistry::new();
        let err = registry.describe("forecast").unwrap_err();
        assert!(matches!(err, OrchestrationError::UnknownCapability(name) if name == "forecast"));
    }

    #[test]
    fn test_all_preserves_registration_order() {
        let registry = crate::test_support::baseline_registry();
        let names: Vec<&str> = registry.all().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec![FETCH, ANALYZE, VISUALIZE, SUMMARIZE]);
        assert_eq!(registry.producers_of(METRICS)[0].name, ANALYZE);
    }

    #[test]
    fn test_rejects_duplicate_registration() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(analyze_descriptor(), Arc::new(StubCapability::empty()))
            .unwrap();
        let err = registry
            .register(analyze_descriptor(), Arc::new(StubCapability::empty()))
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidRegistry(_)));
    }

    #[test]
    fn test_rejects_descriptor_overwriting_request_fields() {
        let mut registry = CapabilityRegistry::new();
        let descriptor = CapabilityDescriptor::new("rewrite", "rewrites the request")
            .produces([REQUEST_TEXT]);
        let err = registry
            .register(descriptor, Arc::new(StubCapability::empty()))
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidRegistry(_)));
    }

    #[test]
    fn test_summary_line_lists_contract() {
        let line = summarize_descriptor().summary_line();
        assert!(line.starts_with("summarize"));
        assert!(line.contains("requires: [metrics]"));
        assert!(line.contains("produces: [narrative]"));
    }
}
