//! Aggregator
//!
//! Packages whatever the context store holds into the result bundle.
//! Absent or unreadable sections are reported as not available; this
//! step never fails and is a pure function of the store.

use crate::capabilities::{DATASET, METRICS, NARRATIVE, REQUEST_TEXT, SUMMARY_STATS, VISUALS};
use crate::context::ContextStore;
use crate::models::{DataPreview, ResultBundle, StepStatus, VisualArtifact};
use serde_json::Value;
use tracing::debug;

pub struct Aggregator {
    preview_rows: usize,
}

impl Aggregator {
    pub fn new(preview_rows: usize) -> Self {
        Self { preview_rows }
    }

    pub fn aggregate(&self, context: &ContextStore) -> ResultBundle {
        let trace = context.trace().to_vec();
        let names_with = |status: StepStatus| {
            trace
                .iter()
                .filter(|r| r.status == status)
                .map(|r| r.capability.clone())
                .collect::<Vec<_>>()
        };

        let bundle = ResultBundle {
            run_id: context.run_id(),
            request: context
                .get(REQUEST_TEXT)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            narrative: context
                .get(NARRATIVE)
                .and_then(Value::as_str)
                .map(str::to_string),
            metrics: context.get(METRICS).cloned(),
            visuals: context
                .get(VISUALS)
                .and_then(|v| serde_json::from_value::<Vec<VisualArtifact>>(v.clone()).ok())
                .unwrap_or_default(),
            data_preview: self.preview(context),
            succeeded: names_with(StepStatus::Succeeded),
            failed: names_with(StepStatus::Failed),
            skipped: names_with(StepStatus::Skipped),
            context_digest: context.digest(),
            trace,
        };

        debug!(
            run_id = %bundle.run_id,
            narrative = bundle.narrative.is_some(),
            metrics = bundle.metrics.is_some(),
            visuals = bundle.visuals.len(),
            preview = bundle.data_preview.is_some(),
            "Result bundle assembled"
        );

        bundle
    }

    fn preview(&self, context: &ContextStore) -> Option<DataPreview> {
        let dataset = context.get(DATASET)?;
        let rows = dataset.get("rows")?.as_array()?;

        let columns = dataset
            .get("columns")
            .and_then(Value::as_array)
            .map(|cols| {
                cols.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Some(DataPreview {
            columns,
            rows: rows.iter().take(self.preview_rows).cloned().collect(),
            total_rows: rows.len(),
            summary_stats: context.get(SUMMARY_STATS).cloned(),
        })
    }
}
