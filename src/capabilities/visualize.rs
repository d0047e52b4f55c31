//! Visualization capability
//!
//! Produces chart specifications; turning them into pixels is left to
//! whatever surface displays the report.

use super::records::{Dataset, FinancialRecord};
use super::{ensure_object_parameters, require_input, Capability, Fields, DATASET, METRICS, VISUALS};
use crate::error::OrchestrationError;
use crate::models::{ChartKind, VisualArtifact};
use crate::Result;
use chrono::Datelike;
use serde_json::{json, Value};
use std::collections::BTreeMap;

const PROFIT_TREND: &str = "profit_trend";
const QUARTERLY_PROFIT: &str = "quarterly_profit";
const SEGMENT_PROFIT: &str = "segment_profit";
const UNITS_SOLD: &str = "units_sold";

const CHARTS: [&str; 4] = [PROFIT_TREND, QUARTERLY_PROFIT, SEGMENT_PROFIT, UNITS_SOLD];

/// Window of the moving average drawn over the profit trend
const MOVING_AVERAGE_WINDOW: usize = 7;

pub struct VisualizeCapability;

#[async_trait::async_trait]
impl Capability for VisualizeCapability {
    async fn invoke(&self, inputs: &Fields, parameters: &Value) -> Result<Fields> {
        ensure_object_parameters(parameters)?;
        let dataset = Dataset::from_value(require_input(inputs, DATASET)?)?;
        if dataset.rows.is_empty() {
            return Err(OrchestrationError::CapabilityError(
                "No data available for visualization".to_string(),
            ));
        }

        let metrics = inputs.get(METRICS);
        let mut visuals = Vec::new();

        for chart in requested_charts(parameters)? {
            let artifact = match chart.as_str() {
                PROFIT_TREND => Some(profit_trend(&dataset.rows, metrics)),
                QUARTERLY_PROFIT => quarterly_profit(&dataset.rows),
                SEGMENT_PROFIT => Some(segment_profit(&dataset.rows)),
                UNITS_SOLD => Some(units_sold(&dataset.rows)),
                _ => None,
            };
            visuals.extend(artifact);
        }

        if visuals.is_empty() {
            return Err(OrchestrationError::CapabilityError(
                "none of the requested charts could be built from this dataset".to_string(),
            ));
        }

        let mut produced = Fields::new();
        produced.insert(VISUALS.to_string(), serde_json::to_value(&visuals)?);
        Ok(produced)
    }
}

fn requested_charts(parameters: &Value) -> Result<Vec<String>> {
    let Some(raw) = parameters.get("charts") else {
        return Ok(CHARTS.iter().map(|s| s.to_string()).collect());
    };

    let charts: Vec<String> = serde_json::from_value(raw.clone()).map_err(|_| {
        OrchestrationError::InvalidParameters("charts must be a list of strings".to_string())
    })?;

    match charts.iter().find(|c| !CHARTS.contains(&c.as_str())) {
        Some(unknown) => Err(OrchestrationError::InvalidParameters(format!(
            "unknown chart '{}' (expected one of {:?})",
            unknown, CHARTS
        ))),
        None => Ok(charts),
    }
}

fn profit_trend(rows: &[FinancialRecord], metrics: Option<&Value>) -> VisualArtifact {
    let by_date = sum_by_date(rows, |r| r.profit);

    let mut caption = format!("Profit per date across {} period(s)", by_date.len());
    let mut spec = json!({
        "x": by_date.keys().collect::<Vec<_>>(),
        "y": by_date.values().collect::<Vec<_>>(),
        "x_label": "Date",
        "y_label": "Profit",
    });

    if let Some(trend) = metrics.and_then(|m| m.get("trend")) {
        if let (Some(direction), Some(change)) = (
            trend.get("direction").and_then(Value::as_str),
            trend.get("profit_change_percent").and_then(Value::as_f64),
        ) {
            caption.push_str(&format!(", {} trend ({:+.2}%)", direction, change));
        }

        let values: Vec<f64> = by_date.values().copied().collect();
        spec["moving_average"] = json!({
            "window": MOVING_AVERAGE_WINDOW,
            "y": moving_average(&values, MOVING_AVERAGE_WINDOW),
        });
    }

    VisualArtifact {
        id: format!("chart:{}", PROFIT_TREND),
        kind: ChartKind::Line,
        title: "Profit Trend".to_string(),
        caption,
        spec,
    }
}

/// Trailing mean; `None` until a full window is available.
fn moving_average(values: &[f64], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            (i + 1 >= window).then(|| values[i + 1 - window..=i].iter().sum::<f64>() / window as f64)
        })
        .collect()
}

fn sum_by_date(rows: &[FinancialRecord], value: fn(&FinancialRecord) -> f64) -> BTreeMap<String, f64> {
    let mut by_date: BTreeMap<String, f64> = BTreeMap::new();
    for row in rows {
        *by_date.entry(row.date.format("%Y-%m-%d").to_string()).or_default() += value(row);
    }
    by_date
}

fn quarterly_profit(rows: &[FinancialRecord]) -> Option<VisualArtifact> {
    let mut by_quarter: BTreeMap<String, f64> = BTreeMap::new();
    for row in rows {
        let label = format!("{}-Q{}", row.date.year(), (row.date.month() - 1) / 3 + 1);
        *by_quarter.entry(label).or_default() += row.profit;
    }

    if by_quarter.len() < 2 {
        return None;
    }

    let (best, _) = by_quarter
        .iter()
        .max_by(|a, b| a.1.total_cmp(b.1))?;

    Some(VisualArtifact {
        id: format!("chart:{}", QUARTERLY_PROFIT),
        kind: ChartKind::Bar,
        title: "Quarterly Profit".to_string(),
        caption: format!("Profit per quarter over {} quarters, best {}", by_quarter.len(), best),
        spec: json!({
            "x": by_quarter.keys().collect::<Vec<_>>(),
            "y": by_quarter.values().collect::<Vec<_>>(),
            "x_label": "Quarter",
            "y_label": "Profit",
        }),
    })
}

fn segment_profit(rows: &[FinancialRecord]) -> VisualArtifact {
    let mut by_segment: BTreeMap<&str, f64> = BTreeMap::new();
    for row in rows {
        *by_segment.entry(row.segment.as_str()).or_default() += row.profit;
    }

    VisualArtifact {
        id: format!("chart:{}", SEGMENT_PROFIT),
        kind: ChartKind::Bar,
        title: "Profit by Segment".to_string(),
        caption: format!("Total profit split across {} segment(s)", by_segment.len()),
        spec: json!({
            "x": by_segment.keys().collect::<Vec<_>>(),
            "y": by_segment.values().collect::<Vec<_>>(),
            "x_label": "Segment",
            "y_label": "Profit",
        }),
    }
}

/// Profit line stacked over a units-sold bar panel sharing the date axis.
fn units_sold(rows: &[FinancialRecord]) -> VisualArtifact {
    let profit = sum_by_date(rows, |r| r.profit);
    let units = sum_by_date(rows, |r| r.units_sold);

    VisualArtifact {
        id: format!("chart:{}", UNITS_SOLD),
        kind: ChartKind::Combo,
        title: "Profit and Units Sold".to_string(),
        caption: format!(
            "{} units sold across {} period(s)",
            units.values().sum::<f64>(),
            units.len()
        ),
        spec: json!({
            "x": units.keys().collect::<Vec<_>>(),
            "x_label": "Date",
            "panels": [
                { "kind": "line", "y_label": "Profit", "y": profit.values().collect::<Vec<_>>(), "height": 0.7 },
                { "kind": "bar", "y_label": "Units Sold", "y": units.values().collect::<Vec<_>>(), "height": 0.3 },
            ],
        }),
    }
}
