//! Analysis capability: trend, quarterly, margin and breakdown metrics

use super::records::{Dataset, FinancialRecord};
use super::{ensure_object_parameters, require_input, Capability, Fields, DATASET, METRICS};
use crate::error::OrchestrationError;
use crate::Result;
use chrono::Datelike;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

const FOCUS_AREAS: [&str; 6] = [
    "trend",
    "quarterly",
    "performance",
    "segments",
    "countries",
    "products",
];

pub struct AnalyzeCapability;

#[async_trait::async_trait]
impl Capability for AnalyzeCapability {
    async fn invoke(&self, inputs: &Fields, parameters: &Value) -> Result<Fields> {
        ensure_object_parameters(parameters)?;
        let dataset = Dataset::from_value(require_input(inputs, DATASET)?)?;

        if dataset.rows.is_empty() {
            return Err(OrchestrationError::CapabilityError(
                "No data available for analysis".to_string(),
            ));
        }

        let focus = focus_areas(parameters)?;
        let metrics = analyze(&dataset.rows, &focus);

        let mut produced = Fields::new();
        produced.insert(METRICS.to_string(), metrics);
        Ok(produced)
    }
}

fn focus_areas(parameters: &Value) -> Result<Vec<String>> {
    let Some(raw) = parameters.get("focus") else {
        return Ok(FOCUS_AREAS.iter().map(|s| s.to_string()).collect());
    };

    let areas: Vec<String> = serde_json::from_value(raw.clone()).map_err(|_| {
        OrchestrationError::InvalidParameters("focus must be a list of strings".to_string())
    })?;

    if let Some(unknown) = areas.iter().find(|a| !FOCUS_AREAS.contains(&a.as_str())) {
        return Err(OrchestrationError::InvalidParameters(format!(
            "unknown focus area '{}' (expected one of {:?})",
            unknown, FOCUS_AREAS
        )));
    }

    Ok(areas)
}

/// Compute the metrics object for the selected focus areas.
pub fn analyze(rows: &[FinancialRecord], focus: &[String]) -> Value {
    let wants = |area: &str| focus.iter().any(|f| f == area);
    let mut metrics = Map::new();

    let total_profit: f64 = rows.iter().map(|r| r.profit).sum();
    let total_sales: f64 = rows.iter().map(|r| r.gross_sales).sum();

    metrics.insert("record_count".into(), json!(rows.len()));
    metrics.insert("total_profit".into(), json!(round2(total_profit)));
    metrics.insert("total_gross_sales".into(), json!(round2(total_sales)));

    if wants("performance") {
        let profits: Vec<f64> = rows.iter().map(|r| r.profit).collect();
        let margin = if total_sales > 0.0 {
            total_profit / total_sales * 100.0
        } else {
            0.0
        };
        let units: f64 = rows.iter().map(|r| r.units_sold).sum();

        metrics.insert(
            "performance".into(),
            json!({
                "avg_profit": round2(mean(&profits)),
                "profit_std": round2(sample_std(&profits)),
                "profit_margin_percent": round2(margin),
                "total_cogs": round2(rows.iter().map(|r| r.cogs).sum()),
                "total_units_sold": round2(units),
                "profit_per_unit": if units > 0.0 { round2(total_profit / units) } else { 0.0 },
            }),
        );
    }

    if wants("trend") {
        metrics.insert("trend".into(), trend(rows));
    }
    if wants("quarterly") {
        metrics.insert("quarterly".into(), quarterly(rows));
    }
    if wants("segments") {
        metrics.insert("by_segment".into(), profit_by(rows, |r| &r.segment));
    }
    if wants("countries") {
        metrics.insert("by_country".into(), profit_by(rows, |r| &r.country));
    }
    if wants("products") {
        metrics.insert("by_product".into(), profit_by(rows, |r| &r.product));
    }

    Value::Object(metrics)
}

fn trend(rows: &[FinancialRecord]) -> Value {
    let mut by_date: BTreeMap<chrono::NaiveDate, f64> = BTreeMap::new();
    for row in rows {
        *by_date.entry(row.date).or_default() += row.profit;
    }
    let series: Vec<f64> = by_date.values().copied().collect();

    let (direction, change) = match (series.first(), series.last()) {
        (Some(&first), Some(&last)) if series.len() >= 2 => {
            let direction = if last > first {
                "upward"
            } else if last < first {
                "downward"
            } else {
                "stable"
            };
            let change = if first != 0.0 {
                (last - first) / first.abs() * 100.0
            } else {
                0.0
            };
            (direction, change)
        }
        _ => ("stable", 0.0),
    };

    json!({
        "direction": direction,
        "profit_change_percent": round2(change),
        "periods": series.len(),
        "avg_profit_per_period": round2(mean(&series)),
    })
}

fn quarter_label(date: chrono::NaiveDate) -> String {
    format!("{}-Q{}", date.year(), (date.month() - 1) / 3 + 1)
}

fn quarterly(rows: &[FinancialRecord]) -> Value {
    let mut by_quarter: BTreeMap<String, f64> = BTreeMap::new();
    for row in rows {
        *by_quarter.entry(quarter_label(row.date)).or_default() += row.profit;
    }

    if by_quarter.len() < 2 {
        return json!({ "note": "Insufficient data for quarterly analysis" });
    }

    let quarters: Vec<(&String, &f64)> = by_quarter.iter().collect();
    let mut changes: BTreeMap<String, f64> = BTreeMap::new();
    for pair in quarters.windows(2) {
        let (_, &previous) = pair[0];
        let (label, &current) = pair[1];
        if previous != 0.0 {
            changes.insert(label.clone(), round2((current - previous) / previous.abs() * 100.0));
        }
    }

    let change_values: Vec<f64> = changes.values().copied().collect();
    let last_three = &change_values[change_values.len().saturating_sub(3)..];

    json!({
        "profit": by_quarter.iter().map(|(k, v)| (k.clone(), round2(*v))).collect::<BTreeMap<_, _>>(),
        "changes_percent": changes,
        "last_3_quarters_avg_change": round2(mean(last_three)),
        "volatility": round2(sample_std(&change_values)),
        "best_quarter_change": change_values.iter().copied().fold(None, max_opt).map(round2),
        "worst_quarter_change": change_values.iter().copied().fold(None, min_opt).map(round2),
    })
}

fn profit_by(rows: &[FinancialRecord], key: fn(&FinancialRecord) -> &String) -> Value {
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for row in rows {
        *totals.entry(key(row).clone()).or_default() += row.profit;
    }
    let rounded: BTreeMap<String, f64> = totals.into_iter().map(|(k, v)| (k, round2(v))).collect();
    json!(rounded)
}

fn max_opt(acc: Option<f64>, v: f64) -> Option<f64> {
    Some(acc.map_or(v, |a| a.max(v)))
}

fn min_opt(acc: Option<f64>, v: f64) -> Option<f64> {
    Some(acc.map_or(v, |a| a.min(v)))
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Sample standard deviation (n - 1); zero below two values.
pub(crate) fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
