//! Data retrieval capability
//!
//! Loads financial records from the configured source, applies the plan
//! step's filters and produces the `dataset` and `summary_stats` fields.

use super::analyze::{mean, sample_std};
use super::records::{Dataset, FinancialRecord, RecordSource};
use super::{ensure_object_parameters, Capability, Fields, DATASET, HINTS, SUMMARY_STATS};
use crate::error::OrchestrationError;
use crate::models::{DateRange, RequestHints};
use crate::Result;
use chrono::Months;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Filters accepted as `fetch` parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarters: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub months: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub years: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
}

impl FetchFilters {
    pub fn from_parameters(parameters: &Value) -> Result<Self> {
        ensure_object_parameters(parameters)?;
        if parameters.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(parameters.clone()).map_err(|e| {
            OrchestrationError::InvalidParameters(format!("invalid fetch parameters: {}", e))
        })
    }

    /// Trailing window in months, quarters taking precedence over months over years.
    /// Windows too large to represent saturate and cover the whole history.
    fn window_months(&self) -> Option<u32> {
        self.quarters
            .map(|q| q.saturating_mul(3))
            .or(self.months)
            .or(self.years.map(|y| y.saturating_mul(12)))
    }

    pub fn apply(&self, rows: Vec<FinancialRecord>) -> Vec<FinancialRecord> {
        let matches = |value: &str, wanted: &Option<String>| match wanted {
            Some(w) => value.to_lowercase().contains(&w.to_lowercase()),
            None => true,
        };

        let mut filtered: Vec<FinancialRecord> = rows
            .into_iter()
            .filter(|r| matches(&r.segment, &self.segment))
            .filter(|r| matches(&r.country, &self.country))
            .filter(|r| matches(&r.product, &self.product))
            .filter(|r| self.date_range.map_or(true, |range| range.contains(r.date)))
            .collect();

        if let Some(months) = self.window_months() {
            if let Some(latest) = filtered.iter().map(|r| r.date).max() {
                let start = latest
                    .checked_sub_months(Months::new(months))
                    .unwrap_or(chrono::NaiveDate::MIN);
                filtered.retain(|r| r.date >= start);
            }
        }

        filtered.sort_by_key(|r| r.date);
        filtered
    }
}

pub struct FetchCapability {
    source: Arc<dyn RecordSource>,
}

impl FetchCapability {
    pub fn new(source: Arc<dyn RecordSource>) -> Self {
        Self { source }
    }
}

#[async_trait::async_trait]
impl Capability for FetchCapability {
    async fn invoke(&self, inputs: &Fields, parameters: &Value) -> Result<Fields> {
        let mut filters = FetchFilters::from_parameters(parameters)?;

        // An explicit caller date range wins over anything the planner guessed.
        if let Some(hints) = inputs.get(HINTS) {
            let hints: RequestHints = serde_json::from_value(hints.clone()).unwrap_or_default();
            if hints.date_range.is_some() {
                filters.date_range = hints.date_range;
            }
        }

        let rows = self.source.load().await?;
        let loaded = rows.len();
        let filtered = filters.apply(rows);

        debug!(
            source = %self.source.describe(),
            loaded,
            kept = filtered.len(),
            "Fetched financial records"
        );

        if filtered.is_empty() {
            return Err(OrchestrationError::CapabilityError(format!(
                "no records match filters {}",
                serde_json::to_string(&filters)?
            )));
        }

        let stats = summary_stats(&filtered);
        let dataset = Dataset::new(filtered, serde_json::to_value(&filters)?);

        let mut produced = Fields::new();
        produced.insert(DATASET.to_string(), serde_json::to_value(&dataset)?);
        produced.insert(SUMMARY_STATS.to_string(), stats);
        Ok(produced)
    }
}

pub fn summary_stats(rows: &[FinancialRecord]) -> Value {
    let column = |f: fn(&FinancialRecord) -> f64| rows.iter().map(f).collect::<Vec<f64>>();
    let profit = column(|r| r.profit);
    let gross_sales = column(|r| r.gross_sales);
    let cogs = column(|r| r.cogs);
    let units = column(|r| r.units_sold);

    let count_by = |key: fn(&FinancialRecord) -> &str| {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for row in rows {
            *counts.entry(key(row).to_string()).or_default() += 1;
        }
        counts
    };

    let date_range = match (rows.first(), rows.last()) {
        (Some(first), Some(last)) => json!({
            "start": first.date.format("%Y-%m-%d").to_string(),
            "end": last.date.format("%Y-%m-%d").to_string(),
        }),
        _ => json!({ "start": "N/A", "end": "N/A" }),
    };

    json!({
        "data_points": rows.len(),
        "total_profit": profit.iter().sum::<f64>(),
        "avg_profit": mean(&profit),
        "profit_std": sample_std(&profit),
        "total_gross_sales": gross_sales.iter().sum::<f64>(),
        "avg_gross_sales": mean(&gross_sales),
        "total_cogs": cogs.iter().sum::<f64>(),
        "avg_cogs": mean(&cogs),
        "total_units_sold": units.iter().sum::<f64>(),
        "avg_units_sold": mean(&units),
        "date_range": date_range,
        "segment_breakdown": count_by(|r| r.segment.as_str()),
        "country_breakdown": count_by(|r| r.country.as_str()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::records::InMemoryRecordSource;
    use crate::test_support::sample_records;

    fn fetch() -> FetchCapability {
        FetchCapability::new(Arc::new(InMemoryRecordSource::new(sample_records())))
    }

    #[tokio::test]
    async fn test_fetch_produces_dataset_and_stats() {
        let produced = fetch().invoke(&Fields::new(), &json!({})).await.unwrap();

        let dataset = Dataset::from_value(&produced[DATASET]).unwrap();
        assert_eq!(dataset.rows.len(), sample_records().len());
        assert!(dataset.rows.windows(2).all(|w| w[0].date <= w[1].date));

        let stats = &produced[SUMMARY_STATS];
        assert_eq!(stats["data_points"], json!(sample_records().len()));
        assert!(stats["segment_breakdown"]["Government"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_fetch_filters_by_country_case_insensitively() {
        let produced = fetch()
            .invoke(&Fields::new(), &json!({ "country": "canada" }))
            .await
            .unwrap();
        let dataset = Dataset::from_value(&produced[DATASET]).unwrap();
        assert!(!dataset.rows.is_empty());
        assert!(dataset.rows.iter().all(|r| r.country == "Canada"));
    }

    #[tokio::test]
    async fn test_trailing_quarters_window() {
        let filters = FetchFilters {
            quarters: Some(1),
            ..Default::default()
        };
        let rows = filters.apply(sample_records());
        let latest = sample_records().iter().map(|r| r.date).max().unwrap();
        let start = latest.checked_sub_months(Months::new(3)).unwrap();
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|r| r.date >= start));
    }

    #[test]
    fn test_oversized_window_keeps_full_history() {
        for filters in [
            FetchFilters {
                quarters: Some(2_000_000_000),
                ..Default::default()
            },
            FetchFilters {
                years: Some(u32::MAX),
                ..Default::default()
            },
        ] {
            assert_eq!(filters.apply(sample_records()).len(), sample_records().len());
        }
    }

    #[tokio::test]
    async fn test_hint_date_range_overrides_parameters() {
        let hints = RequestHints {
            date_range: Some(DateRange {
                start: chrono::NaiveDate::from_ymd_opt(2014, 1, 1).unwrap(),
                end: chrono::NaiveDate::from_ymd_opt(2014, 3, 31).unwrap(),
            }),
            ..Default::default()
        };
        let mut inputs = Fields::new();
        inputs.insert(HINTS.to_string(), serde_json::to_value(&hints).unwrap());

        let produced = fetch().invoke(&inputs, &json!({ "years": 5 })).await.unwrap();
        let dataset = Dataset::from_value(&produced[DATASET]).unwrap();
        assert!(dataset
            .rows
            .iter()
            .all(|r| hints.date_range.unwrap().contains(r.date)));
    }

    #[tokio::test]
    async fn test_empty_result_is_a_failure() {
        let err = fetch()
            .invoke(&Fields::new(), &json!({ "country": "Atlantis" }))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::CapabilityError(_)));
    }

    #[tokio::test]
    async fn test_rejects_non_object_parameters() {
        let err = fetch()
            .invoke(&Fields::new(), &json!(["country"]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidParameters(_)));
    }
}
