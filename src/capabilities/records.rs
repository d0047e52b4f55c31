//! Financial sales records and the sources they are loaded from

use crate::error::OrchestrationError;
use crate::models::DateRange;
use crate::Result;
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

pub const COLUMNS: [&str; 8] = [
    "Segment",
    "Country",
    "Product",
    "Date",
    "Units Sold",
    "Gross Sales",
    "COGS",
    "Profit",
];

/// One row of the financial sales sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialRecord {
    #[serde(rename = "Segment", alias = "segment")]
    pub segment: String,
    #[serde(rename = "Country", alias = "country")]
    pub country: String,
    #[serde(rename = "Product", alias = "product")]
    pub product: String,
    #[serde(rename = "Date", alias = "date")]
    pub date: NaiveDate,
    #[serde(rename = "Units Sold", alias = "units_sold", default)]
    pub units_sold: f64,
    #[serde(rename = "Gross Sales", alias = "gross_sales", default)]
    pub gross_sales: f64,
    #[serde(rename = "COGS", alias = "cogs", default)]
    pub cogs: f64,
    #[serde(rename = "Profit", alias = "profit", default)]
    pub profit: f64,
}

/// The `dataset` context field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<FinancialRecord>,
    #[serde(default)]
    pub filters_applied: Value,
    #[serde(default)]
    pub date_range: Option<DateRange>,
}

impl Dataset {
    pub fn new(rows: Vec<FinancialRecord>, filters_applied: Value) -> Self {
        let date_range = match (
            rows.iter().map(|r| r.date).min(),
            rows.iter().map(|r| r.date).max(),
        ) {
            (Some(start), Some(end)) => Some(DateRange { start, end }),
            _ => None,
        };

        Self {
            columns: COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows,
            filters_applied,
            date_range,
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(|e| {
            OrchestrationError::CapabilityError(format!("malformed dataset field: {}", e))
        })
    }
}

/// Payload shapes accepted from files and the remote API
#[derive(Deserialize)]
#[serde(untagged)]
enum RecordPayload {
    Rows(Vec<FinancialRecord>),
    Wrapped { rows: Vec<FinancialRecord> },
}

impl RecordPayload {
    fn into_rows(self) -> Vec<FinancialRecord> {
        match self {
            RecordPayload::Rows(rows) | RecordPayload::Wrapped { rows } => rows,
        }
    }
}

pub fn parse_records(raw: &str) -> Result<Vec<FinancialRecord>> {
    let payload: RecordPayload = serde_json::from_str(raw).map_err(|e| {
        OrchestrationError::CapabilityError(format!("malformed financial records: {}", e))
    })?;
    Ok(payload.into_rows())
}

/// Where the fetch capability reads records from
#[async_trait::async_trait]
pub trait RecordSource: Send + Sync {
    fn describe(&self) -> String;
    async fn load(&self) -> Result<Vec<FinancialRecord>>;
}

/// JSON file on local disk
pub struct JsonFileRecordSource {
    path: PathBuf,
}

impl JsonFileRecordSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl RecordSource for JsonFileRecordSource {
    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn load(&self) -> Result<Vec<FinancialRecord>> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            OrchestrationError::CapabilityError(format!(
                "cannot read financial data file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let rows = parse_records(&raw)?;
        debug!(path = %self.path.display(), rows = rows.len(), "Loaded financial records");
        Ok(rows)
    }
}

/// Remote financial API exposing `/api/v1/financials/records`
pub struct HttpRecordSource {
    client: Client,
    base_url: String,
}

impl HttpRecordSource {
    pub fn new(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl RecordSource for HttpRecordSource {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    async fn load(&self) -> Result<Vec<FinancialRecord>> {
        let url = format!("{}/api/v1/financials/records", self.base_url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            OrchestrationError::CapabilityError(format!(
                "Financial API request failed for {}: {}",
                url, e
            ))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            OrchestrationError::CapabilityError(format!("Invalid response body: {}", e))
        })?;

        if !status.is_success() {
            return Err(OrchestrationError::CapabilityError(format!(
                "Financial API returned {} for {}: {}",
                status, url, body
            )));
        }

        parse_records(&body)
    }
}

/// Fixed rows held in memory
pub struct InMemoryRecordSource {
    rows: Vec<FinancialRecord>,
}

impl InMemoryRecordSource {
    pub fn new(rows: Vec<FinancialRecord>) -> Self {
        Self { rows }
    }
}

#[async_trait::async_trait]
impl RecordSource for InMemoryRecordSource {
    fn describe(&self) -> String {
        format!("memory:{} rows", self.rows.len())
    }

    async fn load(&self) -> Result<Vec<FinancialRecord>> {
        Ok(self.rows.clone())
    }
}
