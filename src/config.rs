//! Runtime configuration loaded from the environment (and `.env`).

use crate::error::OrchestrationError;
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_DATA_PATH: &str = "data/financial_sample.json";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub financial_api_base_url: Option<String>,
    pub data_path: PathBuf,
    /// `None` disables the per-step timeout
    pub step_timeout: Option<Duration>,
    pub max_plan_steps: usize,
    pub preview_rows: usize,
    pub api_port: u16,
    pub log_level: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            financial_api_base_url: None,
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            step_timeout: Some(Duration::from_secs(30)),
            max_plan_steps: 10,
            preview_rows: 10,
            api_port: 8080,
            log_level: "info".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let step_timeout_secs: u64 = parse_or(&non_empty, "STEP_TIMEOUT_SECS", 30)?;
        let max_plan_steps: usize = parse_or(&non_empty, "MAX_PLAN_STEPS", defaults.max_plan_steps)?;
        if max_plan_steps == 0 {
            return Err(OrchestrationError::ConfigError(
                "MAX_PLAN_STEPS must be at least 1".to_string(),
            ));
        }

        let api_port = match non_empty("PORT").or_else(|| non_empty("API_PORT")) {
            Some(raw) => raw.trim().parse().map_err(|_| {
                OrchestrationError::ConfigError(format!("invalid port: {}", raw))
            })?,
            None => defaults.api_port,
        };

        Ok(Self {
            gemini_api_key: non_empty("GEMINI_API_KEY"),
            gemini_model: non_empty("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            financial_api_base_url: non_empty("FINANCIAL_API_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
            data_path: non_empty("FINANCIAL_DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_path),
            step_timeout: (step_timeout_secs > 0).then(|| Duration::from_secs(step_timeout_secs)),
            max_plan_steps,
            preview_rows: parse_or(&non_empty, "PREVIEW_ROWS", defaults.preview_rows)?,
            api_port,
            log_level: non_empty("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            OrchestrationError::ConfigError(format!("invalid value for {}: {}", key, raw))
        }),
        None => Ok(default),
    }
}
