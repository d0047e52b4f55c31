//! Narrative capability
//!
//! Writes the business summary from the computed metrics. Uses Gemini when
//! configured and falls back to a template narrative otherwise.

use super::{
    ensure_object_parameters, require_input, Capability, Fields, METRICS, NARRATIVE,
    REQUEST_TEXT, SUMMARY_STATS, VISUALS,
};
use crate::gemini::{GeminiClient, GenerationSettings};
use crate::models::VisualArtifact;
use crate::Result;
use serde_json::Value;
use tracing::warn;

const SYSTEM_PROMPT: &str = "You are a financial analyst expert. Provide clear, accurate, and \
professional financial analysis summaries. Focus on key insights, trends, and actionable information.";

pub struct SummarizeCapability {
    narrator: Option<GeminiClient>,
}

impl SummarizeCapability {
    pub fn new(narrator: Option<GeminiClient>) -> Self {
        Self { narrator }
    }

    /// Template-only summarizer, no network access
    pub fn offline() -> Self {
        Self { narrator: None }
    }
}

#[async_trait::async_trait]
impl Capability for SummarizeCapability {
    async fn invoke(&self, inputs: &Fields, parameters: &Value) -> Result<Fields> {
        ensure_object_parameters(parameters)?;

        let metrics = require_input(inputs, METRICS)?;
        let request = inputs
            .get(REQUEST_TEXT)
            .and_then(Value::as_str)
            .unwrap_or("financial performance overview");
        let stats = inputs.get(SUMMARY_STATS);
        let captions = inputs
            .get(VISUALS)
            .and_then(|v| serde_json::from_value::<Vec<VisualArtifact>>(v.clone()).ok())
            .map(|visuals| visuals.into_iter().map(|v| v.caption).collect::<Vec<_>>())
            .unwrap_or_default();

        let narrative = match &self.narrator {
            Some(client) => {
                let prompt = build_prompt(request, metrics, stats, &captions);
                match client
                    .generate(SYSTEM_PROMPT, &prompt, GenerationSettings::NARRATIVE)
                    .await
                {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Narrative generation failed, using template summary");
                        template_summary(request, metrics, stats, &captions)
                    }
                }
            }
            None => template_summary(request, metrics, stats, &captions),
        };

        let mut produced = Fields::new();
        produced.insert(NARRATIVE.to_string(), Value::String(narrative));
        Ok(produced)
    }
}

fn build_prompt(request: &str, metrics: &Value, stats: Option<&Value>, captions: &[String]) -> String {
    format!(
        r#"Please analyze the following financial data and provide a comprehensive summary based on the user's request: "{}"

Summary Statistics:
{}

Analysis Results:
{}

Available Visualizations:
{}

Please provide:
1. Executive Summary (2-3 sentences)
2. Key Financial Metrics and Trends
3. Performance Analysis
4. Risk Assessment (if applicable)
5. Key Insights and Recommendations
6. Conclusion

Format the response in a professional, easy-to-read manner suitable for business stakeholders."#,
        request,
        stats
            .map(|s| serde_json::to_string_pretty(s).unwrap_or_else(|_| s.to_string()))
            .unwrap_or_else(|| "Not available".to_string()),
        format_metrics(metrics),
        if captions.is_empty() {
            "None".to_string()
        } else {
            captions.join("\n")
        },
    )
}

/// Render top-level metrics as "Title Case: value" lines.
fn format_metrics(metrics: &Value) -> String {
    let Some(object) = metrics.as_object() else {
        return "No analysis results available".to_string();
    };

    object
        .iter()
        .map(|(key, value)| {
            let title = key
                .split('_')
                .map(|w| {
                    let mut chars = w.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join(" ");
            match value {
                Value::Object(inner) => format!("{}: {} items", title, inner.len()),
                Value::String(s) => format!("{}: {}", title, s),
                other => format!("{}: {}", title, other),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn template_summary(
    request: &str,
    metrics: &Value,
    stats: Option<&Value>,
    captions: &[String],
) -> String {
    let mut out = String::new();
    out.push_str("Financial Analysis Summary\n");
    out.push_str("==========================\n\n");
    out.push_str(&format!("Request: {}\n", request));

    if let Some(range) = stats.and_then(|s| s.get("date_range")) {
        out.push_str(&format!(
            "Period Analyzed: {} to {}\n",
            range.get("start").and_then(Value::as_str).unwrap_or("N/A"),
            range.get("end").and_then(Value::as_str).unwrap_or("N/A"),
        ));
    }
    if let Some(points) = metrics.get("record_count").and_then(Value::as_u64) {
        out.push_str(&format!("Data Points: {}\n", points));
    }

    if let Some(total) = metrics.get("total_profit").and_then(Value::as_f64) {
        out.push_str(&format!("\nTotal profit: {:.2}", total));
        if let Some(margin) = metrics
            .pointer("/performance/profit_margin_percent")
            .and_then(Value::as_f64)
        {
            out.push_str(&format!(" at a {:.2}% margin", margin));
        }
        out.push_str(".\n");
    }

    if let Some(trend) = metrics.get("trend") {
        let direction = trend.get("direction").and_then(Value::as_str).unwrap_or("stable");
        let change = trend
            .get("profit_change_percent")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        out.push_str(&format!(
            "Profit trend is {} ({:+.2}% from first to last period).\n",
            direction, change
        ));
    }

    if let Some(best) = metrics
        .get("by_segment")
        .and_then(Value::as_object)
        .and_then(|segments| {
            segments
                .iter()
                .filter_map(|(name, v)| v.as_f64().map(|p| (name, p)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
        })
    {
        out.push_str(&format!("Most profitable segment: {} ({:.2}).\n", best.0, best.1));
    }

    out.push_str("\nAnalysis Results:\n");
    out.push_str(&format_metrics(metrics));
    out.push('\n');

    if !captions.is_empty() {
        out.push_str("\nCharts:\n");
        for caption in captions {
            out.push_str(&format!("- {}\n", caption));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metrics() -> Value {
        json!({
            "record_count": 4,
            "total_profit": 1200.0,
            "performance": { "profit_margin_percent": 12.5 },
            "trend": { "direction": "downward", "profit_change_percent": -8.0 },
            "by_segment": { "Government": 900.0, "Enterprise": 300.0 },
        })
    }

    #[tokio::test]
    async fn test_offline_summary_mentions_key_metrics() {
        let mut inputs = Fields::new();
        inputs.insert(METRICS.to_string(), metrics());
        inputs.insert(REQUEST_TEXT.to_string(), json!("Summarize profit by segment"));

        let produced = SummarizeCapability::offline()
            .invoke(&inputs, &json!({}))
            .await
            .unwrap();
        let narrative = produced[NARRATIVE].as_str().unwrap();

        assert!(narrative.contains("Summarize profit by segment"));
        assert!(narrative.contains("12.50% margin"));
        assert!(narrative.contains("downward (-8.00%"));
        assert!(narrative.contains("Most profitable segment: Government"));
    }

    #[tokio::test]
    async fn test_unreachable_llm_falls_back_to_template() {
        let client = GeminiClient::new(String::new(), "gemini-2.0-flash").unwrap();
        let mut inputs = Fields::new();
        inputs.insert(METRICS.to_string(), metrics());

        let produced = SummarizeCapability::new(Some(client))
            .invoke(&inputs, &json!({}))
            .await
            .unwrap();
        assert!(produced[NARRATIVE]
            .as_str()
            .unwrap()
            .starts_with("Financial Analysis Summary"));
    }

    #[test]
    fn test_format_metrics_titles_keys() {
        let text = format_metrics(&json!({ "total_profit": 5, "by_segment": { "a": 1 } }));
        assert!(text.contains("Total Profit: 5"));
        assert!(text.contains("By Segment: 1 items"));
    }
}
