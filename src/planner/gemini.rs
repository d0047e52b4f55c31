//! Gemini-powered reasoning collaborator
//!
//! Uses Google's Gemini API to turn a request into a plan-shaped JSON
//! response. The planner validates whatever comes back.

use super::ReasoningCollaborator;
use crate::capabilities::CapabilityDescriptor;
use crate::gemini::{GeminiClient, GenerationSettings};
use crate::models::Request;
use crate::Result;
use async_trait::async_trait;

const SYSTEM_PROMPT: &str =
    "You are a task orchestrator. Always respond with valid JSON. Be precise and logical in your planning.";

pub struct GeminiInterpreter {
    client: GeminiClient,
}

impl GeminiInterpreter {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }

    /// Build structured planning prompt
    fn build_prompt(
        request: &Request,
        capabilities: &[CapabilityDescriptor],
        correction: Option<&str>,
    ) -> String {
        let capability_lines = capabilities
            .iter()
            .map(|c| c.summary_line())
            .collect::<Vec<_>>()
            .join("\n- ");

        let hints = if request.hints.is_empty() {
            "none".to_string()
        } else {
            serde_json::to_string(&request.hints).unwrap_or_else(|_| "none".to_string())
        };

        let base_prompt = format!(
            r#"You are a task orchestrator for a financial analysis system working on a
sales dataset (Segment, Country, Product, Date, Units Sold, Gross Sales, COGS, Profit).
Decide which capabilities to run, in which order, and with which parameters.

User Request: "{}"

Caller hints: {}

Available capabilities (name – description (requires, produces)):
- {}

The request itself provides: request_text, hints.
Every required field must be produced by the request or by an EARLIER step.

Parameter guidance:
- fetch: {{ "segment": "...", "country": "...", "product": "...", "quarters": N | "months": N | "years": N }} (all optional)
- analyze: {{ "focus": ["trend", "quarterly", "performance", "segments", "countries", "products"] }} (optional)
- visualize: {{ "charts": ["profit_trend", "quarterly_profit", "segment_profit", "units_sold"] }} (optional; profit_trend gains a 7-period moving average when analyze ran first, units_sold stacks volume under profit)
- summarize: {{}}

IMPORTANT: If clarification_answers are present in the caller hints, use them to understand
what the user wants and DO NOT ask for clarification again.

CLARIFICATION RULES:
- Ask for clarification if the request is vague or ambiguous (e.g., "analyze data", "show trends", "help me")
- Ask for clarification if time period is not specified (e.g., "analyze profit" should ask "What time period?")
- Ask for clarification if scope is unclear (e.g., "compare performance" should ask "Compare what?")
- Ask for clarification if output format is not specified (e.g., "show me data" should ask "Do you want charts, tables, or reports?")
- Ask for clarification if the request needs data none of the capabilities provide

Return ONLY valid JSON, no explanation text, in this format:

{{
  "clarification_needed": false,
  "clarification_questions": [],
  "steps": [
    {{ "capability": "fetch", "parameters": {{ "country": "Canada", "quarters": 2 }} }},
    {{ "capability": "analyze", "parameters": {{}} }},
    {{ "capability": "visualize", "parameters": {{}} }},
    {{ "capability": "summarize", "parameters": {{}} }}
  ],
  "reasoning": "Brief explanation of the plan"
}}

For an ambiguous request:

{{
  "clarification_needed": true,
  "clarification_questions": ["What time period are you interested in?"],
  "steps": [],
  "reasoning": "Request is too vague"
}}
"#,
            request.text, hints, capability_lines,
        );

        match correction {
            Some(reason) => format!("{}\n\n{}", reason, base_prompt),
            None => base_prompt,
        }
    }
}

#[async_trait]
impl ReasoningCollaborator for GeminiInterpreter {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn interpret(
        &self,
        request: &Request,
        capabilities: &[CapabilityDescriptor],
        correction: Option<&str>,
    ) -> Result<String> {
        let prompt = Self::build_prompt(request, capabilities, correction);
        self.client
            .generate(SYSTEM_PROMPT, &prompt, GenerationSettings::PLANNING)
            .await
    }
}
