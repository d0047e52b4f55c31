//! Keyword-driven reasoning collaborator
//!
//! Deterministic and offline. Used when no LLM is configured and as the
//! fallback when the LLM cannot be reached. Produces the same JSON shape
//! as the LLM so both go through identical validation.

use super::ReasoningCollaborator;
use crate::capabilities::{CapabilityDescriptor, ANALYZE, FETCH, REQUEST_FIELDS, SUMMARIZE, VISUALIZE};
use crate::models::Request;
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

/// Static keyword lists
const VAGUE_PHRASES: &[&str] = &[
    "help me", "what should i do", "i need information", "can you help",
    "tell me something", "what's going on", "i want to know", "show me something",
    "give me data", "i need help", "analyze data", "show trends", "compare performance",
    "show me", "give me", "tell me", "what is", "how do", "can you",
];

const DOMAIN_KEYWORDS: &[&str] = &[
    "profit", "sales", "revenue", "margin", "cogs", "units",
    "segment", "country", "countries", "product",
    "quarter", "month", "year",
];

const OUT_OF_SCOPE: &[&str] = &[
    "stock price", "share price", "crypto", "bitcoin", "weather",
];

const SEGMENTS: &[&str] = &[
    "government", "midmarket", "channel partners", "enterprise", "small business",
];
const COUNTRIES: &[&str] = &[
    "canada", "germany", "france", "mexico", "united states of america", "united states", "usa",
];
const PRODUCTS: &[&str] = &[
    "carretera", "montana", "paseo", "velo", "vtt", "amarilla",
];

const CAPABILITY_KEYWORDS: &[(&str, &[&str])] = &[
    (FETCH, &["fetch", "get", "download", "data", "retrieve", "load"]),
    (ANALYZE, &[
        "analyze", "analyse", "analysis", "trend", "pattern", "insight", "calculate",
        "compare", "performance", "margin",
    ]),
    (VISUALIZE, &["chart", "graph", "plot", "visualize", "visualise", "visualization"]),
    (SUMMARIZE, &["summarize", "summarise", "summary", "report", "conclusion", "overview"]),
];

const CLARIFICATION_QUESTIONS: [&str; 4] = [
    "What specific financial data would you like me to analyze?",
    "What time period are you interested in? (e.g., last quarter, last year)",
    "What type of analysis do you need? (e.g., trends, comparisons, summaries)",
    "Do you want charts, tables, or reports?",
];

const OUT_OF_SCOPE_QUESTION: &str = "I can only report on the financial sales data \
(segments, countries, products, sales and profit). Which of those would you like to look at?";

pub struct HeuristicInterpreter;

impl HeuristicInterpreter {
    /// Build the plan-shaped response for `request`.
    pub fn respond(request: &Request, capabilities: &[CapabilityDescriptor]) -> Value {
        let text = request.text.to_lowercase();
        let answered = !request.hints.clarification_answers.is_empty();

        if !answered {
            if OUT_OF_SCOPE.iter().any(|k| text.contains(k)) {
                return clarification(&[OUT_OF_SCOPE_QUESTION], "request is outside the available data");
            }
            if is_vague(&text) {
                return clarification(&CLARIFICATION_QUESTIONS, "request is too vague");
            }
        }

        // Clarification answers count as part of the request
        let mut combined = text;
        for answer in request.hints.clarification_answers.values() {
            combined.push(' ');
            combined.push_str(&answer.to_lowercase());
        }

        let order = plan_order(&select_capabilities(&combined, capabilities), capabilities);
        let filters = extract_filters(&combined);

        let steps: Vec<Value> = order
            .iter()
            .map(|name| {
                let parameters = if name == FETCH {
                    Value::Object(filters.clone())
                } else {
                    json!({})
                };
                json!({ "capability": name, "parameters": parameters })
            })
            .collect();

        json!({
            "clarification_needed": false,
            "steps": steps,
            "reasoning": format!("keyword match selected {}", order.join(" -> ")),
        })
    }
}

#[async_trait]
impl ReasoningCollaborator for HeuristicInterpreter {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn interpret(
        &self,
        request: &Request,
        capabilities: &[CapabilityDescriptor],
        _correction: Option<&str>,
    ) -> Result<String> {
        Ok(Self::respond(request, capabilities).to_string())
    }
}

fn clarification(questions: &[&str], reasoning: &str) -> Value {
    json!({
        "clarification_needed": true,
        "clarification_questions": questions,
        "steps": [],
        "reasoning": reasoning,
    })
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
}

/// Phrase match for multi-word keywords, word-prefix match otherwise.
fn mentions(text: &str, keyword: &str) -> bool {
    if keyword.contains(' ') {
        text.contains(keyword)
    } else {
        words(text).any(|w| w.starts_with(keyword))
    }
}

fn is_vague(text: &str) -> bool {
    if words(text).count() <= 3 {
        return true;
    }

    let has_domain_term = DOMAIN_KEYWORDS
        .iter()
        .chain(SEGMENTS)
        .chain(COUNTRIES)
        .chain(PRODUCTS)
        .any(|k| mentions(text, k));

    !has_domain_term && VAGUE_PHRASES.iter().any(|p| text.contains(p))
}

/// Registered capabilities whose keywords appear; all of them when none do.
fn select_capabilities<'a>(text: &str, capabilities: &'a [CapabilityDescriptor]) -> Vec<&'a str> {
    let selected: Vec<&str> = capabilities
        .iter()
        .filter(|c| {
            CAPABILITY_KEYWORDS
                .iter()
                .find(|(name, _)| *name == c.name)
                .is_some_and(|(_, keywords)| keywords.iter().any(|k| mentions(text, k)))
        })
        .map(|c| c.name.as_str())
        .collect();

    if selected.is_empty() {
        capabilities.iter().map(|c| c.name.as_str()).collect()
    } else {
        selected
    }
}

/// Add the producers each selected capability depends on and order the
/// result so every required field is produced first.
fn plan_order(selected: &[&str], capabilities: &[CapabilityDescriptor]) -> Vec<String> {
    let mut ordered = Vec::new();
    let mut available: BTreeSet<String> = REQUEST_FIELDS.iter().map(|f| f.to_string()).collect();

    for name in selected {
        visit(name, capabilities, &mut ordered, &mut available, 0);
    }

    // Prefer registration order when it is also a valid order
    let position = |name: &String| capabilities.iter().position(|c| &c.name == name);
    let mut by_registry = ordered.clone();
    by_registry.sort_by_key(position);

    if is_satisfiable(&by_registry, capabilities) {
        by_registry
    } else {
        ordered
    }
}

fn visit(
    name: &str,
    capabilities: &[CapabilityDescriptor],
    ordered: &mut Vec<String>,
    available: &mut BTreeSet<String>,
    depth: usize,
) {
    if depth > capabilities.len() || ordered.iter().any(|n| n == name) {
        return;
    }
    let Some(descriptor) = capabilities.iter().find(|c| c.name == name) else {
        return;
    };

    for field in &descriptor.requires {
        if available.contains(field) {
            continue;
        }
        if let Some(producer) = capabilities
            .iter()
            .find(|c| c.name != descriptor.name && c.produces.contains(field))
        {
            visit(&producer.name, capabilities, ordered, available, depth + 1);
        }
    }

    ordered.push(descriptor.name.clone());
    available.extend(descriptor.produces.iter().cloned());
}

fn is_satisfiable(order: &[String], capabilities: &[CapabilityDescriptor]) -> bool {
    let mut available: BTreeSet<&str> = REQUEST_FIELDS.iter().copied().collect();

    for name in order {
        let Some(descriptor) = capabilities.iter().find(|c| &c.name == name) else {
            return false;
        };
        if descriptor.requires.iter().any(|f| !available.contains(f.as_str())) {
            return false;
        }
        available.extend(descriptor.produces.iter().map(String::as_str));
    }
    true
}

/// Segment, country, product and trailing-window filters for `fetch`.
fn extract_filters(text: &str) -> Map<String, Value> {
    let mut filters = Map::new();

    let first_match = |names: &[&str]| names.iter().find(|n| mentions(text, n)).map(|n| title_case(n));

    if let Some(segment) = first_match(SEGMENTS) {
        filters.insert("segment".into(), json!(segment));
    }
    if let Some(country) = first_match(COUNTRIES) {
        let country = match country.as_str() {
            "Usa" | "United States" => "United States of America".to_string(),
            _ => country,
        };
        filters.insert("country".into(), json!(country));
    }
    if let Some(product) = first_match(PRODUCTS) {
        let product = if product == "Vtt" { "VTT".to_string() } else { product };
        filters.insert("product".into(), json!(product));
    }
    if let Some((unit, count)) = trailing_window(text) {
        filters.insert(unit.into(), json!(count));
    }

    filters
}

/// "last quarter", "last 2 quarters", "last three months", "last year"
fn trailing_window(text: &str) -> Option<(&'static str, u32)> {
    let tokens: Vec<&str> = words(text).collect();

    for (i, token) in tokens.iter().enumerate() {
        if *token != "last" && *token != "past" {
            continue;
        }

        let mut next = i + 1;
        let count = match tokens.get(next).and_then(|t| parse_count(t)) {
            Some(n) => {
                next += 1;
                n
            }
            None => 1,
        };

        let unit = match tokens.get(next) {
            Some(t) if t.starts_with("quarter") => "quarters",
            Some(t) if t.starts_with("month") => "months",
            Some(t) if t.starts_with("year") => "years",
            _ => continue,
        };
        return Some((unit, count.max(1)));
    }

    None
}

fn parse_count(token: &str) -> Option<u32> {
    const NUMBER_WORDS: [&str; 12] = [
        "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten", "eleven",
        "twelve",
    ];
    token.parse().ok().or_else(|| {
        NUMBER_WORDS
            .iter()
            .position(|w| *w == token)
            .map(|p| p as u32 + 1)
    })
}

fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Plan, RequestHints};
    use crate::planner::Planner;
    use crate::test_support::baseline_registry;
    use std::collections::BTreeMap;

    fn descriptors() -> Vec<CapabilityDescriptor> {
        baseline_registry().all().into_iter().cloned().collect()
    }

    fn step_names(response: &Value) -> Vec<String> {
        response["steps"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["capability"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_vague_request_asks_standard_questions() {
        let response = HeuristicInterpreter::respond(&Request::new("help me"), &descriptors());
        assert_eq!(response["clarification_needed"], json!(true));
        assert_eq!(response["clarification_questions"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_vague_phrase_needs_a_domain_term_to_plan() {
        assert!(is_vague("show me something useful today please"));
        assert!(!is_vague("show me profit trends for canada"));

        let response = HeuristicInterpreter::respond(
            &Request::new("Show me profit trends for Canada"),
            &descriptors(),
        );
        assert_eq!(response["clarification_needed"], json!(false));
        assert!(step_names(&response).contains(&FETCH.to_string()));
    }

    #[test]
    fn test_clarification_answers_suppress_questions() {
        let hints = RequestHints {
            clarification_answers: BTreeMap::from([(
                CLARIFICATION_QUESTIONS[1].to_string(),
                "last 2 quarters for Canada".to_string(),
            )]),
            ..Default::default()
        };
        let request = Request::new("analyze data").with_hints(hints);

        let response = HeuristicInterpreter::respond(&request, &descriptors());
        assert_eq!(response["clarification_needed"], json!(false));
        assert_eq!(step_names(&response), vec![FETCH, ANALYZE]);
        assert_eq!(response["steps"][0]["parameters"]["country"], json!("Canada"));
        assert_eq!(response["steps"][0]["parameters"]["quarters"], json!(2));
    }

    #[test]
    fn test_out_of_scope_request_is_clarified() {
        let response = HeuristicInterpreter::respond(
            &Request::new("What will the bitcoin price be next month?"),
            &descriptors(),
        );
        assert_eq!(response["clarification_needed"], json!(true));
    }

    #[test]
    fn test_selection_pulls_in_producers() {
        let response = HeuristicInterpreter::respond(
            &Request::new("Summarize profit by segment for 2014"),
            &descriptors(),
        );
        assert_eq!(step_names(&response), vec![FETCH, ANALYZE, SUMMARIZE]);

        let response = HeuristicInterpreter::respond(
            &Request::new("Create a chart of Government profit"),
            &descriptors(),
        );
        assert_eq!(step_names(&response), vec![FETCH, VISUALIZE]);
        assert_eq!(response["steps"][0]["parameters"]["segment"], json!("Government"));
    }

    #[test]
    fn test_no_keywords_selects_everything() {
        let response = HeuristicInterpreter::respond(
            &Request::new("Profit for Canada over the last three months"),
            &descriptors(),
        );
        assert_eq!(step_names(&response), vec![FETCH, ANALYZE, VISUALIZE, SUMMARIZE]);
        assert_eq!(response["steps"][0]["parameters"]["months"], json!(3));
    }

    #[test]
    fn test_trailing_window_parsing() {
        assert_eq!(trailing_window("profit last quarter"), Some(("quarters", 1)));
        assert_eq!(trailing_window("over the past 2 years"), Some(("years", 2)));
        assert_eq!(trailing_window("the last one"), None);
        assert_eq!(trailing_window("quarterly profit"), None);
    }

    #[test]
    fn test_short_domain_request_is_vague() {
        assert!(is_vague("show trends"));
        assert!(is_vague("tell me something interesting about things"));
        assert!(!is_vague("show me profit trends for canada"));
    }

    #[tokio::test]
    async fn test_heuristic_plans_pass_validation() {
        let planner = Planner::new(Box::new(HeuristicInterpreter), 10);
        let registry = baseline_registry();

        for text in [
            "Show me profit trends for Canada last quarter",
            "Create a chart of segment profit",
            "Write a report on Paseo sales performance",
        ] {
            let plan = planner.plan(&Request::new(text), &registry).await.unwrap();
            assert!(matches!(plan, Plan::Executable { .. }), "{}", text);
        }
    }
}
