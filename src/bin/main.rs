use financial_report_orchestrator::{
    Orchestrator, OrchestratorConfig, Outcome, Request, RequestHints, ResultBundle, StepStatus,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const MAX_CLARIFICATION_ROUNDS: usize = 2;

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = OrchestratorConfig::from_env()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("Financial Report Orchestrator starting");

    let orchestrator = Orchestrator::from_config(&config)?;
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    // One-shot mode: the request is given on the command line
    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        return run_request(&orchestrator, &mut input, args.join(" ")).await;
    }

    print_help();
    loop {
        let Some(line) = prompt(&mut input, "\nrequest> ").await? else {
            break;
        };

        match line.as_str() {
            "" => continue,
            "quit" | "exit" => break,
            "help" => print_help(),
            "capabilities" => print_capabilities(&orchestrator),
            text => {
                if let Err(e) = run_request(&orchestrator, &mut input, text.to_string()).await {
                    eprintln!("Request failed: {}", e);
                }
            }
        }
    }

    Ok(())
}

/// Submit one request, answering clarification questions from stdin.
async fn run_request(
    orchestrator: &Orchestrator,
    input: &mut Input,
    text: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut hints = RequestHints::default();

    for round in 0..=MAX_CLARIFICATION_ROUNDS {
        let request = Request::new(text.clone()).with_hints(hints.clone());

        match orchestrator.submit(request).await? {
            Outcome::Completed { bundle, .. } => {
                print_bundle(&bundle);
                return Ok(());
            }
            Outcome::ClarificationNeeded { question, .. } => {
                if round == MAX_CLARIFICATION_ROUNDS {
                    warn!(rounds = round, "Giving up after repeated clarification requests");
                    println!("\nStill unclear: {}", question);
                    return Ok(());
                }

                println!("\nI need a bit more detail before running this report.");
                for q in question.lines().filter(|q| !q.trim().is_empty()) {
                    let Some(answer) = prompt(input, &format!("{}\n> ", q.trim())).await? else {
                        return Ok(());
                    };
                    if !answer.is_empty() {
                        hints.clarification_answers.insert(q.trim().to_string(), answer);
                    }
                }
            }
        }
    }

    Ok(())
}

async fn prompt(input: &mut Input, label: &str) -> std::io::Result<Option<String>> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(label.as_bytes()).await?;
    stdout.flush().await?;
    Ok(input.next_line().await?.map(|l| l.trim().to_string()))
}

fn print_help() {
    println!("=== FINANCIAL REPORT ORCHESTRATOR ===");
    println!("Ask about segments, countries, products, sales or profit.");
    println!("  e.g. Show profit trends for the Government segment over the last 4 quarters");
    println!("Commands: help, capabilities, quit");
}

fn print_capabilities(orchestrator: &Orchestrator) {
    println!("\nAvailable capabilities:");
    for descriptor in orchestrator.capabilities() {
        println!(
            "  {:<10} {} (requires: [{}], produces: [{}])",
            descriptor.name,
            descriptor.description,
            descriptor.requires.join(", "),
            descriptor.produces.join(", ")
        );
    }
}

fn print_bundle(bundle: &ResultBundle) {
    println!("\n=== REPORT ===");
    println!("Run ID: {}", bundle.run_id);

    match &bundle.narrative {
        Some(narrative) => println!("\n{}", narrative),
        None => println!("\nNarrative: not available"),
    }

    if let Some(metrics) = &bundle.metrics {
        println!("\nMetrics:");
        println!(
            "{}",
            serde_json::to_string_pretty(metrics).unwrap_or_else(|_| metrics.to_string())
        );
    }

    if !bundle.visuals.is_empty() {
        println!("\nVisuals:");
        for visual in &bundle.visuals {
            println!("  [{:?}] {} - {}", visual.kind, visual.title, visual.caption);
        }
    }

    if let Some(preview) = &bundle.data_preview {
        println!(
            "\nData preview ({} of {} rows):",
            preview.rows.len(),
            preview.total_rows
        );
        println!("  {}", preview.columns.join(" | "));
        for row in &preview.rows {
            let cells: Vec<String> = preview
                .columns
                .iter()
                .map(|c| match &row[c] {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            println!("  {}", cells.join(" | "));
        }
    }

    println!("\nExecution trace:");
    for record in &bundle.trace {
        let detail = match (&record.status, &record.error) {
            (StepStatus::Succeeded, _) => format!("{} ms", record.duration_ms),
            (_, Some(error)) => format!("{:?}: {}", error.kind, error.message),
            (_, None) => String::new(),
        };
        println!(
            "  {}. {:<10} {:<9} {}",
            record.step_index + 1,
            record.capability,
            record.status,
            detail
        );
    }
    println!("\nContext digest: {}", bundle.context_digest);
}
