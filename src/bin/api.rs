use financial_report_orchestrator::{api::start_server, Orchestrator, OrchestratorConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    let config = OrchestratorConfig::from_env()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("Financial Report Orchestrator - API Server");
    info!(port = config.api_port, model = %config.gemini_model, "Configuration loaded");

    let orchestrator = Arc::new(Orchestrator::from_config(&config)?);

    info!(
        capabilities = orchestrator.capabilities().len(),
        "Orchestrator initialized, starting API server"
    );

    start_server(orchestrator, config.api_port).await?;

    Ok(())
}
