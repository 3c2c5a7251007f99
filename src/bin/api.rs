use research_orchestrator::{
    agent::Orchestrator,
    api::{start_server, ApiState},
    audit::AuditLog,
    config::Settings,
    memory::build_store,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Loads .env as well
    let settings = Settings::from_env()?;

    info!("Research Orchestrator - API Server");
    info!(port = settings.api_port, provider = %settings.llm_provider, "Starting");

    let orchestrator = Arc::new(Orchestrator::from_settings(
        &settings,
        Arc::new(AuditLog::new()),
    )?);
    let conversations = build_store(settings.database_url.as_deref());

    let state = ApiState::new(orchestrator, conversations)
        .with_providers(settings.configured_providers());

    info!("Orchestrator initialized");

    start_server(state, settings.api_port).await?;

    Ok(())
}
