use financial_advice_orchestrator::{
    agent::Orchestrator,
    api::{start_server, ApiState},
    audit::RunLog,
    config::AdvisorConfig,
    llm::GeminiClient,
    snapshot::{InMemorySnapshotProvider, PgSnapshotProvider, SnapshotProvider},
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AdvisorConfig::from_env()?;

    if config.gemini_api_key.is_empty() {
        warn!("GEMINI_API_KEY not set; every model call will be rejected");
    }

    info!(
        port = config.port,
        model = %config.gemini_model,
        max_experts = config.policy.max_experts,
        "Financial Advice Orchestrator - API Server"
    );

    let mut gemini = GeminiClient::new(config.gemini_api_key.clone(), config.gemini_model.clone())?;
    if let Some(base_url) = config.gemini_base_url.as_deref() {
        gemini = gemini.with_base_url(base_url);
    }
    let client = Arc::new(gemini);

    let snapshots: Arc<dyn SnapshotProvider> = match config.database_url.as_deref() {
        Some(url) => Arc::new(PgSnapshotProvider::connect_lazy(url)?),
        None => {
            warn!("No DATABASE_URL set; serving the in-memory demo account");
            Arc::new(InMemorySnapshotProvider::with_demo_account().await)
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(
        snapshots,
        client,
        &config.policy,
        Arc::new(RunLog::new()),
    ));

    let port = config.port;
    let state = ApiState {
        orchestrator,
        config: Arc::new(config),
    };

    start_server(state, port).await?;

    Ok(())
}
