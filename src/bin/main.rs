use financial_advice_orchestrator::{
    agent::Orchestrator,
    audit::RunLog,
    config::PipelinePolicy,
    llm::ScriptedCompletionClient,
    models::AdviceRequest,
    session::{SessionChannel, SessionEvent},
    snapshot::InMemorySnapshotProvider,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Offline demo run: scripted model, in-memory demo account, events printed
/// as they would go over the wire.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Should I pay off my credit card before investing?".to_string());

    info!("Financial Advice Orchestrator - offline demo");

    let client = Arc::new(
        ScriptedCompletionClient::new()
            .with_tokens(&["Start with ", "the card: ", "its rate beats ", "any likely return."]),
    );
    let orchestrator = Orchestrator::new(
        Arc::new(InMemorySnapshotProvider::with_demo_account().await),
        client,
        &PipelinePolicy::default(),
        Arc::new(RunLog::new()),
    );

    let (channel, mut rx) = SessionChannel::pair(64, Duration::from_secs(15));
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                SessionEvent::KeepAlive => println!(": keep-alive"),
                other => println!("data: {}", serde_json::to_string(&other).unwrap_or_default()),
            }
        }
    });

    let report = orchestrator
        .run(AdviceRequest::new(question, "demo"), channel)
        .await;
    printer.await?;

    println!("\n=== RUN REPORT ===");
    println!("Run ID: {}", report.run_id);
    println!("Terminal state: {:?}", report.terminal);
    println!("Experts: {:?} ({} degraded)", report.experts, report.degraded);
    for timing in &report.timings {
        println!("  {:?}: {}ms", timing.stage, timing.elapsed_ms);
    }

    Ok(())
}
