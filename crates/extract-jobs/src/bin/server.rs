//! Extraction job server binary
//!
//! Run with: cargo run -p extract-jobs --bin extract-jobs-server

use extract_jobs::{config::ExtractConfig, server::ExtractServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "extract_jobs=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!(
        r#"
╔═══════════════════════════════════════════════════════════╗
║                    Extract Jobs Engine                    ║
║        Document Extraction with Live Progress             ║
╚═══════════════════════════════════════════════════════════╝
"#
    );

    // Load configuration
    let config = ExtractConfig::load()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Extractor: {}", config.extractor.base_url);
    tracing::info!("  - Sections: {}", config.pipeline.sections.join(", "));
    tracing::info!("  - Concurrent jobs: {}", config.pipeline.max_concurrent_jobs);
    tracing::info!("  - Size budget: {} chars", config.sizing.budget_chars);
    for window in &config.admission.windows {
        tracing::info!(
            "  - Admission window '{}': {} requests / {}s",
            window.name,
            window.max_requests,
            window.duration_secs
        );
    }

    // Check the extraction service
    tracing::info!("Checking extractor at {}...", config.extractor.base_url);
    let client = reqwest::Client::new();
    match client.get(format!("{}/health", config.extractor.base_url)).send().await {
        Ok(resp) if resp.status().is_success() => {
            tracing::info!("Extractor is reachable");
        }
        _ => {
            tracing::warn!("Extractor not available at {}", config.extractor.base_url);
            tracing::warn!("Jobs will retry and then fail until it is started");
        }
    }

    // Create and start server
    let server = ExtractServer::new(config)?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  API Info: http://{}/api/info", server.address());
    println!("\nEndpoints:");
    println!("  POST /api/jobs             - Submit a document");
    println!("  GET  /api/jobs/:id         - Job status");
    println!("  GET  /api/jobs/:id/events  - Live progress stream");
    println!("  POST /api/jobs/:id/cancel  - Cancel a job");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
