use std::sync::Arc;

use lpflow::classifier::{ClassifierConfig, LlmBackend, create_classifier};
use lpflow::config::PipelineConfig;
use lpflow::http::{AppState, pipeline_routes};
use lpflow::pipeline::EmailParser;
use lpflow::store::{EmailStore, LibSqlBackend};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let db_path = std::env::var("LPFLOW_DB").unwrap_or_else(|_| "lpflow.db".to_string());
    let port: u16 = std::env::var("LPFLOW_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    // The classifier is optional: without an API key the pipeline runs
    // on the deterministic parser alone.
    let classifier = match std::env::var("ANTHROPIC_API_KEY") {
        Ok(key) if !key.is_empty() => {
            let model = std::env::var("LPFLOW_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string());
            tracing::info!(model = %model, "AI classifier enabled");
            Some(create_classifier(&ClassifierConfig {
                backend: LlmBackend::Anthropic,
                api_key: key.into(),
                model,
            })?)
        }
        _ => {
            tracing::warn!("ANTHROPIC_API_KEY not set, running with simple parser only");
            None
        }
    };

    let store: Arc<dyn EmailStore> =
        Arc::new(LibSqlBackend::new_local(std::path::Path::new(&db_path)).await?);
    tracing::info!(path = %db_path, "Database ready");

    let parser = Arc::new(EmailParser::new(store, classifier, PipelineConfig::default()));
    let app = pipeline_routes(AppState::new(parser));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!(port, "LPFlow API listening");
    axum::serve(listener, app).await?;

    Ok(())
}
