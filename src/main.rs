use std::sync::Arc;

use tokio::net::TcpListener;

use atelier_server::config::{generate_config_template, Config};
use atelier_server::execution::ExecutionManager;
use atelier_server::files::InMemoryFileStore;
use atelier_server::registry::SessionRegistry;
use atelier_server::routes;
use atelier_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "atelier_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "atelier_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("atelier-server v{} starting", env!("CARGO_PKG_VERSION"));

    let engine = config.engine.clone().unwrap_or_default();
    tracing::info!(
        host = %engine.host,
        port = engine.port,
        "execution engine endpoint configured"
    );

    let app_state = AppState {
        registry: Arc::new(SessionRegistry::new()),
        executions: Arc::new(ExecutionManager::new()),
        files: Arc::new(InMemoryFileStore::new()),
        engine,
    };
    let executions = app_state.executions.clone();

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    // Close any engine sockets still open before exit.
    executions.shutdown_all().await;

    Ok(())
}
