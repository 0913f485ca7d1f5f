//! sandbox-server entry point.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use nsjail_python_sandbox_rs::http::{api_prefix, build_router, AppState, VERSION};
use nsjail_python_sandbox_rs::logging::init_logging;
use nsjail_python_sandbox_rs::{AppConfig, SandboxRunner};

/// Config file used when neither an argument nor `SANDBOX_CONFIG` is given.
const DEFAULT_CONFIG_PATH: &str = "application.yaml";

fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("SANDBOX_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();

    let path = config_path();
    let config = AppConfig::from_yaml_file(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    init_logging(&config.logging);

    tracing::info!("sandbox-server v{}", VERSION);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.server.host, config.server.port))?;

    let runner = SandboxRunner::new(config.sandbox);
    tracing::info!(
        binary = %runner.config().binary_path.display(),
        timeout_secs = runner.config().timeout.as_secs(),
        allowed_modules = runner.config().allowed_modules.len(),
        "sandbox configured"
    );

    let app = build_router(AppState::new(runner));

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "service initialized in {:?}",
        startup_duration
    );
    tracing::info!("listening on {} (routes under {})", addr, api_prefix());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
