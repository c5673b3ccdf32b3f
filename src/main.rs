//! payrail service entry point
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐
//! │ Gateway  │───▶│  Engine  │───▶│ EventBus │───▶│  Router  │──▶ webhooks
//! │(idem key)│    │(bank+ldg)│    │(by id)   │    │          │──▶ DLQ
//! └──────────┘    └──────────┘    └──────────┘    └──────────┘
//! ```
//!
//! Usage: `payrail [--env dev|prod] [--port 8080]`

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use payrail::app::Pipeline;
use payrail::config::AppConfig;
use payrail::gateway::run_server;
use payrail::logging::init_logging;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Port override from the command line (--port)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = init_logging(&app_config.logging);

    tracing::info!(build = env!("PAYRAIL_BUILD"), "Starting payrail in {} mode", env);

    let port = get_port_override().unwrap_or(app_config.gateway.port);
    let addr = format!("{}:{}", app_config.gateway.host, port);

    let mut pipeline = Pipeline::build(app_config).await?;
    let cancel = CancellationToken::new();
    let workers = pipeline.spawn_background(&cancel);

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!("Failed to listen for ctrl-c: {}", e),
        }
        shutdown.cancel();
    });

    let served = run_server(&addr, pipeline.http_router(), cancel.clone())
        .await
        .with_context(|| format!("Gateway failed on {}", addr));

    // A bind failure must still stop the background loops
    cancel.cancel();
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!("Background task panicked: {}", e);
        }
    }
    tracing::info!("payrail stopped");
    served
}
