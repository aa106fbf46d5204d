//! Cat/Dog Image Classification Service
//!
//! Serves a fine-tuned ResNet-18 over a REST (Axum) API.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use catdog::api::rest::{create_rest_router, AppState};
use catdog::config::Config;
use catdog::engine::model::parse_device;
use catdog::engine::ModelSlot;
use catdog::service::ClassifierService;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config_path = Config::default_path();
    let (config, config_note) = if Path::new(config_path).exists() {
        (Config::load(config_path)?, format!("loaded from {}", config_path))
    } else {
        (Config::default(), format!("{} not found, using defaults", config_path))
    };
    let config = config.with_env_overrides()?;
    config.validate()?;

    // Initialize logging
    let level = if config.server.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .init();

    info!("Starting Cat/Dog Classification Service v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration {}:", config_note);
    info!("  Address: {}", config.bind_addr());
    info!("  Model: {}", config.model.path.display());
    info!("  Classes: {:?}", config.model.class_names);
    info!("  Device: {}", config.model.device);
    info!("  Max upload: {} bytes", config.upload.max_file_size);
    if config.server.debug {
        warn!("Debug logging enabled");
    }

    // Load the model; the service does not start without one
    let device = parse_device(&config.model.device)?;
    let slot = Arc::new(ModelSlot::new(config.model.num_classes));
    slot.load_from(&config.model.path, &device)
        .with_context(|| format!("cannot start without a model ({})", config.model.path.display()))?;

    // Create classifier service
    let service = Arc::new(ClassifierService::from_config(slot, &config));
    let router = create_rest_router(Arc::new(AppState { service }));

    // Start REST server
    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("REST API listening on http://{}", addr);
    info!("Health: http://{}/health", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received, cleaning up...");
        })
        .await?;

    info!("Goodbye!");
    Ok(())
}
