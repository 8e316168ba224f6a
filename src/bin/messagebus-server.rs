//! # Message Bus Server
//!
//! Hosts the in-process message bus with the known event handlers, optionally
//! seeds demo users through the user service, and runs until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use messagebus_core::config::ConfigManager;
use messagebus_core::handlers::UserCreatedHandler;
use messagebus_core::logging::init_structured_logging;
use messagebus_core::messagebus::{EventContext, MessageBusModule};
use messagebus_core::services::{CreateUserRequest, InMemoryUserRepository, UserService};

#[derive(Parser)]
#[command(name = "messagebus-server")]
#[command(about = "Run the in-process message bus")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// YAML configuration file layered over the built-in defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Create this many demo users after startup
    #[arg(long, default_value_t = 0)]
    demo_users: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let manager = ConfigManager::load(cli.config.as_deref()).context("failed to load configuration")?;
    let config = manager.config();
    init_structured_logging(&config.logging, manager.environment());

    info!(
        environment = %manager.environment(),
        version = env!("CARGO_PKG_VERSION"),
        "🚀 Starting messagebus-server"
    );

    let handle = MessageBusModule::new(config.messagebus.clone())
        .with_handler(Arc::new(UserCreatedHandler::new()))
        .start()
        .context("failed to start message bus")?;

    let users = UserService::new(Arc::new(InMemoryUserRepository::new()), handle.publisher());
    for n in 1..=cli.demo_users {
        let request = CreateUserRequest::new(format!("Demo User {n}"), format!("demo{n}@example.com"));
        if let Err(e) = users.create_user(EventContext::new(), request).await {
            error!(error = %e, "Failed to create demo user");
        }
    }

    info!("Message bus running - press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("🛑 Shutdown signal received");
    handle.stop().await.context("failed to stop message bus")?;
    info!("✅ messagebus-server stopped");
    Ok(())
}
