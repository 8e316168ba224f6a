#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Message Bus Core
//!
//! In-process, topic-based publish/subscribe event bus for decoupling
//! bounded contexts inside a single service.
//!
//! ## Overview
//!
//! Producers publish typed events to named topics and get control back as
//! soon as the event is queued. Consumers register [`Handler`]s per topic
//! before the bus starts; every handler registered on a topic receives each
//! event published to it, concurrently and in isolation from the others.
//!
//! ## Module Organization
//!
//! - [`messagebus`] - Broker, handler contract, lifecycle and statistics
//! - [`events`] - Shared event types (`user.created`)
//! - [`handlers`] - Event consumers
//! - [`services`] - Event producers (user service and repository)
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use messagebus_core::config::ConfigManager;
//! use messagebus_core::handlers::UserCreatedHandler;
//! use messagebus_core::messagebus::{EventContext, MessageBusModule};
//! use messagebus_core::services::{CreateUserRequest, InMemoryUserRepository, UserService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load(None)?;
//! messagebus_core::logging::init_structured_logging(
//!     &manager.config().logging,
//!     manager.environment(),
//! );
//!
//! let handle = MessageBusModule::new(manager.config().messagebus.clone())
//!     .with_handler(Arc::new(UserCreatedHandler::new()))
//!     .start()?;
//!
//! let users = UserService::new(Arc::new(InMemoryUserRepository::new()), handle.publisher());
//! users
//!     .create_user(EventContext::new(), CreateUserRequest::new("Ann", "ann@example.com"))
//!     .await?;
//!
//! handle.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit, integration and property tests
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod logging;
pub mod messagebus;
pub mod services;

pub use crate::config::{AppConfig, ConfigManager, ConfigurationError, MessageBusConfig};
pub use error::{HandlerError, MessageBusError, Result};
pub use messagebus::{
    BusState, BusStatistics, EventContext, Handler, HandlerContext, InMemoryMessageBus,
    MessageBus, MessageBusHandle, MessageBusModule, Publisher, PublisherExt, Subscriber,
};
