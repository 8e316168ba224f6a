//! # Shared Events
//!
//! Event types exchanged between bounded contexts. Producers and consumers
//! depend on this module, never on each other.

pub mod user_events;

pub use user_events::{UserCreatedEvent, TOPIC_USER_CREATED};
