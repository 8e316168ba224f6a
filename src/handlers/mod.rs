//! Consumers of shared events.

pub mod user_created;

pub use user_created::UserCreatedHandler;
