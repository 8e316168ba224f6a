//! Producer-side services.
//!
//! Services persist state first and then announce it on the message bus.
//! Publishing is best-effort: a failed publish is logged and never fails
//! the operation that already succeeded.

pub mod user_repository;
pub mod user_service;

pub use user_repository::{InMemoryUserRepository, RepositoryError, User, UserRepository};
pub use user_service::{CreateUserRequest, UserService, UserServiceError};
