use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::messagebus::Event;

pub const TOPIC_USER_CREATED: &str = "user.created";

/// Published after a user has been persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreatedEvent {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
}

impl UserCreatedEvent {
    pub fn new(user_id: Uuid, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id,
            name: name.into(),
            email: email.into(),
        }
    }
}

impl Event for UserCreatedEvent {
    fn topic(&self) -> &str {
        TOPIC_USER_CREATED
    }
}
