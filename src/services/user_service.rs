use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use super::user_repository::{RepositoryError, User, UserRepository};
use crate::events::UserCreatedEvent;
use crate::messagebus::{EventContext, Publisher, PublisherExt};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 2, max = 100, message = "must be between 2 and 100 characters"))]
    pub name: String,
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
}

impl CreateUserRequest {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Surrounding whitespace is not part of either field.
    fn trimmed(&self) -> Self {
        Self::new(self.name.trim(), self.email.trim())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("User not found: {id}")]
    NotFound { id: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl UserServiceError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<ValidationErrors> for UserServiceError {
    /// Failing fields in name order, joined with ", "; their messages joined with "; ".
    fn from(errors: ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        let field = fields
            .iter()
            .map(|(name, _)| name.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let reason = fields
            .iter()
            .flat_map(|(_, errs)| errs.iter())
            .map(|e| {
                e.message
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| e.code.to_string())
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(field, reason)
    }
}

/// User management. Announces new users on `user.created`.
#[derive(Clone)]
pub struct UserService {
    repository: Arc<dyn UserRepository>,
    publisher: Arc<dyn Publisher>,
}

impl std::fmt::Debug for UserService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserService").finish_non_exhaustive()
    }
}

impl UserService {
    pub fn new(repository: Arc<dyn UserRepository>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            repository,
            publisher,
        }
    }

    /// Validate, persist, then publish [`UserCreatedEvent`].
    ///
    /// The user is returned even when the publish fails.
    pub async fn create_user(
        &self,
        ctx: EventContext,
        request: CreateUserRequest,
    ) -> Result<User, UserServiceError> {
        let request = request.trimmed();
        request.validate()?;

        let user = User {
            id: Uuid::new_v4(),
            name: request.name,
            email: request.email,
            created_at: Utc::now(),
        };

        self.repository.create(&user).await.inspect_err(|e| {
            error!(error = %e, email = %user.email, "Failed to create user");
        })?;

        let event = UserCreatedEvent::new(user.id, user.name.clone(), user.email.clone());
        match self.publisher.publish(ctx, &event).await {
            Ok(message_id) => debug!(
                user_id = %user.id,
                message_id = %message_id,
                "Published UserCreatedEvent"
            ),
            Err(e) => error!(
                user_id = %user.id,
                error = %e,
                "Failed to publish UserCreatedEvent"
            ),
        }

        info!(user_id = %user.id, "User created");
        Ok(user)
    }

    /// Look up a user by its string id. Unparseable ids are reported as not found.
    pub async fn get_user(&self, id: &str) -> Result<User, UserServiceError> {
        let not_found = || UserServiceError::NotFound { id: id.to_string() };
        let user_id = Uuid::parse_str(id).map_err(|_| not_found())?;

        self.repository
            .get_by_id(user_id)
            .await
            .inspect_err(|e| error!(error = %e, user_id = %user_id, "Failed to get user"))?
            .ok_or_else(not_found)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, UserServiceError> {
        let users = self
            .repository
            .list()
            .await
            .inspect_err(|e| error!(error = %e, "Failed to list users"))?;
        debug!(count = users.len(), "Listed users");
        Ok(users)
    }
}
