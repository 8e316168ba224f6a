use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("User {0} already exists")]
    Conflict(Uuid),

    #[error("Email '{0}' is already registered")]
    DuplicateEmail(String),

    #[error("Repository backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Storage for users
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &User) -> Result<(), RepositoryError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError>;

    /// All users, oldest first
    async fn list(&self) -> Result<Vec<User>, RepositoryError>;
}

/// Process-local repository backed by concurrent maps
#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    users: DashMap<Uuid, User>,
    /// Lowercased email to owning user id
    emails: DashMap<String, Uuid>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, user: &User) -> Result<(), RepositoryError> {
        // The email slot stays locked until the user is stored.
        let Entry::Vacant(email_slot) = self.emails.entry(user.email.to_lowercase()) else {
            return Err(RepositoryError::DuplicateEmail(user.email.clone()));
        };

        match self.users.entry(user.id) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(user.id)),
            Entry::Vacant(slot) => {
                slot.insert(user.clone());
                email_slot.insert(user.id);
                Ok(())
            }
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list(&self) -> Result<Vec<User>, RepositoryError> {
        let mut users: Vec<User> = self.users.iter().map(|entry| entry.value().clone()).collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(users)
    }
}
