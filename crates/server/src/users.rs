//! Demo user storage behind an injected repository.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DemoUser {
    /// Time-derived identifier
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: OffsetDateTime,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn list(&self) -> Vec<DemoUser>;
    async fn get(&self, id: &str) -> Option<DemoUser>;
    async fn insert(&self, name: String, email: String) -> DemoUser;
}

/// Process-local repository. Contents are lost on restart.
#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<Vec<DemoUser>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn list(&self) -> Vec<DemoUser> {
        self.users.read().await.clone()
    }

    async fn get(&self, id: &str) -> Option<DemoUser> {
        self.users.read().await.iter().find(|u| u.id == id).cloned()
    }

    async fn insert(&self, name: String, email: String) -> DemoUser {
        let mut users = self.users.write().await;
        let created_at = OffsetDateTime::now_utc();
        // Millisecond ids collide under bursts; bump past any taken value.
        let mut id = (created_at.unix_timestamp_nanos() / 1_000_000) as i64;
        while users.iter().any(|u| u.id == id.to_string()) {
            id += 1;
        }
        let user = DemoUser {
            id: id.to_string(),
            name,
            email,
            created_at,
        };
        users.push(user.clone());
        user
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_stay_unique_within_one_millisecond() {
        let repo = InMemoryUserRepository::new();
        let a = repo.insert("A".into(), "a@x".into()).await;
        let b = repo.insert("B".into(), "b@x".into()).await;
        assert_ne!(a.id, b.id);
        assert_eq!(repo.list().await.len(), 2);
        assert_eq!(repo.get(&b.id).await, Some(b));
        assert_eq!(repo.get("nope").await, None);
    }
}
