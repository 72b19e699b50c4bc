use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Ulid,
    pub display_name: Option<String>,
}

/// Identity lookups served by the surrounding application.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get(&self, id: Ulid) -> Option<User>;

    async fn exists(&self, id: Ulid) -> bool {
        self.get(id).await.is_some()
    }
}

/// Process-local directory. Backs tests and the standalone host.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: DashMap<Ulid, User>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) {
        self.users.insert(user.id, user);
    }

    /// Register a bare id with no profile data.
    pub fn register(&self, id: Ulid) {
        self.users.entry(id).or_insert(User {
            id,
            display_name: None,
        });
    }

    pub fn remove(&self, id: &Ulid) -> Option<User> {
        self.users.remove(id).map(|(_, u)| u)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get(&self, id: Ulid) -> Option<User> {
        self.users.get(&id).map(|e| e.value().clone())
    }

    async fn exists(&self, id: Ulid) -> bool {
        self.users.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_lookup() {
        let dir = InMemoryUserDirectory::new();
        let id = Ulid::new();
        assert!(!dir.exists(id).await);

        dir.register(id);
        assert!(dir.exists(id).await);
        assert_eq!(dir.get(id).await.unwrap().display_name, None);

        dir.insert(User {
            id,
            display_name: Some("Mina".into()),
        });
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.get(id).await.unwrap().display_name.as_deref(), Some("Mina"));

        dir.remove(&id);
        assert!(dir.is_empty());
    }
}
