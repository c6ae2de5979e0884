use async_trait::async_trait;

use crate::auth::repo_types::{AuthToken, NewUser, User};

/// Column covered by a unique constraint on `users`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
}

impl UniqueField {
    pub fn as_str(&self) -> &'static str {
        match self {
            UniqueField::Username => "username",
            UniqueField::Email => "email",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate {}", .0.as_str())]
    Duplicate(UniqueField),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence for users and their tokens.
///
/// Uniqueness of username/email and the one-token-per-user rule are the
/// store's responsibility, not the caller's.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// `email` must already be normalized.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Insert a user. A unique violation comes back as [`StoreError::Duplicate`].
    async fn create(&self, new_user: &NewUser) -> Result<User, StoreError>;

    /// Return the user's token, creating one with `candidate_key` if absent.
    async fn get_or_create_token(
        &self,
        user_id: i64,
        candidate_key: &str,
    ) -> Result<AuthToken, StoreError>;

    async fn find_user_by_token(&self, key: &str) -> Result<Option<User>, StoreError>;

    /// Returns whether a token was removed.
    async fn delete_token(&self, key: &str) -> Result<bool, StoreError>;
}

/// In-memory store backing the handler tests.
#[cfg(test)]
pub mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use time::OffsetDateTime;

    use super::*;

    #[derive(Default)]
    struct Inner {
        users: Vec<User>,
        tokens: HashMap<String, AuthToken>,
    }

    #[derive(Default)]
    pub struct MemoryStore {
        inner: Mutex<Inner>,
    }

    impl MemoryStore {
        pub fn token_count(&self) -> usize {
            self.inner.lock().unwrap().tokens.len()
        }

        pub fn user_count(&self) -> usize {
            self.inner.lock().unwrap().users.len()
        }
    }

    #[async_trait]
    impl UserStore for MemoryStore {
        async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.users.iter().find(|u| u.username == username).cloned())
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.users.iter().find(|u| u.email == email).cloned())
        }

        async fn create(&self, new_user: &NewUser) -> Result<User, StoreError> {
            let mut inner = self.inner.lock().unwrap();
            if inner.users.iter().any(|u| u.username == new_user.username) {
                return Err(StoreError::Duplicate(UniqueField::Username));
            }
            if inner.users.iter().any(|u| u.email == new_user.email) {
                return Err(StoreError::Duplicate(UniqueField::Email));
            }
            let user = User {
                id: inner.users.len() as i64 + 1,
                username: new_user.username.clone(),
                email: new_user.email.clone(),
                password_hash: new_user.password_hash.clone(),
                first_name: new_user.first_name.clone(),
                last_name: new_user.last_name.clone(),
                role: new_user.role,
                date_joined: OffsetDateTime::now_utc(),
            };
            inner.users.push(user.clone());
            Ok(user)
        }

        async fn get_or_create_token(
            &self,
            user_id: i64,
            candidate_key: &str,
        ) -> Result<AuthToken, StoreError> {
            let mut inner = self.inner.lock().unwrap();
            if let Some(existing) = inner.tokens.values().find(|t| t.user_id == user_id) {
                return Ok(existing.clone());
            }
            let token = AuthToken {
                key: candidate_key.to_string(),
                user_id,
            };
            inner.tokens.insert(token.key.clone(), token.clone());
            Ok(token)
        }

        async fn find_user_by_token(&self, key: &str) -> Result<Option<User>, StoreError> {
            let inner = self.inner.lock().unwrap();
            let Some(token) = inner.tokens.get(key) else {
                return Ok(None);
            };
            Ok(inner.users.iter().find(|u| u.id == token.user_id).cloned())
        }

        async fn delete_token(&self, key: &str) -> Result<bool, StoreError> {
            let mut inner = self.inner.lock().unwrap();
            Ok(inner.tokens.remove(key).is_some())
        }
    }

    mod tests {
        use super::*;

        #[tokio::test]
        async fn token_is_reused_until_deleted() {
            let store = MemoryStore::default();
            let first = store.get_or_create_token(1, "aaa").await.unwrap();
            let again = store.get_or_create_token(1, "bbb").await.unwrap();
            assert_eq!(first.key, "aaa");
            assert_eq!(again.key, "aaa");

            assert!(store.delete_token("aaa").await.unwrap());
            assert!(!store.delete_token("aaa").await.unwrap());
            let fresh = store.get_or_create_token(1, "ccc").await.unwrap();
            assert_eq!(fresh.key, "ccc");
            assert_eq!(store.token_count(), 1);
        }
    }
}
