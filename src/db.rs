use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::debug;

use crate::auth::repo::{StoreError, UniqueField, UserStore};
use crate::auth::repo_types::{AuthToken, NewUser, User};
use crate::config::AppConfig;

const USER_COLUMNS: &str =
    "id, username, email, password_hash, first_name, last_name, role, date_joined";

/// One statement, so a concurrent logout cannot slip between insert and read.
/// The no-op update makes RETURNING yield the existing row on conflict.
const GET_OR_CREATE_TOKEN_SQL: &str = r#"
    INSERT INTO auth_tokens (key, user_id)
    VALUES ($1, $2)
    ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
    RETURNING key, user_id
"#;

#[derive(Clone)]
pub struct PgStore {
    pub db: PgPool,
}

impl PgStore {
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;
        Ok(Self { db })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .context("run migrations")?;
        Ok(())
    }

    async fn find_user_where(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }
}

/// Map a unique violation on `users` to the column it guards.
fn duplicate_field(err: &sqlx::Error) -> Option<UniqueField> {
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };
    if !db_err.is_unique_violation() {
        return None;
    }
    match db_err.constraint() {
        Some("uq_users_username") => Some(UniqueField::Username),
        Some("uq_users_email") => Some(UniqueField::Email),
        _ => None,
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.find_user_where("username", username).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find_user_where("email", email).await
    }

    async fn create(&self, new_user: &NewUser) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO users (username, email, password_hash, first_name, last_name, role)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(&new_user.username)
            .bind(&new_user.email)
            .bind(&new_user.password_hash)
            .bind(&new_user.first_name)
            .bind(&new_user.last_name)
            .bind(new_user.role)
            .fetch_one(&self.db)
            .await
            .map_err(|e| match duplicate_field(&e) {
                Some(field) => StoreError::Duplicate(field),
                None => StoreError::Database(e),
            })
    }

    async fn get_or_create_token(
        &self,
        user_id: i64,
        candidate_key: &str,
    ) -> Result<AuthToken, StoreError> {
        let token = sqlx::query_as::<_, AuthToken>(GET_OR_CREATE_TOKEN_SQL)
            .bind(candidate_key)
            .bind(user_id)
            .fetch_one(&self.db)
            .await?;
        debug!(user_id, reused = token.key != candidate_key, "token get_or_create");
        Ok(token)
    }

    async fn find_user_by_token(&self, key: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.username, u.email, u.password_hash, u.first_name, u.last_name,
                   u.role, u.date_joined
              FROM auth_tokens t
              JOIN users u ON u.id = t.user_id
             WHERE t.key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn delete_token(&self, key: &str) -> Result<bool, StoreError> {
        let res = sqlx::query(r#"DELETE FROM auth_tokens WHERE key = $1"#)
            .bind(key)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_errors_are_not_duplicates() {
        assert_eq!(duplicate_field(&sqlx::Error::RowNotFound), None);
        assert_eq!(duplicate_field(&sqlx::Error::PoolTimedOut), None);
    }

    #[test]
    fn token_upsert_is_a_single_returning_statement() {
        let sql = GET_OR_CREATE_TOKEN_SQL;
        assert_eq!(sql.matches(';').count(), 0);
        assert!(sql.contains("ON CONFLICT (user_id) DO UPDATE"));
        assert!(sql.trim_end().ends_with("RETURNING key, user_id"));
        assert!(!sql.contains("DO NOTHING"));
    }
}
