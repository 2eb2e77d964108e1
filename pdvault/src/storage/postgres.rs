//! PostgreSQL storage backend.
//!
//! Both storage seams share one connection pool. Reset-token consumption is
//! a single `DELETE .. RETURNING`, so concurrent resets with the same token
//! cannot both succeed.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::instrument;

use crate::auth::password::{generate_reset_token, reset_token_digest};
use crate::types::AccountId;

use super::{
    Account, AccountPatch, AccountsStorage, CreateAccount, ResetRequest, ResetRequestsStorage,
    Result, StorageError,
};

pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Connect to the database and run pending migrations.
    pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| anyhow::anyhow!("failed to connect to postgres: {e}"))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| anyhow::anyhow!("failed to run database migrations: {e}"))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl AccountsStorage for PostgresStorage {
    #[instrument(skip(self, request), fields(username = %request.username), err)]
    async fn create_account(&self, request: CreateAccount) -> Result<Account> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (username, email, language, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, email, language, password_hash, db_documents, attached_files
            "#,
        )
        .bind(&request.username)
        .bind(&request.email)
        .bind(&request.language)
        .bind(&request.password_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(account)
    }

    #[instrument(skip(self), err)]
    async fn find_account(&self, id: AccountId) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT id, username, email, language, password_hash, db_documents, attached_files
             FROM accounts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    #[instrument(skip(self), err)]
    async fn find_by_username(&self, username: &str) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT id, username, email, language, password_hash, db_documents, attached_files
             FROM accounts WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    #[instrument(skip(self, patch), err)]
    async fn update_account(&self, id: AccountId, patch: &AccountPatch) -> Result<Account> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET email = COALESCE($2, email),
                language = COALESCE($3, language),
                password_hash = COALESCE($4, password_hash),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, username, email, language, password_hash, db_documents, attached_files
            "#,
        )
        .bind(id)
        .bind(&patch.email)
        .bind(&patch.language)
        .bind(&patch.password_hash)
        .fetch_optional(&self.pool)
        .await?;

        account.ok_or(StorageError::NotFound)
    }

    #[instrument(skip(self, token), err)]
    async fn account_for_token(&self, token: &str) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT a.id, a.username, a.email, a.language, a.password_hash,
                   a.db_documents, a.attached_files
            FROM accounts a
            JOIN personal_accesses p ON p.account_id = a.id
            WHERE p.token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    #[instrument(skip(self, token), err)]
    async fn grant_personal_token(&self, account_id: AccountId, token: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO personal_accesses (token, account_id)
            VALUES ($1, $2)
            ON CONFLICT (token) DO UPDATE SET account_id = EXCLUDED.account_id
            "#,
        )
        .bind(token)
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ResetRequestsStorage for PostgresStorage {
    #[instrument(skip(self), err)]
    async fn generate(&self, username: &str, valid_for: Duration) -> Result<String> {
        let token = generate_reset_token();
        let valid_for = ChronoDuration::from_std(valid_for)
            .map_err(|e| StorageError::Other(anyhow::anyhow!("reset validity out of range: {e}")))?;

        sqlx::query(
            "INSERT INTO password_reset_requests (token_digest, username, expires_at)
             VALUES ($1, $2, $3)",
        )
        .bind(reset_token_digest(&token))
        .bind(username)
        .bind(Utc::now() + valid_for)
        .execute(&self.pool)
        .await?;

        Ok(token)
    }

    #[instrument(skip(self, token), err)]
    async fn take(&self, token: &str, username: &str) -> Result<Option<ResetRequest>> {
        // Consume-on-match: expired or mismatched records are left alone.
        let request = sqlx::query_as::<_, ResetRequest>(
            r#"
            DELETE FROM password_reset_requests
            WHERE token_digest = $1 AND username = $2 AND expires_at > NOW()
            RETURNING username, expires_at, created_at
            "#,
        )
        .bind(reset_token_digest(token))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(request)
    }

    #[instrument(skip(self), err)]
    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM password_reset_requests WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
