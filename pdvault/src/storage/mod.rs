//! Storage abstraction layer.
//!
//! Two seams: [`AccountsStorage`] for account records and personal access
//! tokens, and [`ResetRequestsStorage`] for the password-reset token store.
//! Backends are selected from configuration via [`create_storage`]:
//! PostgreSQL for deployments, an in-memory store for development and tests.
//!
//! The reset-request store never holds raw tokens. Tokens are indexed by a
//! SHA-256 digest, and a lookup consumes the record, so a token that has
//! validated once can never validate again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::StorageConfig;
use crate::types::AccountId;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by storage backends
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("resource not found")]
    NotFound,

    #[error("{message}")]
    Conflict { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StorageError::Conflict {
                message: db_err
                    .constraint()
                    .map(|c| format!("unique constraint {c} violated"))
                    .unwrap_or_else(|| db_err.to_string()),
            },
            other => StorageError::Other(anyhow::Error::new(other).context("database error")),
        }
    }
}

/// Persisted account record.
///
/// `password_hash` and `id` stay inside the service; the API layer converts
/// to a sanitized wire model before anything leaves the process.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Account {
    pub id: AccountId,
    /// Immutable natural key; reset tokens are bound to it
    pub username: String,
    pub email: String,
    /// Preferred language, drives reset-mail template selection
    pub language: String,
    pub password_hash: String,
    /// Document storage accounting; None until first measured
    pub db_documents: Option<i64>,
    /// Attached-file storage accounting; None until first measured
    pub attached_files: Option<i64>,
}

/// Partial update merged into an account record. Unset fields keep their
/// stored value.
#[derive(Debug, Clone, Default)]
pub struct AccountPatch {
    pub email: Option<String>,
    pub language: Option<String>,
    pub password_hash: Option<String>,
}

impl AccountPatch {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.language.is_none() && self.password_hash.is_none()
    }
}

/// Request to create an account (bootstrap surface, not exposed over HTTP)
#[derive(Debug, Clone)]
pub struct CreateAccount {
    pub username: String,
    pub email: String,
    pub language: String,
    pub password_hash: String,
}

/// A stored password-reset request, as returned by a successful take
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResetRequest {
    pub username: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Account records and personal access tokens.
#[async_trait]
pub trait AccountsStorage: Send + Sync {
    /// Insert a new account. Fails with [`StorageError::Conflict`] when the
    /// username is taken.
    async fn create_account(&self, request: CreateAccount) -> Result<Account>;

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>>;

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>>;

    /// Merge a patch into the stored record and return the updated row.
    /// Fails with [`StorageError::NotFound`] when the account is gone.
    async fn update_account(&self, id: AccountId, patch: &AccountPatch) -> Result<Account>;

    /// Resolve a personal access token to its account.
    async fn account_for_token(&self, token: &str) -> Result<Option<Account>>;

    /// Attach a personal access token to an account.
    async fn grant_personal_token(&self, account_id: AccountId, token: &str) -> Result<()>;
}

/// Password-reset request store.
#[async_trait]
pub trait ResetRequestsStorage: Send + Sync {
    /// Issue a fresh token bound to `username`, persisting its digest with
    /// an expiry of now + `valid_for`. Returns the raw token.
    async fn generate(&self, username: &str, valid_for: Duration) -> Result<String>;

    /// Single authoritative validation: match token digest and username,
    /// reject expired records, and consume the record so it can never match
    /// again. Returns None for unknown/expired/mismatched tokens.
    async fn take(&self, token: &str, username: &str) -> Result<Option<ResetRequest>>;

    /// Drop expired records. Returns how many were removed.
    async fn purge_expired(&self) -> Result<u64>;
}

/// Backend handles shared across the application.
#[derive(Clone)]
pub struct Storage {
    pub accounts: Arc<dyn AccountsStorage>,
    pub reset_requests: Arc<dyn ResetRequestsStorage>,
}

/// Create a storage backend from configuration.
///
/// This is the single point where config turns into backend instances; the
/// postgres branch also runs pending migrations.
pub async fn create_storage(config: &StorageConfig) -> anyhow::Result<Storage> {
    match config {
        StorageConfig::Postgres { url, max_connections } => {
            let backend = Arc::new(PostgresStorage::connect(url, *max_connections).await?);
            Ok(Storage {
                accounts: backend.clone(),
                reset_requests: backend,
            })
        }
        StorageConfig::Memory => {
            tracing::warn!("Using in-memory storage; all data is lost on restart");
            let backend = Arc::new(MemoryStorage::new());
            Ok(Storage {
                accounts: backend.clone(),
                reset_requests: backend,
            })
        }
    }
}
