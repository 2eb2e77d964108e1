//! In-memory storage backend.
//!
//! Keeps every record in process memory behind [`tokio::sync::RwLock`]ed
//! maps. Useful for local development and tests; all data is lost when the
//! process exits.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::password::{generate_reset_token, reset_token_digest};
use crate::types::AccountId;

use super::{
    Account, AccountPatch, AccountsStorage, CreateAccount, ResetRequest, ResetRequestsStorage,
    Result, StorageError,
};

#[derive(Debug, Clone)]
struct StoredResetRequest {
    username: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

/// Volatile backend for both storage seams.
#[derive(Default)]
pub struct MemoryStorage {
    accounts: RwLock<HashMap<AccountId, Account>>,
    /// personal access token -> account id
    tokens: RwLock<HashMap<String, AccountId>>,
    /// reset token digest -> pending request
    reset_requests: RwLock<HashMap<String, StoredResetRequest>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountsStorage for MemoryStorage {
    async fn create_account(&self, request: CreateAccount) -> Result<Account> {
        let mut accounts = self.accounts.write().await;
        if accounts.values().any(|a| a.username == request.username) {
            return Err(StorageError::Conflict {
                message: format!("username {} is taken", request.username),
            });
        }
        let account = Account {
            id: Uuid::new_v4(),
            username: request.username,
            email: request.email,
            language: request.language,
            password_hash: request.password_hash,
            db_documents: None,
            attached_files: None,
        };
        accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>> {
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .find(|a| a.username == username)
            .cloned())
    }

    async fn update_account(&self, id: AccountId, patch: &AccountPatch) -> Result<Account> {
        let mut accounts = self.accounts.write().await;
        let account = accounts.get_mut(&id).ok_or(StorageError::NotFound)?;
        if let Some(email) = &patch.email {
            account.email = email.clone();
        }
        if let Some(language) = &patch.language {
            account.language = language.clone();
        }
        if let Some(password_hash) = &patch.password_hash {
            account.password_hash = password_hash.clone();
        }
        Ok(account.clone())
    }

    async fn account_for_token(&self, token: &str) -> Result<Option<Account>> {
        let account_id = match self.tokens.read().await.get(token) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.accounts.read().await.get(&account_id).cloned())
    }

    async fn grant_personal_token(&self, account_id: AccountId, token: &str) -> Result<()> {
        if !self.accounts.read().await.contains_key(&account_id) {
            return Err(StorageError::NotFound);
        }
        self.tokens
            .write()
            .await
            .insert(token.to_string(), account_id);
        Ok(())
    }
}

#[async_trait]
impl ResetRequestsStorage for MemoryStorage {
    async fn generate(&self, username: &str, valid_for: Duration) -> Result<String> {
        let token = generate_reset_token();
        let valid_for = ChronoDuration::from_std(valid_for)
            .map_err(|e| StorageError::Other(anyhow::anyhow!("reset validity out of range: {e}")))?;
        let now = Utc::now();
        self.reset_requests.write().await.insert(
            reset_token_digest(&token),
            StoredResetRequest {
                username: username.to_string(),
                expires_at: now + valid_for,
                created_at: now,
            },
        );
        Ok(token)
    }

    async fn take(&self, token: &str, username: &str) -> Result<Option<ResetRequest>> {
        let digest = reset_token_digest(token);
        let mut requests = self.reset_requests.write().await;
        // Only a live record bound to this username is consumed; mismatches
        // leave the record in place for its rightful owner.
        let valid = requests
            .get(&digest)
            .is_some_and(|r| r.username == username && r.expires_at > Utc::now());
        if !valid {
            return Ok(None);
        }
        Ok(requests.remove(&digest).map(|r| ResetRequest {
            username: r.username,
            expires_at: r.expires_at,
            created_at: r.created_at,
        }))
    }

    async fn purge_expired(&self) -> Result<u64> {
        let mut requests = self.reset_requests.write().await;
        let before = requests.len();
        let now = Utc::now();
        requests.retain(|_, r| r.expires_at > now);
        Ok((before - requests.len()) as u64)
    }
}
