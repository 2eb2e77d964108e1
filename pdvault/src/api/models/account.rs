//! API request/response models for account self-service.
//!
//! Wire fields are camelCase for compatibility with existing clients.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::Account;

/// Storage accounting block, always present on account responses.
///
/// `-1` marks a figure that has not been measured yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsed {
    pub db_documents: i64,
    pub attached_files: i64,
}

impl Default for StorageUsed {
    fn default() -> Self {
        Self {
            db_documents: -1,
            attached_files: -1,
        }
    }
}

/// Sanitized account view.
///
/// Built by conversion from the storage record, so the internal id and the
/// password hash cannot appear on the wire by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetails {
    pub username: String,
    pub email: String,
    pub language: String,
    pub storage_used: StorageUsed,
}

impl From<Account> for AccountDetails {
    fn from(account: Account) -> Self {
        Self {
            username: account.username,
            email: account.email,
            language: account.language,
            storage_used: StorageUsed {
                db_documents: account.db_documents.unwrap_or(-1),
                attached_files: account.attached_files.unwrap_or(-1),
            },
        }
    }
}

/// Body for `PUT /account`. Unset fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountParams {
    pub email: Option<String>,
    pub language: Option<String>,
}

/// Body for `POST /account/change-password`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordParams {
    pub old_password: String,
    pub new_password: String,
}

/// Body for `POST /account/request-password-reset`.
///
/// `app_id` is optional at the deserialization boundary; a missing value is
/// reported by the trusted-app check, not as a parameter-format error.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestPasswordResetParams {
    pub username: String,
    pub app_id: Option<String>,
}

/// Body for `POST /account/reset-password`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordParams {
    pub username: String,
    pub app_id: Option<String>,
    pub reset_token: String,
    pub new_password: String,
}
