//! Account self-service methods.
//!
//! Five chains assembled once at startup: `account.get`, `account.update`,
//! `account.changePassword`, `account.requestPasswordReset` and
//! `account.resetPassword`. The step order is load-bearing: the
//! cross-service email sync runs before the local mutation it gates, and
//! the reset-token consume runs before the new password is persisted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::auth::password::{self, Argon2Params};
use crate::auth::trusted_apps::TrustedApps;
use crate::config::Config;
use crate::email::EmailService;
use crate::errors::{Error, Result};
use crate::notifications::Notifications;
use crate::register::RegisterClient;
use crate::storage::{AccountsStorage, ResetRequestsStorage, Storage};

use super::{CallContext, Method, MethodResult, Step};

/// The assembled account method chains.
pub struct AccountMethods {
    pub get: Method,
    pub update: Method,
    pub change_password: Method,
    pub request_password_reset: Method,
    pub reset_password: Method,
}

impl AccountMethods {
    pub fn new(
        config: &Config,
        storage: &Storage,
        register: RegisterClient,
        email: Arc<EmailService>,
        notifications: Notifications,
    ) -> Self {
        let trusted_apps = TrustedApps::new(&config.auth.trusted_apps);
        let argon2 = config.auth.password.argon2_params();
        let reset_validity = config.auth.password_reset_max_age;

        Self {
            get: Method::new(
                "account.get",
                vec![Box::new(FetchAccountDetails {
                    accounts: storage.accounts.clone(),
                })],
            ),
            update: Method::new(
                "account.update",
                vec![
                    Box::new(NotifyEmailChange { register }),
                    Box::new(ApplyAccountUpdate {
                        accounts: storage.accounts.clone(),
                        notifications: notifications.clone(),
                    }),
                ],
            ),
            change_password: Method::new(
                "account.changePassword",
                vec![
                    Box::new(VerifyOldPassword),
                    Box::new(EncryptNewPassword { params: argon2 }),
                    Box::new(ApplyAccountUpdate {
                        accounts: storage.accounts.clone(),
                        notifications: notifications.clone(),
                    }),
                    Box::new(StripAccountFromResult),
                ],
            ),
            request_password_reset: Method::new(
                "account.requestPasswordReset",
                vec![
                    Box::new(RequireTrustedApp {
                        trusted_apps: trusted_apps.clone(),
                    }),
                    Box::new(ResolveAccount {
                        accounts: storage.accounts.clone(),
                    }),
                    Box::new(GenerateResetRequest {
                        reset_requests: storage.reset_requests.clone(),
                        valid_for: reset_validity,
                    }),
                    Box::new(SendResetMail { email }),
                ],
            ),
            reset_password: Method::new(
                "account.resetPassword",
                vec![
                    Box::new(RequireTrustedApp { trusted_apps }),
                    Box::new(ResolveAccount {
                        accounts: storage.accounts.clone(),
                    }),
                    Box::new(ConsumeResetToken {
                        reset_requests: storage.reset_requests.clone(),
                    }),
                    Box::new(EncryptNewPassword { params: argon2 }),
                    Box::new(ApplyAccountUpdate {
                        accounts: storage.accounts.clone(),
                        notifications,
                    }),
                    Box::new(StripAccountFromResult),
                ],
            ),
        }
    }
}

/// Loads a fresh copy of the authenticated account into the result.
struct FetchAccountDetails {
    accounts: Arc<dyn AccountsStorage>,
}

#[async_trait]
impl Step for FetchAccountDetails {
    fn name(&self) -> &'static str {
        "fetch_account_details"
    }

    async fn run(&self, call: &mut CallContext, result: &mut MethodResult) -> Result<()> {
        let account = call.account()?;
        let fresh = self
            .accounts
            .find_account(account.id)
            .await?
            .ok_or_else(|| Error::assertion(format!("account {} vanished during the call", account.id)))?;
        result.account = Some(fresh.into());
        Ok(())
    }
}

/// Propagates an email change to the register before it is applied locally.
/// No-op when the update leaves the email unset or unchanged.
struct NotifyEmailChange {
    register: RegisterClient,
}

#[async_trait]
impl Step for NotifyEmailChange {
    fn name(&self) -> &'static str {
        "notify_email_change"
    }

    async fn run(&self, call: &mut CallContext, _result: &mut MethodResult) -> Result<()> {
        let account = call.account()?;
        match &call.update.email {
            Some(new_email) if new_email != &account.email => {
                self.register.change_email(&account.username, new_email).await
            }
            _ => Ok(()),
        }
    }
}

/// Persists the accumulated update document, places the sanitized account
/// on the result, and publishes the pre-update snapshot.
struct ApplyAccountUpdate {
    accounts: Arc<dyn AccountsStorage>,
    notifications: Notifications,
}

#[async_trait]
impl Step for ApplyAccountUpdate {
    fn name(&self) -> &'static str {
        "apply_account_update"
    }

    async fn run(&self, call: &mut CallContext, result: &mut MethodResult) -> Result<()> {
        let previous = call.account()?.clone();
        let updated = self.accounts.update_account(previous.id, &call.update).await?;
        result.account = Some(updated.into());
        self.notifications.account_changed(previous);
        Ok(())
    }
}

/// Compares the supplied password against the stored hash.
struct VerifyOldPassword;

#[async_trait]
impl Step for VerifyOldPassword {
    fn name(&self) -> &'static str {
        "verify_old_password"
    }

    async fn run(&self, call: &mut CallContext, _result: &mut MethodResult) -> Result<()> {
        let supplied = call
            .old_password
            .clone()
            .ok_or_else(|| Error::assertion("old password is missing from the call context"))?;
        let stored_hash = call.account()?.password_hash.clone();

        let matches = tokio::task::spawn_blocking(move || password::verify_password(&supplied, &stored_hash))
            .await
            .map_err(|e| anyhow::anyhow!("password verification task failed: {e}"))??;

        if !matches {
            return Err(Error::invalid_operation("The given password does not match.", None));
        }
        Ok(())
    }
}

/// Hashes the new password into the update document. Skipped when the call
/// carries no new password.
struct EncryptNewPassword {
    params: Argon2Params,
}

#[async_trait]
impl Step for EncryptNewPassword {
    fn name(&self) -> &'static str {
        "encrypt_new_password"
    }

    async fn run(&self, call: &mut CallContext, _result: &mut MethodResult) -> Result<()> {
        let Some(new_password) = call.new_password.clone() else {
            return Ok(());
        };
        let params = self.params;

        let hash = tokio::task::spawn_blocking(move || password::hash_password(&new_password, params))
            .await
            .map_err(|e| anyhow::anyhow!("password hashing task failed: {e}"))??;

        call.update.password_hash = Some(hash);
        Ok(())
    }
}

/// Removes the account from the result for operations that must not echo it.
struct StripAccountFromResult;

#[async_trait]
impl Step for StripAccountFromResult {
    fn name(&self) -> &'static str {
        "strip_account_from_result"
    }

    async fn run(&self, _call: &mut CallContext, result: &mut MethodResult) -> Result<()> {
        result.account = None;
        Ok(())
    }
}

/// Gate for the tokenless reset operations: the caller's appId/origin pair
/// must match a configured trusted-app pattern.
struct RequireTrustedApp {
    trusted_apps: TrustedApps,
}

#[async_trait]
impl Step for RequireTrustedApp {
    fn name(&self) -> &'static str {
        "require_trusted_app"
    }

    async fn run(&self, call: &mut CallContext, _result: &mut MethodResult) -> Result<()> {
        let app_id = call.app_id.as_deref().unwrap_or("");
        if !self.trusted_apps.is_trusted(app_id, call.origin.as_deref()) {
            return Err(Error::InvalidCredentials {
                message: format!("The app id (\"{app_id}\") is either missing or not trusted."),
            });
        }
        Ok(())
    }
}

/// Resolves the target username to an account.
struct ResolveAccount {
    accounts: Arc<dyn AccountsStorage>,
}

#[async_trait]
impl Step for ResolveAccount {
    fn name(&self) -> &'static str {
        "resolve_account"
    }

    async fn run(&self, call: &mut CallContext, _result: &mut MethodResult) -> Result<()> {
        let username = call.username()?.to_string();
        match self.accounts.find_by_username(&username).await? {
            Some(account) => {
                call.account = Some(account);
                Ok(())
            }
            None => Err(Error::UnknownResource {
                resource: "account".to_string(),
                id: username,
            }),
        }
    }
}

/// Issues a reset token bound to the resolved account's username.
struct GenerateResetRequest {
    reset_requests: Arc<dyn ResetRequestsStorage>,
    valid_for: Duration,
}

#[async_trait]
impl Step for GenerateResetRequest {
    fn name(&self) -> &'static str {
        "generate_reset_request"
    }

    async fn run(&self, call: &mut CallContext, _result: &mut MethodResult) -> Result<()> {
        let username = call.account()?.username.clone();
        let token = self.reset_requests.generate(&username, self.valid_for).await?;
        call.issued_reset_token = Some(token);
        Ok(())
    }
}

/// Validates and consumes the supplied reset token. A token validates at
/// most once; unknown, expired and mismatched tokens all fail the same way.
struct ConsumeResetToken {
    reset_requests: Arc<dyn ResetRequestsStorage>,
}

#[async_trait]
impl Step for ConsumeResetToken {
    fn name(&self) -> &'static str {
        "consume_reset_token"
    }

    async fn run(&self, call: &mut CallContext, _result: &mut MethodResult) -> Result<()> {
        let token = call.reset_token()?.to_string();
        let username = call.account()?.username.clone();
        match self.reset_requests.take(&token, &username).await? {
            Some(_) => Ok(()),
            None => Err(Error::InvalidAccessToken {
                message: "The reset token is invalid or expired".to_string(),
            }),
        }
    }
}

/// Mails the issued reset token to the account holder. Silently succeeds
/// when mail is disabled.
struct SendResetMail {
    email: Arc<EmailService>,
}

#[async_trait]
impl Step for SendResetMail {
    fn name(&self) -> &'static str {
        "send_reset_mail"
    }

    async fn run(&self, call: &mut CallContext, _result: &mut MethodResult) -> Result<()> {
        let token = call.issued_reset_token()?.to_string();
        let account = call.account()?;
        self.email.send_password_reset(account, &token).await
    }
}
