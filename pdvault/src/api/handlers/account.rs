//! Handlers for the account self-service routes.
//!
//! Each handler validates parameter formats, builds the call context from
//! the credential and the request body, and hands off to the matching
//! method chain. Everything after that boundary is the pipeline's business.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, header},
};

use crate::{
    AppState,
    api::models::account::{
        ChangePasswordParams, RequestPasswordResetParams, ResetPasswordParams, UpdateAccountParams,
    },
    auth::PersonalAccess,
    config::PasswordConfig,
    errors::{Error, Result},
    methods::{CallContext, MethodResult},
    storage::AccountPatch,
};

/// The caller's web origin, for the trusted-app check.
fn caller_origin(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::ORIGIN)
        .or_else(|| headers.get(header::REFERER))
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

fn validate_new_password(password: &str, config: &PasswordConfig) -> Result<()> {
    if password.len() < config.min_length {
        return Err(Error::InvalidParameters {
            message: format!("Password must be at least {} characters", config.min_length),
        });
    }
    if password.len() > config.max_length {
        return Err(Error::InvalidParameters {
            message: format!("Password must be no more than {} characters", config.max_length),
        });
    }
    Ok(())
}

/// Get the authenticated account's details
#[utoipa::path(
    get,
    path = "/account",
    tag = "account",
    responses(
        (status = 200, description = "The account's sanitized details", body = MethodResult),
        (status = 401, description = "Missing or invalid access token"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_account(
    State(state): State<AppState>,
    PersonalAccess(account): PersonalAccess,
) -> Result<Json<MethodResult>> {
    let call = CallContext {
        account: Some(account),
        ..Default::default()
    };
    Ok(Json(state.methods.get.invoke(call).await?))
}

/// Update the authenticated account
#[utoipa::path(
    put,
    path = "/account",
    request_body = UpdateAccountParams,
    tag = "account",
    responses(
        (status = 200, description = "The updated account details", body = MethodResult),
        (status = 400, description = "The email could not be propagated to the register"),
        (status = 401, description = "Missing or invalid access token"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn update_account(
    State(state): State<AppState>,
    PersonalAccess(account): PersonalAccess,
    Json(params): Json<UpdateAccountParams>,
) -> Result<Json<MethodResult>> {
    let call = CallContext {
        account: Some(account),
        update: AccountPatch {
            email: params.email,
            language: params.language,
            password_hash: None,
        },
        ..Default::default()
    };
    Ok(Json(state.methods.update.invoke(call).await?))
}

/// Change the authenticated account's password
#[utoipa::path(
    post,
    path = "/account/change-password",
    request_body = ChangePasswordParams,
    tag = "account",
    responses(
        (status = 200, description = "Password changed", body = MethodResult),
        (status = 400, description = "Wrong current password or invalid new password"),
        (status = 401, description = "Missing or invalid access token"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn change_password(
    State(state): State<AppState>,
    PersonalAccess(account): PersonalAccess,
    Json(params): Json<ChangePasswordParams>,
) -> Result<Json<MethodResult>> {
    validate_new_password(&params.new_password, &state.config.auth.password)?;

    let call = CallContext {
        account: Some(account),
        old_password: Some(params.old_password),
        new_password: Some(params.new_password),
        ..Default::default()
    };
    Ok(Json(state.methods.change_password.invoke(call).await?))
}

/// Request a password reset token for an account
#[utoipa::path(
    post,
    path = "/account/request-password-reset",
    request_body = RequestPasswordResetParams,
    tag = "account",
    responses(
        (status = 200, description = "Reset request accepted", body = MethodResult),
        (status = 401, description = "The calling app is not trusted"),
        (status = 404, description = "Unknown username"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(params): Json<RequestPasswordResetParams>,
) -> Result<Json<MethodResult>> {
    let call = CallContext {
        username: Some(params.username),
        app_id: params.app_id,
        origin: caller_origin(&headers),
        ..Default::default()
    };
    Ok(Json(state.methods.request_password_reset.invoke(call).await?))
}

/// Reset an account's password with a previously issued token
#[utoipa::path(
    post,
    path = "/account/reset-password",
    request_body = ResetPasswordParams,
    tag = "account",
    responses(
        (status = 200, description = "Password reset", body = MethodResult),
        (status = 400, description = "Invalid new password"),
        (status = 401, description = "Untrusted app or invalid reset token"),
        (status = 404, description = "Unknown username"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(params): Json<ResetPasswordParams>,
) -> Result<Json<MethodResult>> {
    validate_new_password(&params.new_password, &state.config.auth.password)?;

    let call = CallContext {
        username: Some(params.username),
        app_id: params.app_id,
        origin: caller_origin(&headers),
        reset_token: Some(params.reset_token),
        new_password: Some(params.new_password),
        ..Default::default()
    };
    Ok(Json(state.methods.reset_password.invoke(call).await?))
}
