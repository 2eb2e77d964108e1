//! Extractor for personal-access authenticated routes.

use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::{debug, instrument};

use crate::{
    AppState,
    errors::{Error, Result},
    storage::Account,
};

/// The account resolved from the request's personal access token.
///
/// Rejects with `invalid-access-token` when the `Authorization` header is
/// missing, malformed, or does not match a stored token. Both bare tokens
/// and `Bearer `-prefixed values are accepted.
#[derive(Debug, Clone)]
pub struct PersonalAccess(pub Account);

impl FromRequestParts<AppState> for PersonalAccess {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .ok_or(Error::Unauthenticated { message: None })?;

        let auth_str = auth_header.to_str().map_err(|e| Error::Unauthenticated {
            message: Some(format!("Invalid authorization header: {e}")),
        })?;

        let token = auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).trim();
        if token.is_empty() {
            return Err(Error::Unauthenticated { message: None });
        }

        match state.storage.accounts.account_for_token(token).await? {
            Some(account) => {
                debug!("Resolved personal access for account {}", account.id);
                Ok(PersonalAccess(account))
            }
            None => Err(Error::Unauthenticated { message: None }),
        }
    }
}
