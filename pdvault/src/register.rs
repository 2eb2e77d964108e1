//! Client for the registration authority.
//!
//! The register owns the username -> email mapping across the platform, so
//! an email change must be propagated there before it is persisted locally.
//! A failed propagation aborts the whole update; there is no retry and no
//! compensating write.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::config::RegisterConfig;
use crate::errors::{Error, Result};

const EMAIL_SYNC_FAILURE_PREFIX: &str = "Failed to update email on register. ";

/// Error body shape the register responds with on failure
#[derive(Debug, Deserialize)]
struct RegisterErrorBody {
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RegisterClient {
    // No explicit timeout; the transport default applies
    http: Client,
    base_url: String,
    key: String,
}

impl RegisterClient {
    pub fn new(config: &RegisterConfig) -> Self {
        Self {
            http: Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            key: config.key.clone(),
        }
    }

    /// Propagate a new email address for `username` to the register.
    ///
    /// Success is any 2xx response. Everything else maps to
    /// `invalid-operation`, with the message taken from the response body's
    /// `message` field when present and the attempted email attached as
    /// structured error context.
    #[instrument(skip(self, email))]
    pub async fn change_email(&self, username: &str, email: &str) -> Result<()> {
        let url = format!("{}/users/{username}/change-email", self.base_url);
        debug!("Updating email on register at {url}");

        let outcome = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, &self.key)
            .json(&json!({ "email": email }))
            .send()
            .await;

        let detail = match outcome {
            Ok(response) if response.status().is_success() => {
                debug!("Register accepted email change for {username}");
                return Ok(());
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                serde_json::from_str::<RegisterErrorBody>(&body)
                    .ok()
                    .and_then(|b| b.message)
                    .unwrap_or_else(|| format!("register returned status {status}"))
            }
            Err(e) => e.to_string(),
        };

        warn!("Email change rejected by register: {detail}");
        Err(Error::invalid_operation(
            format!("{EMAIL_SYNC_FAILURE_PREFIX}{detail}"),
            Some(json!({ "email": email })),
        ))
    }
}
