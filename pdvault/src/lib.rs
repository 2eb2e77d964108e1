//! # pdvault: Account Self-Service for a Personal Data Vault
//!
//! `pdvault` is the account-facing service of a personal data vault deployment. It
//! exposes a small HTTP API through which a vault owner reads and updates their
//! profile, changes their password, and recovers access with an emailed reset token.
//!
//! ## Overview
//!
//! A deployment keeps one account record per user. That record carries the profile
//! fields together with the password credential, and this service is the only process
//! that reads or writes it. Authenticated operations are carried by personal access
//! tokens in the `Authorization` header. The password-recovery flow is open to
//! unauthenticated callers but gated on a trusted application identifier, so only
//! known frontends can drive it.
//!
//! ### What It Does
//!
//! Five operations cover the account lifecycle after signup: fetching the sanitized
//! account details, updating profile fields, changing the password with the current
//! one in hand, requesting a password reset (which mails a single-use token), and
//! consuming that token to set a new password. Email changes are propagated to the
//! register service before they are committed locally, so the deployment-wide
//! directory never lags behind the vault.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for the HTTP
//! layer. Persistence sits behind a storage seam with two backends: PostgreSQL for
//! deployments and an in-memory store for development and tests.
//!
//! ### Request Flow
//!
//! Handlers in [`api`] validate parameter shapes and resolve the caller (a personal
//! access token for the authenticated operations, a trusted app id plus web origin
//! for the reset flow). Each operation is then driven by a pipeline in [`methods`]:
//! an ordered chain of steps sharing one call context, where the first failing step
//! aborts the call. The chains are assembled once at startup with their storage and
//! service handles baked in.
//!
//! ### Core Components
//!
//! The **API layer** ([`api`]) holds the HTTP handlers and the wire models,
//! including the sanitizer that strips server-side fields from account records
//! before they leave the process.
//!
//! The **method pipelines** ([`methods`]) implement the five account operations as
//! step chains over [`storage`]. Cross-service effects (the register directory in
//! [`register`], reset mail in [`email`]) are ordinary steps in those chains.
//!
//! The **storage layer** ([`storage`]) abstracts account records, personal access
//! tokens and the reset-request store. Reset tokens are persisted as digests and
//! consumed on first successful validation.
//!
//! **Background services** run alongside the HTTP server: a sweeper that drops
//! expired reset requests from storage and a listener draining the account change
//! bus into the logs.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use pdvault::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Parse CLI arguments and load configuration
//!     let args = pdvault::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     // Initialize telemetry (structured logging)
//!     pdvault::telemetry::init_telemetry()?;
//!
//!     // Create and start the application
//!     let app = Application::new(config).await?;
//!
//!     // Run with graceful shutdown on Ctrl+C
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     }).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod auth;
pub mod config;
pub mod email;
pub mod errors;
pub mod methods;
pub mod notifications;
mod openapi;
pub mod register;
pub mod storage;
pub mod telemetry;
mod types;

#[cfg(test)]
pub mod test_utils;

use crate::{
    auth::password,
    config::{BootstrapConfig, CorsOrigin},
    email::EmailService,
    methods::AccountMethods,
    notifications::{AccountEvent, Notifications},
    openapi::ApiDoc,
    register::RegisterClient,
    storage::{CreateAccount, Storage, create_storage},
};
use axum::http::HeaderValue;
use axum::{
    Json, Router,
    routing::{get, post, put},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use types::AccountId;

/// Application state shared across all request handlers.
///
/// Handlers resolve the caller's credential through `storage` and hand the
/// actual work to the pipelines in `methods`.
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub storage: Storage,
    pub methods: Arc<AccountMethods>,
}

/// Create the configured bootstrap account if it doesn't exist.
///
/// This is idempotent: an existing account is left untouched apart from the
/// personal token grant, so restarts never clobber a password the owner has
/// since changed.
///
/// Returns the id of the created or existing account.
#[instrument(skip_all)]
pub async fn bootstrap_account(
    bootstrap: &BootstrapConfig,
    argon2: password::Argon2Params,
    storage: &Storage,
) -> anyhow::Result<AccountId> {
    let account = match storage.accounts.find_by_username(&bootstrap.username).await? {
        Some(existing) => {
            info!("Bootstrap account {} already exists, skipping creation", bootstrap.username);
            existing
        }
        None => {
            info!("Creating bootstrap account {}", bootstrap.username);
            let password_hash = password::hash_password(&bootstrap.password, argon2)?;
            storage
                .accounts
                .create_account(CreateAccount {
                    username: bootstrap.username.clone(),
                    email: bootstrap.email.clone(),
                    language: bootstrap.language.clone(),
                    password_hash,
                })
                .await?
        }
    };

    if let Some(token) = &bootstrap.token {
        storage.accounts.grant_personal_token(account.id, token).await?;
    }

    Ok(account.id)
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    // An origin list may not contain a literal "*" (tower-http rejects it),
    // so any wildcard selects the allow-any origin instead. validate() has
    // already refused the wildcard + credentials combination.
    let wildcard = config
        .cors
        .allowed_origins
        .iter()
        .any(|origin| matches!(origin, CorsOrigin::Wildcard));

    let allowed = if wildcard {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                // Browsers send the origin without a trailing slash
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allowed)
        .allow_credentials(config.cors.allow_credentials);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// This wires up:
/// - The account routes (get/update, change-password, the reset flow)
/// - API documentation at `/docs` with the raw spec at `/api-docs/openapi.json`
/// - Optional Prometheus metrics at `/internal/metrics`
/// - CORS configuration
/// - Tracing middleware
///
/// # Errors
///
/// Returns an error if the CORS configuration is invalid.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let account_routes = Router::new()
        .route("/account", get(api::handlers::account::get_account))
        .route("/account", put(api::handlers::account::update_account))
        .route("/account/change-password", post(api::handlers::account::change_password))
        .route(
            "/account/request-password-reset",
            post(api::handlers::account::request_password_reset),
        )
        .route("/account/reset-password", post(api::handlers::account::reset_password))
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(account_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    // Create CORS layer from config
    let cors_layer = create_cors_layer(&state.config)?;
    let mut router = router.layer(cors_layer);

    // Add Prometheus metrics if enabled
    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    // Add tracing layer
    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// How often expired reset requests are swept out of storage. Expired tokens
/// already fail validation; the sweep only keeps dead rows from accumulating.
const RESET_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Container for background services and their lifecycle management.
///
/// Two tasks run alongside the HTTP server: the reset-request sweeper and a
/// listener draining the account change bus into the logs.
///
/// # Graceful Shutdown
///
/// [`shutdown`](BackgroundServices::shutdown) stops all tasks and waits for
/// them. When dropped, the `drop_guard` cancels the shutdown token, so the
/// tasks never outlive the application.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: tokio_util::sync::CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<tokio_util::sync::DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        // Signal all background tasks to shutdown
        self.shutdown_token.cancel();

        // Wait for all background tasks to complete
        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Setup background services (reset-request sweeper, account change listener)
fn setup_background_services(
    storage: Storage,
    notifications: Notifications,
    shutdown_token: tokio_util::sync::CancellationToken,
) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    // Periodically sweep expired reset requests out of storage
    let sweep_shutdown = shutdown_token.clone();
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(RESET_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = sweep_shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match storage.reset_requests.purge_expired().await {
                        Ok(0) => {}
                        Ok(purged) => debug!("Purged {purged} expired password reset requests"),
                        Err(e) => tracing::error!("Failed to purge expired password reset requests: {e}"),
                    }
                }
            }
        }
    });
    background_tasks.push(handle);

    // Drain the account change bus into the logs
    let mut events = notifications.subscribe();
    let events_shutdown = shutdown_token.clone();
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = events_shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Ok(AccountEvent::AccountChanged { account }) => {
                        info!("Account {} changed", account.username);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Account change listener lagged, {skipped} events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });
    background_tasks.push(handle);

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// Main application struct that owns all resources and lifecycle.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] connects storage (running migrations on
///    the postgres backend), creates the bootstrap account when one is
///    configured, and starts background services
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts
///    handling requests
/// 3. **Shutdown**: when the shutdown future resolves, the server drains and
///    background services are stopped
pub struct Application {
    router: Router,
    config: Config,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting pdvault with configuration: {:#?}", config);

        let storage = create_storage(&config.storage).await?;

        // Create the bootstrap account if configured
        if let Some(bootstrap) = &config.bootstrap {
            bootstrap_account(bootstrap, config.auth.password.argon2_params(), &storage).await?;
        }

        let notifications = Notifications::new();
        let email = Arc::new(EmailService::new(&config)?);
        let register = RegisterClient::new(&config.register);
        let methods = AccountMethods::new(&config, &storage, register, email, notifications.clone());

        // Create a shutdown token for coordinating graceful shutdown of background tasks
        let shutdown_token = tokio_util::sync::CancellationToken::new();
        let bg_services = setup_background_services(storage.clone(), notifications, shutdown_token);

        let state = AppState::builder()
            .config(config.clone())
            .storage(storage)
            .methods(Arc::new(methods))
            .build();

        let router = build_router(state)?;

        Ok(Self {
            router,
            config,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "pdvault listening on http://{}, API documentation at http://localhost:{}/docs",
            bind_addr, self.config.port
        );

        // Run the server with graceful shutdown
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        // Shutdown background services and wait for tasks to complete
        self.bg_services.shutdown().await;

        info!("Shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;
    use std::sync::Arc;

    use axum::http::{HeaderValue, StatusCode, header};
    use serde_json::{Value, json};

    use super::*;
    use crate::config::EmailTransportConfig;
    use crate::storage::{AccountsStorage, MemoryStorage};
    use crate::test_utils::{create_test_config, spawn_test_app};

    #[tokio::test]
    async fn healthz_works() {
        let app = spawn_test_app(create_test_config()).await;

        let response = app.server.get("/healthz").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.text(), "OK");
    }

    #[tokio::test]
    async fn openapi_spec_is_served() {
        let app = spawn_test_app(create_test_config()).await;

        let response = app.server.get("/api-docs/openapi.json").await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let spec: Value = response.json();
        assert!(spec["paths"]["/account"].is_object());
        assert!(spec["paths"]["/account/reset-password"].is_object());
    }

    #[tokio::test]
    async fn metrics_endpoint_is_gated_by_config() {
        let app = spawn_test_app(create_test_config()).await;
        let response = app.server.get("/internal/metrics").await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

        let mut config = create_test_config();
        config.enable_metrics = true;
        let app = spawn_test_app(config).await;
        let response = app.server.get("/internal/metrics").await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    #[test]
    fn cors_layer_handles_wildcard_and_url_origins() {
        // The default test config carries a wildcard origin
        create_cors_layer(&create_test_config()).unwrap();

        let mut config = create_test_config();
        config.cors.allowed_origins = vec![CorsOrigin::Url("https://app.example.com".parse().unwrap())];
        create_cors_layer(&config).unwrap();
    }

    #[tokio::test]
    async fn bootstrap_account_is_idempotent() {
        let backend = Arc::new(MemoryStorage::new());
        let storage = Storage {
            accounts: backend.clone(),
            reset_requests: backend,
        };
        let bootstrap = BootstrapConfig {
            username: "admin".to_string(),
            email: "admin@example.com".to_string(),
            language: "en".to_string(),
            password: "bootstrap-pw".to_string(),
            token: Some("admin-token".to_string()),
        };
        let argon2 = create_test_config().auth.password.argon2_params();

        let first = bootstrap_account(&bootstrap, argon2, &storage).await.unwrap();
        let second = bootstrap_account(&bootstrap, argon2, &storage).await.unwrap();
        assert_eq!(first, second);

        let account = storage
            .accounts
            .account_for_token("admin-token")
            .await
            .unwrap()
            .expect("bootstrap token should resolve");
        assert_eq!(account.username, "admin");
    }

    #[tokio::test]
    async fn application_boots_and_serves_the_bootstrap_account() {
        let mut config = create_test_config();
        config.bootstrap = Some(BootstrapConfig {
            username: "admin".to_string(),
            email: "admin@example.com".to_string(),
            language: "en".to_string(),
            password: "bootstrap-pw".to_string(),
            token: Some("admin-token".to_string()),
        });

        let app = Application::new(config).await.unwrap();
        let (server, bg_services) = app.into_test_server();

        let response = server
            .get("/account")
            .add_header(header::AUTHORIZATION, HeaderValue::from_static("admin-token"))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let body: Value = response.json();
        assert_eq!(body["account"]["username"], "admin");
        assert_eq!(body["account"]["email"], "admin@example.com");

        bg_services.shutdown().await;
    }

    fn recover_token_from_mail(emails_dir: &Path) -> String {
        let mut entries = std::fs::read_dir(emails_dir).unwrap();
        let mail = std::fs::read_to_string(entries.next().unwrap().unwrap().path()).unwrap();
        let start = mail.find("TOKEN:").expect("mail should carry the token marker") + "TOKEN:".len();
        let end = mail[start..].find(":END").unwrap() + start;
        mail[start..end].to_string()
    }

    #[tokio::test]
    async fn full_password_reset_flow_over_http() {
        let emails_dir = tempfile::tempdir().unwrap();
        let templates_dir = tempfile::tempdir().unwrap();
        // A template whose rendered body is trivially parseable from the
        // stored mail, so the test can play the role of the mail reader
        std::fs::write(
            templates_dir.path().join("reset-password.html"),
            "TOKEN:{{ RESET_TOKEN }}:END",
        )
        .unwrap();

        let mut config = create_test_config();
        config.email.transport = EmailTransportConfig::File {
            path: emails_dir.path().to_string_lossy().to_string(),
        };
        config.email.templates_dir = Some(templates_dir.path().to_path_buf());
        let app = spawn_test_app(config).await;
        app.seed_account("alice", "old-password", "alice-token").await;

        // Request a reset; the token travels by mail
        let response = app
            .server
            .post("/account/request-password-reset")
            .json(&json!({ "username": "alice", "appId": "web-app" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let token = recover_token_from_mail(emails_dir.path());

        // Reset with the mailed token
        let response = app
            .server
            .post("/account/reset-password")
            .json(&json!({
                "username": "alice",
                "appId": "web-app",
                "resetToken": token,
                "newPassword": "brand-new-password",
            }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.json::<Value>(), json!({}));

        // The new password is live: changing it again with the reset value
        // as the current password succeeds
        let response = app
            .server
            .post("/account/change-password")
            .add_header(header::AUTHORIZATION, HeaderValue::from_static("alice-token"))
            .json(&json!({ "oldPassword": "brand-new-password", "newPassword": "yet-another-pw" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);

        // The token was consumed on first use
        let response = app
            .server
            .post("/account/reset-password")
            .json(&json!({
                "username": "alice",
                "appId": "web-app",
                "resetToken": token,
                "newPassword": "one-more-password",
            }))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

        let body: Value = response.json();
        assert_eq!(body["error"]["id"], "invalid-access-token");
        assert_eq!(body["error"]["message"], "The reset token is invalid or expired");
    }
}
