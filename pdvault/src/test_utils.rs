//! Test utilities for integration testing.

use std::sync::Arc;

use axum_test::TestServer;
use uuid::Uuid;

use crate::auth::password::hash_password;
use crate::config::{AuthConfig, Config, EmailConfig, EmailTransportConfig, PasswordConfig, StorageConfig};
use crate::email::EmailService;
use crate::methods::AccountMethods;
use crate::notifications::Notifications;
use crate::register::RegisterClient;
use crate::storage::{Account, AccountsStorage, CreateAccount, MemoryStorage, Storage};
use crate::{AppState, build_router};

pub fn create_test_config() -> Config {
    // Use temp directory for test emails
    let temp_dir = std::env::temp_dir().join(format!("pdvault-test-emails-{}", std::process::id()));

    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        storage: StorageConfig::Memory,
        auth: AuthConfig {
            trusted_apps: vec!["web-app@*".to_string()],
            password: PasswordConfig {
                // Cheap parameters so hashing does not dominate the suite
                argon2_memory_kib: 1024,
                argon2_iterations: 1,
                ..Default::default()
            },
            ..Default::default()
        },
        email: EmailConfig {
            transport: EmailTransportConfig::File {
                path: temp_dir.to_string_lossy().to_string(),
            },
            ..Default::default()
        },
        enable_metrics: false,
        ..Default::default()
    }
}

/// An account record for tests that never hit storage. The password hash is
/// not a real digest, so only use this where the password is never verified.
pub fn create_test_account(username: &str) -> Account {
    Account {
        id: Uuid::new_v4(),
        username: username.to_string(),
        email: format!("{username}@example.com"),
        language: "en".to_string(),
        password_hash: "$argon2id$v=19$m=1024,t=1,p=1$bm90LWEtcmVhbC1oYXNo$bm90LWEtcmVhbC1oYXNo".to_string(),
        db_documents: None,
        attached_files: None,
    }
}

/// A fully wired application over in-memory storage, plus handles the tests
/// use to seed state behind the HTTP surface.
pub struct TestApp {
    pub server: TestServer,
    pub storage: Arc<MemoryStorage>,
    pub config: Config,
}

impl TestApp {
    /// Creates an account and grants it a personal access token.
    pub async fn seed_account(&self, username: &str, password: &str, token: &str) -> Account {
        let hash = hash_password(password, self.config.auth.password.argon2_params()).expect("Failed to hash password");
        let account = self
            .storage
            .create_account(CreateAccount {
                username: username.to_string(),
                email: format!("{username}@example.com"),
                language: "en".to_string(),
                password_hash: hash,
            })
            .await
            .expect("Failed to create test account");
        self.storage
            .grant_personal_token(account.id, token)
            .await
            .expect("Failed to grant personal token");
        account
    }
}

pub async fn spawn_test_app(config: Config) -> TestApp {
    let backend = Arc::new(MemoryStorage::new());
    let storage = Storage {
        accounts: backend.clone(),
        reset_requests: backend.clone(),
    };

    let methods = AccountMethods::new(
        &config,
        &storage,
        RegisterClient::new(&config.register),
        Arc::new(EmailService::new(&config).expect("Failed to create email service")),
        Notifications::new(),
    );

    let state = AppState::builder()
        .config(config.clone())
        .storage(storage)
        .methods(Arc::new(methods))
        .build();

    let router = build_router(state).expect("Failed to build router");
    let server = TestServer::new(router).expect("Failed to create test server");

    TestApp {
        server,
        storage: backend,
        config,
    }
}
