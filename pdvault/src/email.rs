//! Email service for password reset messages.
//!
//! Transport (SMTP or file-backed) comes from configuration. The reset mail
//! body is rendered with `minijinja` from an embedded default template; a
//! configured templates directory can override it, with a per-language
//! variant (`{template}.{language}.html`) taking precedence over the plain
//! one (`{template}.html`).
//!
//! When mail is disabled globally or for the reset-password template,
//! sending silently succeeds without touching the transport.

use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{
    config::{Config, EmailTransportConfig},
    errors::Result,
    storage::Account,
};

const DEFAULT_RESET_TEMPLATE: &str = include_str!("../templates/reset-password.html");

pub struct EmailService {
    transport: EmailTransport,
    enabled: bool,
    reset_mail_enabled: bool,
    template_name: String,
    subject: String,
    templates_dir: Option<PathBuf>,
    from_email: String,
    from_name: String,
    reset_page_url: String,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

impl EmailService {
    pub fn new(config: &Config) -> Result<Self> {
        let email_config = &config.email;

        let transport = match &email_config.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }

                let smtp_builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                }
                .map_err(|e| anyhow::anyhow!("failed to create SMTP transport: {e}"))?
                .port(*port)
                .credentials(Credentials::new(username.clone(), password.clone()));

                EmailTransport::Smtp(smtp_builder.build())
            }
            EmailTransportConfig::File { path } => {
                let emails_dir = Path::new(path);
                if !emails_dir.exists() {
                    std::fs::create_dir_all(emails_dir)
                        .map_err(|e| anyhow::anyhow!("failed to create emails directory: {e}"))?;
                }
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(emails_dir))
            }
        };

        Ok(Self {
            transport,
            enabled: email_config.enabled,
            reset_mail_enabled: email_config.reset_password.enabled,
            template_name: email_config.reset_password.template.clone(),
            subject: email_config.reset_password.subject.clone(),
            templates_dir: email_config.templates_dir.clone(),
            from_email: email_config.from_email.clone(),
            from_name: email_config.from_name.clone(),
            reset_page_url: config.auth.password_reset_page_url.clone(),
        })
    }

    /// Send the password-reset mail for `account` carrying the raw token.
    ///
    /// Silently succeeds when mail is disabled, so callers never need to
    /// special-case the toggles.
    pub async fn send_password_reset(&self, account: &Account, token: &str) -> Result<()> {
        if !self.enabled || !self.reset_mail_enabled {
            debug!(
                "Reset mail disabled, skipping send for {}",
                account.username
            );
            return Ok(());
        }

        let body = self.render_reset_body(account, token).await?;
        self.send(&account.email, &account.username, &body).await
    }

    async fn render_reset_body(&self, account: &Account, token: &str) -> Result<String> {
        let source = self.template_source(&account.language).await;
        let body = minijinja::Environment::new()
            .render_str(
                &source,
                minijinja::context! {
                    RESET_TOKEN => token,
                    RESET_URL => self.reset_page_url,
                    USERNAME => account.username,
                },
            )
            .map_err(|e| anyhow::anyhow!("failed to render reset mail template: {e}"))?;
        Ok(body)
    }

    /// Resolve the template source for a language: per-language override,
    /// then plain override, then the embedded default.
    async fn template_source(&self, language: &str) -> String {
        if let Some(dir) = &self.templates_dir {
            let candidates = [
                dir.join(format!("{}.{language}.html", self.template_name)),
                dir.join(format!("{}.html", self.template_name)),
            ];
            for candidate in candidates {
                if let Ok(source) = tokio::fs::read_to_string(&candidate).await {
                    debug!("Using reset mail template {}", candidate.display());
                    return source;
                }
            }
        }
        DEFAULT_RESET_TEMPLATE.to_string()
    }

    async fn send(&self, to_email: &str, to_name: &str, body: &str) -> Result<()> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| anyhow::anyhow!("failed to parse from address: {e}"))?;

        let to = format!("{to_name} <{to_email}>")
            .parse::<Mailbox>()
            .map_err(|e| anyhow::anyhow!("failed to parse recipient address: {e}"))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(&self.subject)
            .header(ContentType::TEXT_HTML)
            .body(body.to_string())
            .map_err(|e| anyhow::anyhow!("failed to build reset mail: {e}"))?;

        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message)
                    .await
                    .map_err(|e| anyhow::anyhow!("failed to send reset mail over SMTP: {e}"))?;
            }
            EmailTransport::File(file) => {
                file.send(message)
                    .await
                    .map_err(|e| anyhow::anyhow!("failed to write reset mail to file: {e}"))?;
            }
        }

        Ok(())
    }
}
