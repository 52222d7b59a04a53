//! Gmail API provider
//!
//! Sends as the tenant's connected mailbox using an OAuth access token supplied
//! by the [`CredentialSource`]. Token acquisition and refresh happen elsewhere;
//! a missing token or an auth rejection surfaces as `EmailError::AuthExpired`
//! so the connection can be flagged for reconnect.

use super::{CredentialSource, EmailProvider};
use crate::error::{EmailError, EmailResult};
use crate::models::{OutboundEmail, ProviderKind};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use core_config::{env_or_default, env_parse, ConfigError, FromEnv};
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart},
    Address, Message,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Reason recorded on the connection when Google rejects the token.
pub const GMAIL_RECONNECT_REASON: &str =
    "Your Gmail authorization has expired or been revoked. Please reconnect your account.";

/// Reason recorded when no usable token could be obtained.
pub const GMAIL_REFRESH_FAILED_REASON: &str =
    "Token refresh failed. Please reconnect your Gmail account.";

/// Response fragments that mean the grant is gone.
const AUTH_ERROR_MARKERS: [&str; 5] = [
    "invalid_grant",
    "token has been expired or revoked",
    "token expired",
    "invalid_token",
    "unauthorized",
];

#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub api_url: String,
    /// Upper bound on one API call, connect through response body
    pub timeout: Duration,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            api_url: "https://gmail.googleapis.com".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl GmailConfig {
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl FromEnv for GmailConfig {
    /// GMAIL_API_URL overrides the production endpoint, GMAIL_TIMEOUT_SECS (30)
    /// bounds each call.
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::default()
            .with_api_url(env_or_default("GMAIL_API_URL", "https://gmail.googleapis.com"))
            .with_timeout(Duration::from_secs(env_parse("GMAIL_TIMEOUT_SECS", "30")?)))
    }
}

pub struct GmailProvider {
    config: GmailConfig,
    client: Client,
    credentials: Arc<dyn CredentialSource>,
}

impl GmailProvider {
    pub fn new(config: GmailConfig, credentials: Arc<dyn CredentialSource>) -> EmailResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EmailError::Internal(format!("Failed to build Gmail HTTP client: {}", e)))?;
        Ok(Self {
            config,
            client,
            credentials,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/gmail/v1/users/me/messages/send",
            self.config.api_url.trim_end_matches('/')
        )
    }
}

fn mailbox(field: &str, email: &str, name: Option<&String>) -> EmailResult<Mailbox> {
    let address: Address = email
        .parse()
        .map_err(|e| EmailError::Validation(format!("Invalid {} address '{}': {}", field, email, e)))?;
    Ok(Mailbox::new(name.cloned(), address))
}

/// Build the RFC 2822 message: `multipart/alternative` when there is HTML,
/// plain text otherwise. Header values are encoded by lettre, so CR/LF in a
/// subject or threading hint cannot start a new header.
fn build_message(email: &OutboundEmail) -> EmailResult<Message> {
    let mut builder = Message::builder()
        .from(mailbox("from", &email.from.email, email.from.name.as_ref())?)
        .to(mailbox("to", &email.to.email, email.to.name.as_ref())?)
        .subject(email.subject.clone());

    if let Some(reply_to) = &email.reply_to {
        let reply_to: Mailbox = reply_to
            .parse()
            .map_err(|e| EmailError::Validation(format!("Invalid reply-to address '{}': {}", reply_to, e)))?;
        builder = builder.reply_to(reply_to);
    }
    if let Some(in_reply_to) = &email.threading.in_reply_to {
        builder = builder.in_reply_to(in_reply_to.clone());
    }
    if let Some(references) = &email.threading.references {
        builder = builder.references(references.clone());
    }

    let message = match &email.html_body {
        Some(html) => builder.multipart(MultiPart::alternative_plain_html(
            email.text_body.clone(),
            html.clone(),
        )),
        None => builder
            .header(ContentType::TEXT_PLAIN)
            .body(email.text_body.clone()),
    };

    message.map_err(|e| EmailError::Validation(format!("Failed to build email message: {}", e)))
}

fn is_auth_error(body: &str) -> bool {
    let body = body.to_ascii_lowercase();
    AUTH_ERROR_MARKERS.iter().any(|marker| body.contains(marker))
}

fn classify(status: StatusCode, body: &str) -> EmailError {
    if status == StatusCode::UNAUTHORIZED || is_auth_error(body) {
        return EmailError::AuthExpired {
            provider: ProviderKind::Gmail,
            reason: GMAIL_RECONNECT_REASON.to_string(),
        };
    }

    let message = format!("Gmail API error ({}): {}", status.as_u16(), body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        EmailError::Transient(message)
    } else {
        EmailError::Validation(message)
    }
}

#[derive(Debug, Serialize)]
struct GmailSendRequest {
    raw: String,
    #[serde(rename = "threadId", skip_serializing_if = "Option::is_none")]
    thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GmailSendResponse {
    id: String,
}

#[async_trait]
impl EmailProvider for GmailProvider {
    async fn send(&self, email: &OutboundEmail) -> EmailResult<String> {
        let access_token = self
            .credentials
            .credential(email.tenant_id, ProviderKind::Gmail)
            .await?
            .ok_or_else(|| EmailError::AuthExpired {
                provider: ProviderKind::Gmail,
                reason: GMAIL_REFRESH_FAILED_REASON.to_string(),
            })?;

        let message = build_message(email)?;
        let request = GmailSendRequest {
            raw: URL_SAFE_NO_PAD.encode(message.formatted()),
            thread_id: email.threading.thread_id.clone(),
        };

        debug!(
            tenant_id = %email.tenant_id,
            to = %email.to.email,
            subject = %email.subject,
            "Sending email via Gmail API"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(access_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: GmailSendResponse = response
                .json()
                .await
                .map_err(|e| EmailError::Transient(format!("Failed to parse Gmail response: {}", e)))?;
            debug!(message_id = %body.id, "Email sent via Gmail");
            Ok(body.id)
        } else {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Gmail API error");
            Err(classify(status, &body))
        }
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gmail
    }
}
