//! Resend email provider implementation.

use super::{CredentialSource, EmailProvider};
use crate::error::{EmailError, EmailResult};
use crate::models::{OutboundEmail, ProviderKind};
use async_trait::async_trait;
use core_config::{env_or_default, env_parse, ConfigError, FromEnv};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Resend API configuration.
#[derive(Debug, Clone)]
pub struct ResendConfig {
    /// API base URL (defaults to production).
    pub api_url: String,
    /// Upper bound on one API call.
    pub timeout: Duration,
}

impl Default for ResendConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.resend.com".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl ResendConfig {
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl FromEnv for ResendConfig {
    /// RESEND_API_URL overrides the production endpoint, RESEND_TIMEOUT_SECS (30)
    /// bounds each call.
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::default()
            .with_api_url(env_or_default("RESEND_API_URL", "https://api.resend.com"))
            .with_timeout(Duration::from_secs(env_parse("RESEND_TIMEOUT_SECS", "30")?)))
    }
}

/// Resend email provider. The API key is looked up per tenant on every send.
pub struct ResendProvider {
    config: ResendConfig,
    client: Client,
    credentials: Arc<dyn CredentialSource>,
}

impl ResendProvider {
    pub fn new(config: ResendConfig, credentials: Arc<dyn CredentialSource>) -> EmailResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EmailError::Internal(format!("Failed to build Resend HTTP client: {}", e)))?;
        Ok(Self {
            config,
            client,
            credentials,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/emails", self.config.api_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct ResendRequest<'a> {
    from: String,
    to: Vec<&'a str>,
    subject: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

impl<'a> From<&'a OutboundEmail> for ResendRequest<'a> {
    fn from(email: &'a OutboundEmail) -> Self {
        Self {
            from: email.from.to_string(),
            to: vec![email.to.email.as_str()],
            subject: &email.subject,
            text: &email.text_body,
            html: email.html_body.as_deref(),
            reply_to: email.reply_to.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ResendErrorBody {
    message: Option<String>,
}

/// Map a non-2xx response onto the error taxonomy.
fn classify(status: StatusCode, body: &str) -> EmailError {
    let message = serde_json::from_str::<ResendErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {}: Failed to send email", status.as_u16()));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => EmailError::AuthExpired {
            provider: ProviderKind::Resend,
            reason: message,
        },
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => EmailError::Validation(message),
        _ => EmailError::Transient(message),
    }
}

#[async_trait]
impl EmailProvider for ResendProvider {
    async fn send(&self, email: &OutboundEmail) -> EmailResult<String> {
        let api_key = self
            .credentials
            .credential(email.tenant_id, ProviderKind::Resend)
            .await?
            .ok_or(EmailError::ProviderNotConfigured(ProviderKind::Resend))?;

        debug!(
            tenant_id = %email.tenant_id,
            to = %email.to.email,
            subject = %email.subject,
            "Sending email via Resend"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&ResendRequest::from(email))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: ResendResponse = response
                .json()
                .await
                .map_err(|e| EmailError::Transient(format!("Failed to parse Resend response: {}", e)))?;
            debug!(message_id = %body.id, "Email sent via Resend");
            Ok(body.id)
        } else {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Resend API error");
            Err(classify(status, &body))
        }
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Resend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Mailbox, MessageClass, ThreadingHints};
    use crate::providers::StaticCredentials;
    use uuid::Uuid;

    fn email() -> OutboundEmail {
        OutboundEmail {
            tenant_id: Uuid::now_v7(),
            from: Mailbox::new("team@acme.test", Some("Acme".into())),
            to: Mailbox::new("ada@example.com", None),
            subject: "Interview reminder".into(),
            text_body: "See you at 10".into(),
            html_body: None,
            reply_to: Some("hr@acme.test".into()),
            threading: ThreadingHints::default(),
            preferred_provider: ProviderKind::Resend,
            message_class: MessageClass::Reminder,
        }
    }

    #[test]
    fn test_request_body() {
        let email = email();
        let body = serde_json::to_value(ResendRequest::from(&email)).unwrap();
        assert_eq!(body["from"], "Acme <team@acme.test>");
        assert_eq!(body["to"], serde_json::json!(["ada@example.com"]));
        assert_eq!(body["reply_to"], "hr@acme.test");
        assert!(body.get("html").is_none());
    }

    #[test]
    fn test_classify_uses_message_field() {
        let err = classify(StatusCode::UNPROCESSABLE_ENTITY, r#"{"message":"Invalid `to` field"}"#);
        assert!(matches!(err, EmailError::Validation(ref m) if m == "Invalid `to` field"));
    }

    #[test]
    fn test_classify_falls_back_to_status_text() {
        let err = classify(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert_eq!(err.to_string(), "HTTP 502: Failed to send email");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_auth_failure() {
        let err = classify(StatusCode::UNAUTHORIZED, r#"{"message":"API key is invalid"}"#);
        assert!(err.is_auth_expired());
    }

    #[test]
    fn test_resend_config_from_env() {
        temp_env::with_vars(
            [
                ("RESEND_API_URL", Some("http://localhost:4010")),
                ("RESEND_TIMEOUT_SECS", Some("10")),
            ],
            || {
                let config = ResendConfig::from_env().unwrap();
                assert_eq!(config.api_url, "http://localhost:4010");
                assert_eq!(config.timeout, Duration::from_secs(10));
            },
        );
        temp_env::with_var_unset("RESEND_API_URL", || {
            assert_eq!(ResendConfig::from_env().unwrap().api_url, "https://api.resend.com");
        });
    }

    #[tokio::test]
    async fn test_missing_api_key_is_not_configured() {
        let provider = ResendProvider::new(ResendConfig::default(), Arc::new(StaticCredentials::new())).unwrap();
        let err = provider.send(&email()).await.unwrap_err();
        assert!(matches!(err, EmailError::ProviderNotConfigured(ProviderKind::Resend)));
    }

    #[tokio::test]
    async fn test_unresponsive_api_times_out_as_transient() {
        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });

        let provider = ResendProvider::new(
            ResendConfig::default()
                .with_api_url(format!("http://{}", addr))
                .with_timeout(Duration::from_millis(200)),
            Arc::new(StaticCredentials::new().with(ProviderKind::Resend, "re_test_key")),
        )
        .unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), provider.send(&email()))
            .await
            .expect("request should be cut off by the client timeout")
            .unwrap_err();
        assert!(matches!(err, EmailError::Transient(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let provider = ResendProvider::new(
            ResendConfig::default().with_api_url("http://localhost:4010/"),
            Arc::new(StaticCredentials::new()),
        )
        .unwrap();
        assert_eq!(provider.endpoint(), "http://localhost:4010/emails");
    }
}
