use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{RenderedContent, SendResult};
use crate::error::NotificationError;

pub const SENDGRID_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";

/// Transport security for SMTP relays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Implicit TLS (usually port 465).
    Tls,
    /// STARTTLS upgrade (usually port 587).
    #[default]
    Starttls,
    /// Plain connection, for local relays only.
    None,
}

/// Email delivery settings. SendGrid wins when an API key is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub from: Option<String>,

    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_username: Option<String>,
    #[serde(skip_serializing)]
    pub smtp_password: Option<String>,
    pub smtp_security: SmtpSecurity,

    #[serde(skip_serializing)]
    pub sendgrid_api_key: Option<String>,
    pub sendgrid_endpoint: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            from: None,
            smtp_host: None,
            smtp_port: None,
            smtp_username: None,
            smtp_password: None,
            smtp_security: SmtpSecurity::default(),
            sendgrid_api_key: None,
            sendgrid_endpoint: SENDGRID_ENDPOINT.to_string(),
        }
    }
}

impl EmailConfig {
    /// Name of the configured provider, if any.
    pub fn provider(&self) -> Option<&'static str> {
        if self.sendgrid_api_key.is_some() {
            Some("sendgrid")
        } else if self.smtp_host.is_some() {
            Some("smtp")
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.provider().is_none() {
            return Ok(());
        }
        let from = self
            .from
            .as_deref()
            .ok_or("notifications.from is required when email delivery is configured")?;
        from.parse::<Mailbox>()
            .map_err(|e| format!("notifications.from is not a valid address: {e}"))?;
        if self.smtp_username.is_some() != self.smtp_password.is_some() {
            return Err("smtp_username and smtp_password must be set together".into());
        }
        Ok(())
    }
}

/// Sends rendered messages over SMTP or the SendGrid HTTP API.
pub struct EmailAdapter {
    config: EmailConfig,
    http_client: Client,
    mailer: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl std::fmt::Debug for EmailAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailAdapter")
            .field("provider", &self.config.provider())
            .field("from", &self.config.from)
            .finish_non_exhaustive()
    }
}

impl EmailAdapter {
    pub fn new(config: EmailConfig) -> Result<Self, NotificationError> {
        let mailer = match (&config.smtp_host, config.sendgrid_api_key.is_some()) {
            (Some(host), false) => Some(Self::build_mailer(&config, host)?),
            _ => None,
        };
        Ok(Self {
            config,
            http_client: Client::new(),
            mailer,
        })
    }

    fn build_mailer(
        config: &EmailConfig,
        host: &str,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotificationError> {
        let mut builder = match config.smtp_security {
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| NotificationError::InvalidConfig(e.to_string()))?,
            SmtpSecurity::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| NotificationError::InvalidConfig(e.to_string()))?,
            SmtpSecurity::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
        };
        if let Some(port) = config.smtp_port {
            builder = builder.port(port);
        }
        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        Ok(builder.build())
    }

    pub fn config(&self) -> &EmailConfig {
        &self.config
    }

    fn from_address(&self) -> Result<&str, NotificationError> {
        self.config
            .from
            .as_deref()
            .ok_or_else(|| NotificationError::InvalidConfig("Missing from".into()))
    }

    /// Deliver one message to `to`.
    pub async fn send(
        &self,
        to: &str,
        content: &RenderedContent,
    ) -> Result<SendResult, NotificationError> {
        if let Some(api_key) = &self.config.sendgrid_api_key {
            self.send_sendgrid(api_key, to, content).await
        } else if let Some(mailer) = &self.mailer {
            self.send_smtp(mailer, to, content).await
        } else {
            Err(NotificationError::InvalidConfig(
                "No email provider configured".into(),
            ))
        }
    }

    async fn send_sendgrid(
        &self,
        api_key: &str,
        to: &str,
        content: &RenderedContent,
    ) -> Result<SendResult, NotificationError> {
        let from = self.from_address()?;
        let subject = content.subject.as_deref().unwrap_or("Export");

        let mut parts = vec![json!({"type": "text/plain", "value": content.body})];
        if let Some(html) = &content.html_body {
            parts.push(json!({"type": "text/html", "value": html}));
        }
        let body = json!({
            "personalizations": [{ "to": [{"email": to}] }],
            "from": {"email": from},
            "subject": subject,
            "content": parts,
        });

        let response = self
            .http_client
            .post(&self.config.sendgrid_endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotificationError::SendFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(NotificationError::SendFailed(format!(
                "SendGrid responded {status}: {error}"
            )));
        }

        let message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        debug!(?message_id, "email accepted by SendGrid");
        Ok(SendResult {
            external_id: message_id,
        })
    }

    async fn send_smtp(
        &self,
        mailer: &AsyncSmtpTransport<Tokio1Executor>,
        to: &str,
        content: &RenderedContent,
    ) -> Result<SendResult, NotificationError> {
        let from: Mailbox = self
            .from_address()?
            .parse()
            .map_err(|e| NotificationError::InvalidConfig(format!("Invalid from: {e}")))?;
        let to: Mailbox = to
            .parse()
            .map_err(|e| NotificationError::InvalidRecipient(format!("{to}: {e}")))?;
        let subject = content.subject.as_deref().unwrap_or("Export");

        let builder = Message::builder().from(from).to(to).subject(subject);
        let email = match &content.html_body {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(
                content.body.clone(),
                html.clone(),
            )),
            None => builder
                .header(ContentType::TEXT_PLAIN)
                .body(content.body.clone()),
        }
        .map_err(|e| NotificationError::SendFailed(e.to_string()))?;

        let response = mailer
            .send(email)
            .await
            .map_err(|e| NotificationError::SendFailed(e.to_string()))?;
        Ok(SendResult {
            external_id: Some(response.message().collect()),
        })
    }
}
