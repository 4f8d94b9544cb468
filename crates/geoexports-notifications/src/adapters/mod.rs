pub mod email;

/// Result of a delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub external_id: Option<String>,
}

/// Rendered notification content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContent {
    pub subject: Option<String>,
    pub body: String,
    pub html_body: Option<String>,
}

pub use email::{EmailAdapter, EmailConfig, SmtpSecurity};
