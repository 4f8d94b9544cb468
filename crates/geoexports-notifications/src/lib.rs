//! Export outcome notifications.
//!
//! Each finished export job produces one [`ExportNotification`], rendered from
//! a `{{placeholder}}` template and delivered by a [`NotificationSender`].

pub mod adapters;
pub mod error;
pub mod sender;
pub mod templates;
pub mod types;

pub use adapters::{EmailAdapter, EmailConfig, RenderedContent, SendResult, SmtpSecurity};
pub use error::NotificationError;
pub use sender::{
    DynNotificationSender, EmailNotificationSender, LogNotificationSender, NotificationSender,
};
pub use templates::{Template, TemplateRenderer};
pub use types::{ExportNotification, ExportOutcome};
