//! Email delivery service contract.
//!
//! The concrete transport (Gmail SMTP or anything else) is an external
//! collaborator; a provider plugin registers an implementation under
//! [`EMAIL_SERVICE`] and consumers (e.g. the daily review) look it up
//! just-in-time when they actually need to send.

use async_trait::async_trait;
use std::sync::Arc;

/// Registry name of the email service.
pub const EMAIL_SERVICE: &str = "emailService";

/// Email delivery capability.
#[async_trait]
pub trait EmailService: Send + Sync + 'static {
    /// Sends one message to the configured recipient.
    async fn send(&self, subject: &str, body: &str) -> Result<(), String>;
}

/// Registry wrapper for an [`EmailService`].
pub struct Email(pub Arc<dyn EmailService>);
