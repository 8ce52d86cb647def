//! License key delivery by email.
//!
//! Uses Resend in production, SMTP (lettre) in development. With neither
//! configured, delivery is disabled and keys are only logged as issued.

use anyhow::Result;
use async_trait::async_trait;
use lettre::{
    Message, SmtpTransport, Transport,
    message::{Mailbox, header::ContentType},
};
use resend_rs::types::CreateEmailBaseOptions;

const FROM_NAME: &str = "Vibegen";
const FROM_ADDRESS: &str = "noreply@mail.vibegen.app";
const SUBJECT: &str = "Your Vibegen license key";

fn license_body(key: &str) -> String {
    format!(
        "Thanks for your purchase!\n\n\
         Your license key is:\n\n    {}\n\n\
         Paste it into the app to unlock premium generation. \
         Keep it somewhere safe; it works in any browser.",
        key
    )
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Send a freshly issued license key to its owner.
    async fn send_license_key(&self, to: &str, key: &str) -> Result<()>;
}

pub enum EmailSenderImpl {
    /// SMTP-based sender using lettre (for development)
    Smtp(SmtpSender),
    /// Resend API sender (for production)
    Resend(ResendSender),
    /// No transport configured
    Disabled,
}

impl EmailSenderImpl {
    /// Resend if an api key is provided, otherwise SMTP, otherwise disabled.
    pub fn new(resend_api_key: Option<String>, smtp_url: Option<String>) -> Result<Self> {
        if let Some(api_key) = resend_api_key.filter(|k| !k.is_empty()) {
            Ok(Self::Resend(ResendSender::new(api_key)))
        } else if let Some(url) = smtp_url.filter(|u| !u.is_empty()) {
            Ok(Self::Smtp(SmtpSender::new(url)?))
        } else {
            tracing::warn!("no email transport configured, license keys will not be emailed");
            Ok(Self::Disabled)
        }
    }
}

#[async_trait]
impl EmailSender for EmailSenderImpl {
    async fn send_license_key(&self, to: &str, key: &str) -> Result<()> {
        match self {
            Self::Resend(sender) => sender.send_license_key(to, key).await,
            Self::Smtp(sender) => sender.send_license_key(to, key).await,
            Self::Disabled => {
                tracing::info!(to = %to, "email disabled, license key not sent");
                Ok(())
            }
        }
    }
}

/// SMTP sender using lettre.
pub struct SmtpSender {
    transport: SmtpTransport,
}

impl SmtpSender {
    pub fn new(smtp_url: String) -> Result<Self> {
        let transport = SmtpTransport::from_url(&smtp_url)?.build();

        Ok(Self { transport })
    }

    pub async fn send_license_key(&self, to: &str, key: &str) -> Result<()> {
        let email = Message::builder()
            .from(Mailbox::new(
                Some(FROM_NAME.to_owned()),
                FROM_ADDRESS.parse()?,
            ))
            .to(Mailbox::new(None, to.parse()?))
            .subject(SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(license_body(key))?;

        // lettre's SmtpTransport is blocking
        let transport = self.transport.clone();
        tokio::task::spawn_blocking(move || transport.send(&email)).await??;

        Ok(())
    }
}

/// Resend API sender.
pub struct ResendSender {
    client: resend_rs::Resend,
}

impl ResendSender {
    pub fn new(api_key: String) -> Self {
        Self {
            client: resend_rs::Resend::new(&api_key),
        }
    }

    pub async fn send_license_key(&self, to: &str, key: &str) -> Result<()> {
        let from = format!("{} <{}>", FROM_NAME, FROM_ADDRESS);
        let email = CreateEmailBaseOptions::new(from, [to], SUBJECT).with_text(&license_body(key));

        self.client.emails.send(email).await?;

        Ok(())
    }
}
