//! Mail transport collaborator.
//!
//! `MailTransport` is the seam the dispatcher calls through; `SmtpMailer`
//! delivers over SMTP with lettre. Delivery failures come back as errors and
//! are turned into `failed` ledger records by the dispatcher, never raised
//! past it.

use crate::config::Smtp;
use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::fmt;

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Hand one message to the provider. `Ok(())` means accepted for
    /// delivery.
    async fn send(
        &self,
        to: &str,
        subject: &str,
        text_body: &str,
        html_body: Option<&str>,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpMailer")
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

impl SmtpMailer {
    pub fn from_config(cfg: &Smtp) -> Result<Self> {
        let from: Mailbox = cfg
            .from_address
            .parse()
            .context("invalid smtp.from_address")?;

        let builder = if cfg.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)
        }
        .context("failed to configure SMTP relay")?;

        let mut builder = builder.port(cfg.port);
        if !cfg.username.trim().is_empty() {
            builder = builder.credentials(Credentials::new(
                cfg.username.clone(),
                cfg.password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        text_body: &str,
        html_body: Option<&str>,
    ) -> Result<()> {
        let to: Mailbox = to.parse().context("invalid recipient address")?;
        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject);

        let message = match html_body {
            Some(html) => builder
                .multipart(MultiPart::alternative_plain_html(
                    text_body.to_string(),
                    html.to_string(),
                ))
                .context("failed to build multipart message")?,
            None => builder
                .body(text_body.to_string())
                .context("failed to build message")?,
        };

        self.transport
            .send(message)
            .await
            .context("SMTP delivery failed")?;
        Ok(())
    }
}
