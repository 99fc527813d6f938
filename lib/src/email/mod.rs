//! Outgoing mail.
//!
//! The dispatch loop only ever talks to the [`Mailer`] trait. [`SmtpMailer`]
//! hands messages to the configured relay, [`LogMailer`] just logs them and
//! is meant for dry runs.

use async_trait::async_trait;
use lettre::{
    address::AddressError,
    message::{Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::{Error, ErrorKind, Result};

pub mod list;

/// A fully rendered message ready for hand-off.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: String,
    /// Overrides the configured sender.
    pub from: Option<String>,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Transmits the message. Any error means the message may not have been
    /// delivered.
    async fn send(&self, message: OutgoingMessage) -> Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: crate::config::Email,
}

impl SmtpMailer {
    pub fn new(config: &crate::config::Email) -> Result<Self> {
        let creds = Credentials::new(config.smtp_user.clone(), config.smtp_password.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        Ok(Self {
            transport,
            config: config.clone(),
        })
    }

    /// Builds the mime message, appending the footer and the unsubscribe
    /// mailto link to both bodies.
    pub fn build(&self, message: OutgoingMessage) -> Result<Message> {
        let from = match message.from {
            Some(from) => from,
            None => format!("{} <{}>", self.config.sender_name, self.config.address),
        };
        let (text, html) = with_footer(&self.config, message.text, message.html);

        let message = Message::builder()
            .from(parse_mailbox(&from)?)
            .to(parse_mailbox(&message.to)?)
            .subject(message.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(text))
                    .singlepart(SinglePart::html(html)),
            )?;
        Ok(message)
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: OutgoingMessage) -> Result<()> {
        let message = self.build(message)?;
        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| ErrorKind::Transport(e.to_string()))?;
        if response.is_positive() {
            Ok(())
        } else {
            Err(ErrorKind::EmailBadResponse(response.code().to_string()).into())
        }
    }
}

/// Mailer that doesn't send anything, only logs what would be sent.
#[derive(Clone, Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: OutgoingMessage) -> Result<()> {
        tracing::info!(to = %message.to, subject = %message.subject, "dry run, message not sent");
        Ok(())
    }
}

fn parse_mailbox(addr: &str) -> Result<Mailbox> {
    addr.parse()
        .map_err(|e: AddressError| Error::new(ErrorKind::EmailParseError(format!("{addr}: {e}"))))
}

fn with_footer(config: &crate::config::Email, text: String, html: String) -> (String, String) {
    let mut text = text;
    let mut html = html;
    if !config.footer.is_empty() {
        text.push_str(&format!("\n\n--\n{}", config.footer));
        html.push_str(&format!("<hr><p>{}</p>", config.footer));
    }
    if !config.unsubscribe_mailbox.is_empty() {
        let link = format!("mailto:{}?subject=unsubscribe", config.unsubscribe_mailbox);
        text.push_str(&format!("\n\nUnsubscribe: {link}"));
        html.push_str(&format!("<p><a href=\"{link}\">Unsubscribe</a></p>"));
    }
    (text, html)
}
