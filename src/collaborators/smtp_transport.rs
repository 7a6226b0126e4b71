//! collaborators/smtp_transport.rs
//! Transporte SMTP con lettre, usando las credenciales de cada remitente.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, SinglePart},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use super::{RenderedContent, SendOutcome, Transport};
use crate::models::sender_model::SenderProfile;

const SMTPS_PORT: u16 = 465;

#[derive(Debug, Clone, Default)]
pub struct SmtpTransport;

impl SmtpTransport {
    pub fn new() -> Self {
        SmtpTransport
    }

    fn build_mailer(sender: &SenderProfile) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let tls_params = TlsParameters::new(sender.smtp_host.clone())?;
        let tls = if sender.smtp_port == SMTPS_PORT {
            Tls::Wrapper(tls_params)
        } else {
            Tls::Required(tls_params)
        };

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&sender.smtp_host)?
            .port(sender.smtp_port)
            .credentials(Credentials::new(
                sender.smtp_user.clone(),
                sender.smtp_pass.clone(),
            ))
            .tls(tls)
            .build();
        Ok(mailer)
    }
}

/// Errores aquí son de datos (direcciones inválidas): reintentar no ayuda.
fn build_message(
    sender: &SenderProfile,
    recipient: &str,
    content: &RenderedContent,
) -> Result<Message> {
    let from: Mailbox = sender
        .from_address
        .parse()
        .context("Invalid from address")?;
    let to: Mailbox = recipient.parse().context("Invalid recipient address")?;

    let html_part = SinglePart::builder()
        .header(ContentType::parse("text/html; charset=utf-8")?)
        .body(content.html.clone());

    let message = Message::builder()
        .from(from)
        .to(to)
        .subject(&content.subject)
        .singlepart(html_part)?;
    Ok(message)
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(
        &self,
        sender: &SenderProfile,
        recipient: &str,
        content: &RenderedContent,
    ) -> SendOutcome {
        let message = match build_message(sender, recipient, content) {
            Ok(m) => m,
            Err(e) => return SendOutcome::PermanentFailure(format!("{e:#}")),
        };

        let mailer = match Self::build_mailer(sender) {
            Ok(m) => m,
            Err(e) => return SendOutcome::TransientFailure(format!("{e:#}")),
        };

        match mailer.send(message).await {
            Ok(_) => SendOutcome::Success,
            Err(e) if e.is_permanent() => SendOutcome::PermanentFailure(e.to_string()),
            Err(e) => SendOutcome::TransientFailure(e.to_string()),
        }
    }
}
