//! Delivery transport.
//!
//! [`Transport`] is the seam between the resource lifecycle and the wire.
//! [`SmtpTransport`] runs one complete SMTP session per delivery; tests swap
//! in their own implementation to observe envelopes without a network.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use log::{debug, info, warn};
use smtp_engine::{authenticate, SmtpAuth, SmtpClient, SmtpConfig, SmtpError, SmtpSecurity};

use crate::compose::ComposedMessage;

/// Step of the SMTP transaction, named in delivery errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryPhase {
    Connect,
    Negotiate,
    Authenticate,
    Sender,
    Recipients,
    Data,
}

impl fmt::Display for DeliveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connect => "connecting",
            Self::Negotiate => "negotiating capabilities",
            Self::Authenticate => "authenticating",
            Self::Sender => "declaring the sender",
            Self::Recipients => "declaring recipients",
            Self::Data => "transferring data",
        };
        f.write_str(s)
    }
}

/// Envelope addresses for one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// `MAIL FROM` address.
    pub sender: String,
    pub recipients: BTreeSet<String>,
}

/// A failed delivery and the phase it failed in.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    pub phase: DeliveryPhase,
    pub error: SmtpError,
}

impl DeliveryFailure {
    pub fn new(phase: DeliveryPhase, error: SmtpError) -> Self {
        Self { phase, error }
    }
}

/// Anything that can deliver a composed message.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(
        &self,
        envelope: &Envelope,
        message: &ComposedMessage,
    ) -> Result<(), DeliveryFailure>;
}

/// SMTP delivery over a fresh connection per message.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    config: SmtpConfig,
    auth: SmtpAuth,
}

impl SmtpTransport {
    pub fn new(config: SmtpConfig, auth: SmtpAuth) -> Self {
        Self { config, auth }
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    async fn run(
        &self,
        client: &mut SmtpClient,
        envelope: &Envelope,
        message: &ComposedMessage,
    ) -> Result<(), DeliveryFailure> {
        use DeliveryPhase::*;

        client
            .connect()
            .await
            .map_err(|e| DeliveryFailure::new(Connect, e))?;

        let mut caps = client
            .ehlo()
            .await
            .map_err(|e| DeliveryFailure::new(Negotiate, e))?;

        if self.config.security == SmtpSecurity::StartTls && !client.is_tls_active() {
            if caps.starttls {
                client
                    .starttls()
                    .await
                    .map_err(|e| DeliveryFailure::new(Negotiate, e))?;
                if let Some(fresh) = client.capabilities() {
                    caps = fresh.clone();
                }
            } else {
                debug!(
                    "{} does not offer STARTTLS, continuing in plain text",
                    self.config.host
                );
            }
        }

        if !caps.accepts_size(message.len()) {
            return Err(DeliveryFailure::new(
                Negotiate,
                SmtpError::message(format!(
                    "message of {} bytes exceeds the server limit of {} bytes",
                    message.len(),
                    caps.max_size.unwrap_or_default()
                )),
            ));
        }

        if caps.auth {
            let mechanism = self.auth.method().to_string();
            if !caps.supports_auth(&mechanism) {
                debug!(
                    "{} is not among advertised mechanisms {:?}, trying anyway",
                    mechanism, caps.auth_mechanisms
                );
            }
            authenticate(client, &self.auth)
                .await
                .map_err(|e| DeliveryFailure::new(Authenticate, e))?;
        } else {
            warn!(
                "{} does not advertise AUTH, sending without authentication",
                self.config.host
            );
        }

        client
            .mail_from(&envelope.sender)
            .await
            .map_err(|e| DeliveryFailure::new(Sender, e))?;

        for recipient in &envelope.recipients {
            client
                .rcpt_to(recipient)
                .await
                .map_err(|e| DeliveryFailure::new(Recipients, e))?;
        }

        client
            .data(message.framed())
            .await
            .map_err(|e| DeliveryFailure::new(Data, e))?;
        Ok(())
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn deliver(
        &self,
        envelope: &Envelope,
        message: &ComposedMessage,
    ) -> Result<(), DeliveryFailure> {
        let mut client = SmtpClient::new(self.config.clone());
        let outcome = self.run(&mut client, envelope, message).await;
        client.quit().await;

        if outcome.is_ok() {
            info!(
                "Delivered message {} to {} recipient(s) via {}",
                message.fingerprint_hex(),
                envelope.recipients.len(),
                self.config.address()
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_descriptions() {
        assert_eq!(DeliveryPhase::Connect.to_string(), "connecting");
        assert_eq!(DeliveryPhase::Recipients.to_string(), "declaring recipients");
        assert_eq!(DeliveryPhase::Data.to_string(), "transferring data");
    }

    #[tokio::test]
    async fn connect_failure_reports_connect_phase() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = SmtpTransport::new(
            SmtpConfig {
                host: "127.0.0.1".into(),
                port,
                security: SmtpSecurity::None,
                connect_timeout_secs: 2,
                ..Default::default()
            },
            SmtpAuth::cram_md5("test", secrecy::SecretString::new("k".into())),
        );
        let envelope = Envelope {
            sender: "test".into(),
            recipients: ["a@x.com".to_string()].into_iter().collect(),
        };
        let message = crate::compose::compose(
            &crate::message::MessageRequest::new("s", "b").to("a@x.com"),
            "test",
        )
        .unwrap();

        let failure = transport.deliver(&envelope, &message).await.unwrap_err();
        assert_eq!(failure.phase, DeliveryPhase::Connect);
    }
}
