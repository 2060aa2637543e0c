//! Provider error type.

use smtp_engine::SmtpError;
use thiserror::Error;

use crate::transport::DeliveryPhase;

/// Errors surfaced to the infrastructure host.
///
/// None of these leave remote state behind: configuration and composition
/// errors happen before any connection is opened, and a delivery error means
/// the server never accepted the message data.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Bad or missing account settings, or an unusable message request.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A header or body segment could not be serialized.
    #[error("failed to write the {segment}: {source}")]
    Composition {
        segment: String,
        #[source]
        source: std::io::Error,
    },

    /// The SMTP transaction failed at `phase`.
    #[error("error sending message as {username} while {phase}: {source}")]
    Delivery {
        username: String,
        phase: DeliveryPhase,
        #[source]
        source: SmtpError,
    },
}

impl ProviderError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// The failing delivery phase, if this is a delivery error.
    pub fn phase(&self) -> Option<DeliveryPhase> {
        match self {
            Self::Delivery { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
