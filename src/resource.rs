//! Message resource lifecycle.
//!
//! An [`Account`] is configured once and shared by every message created in
//! its scope. Creating a message sends it exactly once; reading and deleting
//! never touch the network.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::authenticator;
use crate::compose::{compose, ComposedMessage};
use crate::config::{AccountConfig, ProviderSettings};
use crate::error::{ProviderError, Result};
use crate::message::MessageRequest;
use crate::transport::{Envelope, SmtpTransport, Transport};

/// State the host records for a created message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageState {
    /// `<unix-nanos>-<hex sha256>`.
    pub id: String,
    pub request: MessageRequest,
}

/// A configured account handle. Cheap to clone, safe to share across tasks.
#[derive(Clone)]
pub struct Account {
    config: Arc<AccountConfig>,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Validate `settings` (after environment defaults) and build an account
/// that delivers over SMTP.
pub fn configure(settings: ProviderSettings) -> Result<Account> {
    let config = AccountConfig::try_from(settings.with_env_defaults()?)?;
    Account::new(config)
}

impl Account {
    /// Account delivering over SMTP with the configured credentials.
    pub fn new(config: AccountConfig) -> Result<Self> {
        let auth = authenticator::build(&config)?;
        let transport = SmtpTransport::new(config.smtp_config(), auth);
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Account delivering through any [`Transport`].
    pub fn with_transport(config: AccountConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
        }
    }

    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    /// Compose and deliver `request`, returning its identity.
    pub async fn send(&self, request: &MessageRequest) -> Result<String> {
        request.validate()?;

        let sender = request.resolve_sender(&self.config.from, &self.config.username);
        let composed = compose(request, sender)?;
        let envelope = Envelope {
            sender: self.config.username.clone(),
            recipients: request.recipients(),
        };

        self.transport
            .deliver(&envelope, &composed)
            .await
            .map_err(|failure| ProviderError::Delivery {
                username: self.config.username.clone(),
                phase: failure.phase,
                source: failure.error,
            })?;

        Ok(identity(&composed))
    }

    /// Create the message resource: send it and return the state to store.
    pub async fn create_message(&self, request: MessageRequest) -> Result<MessageState> {
        let id = self.send(&request).await?;
        info!("Created message {}", id);
        Ok(MessageState { id, request })
    }

    /// Nothing remote to read back; the stored state is authoritative.
    pub fn read_message(&self, state: MessageState) -> MessageState {
        state
    }

    /// Forget the message. Sent mail cannot be recalled.
    pub fn delete_message(&self, state: MessageState) {
        debug!("Removing message {} from state", state.id);
    }
}

fn identity(composed: &ComposedMessage) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{}-{}", nanos, composed.fingerprint_hex())
}
