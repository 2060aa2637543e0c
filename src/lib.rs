//! **smtp-provider**: "send one email" as a managed infrastructure resource.
//!
//! An account is configured once from [`ProviderSettings`]; every message
//! created in its scope is composed, fingerprinted and sent over SMTP exactly
//! once. The resulting identity is `<unix-nanos>-<hex sha256>`.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |---|---|
//! | [`config`] | Provider settings, environment defaults, validated account config |
//! | [`authenticator`] | CRAM-MD5 / PLAIN strategy construction |
//! | [`message`] | Message request, recipient union, sender precedence |
//! | [`compose`] | Header framing, SHA-256 fingerprint, DATA framing |
//! | [`transport`] | Delivery seam and the SMTP implementation |
//! | [`resource`] | Configure / create / read / delete lifecycle |
//! | [`error`] | Provider error type |

pub mod authenticator;
pub mod compose;
pub mod config;
pub mod error;
pub mod message;
pub mod resource;
pub mod transport;

pub use compose::{compose, ComposedMessage};
pub use config::{AccountConfig, AuthScheme, ProviderSettings};
pub use error::{ProviderError, Result};
pub use message::MessageRequest;
pub use resource::{configure, Account, MessageState};
pub use transport::{DeliveryFailure, DeliveryPhase, Envelope, SmtpTransport, Transport};
