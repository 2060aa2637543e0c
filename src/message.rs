//! Message request model.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use smtp_engine::client::validate_line;

use crate::error::{ProviderError, Result};

/// One email to send, as declared by the host.
///
/// `to`, `cc` and `bcc` are sets: duplicates collapse on insertion and the
/// iteration order (and therefore the order in the `To`/`Cc` headers) is not
/// defined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageRequest {
    pub subject: String,
    pub body: String,
    /// Overrides the account's default sender when non-empty.
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: HashSet<String>,
    #[serde(default)]
    pub cc: HashSet<String>,
    /// Envelope-only recipients; never written to a header.
    #[serde(default)]
    pub bcc: HashSet<String>,
    /// Extra headers written after the standard ones.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl MessageRequest {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn from(mut self, sender: impl Into<String>) -> Self {
        self.from = Some(sender.into());
        self
    }

    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.insert(address.into());
        self
    }

    pub fn cc(mut self, address: impl Into<String>) -> Self {
        self.cc.insert(address.into());
        self
    }

    pub fn bcc(mut self, address: impl Into<String>) -> Self {
        self.bcc.insert(address.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Reject a request with nobody to deliver to, or with an address that
    /// would break out of its `RCPT TO` line.
    pub fn validate(&self) -> Result<()> {
        if self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty() {
            return Err(ProviderError::config(
                "at least one of to, cc or bcc must be set",
            ));
        }
        for address in self.to.iter().chain(&self.cc).chain(&self.bcc) {
            validate_line(address).map_err(|_| {
                ProviderError::config(format!(
                    "recipient {:?} must not contain a line break",
                    address
                ))
            })?;
        }
        Ok(())
    }

    /// Envelope recipients: the exact-string union of `to`, `cc` and `bcc`.
    pub fn recipients(&self) -> BTreeSet<String> {
        self.to
            .iter()
            .chain(self.cc.iter())
            .chain(self.bcc.iter())
            .cloned()
            .collect()
    }

    /// The `From` header value: this request's `from`, else the account
    /// default, else the login name.
    pub fn resolve_sender<'a>(&'a self, default_from: &'a str, username: &'a str) -> &'a str {
        resolve_sender(self.from.as_deref(), default_from, username)
    }
}

/// First non-empty of `override_from`, `default_from`, `username`.
pub fn resolve_sender<'a>(
    override_from: Option<&'a str>,
    default_from: &'a str,
    username: &'a str,
) -> &'a str {
    match override_from {
        Some(from) if !from.is_empty() => from,
        _ if !default_from.is_empty() => default_from,
        _ => username,
    }
}
