//! SMTP authentication mechanisms.
//!
//! Supports PLAIN (RFC 4616) and CRAM-MD5 (RFC 2195).

use std::fmt;

use base64::Engine;
use hmac::{Hmac, Mac};
use log::debug;
use secrecy::{ExposeSecret, SecretString};

use crate::client::SmtpClient;
use crate::types::*;

type HmacMd5 = Hmac<md5::Md5>;

/// A ready-to-use authentication strategy.
///
/// Built once per account and shared read-only by every session.
#[derive(Clone)]
pub enum SmtpAuth {
    /// HMAC-MD5 challenge-response; the secret never crosses the wire.
    CramMd5 {
        username: String,
        secret: SecretString,
    },
    /// `identity \0 username \0 password`, bound to `host`.
    Plain {
        identity: String,
        username: String,
        password: SecretString,
        host: String,
    },
}

impl SmtpAuth {
    pub fn cram_md5(username: impl Into<String>, secret: SecretString) -> Self {
        Self::CramMd5 {
            username: username.into(),
            secret,
        }
    }

    pub fn plain(
        identity: impl Into<String>,
        username: impl Into<String>,
        password: SecretString,
        host: impl Into<String>,
    ) -> Self {
        Self::Plain {
            identity: identity.into(),
            username: username.into(),
            password,
            host: host.into(),
        }
    }

    pub fn method(&self) -> SmtpAuthMethod {
        match self {
            Self::CramMd5 { .. } => SmtpAuthMethod::CramMd5,
            Self::Plain { .. } => SmtpAuthMethod::Plain,
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Self::CramMd5 { username, .. } | Self::Plain { username, .. } => username,
        }
    }
}

impl fmt::Debug for SmtpAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CramMd5 { username, .. } => f
                .debug_struct("CramMd5")
                .field("username", username)
                .field("secret", &"[REDACTED]")
                .finish(),
            Self::Plain {
                identity,
                username,
                host,
                ..
            } => f
                .debug_struct("Plain")
                .field("identity", identity)
                .field("username", username)
                .field("password", &"[REDACTED]")
                .field("host", host)
                .finish(),
        }
    }
}

/// Authenticate the connected session with the given strategy.
pub async fn authenticate(client: &mut SmtpClient, auth: &SmtpAuth) -> SmtpResult<()> {
    debug!("Authenticating as {} with {}", auth.username(), auth.method());

    match auth {
        SmtpAuth::CramMd5 { username, secret } => {
            auth_cram_md5(client, username, secret.expose_secret()).await
        }
        SmtpAuth::Plain {
            identity,
            username,
            password,
            host,
        } => {
            check_plain_allowed(client, host)?;
            auth_plain(client, identity, username, password.expose_secret()).await
        }
    }
}

// ── AUTH PLAIN ──────────────────────────────────────────────────────

/// PLAIN credentials only go to the host they were configured for, and
/// only over TLS unless that host is the local machine.
fn check_plain_allowed(client: &SmtpClient, bound_host: &str) -> SmtpResult<()> {
    let connected = client.config().host.as_str();
    if connected != bound_host {
        return Err(SmtpError::auth(format!(
            "PLAIN credentials are bound to {} but the session is with {}",
            bound_host, connected
        )));
    }
    if !client.is_tls_active() && !is_loopback_host(connected) {
        return Err(SmtpError::auth(
            "refusing to send PLAIN credentials over an unencrypted connection",
        ));
    }
    Ok(())
}

pub(crate) fn is_loopback_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1" | "[::1]")
}

/// AUTH PLAIN: sends `identity\0username\0password` base64-encoded in one shot.
async fn auth_plain(
    client: &mut SmtpClient,
    identity: &str,
    username: &str,
    password: &str,
) -> SmtpResult<()> {
    let encoded = build_plain_payload(identity, username, password);
    let reply = client
        .command_sensitive(&format!("AUTH PLAIN {}", encoded), "AUTH PLAIN <credentials>")
        .await?;

    if reply.is_positive() {
        client.set_authenticated(true);
        Ok(())
    } else {
        Err(SmtpError::auth(format!(
            "AUTH PLAIN failed: {} {}",
            reply.code,
            reply.text()
        ))
        .with_code(reply.code))
    }
}

// ── AUTH CRAM-MD5 ───────────────────────────────────────────────────

/// AUTH CRAM-MD5: HMAC-MD5 challenge-response.
async fn auth_cram_md5(client: &mut SmtpClient, username: &str, secret: &str) -> SmtpResult<()> {
    let reply = client.command("AUTH CRAM-MD5").await?;
    if !reply.is_intermediate() {
        return Err(SmtpError::auth(format!(
            "AUTH CRAM-MD5 rejected: {} {}",
            reply.code,
            reply.text()
        ))
        .with_code(reply.code));
    }

    let challenge_b64 = reply.lines.first().cloned().unwrap_or_default();
    let challenge = base64::engine::general_purpose::STANDARD
        .decode(challenge_b64.trim().as_bytes())
        .map_err(|e| SmtpError::auth(format!("Invalid CRAM-MD5 challenge: {}", e)))?;

    let response = build_cram_md5_response(username, secret, &challenge)?;
    let reply = client
        .command_sensitive(&response, "<CRAM-MD5 response>")
        .await?;

    if reply.is_positive() {
        client.set_authenticated(true);
        Ok(())
    } else {
        Err(SmtpError::auth(format!(
            "AUTH CRAM-MD5 failed: {} {}",
            reply.code,
            reply.text()
        ))
        .with_code(reply.code))
    }
}

/// Compute the CRAM-MD5 HMAC digest as a lowercase hex string.
fn cram_md5_digest(secret: &str, challenge: &[u8]) -> SmtpResult<String> {
    let mut mac = HmacMd5::new_from_slice(secret.as_bytes())
        .map_err(|e| SmtpError::auth(format!("Invalid CRAM-MD5 key: {}", e)))?;
    mac.update(challenge);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

// ── Payload builders ────────────────────────────────────────────────

/// Build the base64 AUTH PLAIN initial response.
pub fn build_plain_payload(identity: &str, username: &str, password: &str) -> String {
    let payload = format!("{}\0{}\0{}", identity, username, password);
    base64::engine::general_purpose::STANDARD.encode(payload.as_bytes())
}

/// Build the base64 CRAM-MD5 answer: `username SP hex(hmac)`.
pub fn build_cram_md5_response(
    username: &str,
    secret: &str,
    challenge: &[u8],
) -> SmtpResult<String> {
    let digest = cram_md5_digest(secret, challenge)?;
    let response = format!("{} {}", username, digest);
    Ok(base64::engine::general_purpose::STANDARD.encode(response.as_bytes()))
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(b64: &str) -> Vec<u8> {
        base64::engine::general_purpose::STANDARD
            .decode(b64.as_bytes())
            .unwrap()
    }

    #[test]
    fn plain_payload_without_identity() {
        let text = String::from_utf8(decode(&build_plain_payload("", "test", "secret"))).unwrap();
        assert_eq!(text, "\0test\0secret");
    }

    #[test]
    fn plain_payload_with_identity() {
        let text =
            String::from_utf8(decode(&build_plain_payload("admin", "test", "secret"))).unwrap();
        assert_eq!(text, "admin\0test\0secret");
    }

    #[test]
    fn cram_md5_rfc2195_vector() {
        let challenge = b"<1896.697170952@postoffice.reston.mci.net>";
        let response = build_cram_md5_response("tim", "tanstaaftanstaaf", challenge).unwrap();
        let text = String::from_utf8(decode(&response)).unwrap();
        assert_eq!(text, "tim b913a602c7eda7a495b4e6e7334d3890");
    }

    #[test]
    fn debug_redacts_secrets() {
        let auth = SmtpAuth::plain(
            "",
            "test",
            SecretString::new("hunter2".into()),
            "localhost",
        );
        let shown = format!("{:?}", auth);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("[REDACTED]"));

        let auth = SmtpAuth::cram_md5("test", SecretString::new("s3cret".into()));
        assert!(!format!("{:?}", auth).contains("s3cret"));
    }

    #[test]
    fn method_and_username() {
        let auth = SmtpAuth::cram_md5("alice", SecretString::new("k".into()));
        assert_eq!(auth.method(), SmtpAuthMethod::CramMd5);
        assert_eq!(auth.username(), "alice");
    }

    #[test]
    fn loopback_hosts() {
        assert!(is_loopback_host("localhost"));
        assert!(is_loopback_host("127.0.0.1"));
        assert!(is_loopback_host("::1"));
        assert!(!is_loopback_host("smtp.example.com"));
    }

    #[test]
    fn plain_refused_for_other_host() {
        let client = SmtpClient::new(SmtpConfig {
            host: "smtp.example.com".into(),
            ..Default::default()
        });
        let err = check_plain_allowed(&client, "other.example.com").unwrap_err();
        assert_eq!(err.kind, SmtpErrorKind::AuthFailure);
    }

    #[test]
    fn plain_refused_without_tls_on_remote_host() {
        let client = SmtpClient::new(SmtpConfig {
            host: "smtp.example.com".into(),
            ..Default::default()
        });
        let err = check_plain_allowed(&client, "smtp.example.com").unwrap_err();
        assert!(err.message.contains("unencrypted"));
    }

    #[test]
    fn plain_allowed_on_localhost_without_tls() {
        let client = SmtpClient::new(SmtpConfig {
            host: "localhost".into(),
            ..Default::default()
        });
        assert!(check_plain_allowed(&client, "localhost").is_ok());
    }
}
