//! Error handling, configuration and reply types for the SMTP engine.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─── Error ──────────────────────────────────────────────────────────

/// Kinds of SMTP errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SmtpErrorKind {
    /// Server returned an error reply (4xx / 5xx).
    ServerReply,
    /// Authentication failed or was refused locally.
    AuthFailure,
    /// TLS negotiation failed.
    TlsError,
    /// Connection refused or timed out.
    ConnectionError,
    /// I/O error during socket read/write.
    IoError,
    /// The message does not fit what the server accepts.
    MessageError,
}

impl fmt::Display for SmtpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Top-level error type for the SMTP engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpError {
    pub kind: SmtpErrorKind,
    pub message: String,
    /// The SMTP reply code (e.g. 550) if available.
    pub code: Option<u16>,
    /// The enhanced status code (e.g. "5.1.1") if available.
    pub enhanced_code: Option<String>,
}

impl SmtpError {
    pub fn new(kind: SmtpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
            enhanced_code: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_enhanced(mut self, ec: impl Into<String>) -> Self {
        self.enhanced_code = Some(ec.into());
        self
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ConnectionError, msg)
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::AuthFailure, msg)
    }

    pub fn tls(msg: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::TlsError, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::IoError, msg)
    }

    pub fn message(msg: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::MessageError, msg)
    }

    /// Error built from a negative server reply, keeping its codes.
    pub fn from_reply(reply: &SmtpReply, context: &str) -> Self {
        let err = Self::new(
            SmtpErrorKind::ServerReply,
            format!("{}: {}", context, reply.text()),
        )
        .with_code(reply.code);
        match reply.enhanced_code {
            Some(ref ec) => err.with_enhanced(ec.clone()),
            None => err,
        }
    }
}

impl fmt::Display for SmtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "[SMTP {}] {}: {}", code, self.kind, self.message)
        } else {
            write!(f, "[SMTP] {}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for SmtpError {}

pub type SmtpResult<T> = Result<T, SmtpError>;

// ─── Enums ──────────────────────────────────────────────────────────

/// SMTP security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SmtpSecurity {
    /// Never upgrade; the whole session is plain text.
    #[serde(rename = "none")]
    None,
    /// Upgrade with STARTTLS whenever the server advertises it.
    #[default]
    #[serde(rename = "starttls")]
    StartTls,
    /// Implicit TLS (SMTPS), usually on port 465.
    #[serde(rename = "implicit_tls")]
    ImplicitTls,
}

/// Supported authentication mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmtpAuthMethod {
    Plain,
    CramMd5,
}

impl fmt::Display for SmtpAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => write!(f, "PLAIN"),
            Self::CramMd5 => write!(f, "CRAM-MD5"),
        }
    }
}

// ─── Configuration ──────────────────────────────────────────────────

/// Connection settings for one SMTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Hostname or IP of the SMTP server.
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Read/write timeout in seconds.
    pub io_timeout_secs: u64,
    /// Domain to use in EHLO/HELO command.
    pub ehlo_domain: String,
    /// Whether to verify the server's TLS certificate.
    pub verify_certificates: bool,
    /// Optional path to an extra CA certificate PEM file.
    pub ca_cert_path: Option<String>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            security: SmtpSecurity::StartTls,
            connect_timeout_secs: 30,
            io_timeout_secs: 60,
            ehlo_domain: "localhost".into(),
            verify_certificates: true,
            ca_cert_path: None,
        }
    }
}

impl SmtpConfig {
    /// `host:port` as used for the TCP connection.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ─── SMTP Reply ─────────────────────────────────────────────────────

/// A parsed SMTP reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpReply {
    /// The 3-digit reply code.
    pub code: u16,
    /// Enhanced status code (e.g. "2.1.0").
    pub enhanced_code: Option<String>,
    /// Reply text lines.
    pub lines: Vec<String>,
}

impl SmtpReply {
    /// Whether this is a positive completion (2xx).
    pub fn is_positive(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Whether this is a positive intermediate (3xx).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// The full reply text.
    pub fn text(&self) -> String {
        self.lines.join("\r\n")
    }

    /// Parse an SMTP reply from raw lines.
    pub fn parse(raw: &str) -> SmtpResult<Self> {
        let mut code: Option<u16> = None;
        let mut lines = Vec::new();
        let mut enhanced = None;

        for line in raw.lines() {
            if line.len() < 3 {
                continue;
            }
            let c: u16 = line
                .get(..3)
                .and_then(|digits| digits.parse().ok())
                .ok_or_else(|| SmtpError::io(format!("Invalid reply code in: {}", line)))?;
            if code.is_none() {
                code = Some(c);
            }
            let text = line.get(4..).unwrap_or("");
            if enhanced.is_none() {
                enhanced = parse_enhanced_code(text);
            }
            lines.push(text.to_string());
        }

        match code {
            Some(c) => Ok(SmtpReply {
                code: c,
                enhanced_code: enhanced,
                lines,
            }),
            None => Err(SmtpError::io("Empty SMTP reply")),
        }
    }
}

/// Extract an RFC 3463 status code (`d.d.d`) from the start of a reply text.
fn parse_enhanced_code(text: &str) -> Option<String> {
    let candidate = text.split(' ').next()?;
    let segments: Vec<&str> = candidate.split('.').collect();
    let well_formed = segments.len() == 3
        && segments
            .iter()
            .all(|s| !s.is_empty() && s.chars().all(|ch| ch.is_ascii_digit()));
    well_formed.then(|| candidate.to_string())
}

impl fmt::Display for SmtpReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text())
    }
}

// ─── EHLO Capabilities ─────────────────────────────────────────────

/// Parsed EHLO capability set.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EhloCapabilities {
    /// The server greeting name.
    pub server_name: String,
    /// Maximum message size (SIZE extension, 0 = no limit).
    pub max_size: Option<u64>,
    /// Whether the AUTH extension was advertised at all.
    pub auth: bool,
    /// Supported auth mechanisms.
    pub auth_mechanisms: Vec<String>,
    pub starttls: bool,
}

impl EhloCapabilities {
    /// Parse EHLO response lines into capabilities.
    pub fn parse(reply: &SmtpReply) -> Self {
        let mut caps = Self::default();
        for (i, line) in reply.lines.iter().enumerate() {
            if i == 0 {
                caps.server_name = line.clone();
                continue;
            }
            let upper = line.to_uppercase();
            let (keyword, param) = upper.split_once(' ').unwrap_or((upper.as_str(), ""));

            match keyword {
                "SIZE" => caps.max_size = param.trim().parse().ok(),
                "AUTH" => {
                    caps.auth = true;
                    caps.auth_mechanisms =
                        param.split_whitespace().map(|s| s.to_string()).collect();
                }
                "STARTTLS" => caps.starttls = true,
                _ => {}
            }
        }
        caps
    }

    /// Check if a specific auth mechanism is supported.
    pub fn supports_auth(&self, method: &str) -> bool {
        let upper = method.to_uppercase();
        self.auth_mechanisms.iter().any(|m| m == &upper)
    }

    /// Whether a message of `len` bytes fits the advertised SIZE limit.
    pub fn accepts_size(&self, len: usize) -> bool {
        match self.max_size {
            Some(0) | None => true,
            Some(max) => (len as u64) <= max,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_without_code() {
        let e = SmtpError::new(SmtpErrorKind::ConnectionError, "timeout");
        assert_eq!(e.to_string(), "[SMTP] ConnectionError: timeout");
    }

    #[test]
    fn error_from_reply_keeps_codes() {
        let reply = SmtpReply::parse("550 5.1.1 no such user\r\n").unwrap();
        let e = SmtpError::from_reply(&reply, "RCPT TO rejected");
        assert_eq!(e.code, Some(550));
        assert_eq!(e.enhanced_code.as_deref(), Some("5.1.1"));
        assert_eq!(
            e.to_string(),
            "[SMTP 550] ServerReply: RCPT TO rejected: 5.1.1 no such user"
        );
    }

    #[test]
    fn reply_single_line() {
        let reply = SmtpReply::parse("250 OK\r\n").unwrap();
        assert_eq!(reply.code, 250);
        assert!(reply.is_positive());
        assert_eq!(reply.text(), "OK");
    }

    #[test]
    fn reply_multiline() {
        let raw = "250-mail.example.com\r\n250-SIZE 1000\r\n250 AUTH PLAIN CRAM-MD5\r\n";
        let reply = SmtpReply::parse(raw).unwrap();
        assert_eq!(reply.lines.len(), 3);
        assert_eq!(reply.lines[0], "mail.example.com");
    }

    #[test]
    fn reply_intermediate_and_error() {
        assert!(SmtpReply::parse("354 go ahead\r\n").unwrap().is_intermediate());
        let closing = SmtpReply::parse("421 closing\r\n").unwrap();
        assert!(!closing.is_positive());
        assert!(!closing.is_intermediate());
    }

    #[test]
    fn reply_rejects_garbage() {
        assert!(SmtpReply::parse("hello there\r\n").is_err());
        assert!(SmtpReply::parse("").is_err());
    }

    #[test]
    fn enhanced_code_only_when_well_formed() {
        assert_eq!(parse_enhanced_code("2.1.0 Sender OK"), Some("2.1.0".into()));
        assert_eq!(parse_enhanced_code("1.2 nope"), None);
        assert_eq!(parse_enhanced_code("Ok"), None);
    }

    #[test]
    fn ehlo_capabilities_parse() {
        let raw = "250-mx.example.com greets you\r\n250-SIZE 35882577\r\n250-STARTTLS\r\n250-AUTH PLAIN cram-md5\r\n250 8BITMIME\r\n";
        let caps = EhloCapabilities::parse(&SmtpReply::parse(raw).unwrap());
        assert_eq!(caps.server_name, "mx.example.com greets you");
        assert_eq!(caps.max_size, Some(35882577));
        assert!(caps.starttls);
        assert!(caps.auth);
        assert!(caps.supports_auth("plain"));
        assert!(caps.supports_auth("CRAM-MD5"));
        assert!(!caps.supports_auth("LOGIN"));
    }

    #[test]
    fn size_limit() {
        let mut caps = EhloCapabilities::default();
        assert!(caps.accepts_size(10_000_000));
        caps.max_size = Some(100);
        assert!(caps.accepts_size(100));
        assert!(!caps.accepts_size(101));
        caps.max_size = Some(0);
        assert!(caps.accepts_size(101));
    }

    #[test]
    fn security_serde_names() {
        let parsed: Vec<SmtpSecurity> =
            serde_json::from_str(r#"["none", "starttls", "implicit_tls"]"#).unwrap();
        assert_eq!(
            parsed,
            vec![SmtpSecurity::None, SmtpSecurity::StartTls, SmtpSecurity::ImplicitTls]
        );
    }

    #[test]
    fn config_defaults() {
        let cfg = SmtpConfig::default();
        assert_eq!(cfg.port, 587);
        assert_eq!(cfg.security, SmtpSecurity::StartTls);
        assert_eq!(cfg.ehlo_domain, "localhost");
        assert!(cfg.verify_certificates);
    }
}
