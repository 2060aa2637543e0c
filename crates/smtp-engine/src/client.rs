//! Low-level SMTP protocol engine.
//!
//! Handles the TCP connection, STARTTLS upgrade, EHLO/HELO negotiation,
//! command/response exchange and the DATA transfer.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::types::*;

// ─── Stream Abstraction ─────────────────────────────────────────────

/// Plain-text or TLS socket, so the rest of the engine is generic.
enum SmtpStream {
    Plain(BufReader<TcpStream>),
    Tls(Box<BufReader<TlsStream<TcpStream>>>),
}

impl SmtpStream {
    async fn read_line(&mut self, buf: &mut String) -> std::io::Result<usize> {
        match self {
            Self::Plain(r) => r.read_line(buf).await,
            Self::Tls(r) => r.read_line(buf).await,
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Plain(r) => r.get_mut().write_all(data).await,
            Self::Tls(r) => r.get_mut().write_all(data).await,
        }
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(r) => r.get_mut().flush().await,
            Self::Tls(r) => r.get_mut().flush().await,
        }
    }
}

// ─── SmtpClient ─────────────────────────────────────────────────────

/// One SMTP session. Not reused across messages.
pub struct SmtpClient {
    stream: Option<SmtpStream>,
    config: SmtpConfig,
    capabilities: Option<EhloCapabilities>,
    tls_active: bool,
    authenticated: bool,
    /// Set after a read or write timeout; the stream is no longer usable.
    stalled: bool,
}

impl SmtpClient {
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            stream: None,
            config,
            capabilities: None,
            tls_active: false,
            authenticated: false,
            stalled: false,
        }
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Option<&EhloCapabilities> {
        self.capabilities.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_tls_active(&self) -> bool {
        self.tls_active
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Mark as authenticated (called by the auth module).
    pub fn set_authenticated(&mut self, auth: bool) {
        self.authenticated = auth;
    }

    // ── Connection ──────────────────────────────────────────────

    /// Connect to the SMTP server and read the greeting.
    pub async fn connect(&mut self) -> SmtpResult<SmtpReply> {
        let addr = self.config.address();
        debug!("Connecting to SMTP server {}", addr);

        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let tcp = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| SmtpError::connection(format!("Connection timed out: {}", addr)))?
            .map_err(|e| SmtpError::connection(format!("Connection to {} failed: {}", addr, e)))?;

        if self.config.security == SmtpSecurity::ImplicitTls {
            let tls_stream = self.upgrade_to_tls_raw(tcp).await?;
            self.stream = Some(SmtpStream::Tls(Box::new(BufReader::new(tls_stream))));
            self.tls_active = true;
        } else {
            self.stream = Some(SmtpStream::Plain(BufReader::new(tcp)));
        }

        let greeting = self.read_reply().await?;
        if !greeting.is_positive() {
            self.stream = None;
            return Err(SmtpError::from_reply(&greeting, "Server rejected connection"));
        }
        info!("SMTP connected to {} – {}", addr, greeting.text());
        Ok(greeting)
    }

    /// Perform EHLO (falling back to HELO) and parse capabilities.
    pub async fn ehlo(&mut self) -> SmtpResult<EhloCapabilities> {
        let domain = self.config.ehlo_domain.clone();
        let reply = self.command(&format!("EHLO {}", domain)).await?;
        if reply.is_positive() {
            let caps = EhloCapabilities::parse(&reply);
            self.capabilities = Some(caps.clone());
            return Ok(caps);
        }

        debug!("EHLO rejected, trying HELO");
        let reply = self.command(&format!("HELO {}", domain)).await?;
        if reply.is_positive() {
            let caps = EhloCapabilities {
                server_name: reply.lines.first().cloned().unwrap_or_default(),
                ..Default::default()
            };
            self.capabilities = Some(caps.clone());
            Ok(caps)
        } else {
            Err(SmtpError::from_reply(&reply, "HELO rejected"))
        }
    }

    /// Upgrade the current plain-text connection to TLS via STARTTLS.
    pub async fn starttls(&mut self) -> SmtpResult<()> {
        if self.tls_active {
            return Ok(());
        }
        let reply = self.command("STARTTLS").await?;
        if !reply.is_positive() {
            return Err(SmtpError::tls(format!("STARTTLS rejected: {}", reply.text()))
                .with_code(reply.code));
        }

        let stream = self.stream.take().ok_or_else(|| SmtpError::io("Not connected"))?;
        let tcp = match stream {
            SmtpStream::Plain(r) => r.into_inner(),
            SmtpStream::Tls(_) => return Err(SmtpError::tls("Already using TLS")),
        };

        let tls_stream = self.upgrade_to_tls_raw(tcp).await?;
        self.stream = Some(SmtpStream::Tls(Box::new(BufReader::new(tls_stream))));
        self.tls_active = true;
        info!("STARTTLS upgrade successful");

        // Capabilities must be re-learned over the secure channel (RFC 3207 §4.2).
        self.ehlo().await?;
        Ok(())
    }

    /// Close the connection via QUIT. Errors on the way out are ignored.
    /// A stalled stream is dropped without QUIT.
    pub async fn quit(&mut self) {
        if self.stream.is_some() {
            if self.stalled {
                debug!("Dropping stalled SMTP connection without QUIT");
            } else {
                let _ = self.command("QUIT").await;
            }
            self.stream = None;
        }
        self.stalled = false;
        self.tls_active = false;
        self.authenticated = false;
        self.capabilities = None;
        debug!("SMTP connection closed");
    }

    // ── Mail Transaction ────────────────────────────────────────

    /// Issue MAIL FROM.
    pub async fn mail_from(&mut self, sender: &str) -> SmtpResult<SmtpReply> {
        validate_line(sender)?;
        let reply = self.command(&format!("MAIL FROM:<{}>", sender)).await?;
        if !reply.is_positive() {
            return Err(SmtpError::from_reply(&reply, "MAIL FROM rejected"));
        }
        Ok(reply)
    }

    /// Issue RCPT TO.
    pub async fn rcpt_to(&mut self, recipient: &str) -> SmtpResult<SmtpReply> {
        validate_line(recipient)?;
        let reply = self.command(&format!("RCPT TO:<{}>", recipient)).await?;
        if !reply.is_positive() {
            return Err(SmtpError::from_reply(
                &reply,
                &format!("RCPT TO rejected for {}", recipient),
            ));
        }
        Ok(reply)
    }

    /// Issue DATA and transfer an already dot-stuffed, terminated document
    /// (see [`crate::data::DotStuffer`]). Returns the final reply.
    pub async fn data(&mut self, framed: &[u8]) -> SmtpResult<SmtpReply> {
        let reply = self.command("DATA").await?;
        if !reply.is_intermediate() {
            return Err(SmtpError::from_reply(&reply, "DATA rejected"));
        }

        self.write_raw(framed).await?;
        self.flush().await?;
        debug!("C: <{} bytes of message data>", framed.len());

        let reply = self.read_reply().await?;
        if !reply.is_positive() {
            return Err(SmtpError::from_reply(&reply, "Message data rejected"));
        }
        Ok(reply)
    }

    // ── Low-level I/O ───────────────────────────────────────────

    /// Send a command and read the reply.
    pub async fn command(&mut self, cmd: &str) -> SmtpResult<SmtpReply> {
        debug!("C: {}", cmd);
        self.send_line(cmd).await
    }

    /// Like [`command`](Self::command) but logs `shown` instead of the
    /// real line, for anything that carries credentials.
    pub async fn command_sensitive(&mut self, cmd: &str, shown: &str) -> SmtpResult<SmtpReply> {
        debug!("C: {}", shown);
        self.send_line(cmd).await
    }

    async fn send_line(&mut self, cmd: &str) -> SmtpResult<SmtpReply> {
        self.write_raw(format!("{}\r\n", cmd).as_bytes()).await?;
        self.flush().await?;
        self.read_reply().await
    }

    /// Read a complete SMTP reply (may be multi-line).
    pub async fn read_reply(&mut self) -> SmtpResult<SmtpReply> {
        let timeout = Duration::from_secs(self.config.io_timeout_secs);
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| SmtpError::io("Not connected"))?;

        let mut full_response = String::new();
        loop {
            let mut line = String::new();
            let n = match tokio::time::timeout(timeout, stream.read_line(&mut line)).await {
                Ok(read) => read.map_err(|e| SmtpError::io(format!("Read error: {}", e)))?,
                Err(_) => {
                    self.stalled = true;
                    return Err(SmtpError::io("Read timeout"));
                }
            };

            if n == 0 {
                return Err(SmtpError::io("Connection closed by server"));
            }
            full_response.push_str(&line);
            debug!("S: {}", line.trim_end());

            // Final line: code followed by a space (or nothing), not a dash.
            if line.as_bytes().get(3) != Some(&b'-') {
                break;
            }
        }

        SmtpReply::parse(&full_response)
    }

    /// Write raw bytes to the stream.
    pub async fn write_raw(&mut self, data: &[u8]) -> SmtpResult<()> {
        let timeout = Duration::from_secs(self.config.io_timeout_secs);
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| SmtpError::io("Not connected"))?;
        match tokio::time::timeout(timeout, stream.write_all(data)).await {
            Ok(written) => written.map_err(|e| SmtpError::io(format!("Write error: {}", e))),
            Err(_) => {
                self.stalled = true;
                Err(SmtpError::io("Write timeout"))
            }
        }
    }

    async fn flush(&mut self) -> SmtpResult<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| SmtpError::io("Not connected"))?;
        stream
            .flush()
            .await
            .map_err(|e| SmtpError::io(format!("Flush error: {}", e)))
    }

    // ── TLS helper ──────────────────────────────────────────────

    async fn upgrade_to_tls_raw(&self, tcp: TcpStream) -> SmtpResult<TlsStream<TcpStream>> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        if let Some(ref ca_path) = self.config.ca_cert_path {
            let pem_data = tokio::fs::read(ca_path)
                .await
                .map_err(|e| SmtpError::tls(format!("Failed to read CA cert {}: {}", ca_path, e)))?;
            let mut cursor = Cursor::new(pem_data);
            for cert in rustls_pemfile::certs(&mut cursor) {
                let cert = cert
                    .map_err(|e| SmtpError::tls(format!("Invalid CA cert {}: {}", ca_path, e)))?;
                root_store
                    .add(cert)
                    .map_err(|e| SmtpError::tls(format!("Failed to add CA cert: {}", e)))?;
            }
        }

        let mut tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        if !self.config.verify_certificates {
            warn!("TLS certificate verification disabled for {}", self.config.host);
            tls_config
                .dangerous()
                .set_certificate_verifier(Arc::new(NoCertVerifier));
        }

        let connector = TlsConnector::from(Arc::new(tls_config));
        let server_name = rustls::pki_types::ServerName::try_from(self.config.host.clone())
            .map_err(|e| SmtpError::tls(format!("Invalid server name: {}", e)))?;

        connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| SmtpError::tls(format!("TLS handshake failed: {}", e)))
    }
}

/// Reject an envelope address or command argument that would end the
/// command line early (RFC 5321 §2.3.8).
pub fn validate_line(value: &str) -> SmtpResult<()> {
    if value.contains(['\r', '\n']) {
        return Err(SmtpError::message(format!(
            "line break not allowed in {:?}",
            value
        )));
    }
    Ok(())
}

// ─── NoCertVerifier (for self-signed relays) ────────────────────────

#[derive(Debug)]
struct NoCertVerifier;

impl rustls::client::danger::ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
