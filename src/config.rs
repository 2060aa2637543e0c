//! Account configuration.
//!
//! The host hands over a [`ProviderSettings`] record exactly as the user
//! wrote it. Missing values are filled from `SMTP_*` environment variables,
//! then the record is validated once into an [`AccountConfig`], whose
//! authentication scheme is a closed [`AuthScheme`] variant.

use log::debug;
use secrecy::SecretString;
use serde::Deserialize;
use smtp_engine::client::validate_line;
use smtp_engine::{SmtpConfig, SmtpSecurity};

use crate::error::{ProviderError, Result};

pub const DEFAULT_PORT: u16 = 587;

pub const ENV_HOST: &str = "SMTP_HOST";
pub const ENV_USERNAME: &str = "SMTP_USERNAME";
pub const ENV_FROM: &str = "SMTP_FROM";
pub const ENV_PORT: &str = "SMTP_PORT";
pub const ENV_CRAM_MD5_SECRET: &str = "SMTP_CRAM_MD5_SECRET";
pub const ENV_PLAIN_PASSWORD: &str = "SMTP_PLAIN_PASSWORD";
pub const ENV_PLAIN_IDENTITY: &str = "SMTP_PLAIN_IDENTITY";

// ─── Raw settings ───────────────────────────────────────────────────

/// Provider block as supplied by the host, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSettings {
    /// Hostname of the SMTP server, without port.
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Login name; also the envelope sender.
    pub username: Option<String>,
    /// Default `From` header value.
    pub from: Option<String>,
    pub cram_md5_auth: Option<CramMd5Settings>,
    pub plain_auth: Option<PlainSettings>,
    pub security: Option<SmtpSecurity>,
    pub connect_timeout_secs: Option<u64>,
    pub io_timeout_secs: Option<u64>,
    pub ehlo_domain: Option<String>,
    pub verify_certificates: Option<bool>,
    pub ca_cert_path: Option<String>,
}

/// CRAM-MD5 block (RFC 2195).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CramMd5Settings {
    pub secret: Option<SecretString>,
}

/// PLAIN block (RFC 4616).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlainSettings {
    pub password: Option<SecretString>,
    /// Authorization identity; empty means "act as username".
    pub identity: Option<String>,
}

impl ProviderSettings {
    /// Fill unset values from the process environment.
    pub fn with_env_defaults(self) -> Result<Self> {
        self.with_defaults_from(|key| std::env::var(key).ok())
    }

    /// Fill unset values from `lookup`, keyed by the `SMTP_*` names.
    ///
    /// Environment values never select an authentication scheme; they only
    /// complete a block that is already present.
    pub fn with_defaults_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.host.is_none() {
            self.host = lookup(ENV_HOST);
        }
        if self.username.is_none() {
            self.username = lookup(ENV_USERNAME);
        }
        if self.from.is_none() {
            self.from = lookup(ENV_FROM);
        }
        if self.port.is_none() {
            if let Some(raw) = lookup(ENV_PORT) {
                let port = raw.trim().parse::<u16>().map_err(|e| {
                    ProviderError::config(format!("invalid {} value {:?}: {}", ENV_PORT, raw, e))
                })?;
                self.port = Some(port);
            }
        }
        if let Some(ref mut cram) = self.cram_md5_auth {
            if cram.secret.is_none() {
                cram.secret = lookup(ENV_CRAM_MD5_SECRET).map(SecretString::new);
            }
        }
        if let Some(ref mut plain) = self.plain_auth {
            if plain.password.is_none() {
                plain.password = lookup(ENV_PLAIN_PASSWORD).map(SecretString::new);
            }
            if plain.identity.is_none() {
                plain.identity = lookup(ENV_PLAIN_IDENTITY);
            }
        }
        Ok(self)
    }
}

// ─── Validated configuration ────────────────────────────────────────

/// The selected authentication scheme.
#[derive(Debug, Clone)]
pub enum AuthScheme {
    CramMd5 { secret: SecretString },
    Plain { password: SecretString, identity: String },
}

/// Validated, immutable account configuration.
#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Default sender; empty when unset.
    pub from: String,
    pub auth: AuthScheme,
    pub security: SmtpSecurity,
    pub connect_timeout_secs: u64,
    pub io_timeout_secs: u64,
    pub ehlo_domain: String,
    pub verify_certificates: bool,
    pub ca_cert_path: Option<String>,
}

impl AccountConfig {
    /// Connection settings for the SMTP engine.
    pub fn smtp_config(&self) -> SmtpConfig {
        SmtpConfig {
            host: self.host.clone(),
            port: self.port,
            security: self.security,
            connect_timeout_secs: self.connect_timeout_secs,
            io_timeout_secs: self.io_timeout_secs,
            ehlo_domain: self.ehlo_domain.clone(),
            verify_certificates: self.verify_certificates,
            ca_cert_path: self.ca_cert_path.clone(),
        }
    }

    /// `host:port` of the configured server.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl TryFrom<ProviderSettings> for AccountConfig {
    type Error = ProviderError;

    fn try_from(settings: ProviderSettings) -> Result<Self> {
        let host = required(settings.host, "host")?;
        let username = required(settings.username, "username")?;
        single_line(&username, "username")?;

        let auth = match (settings.cram_md5_auth, settings.plain_auth) {
            (None, None) => {
                return Err(ProviderError::config("no authentication method specified"));
            }
            (Some(_), Some(_)) => {
                return Err(ProviderError::config(
                    "only one of cram_md5_auth or plain_auth may be specified",
                ));
            }
            (Some(cram), None) => AuthScheme::CramMd5 {
                secret: cram
                    .secret
                    .ok_or_else(|| ProviderError::config("cram_md5_auth.secret is required"))?,
            },
            (None, Some(plain)) => AuthScheme::Plain {
                password: plain
                    .password
                    .ok_or_else(|| ProviderError::config("plain_auth.password is required"))?,
                identity: plain.identity.unwrap_or_default(),
            },
        };

        let defaults = SmtpConfig::default();
        let config = AccountConfig {
            host,
            port: settings.port.unwrap_or(DEFAULT_PORT),
            username,
            from: settings.from.unwrap_or_default(),
            auth,
            security: settings.security.unwrap_or(defaults.security),
            connect_timeout_secs: settings
                .connect_timeout_secs
                .unwrap_or(defaults.connect_timeout_secs),
            io_timeout_secs: settings.io_timeout_secs.unwrap_or(defaults.io_timeout_secs),
            ehlo_domain: settings.ehlo_domain.unwrap_or(defaults.ehlo_domain),
            verify_certificates: settings
                .verify_certificates
                .unwrap_or(defaults.verify_certificates),
            ca_cert_path: settings.ca_cert_path,
        };
        single_line(&config.ehlo_domain, "ehlo_domain")?;
        debug!(
            "Account configured for {} as {}",
            config.address(),
            config.username
        );
        Ok(config)
    }
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ProviderError::config(format!("{} is required", field))),
    }
}

/// Values that end up on an SMTP command line.
fn single_line(value: &str, field: &str) -> Result<()> {
    validate_line(value)
        .map_err(|_| ProviderError::config(format!("{} must not contain a line break", field)))
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn plain_settings() -> ProviderSettings {
        ProviderSettings {
            host: Some("localhost".into()),
            username: Some("test".into()),
            plain_auth: Some(PlainSettings {
                password: Some(SecretString::new("test".into())),
                identity: None,
            }),
            ..Default::default()
        }
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_applied() {
        let config = AccountConfig::try_from(plain_settings()).unwrap();
        assert_eq!(config.port, 587);
        assert_eq!(config.from, "");
        assert_eq!(config.security, SmtpSecurity::StartTls);
        assert_eq!(config.address(), "localhost:587");
        match config.auth {
            AuthScheme::Plain { identity, password } => {
                assert_eq!(identity, "");
                assert_eq!(password.expose_secret(), "test");
            }
            other => panic!("unexpected scheme {:?}", other),
        }
    }

    #[test]
    fn no_scheme_is_rejected() {
        let mut settings = plain_settings();
        settings.plain_auth = None;
        let err = AccountConfig::try_from(settings).unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: no authentication method specified"
        );
    }

    #[test]
    fn both_schemes_are_rejected() {
        let mut settings = plain_settings();
        settings.cram_md5_auth = Some(CramMd5Settings {
            secret: Some(SecretString::new("s".into())),
        });
        assert!(matches!(
            AccountConfig::try_from(settings),
            Err(ProviderError::Configuration(_))
        ));
    }

    #[test]
    fn host_and_username_required() {
        let mut settings = plain_settings();
        settings.host = None;
        assert!(AccountConfig::try_from(settings)
            .unwrap_err()
            .to_string()
            .contains("host is required"));

        let mut settings = plain_settings();
        settings.username = Some(String::new());
        assert!(AccountConfig::try_from(settings)
            .unwrap_err()
            .to_string()
            .contains("username is required"));
    }

    #[test]
    fn line_breaks_in_command_values_rejected() {
        let mut settings = plain_settings();
        settings.username = Some("test\r\nRCPT TO:<evil@attacker.com>".into());
        let err = AccountConfig::try_from(settings).unwrap_err();
        assert!(err.to_string().contains("username must not contain a line break"));

        let mut settings = plain_settings();
        settings.ehlo_domain = Some("client\nQUIT".into());
        let err = AccountConfig::try_from(settings).unwrap_err();
        assert!(err.to_string().contains("ehlo_domain"));
    }

    #[test]
    fn env_fills_missing_values_only() {
        let settings = ProviderSettings {
            host: Some("explicit.example.com".into()),
            plain_auth: Some(PlainSettings::default()),
            ..Default::default()
        }
        .with_defaults_from(env(&[
            (ENV_HOST, "env.example.com"),
            (ENV_USERNAME, "envuser"),
            (ENV_PORT, "2525"),
            (ENV_PLAIN_PASSWORD, "envpass"),
            (ENV_PLAIN_IDENTITY, "admin"),
        ]))
        .unwrap();

        let config = AccountConfig::try_from(settings).unwrap();
        assert_eq!(config.host, "explicit.example.com");
        assert_eq!(config.username, "envuser");
        assert_eq!(config.port, 2525);
        match config.auth {
            AuthScheme::Plain { identity, password } => {
                assert_eq!(identity, "admin");
                assert_eq!(password.expose_secret(), "envpass");
            }
            other => panic!("unexpected scheme {:?}", other),
        }
    }

    #[test]
    fn env_never_selects_a_scheme() {
        let settings = ProviderSettings {
            host: Some("localhost".into()),
            username: Some("test".into()),
            ..Default::default()
        }
        .with_defaults_from(env(&[(ENV_CRAM_MD5_SECRET, "s"), (ENV_PLAIN_PASSWORD, "p")]))
        .unwrap();
        assert!(settings.cram_md5_auth.is_none());
        assert!(settings.plain_auth.is_none());
    }

    #[test]
    fn env_completes_cram_block() {
        let settings = ProviderSettings {
            host: Some("localhost".into()),
            username: Some("test".into()),
            cram_md5_auth: Some(CramMd5Settings::default()),
            ..Default::default()
        }
        .with_defaults_from(env(&[(ENV_CRAM_MD5_SECRET, "shh")]))
        .unwrap();
        let config = AccountConfig::try_from(settings).unwrap();
        assert!(matches!(config.auth, AuthScheme::CramMd5 { .. }));
    }

    #[test]
    fn missing_cram_secret_is_rejected() {
        let settings = ProviderSettings {
            host: Some("localhost".into()),
            username: Some("test".into()),
            cram_md5_auth: Some(CramMd5Settings::default()),
            ..Default::default()
        };
        let err = AccountConfig::try_from(settings).unwrap_err();
        assert!(err.to_string().contains("cram_md5_auth.secret"));
    }

    #[test]
    fn invalid_env_port() {
        let err = ProviderSettings::default()
            .with_defaults_from(env(&[(ENV_PORT, "smtp")]))
            .unwrap_err();
        assert!(err.to_string().contains("SMTP_PORT"));
    }

    #[test]
    fn settings_from_json_record() {
        let settings: ProviderSettings = serde_json::from_str(
            r#"{
                "host": "mail.example.com",
                "port": 465,
                "username": "robot",
                "from": "Robot <robot@example.com>",
                "security": "implicit_tls",
                "cram_md5_auth": { "secret": "k" }
            }"#,
        )
        .unwrap();
        let config = AccountConfig::try_from(settings).unwrap();
        assert_eq!(config.port, 465);
        assert_eq!(config.security, SmtpSecurity::ImplicitTls);
        assert_eq!(config.from, "Robot <robot@example.com>");
        assert_eq!(config.smtp_config().address(), "mail.example.com:465");
    }

    #[test]
    fn debug_output_hides_secrets() {
        let shown = format!("{:?}", AccountConfig::try_from(plain_settings()).unwrap());
        assert!(!shown.contains("password: \"test\""));
        assert!(shown.contains("REDACTED"));
    }
}
