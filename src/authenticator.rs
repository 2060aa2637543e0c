//! Session authenticator.
//!
//! Turns the validated [`AuthScheme`] of an account into the engine's
//! [`SmtpAuth`] strategy, once per account.

use log::debug;
use secrecy::ExposeSecret;
use smtp_engine::SmtpAuth;

use crate::config::{AccountConfig, AuthScheme};
use crate::error::{ProviderError, Result};

/// Build the authentication strategy for `config`.
///
/// PLAIN credentials are bound to the configured host so they are never
/// offered to any other server.
pub fn build(config: &AccountConfig) -> Result<SmtpAuth> {
    let auth = match &config.auth {
        AuthScheme::CramMd5 { secret } => {
            if secret.expose_secret().is_empty() {
                return Err(ProviderError::config("cram_md5_auth.secret must not be empty"));
            }
            SmtpAuth::cram_md5(config.username.clone(), secret.clone())
        }
        AuthScheme::Plain { password, identity } => {
            if password.expose_secret().is_empty() {
                return Err(ProviderError::config("plain_auth.password must not be empty"));
            }
            SmtpAuth::plain(
                identity.clone(),
                config.username.clone(),
                password.clone(),
                config.host.clone(),
            )
        }
    };
    debug!("Using {} authentication for {}", auth.method(), config.username);
    Ok(auth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CramMd5Settings, PlainSettings, ProviderSettings};
    use secrecy::SecretString;
    use smtp_engine::SmtpAuthMethod;

    fn account(cram: Option<&str>, plain: Option<(&str, &str)>) -> AccountConfig {
        AccountConfig::try_from(ProviderSettings {
            host: Some("mail.example.com".into()),
            username: Some("robot".into()),
            cram_md5_auth: cram.map(|s| CramMd5Settings {
                secret: Some(SecretString::new(s.into())),
            }),
            plain_auth: plain.map(|(p, i)| PlainSettings {
                password: Some(SecretString::new(p.into())),
                identity: Some(i.into()),
            }),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn cram_md5_strategy() {
        let auth = build(&account(Some("k"), None)).unwrap();
        assert_eq!(auth.method(), SmtpAuthMethod::CramMd5);
        assert_eq!(auth.username(), "robot");
    }

    #[test]
    fn plain_strategy_is_bound_to_host() {
        match build(&account(None, Some(("pw", "admin")))).unwrap() {
            SmtpAuth::Plain {
                identity,
                username,
                host,
                ..
            } => {
                assert_eq!(identity, "admin");
                assert_eq!(username, "robot");
                assert_eq!(host, "mail.example.com");
            }
            other => panic!("unexpected strategy {:?}", other),
        }
    }

    #[test]
    fn empty_secrets_rejected() {
        assert!(matches!(
            build(&account(Some(""), None)),
            Err(ProviderError::Configuration(_))
        ));
        let err = build(&account(None, Some(("", "")))).unwrap_err();
        assert!(err.to_string().contains("password must not be empty"));
    }
}
