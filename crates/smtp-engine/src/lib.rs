//! **smtp-engine**: the SMTP client engine behind the message provider.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Error type, configuration, reply and EHLO capability parsing |
//! | [`client`] | Session engine (connect, EHLO/HELO, STARTTLS/SMTPS, MAIL/RCPT/DATA) |
//! | [`auth`] | Authentication strategies (PLAIN, CRAM-MD5) |
//! | [`data`] | DATA-phase dot-stuffing writer |

pub mod auth;
pub mod client;
pub mod data;
pub mod types;

pub use auth::{authenticate, SmtpAuth};
pub use client::SmtpClient;
pub use data::DotStuffer;
pub use types::*;
