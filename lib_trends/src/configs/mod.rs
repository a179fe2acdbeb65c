//! # Configuration Modules
//!
//! Startup-time configuration that lives outside the command line: API
//! tokens and mail credentials, optionally stored AES-256-CBC encrypted.

#![forbid(unsafe_code)]

/// Loading, decrypting and validating the secrets file.
pub mod config_secrets;

pub use config_secrets::{load_secrets, load_secrets_with, MailSecrets, SecretLoadError, Secrets};
