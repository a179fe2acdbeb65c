//! # Secrets Module
//!
//! Loads the service credentials once at startup. The secrets file is JSON:
//!
//! ```json
//! { "githubToken": "...", "mailApiUrl": "...", "mailApiKey": "...", "mailFrom": "..." }
//! ```
//!
//! It may instead be stored encrypted as two base64 lines (IV, then
//! AES-256-CBC ciphertext with PKCS7 padding), decrypted with the hex key in
//! `TRENDS_SECRETS_KEY`. Non-empty `GITHUB_TOKEN`, `MAIL_API_URL`,
//! `MAIL_API_KEY` and `MAIL_FROM` environment variables override file values.
//!
//! Every failure here is fatal to the caller: the server refuses to start on
//! a secrets file it cannot use.

use std::fmt;
use std::path::{Path, PathBuf};

use aes::Aes256;
use base64::{engine::general_purpose, Engine as _};
use cbc::Decryptor;
use cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

/// Used when neither an explicit path nor `TRENDS_SECRETS_PATH` is given, and
/// only if the file exists.
pub const DEFAULT_SECRETS_PATH: &str = "secrets.json";

pub const ENV_SECRETS_PATH: &str = "TRENDS_SECRETS_PATH";
pub const ENV_SECRETS_KEY: &str = "TRENDS_SECRETS_KEY";

#[derive(Debug, Error)]
pub enum SecretLoadError {
    #[error("secrets file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read secrets file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed secrets: {0}")]
    Parse(String),

    #[error("failed to decrypt secrets: {0}")]
    Decrypt(String),

    #[error("missing secret: {0}")]
    MissingSecret(String),
}

/// Credentials for the HTTP mail API. Either all three are present or mail
/// is not configured at all.
#[derive(Clone, PartialEq, Eq)]
pub struct MailSecrets {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secrets {
    pub github_token: Option<String>,
    pub mail: Option<MailSecrets>,
}

// Secret values never reach the logs.
impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .field("mail", &self.mail)
            .finish()
    }
}

impl fmt::Debug for MailSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailSecrets")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("from", &self.from)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SecretsFile {
    github_token: Option<String>,
    mail_api_url: Option<String>,
    mail_api_key: Option<String>,
    mail_from: Option<String>,
}

/// Loads secrets using the process environment.
pub fn load_secrets(path: Option<&Path>) -> Result<Secrets, SecretLoadError> {
    load_secrets_with(path, |name| std::env::var(name).ok())
}

/// # Load Secrets
///
/// Same as [`load_secrets`] with environment lookups routed through `env`.
///
/// ## Logic:
/// 1.  Resolves the file: `path`, else `TRENDS_SECRETS_PATH`, else
///     `secrets.json` if it exists. An explicit path that does not exist is
///     an error; no file at all means "no secrets".
/// 2.  Decrypts the content when it is not plain JSON.
/// 3.  Applies environment overrides and validates the mail triple.
pub fn load_secrets_with<F>(path: Option<&Path>, env: F) -> Result<Secrets, SecretLoadError>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |name: &str| env(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let explicit = path
        .map(Path::to_path_buf)
        .or_else(|| lookup(ENV_SECRETS_PATH).map(PathBuf::from));

    let file = match explicit {
        Some(path) if !path.exists() => return Err(SecretLoadError::NotFound(path)),
        Some(path) => Some(path),
        None => Some(PathBuf::from(DEFAULT_SECRETS_PATH)).filter(|p| p.exists()),
    };

    let mut parsed = match &file {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|source| SecretLoadError::Io {
                path: path.clone(),
                source,
            })?;
            parse_secrets(&content, lookup(ENV_SECRETS_KEY).as_deref())?
        }
        None => SecretsFile::default(),
    };

    override_with(&mut parsed.github_token, lookup("GITHUB_TOKEN"));
    override_with(&mut parsed.mail_api_url, lookup("MAIL_API_URL"));
    override_with(&mut parsed.mail_api_key, lookup("MAIL_API_KEY"));
    override_with(&mut parsed.mail_from, lookup("MAIL_FROM"));

    let secrets = Secrets {
        github_token: non_blank(parsed.github_token),
        mail: mail_secrets(parsed.mail_api_url, parsed.mail_api_key, parsed.mail_from)?,
    };

    info!(
        component = "secrets",
        file = ?file,
        github_token = secrets.github_token.is_some(),
        mail = secrets.mail.is_some(),
        "secrets loaded"
    );
    Ok(secrets)
}

fn override_with(slot: &mut Option<String>, value: Option<String>) {
    if value.is_some() {
        *slot = value;
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn mail_secrets(
    api_url: Option<String>,
    api_key: Option<String>,
    from: Option<String>,
) -> Result<Option<MailSecrets>, SecretLoadError> {
    match (non_blank(api_url), non_blank(api_key), non_blank(from)) {
        (None, None, None) => Ok(None),
        (Some(api_url), Some(api_key), Some(from)) => Ok(Some(MailSecrets { api_url, api_key, from })),
        (api_url, api_key, _) => {
            let missing = if api_url.is_none() {
                "mailApiUrl"
            } else if api_key.is_none() {
                "mailApiKey"
            } else {
                "mailFrom"
            };
            Err(SecretLoadError::MissingSecret(missing.to_string()))
        }
    }
}

/// Plain JSON is used as is; anything else must be the encrypted format.
fn parse_secrets(content: &str, key: Option<&str>) -> Result<SecretsFile, SecretLoadError> {
    let trimmed = content.trim();
    let plain = if trimmed.starts_with('{') {
        trimmed.as_bytes().to_vec()
    } else {
        let key = key.ok_or_else(|| SecretLoadError::MissingSecret(ENV_SECRETS_KEY.to_string()))?;
        decrypt_payload(trimmed, key)?
    };
    serde_json::from_slice(&plain).map_err(|e| SecretLoadError::Parse(e.to_string()))
}

/// Decrypts the two-line `base64(IV)` / `base64(ciphertext)` format.
fn decrypt_payload(content: &str, hex_key: &str) -> Result<Vec<u8>, SecretLoadError> {
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.len() != 2 {
        return Err(SecretLoadError::Parse(format!(
            "expected 2 lines (IV and ciphertext), found {}",
            lines.len()
        )));
    }

    let iv = general_purpose::STANDARD
        .decode(lines[0])
        .map_err(|e| SecretLoadError::Parse(format!("invalid base64 IV: {e}")))?;
    let mut buf = general_purpose::STANDARD
        .decode(lines[1])
        .map_err(|e| SecretLoadError::Parse(format!("invalid base64 ciphertext: {e}")))?;
    if buf.is_empty() {
        return Err(SecretLoadError::Decrypt("ciphertext is empty".to_string()));
    }

    let key: [u8; 32] = hex::decode(hex_key.trim())
        .map_err(|e| SecretLoadError::Decrypt(format!("invalid key hex: {e}")))?
        .try_into()
        .map_err(|k: Vec<u8>| SecretLoadError::Decrypt(format!("key must be 32 bytes, found {}", k.len())))?;
    let iv: [u8; 16] = iv
        .as_slice()
        .try_into()
        .map_err(|_| SecretLoadError::Parse(format!("invalid IV length: {}", iv.len())))?;

    let plain = Decryptor::<Aes256>::new(&key.into(), &iv.into())
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| SecretLoadError::Decrypt("bad padding, verify the decryption key".to_string()))?;
    Ok(plain.to_vec())
}
