//! Database credential resolution.
//!
//! Two sources are consulted in order, first hit wins:
//! 1. a credential file keyed by (host, port, database, user), see [`PgPassFile`];
//! 2. the secret manager, decrypting the configured encrypted password.
//!
//! A plaintext password is never read from the configuration sources.

mod pgpass;

pub use pgpass::PgPassFile;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, error, warn};

use crate::config::{ClusterConfig, EncryptionContext};

/// Plaintext database password. Redacted in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    /// Returns the plaintext. Only the session connector should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Failure reported by a [`SecretDecryptor`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptError(pub String);

impl std::fmt::Display for DecryptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for DecryptError {}

/// Error type for credential resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialError {
    /// Neither the credential file nor the secret manager produced a password.
    NoSource,
    /// The encrypted password could not be decoded or decrypted.
    Decrypt(String),
}

impl std::fmt::Display for CredentialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialError::NoSource => write!(
                f,
                "credentials: no password in credential file and no encrypted password configured"
            ),
            CredentialError::Decrypt(msg) => write!(f, "credentials: decryption failed: {}", msg),
        }
    }
}

impl std::error::Error for CredentialError {}

/// Secret-manager decryption of a ciphertext blob.
pub trait SecretDecryptor {
    /// Decrypts `ciphertext` in `region`, optionally scoped by `context`, and
    /// returns the plaintext.
    fn decrypt(
        &self,
        region: &str,
        ciphertext: &[u8],
        context: Option<&EncryptionContext>,
    ) -> Result<String, DecryptError>;
}

/// Lookup of stored passwords by connection coordinates.
pub trait PasswordFile {
    /// Returns the stored password for the coordinates, `Ok(None)` if the file
    /// has no matching entry or does not exist.
    fn lookup(
        &self,
        host: &str,
        port: u16,
        database: &str,
        user: &str,
    ) -> std::io::Result<Option<String>>;
}

/// Resolves the password used to open the cluster session.
pub struct CredentialProvider<'a> {
    password_file: Option<&'a dyn PasswordFile>,
    decryptor: &'a dyn SecretDecryptor,
}

impl<'a> CredentialProvider<'a> {
    pub fn new(decryptor: &'a dyn SecretDecryptor) -> Self {
        Self {
            password_file: None,
            decryptor,
        }
    }

    /// Consults `file` before falling back to decryption.
    pub fn with_password_file(mut self, file: &'a dyn PasswordFile) -> Self {
        self.password_file = Some(file);
        self
    }

    pub fn resolve(&self, config: &ClusterConfig) -> Result<Credential, CredentialError> {
        if let Some(file) = self.password_file {
            match file.lookup(&config.host, config.port, &config.database, &config.user) {
                Ok(Some(password)) => {
                    debug!(host = %config.host, user = %config.user, "password found in credential file");
                    return Ok(Credential::new(password));
                }
                Ok(None) => debug!("no credential file entry, trying secret manager"),
                Err(e) => warn!(error = %e, "credential file unreadable, trying secret manager"),
            }
        }

        let Some(encrypted) = config.credentials.encrypted_password.as_deref() else {
            return Err(CredentialError::NoSource);
        };

        let context = encryption_context(config);
        let result = STANDARD
            .decode(encrypted.trim())
            .map_err(|e| format!("encrypted password is not valid base64: {}", e))
            .and_then(|blob| {
                self.decryptor
                    .decrypt(&config.region, &blob, context.as_ref())
                    .map_err(|e| e.to_string())
            });

        match result {
            Ok(plaintext) => {
                debug!("password decrypted via secret manager");
                Ok(Credential::new(plaintext))
            }
            Err(msg) => {
                error!(
                    encrypted_password = %encrypted,
                    encryption_context = ?context,
                    error = %msg,
                    "secret manager access failed"
                );
                Err(CredentialError::Decrypt(msg))
            }
        }
    }
}

/// The context sent with the decrypt call: the explicit one if configured,
/// otherwise one derived from the key alias, otherwise none.
pub fn encryption_context(config: &ClusterConfig) -> Option<EncryptionContext> {
    if let Some(ctx) = &config.credentials.encryption_context {
        return Some(ctx.clone());
    }
    config.credentials.key_alias.as_ref().map(|alias| {
        EncryptionContext::from([
            ("module".to_string(), alias.clone()),
            ("region".to_string(), config.region.clone()),
        ])
    })
}
