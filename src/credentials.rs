//! API credentials for the live speech service
//!
//! The session controller asks a provider for a credential on every start
//! instead of reading process state itself.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// An API key. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Raw key, for building the connection request only
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Credential lookup errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("No API key found (looked in {0})")]
    Missing(String),

    #[error("Invalid API key: {0}")]
    Invalid(String),
}

/// Source of credentials for opening the live channel
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self) -> Result<Credential, CredentialError>;
}

/// Reads the key from the first non-empty environment variable
pub struct EnvCredentialProvider {
    vars: Vec<String>,
}

impl EnvCredentialProvider {
    pub fn new(vars: Vec<String>) -> Self {
        Self { vars }
    }

    fn lookup(&self, read: impl Fn(&str) -> Option<String>) -> Result<Credential, CredentialError> {
        for var in &self.vars {
            if let Some(value) = read(var) {
                let value = value.trim();
                if value.is_empty() {
                    continue;
                }
                if value.chars().any(char::is_whitespace) {
                    return Err(CredentialError::Invalid(format!("{} contains whitespace", var)));
                }
                tracing::debug!("API key read from {}", var);
                return Ok(Credential::new(value));
            }
        }
        Err(CredentialError::Missing(self.vars.join(", ")))
    }
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new(vec!["GEMINI_API_KEY".to_string(), "API_KEY".to_string()])
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn credential(&self) -> Result<Credential, CredentialError> {
        self.lookup(|var| std::env::var(var).ok())
    }
}

/// Fixed credential, e.g. entered in a settings screen
pub struct StaticCredentialProvider {
    credential: Credential,
}

impl StaticCredentialProvider {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            credential: Credential::new(key),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn credential(&self) -> Result<Credential, CredentialError> {
        if self.credential.expose().is_empty() {
            return Err(CredentialError::Missing("static configuration".to_string()));
        }
        Ok(self.credential.clone())
    }
}
