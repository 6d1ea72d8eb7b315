//! Secret retrieval.
//!
//! The core only needs `get_secret(identifier) -> plaintext`. Where the
//! plaintext comes from is decided once at startup by picking a provider.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("access denied to secret: {0}")]
    AccessDenied(String),

    #[error("failed to read secret {id}: {message}")]
    Io { id: String, message: String },
}

pub trait SecretProvider: Send + Sync {
    /// Returns the plaintext of the secret named `id`.
    fn get_secret(&self, id: &str) -> Result<String, SecretError>;
}

/// Reads each secret from a file named after its identifier.
#[derive(Debug, Clone)]
pub struct FileSecretProvider {
    root: PathBuf,
}

impl FileSecretProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, id: &str) -> Result<PathBuf, SecretError> {
        let relative = Path::new(id);
        let plain = !id.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
            && relative.components().count() == 1;

        if !plain {
            return Err(SecretError::AccessDenied(id.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl SecretProvider for FileSecretProvider {
    fn get_secret(&self, id: &str) -> Result<String, SecretError> {
        let path = self.resolve(id)?;
        std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SecretError::NotFound(id.to_string()),
            ErrorKind::PermissionDenied => SecretError::AccessDenied(id.to_string()),
            _ => SecretError::Io {
                id: id.to_string(),
                message: e.to_string(),
            },
        })
    }
}

/// Reads each secret from the environment variable named after it.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretProvider;

impl SecretProvider for EnvSecretProvider {
    fn get_secret(&self, id: &str) -> Result<String, SecretError> {
        match std::env::var(id) {
            Ok(value) => Ok(value),
            Err(std::env::VarError::NotPresent) => Err(SecretError::NotFound(id.to_string())),
            Err(e) => Err(SecretError::Io {
                id: id.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// Fixed map of secrets, for tests and embedding callers.
#[derive(Debug, Clone, Default)]
pub struct InMemorySecretProvider {
    secrets: HashMap<String, String>,
}

impl InMemorySecretProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, id: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(id.into(), value.into());
        self
    }
}

impl SecretProvider for InMemorySecretProvider {
    fn get_secret(&self, id: &str) -> Result<String, SecretError> {
        self.secrets
            .get(id)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(id.to_string()))
    }
}
