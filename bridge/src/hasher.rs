//! Password hashing for the salted login challenge

use log::debug;
use shared::phpass::{self, HashError};
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HasherError {
    #[error(transparent)]
    Salt(#[from] HashError),

    #[error("could not run hasher {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("hasher exited with {status}: {output}")]
    Failed { status: String, output: String },
}

/// Turns a password and a server salt into the string sent back as password.
///
/// Implementations must be deterministic for a given input.
pub trait PasswordHasher {
    fn hash(&self, password: &str, salt: &str) -> Result<String, HasherError>;
}

/// In-process implementation of the server's phpass scheme
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeHasher;

impl PasswordHasher for NativeHasher {
    fn hash(&self, password: &str, salt: &str) -> Result<String, HasherError> {
        Ok(phpass::lobby_password_hash(password, salt)?)
    }
}

/// Runs a helper binary as `<binary> <password> <salt>` and reads the hash
/// from its stdout
#[derive(Debug, Clone)]
pub struct ExternalHasher {
    binary: PathBuf,
}

impl ExternalHasher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl PasswordHasher for ExternalHasher {
    fn hash(&self, password: &str, salt: &str) -> Result<String, HasherError> {
        debug!("Running external hasher {}", self.binary.display());
        let output = Command::new(&self.binary)
            .arg(password)
            .arg(salt)
            .output()
            .map_err(|source| HasherError::Spawn {
                path: self.binary.display().to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() || stdout.is_empty() {
            return Err(HasherError::Failed {
                status: output.status.to_string(),
                output: stdout,
            });
        }
        Ok(stdout)
    }
}

/// Hasher chosen at runtime from configuration
#[derive(Debug, Clone)]
pub enum ConfiguredHasher {
    Native(NativeHasher),
    External(ExternalHasher),
}

impl PasswordHasher for ConfiguredHasher {
    fn hash(&self, password: &str, salt: &str) -> Result<String, HasherError> {
        match self {
            ConfiguredHasher::Native(h) => h.hash(password, salt),
            ConfiguredHasher::External(h) => h.hash(password, salt),
        }
    }
}
