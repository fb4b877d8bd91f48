//! Durable agent identity.
//!
//! The collector assigns an identity at registration; the agent stores it as
//! a single token in a local file and reuses it on every start.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors reading or writing the identity file.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to read identity file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write identity file '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Identity token designating this agent to the collector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentIdentity {
    id: String,
}

impl AgentIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// File-backed identity store.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored identity.
    ///
    /// A missing or blank file means the agent is not registered yet.
    pub fn load(&self) -> Result<Option<AgentIdentity>, IdentityError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let id = content.trim();
                Ok((!id.is_empty()).then(|| AgentIdentity::new(id)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(IdentityError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Persist `identity`, creating parent directories as needed.
    pub fn save(&self, identity: &AgentIdentity) -> Result<(), IdentityError> {
        let write_err = |source| IdentityError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(&self.path, identity.id()).map_err(write_err)
    }
}
