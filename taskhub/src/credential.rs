//! Bearer credential and the durable slot it is kept in.
//!
//! A session has at most one active [`Credential`]. It survives restarts
//! through a [`CredentialStore`]; logout is the only path that clears it.

use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

/// Fixed name of the slot holding the credential.
pub const CREDENTIAL_KEY: &str = "token";

/// Errors from creating or persisting a credential.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// The token was empty or whitespace.
    #[error("credential token is blank")]
    Blank,

    /// Reading or writing the credential file failed.
    #[error("credential file {path}: {source}")]
    Io {
        /// File that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Opaque bearer token issued by the identity provider.
///
/// The `Debug` output is redacted so the token never lands in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps a token, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Blank`] if nothing is left after trimming.
    pub fn new(token: impl AsRef<str>) -> Result<Self, CredentialError> {
        let token = token.as_ref().trim();
        if token.is_empty() {
            return Err(CredentialError::Blank);
        }
        Ok(Self(token.to_string()))
    }

    /// Returns the raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Formats the `Authorization` header value.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// A durable key-value slot for the session credential.
pub trait CredentialStore: Send + Sync {
    /// Returns the stored credential, or `None` if the slot is empty.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Io`] if the slot exists but cannot be read.
    fn load(&self) -> Result<Option<Credential>, CredentialError>;

    /// Replaces the stored credential.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Io`] if the slot cannot be written.
    fn store(&self, credential: &Credential) -> Result<(), CredentialError>;

    /// Empties the slot. Clearing an empty slot succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Io`] if the slot cannot be removed.
    fn clear(&self) -> Result<(), CredentialError>;
}

impl<T: CredentialStore> CredentialStore for std::sync::Arc<T> {
    fn load(&self) -> Result<Option<Credential>, CredentialError> {
        T::load(self)
    }

    fn store(&self, credential: &Credential) -> Result<(), CredentialError> {
        T::store(self, credential)
    }

    fn clear(&self) -> Result<(), CredentialError> {
        T::clear(self)
    }
}

/// Stores the credential as a file named [`CREDENTIAL_KEY`] in a directory.
///
/// On Unix the file is created with owner-only permissions.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Creates a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join(CREDENTIAL_KEY),
        }
    }

    /// Path of the credential file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> CredentialError {
        CredentialError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Credential>, CredentialError> {
        match std::fs::read_to_string(&self.path) {
            // A blank file is treated as an empty slot.
            Ok(contents) => Ok(Credential::new(contents).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn store(&self, credential: &Credential) -> Result<(), CredentialError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;
        }
        write_private(&self.path, credential.expose()).map_err(|e| self.io_error(e))?;
        tracing::debug!(path = %self.path.display(), "credential persisted");
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "credential cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation; tighten a pre-existing file too.
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(contents.as_bytes())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

/// Process-local store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<Credential>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `credential`.
    #[must_use]
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Credential>, CredentialError> {
        Ok(self.slot.lock().clone())
    }

    fn store(&self, credential: &Credential) -> Result<(), CredentialError> {
        *self.slot.lock() = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        *self.slot.lock() = None;
        Ok(())
    }
}
