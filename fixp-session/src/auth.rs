/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Credential checks for server sessions.

use bytes::Bytes;
use fixp_core::types::TerminationCode;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Result of an authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Credentials accepted.
    Accepted,
    /// Credentials rejected with the code sent back in Terminate.
    Rejected(TerminationCode),
}

/// Checks the credentials presented in Negotiate.
pub trait Authenticator: Send + Sync {
    /// Authenticates `credentials`.
    fn authenticate(&self, credentials: &[u8]) -> AuthOutcome;
}

impl<F> Authenticator for F
where
    F: Fn(&[u8]) -> AuthOutcome + Send + Sync,
{
    fn authenticate(&self, credentials: &[u8]) -> AuthOutcome {
        self(credentials)
    }
}

/// In-memory set of accepted credentials.
#[derive(Default)]
pub struct SimpleDirectory {
    entries: RwLock<HashSet<Bytes>>,
}

impl SimpleDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds accepted credentials. Returns false if already present.
    pub fn add(&self, credentials: impl Into<Bytes>) -> bool {
        self.entries.write().insert(credentials.into())
    }

    /// Removes credentials. Returns false if they were not present.
    pub fn remove(&self, credentials: &[u8]) -> bool {
        self.entries.write().remove(credentials)
    }

    /// Returns true if `credentials` are accepted.
    #[must_use]
    pub fn contains(&self, credentials: &[u8]) -> bool {
        self.entries.read().contains(credentials)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl fmt::Debug for SimpleDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleDirectory")
            .field("entries", &self.len())
            .finish()
    }
}

/// Authenticator backed by a [`SimpleDirectory`].
#[derive(Debug, Clone)]
pub struct DirectoryAuthenticator {
    directory: Arc<SimpleDirectory>,
}

impl DirectoryAuthenticator {
    /// Creates an authenticator over a shared directory.
    #[must_use]
    pub const fn new(directory: Arc<SimpleDirectory>) -> Self {
        Self { directory }
    }

    /// Returns the directory.
    #[must_use]
    pub fn directory(&self) -> &Arc<SimpleDirectory> {
        &self.directory
    }
}

impl Authenticator for DirectoryAuthenticator {
    fn authenticate(&self, credentials: &[u8]) -> AuthOutcome {
        if self.directory.contains(credentials) {
            AuthOutcome::Accepted
        } else {
            AuthOutcome::Rejected(TerminationCode::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_authenticator() {
        let directory = Arc::new(SimpleDirectory::new());
        assert!(directory.add(&b"User1"[..]));
        assert!(!directory.add(&b"User1"[..]));
        let auth = DirectoryAuthenticator::new(Arc::clone(&directory));

        assert_eq!(auth.authenticate(b"User1"), AuthOutcome::Accepted);
        assert_eq!(
            auth.authenticate(b"Eve"),
            AuthOutcome::Rejected(TerminationCode::Unauthorized)
        );

        assert!(directory.remove(b"User1"));
        assert!(directory.is_empty());
        assert_ne!(auth.authenticate(b"User1"), AuthOutcome::Accepted);
    }

    #[test]
    fn test_closure_authenticator() {
        let auth = |credentials: &[u8]| {
            if credentials.is_empty() {
                AuthOutcome::Rejected(TerminationCode::Unauthorized)
            } else {
                AuthOutcome::Accepted
            }
        };
        assert_eq!(auth.authenticate(b""), AuthOutcome::Rejected(TerminationCode::Unauthorized));
    }
}
