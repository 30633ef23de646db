//! Credential storage
//!
//! A username-to-password map shared by all sessions. Reads are
//! concurrent; administrative writes (seeding, runtime insertion by the
//! embedded mode) take the write lock.

use std::collections::HashMap;
use std::sync::RwLock;

/// Shared credential store for username/password authentication.
///
/// Lookup is exact-match on the username. Password comparison lives in
/// the auth engine so the store never hands passwords to callers beyond
/// the verification path.
#[derive(Debug, Default)]
pub struct CredentialStore {
    users: RwLock<HashMap<String, String>>,
}

impl CredentialStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `(username, password)` pairs
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let users = pairs
            .into_iter()
            .map(|(u, p)| (u.into(), p.into()))
            .collect();
        CredentialStore {
            users: RwLock::new(users),
        }
    }

    /// Insert or replace a credential pair.
    ///
    /// Safe to call while sessions are authenticating.
    pub fn insert(&self, username: impl Into<String>, password: impl Into<String>) {
        self.users
            .write()
            .expect("credential store lock poisoned")
            .insert(username.into(), password.into());
    }

    /// Look up the password for a username
    pub fn password_for(&self, username: &str) -> Option<String> {
        self.users
            .read()
            .expect("credential store lock poisoned")
            .get(username)
            .cloned()
    }

    /// Number of stored credential pairs
    pub fn len(&self) -> usize {
        self.users
            .read()
            .expect("credential store lock poisoned")
            .len()
    }

    /// Whether the store holds no credentials
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collect validation warnings for entries that can never
    /// authenticate (empty username or empty password).
    pub fn entry_warnings(&self) -> Vec<String> {
        let users = self.users.read().expect("credential store lock poisoned");
        let mut warnings = Vec::new();
        for (username, password) in users.iter() {
            if username.is_empty() {
                warnings.push("credential entry with empty username".to_string());
            }
            if password.is_empty() {
                warnings.push(format!(
                    "credential entry for {:?} has an empty password",
                    username
                ));
            }
        }
        warnings
    }
}
