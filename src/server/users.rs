//! Credential store.
//!
//! Holds every account together with its password hash. Accounts are
//! created by registration and never change afterwards. The store is shared
//! between request handlers and the assignment registry, so all access goes
//! through an internal `RwLock`.
//!
//! Passwords are never kept in plaintext. Each account stores an Argon2id
//! hash in PHC string format, which carries its own random salt and cost
//! parameters.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
#[cfg(test)]
use argon2::{Algorithm, Params, Version};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use crate::models::{Role, User, UserId};

/// A stored account: public profile plus password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(flatten)]
    pub user: User,
    /// PHC string, e.g. `$argon2id$v=19$m=19456,t=2,p=1$<salt>$<hash>`
    password_hash: String,
}

impl UserRecord {
    fn new(user: User, password: &str) -> Result<Self, UserStoreError> {
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = hasher()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| UserStoreError::Hashing(e.to_string()))?
            .to_string();

        Ok(Self {
            user,
            password_hash,
        })
    }

    fn password_matches(&self, password: &str) -> bool {
        let parsed = match PasswordHash::new(&self.password_hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Corrupt password hash for user {}: {}", self.user.id, e);
                return false;
            }
        };

        hasher()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

/// Argon2id with the crate's recommended parameters. Verification reads the
/// parameters back from each stored hash, so old hashes stay valid if these
/// change.
#[cfg(not(test))]
fn hasher() -> Argon2<'static> {
    Argon2::default()
}

/// Minimum-cost parameters keep unit tests fast.
#[cfg(test)]
fn hasher() -> Argon2<'static> {
    let params = Params::new(Params::MIN_M_COST, 1, 1, None).expect("valid argon2 params");
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
}

/// Errors returned by the credential store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UserStoreError {
    #[error("Username '{0}' is already taken")]
    UsernameTaken(String),
    /// Unknown username or wrong password. The two are deliberately
    /// indistinguishable.
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Username and password must not be empty")]
    EmptyCredentials,
    #[error("Failed to hash password: {0}")]
    Hashing(String),
}

#[derive(Debug, Default)]
struct Inner {
    users: BTreeMap<UserId, UserRecord>,
    by_username: HashMap<String, UserId>,
    next_id: Option<UserId>,
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct UserStore {
    inner: RwLock<Inner>,
}

impl UserStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store from previously persisted records.
    pub fn restore(records: Vec<UserRecord>) -> Self {
        let mut inner = Inner::default();
        for record in records {
            let id = record.user.id;
            inner.by_username.insert(record.user.username.clone(), id);
            inner.users.insert(id, record);
        }
        inner.next_id = inner.users.keys().next_back().map(UserId::next);
        tracing::info!("Restored {} user(s)", inner.users.len());

        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Registers a new account.
    pub fn register(
        &self,
        username: &str,
        password: &str,
        role: Role,
    ) -> Result<User, UserStoreError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(UserStoreError::EmptyCredentials);
        }

        // Hashing is slow, so it runs before the write lock is taken.
        let mut record = UserRecord::new(
            User {
                id: UserId::FIRST,
                username: username.to_string(),
                role,
                created_at: Utc::now(),
            },
            password,
        )?;

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.by_username.contains_key(username) {
            return Err(UserStoreError::UsernameTaken(username.to_string()));
        }

        let id = inner.next_id.unwrap_or(UserId::FIRST);
        inner.next_id = Some(id.next());
        record.user.id = id;

        let user = record.user.clone();
        inner.by_username.insert(user.username.clone(), id);
        inner.users.insert(id, record);

        tracing::info!("Registered {} '{}' as user {}", role, user.username, id);
        Ok(user)
    }

    /// Checks a username/password pair.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<User, UserStoreError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let record = inner
            .by_username
            .get(username.trim())
            .and_then(|id| inner.users.get(id))
            .ok_or(UserStoreError::InvalidCredentials)?;

        if !record.password_matches(password) {
            return Err(UserStoreError::InvalidCredentials);
        }

        Ok(record.user.clone())
    }

    /// Get a user by id.
    pub fn get(&self, id: UserId) -> Option<User> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.users.get(&id).map(|record| record.user.clone())
    }

    /// Copies every record, ordered by id, for persistence.
    pub fn snapshot(&self) -> Vec<UserRecord> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.users.values().cloned().collect()
    }

    /// All accounts ordered by id.
    pub fn list(&self) -> Vec<User> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.users.values().map(|record| record.user.clone()).collect()
    }

    /// Returns the number of accounts.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .users
            .len()
    }

    /// Returns true if there are no accounts.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_register_assigns_sequential_ids() {
        let store = UserStore::new();

        let alice = store.register("alice", "pw1", Role::Publisher).unwrap();
        let bob = store.register("bob", "pw2", Role::Subscriber).unwrap();

        assert_eq!(alice.id, UserId::new(1));
        assert_eq!(bob.id, UserId::new(2));
        assert_eq!(bob.role, Role::Subscriber);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_register_duplicate_username() {
        let store = UserStore::new();
        store.register("alice", "pw", Role::Publisher).unwrap();

        let result = store.register(" alice ", "other", Role::Subscriber);

        assert_eq!(
            result.unwrap_err(),
            UserStoreError::UsernameTaken("alice".to_string())
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_register_rejects_empty_credentials() {
        let store = UserStore::new();

        assert_eq!(
            store.register("  ", "pw", Role::Publisher).unwrap_err(),
            UserStoreError::EmptyCredentials
        );
        assert_eq!(
            store.register("alice", "", Role::Publisher).unwrap_err(),
            UserStoreError::EmptyCredentials
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_authenticate() {
        let store = UserStore::new();
        let alice = store.register("alice", "s3cret", Role::Publisher).unwrap();

        let user = store.authenticate("alice", "s3cret").unwrap();
        assert_eq!(user, alice);

        assert_eq!(
            store.authenticate("alice", "wrong").unwrap_err(),
            UserStoreError::InvalidCredentials
        );
        assert_eq!(
            store.authenticate("nobody", "s3cret").unwrap_err(),
            UserStoreError::InvalidCredentials
        );
    }

    #[test]
    fn test_snapshot_does_not_contain_password() {
        let store = UserStore::new();
        store.register("alice", "hunter2", Role::Publisher).unwrap();

        let json = serde_json::to_string(&store.snapshot()).unwrap();

        assert!(!json.contains("hunter2"));
        assert!(json.contains("\"username\":\"alice\""));
    }

    #[test]
    fn test_password_stored_as_argon2_phc_string() {
        let store = UserStore::new();
        store.register("alice", "hunter2", Role::Publisher).unwrap();

        let records = store.snapshot();
        let parsed = PasswordHash::new(&records[0].password_hash).unwrap();

        assert_eq!(parsed.algorithm.as_str(), "argon2id");
        assert!(parsed.salt.is_some());
    }

    #[test]
    fn test_same_password_different_salt() {
        let store = UserStore::new();
        store.register("a", "same", Role::Subscriber).unwrap();
        store.register("b", "same", Role::Subscriber).unwrap();

        let records = store.snapshot();
        assert_ne!(records[0].password_hash, records[1].password_hash);
        assert!(store.authenticate("a", "same").is_ok());
        assert!(store.authenticate("b", "same").is_ok());
    }

    #[test]
    fn test_corrupt_hash_never_authenticates() {
        let store = UserStore::new();
        store.register("alice", "pw", Role::Publisher).unwrap();

        let mut records = store.snapshot();
        records[0].password_hash = "not-a-phc-string".to_string();
        let restored = UserStore::restore(records);

        assert_eq!(
            restored.authenticate("alice", "pw").unwrap_err(),
            UserStoreError::InvalidCredentials
        );
    }

    #[test]
    fn test_get_nonexistent_user() {
        let store = UserStore::new();
        store.register("alice", "pw", Role::Publisher).unwrap();

        assert!(store.get(UserId::new(99)).is_none());
        assert!(store.get(UserId::new(1)).is_some());
    }

    #[test]
    fn test_restore_continues_ids_and_keeps_passwords() {
        let store = UserStore::new();
        store.register("alice", "pw", Role::Publisher).unwrap();
        store.register("bob", "pw", Role::Subscriber).unwrap();

        let json = serde_json::to_string(&store.snapshot()).unwrap();
        let records: Vec<UserRecord> = serde_json::from_str(&json).unwrap();
        let restored = UserStore::restore(records);

        assert_eq!(restored.len(), 2);
        assert!(restored.authenticate("bob", "pw").is_ok());
        let carol = restored.register("carol", "pw", Role::Subscriber).unwrap();
        assert_eq!(carol.id, UserId::new(3));
    }

    #[test]
    fn test_concurrent_registration_unique_ids() {
        let store = Arc::new(UserStore::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store
                        .register(&format!("user{}", i), "pw", Role::Subscriber)
                        .unwrap()
                        .id
                })
            })
            .collect();

        let mut ids: Vec<UserId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();

        assert_eq!(ids.len(), 8);
        assert_eq!(store.len(), 8);
    }
}
