//! Anonymous client identity.
//!
//! A single opaque token, created once and replayed in every hello so the
//! matchmaking service can restore queue or match context after a transient
//! disconnect. The core depends only on the [`IdentityStore`] capability,
//! never on a particular storage mechanism.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use crate::{env::Environment, error::IdentityError};

/// Longest token accepted from storage.
pub const MAX_IDENTITY_LEN: usize = 128;

/// Opaque client identifier. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Validate a stored token.
    ///
    /// # Errors
    ///
    /// - `IdentityError::Corrupt` if the token is empty, too long, or contains
    ///   whitespace or control characters
    pub fn parse(token: &str) -> Result<Self, IdentityError> {
        if token.is_empty() {
            return Err(IdentityError::Corrupt("empty token".to_string()));
        }
        if token.len() > MAX_IDENTITY_LEN {
            return Err(IdentityError::Corrupt(format!("token is {} bytes", token.len())));
        }
        if token.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(IdentityError::Corrupt("token contains whitespace".to_string()));
        }
        Ok(Self(token.to_string()))
    }

    /// Fresh random identifier (32 hex digits).
    pub fn generate<E: Environment>(env: &E) -> Self {
        Self(format!("{:032x}", env.random_u128()))
    }

    /// Token as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key-value capability that persists the one client identifier.
pub trait IdentityStore: Send + Sync {
    /// Previously stored identity, if any.
    fn load(&self) -> Result<Option<ClientIdentity>, IdentityError>;

    /// Persist the identity.
    fn store(&self, identity: &ClientIdentity) -> Result<(), IdentityError>;
}

/// Load the persisted identity, creating and storing one on first use.
///
/// An existing identity is never rewritten.
///
/// # Errors
///
/// Propagates storage failures and corrupt tokens.
pub fn load_or_create<S, E>(store: &S, env: &E) -> Result<ClientIdentity, IdentityError>
where
    S: IdentityStore + ?Sized,
    E: Environment,
{
    if let Some(identity) = store.load()? {
        tracing::debug!(%identity, "loaded client identity");
        return Ok(identity);
    }

    let identity = ClientIdentity::generate(env);
    store.store(&identity)?;
    tracing::info!(%identity, "created client identity");
    Ok(identity)
}

/// In-memory identity store for tests and simulation.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    slot: Mutex<Option<ClientIdentity>>,
}

impl MemoryIdentityStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with an identity.
    #[must_use]
    pub fn with_identity(identity: ClientIdentity) -> Self {
        Self { slot: Mutex::new(Some(identity)) }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Result<Option<ClientIdentity>, IdentityError> {
        Ok(self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn store(&self, identity: &ClientIdentity) -> Result<(), IdentityError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(identity.clone());
        Ok(())
    }
}

/// Identity persisted as a single UTF-8 file.
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    /// Store backed by `path`. The file is created on first `store`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self) -> Result<Option<ClientIdentity>, IdentityError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => ClientIdentity::parse(contents.trim()).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, identity: &ClientIdentity) -> Result<(), IdentityError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, identity.as_str())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::testing::TestEnv;

    fn scratch_path(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir()
            .join(format!("tandem-identity-{}-{nanos}", std::process::id()))
            .join(name)
    }

    #[test]
    fn generated_identity_is_hex() {
        let env = TestEnv::new();
        let identity = ClientIdentity::generate(&env);
        assert_eq!(identity.as_str().len(), 32);
        assert!(identity.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn load_or_create_is_stable() {
        let env = TestEnv::new();
        let store = MemoryIdentityStore::new();

        let first = load_or_create(&store, &env).unwrap();
        let second = load_or_create(&store, &env).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn existing_identity_is_not_replaced() {
        let env = TestEnv::new();
        let seeded = ClientIdentity::parse("abc123").unwrap();
        let store = MemoryIdentityStore::with_identity(seeded.clone());

        assert_eq!(load_or_create(&store, &env).unwrap(), seeded);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(ClientIdentity::parse(""), Err(IdentityError::Corrupt(_))));
        assert!(matches!(ClientIdentity::parse("a b"), Err(IdentityError::Corrupt(_))));
        let long = "a".repeat(MAX_IDENTITY_LEN + 1);
        assert!(matches!(ClientIdentity::parse(&long), Err(IdentityError::Corrupt(_))));
    }

    #[test]
    fn file_store_survives_reopen() {
        let env = TestEnv::new();
        let path = scratch_path("identity");

        let created = load_or_create(&FileIdentityStore::new(&path), &env).unwrap();
        let reopened = FileIdentityStore::new(&path).load().unwrap();
        assert_eq!(reopened, Some(created));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn file_store_missing_file_is_none() {
        let store = FileIdentityStore::new(scratch_path("absent"));
        assert!(store.load().unwrap().is_none());
    }
}
