//! Configuration for StoreManager
//!
//! Provides a builder pattern for configuring where the store lives and which
//! relational engine backs it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Where the database lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Private in-memory database, gone once the store is closed
    Memory,
    /// Database file on disk
    File(PathBuf),
}

/// Derived key handed to the encrypted engine
///
/// Produced by a [`KeyProvider`]; the raw bytes never appear in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey(Vec<u8>);

impl EncryptionKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Derive a key through the security collaborator
    pub fn derive(provider: &dyn KeyProvider, passphrase: &str, salt: &str) -> Result<Self> {
        provider.derive_key(passphrase, salt)
    }

    /// Hex rendering used for the raw-key pragma
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02X}", b)).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey(<{} bytes>)", self.0.len())
    }
}

/// Security collaborator deriving a key from a passphrase and salt
pub trait KeyProvider {
    fn derive_key(&self, passphrase: &str, salt: &str) -> Result<EncryptionKey>;
}

/// Which engine implementation backs the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineKind {
    Plain,
    Encrypted(EncryptionKey),
}

/// Configuration for the document store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database location
    pub location: StoreLocation,
    /// Engine selection
    pub engine: EngineKind,
    /// Create the database file when it does not exist (default: true)
    pub create_if_missing: bool,
    /// How long the engine waits on a locked database (default: 5s)
    pub busy_timeout: Duration,
}

impl StoreConfig {
    /// Create a new configuration builder for a database file
    pub fn builder(path: impl AsRef<Path>) -> StoreConfigBuilder {
        StoreConfigBuilder::new(StoreLocation::File(path.as_ref().to_path_buf()))
    }

    /// Create a new configuration builder for an in-memory database
    pub fn in_memory() -> StoreConfigBuilder {
        StoreConfigBuilder::new(StoreLocation::Memory)
    }

    /// Database file plus the side files the engine may create next to it
    pub fn backing_files(&self) -> Vec<PathBuf> {
        match &self.location {
            StoreLocation::Memory => Vec::new(),
            StoreLocation::File(path) => {
                let mut files = vec![path.clone()];
                for suffix in ["-wal", "-shm", "-journal"] {
                    let mut name = path.as_os_str().to_owned();
                    name.push(suffix);
                    files.push(PathBuf::from(name));
                }
                files
            }
        }
    }
}

/// Builder for StoreConfig
#[derive(Debug)]
pub struct StoreConfigBuilder {
    location: StoreLocation,
    engine: EngineKind,
    create_if_missing: bool,
    busy_timeout: Duration,
}

impl StoreConfigBuilder {
    /// Create a new builder for the given location
    pub fn new(location: StoreLocation) -> Self {
        Self {
            location,
            engine: EngineKind::Plain,
            create_if_missing: true,
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Open the store with the encrypted engine using this key
    pub fn encryption_key(mut self, key: EncryptionKey) -> Self {
        self.engine = EngineKind::Encrypted(key);
        self
    }

    /// Select the engine explicitly
    pub fn engine(mut self, engine: EngineKind) -> Self {
        self.engine = engine;
        self
    }

    /// Create the database when missing (default: true)
    pub fn create_if_missing(mut self, enabled: bool) -> Self {
        self.create_if_missing = enabled;
        self
    }

    /// Set the busy timeout (default: 5 seconds)
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Build the configuration
    pub fn build(self) -> StoreConfig {
        StoreConfig {
            location: self.location,
            engine: self.engine,
            create_if_missing: self.create_if_missing,
            busy_timeout: self.busy_timeout,
        }
    }
}
