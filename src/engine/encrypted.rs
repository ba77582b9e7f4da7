//! Encrypted SQLite engine
//!
//! Same connection handling as [`SqliteEngine`], opened with the SQLCipher
//! raw-key pragma. Plain SQLite accepts and ignores that pragma, so opening
//! first asks for `cipher_version` and refuses to continue without it. A
//! wrong key only surfaces on first read, so opening then reads the schema
//! table.

use tracing::{debug, warn};

use super::{ExecOutcome, RelationalEngine, SqlRow, SqliteEngine};
use crate::config::{EncryptionKey, StoreConfig};
use crate::error::{DocumentStoreError, Result};
use crate::sql::ddl::DdlGenerator;
use crate::sql::statement::Statement;

pub struct EncryptedSqliteEngine {
    inner: SqliteEngine,
}

impl EncryptedSqliteEngine {
    pub fn open(config: &StoreConfig, key: &EncryptionKey) -> Result<Self> {
        if key.is_empty() {
            return Err(DocumentStoreError::database("encryption key is empty"));
        }

        let mut inner = SqliteEngine::open_with_key(config, Some(key))?;

        let version = inner
            .query(&Statement::new("PRAGMA cipher_version", Vec::new()))?
            .first()
            .and_then(|row| row.values().first())
            .and_then(|value| value.as_str().map(str::to_string));
        let Some(version) = version.filter(|v| !v.is_empty()) else {
            warn!(location = ?config.location, "Encryption requested but SQLite lacks SQLCipher");
            if let Err(e) = Box::new(inner).close() {
                warn!(error = %e, "Closing unencrypted connection failed");
            }
            return Err(DocumentStoreError::database(
                "engine has no SQLCipher support",
            ));
        };

        if let Err(e) = inner.query(&DdlGenerator::generate_list_tables()) {
            warn!(error = %e, "Encrypted store rejected the key");
            return Err(DocumentStoreError::database(format!(
                "unable to unlock encrypted store: {}",
                e
            )));
        }
        debug!(key = ?key, cipher_version = %version, "Encrypted store unlocked");

        Ok(Self { inner })
    }
}

impl RelationalEngine for EncryptedSqliteEngine {
    fn query(&mut self, statement: &Statement) -> Result<Vec<SqlRow>> {
        self.inner.query(statement)
    }

    fn execute(&mut self, statement: &Statement) -> Result<ExecOutcome> {
        self.inner.execute(statement)
    }

    fn begin(&mut self) -> Result<()> {
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<()> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<()> {
        self.inner.rollback()
    }

    fn savepoint(&mut self, name: &str) -> Result<()> {
        self.inner.savepoint(name)
    }

    fn release(&mut self, name: &str) -> Result<()> {
        self.inner.release(name)
    }

    fn rollback_to(&mut self, name: &str) -> Result<()> {
        self.inner.rollback_to(name)
    }

    fn close(self: Box<Self>) -> Result<()> {
        Box::new(self.inner).close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_is_rejected() {
        let config = StoreConfig::in_memory().build();
        let err = EncryptedSqliteEngine::open(&config, &EncryptionKey::from_bytes(Vec::new()))
            .err()
            .unwrap();
        assert_eq!(err.code(), "DATABASE");
    }

    #[test]
    fn test_open_requires_cipher_support() {
        let key = EncryptionKey::from_bytes(vec![0x2d; 32]);
        let config = StoreConfig::in_memory().encryption_key(key.clone()).build();

        match EncryptedSqliteEngine::open(&config, &key) {
            Ok(mut engine) => {
                let version = engine
                    .query(&Statement::new("PRAGMA cipher_version", Vec::new()))
                    .unwrap();
                assert!(version[0].values()[0].as_str().is_some());
                Box::new(engine).close().unwrap();
            }
            Err(e) => {
                assert_eq!(e.code(), "DATABASE");
                assert!(e.to_string().contains("SQLCipher"));
            }
        }
    }
}
