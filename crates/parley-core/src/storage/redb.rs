//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. Every
//! mutation is its own committed write transaction, so all state survives
//! process restarts.

use std::{path::Path, sync::Arc};

use redb::{Database, TableDefinition};

use super::{Storage, StorageError, StorageKey};

/// Table: entries
/// Key: rendered storage key (`key_<id>`, `messages_<id>`, `chats`) as UTF-8
/// Value: raw value bytes (base64 text for keys, CBOR otherwise)
const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates the ENTRIES table if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl Storage for RedbStorage {
    fn read(&self, key: &StorageKey) -> Result<Option<Vec<u8>>, StorageError> {
        let name = key.to_string();

        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;

        let value = table.get(name.as_bytes()).map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn write(&self, key: &StorageKey, value: &[u8]) -> Result<(), StorageError> {
        let name = key.to_string();

        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let mut table =
                txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;
            table.insert(name.as_bytes(), value).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }

    fn delete(&self, key: &StorageKey) -> Result<(), StorageError> {
        let name = key.to_string();

        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let mut table =
                txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;
            table.remove(name.as_bytes()).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }
}
