use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use super::model::SecretRecord;

const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("secret id already exists")]
    DuplicateId,
    #[error("storage backend: {0:#}")]
    Backend(#[from] anyhow::Error),
}

macro_rules! backend_error {
    ($($ty:ty),* $(,)?) => {$(
        impl From<$ty> for StoreError {
            fn from(e: $ty) -> Self {
                Self::Backend(anyhow::Error::new(e))
            }
        }
    )*};
}

backend_error!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

/// Outcome of a consume attempt.
#[derive(Debug, PartialEq)]
pub enum ConsumeResult {
    /// The caller won the read. The record still carries ciphertext and nonce;
    /// the stored row has already been flipped to `accessed`.
    Consumed(SecretRecord),
    /// No row with that id (never existed, or already reaped).
    NotFound,
    /// Someone read it first.
    AlreadyConsumed,
    /// Past `expires_at` and not yet reaped.
    Expired,
}

/// Thread-safe handle to the redb store.
///
/// redb admits one write transaction at a time, so every read-modify-write
/// below is serializable across all tasks sharing this handle.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create data dir: {}", parent.display()))?;
        }
        let db = Database::create(path).context("open redb database")?;

        let write_txn = db.begin_write()?;
        write_txn.open_table(SECRETS)?;
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Insert a new secret. Never overwrites: an existing id is `DuplicateId`.
    pub fn insert(&self, record: &SecretRecord) -> Result<(), StoreError> {
        let bytes = encode(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SECRETS)?;
            if table.get(record.id.as_str())?.is_some() {
                return Err(StoreError::DuplicateId);
            }
            table.insert(record.id.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;

        debug!(id = %record.id, expires_at = record.expires_at, "stored secret");
        Ok(())
    }

    /// Read a record without changing it.
    pub fn fetch_by_id(&self, id: &str) -> Result<Option<SecretRecord>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SECRETS)?;
        let raw: Option<Vec<u8>> = table.get(id)?.map(|guard| guard.value().to_vec());
        match raw {
            None => Ok(None),
            Some(bytes) => Ok(Some(decode(&bytes)?)),
        }
    }

    /// Atomically check readability and flip `accessed`.
    ///
    /// Expiry is checked before the accessed flag, so a secret that was read
    /// and has since expired reports `Expired`.
    ///
    /// The check and the flip happen inside one write transaction, so of any
    /// number of concurrent callers for the same id at most one gets
    /// `Consumed`. The stored row keeps only metadata afterwards.
    pub fn try_consume(&self, id: &str, now: i64) -> Result<ConsumeResult, StoreError> {
        let write_txn = self.db.begin_write()?;
        let result = {
            let mut table = write_txn.open_table(SECRETS)?;

            // Copy the bytes out so the guard's borrow of `table` ends before mutation.
            let raw: Option<Vec<u8>> = table.get(id)?.map(|guard| guard.value().to_vec());

            match raw {
                None => ConsumeResult::NotFound,
                Some(bytes) => {
                    let mut record = decode(&bytes)?;
                    if record.is_expired(now) {
                        ConsumeResult::Expired
                    } else if record.accessed {
                        ConsumeResult::AlreadyConsumed
                    } else {
                        record.accessed = true;
                        record.accessed_at = Some(now);

                        let mut stored = record.clone();
                        stored.ciphertext.zeroize();
                        stored.nonce.zeroize();
                        let updated = encode(&stored)?;
                        table.insert(id, updated.as_slice())?;

                        ConsumeResult::Consumed(record)
                    }
                }
            }
        };
        write_txn.commit()?;
        Ok(result)
    }

    /// Remove every secret with `expires_at < now`, plus any row that no longer
    /// decodes. Returns how many went.
    pub fn delete_expired(&self, now: i64) -> Result<u64, StoreError> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(SECRETS)?;

            let mut expired = Vec::new();
            for item in table.iter()? {
                let (k, v) = item?;
                match decode(v.value()) {
                    Ok(record) if record.expires_at < now => expired.push(k.value().to_owned()),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(id = %k.value(), error = %e, "removing undecodable record");
                        expired.push(k.value().to_owned());
                    }
                }
            }

            for id in &expired {
                table.remove(id.as_str())?;
            }
            expired.len() as u64
        };
        write_txn.commit()?;

        if removed > 0 {
            info!(removed, "deleted expired secrets");
        }
        Ok(removed)
    }

    /// Count unread, unexpired secrets. Advisory only.
    pub fn count_active(&self, now: i64) -> Result<u64, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SECRETS)?;

        let mut active = 0u64;
        for item in table.iter()? {
            let (_k, v) = item?;
            if decode(v.value()).is_ok_and(|record| record.is_active(now)) {
                active += 1;
            }
        }
        Ok(active)
    }

    /// Administrative delete. Returns true if the secret existed.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(SECRETS)?;
            let removed = table.remove(id)?.is_some();
            removed
        };
        write_txn.commit()?;

        if existed {
            info!(id = %id, "secret deleted by administrator");
        }
        Ok(existed)
    }
}

#[cfg(test)]
impl Store {
    /// Occupy the single writer slot until the returned transaction is dropped.
    pub(crate) fn hold_writer(&self) -> Result<redb::WriteTransaction, StoreError> {
        Ok(self.db.begin_write()?)
    }
}

fn encode(record: &SecretRecord) -> anyhow::Result<Vec<u8>> {
    bincode::serde::encode_to_vec(record, bincode::config::standard()).context("bincode encode")
}

fn decode(bytes: &[u8]) -> anyhow::Result<SecretRecord> {
    let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .context("bincode decode")?;
    Ok(record)
}
