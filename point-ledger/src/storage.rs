//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `balances` - Current balance per user (key: user_id BE)
//! - `history` - Append-only history (key: user_id BE || sequence BE)
//! - `meta` - Store bookkeeping (history sequence counter)
//!
//! History keys sort by user then sequence, so a prefix scan returns one
//! user's records in insertion order.

use crate::{
    config::StorageConfig,
    error::{Error, Result},
    store::LedgerStore,
    types::{Balance, HistoryRecord, TransactionKind, UserId},
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use std::sync::Arc;

/// Column family names
const CF_BALANCES: &str = "balances";
const CF_HISTORY: &str = "history";
const CF_META: &str = "meta";

/// Meta key holding the last assigned history sequence
const META_HISTORY_SEQ: &[u8] = b"history_seq";

/// Storage wrapper for RocksDB
pub struct RocksStore {
    db: Arc<DB>,
    /// Last assigned history sequence; the lock also orders appends
    history_seq: Mutex<u64>,
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_BALANCES, Self::cf_options_balances()),
            ColumnFamilyDescriptor::new(CF_HISTORY, Self::cf_options_history()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let history_seq = {
            let cf = db
                .cf_handle(CF_META)
                .ok_or_else(|| Error::Storage(format!("Column family {} not found", CF_META)))?;
            match db.get_cf(cf, META_HISTORY_SEQ)? {
                Some(bytes) => decode_u64(&bytes)?,
                None => 0,
            }
        };

        tracing::info!(
            path = ?path,
            history_seq,
            "Opened RocksDB point store"
        );

        Ok(Self {
            db: Arc::new(db),
            history_seq: Mutex::new(history_seq),
        })
    }

    // Column family options

    fn cf_options_balances() -> Options {
        let mut opts = Options::default();
        // Balances are read on every mutation, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_history() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn history_key(user_id: UserId, sequence: u64) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&user_id.to_key());
        key[8..].copy_from_slice(&sequence.to_be_bytes());
        key
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

impl LedgerStore for RocksStore {
    fn read(&self, user_id: UserId) -> Result<Option<Balance>> {
        let cf = self.cf_handle(CF_BALANCES)?;
        match self.db.get_cf(cf, user_id.to_key())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn write(&self, user_id: UserId, amount: u64) -> Result<Balance> {
        let cf = self.cf_handle(CF_BALANCES)?;
        let balance = Balance {
            user_id,
            amount,
            last_updated: Utc::now(),
        };
        self.db
            .put_cf(cf, user_id.to_key(), bincode::serialize(&balance)?)?;
        Ok(balance)
    }

    fn append_history(
        &self,
        user_id: UserId,
        amount: u64,
        kind: TransactionKind,
        timestamp: DateTime<Utc>,
    ) -> Result<HistoryRecord> {
        let cf_history = self.cf_handle(CF_HISTORY)?;
        let cf_meta = self.cf_handle(CF_META)?;

        let mut seq = self.history_seq.lock();
        let record = HistoryRecord {
            id: *seq + 1,
            user_id,
            amount,
            kind,
            timestamp,
        };

        // Record and counter commit together
        let mut batch = WriteBatch::default();
        batch.put_cf(
            cf_history,
            Self::history_key(user_id, record.id),
            bincode::serialize(&record)?,
        );
        batch.put_cf(cf_meta, META_HISTORY_SEQ, record.id.to_be_bytes());
        self.db.write(batch)?;
        *seq = record.id;

        tracing::debug!(
            user_id = %user_id,
            history_id = record.id,
            kind = %kind,
            "History appended"
        );

        Ok(record)
    }

    fn list_history(&self, user_id: UserId) -> Result<Vec<HistoryRecord>> {
        let cf = self.cf_handle(CF_HISTORY)?;
        let prefix = user_id.to_key();

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix[..], Direction::Forward));

        let mut records = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            records.push(bincode::deserialize(&value)?);
        }

        Ok(records)
    }
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .field("history_seq", &*self.history_seq.lock())
            .finish()
    }
}

fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Storage(format!("Corrupt sequence value ({} bytes)", bytes.len())))?;
    Ok(u64::from_be_bytes(array))
}
