//! Storage Module.
//!
//! Wallet records persisted through a key-value byte store:
//! - [`ByteStore`]: the flash/file backend contract, with an in-memory and a
//!   file-per-key implementation.
//! - [`WalletStore`]: typed record operations (add, update, lookup by name).
//! - [`record`]: the fixed record layout.
//!
//! Only share envelopes are stored on the device; the shares themselves live
//! on the cards.

pub mod raw_files;
pub mod record;

use std::collections::BTreeMap;

pub use raw_files::FileStore;
pub use record::{WalletFlags, WalletId, WalletName, WalletRecord, WalletState};

/// Errors related to storage operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("record not found")]
    NotFound,
    #[error("a wallet with this name already exists")]
    DuplicateName,
    #[error("no free wallet slot")]
    Full,
    #[error("invalid wallet name")]
    InvalidName,
    #[error("stored data is corrupt")]
    Corruption,
    #[error("invalid path or key")]
    InvalidPath,
    #[error("permission denied")]
    PermissionDenied,
    #[error("I/O error")]
    Io,
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound,
            std::io::ErrorKind::PermissionDenied => StorageError::PermissionDenied,
            _ => StorageError::Io,
        }
    }
}

/// Key-value byte store standing in for flash.
pub trait ByteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// Volatile store, for simulators and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ByteStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.entries.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.keys().cloned().collect())
    }
}

/// Slot handle for a stored record. The core keeps only this once a record
/// has been flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RecordHandle(u8);

impl RecordHandle {
    pub fn slot(&self) -> u8 {
        self.0
    }

    fn key(&self) -> String {
        format!("wallet-{}", self.0)
    }
}

/// Typed wallet record operations.
pub trait WalletStore {
    fn add_wallet_record(&mut self, record: &WalletRecord) -> Result<RecordHandle, StorageError>;
    fn update_wallet_record(&mut self, handle: RecordHandle, record: &WalletRecord) -> Result<(), StorageError>;
    fn get_wallet_record(&self, handle: RecordHandle) -> Result<WalletRecord, StorageError>;
    fn get_wallet_record_by_name(&self, name: &str) -> Result<(RecordHandle, WalletRecord), StorageError>;
    fn delete_wallet_record(&mut self, handle: RecordHandle) -> Result<(), StorageError>;
    fn list(&self) -> Result<Vec<(RecordHandle, WalletRecord)>, StorageError>;
}

/// [`WalletStore`] over any [`ByteStore`], one key per slot.
#[derive(Debug)]
pub struct RecordStore<B: ByteStore> {
    backend: B,
    max_wallets: usize,
}

impl<B: ByteStore> RecordStore<B> {
    pub fn new(backend: B, max_wallets: usize) -> Self {
        Self { backend, max_wallets }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn slots(&self) -> impl Iterator<Item = RecordHandle> {
        (0..self.max_wallets.min(u8::MAX as usize) as u8).map(RecordHandle)
    }

    fn load(&self, handle: RecordHandle) -> Result<Option<WalletRecord>, StorageError> {
        match self.backend.get(&handle.key())? {
            Some(bytes) => WalletRecord::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }
}

impl<B: ByteStore> WalletStore for RecordStore<B> {
    fn add_wallet_record(&mut self, record: &WalletRecord) -> Result<RecordHandle, StorageError> {
        let mut free = None;
        for handle in self.slots() {
            match self.load(handle)? {
                Some(existing) if existing.name == record.name => {
                    return Err(StorageError::DuplicateName)
                }
                Some(_) => {}
                None => {
                    free.get_or_insert(handle);
                }
            }
        }
        let handle = free.ok_or(StorageError::Full)?;
        self.backend.put(&handle.key(), &record.encode())?;
        log::info!("Wallet record {:?} stored in slot {}", record.id, handle.slot());
        Ok(handle)
    }

    fn update_wallet_record(&mut self, handle: RecordHandle, record: &WalletRecord) -> Result<(), StorageError> {
        let existing = self.load(handle)?.ok_or(StorageError::NotFound)?;
        if existing.id != record.id {
            return Err(StorageError::Corruption);
        }
        self.backend.put(&handle.key(), &record.encode())
    }

    fn get_wallet_record(&self, handle: RecordHandle) -> Result<WalletRecord, StorageError> {
        self.load(handle)?.ok_or(StorageError::NotFound)
    }

    fn get_wallet_record_by_name(&self, name: &str) -> Result<(RecordHandle, WalletRecord), StorageError> {
        for handle in self.slots() {
            if let Some(record) = self.load(handle)? {
                if record.name.as_str() == name {
                    return Ok((handle, record));
                }
            }
        }
        Err(StorageError::NotFound)
    }

    fn delete_wallet_record(&mut self, handle: RecordHandle) -> Result<(), StorageError> {
        if self.load(handle)?.is_none() {
            return Err(StorageError::NotFound);
        }
        self.backend.remove(&handle.key())
    }

    fn list(&self) -> Result<Vec<(RecordHandle, WalletRecord)>, StorageError> {
        let mut out = Vec::new();
        for handle in self.slots() {
            if let Some(record) = self.load(handle)? {
                out.push((handle, record));
            }
        }
        Ok(out)
    }
}
