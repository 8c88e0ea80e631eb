//! In-process blob store.
//!
//! Modified times come from the injected [`Clock`]. Writes, reads, and
//! listings can be switched to fail for exercising recoverable-error paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{BlobError, BlobId, BlobMeta, BlobStore};
use crate::clock::Clock;

#[derive(Debug, Clone)]
struct Blob {
    name: String,
    bytes: Vec<u8>,
    modified_time: i64,
}

#[derive(Debug, Default)]
struct Inner {
    blobs: BTreeMap<BlobId, Blob>,
    next_id: u64,
    writes: u64,
}

pub struct MemoryBlobStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Make every subsequent create/replace/delete fail with `Unavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent find/list/read fail with `Unavailable`.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Number of successful create/replace calls so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    /// Sorted names of all stored blobs.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().blobs.values().map(|b| b.name.clone()).collect();
        names.sort();
        names
    }

    /// Contents of the blob called `name` as text.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<String> {
        self.lock()
            .blobs
            .values()
            .find(|b| b.name == name)
            .map(|b| String::from_utf8_lossy(&b.bytes).into_owned())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(flag: &AtomicBool, op: &str) -> Result<(), BlobError> {
        if flag.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable(format!("{op} failed (injected)")));
        }
        Ok(())
    }
}

impl BlobStore for MemoryBlobStore {
    fn find_by_name(&self, name: &str) -> Result<Option<BlobId>, BlobError> {
        Self::check(&self.fail_reads, "find")?;
        Ok(self
            .lock()
            .blobs
            .iter()
            .find(|(_, b)| b.name == name)
            .map(|(id, _)| id.clone()))
    }

    fn list(&self) -> Result<Vec<BlobMeta>, BlobError> {
        Self::check(&self.fail_reads, "list")?;
        Ok(self
            .lock()
            .blobs
            .iter()
            .map(|(id, b)| BlobMeta {
                id: id.clone(),
                name: b.name.clone(),
                size: b.bytes.len() as u64,
                modified_time: b.modified_time,
            })
            .collect())
    }

    fn create_or_replace(&self, name: &str, bytes: &[u8]) -> Result<BlobId, BlobError> {
        Self::check(&self.fail_writes, "write")?;
        if name.is_empty() {
            return Err(BlobError::InvalidName(name.to_string()));
        }

        let modified_time = self.clock.now_ms();
        let mut inner = self.lock();
        inner.writes += 1;
        let existing = inner
            .blobs
            .iter()
            .find(|(_, b)| b.name == name)
            .map(|(id, _)| id.clone());
        let id = existing.unwrap_or_else(|| {
            inner.next_id += 1;
            format!("blob-{:06}", inner.next_id)
        });
        inner.blobs.insert(
            id.clone(),
            Blob {
                name: name.to_string(),
                bytes: bytes.to_vec(),
                modified_time,
            },
        );
        Ok(id)
    }

    fn read(&self, id: &str) -> Result<Vec<u8>, BlobError> {
        Self::check(&self.fail_reads, "read")?;
        self.lock()
            .blobs
            .get(id)
            .map(|b| b.bytes.clone())
            .ok_or_else(|| BlobError::NotFound(id.to_string()))
    }

    fn delete(&self, id: &str) -> Result<(), BlobError> {
        Self::check(&self.fail_writes, "delete")?;
        self.lock()
            .blobs
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound(id.to_string()))
    }
}
