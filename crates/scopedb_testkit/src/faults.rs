//! Fault injection for storage.
//!
//! [`FailingBackend`] wraps a real backend and fails writes on demand. The
//! backend itself moves into the database, so it is driven through a
//! [`FaultSwitch`] handle the test keeps.
//!
//! ```rust,ignore
//! let (backend, faults) = FailingBackend::wrap(InMemoryBackend::new());
//! let env = TestEnv::with_backend(Box::new(backend));
//! faults.fail_appends(true);
//! assert!(service.create_user("Ada", "ada@example.com").is_err());
//! ```

use scopedb_store::{StorageBackend, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Faults {
    fail_appends: AtomicBool,
    fail_syncs: AtomicBool,
    partial_write: AtomicUsize,
    injected: AtomicUsize,
}

/// Shared control over a [`FailingBackend`].
#[derive(Debug, Clone)]
pub struct FaultSwitch {
    faults: Arc<Faults>,
}

impl FaultSwitch {
    /// Makes every following append fail.
    pub fn fail_appends(&self, fail: bool) {
        self.faults.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Makes every following sync fail. The appended bytes stay written.
    pub fn fail_syncs(&self, fail: bool) {
        self.faults.fail_syncs.store(fail, Ordering::SeqCst);
    }

    /// When appends fail, writes the first `bytes` of the data before
    /// failing, like a crash mid-write.
    pub fn partial_write(&self, bytes: usize) {
        self.faults.partial_write.store(bytes, Ordering::SeqCst);
    }

    /// Clears every fault.
    pub fn reset(&self) {
        self.faults.fail_appends.store(false, Ordering::SeqCst);
        self.faults.fail_syncs.store(false, Ordering::SeqCst);
        self.faults.partial_write.store(0, Ordering::SeqCst);
    }

    /// Returns how many operations have been failed so far.
    pub fn injected(&self) -> usize {
        self.faults.injected.load(Ordering::SeqCst)
    }
}

/// A storage backend that fails writes when told to.
pub struct FailingBackend {
    inner: Box<dyn StorageBackend>,
    faults: Arc<Faults>,
}

impl FailingBackend {
    /// Wraps `inner` and returns the backend with its switch.
    pub fn wrap(inner: impl StorageBackend + 'static) -> (Self, FaultSwitch) {
        let faults = Arc::new(Faults {
            fail_appends: AtomicBool::new(false),
            fail_syncs: AtomicBool::new(false),
            partial_write: AtomicUsize::new(0),
            injected: AtomicUsize::new(0),
        });
        let backend = Self {
            inner: Box::new(inner),
            faults: Arc::clone(&faults),
        };
        (backend, FaultSwitch { faults })
    }

    fn inject(&self, what: &str) -> StorageError {
        self.faults.injected.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(operation = what, "injecting storage fault");
        StorageError::Io(io::Error::other(format!("injected {what} failure")))
    }
}

impl StorageBackend for FailingBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.faults.fail_appends.load(Ordering::SeqCst) {
            let partial = self.faults.partial_write.load(Ordering::SeqCst).min(data.len());
            if partial > 0 {
                self.inner.append(&data[..partial])?;
            }
            return Err(self.inject("append"));
        }
        self.inner.append(data)
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.faults.fail_syncs.load(Ordering::SeqCst) {
            return Err(self.inject("sync"));
        }
        self.inner.sync()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}
