//! Directory-backed versioned store
//!
//! Each key lives in its own file named by the xxh3 hash of the key. The
//! file holds a bincode envelope with the key, its version, an optional
//! expiry and a SHA-256 checksum of the value.
//!
//! Writers serialize per key with an exclusive `flock` on a sibling lock
//! file, so separate processes sharing the directory see a consistent
//! compare-and-swap. Values are replaced by writing a temp file and renaming
//! it over the old one; readers never take the lock.

use crate::error::{AllocatorError, Result};
use crate::store::{Version, Versioned, VersionedStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};
use xxhash_rust::xxh3::xxh3_64;

const RECORD_EXT: &str = "rec";
const LOCK_EXT: &str = "lock";
const TEMP_EXT: &str = "tmp";

/// On-disk envelope for one key
#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    key: String,
    version: u64,
    /// Unix seconds after which the entry is treated as absent
    expires_at: Option<u64>,
    checksum: [u8; 32],
    data: Vec<u8>,
}

impl FileEntry {
    fn is_live(&self, now: u64) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// Versioned store keeping one file per key under a directory
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    /// Serializes writers within this process; `flock` covers other processes
    writers: Mutex<()>,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "opened file store");
        Ok(FileStore {
            root,
            writers: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str, ext: &str) -> PathBuf {
        self.root
            .join(format!("{:016x}", xxh3_64(key.as_bytes())))
            .with_extension(ext)
    }

    fn read_entry(&self, key: &str) -> Result<Option<FileEntry>> {
        let bytes = match fs::read(self.path_for(key, RECORD_EXT)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry: FileEntry =
            bincode::deserialize(&bytes).map_err(|e| AllocatorError::CorruptRecord {
                key: key.to_string(),
                reason: format!("unreadable envelope: {}", e),
            })?;

        if entry.key != key {
            // Two keys hashed to the same file name
            return Err(AllocatorError::CorruptRecord {
                key: key.to_string(),
                reason: format!("file holds key {}", entry.key),
            });
        }

        if checksum(&entry.data) != entry.checksum {
            return Err(AllocatorError::CorruptRecord {
                key: key.to_string(),
                reason: "checksum mismatch".to_string(),
            });
        }

        Ok(Some(entry))
    }

    fn write_entry(&self, entry: &FileEntry) -> Result<()> {
        let path = self.path_for(&entry.key, RECORD_EXT);
        let temp = self.path_for(&entry.key, TEMP_EXT);

        let bytes = bincode::serialize(entry)?;
        {
            let mut file = File::create(&temp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &path)?;
        File::open(&self.root)?.sync_all()?;
        Ok(())
    }

    /// Run `f` while holding the write lock for `key`
    fn with_key_lock<T>(&self, key: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _local = self.writers.lock();
        let _lock = KeyLock::acquire(&self.path_for(key, LOCK_EXT))?;
        f()
    }
}

impl VersionedStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Versioned<Vec<u8>>>> {
        let now = unix_now();
        Ok(self
            .read_entry(key)?
            .filter(|e| e.is_live(now))
            .map(|e| Versioned {
                value: e.data,
                version: Version::new(e.version),
            }))
    }

    fn create(&self, key: &str, data: &[u8], ttl: Option<Duration>) -> Result<Version> {
        self.with_key_lock(key, || {
            let now = unix_now();

            // An expired entry still pins the version sequence for this key
            let previous = match self.read_entry(key)? {
                Some(entry) if entry.is_live(now) => {
                    return Err(AllocatorError::KeyExists(key.to_string()));
                }
                Some(entry) => entry.version,
                None => 0,
            };

            let entry = FileEntry {
                key: key.to_string(),
                version: previous + 1,
                expires_at: ttl.map(|ttl| now + ttl.as_secs().max(1)),
                checksum: checksum(data),
                data: data.to_vec(),
            };
            self.write_entry(&entry)?;

            trace!(key, version = entry.version, "created key");
            Ok(Version::new(entry.version))
        })
    }

    fn compare_and_swap(&self, key: &str, data: &[u8], expected: Version) -> Result<Version> {
        self.with_key_lock(key, || {
            let now = unix_now();
            let current = match self.read_entry(key)? {
                Some(entry) if entry.is_live(now) => entry,
                _ => return Err(AllocatorError::KeyNotFound(key.to_string())),
            };

            if current.version != expected.get() {
                return Err(AllocatorError::Conflict {
                    key: key.to_string(),
                    expected: expected.get(),
                    actual: current.version,
                });
            }

            let entry = FileEntry {
                key: key.to_string(),
                version: current.version + 1,
                expires_at: current.expires_at,
                checksum: checksum(data),
                data: data.to_vec(),
            };
            self.write_entry(&entry)?;

            trace!(key, version = entry.version, "swapped key");
            Ok(Version::new(entry.version))
        })
    }
}

/// Exclusive advisory lock, released on drop
struct KeyLock {
    file: File,
}

impl KeyLock {
    fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        loop {
            // SAFETY: the descriptor is owned by `file` and stays open for the call
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if rc == 0 {
                return Ok(KeyLock { file });
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != ErrorKind::Interrupted {
                return Err(err.into());
            }
        }
    }
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        // SAFETY: the descriptor is still owned by `self.file`
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

fn checksum(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
