//! Per-session persistent key/value store.
//!
//! A [`Store`] is a JSON object persisted at `<store_dir>/<session>.dat`. While
//! a handle is alive it holds an exclusive advisory lock on
//! `<session>.lock`, so concurrent requests for the same session take turns
//! instead of overwriting each other's writes.
//!
//! [`StoreAccessor::open`] adds the recovery rule: if the backing file cannot
//! be read or decoded it is deleted and the open is retried exactly once. A
//! second failure is returned to the caller.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use kagura_config::Layout;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::warn;

use crate::names::SessionId;

/// Tracing target for store diagnostics.
const STORE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::store");

/// Errors raised by session store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The request context was built without the store.
    #[error("session store was not requested for this request")]
    NotRequested,
    /// The store directory could not be created.
    #[error("failed to prepare store directory '{path}': {source}")]
    Directory {
        /// Directory path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The session lock could not be acquired.
    #[error("failed to lock session store '{path}': {source}")]
    Lock {
        /// Lock file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The backing file could not be read.
    #[error("failed to read session store '{path}': {source}")]
    Read {
        /// Backing file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The backing file does not contain a JSON object.
    #[error("session store '{path}' is corrupt: {source}")]
    Corrupt {
        /// Backing file path.
        path: PathBuf,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// The backing file could not be written.
    #[error("failed to write session store '{path}': {source}")]
    Write {
        /// Backing file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The corrupt backing file could not be removed.
    #[error("failed to remove session store '{path}': {source}")]
    Remove {
        /// Backing file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A value could not be converted to or from JSON.
    #[error("failed to convert value for key '{key}': {source}")]
    Value {
        /// Key being read or written.
        key: String,
        /// Conversion error.
        #[source]
        source: serde_json::Error,
    },
}

/// Open, locked session store.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    lock: File,
    entries: Map<String, Value>,
}

impl Store {
    /// Locks `lock_path` and loads the JSON object stored at `path`.
    ///
    /// A missing or empty backing file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Lock`], [`StoreError::Read`] or
    /// [`StoreError::Corrupt`].
    pub fn open(path: &Path, lock_path: &Path) -> Result<Self, StoreError> {
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path)
            .map_err(|source| StoreError::Lock {
                path: lock_path.to_path_buf(),
                source,
            })?;
        lock.lock_exclusive().map_err(|source| StoreError::Lock {
            path: lock_path.to_path_buf(),
            source,
        })?;

        let entries = read_entries(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            lock,
            entries,
        })
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Decodes the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Value`] when the stored value has another shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        self.entries
            .get(key)
            .map(|value| {
                T::deserialize(value).map_err(|source| StoreError::Value {
                    key: key.to_owned(),
                    source,
                })
            })
            .transpose()
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// Changes are kept in memory until [`Store::commit`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Value`] when `value` cannot be encoded.
    pub fn insert<T: Serialize + ?Sized>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), StoreError> {
        let key = key.into();
        let encoded = serde_json::to_value(value).map_err(|source| StoreError::Value {
            key: key.clone(),
            source,
        })?;
        self.entries.insert(key, encoded);
        Ok(())
    }

    /// Removes `key`, returning its raw value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Returns `true` when `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Stored keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Atomically replaces the backing file with the in-memory entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] when the temporary file cannot be written
    /// or renamed into place.
    pub fn commit(&self) -> Result<(), StoreError> {
        let write_error = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir).map_err(write_error)?;
        serde_json::to_writer(&mut temp, &self.entries)
            .map_err(|source| write_error(io::Error::other(source)))?;
        temp.flush().map_err(write_error)?;
        temp.persist(&self.path)
            .map_err(|error| write_error(error.error))?;
        Ok(())
    }

    /// Runs `body` against the store and commits when it succeeds.
    ///
    /// When `body` fails, in-memory changes made during the transaction are
    /// discarded and the backing file is left untouched.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `body`, or a commit failure.
    pub fn transaction<R, E>(&mut self, body: impl FnOnce(&mut Self) -> Result<R, E>) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        let snapshot = self.entries.clone();
        match body(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(error) => {
                self.entries = snapshot;
                Err(error)
            }
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(error) = FileExt::unlock(&self.lock) {
            warn!(target: STORE_TARGET, path = %self.path.display(), %error, "failed to release session lock");
        }
    }
}

fn read_entries(path: &Path) -> Result<Map<String, Value>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Runs `open`, and when the backing file is unreadable or corrupt deletes
/// `path` and runs it exactly once more.
///
/// Other failures, such as a lock that cannot be acquired, are returned as is
/// and leave the session data in place.
///
/// # Errors
///
/// Returns [`StoreError::Remove`] if the corrupt file cannot be deleted, the
/// unrecoverable first error, or the error of the second attempt.
pub fn open_with_recovery<T, F>(path: &Path, mut open: F) -> Result<T, StoreError>
where
    F: FnMut() -> Result<T, StoreError>,
{
    match open() {
        Ok(store) => Ok(store),
        Err(error) if !error.is_recoverable() => Err(error),
        Err(error) => {
            warn!(
                target: STORE_TARGET,
                path = %path.display(),
                %error,
                "session store unreadable; recreating"
            );
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(source) if source.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(StoreError::Remove {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
            open()
        }
    }
}

impl StoreError {
    /// Returns `true` for failures cured by recreating the backing file.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Read { .. } | Self::Corrupt { .. })
    }
}

/// Opens session stores below the configured store directory.
#[derive(Debug, Clone)]
pub struct StoreAccessor {
    layout: Layout,
}

impl StoreAccessor {
    /// Creates an accessor for the given layout.
    #[must_use]
    pub const fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Opens the store for `session`, recreating it once if it is corrupt.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the directory cannot be prepared or the
    /// store fails to open twice.
    pub fn open(&self, session: &SessionId) -> Result<Store, StoreError> {
        let dir = self.layout.store_dir();
        fs::create_dir_all(dir).map_err(|source| StoreError::Directory {
            path: dir.to_path_buf(),
            source,
        })?;
        let data = self.layout.store_file(session.as_str());
        let lock = self.layout.store_lock_file(session.as_str());
        open_with_recovery(&data, || Store::open(&data, &lock))
    }
}
