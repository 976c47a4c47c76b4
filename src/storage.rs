//! Raw storage primitives used by the section cache and chapter builds.
//!
//! Paths are `/`-separated strings relative to the storage root, the way an
//! SD-card filesystem addresses them.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::error::{ErrorPhase, PagerError};

/// Attempts made for a storage operation before giving up.
pub const RETRY_ATTEMPTS: u32 = 3;
/// Fixed delay between attempts.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Open/create/remove primitives over a rooted filesystem.
pub trait Storage {
    type Reader: Read + Seek;
    type Writer: Write + Seek;

    /// Open an existing file for reading.
    fn open_read(&self, path: &str) -> Result<Self::Reader, PagerError>;

    /// Create or truncate a file for writing.
    fn open_write(&self, path: &str) -> Result<Self::Writer, PagerError>;

    fn exists(&self, path: &str) -> bool;

    /// Remove a file. Removing a missing file is not an error.
    fn remove(&self, path: &str) -> Result<(), PagerError>;

    /// Create a directory and any missing parents.
    fn mkdir(&self, path: &str) -> Result<(), PagerError>;
}

impl<S: Storage + ?Sized> Storage for &S {
    type Reader = S::Reader;
    type Writer = S::Writer;

    fn open_read(&self, path: &str) -> Result<Self::Reader, PagerError> {
        (**self).open_read(path)
    }

    fn open_write(&self, path: &str) -> Result<Self::Writer, PagerError> {
        (**self).open_write(path)
    }

    fn exists(&self, path: &str) -> bool {
        (**self).exists(path)
    }

    fn remove(&self, path: &str) -> Result<(), PagerError> {
        (**self).remove(path)
    }

    fn mkdir(&self, path: &str) -> Result<(), PagerError> {
        (**self).mkdir(path)
    }
}

/// [`Storage`] backed by `std::fs` under a root directory.
#[derive(Clone, Debug)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path for a storage path.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

fn storage_error(err: io::Error, path: &str) -> PagerError {
    PagerError::new(ErrorPhase::Storage, "IO_ERROR", err.to_string()).with_path(path)
}

impl Storage for FsStorage {
    type Reader = BufReader<File>;
    type Writer = BufWriter<File>;

    fn open_read(&self, path: &str) -> Result<Self::Reader, PagerError> {
        let file = File::open(self.resolve(path)).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                PagerError::new(ErrorPhase::Storage, "NOT_FOUND", "File does not exist")
                    .with_path(path)
            } else {
                storage_error(err, path)
            }
        })?;
        Ok(BufReader::new(file))
    }

    fn open_write(&self, path: &str) -> Result<Self::Writer, PagerError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.resolve(path))
            .map_err(|err| storage_error(err, path))?;
        Ok(BufWriter::new(file))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn remove(&self, path: &str) -> Result<(), PagerError> {
        match fs::remove_file(self.resolve(path)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(storage_error(err, path)),
        }
    }

    fn mkdir(&self, path: &str) -> Result<(), PagerError> {
        fs::create_dir_all(self.resolve(path)).map_err(|err| storage_error(err, path))
    }
}

/// Remove `path`, ignoring failures.
pub fn remove_quiet<S: Storage + ?Sized>(storage: &S, path: &str) {
    let _ = storage.remove(path);
}

/// Parent directory of a storage path, if any.
pub fn parent_dir(path: &str) -> Option<&str> {
    let idx = path.rfind('/')?;
    let parent = &path[..idx];
    (!parent.is_empty()).then_some(parent)
}

/// Run `op` up to [`RETRY_ATTEMPTS`] times with [`RETRY_BACKOFF`] between
/// attempts. `op` receives the zero-based attempt number.
pub fn retry<T, F>(label: &str, op: F) -> Result<T, PagerError>
where
    F: FnMut(u32) -> Result<T, PagerError>,
{
    retry_with(label, RETRY_ATTEMPTS, RETRY_BACKOFF, op)
}

/// [`retry`] with explicit bounds.
pub fn retry_with<T, F>(
    label: &str,
    attempts: u32,
    backoff: Duration,
    mut op: F,
) -> Result<T, PagerError>
where
    F: FnMut(u32) -> Result<T, PagerError>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < attempts => {
                log::warn!(
                    "{} failed (attempt {}/{}): {}",
                    label,
                    attempt + 1,
                    attempts,
                    err
                );
                if !backoff.is_zero() {
                    thread::sleep(backoff);
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
