//! On-disk cache of filter lists.
//!
//! Every filter owns one file `<dir>/<id>.txt` holding the fetched bytes
//! verbatim, plus a `<dir>/<id>.meta` sidecar. Writes go to a temporary
//! file in the same directory which is then renamed over the target, so a
//! reader sees either the previous content or the new content, never a
//! truncated file.

use sha2::{Digest as _, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{Error, Result};
use crate::filter::FilterId;

/// SHA-256 digest of cached content.
pub type Digest = [u8; 32];

const TEMP_PREFIX: &str = ".";
const TEMP_SUFFIX: &str = ".tmp";

/// Mode of persisted cache and sidecar files.
#[cfg(unix)]
const CACHE_FILE_MODE: u32 = 0o644;

/// Cache directory holding one file per filter.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// Create a store rooted at `dir`. Nothing is touched on disk until
    /// [`CacheStore::init`].
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Get the cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ensure the directory exists and remove temp files left behind by
    /// interrupted writes.
    ///
    /// Returns the number of stale temp files removed.
    pub fn init(&self) -> Result<usize> {
        fs::create_dir_all(&self.dir)?;

        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if is_temp_name(name) && entry.file_type()?.is_file() {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        if removed > 0 {
            log::info!("Removed {} stale temp files from {:?}", removed, self.dir);
        }
        Ok(removed)
    }

    /// Get the path of the cached list for `id`.
    pub fn path(&self, id: FilterId) -> PathBuf {
        self.dir.join(format!("{}.txt", id.get()))
    }

    /// Get the path of the metadata sidecar for `id`.
    pub fn metadata_path(&self, id: FilterId) -> PathBuf {
        self.dir.join(format!("{}.meta", id.get()))
    }

    /// Atomically replace the file at `path` with `data`.
    pub fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        write_atomic(path, data)
    }

    /// Read the whole file at `path`.
    pub fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| not_found_or_io(e, path))
    }

    /// Open the file at `path` for streaming reads.
    pub fn open(&self, path: &Path) -> Result<File> {
        File::open(path).map_err(|e| not_found_or_io(e, path))
    }

    /// Compute the digest of the file at `path` without loading it whole.
    ///
    /// Returns `None` if the file does not exist.
    pub fn digest(&self, path: &Path) -> Result<Option<Digest>> {
        let mut file = match self.open(path) {
            Ok(f) => f,
            Err(Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(Some(finish(hasher)))
    }

    /// Remove the file at `path`. A missing file is not an error.
    pub fn delete(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Get the modification time of the file at `path`.
    pub fn modified(&self, path: &Path) -> Option<SystemTime> {
        fs::metadata(path).and_then(|m| m.modified()).ok()
    }
}

/// Compute the digest of in-memory content.
pub fn digest(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    finish(hasher)
}

/// Write `data` to a temp file next to `path`, sync it, then rename it over
/// `path`.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    // tempfile creates files with mode 0600
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(CACHE_FILE_MODE))?;
    }
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

fn finish(hasher: Sha256) -> Digest {
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn is_temp_name(name: &str) -> bool {
    name.len() > TEMP_PREFIX.len() + TEMP_SUFFIX.len()
        && name.starts_with(TEMP_PREFIX)
        && name.ends_with(TEMP_SUFFIX)
}

fn not_found_or_io(e: io::Error, path: &Path) -> Error {
    if e.kind() == io::ErrorKind::NotFound {
        Error::NotFound(path.to_path_buf())
    } else {
        Error::Io(e)
    }
}
