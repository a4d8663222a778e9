//! Backing storage for out-of-core event data.
//!
//! A [`StorageBackend`] is a flat, randomly addressable byte store. The
//! [`EventStore`] sits on top of it and speaks in event records: it encodes
//! and decodes event lists, and hands out [`FileRegion`]s through a
//! [`FreeSpaceMap`].
//!
//! Two backends are provided:
//! - [`MemoryBackend`]: a growable buffer, for tests and transient trees.
//! - [`FileBackend`]: a file on disk, addressed with positional I/O.

pub mod event_store;
pub mod free_space;

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

pub use event_store::{EventStore, RECORD_HEADER_FIELDS};
pub use free_space::FreeSpaceMap;

/// A region of the event file, in event-record units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FileRegion {
  /// Index of the first record.
  pub offset: u64,
  /// Number of records.
  pub count: u64,
}

impl FileRegion {
  pub fn new(offset: u64, count: u64) -> Self {
    Self { offset, count }
  }

  /// One past the last record, or `None` if that does not fit in a `u64`.
  #[inline]
  pub fn checked_end(&self) -> Option<u64> {
    self.offset.checked_add(self.count)
  }

  /// One past the last record, saturating at `u64::MAX`.
  ///
  /// Regions read from outside the process go through
  /// [`FileRegion::checked_end`] first.
  #[inline]
  pub fn end(&self) -> u64 {
    self.offset.saturating_add(self.count)
  }
}

/// Randomly addressable byte storage shared by every box of a tree.
pub trait StorageBackend: Send + Sync {
  /// Fill `buf` from `offset`; reading past the end is an error.
  fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

  /// Write `data` at `offset`, growing the store if needed.
  fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()>;

  /// Current size in bytes.
  fn len(&self) -> io::Result<u64>;

  /// Whether the store holds no bytes.
  fn is_empty(&self) -> io::Result<bool> {
    Ok(self.len()? == 0)
  }

  /// Push buffered writes to the underlying medium.
  fn flush(&self) -> io::Result<()> {
    Ok(())
  }
}

// =============================================================================
// MemoryBackend
// =============================================================================

/// In-memory backend.
#[derive(Default)]
pub struct MemoryBackend {
  data: RwLock<Vec<u8>>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }
}

impl StorageBackend for MemoryBackend {
  fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    let data = self.data.read().unwrap();
    let start = usize::try_from(offset).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let end = start
      .checked_add(buf.len())
      .filter(|end| *end <= data.len())
      .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
    buf.copy_from_slice(&data[start..end]);
    Ok(())
  }

  fn write_at(&self, offset: u64, bytes: &[u8]) -> io::Result<()> {
    let mut data = self.data.write().unwrap();
    let start = usize::try_from(offset).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let end = start + bytes.len();
    if data.len() < end {
      data.resize(end, 0);
    }
    data[start..end].copy_from_slice(bytes);
    Ok(())
  }

  fn len(&self) -> io::Result<u64> {
    Ok(self.data.read().unwrap().len() as u64)
  }
}

// =============================================================================
// FileBackend
// =============================================================================

/// Backend over a single file.
pub struct FileBackend {
  path: PathBuf,
  file: Mutex<File>,
}

impl FileBackend {
  /// Create (or truncate) a file at `path`.
  pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
    let path = path.as_ref().to_path_buf();
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(true)
      .open(&path)?;
    Ok(Self {
      path,
      file: Mutex::new(file),
    })
  }

  /// Open an existing file for reading and writing.
  pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
    let path = path.as_ref().to_path_buf();
    let file = OpenOptions::new().read(true).write(true).open(&path)?;
    Ok(Self {
      path,
      file: Mutex::new(file),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl StorageBackend for FileBackend {
  fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    let mut file = self.file.lock().unwrap();
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
  }

  fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
    let mut file = self.file.lock().unwrap();
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)
  }

  fn len(&self) -> io::Result<u64> {
    Ok(self.file.lock().unwrap().metadata()?.len())
  }

  fn flush(&self) -> io::Result<()> {
    self.file.lock().unwrap().sync_data()
  }
}
