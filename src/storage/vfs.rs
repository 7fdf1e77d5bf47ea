//! # Virtual file system
//!
//! The operating system boundary beneath the paged-file service. Everything above this module
//! talks to files only through [`FileSystem`] and [`File`], so the whole stack can run against
//! real files or against the in-memory implementation used by tests.

use std::cell;
use std::collections;
use std::fs;
use std::io;
use std::path;
use std::rc;

/// # File system interface
///
/// Creates, opens and deletes files by path.
///
/// See: <https://www.sqlite.org/c3ref/vfs.html>
pub trait FileSystem {
  /// The type of files that this file system uses.
  type File: File;

  /// Creates a new, empty file at the given `path`. Fails if the file already exists.
  fn create(&mut self, path: &path::Path) -> io::Result<Self::File>;

  /// Opens the existing file at the given `path`. Fails if the file does not exist.
  fn open(&mut self, path: &path::Path) -> io::Result<Self::File>;

  /// Deletes the file at the given `path`.
  fn delete(&mut self, path: &path::Path) -> io::Result<()>;
}

/// # File interface
///
/// Positioned reads and writes on an open file.
///
/// See: <https://www.sqlite.org/c3ref/io_methods.html>
pub trait File {
  /// Returns the size of the file in bytes.
  fn size(&mut self) -> io::Result<u64>;

  /// Fills `buf` with the bytes starting at `offset`. Fails if the file ends before `buf` is full.
  fn read(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

  /// Writes `buf` at the given `offset`, extending the file if needed.
  fn write(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;

  /// Flushes any buffered data to durable storage.
  fn sync(&mut self) -> io::Result<()>;

  /// Tries locking the file exclusively without blocking.
  fn try_lock(&mut self) -> io::Result<()>;

  /// Unlocks the file.
  fn unlock(&mut self) -> io::Result<()>;
}

/// # The primary implementation for [`FileSystem`]
///
/// This is simply a wrapper around [`std::fs`].
#[derive(Debug, Default)]
pub struct StandardFileSystem;

impl FileSystem for StandardFileSystem {
  type File = StandardFile;

  fn create(&mut self, path: &path::Path) -> io::Result<Self::File> {
    let file = fs::OpenOptions::new().read(true).write(true).create_new(true).open(path)?;
    Ok(Self::File::from(file))
  }

  fn open(&mut self, path: &path::Path) -> io::Result<Self::File> {
    let file = fs::OpenOptions::new().read(true).write(true).open(path)?;
    Ok(Self::File::from(file))
  }

  fn delete(&mut self, path: &path::Path) -> io::Result<()> {
    fs::remove_file(path)
  }
}

/// # The primary implementation for [`File`]
///
/// This is simply a wrapper around [`std::fs::File`].
#[derive(Debug)]
pub struct StandardFile(fs::File);

/// Public constructor for [`StandardFile`].
impl From<fs::File> for StandardFile {
  fn from(file: fs::File) -> Self {
    Self(file)
  }
}

impl File for StandardFile {
  fn size(&mut self) -> io::Result<u64> {
    let StandardFile(inner) = self;
    Ok(inner.metadata()?.len())
  }

  fn read(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    let StandardFile(inner) = self;
    io::Seek::seek(inner, io::SeekFrom::Start(offset))?;
    io::Read::read_exact(inner, buf)
  }

  fn write(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
    let StandardFile(inner) = self;
    io::Seek::seek(inner, io::SeekFrom::Start(offset))?;
    io::Write::write_all(inner, buf)
  }

  fn sync(&mut self) -> io::Result<()> {
    let StandardFile(inner) = self;
    fs::File::sync_all(inner)
  }

  fn try_lock(&mut self) -> io::Result<()> {
    let StandardFile(inner) = self;
    fs2::FileExt::try_lock_exclusive(inner)
  }

  fn unlock(&mut self) -> io::Result<()> {
    let StandardFile(inner) = self;
    fs2::FileExt::unlock(inner)
  }
}

/// Fill byte for regions a write skipped over, so reads of never-written data stand out.
const POISON: u8 = 0xCC;

#[derive(Debug, Default)]
struct MemoryFileData {
  data: Vec<u8>,
  locked: bool,
}

/// # In-memory implementation for [`FileSystem`]
///
/// Each file is represented by a byte vector and a boolean indicating whether the file is locked.
/// Handles opened on the same path share the same data.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
  files: collections::HashMap<path::PathBuf, rc::Rc<cell::RefCell<MemoryFileData>>>,
}

impl FileSystem for MemoryFileSystem {
  type File = MemoryFile;

  fn create(&mut self, path: &path::Path) -> io::Result<Self::File> {
    match self.files.entry(path.to_path_buf()) {
      collections::hash_map::Entry::Occupied(_) => {
        Err(io::Error::new(io::ErrorKind::AlreadyExists, format!("{} already exists", path.display())))
      }
      collections::hash_map::Entry::Vacant(entry) => Ok(entry.insert(Default::default()).clone().into()),
    }
  }

  fn open(&mut self, path: &path::Path) -> io::Result<Self::File> {
    let file = self.files.get(path).ok_or_else(|| not_found(path))?;
    Ok(file.clone().into())
  }

  fn delete(&mut self, path: &path::Path) -> io::Result<()> {
    self.files.remove(path).map(|_| ()).ok_or_else(|| not_found(path))
  }
}

fn not_found(path: &path::Path) -> io::Error {
  io::Error::new(io::ErrorKind::NotFound, format!("{} does not exist", path.display()))
}

/// # In-memory implementation for [`File`]
#[derive(Debug)]
pub struct MemoryFile {
  file: rc::Rc<cell::RefCell<MemoryFileData>>,
}

/// Public constructor for [`MemoryFile`].
impl From<rc::Rc<cell::RefCell<MemoryFileData>>> for MemoryFile {
  fn from(file: rc::Rc<cell::RefCell<MemoryFileData>>) -> Self {
    MemoryFile { file }
  }
}

fn to_index(offset: u64) -> io::Result<usize> {
  usize::try_from(offset).map_err(|x| io::Error::new(io::ErrorKind::InvalidInput, x))
}

impl File for MemoryFile {
  fn size(&mut self) -> io::Result<u64> {
    Ok(self.file.borrow().data.len() as u64)
  }

  fn read(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    let offset = to_index(offset)?;
    let file = self.file.borrow();
    if offset + buf.len() > file.data.len() {
      return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of file"));
    }
    buf.copy_from_slice(&file.data[offset..offset + buf.len()]);
    Ok(())
  }

  fn write(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
    let offset = to_index(offset)?;
    let mut file = self.file.borrow_mut();
    if offset + buf.len() > file.data.len() {
      file.data.resize(offset + buf.len(), POISON);
    }
    file.data[offset..offset + buf.len()].copy_from_slice(buf);
    Ok(())
  }

  fn sync(&mut self) -> io::Result<()> {
    Ok(())
  }

  fn try_lock(&mut self) -> io::Result<()> {
    let mut file = self.file.borrow_mut();
    if file.locked {
      Err(io::Error::new(io::ErrorKind::WouldBlock, "file is locked"))
    } else {
      file.locked = true;
      Ok(())
    }
  }

  fn unlock(&mut self) -> io::Result<()> {
    let mut file = self.file.borrow_mut();
    if file.locked {
      file.locked = false;
      Ok(())
    } else {
      Err(io::Error::new(io::ErrorKind::InvalidInput, "file is not locked"))
    }
  }
}
