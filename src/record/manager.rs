//! # Record manager
//!
//! Lifecycle of record files on top of the paged-file service, and the loading and storing of each
//! file's page list and free-page queue through the header page and its directory chains.

use std::collections;
use std::path;

use tracing::{debug, info, warn};

use super::directory;
use super::error::{Error, Result};
use super::file::{FileHandle, OpenFile};
use super::layout::{Geometry, HeaderPage, HEADER_LIST_CAPACITY};
use crate::storage::paging::{self, PageId, PagedFile};
use crate::storage::vfs;

/// Page list and free-page queue of a file, as read at open.
struct Directory {
  header_page: PageId,
  geometry: Geometry,
  pages: Vec<PageId>,
  free_pages: collections::VecDeque<u32>,
}

/// # Record manager
///
/// Creates, destroys, opens and closes record files. Keeps a count of open handles per path, so that
/// a file cannot be destroyed while a handle has it open.
pub struct RecordManager<FS: vfs::FileSystem> {
  files: paging::FileManager<FS>,
  open_files: collections::HashMap<path::PathBuf, usize>,
}

impl<FS: vfs::FileSystem> RecordManager<FS> {
  /// Creates a manager with the default [`paging::Config`].
  pub fn new(fs: FS) -> Self {
    Self::with_config(fs, paging::Config::default())
  }

  /// Creates a manager whose open files use `config`.
  pub fn with_config(fs: FS, config: paging::Config) -> Self {
    RecordManager { files: paging::FileManager::with_config(fs, config), open_files: collections::HashMap::new() }
  }

  /// Creates an empty record file holding records of `record_size` bytes. Fails if `path` exists.
  ///
  /// On failure no file is left behind.
  pub fn create_file(&mut self, path: &path::Path, record_size: usize) -> Result<()> {
    let geometry = Geometry::new(record_size)?;
    self.files.create_file(path)?;
    if let Err(err) = self.write_empty_header(path, geometry) {
      if let Err(cleanup) = self.files.destroy_file(path) {
        warn!(path = %path.display(), %cleanup, "could not remove partially created record file");
      }
      return Err(err);
    }
    info!(path = %path.display(), record_size, records_per_page = geometry.records_per_page(), "created record file");
    Ok(())
  }

  fn write_empty_header(&mut self, path: &path::Path, geometry: Geometry) -> Result<()> {
    let file = self.files.open_file(path)?;
    let written = Self::init_header(&file, geometry);
    let closed = self.files.close_file(file);
    written?;
    Ok(closed?)
  }

  fn init_header(file: &PagedFile<FS::File>, geometry: Geometry) -> Result<()> {
    let guard = file.allocate_page()?;
    HeaderPage::new(geometry.record_size() as u32).encode(&mut guard.write());
    Ok(())
  }

  /// Deletes the record file at `path`. Fails while any handle has it open.
  pub fn destroy_file(&mut self, path: &path::Path) -> Result<()> {
    if self.open_files.contains_key(path) {
      return Err(Error::DestroyWhileOpen { path: path.to_path_buf() });
    }
    self.files.destroy_file(path)?;
    info!(path = %path.display(), "destroyed record file");
    Ok(())
  }

  /// Opens the record file at `path` through `handle`, which must be closed.
  ///
  /// On failure `handle` stays closed.
  pub fn open_file(&mut self, path: &path::Path, handle: &mut FileHandle<FS::File>) -> Result<()> {
    if handle.is_open() {
      return Err(Error::HandleAlreadyOpen);
    }
    let file = self.files.open_file(path)?;
    let Directory { header_page, geometry, pages, free_pages } = match Self::load(&file) {
      Ok(directory) => directory,
      Err(err) => {
        if let Err(cleanup) = self.files.close_file(file) {
          warn!(path = %path.display(), %cleanup, "could not close rejected record file");
        }
        return Err(err);
      }
    };
    debug!(path = %path.display(), pages = pages.len(), free_pages = free_pages.len(), "opened record file");

    handle.open = Some(OpenFile {
      path: path.to_path_buf(),
      file,
      header_page,
      geometry,
      pages,
      free_pages,
      dirty: false,
    });
    *self.open_files.entry(path.to_path_buf()).or_default() += 1;
    Ok(())
  }

  fn load(file: &PagedFile<FS::File>) -> Result<Directory> {
    let (header_page, header) = {
      let guard = file.first_page()?.ok_or_else(|| Error::corrupt(0, "record file has no header page"))?;
      let buf = guard.read();
      let header = HeaderPage::decode(guard.page_id(), &buf)?;
      (guard.page_id(), header)
    };
    let geometry = Geometry::new(header.record_size as usize)?;

    let pages = directory::read_list(file, &header.pages, header.pages_next, header.page_count as usize)?;
    let mut seen = collections::HashSet::new();
    for &page_id in &pages {
      if page_id == header_page || page_id >= file.page_count() || !seen.insert(page_id) {
        return Err(Error::corrupt(header_page, format!("page list names page {page_id} out of place")));
      }
    }

    let free_pages = directory::read_list(file, &header.free_pages, header.free_next, header.free_count as usize)?;
    let mut seen = collections::HashSet::new();
    for &page in &free_pages {
      if page >= header.page_count || !seen.insert(page) {
        return Err(Error::corrupt(header_page, format!("free-page queue names page {page} out of place")));
      }
    }

    Ok(Directory { header_page, geometry, pages, free_pages: free_pages.into() })
  }

  /// Closes `handle`, writing back its page list and free-page queue if they changed.
  ///
  /// The handle is closed even if writing back fails. If the lists cannot be written back, no page is
  /// flushed and the file keeps the state of its last successful close, apart from pages the buffer
  /// pool already evicted.
  pub fn close_file(&mut self, handle: &mut FileHandle<FS::File>) -> Result<()> {
    let open = handle.open.take().ok_or(Error::HandleAlreadyClosed)?;
    if let Some(count) = self.open_files.get_mut(&open.path) {
      *count -= 1;
      if *count == 0 {
        self.open_files.remove(&open.path);
      }
    }

    let stored = if open.dirty { Self::store(&open) } else { Ok(()) };
    let OpenFile { path, file, .. } = open;
    if let Err(err) = stored {
      warn!(path = %path.display(), %err, "discarding unflushed pages of record file");
      return Err(err);
    }
    self.files.close_file(file)?;
    debug!(path = %path.display(), "closed record file");
    Ok(())
  }

  fn store(open: &OpenFile<FS::File>) -> Result<()> {
    let header_page = open.header_page;
    let old = {
      let guard = open.file.get_page(header_page)?;
      let buf = guard.read();
      HeaderPage::decode(header_page, &buf)?
    };

    let free_pages: Vec<u32> = open.free_pages.iter().copied().collect();
    let (pages_inline, pages_rest) = open.pages.split_at(open.pages.len().min(HEADER_LIST_CAPACITY));
    let (free_inline, free_rest) = free_pages.split_at(free_pages.len().min(HEADER_LIST_CAPACITY));
    let pages_next = directory::write_list(&open.file, pages_rest, old.pages_next)?;
    let free_next = directory::write_list(&open.file, free_rest, old.free_next)?;

    let header = HeaderPage {
      record_size: open.geometry.record_size() as u32,
      page_count: open.pages.len() as u32,
      pages: pages_inline.to_vec(),
      pages_next,
      free_count: free_pages.len() as u32,
      free_pages: free_inline.to_vec(),
      free_next,
    };
    let guard = open.file.get_page(header_page)?;
    header.encode(&mut guard.write());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::io;

  use super::*;
  use crate::record::layout::MAX_RECORD_SIZE;
  use crate::record::Rid;
  use crate::storage::vfs::{MemoryFile, MemoryFileSystem};

  fn manager() -> RecordManager<MemoryFileSystem> {
    RecordManager::new(MemoryFileSystem::default())
  }

  #[test]
  fn test_create_rejects_bad_sizes() {
    let mut rm = manager();
    let path = path::Path::new("rel");
    assert!(matches!(rm.create_file(path, MAX_RECORD_SIZE + 1), Err(Error::InvalidRecordSize { .. })));
    assert!(matches!(rm.create_file(path, 0), Err(Error::InvalidRecordSize { .. })));
    // Nothing was created.
    assert!(matches!(rm.destroy_file(path), Err(Error::Storage(paging::Error::Io(_)))));
    rm.create_file(path, MAX_RECORD_SIZE).unwrap();
  }

  #[test]
  fn test_create_existing() {
    let mut rm = manager();
    let path = path::Path::new("rel");
    rm.create_file(path, 16).unwrap();
    match rm.create_file(path, 16) {
      Err(Error::Storage(paging::Error::Io(err))) => assert_eq!(err.kind(), io::ErrorKind::AlreadyExists),
      other => panic!("unexpected result: {other:?}"),
    }
    // The existing file is untouched.
    let mut handle = FileHandle::new();
    rm.open_file(path, &mut handle).unwrap();
    assert_eq!(handle.record_size().unwrap(), 16);
  }

  #[test]
  fn test_handle_states() {
    let mut rm = manager();
    let path = path::Path::new("rel");
    rm.create_file(path, 16).unwrap();

    let mut handle = FileHandle::new();
    assert!(matches!(rm.close_file(&mut handle), Err(Error::HandleAlreadyClosed)));
    rm.open_file(path, &mut handle).unwrap();
    assert!(matches!(rm.open_file(path, &mut handle), Err(Error::HandleAlreadyOpen)));
    assert!(handle.is_open());
    rm.close_file(&mut handle).unwrap();
    assert!(!handle.is_open());
    assert!(matches!(rm.close_file(&mut handle), Err(Error::HandleAlreadyClosed)));

    // A failed open leaves the handle closed.
    assert!(rm.open_file(path::Path::new("missing"), &mut handle).is_err());
    assert!(!handle.is_open());
  }

  #[test]
  fn test_destroy_while_open() {
    let mut rm = manager();
    let path = path::Path::new("rel");
    rm.create_file(path, 16).unwrap();

    let mut first = FileHandle::new();
    let mut second = FileHandle::new();
    rm.open_file(path, &mut first).unwrap();
    rm.open_file(path, &mut second).unwrap();
    assert!(matches!(rm.destroy_file(path), Err(Error::DestroyWhileOpen { .. })));
    rm.close_file(&mut first).unwrap();
    assert!(matches!(rm.destroy_file(path), Err(Error::DestroyWhileOpen { .. })));
    rm.close_file(&mut second).unwrap();
    rm.destroy_file(path).unwrap();
    assert!(rm.open_file(path, &mut first).is_err());
  }

  #[test]
  fn test_reopen_keeps_records() {
    let mut rm = manager();
    let path = path::Path::new("rel");
    rm.create_file(path, 400).unwrap();

    let mut handle = FileHandle::new();
    rm.open_file(path, &mut handle).unwrap();
    let rids: Vec<Rid> = (0..10).map(|i| handle.insert_record(&[i; 400]).unwrap()).collect();
    handle.delete_record(rids[2]).unwrap();
    rm.close_file(&mut handle).unwrap();

    rm.open_file(path, &mut handle).unwrap();
    assert_eq!(handle.page_count().unwrap(), 2);
    assert_eq!(handle.free_pages().unwrap(), vec![1, 0]);
    assert!(matches!(handle.get_record(rids[2]), Err(Error::RecordNotFound(_))));
    assert_eq!(handle.get_record(rids[9]).unwrap().data(), &[9; 400]);
    rm.close_file(&mut handle).unwrap();
  }

  #[test]
  fn test_open_rejects_foreign_files() {
    let mut rm = manager();
    let mut handle = FileHandle::<MemoryFile>::new();

    // A paged file without a header page.
    let path = path::Path::new("bare");
    rm.files.create_file(path).unwrap();
    assert!(matches!(rm.open_file(path, &mut handle), Err(Error::Corrupt { .. })));
    assert!(!handle.is_open());
    rm.destroy_file(path).unwrap();

    // A record file whose header names an impossible record size.
    let path = path::Path::new("rel");
    rm.create_file(path, 16).unwrap();
    let file = rm.files.open_file(path).unwrap();
    file.get_page(0).unwrap().write()[..4].copy_from_slice(&1u32.to_le_bytes());
    rm.files.close_file(file).unwrap();
    assert!(matches!(rm.open_file(path, &mut handle), Err(Error::Corrupt { page_id: 0, .. })));
    assert!(!handle.is_open());
    rm.destroy_file(path).unwrap();
  }

  #[test]
  fn test_failed_create_leaves_no_file() {
    // Without buffer frames the header page cannot be allocated.
    let mut rm = RecordManager::with_config(MemoryFileSystem::default(), paging::Config { buffer_frames: 0 });
    let path = path::Path::new("rel");
    assert!(matches!(rm.create_file(path, 16), Err(Error::Storage(paging::Error::NoFreeFrame(0)))));
    match rm.files.open_file(path) {
      Err(paging::Error::Io(err)) => assert_eq!(err.kind(), io::ErrorKind::NotFound),
      Err(err) => panic!("unexpected error: {err}"),
      Ok(_) => panic!("partially created file was left behind"),
    }
    assert!(matches!(rm.destroy_file(path), Err(Error::Storage(paging::Error::Io(_)))));
  }

  #[test]
  fn test_failed_close_keeps_last_closed_state() {
    let mut rm = manager();
    let path = path::Path::new("rel");
    rm.create_file(path, 16).unwrap();

    let mut handle = FileHandle::new();
    rm.open_file(path, &mut handle).unwrap();
    handle.insert_record(&[7; 16]).unwrap();
    // Damage the cached header page so that the lists cannot be written back.
    let open = handle.open.as_ref().unwrap();
    open.file.get_page(open.header_page).unwrap().write()[..4].copy_from_slice(&1u32.to_le_bytes());
    assert!(matches!(rm.close_file(&mut handle), Err(Error::Corrupt { page_id: 0, .. })));
    assert!(!handle.is_open());

    // Neither the damaged header nor the new record page reached the file.
    rm.open_file(path, &mut handle).unwrap();
    assert_eq!(handle.record_size().unwrap(), 16);
    assert_eq!(handle.page_count().unwrap(), 0);
    rm.close_file(&mut handle).unwrap();
    rm.destroy_file(path).unwrap();
  }
}
