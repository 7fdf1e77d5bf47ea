//! # Record file handle
//!
//! An open record file: the paged file plus its page list and free-page queue, held in memory
//! while the file is open and written back by [`RecordManager::close_file`].
//!
//! [`RecordManager::close_file`]: super::RecordManager::close_file

use std::collections;
use std::path;

use tracing::trace;

use super::data::{Record, Rid};
use super::error::{Error, Result};
use super::layout::{Geometry, RecordPage};
use crate::storage::paging::{self, PageId, PagedFile};
use crate::storage::vfs;

/// In-memory state of an open record file.
pub(crate) struct OpenFile<F: vfs::File> {
  pub(crate) path: path::PathBuf,
  pub(crate) file: PagedFile<F>,
  pub(crate) header_page: PageId,
  pub(crate) geometry: Geometry,
  /// Physical page of each virtual page.
  pub(crate) pages: Vec<PageId>,
  /// Virtual pages with at least one free slot, oldest first.
  pub(crate) free_pages: collections::VecDeque<u32>,
  /// Whether `pages` or `free_pages` changed since the file was opened.
  pub(crate) dirty: bool,
}

impl<F: vfs::File> OpenFile<F> {
  /// Resolves `rid` to its physical page and slot, without checking that the slot is live.
  fn locate(&self, rid: Rid) -> Result<(PageId, usize)> {
    let slot = rid.slot() as usize;
    match self.pages.get(rid.page() as usize) {
      Some(&page_id) if slot < self.geometry.records_per_page() => Ok((page_id, slot)),
      _ => Err(Error::RecordNotFound(rid)),
    }
  }

  /// Returns whether the live record `rid` sits on a full page.
  fn check_live(&self, rid: Rid, guard: &paging::PageGuard<'_, F>) -> Result<bool> {
    let buf = guard.read();
    let page = RecordPage::new(&buf[..], self.geometry);
    page.validate(guard.page_id())?;
    if !page.is_occupied(rid.slot() as usize) {
      return Err(Error::RecordNotFound(rid));
    }
    Ok(page.is_full())
  }
}

/// # Record file handle
///
/// Starts closed; [`RecordManager::open_file`] binds it to a file and [`RecordManager::close_file`]
/// releases it. Record operations on a closed handle fail with [`Error::FileNotOpen`].
///
/// Records are inserted into the oldest page that still has a free slot. A new page is allocated
/// only when no page has room.
///
/// [`RecordManager::open_file`]: super::RecordManager::open_file
/// [`RecordManager::close_file`]: super::RecordManager::close_file
pub struct FileHandle<F: vfs::File> {
  pub(crate) open: Option<OpenFile<F>>,
}

impl<F: vfs::File> Default for FileHandle<F> {
  /// Public constructor for a closed [`FileHandle`].
  fn default() -> Self {
    FileHandle { open: None }
  }
}

impl<F: vfs::File> FileHandle<F> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_open(&self) -> bool {
    self.open.is_some()
  }

  pub(crate) fn state(&self) -> Result<&OpenFile<F>> {
    self.open.as_ref().ok_or(Error::FileNotOpen)
  }

  fn state_mut(&mut self) -> Result<&mut OpenFile<F>> {
    self.open.as_mut().ok_or(Error::FileNotOpen)
  }

  pub fn record_size(&self) -> Result<usize> {
    Ok(self.state()?.geometry.record_size())
  }

  pub fn records_per_page(&self) -> Result<usize> {
    Ok(self.state()?.geometry.records_per_page())
  }

  /// Returns the number of record pages, which is one more than the largest virtual page index.
  pub fn page_count(&self) -> Result<u32> {
    Ok(self.state()?.pages.len() as u32)
  }

  /// Returns the virtual pages with free slots, in the order inserts will use them.
  pub fn free_pages(&self) -> Result<Vec<u32>> {
    Ok(self.state()?.free_pages.iter().copied().collect())
  }

  /// Copies out the record `rid`.
  pub fn get_record(&self, rid: Rid) -> Result<Record> {
    let open = self.state()?;
    let (page_id, slot) = open.locate(rid)?;
    let guard = open.file.get_page(page_id)?;
    open.check_live(rid, &guard)?;
    let buf = guard.read();
    let record = Record::new(rid, RecordPage::new(&buf[..], open.geometry).slot(slot));
    trace!(%rid, "read record");
    Ok(record)
  }

  /// Stores `data` in a free slot and returns its identifier.
  pub fn insert_record(&mut self, data: &[u8]) -> Result<Rid> {
    let OpenFile { file, geometry, pages, free_pages, dirty, .. } = self.state_mut()?;
    let geometry = *geometry;
    if data.len() != geometry.record_size() {
      return Err(Error::RecordSizeMismatch { expected: geometry.record_size(), actual: data.len() });
    }

    let (page, guard) = match free_pages.front() {
      Some(&page) => (page, file.get_page(pages[page as usize])?),
      None => {
        let guard = file.allocate_page()?;
        RecordPage::new(&mut guard.write()[..], geometry).init();
        let page = pages.len() as u32;
        pages.push(guard.page_id());
        free_pages.push_back(page);
        *dirty = true;
        (page, guard)
      }
    };

    let mut buf = guard.write();
    RecordPage::new(&buf[..], geometry).validate(guard.page_id())?;
    let mut record_page = RecordPage::new(&mut buf[..], geometry);
    let slot = record_page
      .first_free(0)
      .ok_or_else(|| Error::corrupt(guard.page_id(), "page on the free-page queue has no free slot"))?;
    record_page.claim(slot);
    record_page.slot_mut(slot).copy_from_slice(data);
    if record_page.is_full() {
      free_pages.pop_front();
      *dirty = true;
    }

    let rid = Rid::new(page, slot as u32);
    trace!(%rid, "inserted record");
    Ok(rid)
  }

  /// Frees the slot of record `rid`.
  pub fn delete_record(&mut self, rid: Rid) -> Result<()> {
    let open = self.state_mut()?;
    let (page_id, slot) = open.locate(rid)?;
    let guard = open.file.get_page(page_id)?;
    let was_full = open.check_live(rid, &guard)?;
    RecordPage::new(&mut guard.write()[..], open.geometry).release(slot);
    drop(guard);

    if was_full {
      open.free_pages.push_back(rid.page());
      open.dirty = true;
    }
    trace!(%rid, "deleted record");
    Ok(())
  }

  /// Overwrites the stored bytes of `record.rid()` with `record.data()`.
  pub fn update_record(&mut self, record: &Record) -> Result<()> {
    let open = self.state_mut()?;
    let rid = record.rid();
    if record.data().len() != open.geometry.record_size() {
      return Err(Error::RecordSizeMismatch { expected: open.geometry.record_size(), actual: record.data().len() });
    }
    let (page_id, slot) = open.locate(rid)?;
    let guard = open.file.get_page(page_id)?;
    open.check_live(rid, &guard)?;
    RecordPage::new(&mut guard.write()[..], open.geometry).slot_mut(slot).copy_from_slice(record.data());
    trace!(%rid, "updated record");
    Ok(())
  }

  /// Writes dirty pages to disk: those of virtual page `page` if given, otherwise every page of the
  /// file. The page list and free-page queue are only written when the file is closed.
  pub fn force_pages(&self, page: Option<u32>) -> Result<()> {
    let open = self.state()?;
    let page_id = match page {
      Some(page) => Some(*open.pages.get(page as usize).ok_or(paging::Error::InvalidPage(page))?),
      None => None,
    };
    open.file.force_pages(page_id)?;
    Ok(())
  }
}
