//! # Paging
//!
//! This module provides the paged-file service: a file divided into fixed-size pages, with page
//! allocation through a disposed-page list and a small buffer pool of pinned frames.
//!
//! ## File format
//!
//! The file is a sequence of [`BLOCK_SIZE`]-byte blocks. Block 0 is the file header:
//!
//! | offset | size | field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 4    | magic `QHPF`                            |
//! | 4      | 4    | number of pages ever allocated          |
//! | 8      | 4    | head of the disposed-page list          |
//!
//! Page `n` lives in block `n + 1`: a 4-byte link followed by [`PAGE_SIZE`] bytes of page body.
//! The link is [`IN_USE`] for live pages; for disposed pages it points at the next disposed page,
//! or holds [`NO_PAGE`] at the end of the list. All integers are little-endian.

use std::cell;
use std::collections;
use std::io;
use std::path;

use thiserror::Error;
use tracing::{debug, trace, warn};

use super::vfs;

/// Number of usable bytes in a page.
pub const PAGE_SIZE: usize = 4092;

const LINK_SIZE: usize = 4;

/// Size of one on-disk block: the page link plus the page body.
pub const BLOCK_SIZE: usize = LINK_SIZE + PAGE_SIZE;

const HEADER_SIZE: usize = 12;

const MAGIC: &[u8; 4] = b"QHPF";

/// Identifier of a page within a paged file, assigned by [`PagedFile::allocate_page`].
pub type PageId = u32;

/// Sentinel page identifier terminating page chains. Equal to `-1` as a signed 32-bit integer.
pub const NO_PAGE: PageId = PageId::MAX;

const IN_USE: u32 = PageId::MAX - 1;

/// Errors raised by the paged-file service.
#[derive(Debug, Error)]
pub enum Error {
  /// Error from the underlying file.
  #[error("I/O error: {0}")]
  Io(#[from] io::Error),

  /// The page was never allocated or has been disposed.
  #[error("page {0} is not a live page of this file")]
  InvalidPage(PageId),

  /// The page is pinned, so it cannot be disposed or written out.
  #[error("page {0} is pinned")]
  PagePinned(PageId),

  /// Every frame of the buffer pool is pinned.
  #[error("all {0} buffer frames are pinned")]
  NoFreeFrame(usize),

  /// The file header is missing or inconsistent.
  #[error("bad paged file header: {0}")]
  BadHeader(String),
}

/// Result type for the paged-file service.
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration for paged files.
#[derive(Debug, Clone)]
pub struct Config {
  /// Number of page frames in each open file's buffer pool.
  pub buffer_frames: usize,
}

impl Default for Config {
  fn default() -> Self {
    Config { buffer_frames: 40 }
  }
}

#[derive(Debug, Clone, Copy)]
struct FileHeader {
  page_count: u32,
  first_free: PageId,
  dirty: bool,
}

impl FileHeader {
  fn empty() -> Self {
    FileHeader { page_count: 0, first_free: NO_PAGE, dirty: false }
  }

  fn encode(&self) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0..4].copy_from_slice(MAGIC);
    buf[4..8].copy_from_slice(&self.page_count.to_le_bytes());
    buf[8..12].copy_from_slice(&self.first_free.to_le_bytes());
    buf
  }

  fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
    if &buf[0..4] != MAGIC {
      return Err(Error::BadHeader("magic number mismatch".to_string()));
    }
    let page_count = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let first_free = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    if first_free != NO_PAGE && first_free >= page_count {
      return Err(Error::BadHeader(format!("disposed-page list starts at {first_free}, past {page_count} pages")));
    }
    Ok(FileHeader { page_count, first_free, dirty: false })
  }
}

fn block_offset(page_id: PageId) -> u64 {
  (page_id as u64 + 1) * BLOCK_SIZE as u64
}

#[derive(Debug, Default)]
struct Frame {
  page_id: Option<PageId>,
  pin_count: u32,
  dirty: bool,
  referenced: bool,
  link: u32,
}

#[derive(Debug)]
struct Pool {
  frames: Vec<Frame>,
  page_table: collections::HashMap<PageId, usize>,
  free_frames: Vec<usize>,
  clock_hand: usize,
}

impl Pool {
  fn new(size: usize) -> Self {
    Pool {
      frames: (0..size).map(|_| Frame::default()).collect(),
      page_table: collections::HashMap::new(),
      free_frames: (0..size).rev().collect(),
      clock_hand: 0,
    }
  }

  fn install(&mut self, frame: usize, page_id: PageId, link: u32) {
    self.frames[frame] = Frame { page_id: Some(page_id), pin_count: 1, dirty: false, referenced: true, link };
    self.page_table.insert(page_id, frame);
  }

  /// Second-chance clock sweep over unpinned frames.
  fn sweep(&mut self) -> Option<usize> {
    let count = self.frames.len();
    for _ in 0..count * 2 {
      let frame = self.clock_hand;
      self.clock_hand = (self.clock_hand + 1) % count;
      let slot = &mut self.frames[frame];
      if slot.pin_count == 0 {
        if slot.referenced {
          slot.referenced = false;
        } else {
          return Some(frame);
        }
      }
    }
    None
  }
}

/// # An open paged file
///
/// Pages are accessed through [`PageGuard`]s, which keep the page pinned in the buffer pool for as
/// long as they live. Methods take `&self`, so several guards on different pages can be held at
/// once; the pool itself is not thread-safe.
pub struct PagedFile<F: vfs::File> {
  file: cell::RefCell<F>,
  header: cell::Cell<FileHeader>,
  pool: cell::RefCell<Pool>,
  buffers: Box<[cell::RefCell<Box<[u8]>>]>,
}

impl<F: vfs::File> PagedFile<F> {
  fn open(mut file: F, config: &Config) -> Result<Self> {
    if file.size()? < BLOCK_SIZE as u64 {
      return Err(Error::BadHeader("file is shorter than its header block".to_string()));
    }
    let mut buf = [0u8; HEADER_SIZE];
    file.read(0, &mut buf)?;
    let header = FileHeader::decode(&buf)?;
    let buffers =
      (0..config.buffer_frames).map(|_| cell::RefCell::new(vec![0u8; PAGE_SIZE].into_boxed_slice())).collect();
    Ok(PagedFile {
      file: cell::RefCell::new(file),
      header: cell::Cell::new(header),
      pool: cell::RefCell::new(Pool::new(config.buffer_frames)),
      buffers,
    })
  }

  /// Returns the number of pages ever allocated in this file, including disposed ones.
  pub fn page_count(&self) -> u32 {
    self.header.get().page_count
  }

  /// Returns the number of pages currently pinned by live guards.
  pub fn pinned_pages(&self) -> usize {
    self.pool.borrow().frames.iter().filter(|frame| frame.pin_count > 0).count()
  }

  /// Pins the live page `page_id`.
  pub fn get_page(&self, page_id: PageId) -> Result<PageGuard<'_, F>> {
    self.check_range(page_id)?;
    let frame = self.fetch(page_id)?;
    let guard = PageGuard { file: self, page_id, frame };
    let in_use = self.pool.borrow().frames[frame].link == IN_USE;
    if !in_use {
      return Err(Error::InvalidPage(page_id));
    }
    Ok(guard)
  }

  /// Pins the live page with the smallest identifier, if any.
  pub fn first_page(&self) -> Result<Option<PageGuard<'_, F>>> {
    for page_id in 0..self.page_count() {
      let frame = self.fetch(page_id)?;
      let guard = PageGuard { file: self, page_id, frame };
      let in_use = self.pool.borrow().frames[frame].link == IN_USE;
      if in_use {
        return Ok(Some(guard));
      }
    }
    Ok(None)
  }

  /// Allocates a zero-filled page, reusing the most recently disposed page if there is one.
  pub fn allocate_page(&self) -> Result<PageGuard<'_, F>> {
    let mut header = self.header.get();
    let (page_id, frame) = match header.first_free {
      NO_PAGE => {
        let page_id = header.page_count;
        let frame = {
          let mut pool = self.pool.borrow_mut();
          let frame = self.victim(&mut pool)?;
          pool.install(frame, page_id, IN_USE);
          frame
        };
        header.page_count += 1;
        (page_id, frame)
      }
      page_id => {
        let frame = self.fetch(page_id)?;
        let mut pool = self.pool.borrow_mut();
        let slot = &mut pool.frames[frame];
        if slot.link == IN_USE {
          slot.pin_count -= 1;
          return Err(Error::BadHeader(format!("disposed-page list reaches page {page_id}, which is in use")));
        }
        header.first_free = slot.link;
        slot.link = IN_USE;
        (page_id, frame)
      }
    };
    self.pool.borrow_mut().frames[frame].dirty = true;
    self.buffers[frame].borrow_mut().fill(0);
    header.dirty = true;
    self.header.set(header);
    debug!(page_id, "allocated page");
    Ok(PageGuard { file: self, page_id, frame })
  }

  /// Returns the page to the file's disposed-page list. The page must not be pinned.
  pub fn dispose_page(&self, page_id: PageId) -> Result<()> {
    self.check_range(page_id)?;
    let frame = self.fetch(page_id)?;
    let mut pool = self.pool.borrow_mut();
    let slot = &mut pool.frames[frame];
    slot.pin_count -= 1;
    if slot.link != IN_USE {
      return Err(Error::InvalidPage(page_id));
    }
    if slot.pin_count > 0 {
      return Err(Error::PagePinned(page_id));
    }
    let mut header = self.header.get();
    slot.link = header.first_free;
    slot.dirty = true;
    header.first_free = page_id;
    header.dirty = true;
    self.header.set(header);
    debug!(page_id, "disposed page");
    Ok(())
  }

  /// Writes dirty pages to the file and syncs it: only `page` if given, otherwise every cached page
  /// together with the file header. Pages stay cached.
  pub fn force_pages(&self, page: Option<PageId>) -> Result<()> {
    {
      let mut pool = self.pool.borrow_mut();
      for frame in 0..pool.frames.len() {
        let slot = &pool.frames[frame];
        let (page_id, link) = match slot.page_id {
          Some(page_id) if slot.dirty && page.map_or(true, |page| page == page_id) => (page_id, slot.link),
          _ => continue,
        };
        self.write_block(page_id, link, frame)?;
        pool.frames[frame].dirty = false;
      }
    }
    if page.is_none() {
      let mut header = self.header.get();
      if header.dirty {
        self.file.borrow_mut().write(0, &header.encode())?;
        header.dirty = false;
        self.header.set(header);
      }
    }
    self.file.borrow_mut().sync()?;
    Ok(())
  }

  fn close(self) -> Result<()> {
    self.force_pages(None)
  }

  fn check_range(&self, page_id: PageId) -> Result<()> {
    if page_id >= self.page_count() {
      return Err(Error::InvalidPage(page_id));
    }
    Ok(())
  }

  /// Brings `page_id` into a frame and pins it, whether or not the page is live.
  fn fetch(&self, page_id: PageId) -> Result<usize> {
    let mut pool = self.pool.borrow_mut();
    if let Some(&frame) = pool.page_table.get(&page_id) {
      let slot = &mut pool.frames[frame];
      slot.pin_count += 1;
      slot.referenced = true;
      return Ok(frame);
    }
    let frame = self.victim(&mut pool)?;
    let offset = block_offset(page_id);
    let mut link = [0u8; LINK_SIZE];
    let read = {
      let mut file = self.file.borrow_mut();
      let mut buffer = self.buffers[frame].borrow_mut();
      file.read(offset, &mut link).and_then(|()| file.read(offset + LINK_SIZE as u64, &mut buffer[..]))
    };
    if let Err(err) = read {
      pool.free_frames.push(frame);
      return Err(err.into());
    }
    pool.install(frame, page_id, u32::from_le_bytes(link));
    trace!(page_id, frame, "read page");
    Ok(frame)
  }

  /// Finds a frame to load a page into, writing back its current page if dirty.
  fn victim(&self, pool: &mut Pool) -> Result<usize> {
    let frame = match pool.free_frames.pop() {
      Some(frame) => frame,
      None => pool.sweep().ok_or(Error::NoFreeFrame(pool.frames.len()))?,
    };
    if let Some(page_id) = pool.frames[frame].page_id {
      if pool.frames[frame].dirty {
        self.write_block(page_id, pool.frames[frame].link, frame)?;
      }
      pool.page_table.remove(&page_id);
      pool.frames[frame] = Frame::default();
      trace!(page_id, frame, "evicted page");
    }
    Ok(frame)
  }

  fn write_block(&self, page_id: PageId, link: u32, frame: usize) -> Result<()> {
    let buffer = self.buffers[frame].try_borrow().map_err(|_| Error::PagePinned(page_id))?;
    let mut file = self.file.borrow_mut();
    let offset = block_offset(page_id);
    file.write(offset, &link.to_le_bytes())?;
    file.write(offset + LINK_SIZE as u64, &buffer)?;
    Ok(())
  }

  fn mark_dirty(&self, frame: usize) {
    self.pool.borrow_mut().frames[frame].dirty = true;
  }

  fn unpin(&self, frame: usize) {
    let mut pool = self.pool.borrow_mut();
    let slot = &mut pool.frames[frame];
    slot.pin_count = slot.pin_count.saturating_sub(1);
  }
}

/// # A pinned page
///
/// The page stays in the buffer pool while the guard lives; dropping the guard unpins it.
///
/// The page body is borrowed with [`PageGuard::read`] and [`PageGuard::write`], which follow
/// [`std::cell::RefCell`] rules: holding a `write` borrow while borrowing the same page again
/// through another guard panics.
pub struct PageGuard<'a, F: vfs::File> {
  file: &'a PagedFile<F>,
  page_id: PageId,
  frame: usize,
}

impl<F: vfs::File> PageGuard<'_, F> {
  /// Returns the identifier of the pinned page.
  pub fn page_id(&self) -> PageId {
    self.page_id
  }

  /// Borrows the page body.
  pub fn read(&self) -> cell::Ref<'_, [u8]> {
    cell::Ref::map(self.file.buffers[self.frame].borrow(), |buffer| &buffer[..])
  }

  /// Borrows the page body mutably and marks the page dirty.
  pub fn write(&self) -> cell::RefMut<'_, [u8]> {
    self.mark_dirty();
    cell::RefMut::map(self.file.buffers[self.frame].borrow_mut(), |buffer| &mut buffer[..])
  }

  /// Marks the page dirty so that it is written back before leaving the buffer pool.
  pub fn mark_dirty(&self) {
    self.file.mark_dirty(self.frame);
  }
}

impl<F: vfs::File> Drop for PageGuard<'_, F> {
  fn drop(&mut self) {
    self.file.unpin(self.frame);
  }
}

/// # Paged file manager
///
/// Creates, destroys, opens and closes paged files on a [`vfs::FileSystem`].
#[derive(Debug)]
pub struct FileManager<FS: vfs::FileSystem> {
  fs: FS,
  config: Config,
}

impl<FS: vfs::FileSystem> FileManager<FS> {
  /// Creates a manager with the default [`Config`].
  pub fn new(fs: FS) -> Self {
    Self::with_config(fs, Config::default())
  }

  /// Creates a manager whose open files use `config`.
  pub fn with_config(fs: FS, config: Config) -> Self {
    FileManager { fs, config }
  }

  /// Creates an empty paged file. Fails if `path` already exists.
  pub fn create_file(&mut self, path: &path::Path) -> Result<()> {
    let mut file = self.fs.create(path)?;
    if let Err(err) = Self::write_empty_header(&mut file) {
      drop(file);
      if let Err(cleanup) = self.fs.delete(path) {
        warn!(path = %path.display(), %cleanup, "could not remove partially created paged file");
      }
      return Err(err);
    }
    debug!(path = %path.display(), "created paged file");
    Ok(())
  }

  fn write_empty_header<F: vfs::File>(file: &mut F) -> Result<()> {
    let mut block = vec![0u8; BLOCK_SIZE];
    block[..HEADER_SIZE].copy_from_slice(&FileHeader::empty().encode());
    file.try_lock()?;
    let written = file.write(0, &block).and_then(|()| file.sync());
    file.unlock()?;
    Ok(written?)
  }

  /// Deletes the paged file at `path`.
  pub fn destroy_file(&mut self, path: &path::Path) -> Result<()> {
    self.fs.delete(path)?;
    debug!(path = %path.display(), "destroyed paged file");
    Ok(())
  }

  /// Opens the paged file at `path`.
  pub fn open_file(&mut self, path: &path::Path) -> Result<PagedFile<FS::File>> {
    let file = self.fs.open(path)?;
    PagedFile::open(file, &self.config)
  }

  /// Writes back every dirty page of `file` and closes it.
  pub fn close_file(&mut self, file: PagedFile<FS::File>) -> Result<()> {
    file.close()
  }
}
