//! # Page layouts
//!
//! Byte layouts of the three kinds of pages in a record file. Every integer is a little-endian
//! 32-bit value and every layout fills exactly one [`PAGE_SIZE`]-byte page.
//!
//! ## Header page
//!
//! The first page of the file.
//!
//! | offset        | size  | field                                       |
//! |---------------|-------|---------------------------------------------|
//! | 0             | 4     | record size                                 |
//! | 4             | 4     | total number of record pages                |
//! | 8             | 4     | page-list entries stored inline             |
//! | 12            | 4     | first page-list directory page, or END      |
//! | 16            | 4     | total number of pages with free slots       |
//! | 20            | 4     | free-list entries stored inline             |
//! | 24            | 4     | first free-list directory page, or END      |
//! | 28            | 4 × K | inline page list (physical page ids)        |
//! | 28 + 4 × K    | 4 × K | inline free list (virtual page indices)     |
//!
//! with `K = ` [`HEADER_LIST_CAPACITY`].
//!
//! ## Directory page
//!
//! Overflow node of either list: entry count, next directory page (or END), then up to
//! [`DIRECTORY_CAPACITY`] entries.
//!
//! ## Record page
//!
//! A fixed [`MAX_BITMAP_SIZE`]-byte occupancy bitmap followed by the slot array.

use super::bitmap;
use super::error::{Error, Result};
use crate::storage::paging::{self, PageId, PAGE_SIZE};

/// Terminator of directory chains.
pub const END_OF_CHAIN: PageId = paging::NO_PAGE;

const HEADER_FIELDS_SIZE: usize = 28;

/// Number of entries of each list stored inline in the header page.
pub const HEADER_LIST_CAPACITY: usize = (PAGE_SIZE - HEADER_FIELDS_SIZE) / 2 / 4;

const DIRECTORY_FIELDS_SIZE: usize = 8;

/// Number of entries stored in one directory page.
pub const DIRECTORY_CAPACITY: usize = (PAGE_SIZE - DIRECTORY_FIELDS_SIZE) / 4;

/// Size of the bitmap region at the start of every record page.
pub const MAX_BITMAP_SIZE: usize = 128;

pub const MIN_RECORD_SIZE: usize = 4;

pub const MAX_RECORD_SIZE: usize = PAGE_SIZE - MAX_BITMAP_SIZE;

// The smallest records give the most slots per page; their bitmap must still fit.
const _: () = assert!((MAX_RECORD_SIZE / MIN_RECORD_SIZE).div_ceil(8) <= MAX_BITMAP_SIZE);

fn get_u32(buf: &[u8], offset: usize) -> u32 {
  u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
  buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_u32s(buf: &[u8], offset: usize, count: usize) -> Vec<u32> {
  (0..count).map(|i| get_u32(buf, offset + 4 * i)).collect()
}

fn put_u32s(buf: &mut [u8], offset: usize, values: &[u32]) {
  for (i, &value) in values.iter().enumerate() {
    put_u32(buf, offset + 4 * i, value);
  }
}

/// # Record page geometry
///
/// Slot capacity and bitmap size derived from a file's record size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
  record_size: usize,
  records_per_page: usize,
  bitmap_size: usize,
}

impl Geometry {
  /// Fails if `record_size` is outside `MIN_RECORD_SIZE..=MAX_RECORD_SIZE`.
  pub fn new(record_size: usize) -> Result<Self> {
    if !(MIN_RECORD_SIZE..=MAX_RECORD_SIZE).contains(&record_size) {
      return Err(Error::InvalidRecordSize { size: record_size, min: MIN_RECORD_SIZE, max: MAX_RECORD_SIZE });
    }
    let records_per_page = MAX_RECORD_SIZE / record_size;
    Ok(Geometry { record_size, records_per_page, bitmap_size: records_per_page.div_ceil(8) })
  }

  pub fn record_size(&self) -> usize {
    self.record_size
  }

  pub fn records_per_page(&self) -> usize {
    self.records_per_page
  }

  /// Number of bitmap bytes in use; the rest of the bitmap region stays zero.
  pub fn bitmap_size(&self) -> usize {
    self.bitmap_size
  }
}

/// # Header page
///
/// The inline lists hold at most [`HEADER_LIST_CAPACITY`] entries each; the remainder of each list
/// continues in its own chain of [`DirectoryPage`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPage {
  pub record_size: u32,
  pub page_count: u32,
  pub pages: Vec<PageId>,
  pub pages_next: PageId,
  pub free_count: u32,
  pub free_pages: Vec<u32>,
  pub free_next: PageId,
}

impl HeaderPage {
  /// Header of a file without record pages.
  pub fn new(record_size: u32) -> Self {
    HeaderPage {
      record_size,
      page_count: 0,
      pages: Vec::new(),
      pages_next: END_OF_CHAIN,
      free_count: 0,
      free_pages: Vec::new(),
      free_next: END_OF_CHAIN,
    }
  }

  pub fn decode(page_id: PageId, buf: &[u8]) -> Result<Self> {
    let record_size = get_u32(buf, 0);
    Geometry::new(record_size as usize)
      .map_err(|_| Error::corrupt(page_id, format!("record size {record_size} out of range")))?;

    let page_count = get_u32(buf, 4);
    let pages_inline = get_u32(buf, 8);
    let pages_next = get_u32(buf, 12);
    check_inline_list(page_id, "page", page_count, pages_inline, pages_next)?;

    let free_count = get_u32(buf, 16);
    let free_inline = get_u32(buf, 20);
    let free_next = get_u32(buf, 24);
    check_inline_list(page_id, "free", free_count, free_inline, free_next)?;
    if free_count > page_count {
      return Err(Error::corrupt(page_id, format!("{free_count} pages with free slots out of {page_count}")));
    }

    let pages = get_u32s(buf, HEADER_FIELDS_SIZE, pages_inline as usize);
    let free_pages = get_u32s(buf, HEADER_FIELDS_SIZE + 4 * HEADER_LIST_CAPACITY, free_inline as usize);
    Ok(HeaderPage { record_size, page_count, pages, pages_next, free_count, free_pages, free_next })
  }

  pub fn encode(&self, buf: &mut [u8]) {
    debug_assert!(self.pages.len() <= HEADER_LIST_CAPACITY && self.free_pages.len() <= HEADER_LIST_CAPACITY);
    buf[..PAGE_SIZE].fill(0);
    put_u32(buf, 0, self.record_size);
    put_u32(buf, 4, self.page_count);
    put_u32(buf, 8, self.pages.len() as u32);
    put_u32(buf, 12, self.pages_next);
    put_u32(buf, 16, self.free_count);
    put_u32(buf, 20, self.free_pages.len() as u32);
    put_u32(buf, 24, self.free_next);
    put_u32s(buf, HEADER_FIELDS_SIZE, &self.pages);
    put_u32s(buf, HEADER_FIELDS_SIZE + 4 * HEADER_LIST_CAPACITY, &self.free_pages);
  }
}

/// A list stores `min(total, K)` entries inline, and continues in a chain exactly when it has more.
fn check_inline_list(page_id: PageId, list: &str, total: u32, inline: u32, next: PageId) -> Result<()> {
  let expected = (total as usize).min(HEADER_LIST_CAPACITY);
  if inline as usize != expected {
    return Err(Error::corrupt(page_id, format!("{list} list stores {inline} of {total} entries inline")));
  }
  if (total as usize > HEADER_LIST_CAPACITY) != (next != END_OF_CHAIN) {
    return Err(Error::corrupt(page_id, format!("{list} list of {total} entries has overflow pointer {next}")));
  }
  Ok(())
}

/// # Directory page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryPage {
  pub entries: Vec<u32>,
  pub next: PageId,
}

impl DirectoryPage {
  pub fn decode(page_id: PageId, buf: &[u8]) -> Result<Self> {
    let count = get_u32(buf, 0) as usize;
    if count == 0 || count > DIRECTORY_CAPACITY {
      return Err(Error::corrupt(page_id, format!("directory page holds {count} entries")));
    }
    let next = get_u32(buf, 4);
    Ok(DirectoryPage { entries: get_u32s(buf, DIRECTORY_FIELDS_SIZE, count), next })
  }

  pub fn encode(&self, buf: &mut [u8]) {
    debug_assert!(!self.entries.is_empty() && self.entries.len() <= DIRECTORY_CAPACITY);
    buf[..PAGE_SIZE].fill(0);
    put_u32(buf, 0, self.entries.len() as u32);
    put_u32(buf, 4, self.next);
    put_u32s(buf, DIRECTORY_FIELDS_SIZE, &self.entries);
  }
}

/// # Record page
///
/// A view of a pinned page's bytes as a record page. `B` is `&[u8]` for reading and `&mut [u8]`
/// for writing; the view lives no longer than the borrow of the page.
pub struct RecordPage<B> {
  buf: B,
  geometry: Geometry,
}

impl<B: AsRef<[u8]>> RecordPage<B> {
  pub fn new(buf: B, geometry: Geometry) -> Self {
    debug_assert!(buf.as_ref().len() >= PAGE_SIZE);
    RecordPage { buf, geometry }
  }

  /// Rejects bitmaps with slots marked live beyond the page's capacity.
  pub fn validate(&self, page_id: PageId) -> Result<()> {
    let capacity = self.geometry.records_per_page;
    let region = &self.buf.as_ref()[..MAX_BITMAP_SIZE];
    match bitmap::next_occupied(region, capacity - 1) {
      Some(slot) => Err(Error::corrupt(page_id, format!("slot {slot} is live but the page holds {capacity}"))),
      None => Ok(()),
    }
  }

  fn bitmap(&self) -> &[u8] {
    &self.buf.as_ref()[..self.geometry.bitmap_size]
  }

  pub fn is_occupied(&self, slot: usize) -> bool {
    bitmap::is_occupied(self.bitmap(), slot)
  }

  pub fn first_free(&self, start: usize) -> Option<usize> {
    bitmap::first_free(self.bitmap(), self.geometry.records_per_page, start)
  }

  pub fn is_full(&self) -> bool {
    self.first_free(0).is_none()
  }

  /// Returns the first live slot at or after `start`.
  pub fn first_occupied(&self, start: usize) -> Option<usize> {
    bitmap::first_occupied(self.bitmap(), start).filter(|&slot| slot < self.geometry.records_per_page)
  }

  /// Returns the first live slot after `after`.
  pub fn next_occupied(&self, after: usize) -> Option<usize> {
    bitmap::next_occupied(self.bitmap(), after).filter(|&slot| slot < self.geometry.records_per_page)
  }

  pub fn slot(&self, slot: usize) -> &[u8] {
    let offset = MAX_BITMAP_SIZE + slot * self.geometry.record_size;
    &self.buf.as_ref()[offset..offset + self.geometry.record_size]
  }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> RecordPage<B> {
  /// Clears the bitmap so that every slot is free.
  pub fn init(&mut self) {
    self.buf.as_mut()[..MAX_BITMAP_SIZE].fill(0);
  }

  pub fn claim(&mut self, slot: usize) {
    let size = self.geometry.bitmap_size;
    bitmap::claim(&mut self.buf.as_mut()[..size], slot);
  }

  pub fn release(&mut self, slot: usize) {
    let size = self.geometry.bitmap_size;
    bitmap::release(&mut self.buf.as_mut()[..size], slot);
  }

  pub fn slot_mut(&mut self, slot: usize) -> &mut [u8] {
    let offset = MAX_BITMAP_SIZE + slot * self.geometry.record_size;
    let size = self.geometry.record_size;
    &mut self.buf.as_mut()[offset..offset + size]
  }
}
