//! # Directory chains
//!
//! The page list and the free-page queue each keep their first entries inline in the header page
//! and the rest in a chain of directory pages. The two chains are independent.

use std::collections;

use tracing::debug;

use super::error::{Error, Result};
use super::layout::{DirectoryPage, DIRECTORY_CAPACITY, END_OF_CHAIN};
use crate::storage::paging::{PageId, PagedFile};
use crate::storage::vfs;

fn read_directory<F: vfs::File>(file: &PagedFile<F>, page_id: PageId) -> Result<DirectoryPage> {
  let guard = file.get_page(page_id)?;
  let buf = guard.read();
  DirectoryPage::decode(page_id, &buf)
}

/// Returns the pages of the chain starting at `head`, in chain order.
fn chain_pages<F: vfs::File>(file: &PagedFile<F>, head: PageId) -> Result<Vec<PageId>> {
  let mut pages = Vec::new();
  let mut seen = collections::HashSet::new();
  let mut next = head;
  while next != END_OF_CHAIN {
    if !seen.insert(next) {
      return Err(Error::corrupt(next, "directory chain loops back to this page"));
    }
    pages.push(next);
    next = read_directory(file, next)?.next;
  }
  Ok(pages)
}

/// Reads a list of `total` entries: the `inline` prefix followed by the chain starting at `head`.
pub fn read_list<F: vfs::File>(file: &PagedFile<F>, inline: &[u32], head: PageId, total: usize) -> Result<Vec<u32>> {
  let mut entries = Vec::with_capacity(total);
  entries.extend_from_slice(inline);
  let mut seen = collections::HashSet::new();
  let mut next = head;
  while next != END_OF_CHAIN {
    if !seen.insert(next) {
      return Err(Error::corrupt(next, "directory chain loops back to this page"));
    }
    let page = read_directory(file, next)?;
    entries.extend_from_slice(&page.entries);
    if entries.len() > total {
      return Err(Error::corrupt(next, format!("list holds more than the recorded {total} entries")));
    }
    if page.next == END_OF_CHAIN && entries.len() < total {
      return Err(Error::corrupt(next, format!("list ends after {} of {total} entries", entries.len())));
    }
    next = page.next;
  }
  Ok(entries)
}

/// Stores `entries` in a chain of directory pages and returns its head, or [`END_OF_CHAIN`] if
/// `entries` is empty.
///
/// Pages of the chain at `old_head` are reused in order; pages beyond the new length are disposed.
pub fn write_list<F: vfs::File>(file: &PagedFile<F>, entries: &[u32], old_head: PageId) -> Result<PageId> {
  let mut pages = chain_pages(file, old_head)?;
  let needed = entries.len().div_ceil(DIRECTORY_CAPACITY);

  if pages.len() > needed {
    debug!(from = pages.len(), to = needed, "truncating directory chain");
    for page_id in pages.split_off(needed) {
      file.dispose_page(page_id)?;
    }
  } else if pages.len() < needed {
    debug!(from = pages.len(), to = needed, "growing directory chain");
    while pages.len() < needed {
      pages.push(file.allocate_page()?.page_id());
    }
  }

  for (i, chunk) in entries.chunks(DIRECTORY_CAPACITY).enumerate() {
    let next = pages.get(i + 1).copied().unwrap_or(END_OF_CHAIN);
    let guard = file.get_page(pages[i])?;
    DirectoryPage { entries: chunk.to_vec(), next }.encode(&mut guard.write());
  }
  Ok(pages.first().copied().unwrap_or(END_OF_CHAIN))
}
