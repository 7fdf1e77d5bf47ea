//! Record identifiers and owned record buffers.

use std::fmt;

/// # Record identifier
///
/// Addresses a record by its *virtual* page, a stable index into the file's list of record pages,
/// and its slot within that page.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
  page: u32,
  slot: u32,
}

impl Rid {
  pub fn new(page: u32, slot: u32) -> Self {
    Rid { page, slot }
  }

  /// Returns the virtual page index.
  pub fn page(&self) -> u32 {
    self.page
  }

  pub fn slot(&self) -> u32 {
    self.slot
  }
}

impl fmt::Display for Rid {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "({}, {})", self.page, self.slot)
  }
}

/// # Record
///
/// A copy of one record's bytes together with the [`Rid`] it was read from. Modify the bytes with
/// [`Record::data_mut`] and write them back with [`FileHandle::update_record`].
///
/// [`FileHandle::update_record`]: super::FileHandle::update_record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
  rid: Rid,
  data: Box<[u8]>,
}

impl Record {
  pub fn new(rid: Rid, data: impl Into<Box<[u8]>>) -> Self {
    Record { rid, data: data.into() }
  }

  pub fn rid(&self) -> Rid {
    self.rid
  }

  pub fn data(&self) -> &[u8] {
    &self.data
  }

  pub fn data_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }

  pub fn into_data(self) -> Box<[u8]> {
    self.data
  }
}
