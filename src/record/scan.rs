//! # File scans
//!
//! Forward scans over the live records of an open file, filtered by comparing one fixed-position
//! attribute of each record against a value.

use std::cmp;

use tracing::trace;

use super::data::{Record, Rid};
use super::error::{Error, Result};
use super::file::FileHandle;
use super::layout::RecordPage;
use crate::storage::vfs;

/// Longest text attribute a scan can compare.
pub const MAX_STRING_LENGTH: usize = 255;

/// Type of a scanned attribute. Integers and floats are 4-byte little-endian values; text is a
/// fixed-length byte string compared lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
  Int,
  Float,
  String,
}

/// Position and type of an attribute within a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
  pub ty: AttrType,
  pub offset: usize,
  pub length: usize,
}

impl Attribute {
  pub fn int(offset: usize) -> Self {
    Attribute { ty: AttrType::Int, offset, length: 4 }
  }

  pub fn float(offset: usize) -> Self {
    Attribute { ty: AttrType::Float, offset, length: 4 }
  }

  pub fn string(offset: usize, length: usize) -> Self {
    Attribute { ty: AttrType::String, offset, length }
  }

  fn check(&self, record_size: usize) -> Result<()> {
    let length_ok = match self.ty {
      AttrType::Int | AttrType::Float => self.length == 4,
      AttrType::String => (1..=MAX_STRING_LENGTH).contains(&self.length),
    };
    let end = self.offset.checked_add(self.length);
    if !length_ok || end.map_or(true, |end| end > record_size) {
      return Err(Error::InvalidAttribute { ty: self.ty, offset: self.offset, length: self.length, record_size });
    }
    Ok(())
  }
}

/// Comparison of a record's attribute (left) against the scan value (right).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
  Eq,
  Lt,
  Gt,
  Le,
  Ge,
  Ne,
  /// Matches every record; the attribute and value are ignored.
  NoOp,
}

impl CompOp {
  /// Applies the operator to the result of comparing attribute and value. `None` stands for
  /// unordered floats, which are only unequal.
  fn holds(self, ordering: Option<cmp::Ordering>) -> bool {
    use cmp::Ordering::*;
    match (self, ordering) {
      (CompOp::NoOp, _) => true,
      (CompOp::Ne, None) => true,
      (_, None) => false,
      (CompOp::Eq, Some(ordering)) => ordering == Equal,
      (CompOp::Lt, Some(ordering)) => ordering == Less,
      (CompOp::Gt, Some(ordering)) => ordering == Greater,
      (CompOp::Le, Some(ordering)) => ordering != Greater,
      (CompOp::Ge, Some(ordering)) => ordering != Less,
      (CompOp::Ne, Some(ordering)) => ordering != Equal,
    }
  }
}

/// Value to compare attributes against.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Int(i32),
  Float(f32),
  String(Vec<u8>),
}

impl Value {
  pub fn ty(&self) -> AttrType {
    match self {
      Value::Int(_) => AttrType::Int,
      Value::Float(_) => AttrType::Float,
      Value::String(_) => AttrType::String,
    }
  }
}

/// Public constructor for [`Value::Int`].
impl From<i32> for Value {
  fn from(value: i32) -> Self {
    Value::Int(value)
  }
}

/// Public constructor for [`Value::Float`].
impl From<f32> for Value {
  fn from(value: f32) -> Self {
    Value::Float(value)
  }
}

/// Public constructor for [`Value::String`].
impl From<&str> for Value {
  fn from(value: &str) -> Self {
    Value::String(value.as_bytes().to_vec())
  }
}

/// Public constructor for [`Value::String`].
impl From<&[u8]> for Value {
  fn from(value: &[u8]) -> Self {
    Value::String(value.to_vec())
  }
}

fn word(field: &[u8]) -> [u8; 4] {
  [field[0], field[1], field[2], field[3]]
}

/// Right-hand side of a comparison, in the attribute's representation.
#[derive(Debug)]
enum Operand {
  All,
  Int(i32),
  Float(f32),
  /// Zero-padded or truncated to the attribute length.
  String(Box<[u8]>),
}

#[derive(Debug)]
struct Predicate {
  attribute: Attribute,
  op: CompOp,
  operand: Operand,
}

impl Predicate {
  fn new(attribute: Attribute, op: CompOp, value: Option<Value>, record_size: usize) -> Result<Self> {
    if op == CompOp::NoOp {
      return Ok(Predicate { attribute, op, operand: Operand::All });
    }
    let value = value.ok_or(Error::MissingComparisonValue(op))?;
    attribute.check(record_size)?;
    let operand = match (attribute.ty, value) {
      (AttrType::Int, Value::Int(value)) => Operand::Int(value),
      (AttrType::Float, Value::Float(value)) => Operand::Float(value),
      (AttrType::String, Value::String(mut value)) => {
        value.resize(attribute.length, 0);
        Operand::String(value.into_boxed_slice())
      }
      (ty, _) => return Err(Error::ValueTypeMismatch(ty)),
    };
    Ok(Predicate { attribute, op, operand })
  }

  fn matches(&self, record: &[u8]) -> bool {
    // Only checked attributes are sliced; a match-all attribute may lie anywhere.
    let Attribute { offset, length, .. } = self.attribute;
    let field = || &record[offset..offset + length];
    let ordering = match &self.operand {
      Operand::All => return true,
      Operand::Int(value) => Some(i32::from_le_bytes(word(field())).cmp(value)),
      Operand::Float(value) => f32::from_le_bytes(word(field())).partial_cmp(value),
      Operand::String(value) => Some(field().cmp(&value[..])),
    };
    self.op.holds(ordering)
  }
}

struct ScanState<'a, F: vfs::File> {
  handle: &'a FileHandle<F>,
  predicate: Predicate,
  /// Virtual page and slot to examine next.
  page: u32,
  slot: usize,
}

/// # File scan
///
/// A scan borrows the [`FileHandle`] it was opened on, so the file cannot be modified or closed
/// while the scan is open. Records come out in order of virtual page, then slot.
///
/// ```ignore
/// let mut scan = FileScan::new();
/// scan.open_scan(&handle, Attribute::int(32), CompOp::Lt, Some(Value::Int(50)))?;
/// while let Some(record) = scan.next_record()? {
///   // ...
/// }
/// scan.close_scan()?;
/// ```
pub struct FileScan<'a, F: vfs::File> {
  state: Option<ScanState<'a, F>>,
}

impl<F: vfs::File> Default for FileScan<'_, F> {
  /// Public constructor for a closed [`FileScan`].
  fn default() -> Self {
    FileScan { state: None }
  }
}

impl<'a, F: vfs::File> FileScan<'a, F> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_open(&self) -> bool {
    self.state.is_some()
  }

  /// Starts a scan of `handle` for records whose `attribute` compares to `value` as `op` says.
  ///
  /// `value` may only be omitted with [`CompOp::NoOp`]. Text values are zero-padded or truncated to
  /// the attribute's length.
  pub fn open_scan(
    &mut self,
    handle: &'a FileHandle<F>,
    attribute: Attribute,
    op: CompOp,
    value: Option<Value>,
  ) -> Result<()> {
    if self.state.is_some() {
      return Err(Error::ScanAlreadyOpen);
    }
    let record_size = handle.record_size()?;
    let predicate = Predicate::new(attribute, op, value, record_size)?;
    trace!(?predicate, "opened scan");
    self.state = Some(ScanState { handle, predicate, page: 0, slot: 0 });
    Ok(())
  }

  /// Returns the next matching record, or `None` once the scan has passed the last page.
  pub fn next_record(&mut self) -> Result<Option<Record>> {
    let state = self.state.as_mut().ok_or(Error::ScanNotOpen)?;
    let handle = state.handle;
    let open = handle.state()?;
    while let Some(&page_id) = open.pages.get(state.page as usize) {
      let guard = open.file.get_page(page_id)?;
      let buf = guard.read();
      let page = RecordPage::new(&buf[..], open.geometry);
      page.validate(page_id)?;

      let mut next = page.first_occupied(state.slot);
      while let Some(slot) = next {
        let data = page.slot(slot);
        if state.predicate.matches(data) {
          let record = Record::new(Rid::new(state.page, slot as u32), data);
          state.slot = slot + 1;
          return Ok(Some(record));
        }
        next = page.next_occupied(slot);
      }
      state.page += 1;
      state.slot = 0;
    }
    Ok(None)
  }

  /// Ends the scan. The scan can then be opened again, from the start.
  pub fn close_scan(&mut self) -> Result<()> {
    self.state.take().ok_or(Error::ScanNotOpen)?;
    Ok(())
  }
}

/// Yields the remaining matches of an open scan; fails with [`Error::ScanNotOpen`] otherwise.
impl<F: vfs::File> Iterator for FileScan<'_, F> {
  type Item = Result<Record>;

  fn next(&mut self) -> Option<Self::Item> {
    self.next_record().transpose()
  }
}
