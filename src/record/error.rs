//! Error types for the record manager.

use std::path;

use thiserror::Error;

use super::data::Rid;
use super::scan::{AttrType, CompOp};
use crate::storage::paging;

/// Result type for record manager operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing record files.
#[derive(Debug, Error)]
pub enum Error {
  /// Record size outside what a record page can hold.
  #[error("record size {size} is outside the supported range {min}..={max}")]
  InvalidRecordSize { size: usize, min: usize, max: usize },

  /// The file still has open handles.
  #[error("cannot destroy {}: the file is still open", .path.display())]
  DestroyWhileOpen { path: path::PathBuf },

  /// Opening a file with a handle that already has a file open.
  #[error("file handle is already open")]
  HandleAlreadyOpen,

  /// Closing a handle that is not open.
  #[error("file handle is already closed")]
  HandleAlreadyClosed,

  /// Record operation on a handle that is not open.
  #[error("file handle is not open")]
  FileNotOpen,

  /// The identifier is out of range or names a free slot.
  #[error("record {0} does not exist")]
  RecordNotFound(Rid),

  /// Record bytes of the wrong length for this file.
  #[error("record length {actual} does not match the file's record size {expected}")]
  RecordSizeMismatch { expected: usize, actual: usize },

  /// Reading from a scan that is not open.
  #[error("file scan is not open")]
  ScanNotOpen,

  /// Opening a scan that is already open.
  #[error("file scan is already open")]
  ScanAlreadyOpen,

  /// A comparison operator other than [`CompOp::NoOp`] without a value.
  #[error("comparison {0:?} needs a value to compare against")]
  MissingComparisonValue(CompOp),

  /// Scan attribute with an unsupported length or lying outside the record.
  #[error("{ty:?} attribute of length {length} at offset {offset} does not fit a {record_size}-byte record")]
  InvalidAttribute { ty: AttrType, offset: usize, length: usize, record_size: usize },

  /// Comparison value of a different type than the scanned attribute.
  #[error("comparison value does not match attribute type {0:?}")]
  ValueTypeMismatch(AttrType),

  /// A header, directory or record page failed validation.
  #[error("corrupt page {page_id}: {reason}")]
  Corrupt { page_id: paging::PageId, reason: String },

  /// Error from the paged-file service.
  #[error(transparent)]
  Storage(#[from] paging::Error),
}

impl Error {
  pub(crate) fn corrupt(page_id: paging::PageId, reason: impl Into<String>) -> Self {
    Error::Corrupt { page_id, reason: reason.into() }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_messages() {
    assert_eq!(Error::RecordNotFound(Rid::new(1, 2)).to_string(), "record (1, 2) does not exist");
    assert_eq!(
      Error::DestroyWhileOpen { path: "rel".into() }.to_string(),
      "cannot destroy rel: the file is still open"
    );
  }

  #[test]
  fn test_storage_errors_pass_through() {
    let inner = paging::Error::InvalidPage(4);
    let message = inner.to_string();
    let err = Error::from(inner);
    assert_eq!(err.to_string(), message);
    assert!(matches!(err, Error::Storage(paging::Error::InvalidPage(4))));
  }
}
