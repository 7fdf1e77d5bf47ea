//! # recfile
//!
//! A fixed-length record store built on top of a paged file.
//!
//! The crate is layered bottom-up:
//!
//! - [`storage::vfs`] abstracts the operating system's files.
//! - [`storage::paging`] turns a file into fixed-size pages cached in a pinned buffer pool.
//! - [`record`] lays fixed-size records out on those pages, addresses them by [`record::Rid`], and
//!   scans them with simple comparison predicates.

pub mod storage {
  pub mod paging;
  pub mod vfs;
}

pub mod record {
  pub mod bitmap;
  pub mod data;
  mod directory;
  pub mod error;
  pub mod file;
  pub mod layout;
  pub mod manager;
  pub mod scan;

  pub use data::{Record, Rid};
  pub use error::{Error, Result};
  pub use file::FileHandle;
  pub use manager::RecordManager;
  pub use scan::{AttrType, Attribute, CompOp, FileScan, Value};
}
