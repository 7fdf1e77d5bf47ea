#![allow(dead_code)]

use std::collections;
use std::path;
use std::sync;

use recfile::record::{Attribute, CompOp, FileHandle, FileScan, Record, RecordManager, Rid};
use recfile::storage::vfs;

/// Size of the test records: 32 bytes of text (29 used), an integer and a float.
pub const RECORD_SIZE: usize = 40;
pub const TEXT_LENGTH: usize = 29;
pub const INT_OFFSET: usize = 32;
pub const FLOAT_OFFSET: usize = 36;

/// Installs a log subscriber that prints through the test harness.
pub fn init_tracing() {
  static INIT: sync::Once = sync::Once::new();
  INIT.call_once(|| {
    let _ = tracing_subscriber::fmt().with_test_writer().with_max_level(tracing::Level::DEBUG).try_init();
  });
}

/// Builds the test record numbered `i`.
pub fn test_record(i: i32) -> Vec<u8> {
  let mut data = vec![0; RECORD_SIZE];
  let text = format!("a{i}");
  data[..text.len()].copy_from_slice(text.as_bytes());
  data[INT_OFFSET..INT_OFFSET + 4].copy_from_slice(&i.to_le_bytes());
  data[FLOAT_OFFSET..FLOAT_OFFSET + 4].copy_from_slice(&(i as f32).to_le_bytes());
  data
}

/// Reads back the number of a test record.
pub fn record_number(data: &[u8]) -> i32 {
  i32::from_le_bytes([data[INT_OFFSET], data[INT_OFFSET + 1], data[INT_OFFSET + 2], data[INT_OFFSET + 3]])
}

pub fn memory_manager() -> RecordManager<vfs::MemoryFileSystem> {
  init_tracing();
  RecordManager::new(vfs::MemoryFileSystem::default())
}

pub fn create_and_open<FS: vfs::FileSystem>(
  rm: &mut RecordManager<FS>,
  path: &path::Path,
  record_size: usize,
) -> FileHandle<FS::File> {
  rm.create_file(path, record_size).unwrap();
  let mut handle = FileHandle::new();
  rm.open_file(path, &mut handle).unwrap();
  handle
}

/// Returns every live record, in scan order.
pub fn scan_all<F: vfs::File>(handle: &FileHandle<F>) -> Vec<Record> {
  let mut scan = FileScan::new();
  scan.open_scan(handle, Attribute::int(0), CompOp::NoOp, None).unwrap();
  let records = scan.by_ref().collect::<Result<Vec<_>, _>>().unwrap();
  scan.close_scan().unwrap();
  records
}

/// Returns the identifiers of every live record, found slot by slot through `get_record`.
pub fn live_rids<F: vfs::File>(handle: &FileHandle<F>) -> collections::BTreeSet<Rid> {
  let per_page = handle.records_per_page().unwrap() as u32;
  let mut rids = collections::BTreeSet::new();
  for page in 0..handle.page_count().unwrap() {
    for slot in 0..per_page {
      let rid = Rid::new(page, slot);
      if handle.get_record(rid).is_ok() {
        rids.insert(rid);
      }
    }
  }
  rids
}

/// Checks that the free-page queue holds exactly the pages with a free slot, each once.
pub fn assert_free_queue_consistent<F: vfs::File>(handle: &FileHandle<F>) {
  let per_page = handle.records_per_page().unwrap();
  let queue = handle.free_pages().unwrap();
  let queued: collections::BTreeSet<u32> = queue.iter().copied().collect();
  assert_eq!(queued.len(), queue.len(), "free-page queue has duplicates: {queue:?}");

  let mut live_per_page = vec![0; handle.page_count().unwrap() as usize];
  for rid in live_rids(handle) {
    live_per_page[rid.page() as usize] += 1;
  }
  for (page, &live) in live_per_page.iter().enumerate() {
    assert_eq!(queued.contains(&(page as u32)), live < per_page, "page {page} holds {live} of {per_page}");
  }
}
