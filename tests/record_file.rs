mod common;

use std::collections;
use std::path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use recfile::record::{Error, Rid};

use common::*;

#[test]
fn test_insert_then_get_returns_the_bytes() {
  let mut rm = memory_manager();
  let mut rng = StdRng::seed_from_u64(0x5EED);
  for record_size in [4, 7, RECORD_SIZE, 400, 3964] {
    let path = path::PathBuf::from(format!("rel{record_size}"));
    let mut handle = create_and_open(&mut rm, &path, record_size);
    let inserted: Vec<(Rid, Vec<u8>)> = (0..300)
      .map(|_| {
        let data: Vec<u8> = (0..record_size).map(|_| rng.gen()).collect();
        (handle.insert_record(&data).unwrap(), data)
      })
      .collect();
    for (rid, data) in &inserted {
      let record = handle.get_record(*rid).unwrap();
      assert_eq!(record.rid(), *rid);
      assert_eq!(record.data(), &data[..], "record {rid} of size {record_size}");
    }
    rm.close_file(&mut handle).unwrap();
  }
}

#[test]
fn test_update_twice_equals_update_once() {
  let mut rm = memory_manager();
  let mut handle = create_and_open(&mut rm, path::Path::new("rel"), RECORD_SIZE);
  let rids: Vec<Rid> = (0..5).map(|i| handle.insert_record(&test_record(i)).unwrap()).collect();

  let mut record = handle.get_record(rids[2]).unwrap();
  record.data_mut().copy_from_slice(&test_record(42));
  handle.update_record(&record).unwrap();
  let once = handle.get_record(rids[2]).unwrap();
  handle.update_record(&record).unwrap();
  assert_eq!(handle.get_record(rids[2]).unwrap(), once);
  assert_eq!(record_number(once.data()), 42);

  // Neighbours are untouched.
  for (i, &rid) in rids.iter().enumerate().filter(|(i, _)| *i != 2) {
    assert_eq!(handle.get_record(rid).unwrap().data(), &test_record(i as i32)[..]);
  }
}

#[test]
fn test_deleted_record_is_gone_and_others_survive() {
  let mut rm = memory_manager();
  let mut handle = create_and_open(&mut rm, path::Path::new("rel"), RECORD_SIZE);
  let rids: Vec<Rid> = (0..250).map(|i| handle.insert_record(&test_record(i)).unwrap()).collect();

  for &rid in rids.iter().step_by(3) {
    handle.delete_record(rid).unwrap();
    assert!(matches!(handle.get_record(rid), Err(Error::RecordNotFound(r)) if r == rid));
  }
  for (i, &rid) in rids.iter().enumerate() {
    match handle.get_record(rid) {
      Ok(record) => {
        assert_ne!(i % 3, 0);
        assert_eq!(record_number(record.data()), i as i32);
      }
      Err(Error::RecordNotFound(_)) => assert_eq!(i % 3, 0),
      Err(err) => panic!("unexpected error: {err}"),
    }
  }
}

#[test]
fn test_live_set_matches_inserts_minus_deletes() {
  let mut rm = memory_manager();
  let mut handle = create_and_open(&mut rm, path::Path::new("rel"), 400);
  let mut rng = StdRng::seed_from_u64(7);
  let mut live = collections::BTreeSet::new();

  for step in 0..2000 {
    if live.is_empty() || rng.gen_bool(0.6) {
      let rid = handle.insert_record(&[step as u8; 400]).unwrap();
      assert!(live.insert(rid), "{rid} handed out twice");
    } else {
      let victim = *live.iter().nth(rng.gen_range(0..live.len())).unwrap();
      handle.delete_record(victim).unwrap();
      live.remove(&victim);
    }
    if step % 250 == 0 {
      assert_free_queue_consistent(&handle);
    }
  }

  assert_eq!(live_rids(&handle), live);
  assert_free_queue_consistent(&handle);
  let scanned: collections::BTreeSet<Rid> = scan_all(&handle).iter().map(|record| record.rid()).collect();
  assert_eq!(scanned, live);
}

#[test]
fn test_freed_pages_are_reused_before_growing() {
  let mut rm = memory_manager();
  let mut handle = create_and_open(&mut rm, path::Path::new("rel"), 400);
  let per_page = handle.records_per_page().unwrap() as i32;
  assert_eq!(per_page, 9);

  // Three full pages and one record on a fourth.
  let rids: Vec<Rid> = (0..3 * per_page + 1).map(|i| handle.insert_record(&test_record_sized(i)).unwrap()).collect();
  assert_eq!(handle.page_count().unwrap(), 4);
  assert_eq!(handle.free_pages().unwrap(), vec![3]);

  for &rid in &rids[..per_page as usize] {
    handle.delete_record(rid).unwrap();
  }
  assert_eq!(handle.free_pages().unwrap(), vec![3, 0]);
  assert_free_queue_consistent(&handle);

  // The oldest page with room fills first, then the freed page; no page is allocated.
  for i in 0..8 {
    assert_eq!(handle.insert_record(&test_record_sized(100 + i)).unwrap(), Rid::new(3, 1 + i as u32));
  }
  for i in 0..9 {
    assert_eq!(handle.insert_record(&test_record_sized(200 + i)).unwrap(), Rid::new(0, i as u32));
  }
  assert_eq!(handle.page_count().unwrap(), 4);
  assert!(handle.free_pages().unwrap().is_empty());

  assert_eq!(handle.insert_record(&test_record_sized(300)).unwrap(), Rid::new(4, 0));
  assert_free_queue_consistent(&handle);
}

fn test_record_sized(i: i32) -> Vec<u8> {
  let mut data = test_record(i);
  data.resize(400, 0);
  data
}

#[test]
fn test_closed_handle_fails_every_operation() {
  let mut rm = memory_manager();
  let path = path::Path::new("rel");
  let mut handle = create_and_open(&mut rm, path, RECORD_SIZE);
  let rid = handle.insert_record(&test_record(1)).unwrap();
  let record = handle.get_record(rid).unwrap();
  rm.close_file(&mut handle).unwrap();

  assert!(matches!(handle.get_record(rid), Err(Error::FileNotOpen)));
  assert!(matches!(handle.insert_record(&test_record(2)), Err(Error::FileNotOpen)));
  assert!(matches!(handle.update_record(&record), Err(Error::FileNotOpen)));
  assert!(matches!(handle.delete_record(rid), Err(Error::FileNotOpen)));
  assert!(matches!(handle.force_pages(None), Err(Error::FileNotOpen)));
}
