//! # Slot allocator
//!
//! Operations over a record page's occupancy bitmap. Bit `i` lives in byte `i / 8` at position
//! `i % 8` (least significant bit first); a set bit means slot `i` holds a live record.

/// Returns whether `slot` holds a live record.
pub fn is_occupied(bitmap: &[u8], slot: usize) -> bool {
  (bitmap[slot / 8] >> (slot % 8)) & 1 == 1
}

/// Marks `slot` as holding a live record. The slot must be free.
pub fn claim(bitmap: &mut [u8], slot: usize) {
  debug_assert!(!is_occupied(bitmap, slot), "slot {slot} claimed twice");
  bitmap[slot / 8] |= 1 << (slot % 8);
}

/// Marks `slot` as free.
pub fn release(bitmap: &mut [u8], slot: usize) {
  bitmap[slot / 8] &= !(1 << (slot % 8));
}

/// Returns the first free slot at or after `start` and below `capacity`.
///
/// Full bytes are skipped whole before searching bit by bit.
pub fn first_free(bitmap: &[u8], capacity: usize, start: usize) -> Option<usize> {
  let end = capacity.div_ceil(8).min(bitmap.len());
  let mut byte = start / 8;
  if start >= capacity || byte >= end {
    return None;
  }
  // The first byte may be partially before `start`; treat those bits as taken.
  let mut bits = bitmap[byte] | ((1u8 << (start % 8)) - 1);
  loop {
    if bits != 0xFF {
      let slot = byte * 8 + bits.trailing_ones() as usize;
      return (slot < capacity).then_some(slot);
    }
    byte += 1;
    if byte >= end {
      return None;
    }
    bits = bitmap[byte];
  }
}

/// Returns the first live slot strictly after `after` within the bitmap.
///
/// The result may lie beyond the page's slot capacity only if the bitmap has stray bits set;
/// callers compare against the capacity and move on to the next page.
pub fn next_occupied(bitmap: &[u8], after: usize) -> Option<usize> {
  let start = after + 1;
  let mut byte = start / 8;
  if byte >= bitmap.len() {
    return None;
  }
  let mut bits = bitmap[byte] & !((1u8 << (start % 8)) - 1);
  loop {
    if bits != 0 {
      return Some(byte * 8 + bits.trailing_zeros() as usize);
    }
    byte += 1;
    if byte >= bitmap.len() {
      return None;
    }
    bits = bitmap[byte];
  }
}

/// Returns the first live slot at or after `start`.
pub fn first_occupied(bitmap: &[u8], start: usize) -> Option<usize> {
  match start {
    0 if bitmap.first().is_some_and(|&b| b & 1 == 1) => Some(0),
    0 => next_occupied(bitmap, 0),
    start => next_occupied(bitmap, start - 1),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_claim_release() {
    let mut bitmap = [0u8; 4];
    claim(&mut bitmap, 0);
    claim(&mut bitmap, 9);
    claim(&mut bitmap, 31);
    assert_eq!(bitmap, [0b0000_0001, 0b0000_0010, 0, 0b1000_0000]);
    assert!(is_occupied(&bitmap, 9));
    assert!(!is_occupied(&bitmap, 8));

    release(&mut bitmap, 9);
    assert!(!is_occupied(&bitmap, 9));
    assert_eq!(bitmap, [0b0000_0001, 0, 0, 0b1000_0000]);
  }

  #[test]
  fn test_first_free() {
    let mut bitmap = [0xFF, 0xFF, 0b0000_0111, 0];
    assert_eq!(first_free(&bitmap, 32, 0), Some(19));
    assert_eq!(first_free(&bitmap, 32, 20), Some(20));
    assert_eq!(first_free(&bitmap, 19, 0), None);

    // A free bit before `start` is not reported.
    release(&mut bitmap, 3);
    assert_eq!(first_free(&bitmap, 32, 0), Some(3));
    assert_eq!(first_free(&bitmap, 32, 4), Some(19));
  }

  #[test]
  fn test_first_free_respects_capacity() {
    // Capacity 10: slots 0..=9, all taken; the rest of byte 1 is unused.
    let bitmap = [0xFF, 0b0000_0011];
    assert_eq!(first_free(&bitmap, 10, 0), None);
    assert_eq!(first_free(&bitmap, 11, 0), Some(10));
    assert_eq!(first_free(&bitmap, 10, 10), None);
  }

  #[test]
  fn test_next_occupied() {
    let bitmap = [0b1000_0001, 0, 0b0001_0000];
    assert_eq!(next_occupied(&bitmap, 0), Some(7));
    assert_eq!(next_occupied(&bitmap, 7), Some(20));
    assert_eq!(next_occupied(&bitmap, 20), None);
    assert_eq!(next_occupied(&bitmap, 23), None);
    assert_eq!(next_occupied(&bitmap, 100), None);
  }

  #[test]
  fn test_first_occupied() {
    let bitmap = [0b1000_0001, 0, 0b0001_0000];
    assert_eq!(first_occupied(&bitmap, 0), Some(0));
    assert_eq!(first_occupied(&bitmap, 1), Some(7));
    assert_eq!(first_occupied(&bitmap, 7), Some(7));
    assert_eq!(first_occupied(&bitmap, 8), Some(20));
    assert_eq!(first_occupied(&[0, 0], 0), None);
  }

  #[test]
  fn test_agrees_with_bit_by_bit_scan() {
    let bitmap = [0b1011_0110, 0xFF, 0b0100_0000, 0b1111_1110];
    for start in 0..32 {
      let expected = (start..30).find(|&slot| !is_occupied(&bitmap, slot));
      assert_eq!(first_free(&bitmap, 30, start), expected, "start {start}");
      let expected = (start + 1..32).find(|&slot| is_occupied(&bitmap, slot));
      assert_eq!(next_occupied(&bitmap, start), expected, "after {start}");
    }
  }
}
