#![forbid(unsafe_code)]

//! Shorthands for pulling fixed-size pieces off the front of a byte slice.

/// Splits `N` bytes off the front as an array, if there are at least `N`.
#[inline]
#[must_use]
pub fn try_split_off_byte_array<const N: usize>(bytes: &[u8]) -> Option<([u8; N], &[u8])> {
  if bytes.len() >= N {
    let (head, tail) = bytes.split_at(N);
    let a: [u8; N] = head.try_into().ok()?;
    Some((a, tail))
  } else {
    None
  }
}

/// Moves as many bytes as fit from the front of `input` into `buf[*filled..]`.
///
/// Returns `true` once `buf` is full.
#[inline]
pub fn fill_from(buf: &mut [u8], filled: &mut usize, input: &mut &[u8]) -> bool {
  let want = buf.len() - *filled;
  let take = want.min(input.len());
  let (head, tail) = input.split_at(take);
  buf[*filled..*filled + take].copy_from_slice(head);
  *filled += take;
  *input = tail;
  *filled == buf.len()
}

#[test]
fn test_try_split_off_byte_array() {
  let bytes = [1_u8, 2, 3, 4, 5];
  assert_eq!(try_split_off_byte_array::<2>(&bytes), Some(([1, 2], &bytes[2..])));
  assert_eq!(try_split_off_byte_array::<5>(&bytes), Some(([1, 2, 3, 4, 5], &[][..])));
  assert_eq!(try_split_off_byte_array::<6>(&bytes), None);
}

#[test]
fn test_fill_from() {
  let mut buf = [0_u8; 4];
  let mut filled = 0;
  let mut input: &[u8] = &[9, 8, 7];
  assert!(!fill_from(&mut buf, &mut filled, &mut input));
  assert!(input.is_empty());
  let mut input: &[u8] = &[6, 5];
  assert!(fill_from(&mut buf, &mut filled, &mut input));
  assert_eq!(buf, [9, 8, 7, 6]);
  assert_eq!(input, &[5]);
}
