//! The chunk CRC.
//!
//! This is the usual CRC-32 (reflected `0xEDB88320` polynomial, all-ones
//! initial value, complemented output). Each chunk's CRC covers the chunk type
//! and the chunk data, but *not* the length.

const CRC_TABLE: [u32; 256] = make_crc_table();

const fn make_crc_table() -> [u32; 256] {
  let mut out = [0; 256];
  let mut n = 0;
  while n < 256 {
    let mut c = n as u32;
    let mut k = 0;
    while k < 8 {
      if (c & 1) != 0 {
        c = 0xEDB8_8320_u32 ^ (c >> 1);
      } else {
        c >>= 1;
      }
      //
      k += 1;
    }
    out[n] = c;
    //
    n += 1;
  }
  out
}

#[inline]
fn update_crc(mut crc: u32, bytes: &[u8]) -> u32 {
  for &byte in bytes {
    let i = (crc ^ u32::from(byte)) as u8 as usize;
    crc = CRC_TABLE[i] ^ (crc >> 8);
  }
  crc
}

/// A running CRC, for when the bytes arrive in pieces.
///
/// ```
/// # use pngpush::png::*;
/// let mut c = Crc32::new();
/// c.update(b"IE");
/// c.update(b"ND");
/// assert_eq!(c.finish(), png_crc(b"IEND"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc32(u32);
impl Default for Crc32 {
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}
impl Crc32 {
  /// A fresh CRC with nothing added yet.
  #[inline]
  #[must_use]
  pub const fn new() -> Self {
    Self(u32::MAX)
  }

  /// Adds more bytes.
  #[inline]
  pub fn update(&mut self, bytes: &[u8]) {
    self.0 = update_crc(self.0, bytes);
  }

  /// The CRC of all bytes added so far.
  #[inline]
  #[must_use]
  pub const fn finish(&self) -> u32 {
    self.0 ^ u32::MAX
  }
}

/// Computes the CRC of a byte slice.
#[inline]
#[must_use]
pub fn png_crc(bytes: &[u8]) -> u32 {
  update_crc(u32::MAX, bytes) ^ u32::MAX
}

/// Computes the CRC that a chunk with this type and data should declare.
#[inline]
#[must_use]
pub fn chunk_crc(chunk_ty: [u8; 4], data: &[u8]) -> u32 {
  let mut c = Crc32::new();
  c.update(&chunk_ty);
  c.update(data);
  c.finish()
}

/// Checks that `expected` is the CRC of `bytes`.
#[inline]
#[must_use]
pub fn verify_crc(bytes: &[u8], expected: u32) -> bool {
  png_crc(bytes) == expected
}

#[test]
fn test_crc_known_values() {
  // the check value of CRC-32
  assert_eq!(png_crc(b"123456789"), 0xCBF4_3926);
  assert_eq!(png_crc(b""), 0);
  // every PNG ends with these 12 bytes
  assert_eq!(chunk_crc(*b"IEND", &[]), 0xAE42_6082);
}

#[test]
fn test_crc_single_bit_flip_fails() {
  let data: [u8; 16] = *b"IDATsome pixels!";
  let good = png_crc(&data);
  assert!(verify_crc(&data, good));
  for byte in 0..data.len() {
    for bit in 0..8 {
      let mut flipped = data;
      flipped[byte] ^= 1 << bit;
      assert!(!verify_crc(&flipped, good), "byte {byte} bit {bit}");
    }
  }
}
