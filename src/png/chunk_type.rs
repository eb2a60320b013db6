use super::*;

/// A four letter chunk type code.
///
/// The case of each letter is a flag:
/// * 1st letter lowercase: **ancillary** (uppercase is critical)
/// * 2nd letter lowercase: **private** (uppercase is public)
/// * 3rd letter lowercase: **reserved** bit set, which no valid chunk has
/// * 4th letter lowercase: **safe to copy** (uppercase is unsafe to copy)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ChunkType(pub [u8; 4]);
#[allow(nonstandard_style)]
impl ChunkType {
  pub const IHDR: Self = Self(*b"IHDR");
  pub const PLTE: Self = Self(*b"PLTE");
  pub const IDAT: Self = Self(*b"IDAT");
  pub const IEND: Self = Self(*b"IEND");
  pub const tRNS: Self = Self(*b"tRNS");
  pub const cHRM: Self = Self(*b"cHRM");
  pub const gAMA: Self = Self(*b"gAMA");
  pub const iCCP: Self = Self(*b"iCCP");
  pub const sBIT: Self = Self(*b"sBIT");
  pub const sRGB: Self = Self(*b"sRGB");
  pub const cICP: Self = Self(*b"cICP");
  pub const tEXt: Self = Self(*b"tEXt");
  pub const zTXt: Self = Self(*b"zTXt");
  pub const iTXt: Self = Self(*b"iTXt");
  pub const bKGD: Self = Self(*b"bKGD");
  pub const hIST: Self = Self(*b"hIST");
  pub const pHYs: Self = Self(*b"pHYs");
  pub const sPLT: Self = Self(*b"sPLT");
  pub const tIME: Self = Self(*b"tIME");
  pub const eXIf: Self = Self(*b"eXIf");
}
impl Debug for ChunkType {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    for b in self.0 {
      if b.is_ascii_graphic() {
        f.write_char(b as char)?;
      } else {
        write!(f, "\\x{b:02X}")?;
      }
    }
    Ok(())
  }
}
impl From<[u8; 4]> for ChunkType {
  #[inline]
  fn from(bytes: [u8; 4]) -> Self {
    Self(bytes)
  }
}
impl ChunkType {
  /// The raw type bytes.
  #[inline]
  #[must_use]
  pub const fn bytes(self) -> [u8; 4] {
    self.0
  }

  /// If all four bytes are ASCII letters.
  #[inline]
  #[must_use]
  pub const fn is_valid(self) -> bool {
    self.0[0].is_ascii_alphabetic()
      && self.0[1].is_ascii_alphabetic()
      && self.0[2].is_ascii_alphabetic()
      && self.0[3].is_ascii_alphabetic()
  }

  /// Critical chunks must be understood to display the image.
  #[inline]
  #[must_use]
  pub const fn is_critical(self) -> bool {
    self.0[0] & 0x20 == 0
  }

  /// Ancillary chunks can be skipped if they're not understood.
  #[inline]
  #[must_use]
  pub const fn is_ancillary(self) -> bool {
    !self.is_critical()
  }

  /// Public chunks are the ones listed in the PNG spec (or registered).
  #[inline]
  #[must_use]
  pub const fn is_public(self) -> bool {
    self.0[1] & 0x20 == 0
  }

  /// All defined chunk types have this bit clear (an uppercase 3rd letter).
  #[inline]
  #[must_use]
  pub const fn is_reserved_bit_set(self) -> bool {
    self.0[2] & 0x20 != 0
  }

  /// If an editor that doesn't understand the chunk may still copy it into a
  /// modified file.
  #[inline]
  #[must_use]
  pub const fn is_safe_to_copy(self) -> bool {
    self.0[3] & 0x20 != 0
  }
}

#[test]
fn test_chunk_type_flags() {
  let idat = ChunkType::IDAT;
  assert!(idat.is_valid());
  assert!(idat.is_critical());
  assert!(idat.is_public());
  assert!(!idat.is_reserved_bit_set());
  assert!(!idat.is_safe_to_copy());

  let text = ChunkType::tEXt;
  assert!(text.is_ancillary());
  assert!(text.is_public());
  assert!(text.is_safe_to_copy());

  let private = ChunkType(*b"prVt");
  assert!(private.is_ancillary());
  assert!(!private.is_public());
  assert!(!private.is_reserved_bit_set());
  assert!(private.is_safe_to_copy());

  let reserved = ChunkType(*b"rust");
  assert!(reserved.is_reserved_bit_set());

  assert!(!ChunkType(*b"ID4T").is_valid());
  assert_eq!(alloc::format!("{:?}", ChunkType(*b"a\0bc")), "a\\x00bc");
}
