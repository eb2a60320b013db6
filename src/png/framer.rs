//! Reading and writing the chunk envelope.
//!
//! Every chunk is framed the same way:
//!
//! | bytes | meaning |
//! |:-|:-|
//! | 4 | data length, big-endian, at most `2^31 - 1` |
//! | 4 | chunk type |
//! | length | chunk data |
//! | 4 | CRC of type + data, big-endian |
//!
//! The functions that read take `&mut &[u8]` and only advance the slice when
//! the whole piece they're after is present, otherwise they give `Ok(None)` and
//! leave the input alone. Ordering rules are not checked here, see
//! [`ChunkOrder`].

use super::*;

/// The first eight bytes of a PNG datastream should match these bytes.
pub const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// The largest length the format allows for a single chunk.
pub const MAX_CHUNK_LENGTH: u32 = (1 << 31) - 1;

/// Checks if the PNG's initial 8 bytes are correct.
#[inline]
#[must_use]
pub const fn is_png_signature_correct(bytes: &[u8]) -> bool {
  matches!(bytes, [137, 80, 78, 71, 13, 10, 26, 10, ..])
}

/// The length and type at the front of every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkHeader {
  pub length: u32,
  pub chunk_ty: ChunkType,
}
impl ChunkHeader {
  /// Parses and validates the 8 header bytes.
  ///
  /// ## Failure
  /// * Lengths above `2^31 - 1` are [`PngError::InvalidChunkLength`].
  /// * Lengths above `max_chunk_size` are [`PngError::ChunkTooLarge`].
  /// * Types that aren't four ASCII letters are [`PngError::InvalidChunkType`].
  pub fn parse(bytes: [u8; 8], max_chunk_size: u32) -> PngResult<Self> {
    let [l0, l1, l2, l3, t0, t1, t2, t3] = bytes;
    let length = u32::from_be_bytes([l0, l1, l2, l3]);
    let chunk_ty = ChunkType([t0, t1, t2, t3]);
    if length > MAX_CHUNK_LENGTH {
      return Err(PngError::InvalidChunkLength(length));
    }
    if !chunk_ty.is_valid() {
      return Err(PngError::InvalidChunkType(chunk_ty.0));
    }
    let limit = max_chunk_size.min(MAX_CHUNK_LENGTH);
    if length > limit {
      return Err(PngError::ChunkTooLarge { chunk: chunk_ty, length, limit });
    }
    Ok(Self { length, chunk_ty })
  }

  /// The header as it appears in the stream.
  #[inline]
  #[must_use]
  pub fn to_bytes(self) -> [u8; 8] {
    let [l0, l1, l2, l3] = self.length.to_be_bytes();
    let [t0, t1, t2, t3] = self.chunk_ty.0;
    [l0, l1, l2, l3, t0, t1, t2, t3]
  }
}

/// Reads a chunk header from the front of the input.
pub fn read_chunk_header(input: &mut &[u8], max_chunk_size: u32) -> PngResult<Option<ChunkHeader>> {
  match try_split_off_byte_array::<8>(input) {
    Some((bytes, rest)) => {
      let header = ChunkHeader::parse(bytes, max_chunk_size)?;
      *input = rest;
      Ok(Some(header))
    }
    None => Ok(None),
  }
}

/// Reads `length` bytes of chunk data from the front of the input.
#[inline]
pub fn read_chunk_data<'b>(input: &mut &'b [u8], length: u32) -> Option<&'b [u8]> {
  let length = length as usize;
  if input.len() >= length {
    let (data, rest) = input.split_at(length);
    *input = rest;
    Some(data)
  } else {
    None
  }
}

/// Reads the CRC from the front of the input and checks it against the type
/// and data.
pub fn read_and_verify_crc(
  input: &mut &[u8], chunk_ty: ChunkType, data: &[u8],
) -> PngResult<Option<()>> {
  match try_split_off_byte_array::<4>(input) {
    Some((crc_bytes, rest)) => {
      *input = rest;
      check_chunk_crc(chunk_ty, data, u32::from_be_bytes(crc_bytes))?;
      Ok(Some(()))
    }
    None => Ok(None),
  }
}

/// Checks a declared CRC.
#[inline]
pub fn check_chunk_crc(chunk_ty: ChunkType, data: &[u8], declared: u32) -> PngResult<()> {
  let actual = chunk_crc(chunk_ty.0, data);
  if actual == declared {
    Ok(())
  } else {
    Err(PngError::CrcMismatch { chunk: chunk_ty, declared, actual })
  }
}

/// Appends a fully framed chunk to `out`.
///
/// ## Failure
/// * The data can't be longer than `2^31 - 1` bytes.
pub fn write_chunk_into(out: &mut Vec<u8>, chunk_ty: ChunkType, data: &[u8]) -> PngResult<()> {
  let length = u32::try_from(data.len())
    .ok()
    .filter(|l| *l <= MAX_CHUNK_LENGTH)
    .ok_or(PngError::InvalidChunkLength(u32::MAX))?;
  out.reserve(12 + data.len());
  out.extend_from_slice(&ChunkHeader { length, chunk_ty }.to_bytes());
  out.extend_from_slice(data);
  out.extend_from_slice(&chunk_crc(chunk_ty.0, data).to_be_bytes());
  Ok(())
}

/// Frames a chunk into a new buffer.
pub fn write_chunk(chunk_ty: ChunkType, data: &[u8]) -> PngResult<Vec<u8>> {
  let mut out = Vec::new();
  write_chunk_into(&mut out, chunk_ty, data)?;
  Ok(out)
}

/// If the codec has handling for this chunk type.
#[inline]
#[must_use]
pub fn is_known_chunk(chunk_ty: ChunkType) -> bool {
  matches!(chunk_ty, ChunkType::IHDR | ChunkType::PLTE | ChunkType::IDAT | ChunkType::IEND)
    || AncillaryKind::of(chunk_ty).is_some()
}

/// What to do with a chunk type the codec doesn't know.
///
/// * Unknown critical chunks are fatal: the image can't be shown correctly
///   without understanding them.
/// * Unknown ancillary chunks (including any with the reserved bit set) are
///   skipped.
pub fn classify_unknown_chunk(chunk_ty: ChunkType) -> PngResult<PngWarning> {
  if chunk_ty.is_critical() {
    Err(PngError::UnsupportedCriticalChunk(chunk_ty))
  } else {
    Ok(PngWarning::UnknownAncillaryChunk(chunk_ty))
  }
}

/// An unparsed chunk from a PNG.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RawChunk<'b> {
  pub chunk_ty: ChunkType,
  pub data: &'b [u8],
  pub declared_crc: u32,
}
impl Debug for RawChunk<'_> {
  #[inline]
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("RawChunk")
      .field("chunk_ty", &self.chunk_ty)
      .field("data", &(&self.data[..self.data.len().min(12)], self.data.len()))
      .field("declared_crc", &self.declared_crc)
      .finish()
  }
}
impl RawChunk<'_> {
  /// The CRC that the chunk *should* have declared.
  #[inline]
  #[must_use]
  pub fn compute_actual_crc(&self) -> u32 {
    chunk_crc(self.chunk_ty.0, self.data)
  }
}

/// An iterator over the raw chunks of in-memory PNG bytes.
///
/// This doesn't validate anything beyond the framing itself, and it stops at
/// the first chunk that isn't complete. It's handy for inspecting files; real
/// decoding goes through [`PngDecoder`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct RawChunkIter<'b>(&'b [u8]);
impl<'b> RawChunkIter<'b> {
  /// Makes an iterator over a PNG's chunks.
  ///
  /// ## Failure
  /// This function always returns an iterator. However, if the slice doesn't
  /// start with the correct PNG signature then an empty slice will be stored,
  /// and the first call to `next` will end up returning `None`.
  #[inline]
  pub const fn new(png: &'b [u8]) -> Self {
    match png {
      [137, 80, 78, 71, 13, 10, 26, 10, rest @ ..] => Self(rest),
      _ => Self(&[]),
    }
  }
}
impl<'b> Iterator for RawChunkIter<'b> {
  type Item = RawChunk<'b>;
  #[inline]
  fn next(&mut self) -> Option<Self::Item> {
    let mut rest = self.0;
    let header = match read_chunk_header(&mut rest, MAX_CHUNK_LENGTH) {
      Ok(Some(header)) => header,
      _ => {
        self.0 = &[];
        return None;
      }
    };
    let data = read_chunk_data(&mut rest, header.length);
    let crc = data.and_then(|_| try_split_off_byte_array::<4>(rest));
    match (data, crc) {
      (Some(data), Some((crc_bytes, rest))) => {
        self.0 = rest;
        Some(RawChunk { chunk_ty: header.chunk_ty, data, declared_crc: u32::from_be_bytes(crc_bytes) })
      }
      _ => {
        self.0 = &[];
        None
      }
    }
  }
}

#[test]
fn test_write_then_read_chunk() {
  let framed = write_chunk(ChunkType::tEXt, b"Title\0hello").unwrap();
  assert_eq!(framed.len(), 12 + 11);
  let mut input: &[u8] = &framed;
  let header = read_chunk_header(&mut input, 1024).unwrap().unwrap();
  assert_eq!(header, ChunkHeader { length: 11, chunk_ty: ChunkType::tEXt });
  let data = read_chunk_data(&mut input, header.length).unwrap();
  assert_eq!(data, b"Title\0hello");
  assert_eq!(read_and_verify_crc(&mut input, header.chunk_ty, data), Ok(Some(())));
  assert!(input.is_empty());
}

#[test]
fn test_read_needs_more_data() {
  let framed = write_chunk(ChunkType::IEND, &[]).unwrap();
  let mut input: &[u8] = &framed[..7];
  assert_eq!(read_chunk_header(&mut input, 1024), Ok(None));
  assert_eq!(input.len(), 7, "input must not be consumed");
  let mut input: &[u8] = &framed[8..11];
  assert_eq!(read_and_verify_crc(&mut input, ChunkType::IEND, &[]), Ok(None));
  let mut input: &[u8] = &[1, 2];
  assert_eq!(read_chunk_data(&mut input, 3), None);
}

#[test]
fn test_chunk_header_limits() {
  let mut bytes = ChunkHeader { length: 100, chunk_ty: ChunkType::IDAT }.to_bytes();
  assert_eq!(
    ChunkHeader::parse(bytes, 99),
    Err(PngError::ChunkTooLarge { chunk: ChunkType::IDAT, length: 100, limit: 99 })
  );
  assert!(ChunkHeader::parse(bytes, 100).is_ok());
  bytes[0] = 0x80;
  assert_eq!(ChunkHeader::parse(bytes, u32::MAX), Err(PngError::InvalidChunkLength(0x8000_0064)));
  let bytes = ChunkHeader { length: 0, chunk_ty: ChunkType(*b"I D ") }.to_bytes();
  assert_eq!(ChunkHeader::parse(bytes, 100), Err(PngError::InvalidChunkType(*b"I D ")));
}

#[test]
fn test_crc_mismatch_is_reported() {
  let mut framed = write_chunk(ChunkType::IDAT, &[1, 2, 3]).unwrap();
  framed[9] ^= 0x01;
  let mut input: &[u8] = &framed;
  let header = read_chunk_header(&mut input, 1024).unwrap().unwrap();
  let data = read_chunk_data(&mut input, header.length).unwrap();
  assert!(matches!(
    read_and_verify_crc(&mut input, header.chunk_ty, data),
    Err(PngError::CrcMismatch { .. })
  ));
}

#[test]
fn test_classify_unknown_chunk() {
  assert_eq!(
    classify_unknown_chunk(ChunkType(*b"ZZZZ")),
    Err(PngError::UnsupportedCriticalChunk(ChunkType(*b"ZZZZ")))
  );
  assert_eq!(
    classify_unknown_chunk(ChunkType(*b"zzZz")),
    Ok(PngWarning::UnknownAncillaryChunk(ChunkType(*b"zzZz")))
  );
  assert!(is_known_chunk(ChunkType::zTXt));
  assert!(!is_known_chunk(ChunkType(*b"vpAg")));
}
