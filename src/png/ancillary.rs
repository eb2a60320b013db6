//! Ancillary chunks.
//!
//! Most known ancillary chunks are kept as raw bytes in [`PngMetadata`] for
//! the caller to interpret. The text chunks and the ICC profile chunk are
//! parsed here, because their compressed forms have to go through the
//! session's zlib engine like the image data does.

use super::*;

/// The ancillary chunk types that the codec knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(nonstandard_style)]
#[repr(u8)]
pub enum AncillaryKind {
  cHRM,
  gAMA,
  iCCP,
  sBIT,
  sRGB,
  cICP,
  tEXt,
  zTXt,
  iTXt,
  bKGD,
  hIST,
  tRNS,
  pHYs,
  sPLT,
  tIME,
  eXIf,
}
impl AncillaryKind {
  /// Looks up a chunk type.
  #[must_use]
  pub const fn of(chunk_ty: ChunkType) -> Option<Self> {
    Some(match &chunk_ty.0 {
      b"cHRM" => Self::cHRM,
      b"gAMA" => Self::gAMA,
      b"iCCP" => Self::iCCP,
      b"sBIT" => Self::sBIT,
      b"sRGB" => Self::sRGB,
      b"cICP" => Self::cICP,
      b"tEXt" => Self::tEXt,
      b"zTXt" => Self::zTXt,
      b"iTXt" => Self::iTXt,
      b"bKGD" => Self::bKGD,
      b"hIST" => Self::hIST,
      b"tRNS" => Self::tRNS,
      b"pHYs" => Self::pHYs,
      b"sPLT" => Self::sPLT,
      b"tIME" => Self::tIME,
      b"eXIf" => Self::eXIf,
      _ => return None,
    })
  }

  /// The chunk type of this kind.
  #[must_use]
  pub const fn chunk_type(self) -> ChunkType {
    match self {
      Self::cHRM => ChunkType::cHRM,
      Self::gAMA => ChunkType::gAMA,
      Self::iCCP => ChunkType::iCCP,
      Self::sBIT => ChunkType::sBIT,
      Self::sRGB => ChunkType::sRGB,
      Self::cICP => ChunkType::cICP,
      Self::tEXt => ChunkType::tEXt,
      Self::zTXt => ChunkType::zTXt,
      Self::iTXt => ChunkType::iTXt,
      Self::bKGD => ChunkType::bKGD,
      Self::hIST => ChunkType::hIST,
      Self::tRNS => ChunkType::tRNS,
      Self::pHYs => ChunkType::pHYs,
      Self::sPLT => ChunkType::sPLT,
      Self::tIME => ChunkType::tIME,
      Self::eXIf => ChunkType::eXIf,
    }
  }

  /// The data length, for chunks that only have one legal length.
  #[inline]
  #[must_use]
  pub const fn fixed_length(self) -> Option<usize> {
    match self {
      Self::gAMA => Some(4),
      Self::cHRM => Some(32),
      Self::sRGB => Some(1),
      Self::pHYs => Some(9),
      Self::tIME => Some(7),
      Self::cICP => Some(4),
      _ => None,
    }
  }

  /// If a second copy should be skipped.
  #[inline]
  #[must_use]
  pub const fn at_most_once(self) -> bool {
    !matches!(self, Self::tEXt | Self::zTXt | Self::iTXt | Self::sPLT)
  }

  /// If the chunk has to come before `PLTE`.
  #[inline]
  #[must_use]
  pub const fn before_plte(self) -> bool {
    matches!(self, Self::cHRM | Self::gAMA | Self::iCCP | Self::sBIT | Self::sRGB | Self::cICP)
  }

  /// If the chunk has to come before the first `IDAT`.
  #[inline]
  #[must_use]
  pub const fn before_idat(self) -> bool {
    self.before_plte()
      || matches!(self, Self::bKGD | Self::hIST | Self::tRNS | Self::pHYs | Self::sPLT | Self::eXIf)
  }

  /// If the chunk has to come after `PLTE` (when there is one).
  #[inline]
  #[must_use]
  pub const fn after_plte(self) -> bool {
    matches!(self, Self::bKGD | Self::hIST | Self::tRNS)
  }

  /// Checks the content length of a raw chunk against the image.
  #[must_use]
  pub fn is_length_ok(self, len: usize, header: &IHDR, palette_len: usize) -> bool {
    if let Some(fixed) = self.fixed_length() {
      return len == fixed;
    }
    match self {
      Self::tRNS => match header.color_type {
        PngColorType::Y => len == 2,
        PngColorType::RGB => len == 6,
        PngColorType::Index => len <= palette_len,
        PngColorType::YA | PngColorType::RGBA => false,
      },
      Self::hIST => len == palette_len * 2,
      Self::bKGD => match header.color_type {
        PngColorType::Y | PngColorType::YA => len == 2,
        PngColorType::RGB | PngColorType::RGBA => len == 6,
        PngColorType::Index => len == 1,
      },
      _ => true,
    }
  }
}

/// An ancillary chunk kept as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AncillaryChunk {
  pub chunk_ty: ChunkType,
  pub data: Vec<u8>,
}

/// The extra fields of an `iTXt` chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct InternationalText {
  /// An RFC 1766 language tag, ASCII.
  pub language_tag: Vec<u8>,
  /// The keyword translated into the text's language, UTF-8.
  pub translated_keyword: Vec<u8>,
}

/// One text entry, from a `tEXt`, `zTXt`, or `iTXt` chunk.
///
/// Bytes are kept as they were in the chunk. For `tEXt` and `zTXt` that's
/// Latin-1, for `iTXt` it's UTF-8.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TextEntry {
  pub keyword: Vec<u8>,
  pub text: Vec<u8>,
  pub compressed: bool,
  pub international: Option<InternationalText>,
}
impl TextEntry {
  /// An uncompressed `tEXt` entry.
  #[inline]
  #[must_use]
  pub fn new(keyword: &[u8], text: &[u8]) -> Self {
    Self { keyword: keyword.to_vec(), text: text.to_vec(), compressed: false, international: None }
  }

  /// Sets if the text is stored compressed.
  #[inline]
  #[must_use]
  pub fn with_compression(self, compressed: bool) -> Self {
    Self { compressed, ..self }
  }

  /// Stores the text in an `iTXt` chunk.
  #[inline]
  #[must_use]
  pub fn with_international(self, language_tag: &[u8], translated_keyword: &[u8]) -> Self {
    let international = Some(InternationalText {
      language_tag: language_tag.to_vec(),
      translated_keyword: translated_keyword.to_vec(),
    });
    Self { international, ..self }
  }

  /// The chunk type that this entry is written as.
  #[inline]
  #[must_use]
  pub fn chunk_type(&self) -> ChunkType {
    match (&self.international, self.compressed) {
      (Some(_), _) => ChunkType::iTXt,
      (None, true) => ChunkType::zTXt,
      (None, false) => ChunkType::tEXt,
    }
  }

  /// Builds the chunk data, compressing through `ctx` if needed.
  pub fn to_chunk_data(&self, ctx: &mut ZlibContext) -> PngResult<Vec<u8>> {
    if !is_valid_keyword(&self.keyword) {
      return Err(PngError::InvalidConfig("text keyword must be 1-79 printable Latin-1 bytes"));
    }
    let mut out = self.keyword.clone();
    out.push(0);
    match &self.international {
      None if self.compressed => {
        out.push(0);
        out.extend_from_slice(&ctx.deflate_all(ClaimPurpose::CompressedText, &self.text)?);
      }
      None => out.extend_from_slice(&self.text),
      Some(intl) => {
        if intl.language_tag.contains(&0) || intl.translated_keyword.contains(&0) {
          return Err(PngError::InvalidConfig("iTXt fields can't contain a null byte"));
        }
        out.extend_from_slice(&[u8::from(self.compressed), 0]);
        out.extend_from_slice(&intl.language_tag);
        out.push(0);
        out.extend_from_slice(&intl.translated_keyword);
        out.push(0);
        if self.compressed {
          out.extend_from_slice(&ctx.deflate_all(ClaimPurpose::CompressedText, &self.text)?);
        } else {
          out.extend_from_slice(&self.text);
        }
      }
    }
    Ok(out)
  }
}

/// An embedded ICC profile, from an `iCCP` chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct IccProfile {
  /// Profile name, Latin-1, same rules as a text keyword.
  pub name: Vec<u8>,
  /// The decompressed profile.
  pub profile: Vec<u8>,
}
impl IccProfile {
  /// Builds the chunk data, compressing the profile through `ctx`.
  pub fn to_chunk_data(&self, ctx: &mut ZlibContext) -> PngResult<Vec<u8>> {
    if !is_valid_keyword(&self.name) {
      return Err(PngError::InvalidConfig("ICC profile name must be 1-79 printable Latin-1 bytes"));
    }
    let mut out = self.name.clone();
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&ctx.deflate_all(ClaimPurpose::IccProfile, &self.profile)?);
    Ok(out)
  }
}

/// Everything besides pixels and the palette that a decode found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PngMetadata {
  /// Text entries, in stream order.
  pub texts: Vec<TextEntry>,
  pub icc_profile: Option<IccProfile>,
  /// Other known ancillary chunks, in stream order.
  pub chunks: Vec<AncillaryChunk>,
}
impl PngMetadata {
  /// The first retained chunk of the given type.
  #[must_use]
  pub fn chunk(&self, chunk_ty: ChunkType) -> Option<&AncillaryChunk> {
    self.chunks.iter().find(|c| c.chunk_ty == chunk_ty)
  }
}

/// Keywords are 1-79 bytes of printable Latin-1, with no leading, trailing,
/// or doubled spaces.
#[must_use]
pub fn is_valid_keyword(keyword: &[u8]) -> bool {
  (1..=79).contains(&keyword.len())
    && keyword.iter().all(|&b| matches!(b, 32..=126 | 161..=255))
    && keyword.first() != Some(&b' ')
    && keyword.last() != Some(&b' ')
    && !keyword.windows(2).any(|w| w == b"  ")
}

#[inline]
fn split_at_nul(data: &[u8]) -> Option<(&[u8], &[u8])> {
  let i = data.iter().position(|&b| b == 0)?;
  Some((&data[..i], &data[i + 1..]))
}

/// Reads a `tEXt`, `zTXt`, or `iTXt` chunk.
///
/// * `Ok(None)` means the chunk was malformed and should be skipped.
/// * Compressed text goes through its own claim on `ctx`, limited to
///   `max_output` bytes. A corrupt compressed stream is an error.
pub fn read_text_chunk(
  chunk_ty: ChunkType, data: &[u8], ctx: &mut ZlibContext, max_output: usize,
) -> PngResult<Option<TextEntry>> {
  let Some((keyword, rest)) = split_at_nul(data) else { return Ok(None) };
  if !is_valid_keyword(keyword) {
    return Ok(None);
  }
  let keyword = keyword.to_vec();
  match chunk_ty {
    ChunkType::tEXt => Ok(Some(TextEntry { keyword, text: rest.to_vec(), compressed: false, international: None })),
    ChunkType::zTXt => {
      let [0, compressed @ ..] = rest else { return Ok(None) };
      let text = ctx.inflate_all(ClaimPurpose::CompressedText, compressed, max_output)?;
      Ok(Some(TextEntry { keyword, text, compressed: true, international: None }))
    }
    ChunkType::iTXt => {
      let [flag @ (0 | 1), 0, rest @ ..] = rest else { return Ok(None) };
      let Some((language_tag, rest)) = split_at_nul(rest) else { return Ok(None) };
      let Some((translated_keyword, payload)) = split_at_nul(rest) else { return Ok(None) };
      let compressed = *flag == 1;
      let text = if compressed {
        ctx.inflate_all(ClaimPurpose::CompressedText, payload, max_output)?
      } else {
        payload.to_vec()
      };
      let international = Some(InternationalText {
        language_tag: language_tag.to_vec(),
        translated_keyword: translated_keyword.to_vec(),
      });
      Ok(Some(TextEntry { keyword, text, compressed, international }))
    }
    _ => Ok(None),
  }
}

/// Reads an `iCCP` chunk, decompressing the profile through its own claim.
///
/// `Ok(None)` means the chunk was malformed and should be skipped.
pub fn read_icc_chunk(
  data: &[u8], ctx: &mut ZlibContext, max_output: usize,
) -> PngResult<Option<IccProfile>> {
  let Some((name, rest)) = split_at_nul(data) else { return Ok(None) };
  if !is_valid_keyword(name) {
    return Ok(None);
  }
  let [0, compressed @ ..] = rest else { return Ok(None) };
  let profile = ctx.inflate_all(ClaimPurpose::IccProfile, compressed, max_output)?;
  Ok(Some(IccProfile { name: name.to_vec(), profile }))
}

#[test]
fn test_kind_lookup() {
  for ty in [ChunkType::gAMA, ChunkType::iTXt, ChunkType::eXIf, ChunkType::cICP] {
    assert_eq!(AncillaryKind::of(ty).unwrap().chunk_type(), ty);
  }
  assert_eq!(AncillaryKind::of(ChunkType::IDAT), None);
  assert_eq!(AncillaryKind::of(ChunkType(*b"vpAg")), None);
  assert!(AncillaryKind::sPLT.before_idat());
  assert!(!AncillaryKind::sPLT.at_most_once());
  assert!(!AncillaryKind::tIME.before_idat());
}

#[test]
fn test_keywords() {
  assert!(is_valid_keyword(b"Title"));
  assert!(is_valid_keyword(b"Creation Time"));
  assert!(!is_valid_keyword(b""));
  assert!(!is_valid_keyword(b" Title"));
  assert!(!is_valid_keyword(b"Title "));
  assert!(!is_valid_keyword(b"Two  Spaces"));
  assert!(!is_valid_keyword(&[b'a'; 80]));
  assert!(!is_valid_keyword(b"tab\there"));
}

#[test]
fn test_text_chunks_both_ways() {
  let mut dctx = ZlibContext::for_deflate(6, DeflateStrategy::Default);
  let mut ictx = ZlibContext::for_inflate();
  let entries = [
    TextEntry::new(b"Title", b"plain words"),
    TextEntry::new(b"Comment", &b"squash me ".repeat(30)).with_compression(true),
    TextEntry::new(b"Author", "\u{00e9}crit".as_bytes()).with_international(b"fr", b"Auteur"),
    TextEntry::new(b"Author", b"zipped").with_compression(true).with_international(b"en", b""),
  ];
  for entry in entries {
    let data = entry.to_chunk_data(&mut dctx).unwrap();
    let back = read_text_chunk(entry.chunk_type(), &data, &mut ictx, 1 << 20).unwrap();
    assert_eq!(back, Some(entry));
  }
  assert_eq!(dctx.claimed_by(), None);
  assert_eq!(ictx.claimed_by(), None);
}

#[test]
fn test_malformed_text_is_skipped() {
  let mut ctx = ZlibContext::for_inflate();
  assert_eq!(read_text_chunk(ChunkType::tEXt, b"no null byte", &mut ctx, 100), Ok(None));
  assert_eq!(read_text_chunk(ChunkType::zTXt, b"Key\0\x05abc", &mut ctx, 100), Ok(None));
  assert_eq!(read_text_chunk(ChunkType::iTXt, b"Key\0\x02\0en\0\0hi", &mut ctx, 100), Ok(None));
  assert!(matches!(
    read_text_chunk(ChunkType::zTXt, b"Key\0\0not zlib", &mut ctx, 100),
    Err(PngError::CompressedStreamError(_))
  ));
  assert_eq!(ctx.claimed_by(), None);
}

#[test]
fn test_icc_both_ways() {
  let icc = IccProfile { name: b"sRGB IEC61966-2.1".to_vec(), profile: (0..=255).collect() };
  let data = icc.to_chunk_data(&mut ZlibContext::for_deflate(9, DeflateStrategy::Default)).unwrap();
  let back = read_icc_chunk(&data, &mut ZlibContext::for_inflate(), 1 << 20).unwrap();
  assert_eq!(back, Some(icc));
}
