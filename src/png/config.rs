//! Session configuration.

use super::*;

/// Resource limits for decoding.
///
/// Used to keep hostile input from making the decoder allocate without bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Limits {
  /// Largest chunk data length accepted, never more than `2^31 - 1`.
  pub max_chunk_size: u32,
  /// Largest decompressed size of any one compressed ancillary chunk.
  pub max_metadata_bytes: usize,
  /// Largest image, counting both the raw pixel bytes and the decompressed
  /// image data stream.
  pub max_image_bytes: usize,
}
impl Default for Limits {
  #[inline]
  fn default() -> Self {
    Self { max_chunk_size: 8 << 20, max_metadata_bytes: 1 << 20, max_image_bytes: 512 << 20 }
  }
}
impl Limits {
  /// Limits that only stop what the format itself forbids.
  #[inline]
  #[must_use]
  pub const fn none() -> Self {
    Self { max_chunk_size: MAX_CHUNK_LENGTH, max_metadata_bytes: usize::MAX, max_image_bytes: usize::MAX }
  }

  /// Checks that decoding this image stays inside the limits.
  pub fn check_image(&self, header: &IHDR) -> PngResult<()> {
    if header.raw_image_bytes()? > self.max_image_bytes
      || header.filtered_data_bytes()? > self.max_image_bytes
    {
      return Err(PngError::ImageTooLarge);
    }
    Ok(())
  }
}

/// Settings for a [`PngDecoder`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DecoderConfig {
  pub limits: Limits,
}
impl DecoderConfig {
  #[inline]
  #[must_use]
  pub const fn with_limits(self, limits: Limits) -> Self {
    Self { limits }
  }

  /// Sets the largest chunk that will be accepted.
  #[inline]
  #[must_use]
  pub const fn with_max_chunk_size(mut self, max_chunk_size: u32) -> Self {
    self.limits.max_chunk_size = max_chunk_size;
    self
  }
}

/// Settings for a [`PngEncoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
  pub header: IHDR,
  /// Required for indexed images, optional for RGB and RGBA, not allowed for
  /// greyscale.
  pub palette: Option<Palette>,
  /// 0 (stored) through 10.
  pub compression_level: u8,
  pub strategy: DeflateStrategy,
  pub filter: FilterChoice,
  /// The most compressed bytes put in one `IDAT` chunk.
  pub idat_chunk_size: u32,
  /// Written after the image data.
  pub texts: Vec<TextEntry>,
  pub icc_profile: Option<IccProfile>,
  /// Other ancillary chunks, written before the image data (and before
  /// `PLTE` for the kinds that require that).
  pub ancillary: Vec<AncillaryChunk>,
}
impl EncoderConfig {
  /// Default settings for an image with this header.
  #[must_use]
  pub fn new(header: IHDR) -> Self {
    Self {
      header,
      palette: None,
      compression_level: 6,
      strategy: DeflateStrategy::Default,
      filter: FilterChoice::Adaptive,
      idat_chunk_size: 32 * 1024,
      texts: Vec::new(),
      icc_profile: None,
      ancillary: Vec::new(),
    }
  }

  #[inline]
  #[must_use]
  pub fn with_palette(self, palette: Palette) -> Self {
    Self { palette: Some(palette), ..self }
  }

  #[inline]
  #[must_use]
  pub fn with_compression(self, level: u8, strategy: DeflateStrategy) -> Self {
    Self { compression_level: level, strategy, ..self }
  }

  #[inline]
  #[must_use]
  pub fn with_filter(self, filter: FilterChoice) -> Self {
    Self { filter, ..self }
  }

  #[inline]
  #[must_use]
  pub fn with_idat_chunk_size(self, idat_chunk_size: u32) -> Self {
    Self { idat_chunk_size, ..self }
  }

  #[inline]
  #[must_use]
  pub fn with_text(mut self, text: TextEntry) -> Self {
    self.texts.push(text);
    self
  }

  #[inline]
  #[must_use]
  pub fn with_icc_profile(self, icc_profile: IccProfile) -> Self {
    Self { icc_profile: Some(icc_profile), ..self }
  }

  #[inline]
  #[must_use]
  pub fn with_ancillary(mut self, chunk_ty: ChunkType, data: &[u8]) -> Self {
    self.ancillary.push(AncillaryChunk { chunk_ty, data: data.to_vec() });
    self
  }

  /// Checks that the settings describe a legal PNG.
  pub fn validate(&self) -> PngResult<()> {
    self.header.validate()?;
    if self.compression_level > 10 {
      return Err(PngError::InvalidConfig("compression level must be 0 through 10"));
    }
    if self.idat_chunk_size == 0 || self.idat_chunk_size > MAX_CHUNK_LENGTH {
      return Err(PngError::InvalidConfig("IDAT chunk size must be 1 through 2^31-1"));
    }
    match (&self.palette, self.header.color_type) {
      (None, PngColorType::Index) => {
        return Err(PngError::InvalidConfig("indexed images need a palette"))
      }
      (Some(_), PngColorType::Y | PngColorType::YA) => {
        return Err(PngError::InvalidConfig("greyscale images can't have a palette"))
      }
      (Some(p), _) => Palette::check_len(p.entries().len(), &self.header)?,
      (None, _) => (),
    }
    for chunk in &self.ancillary {
      if !chunk.chunk_ty.is_valid() || !chunk.chunk_ty.is_ancillary() {
        return Err(PngError::InvalidConfig("extra chunks must be ancillary"));
      }
      if matches!(chunk.chunk_ty, ChunkType::tEXt | ChunkType::zTXt | ChunkType::iTXt | ChunkType::iCCP) {
        return Err(PngError::InvalidConfig("text and ICC chunks are set with their own fields"));
      }
    }
    Ok(())
  }
}

#[test]
fn test_limits_check_image() {
  let header =
    IHDR { width: 1000, height: 1000, bit_depth: 8, color_type: PngColorType::RGBA, is_interlaced: false };
  assert_eq!(Limits::default().check_image(&header), Ok(()));
  let tight = Limits { max_image_bytes: 3_999_999, ..Limits::default() };
  assert_eq!(tight.check_image(&header), Err(PngError::ImageTooLarge));
  let huge = IHDR { width: IHDR::MAX_DIMENSION, height: IHDR::MAX_DIMENSION, ..header };
  assert_eq!(Limits::default().check_image(&huge), Err(PngError::ImageTooLarge));
}

#[test]
fn test_encoder_config_validate() {
  let header =
    IHDR { width: 4, height: 4, bit_depth: 2, color_type: PngColorType::Index, is_interlaced: false };
  let config = EncoderConfig::new(header);
  assert!(matches!(config.validate(), Err(PngError::InvalidConfig(_))));
  let config = config.with_palette(Palette::from(&[[0_u8, 0, 0], [255, 255, 255]][..]));
  assert_eq!(config.validate(), Ok(()));
  let bad = config.clone().with_compression(11, DeflateStrategy::Default);
  assert!(bad.validate().is_err());
  let bad = config.clone().with_ancillary(ChunkType(*b"ABCD"), &[]);
  assert!(bad.validate().is_err());
  let grey = EncoderConfig::new(IHDR { color_type: PngColorType::Y, ..header })
    .with_palette(Palette::from(&[[0_u8, 0, 0]][..]));
  assert!(grey.validate().is_err());
}
