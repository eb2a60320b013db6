use super::*;

/// The types of color that PNG supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PngColorType {
  /// Greyscale
  Y = 0,
  /// Red, Green, Blue
  RGB = 2,
  /// Index into a palette.
  ///
  /// The palette will have RGB8 data. There may optionally be a transparency
  /// chunk.
  Index = 3,
  /// Greyscale + Alpha
  YA = 4,
  /// Red, Green, Blue, Alpha
  RGBA = 6,
}
impl PngColorType {
  /// The number of channels in this type of color.
  #[inline]
  #[must_use]
  pub const fn channel_count(self) -> usize {
    match self {
      Self::Y => 1,
      Self::RGB => 3,
      Self::Index => 1,
      Self::YA => 2,
      Self::RGBA => 4,
    }
  }

  /// If the bit depth is allowed with this color type.
  #[inline]
  #[must_use]
  pub const fn allows_bit_depth(self, bit_depth: u8) -> bool {
    match self {
      Self::Y => matches!(bit_depth, 1 | 2 | 4 | 8 | 16),
      Self::Index => matches!(bit_depth, 1 | 2 | 4 | 8),
      Self::RGB | Self::YA | Self::RGBA => matches!(bit_depth, 8 | 16),
    }
  }
}
impl TryFrom<u8> for PngColorType {
  type Error = PngError;
  #[inline]
  fn try_from(value: u8) -> Result<Self, Self::Error> {
    Ok(match value {
      0 => PngColorType::Y,
      2 => PngColorType::RGB,
      3 => PngColorType::Index,
      4 => PngColorType::YA,
      6 => PngColorType::RGBA,
      _ => return Err(PngError::InvalidHeader("unknown color type")),
    })
  }
}

/// Image Header
///
/// This is the data of the `IHDR` chunk, which must come first in every PNG.
/// Everything about the sizes of rows and passes follows from these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IHDR {
  /// width in pixels
  pub width: u32,
  /// height in pixels
  pub height: u32,
  /// bits per channel
  pub bit_depth: u8,
  /// pixel color type
  pub color_type: PngColorType,
  /// if the image data is stored with Adam7 interlacing.
  pub is_interlaced: bool,
}
impl IHDR {
  /// The largest width or height the format allows.
  pub const MAX_DIMENSION: u32 = (1 << 31) - 1;

  /// Checks the header's values against the format's rules.
  pub fn validate(&self) -> PngResult<()> {
    if self.width == 0 || self.height == 0 {
      return Err(PngError::InvalidHeader("width and height must be non-zero"));
    }
    if self.width > Self::MAX_DIMENSION || self.height > Self::MAX_DIMENSION {
      return Err(PngError::InvalidHeader("width and height must be at most 2^31-1"));
    }
    if !self.color_type.allows_bit_depth(self.bit_depth) {
      return Err(PngError::InvalidHeader("illegal color type and bit depth combination"));
    }
    Ok(())
  }

  /// Bits used by each pixel.
  #[inline]
  #[must_use]
  pub const fn bits_per_pixel(&self) -> usize {
    (self.bit_depth as usize) * self.color_type.channel_count()
  }

  /// The filter stride: bytes per complete pixel, rounded up, and at least 1.
  ///
  /// Filtering works on bytes, so when pixels are smaller than a byte the
  /// "pixel to the left" is just the byte to the left.
  #[inline]
  #[must_use]
  pub const fn filter_bpp(&self) -> usize {
    let bytes = self.bits_per_pixel() / 8;
    if bytes == 0 {
      1
    } else {
      bytes
    }
  }

  /// The number of bytes in a row that's `width` pixels wide, not counting
  /// the filter tag.
  ///
  /// When pixels are less than 8 bits it's possible to end up with partial
  /// bytes on the end, so this rounds up.
  pub fn bytes_per_row(&self, width: u32) -> PngResult<usize> {
    let bits = (width as u64).checked_mul(self.bits_per_pixel() as u64).ok_or(PngError::ImageTooLarge)?;
    usize::try_from((bits + 7) / 8).map_err(|_| PngError::ImageTooLarge)
  }

  /// Bytes in one full-width row.
  #[inline]
  pub fn bytes_per_full_row(&self) -> PngResult<usize> {
    self.bytes_per_row(self.width)
  }

  /// Bytes of the whole image, unfiltered and not interlaced.
  pub fn raw_image_bytes(&self) -> PngResult<usize> {
    self.bytes_per_full_row()?.checked_mul(self.height as usize).ok_or(PngError::ImageTooLarge)
  }

  /// Gets the number of bytes that zlib decompression of the image data
  /// produces: each row of each pass plus its filter tag.
  pub fn filtered_data_bytes(&self) -> PngResult<usize> {
    let mut total = 0_usize;
    for pass in interlace_passes(self.width, self.height, self.is_interlaced) {
      let line = self.bytes_per_row(pass.width)?.checked_add(1).ok_or(PngError::ImageTooLarge)?;
      let image = line.checked_mul(pass.height as usize).ok_or(PngError::ImageTooLarge)?;
      total = total.checked_add(image).ok_or(PngError::ImageTooLarge)?;
    }
    Ok(total)
  }

  /// The 13 bytes of `IHDR` chunk data.
  #[must_use]
  pub fn to_bytes(&self) -> [u8; 13] {
    let [w0, w1, w2, w3] = self.width.to_be_bytes();
    let [h0, h1, h2, h3] = self.height.to_be_bytes();
    [
      w0,
      w1,
      w2,
      w3,
      h0,
      h1,
      h2,
      h3,
      self.bit_depth,
      self.color_type as u8,
      0, // deflate compression
      0, // adaptive filtering
      self.is_interlaced as u8,
    ]
  }
}
impl TryFrom<&[u8]> for IHDR {
  type Error = PngError;
  fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
    match value {
      [w0, w1, w2, w3, h0, h1, h2, h3, bit_depth, color_type, compression_method, filter_method, interlace_method] =>
      {
        if *compression_method != 0 {
          return Err(PngError::InvalidHeader("unknown compression method"));
        }
        if *filter_method != 0 {
          return Err(PngError::InvalidHeader("unknown filter method"));
        }
        let ihdr = Self {
          width: u32::from_be_bytes([*w0, *w1, *w2, *w3]),
          height: u32::from_be_bytes([*h0, *h1, *h2, *h3]),
          bit_depth: *bit_depth,
          color_type: PngColorType::try_from(*color_type)?,
          is_interlaced: match interlace_method {
            0 => false,
            1 => true,
            _ => return Err(PngError::InvalidHeader("unknown interlace method")),
          },
        };
        ihdr.validate()?;
        Ok(ihdr)
      }
      _ => Err(PngError::InvalidHeader("IHDR data must be 13 bytes")),
    }
  }
}

#[test]
fn test_ihdr_parse_and_write() {
  let ihdr = IHDR {
    width: 300,
    height: 2,
    bit_depth: 4,
    color_type: PngColorType::Index,
    is_interlaced: true,
  };
  let bytes = ihdr.to_bytes();
  assert_eq!(IHDR::try_from(&bytes[..]), Ok(ihdr));
  assert_eq!(ihdr.bits_per_pixel(), 4);
  assert_eq!(ihdr.filter_bpp(), 1);
  assert_eq!(ihdr.bytes_per_row(300), Ok(150));
  assert_eq!(ihdr.bytes_per_row(301), Ok(151));
}

#[test]
fn test_ihdr_rejects_bad_values() {
  let good =
    IHDR { width: 1, height: 1, bit_depth: 16, color_type: PngColorType::RGBA, is_interlaced: false };
  assert_eq!(good.filter_bpp(), 8);
  let mut bytes = good.to_bytes();
  bytes[8] = 4;
  assert!(matches!(IHDR::try_from(&bytes[..]), Err(PngError::InvalidHeader(_))));
  let mut bytes = good.to_bytes();
  bytes[9] = 5;
  assert!(matches!(IHDR::try_from(&bytes[..]), Err(PngError::InvalidHeader(_))));
  let mut bytes = good.to_bytes();
  bytes[12] = 2;
  assert!(matches!(IHDR::try_from(&bytes[..]), Err(PngError::InvalidHeader(_))));
  let mut bytes = good.to_bytes();
  bytes[0..4].copy_from_slice(&0_u32.to_be_bytes());
  assert!(matches!(IHDR::try_from(&bytes[..]), Err(PngError::InvalidHeader(_))));
  let mut bytes = good.to_bytes();
  bytes[0] = 0x80;
  assert!(matches!(IHDR::try_from(&bytes[..]), Err(PngError::InvalidHeader(_))));
  assert!(matches!(IHDR::try_from(&bytes[..12]), Err(PngError::InvalidHeader(_))));
}

#[test]
fn test_filtered_data_bytes() {
  let mut ihdr =
    IHDR { width: 8, height: 8, bit_depth: 8, color_type: PngColorType::Y, is_interlaced: false };
  assert_eq!(ihdr.filtered_data_bytes(), Ok(8 * 9));
  ihdr.is_interlaced = true;
  // passes are 1x1, 1x1, 2x1, 2x2, 4x2, 4x4, 8x4
  let expected = 2 + 2 + 3 + 2 * 3 + 2 * 5 + 4 * 5 + 4 * 9;
  assert_eq!(ihdr.filtered_data_bytes(), Ok(expected));
}
