use super::*;

/// Palette data
///
/// Palette entries are always RGB.
///
/// If you want to have a paletted image with transparency then the transparency
/// info goes in a separate `tRNS` chunk, which is kept as a raw ancillary chunk.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Palette(Vec<[u8; 3]>);
impl From<&[[u8; 3]]> for Palette {
  #[inline]
  fn from(entries: &[[u8; 3]]) -> Self {
    Self(entries.to_vec())
  }
}
impl Debug for Palette {
  #[inline]
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    // currently prints no more than 4 palette entries
    f.debug_tuple("Palette").field(&&self.0[..self.0.len().min(4)]).field(&self.0.len()).finish()
  }
}
impl Palette {
  /// Parses `PLTE` chunk data for the image.
  ///
  /// ## Failure
  /// * The data must be 1 to 256 whole RGB entries.
  /// * Indexed images can't have more entries than their bit depth can
  ///   address.
  pub fn parse(data: &[u8], header: &IHDR) -> PngResult<Self> {
    let entries: &[[u8; 3]] = bytemuck::try_cast_slice(data)
      .map_err(|_| PngError::InvalidPalette("length is not a multiple of 3"))?;
    Self::check_len(entries.len(), header)?;
    Ok(Self(entries.to_vec()))
  }

  pub(crate) fn check_len(len: usize, header: &IHDR) -> PngResult<()> {
    if len == 0 || len > 256 {
      return Err(PngError::InvalidPalette("must have 1 to 256 entries"));
    }
    if header.color_type == PngColorType::Index && len > (1 << header.bit_depth) {
      return Err(PngError::InvalidPalette("more entries than the bit depth allows"));
    }
    Ok(())
  }

  /// Gets the entries as a slice.
  #[inline]
  #[must_use]
  pub fn entries(&self) -> &[[u8; 3]] {
    &self.0
  }

  /// The `PLTE` chunk data.
  #[inline]
  #[must_use]
  pub fn as_bytes(&self) -> &[u8] {
    bytemuck::cast_slice(&self.0)
  }
}

#[test]
fn test_palette_parse() {
  let header =
    IHDR { width: 1, height: 1, bit_depth: 1, color_type: PngColorType::Index, is_interlaced: false };
  let p = Palette::parse(&[1, 2, 3, 4, 5, 6], &header).unwrap();
  assert_eq!(p.entries(), &[[1, 2, 3], [4, 5, 6]]);
  assert_eq!(p.as_bytes(), &[1, 2, 3, 4, 5, 6]);
  assert!(matches!(Palette::parse(&[1, 2, 3, 4], &header), Err(PngError::InvalidPalette(_))));
  assert!(matches!(Palette::parse(&[0; 9], &header), Err(PngError::InvalidPalette(_))));
  assert!(matches!(Palette::parse(&[], &header), Err(PngError::InvalidPalette(_))));
  let rgb = IHDR { bit_depth: 8, color_type: PngColorType::RGB, ..header };
  assert!(Palette::parse(&[0; 9], &rgb).is_ok());
}
