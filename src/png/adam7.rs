//! Adam7 interlacing.
//!
//! An interlaced image is stored as 7 "reduced" images, each one taking the
//! pixels of the full image at a particular offset and stride:
//!
//! ```txt
//! 1 6 4 6 2 6 4 6
//! 7 7 7 7 7 7 7 7
//! 5 6 5 6 5 6 5 6
//! 7 7 7 7 7 7 7 7
//! 3 6 4 6 3 6 4 6
//! 7 7 7 7 7 7 7 7
//! 5 6 5 6 5 6 5 6
//! 7 7 7 7 7 7 7 7
//! ```
//!
//! Every pixel of the full image belongs to exactly one pass. A
//! non-interlaced image is handled as a single pass with a stride of 1, so the
//! rest of the codec never has to care about the difference.

use super::*;

/// Where a pass starts and how far apart its pixels are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassGeometry {
  pub x_start: u32,
  pub y_start: u32,
  pub x_step: u32,
  pub y_step: u32,
}

/// The geometry of Adam7 passes 1 through 7 (at indexes 0 through 6).
pub const ADAM7_PASSES: [PassGeometry; 7] = [
  PassGeometry { x_start: 0, y_start: 0, x_step: 8, y_step: 8 },
  PassGeometry { x_start: 4, y_start: 0, x_step: 8, y_step: 8 },
  PassGeometry { x_start: 0, y_start: 4, x_step: 4, y_step: 8 },
  PassGeometry { x_start: 2, y_start: 0, x_step: 4, y_step: 4 },
  PassGeometry { x_start: 0, y_start: 2, x_step: 2, y_step: 4 },
  PassGeometry { x_start: 1, y_start: 0, x_step: 2, y_step: 2 },
  PassGeometry { x_start: 0, y_start: 1, x_step: 1, y_step: 2 },
];

/// The single pass of a non-interlaced image.
pub const FULL_IMAGE_PASS: PassGeometry = PassGeometry { x_start: 0, y_start: 0, x_step: 1, y_step: 1 };

/// Given the dimensions of the full PNG image, computes the size of each
/// reduced image.
///
/// The output uses index 0 as the base image size, and indexes 1 through 7 for
/// the size of reduced images 1 through 7.
#[inline]
#[must_use]
pub const fn reduced_image_dimensions(full_width: u32, full_height: u32) -> [(u32, u32); 8] {
  let full_patterns_wide = full_width / 8;
  let full_patterns_high = full_height / 8;
  //
  let partial_pattern_width = full_width % 8;
  let partial_pattern_height = full_height % 8;
  //
  let zero = (full_width, full_height);
  //
  let first = (
    full_patterns_wide + (partial_pattern_width + 7) / 8,
    full_patterns_high + (partial_pattern_height + 7) / 8,
  );
  let second = (
    full_patterns_wide + (partial_pattern_width + 3) / 8,
    full_patterns_high + (partial_pattern_height + 7) / 8,
  );
  let third = (
    full_patterns_wide * 2 + ((partial_pattern_width + 3) / 4),
    full_patterns_high + ((partial_pattern_height + 3) / 8),
  );
  let fourth = (
    full_patterns_wide * 2 + (partial_pattern_width + 1) / 4,
    full_patterns_high * 2 + (partial_pattern_height + 3) / 4,
  );
  let fifth = (
    full_patterns_wide * 4 + ((partial_pattern_width + 1) / 2),
    full_patterns_high * 2 + (partial_pattern_height + 1) / 4,
  );
  let sixth = (
    full_patterns_wide * 4 + partial_pattern_width / 2,
    full_patterns_high * 4 + ((partial_pattern_height + 1) / 2),
  );
  let seventh = (
    full_patterns_wide * 8 + partial_pattern_width,
    full_patterns_high * 4 + (partial_pattern_height / 2),
  );
  //
  [zero, first, second, third, fourth, fifth, sixth, seventh]
}

/// One pass of the image, with its reduced size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterlacePass {
  /// 0 through 6 for Adam7 passes, or 0 for the only pass of a
  /// non-interlaced image.
  pub index: u8,
  pub geometry: PassGeometry,
  /// width of the reduced image
  pub width: u32,
  /// height of the reduced image
  pub height: u32,
}
impl InterlacePass {
  /// If the pass holds no pixels. Such passes have no rows in the stream,
  /// not even filter tags.
  #[inline]
  #[must_use]
  pub const fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }

  /// Converts a reduced image location into the full image location.
  #[inline]
  #[must_use]
  pub const fn to_full(&self, reduced_x: u32, reduced_y: u32) -> (u32, u32) {
    let g = self.geometry;
    (g.x_start + reduced_x * g.x_step, g.y_start + reduced_y * g.y_step)
  }
}

/// All passes that hold pixels, in stream order.
///
/// Passes with zero width or height are skipped.
pub fn interlace_passes(
  width: u32, height: u32, is_interlaced: bool,
) -> impl Iterator<Item = InterlacePass> {
  let dims = reduced_image_dimensions(width, height);
  let count = if is_interlaced { 7 } else { 1 };
  (0..count)
    .map(move |i| {
      if is_interlaced {
        let (w, h) = dims[i + 1];
        InterlacePass { index: i as u8, geometry: ADAM7_PASSES[i], width: w, height: h }
      } else {
        InterlacePass { index: 0, geometry: FULL_IMAGE_PASS, width, height }
      }
    })
    .filter(|pass| !pass.is_empty())
}

/// Converts a full image location into `(pass index, reduced_x, reduced_y)`.
#[inline]
#[must_use]
pub const fn full_pos_to_interlaced_pos(x: u32, y: u32) -> (u8, u32, u32) {
  #[rustfmt::skip]
  const PASS_OF: [[u8; 8]; 8] = [
    [0, 5, 3, 5, 1, 5, 3, 5],
    [6, 6, 6, 6, 6, 6, 6, 6],
    [4, 5, 4, 5, 4, 5, 4, 5],
    [6, 6, 6, 6, 6, 6, 6, 6],
    [2, 5, 3, 5, 2, 5, 3, 5],
    [6, 6, 6, 6, 6, 6, 6, 6],
    [4, 5, 4, 5, 4, 5, 4, 5],
    [6, 6, 6, 6, 6, 6, 6, 6],
  ];
  let pass = PASS_OF[(y % 8) as usize][(x % 8) as usize];
  let g = ADAM7_PASSES[pass as usize];
  (pass, (x - g.x_start) / g.x_step, (y - g.y_start) / g.y_step)
}

/// Reads pixel `x` out of a packed row.
///
/// The output is the pixel's bytes in the low bytes of an array, or for
/// sub-byte depths, the pixel value in the low bits of the first byte.
#[inline]
fn read_pixel(row: &[u8], x: usize, bits_per_pixel: usize) -> [u8; 8] {
  let mut out = [0_u8; 8];
  if bits_per_pixel >= 8 {
    let n = bits_per_pixel / 8;
    out[..n].copy_from_slice(&row[x * n..x * n + n]);
  } else {
    let per_byte = 8 / bits_per_pixel;
    let shift = 8 - bits_per_pixel * (x % per_byte + 1);
    let mask = (1_u8 << bits_per_pixel) - 1;
    out[0] = (row[x / per_byte] >> shift) & mask;
  }
  out
}

/// Writes pixel `x` of a packed row, the reverse of [`read_pixel`].
#[inline]
fn write_pixel(row: &mut [u8], x: usize, bits_per_pixel: usize, pixel: [u8; 8]) {
  if bits_per_pixel >= 8 {
    let n = bits_per_pixel / 8;
    row[x * n..x * n + n].copy_from_slice(&pixel[..n]);
  } else {
    let per_byte = 8 / bits_per_pixel;
    let shift = 8 - bits_per_pixel * (x % per_byte + 1);
    let mask = ((1_u8 << bits_per_pixel) - 1) << shift;
    let byte = &mut row[x / per_byte];
    *byte = (*byte & !mask) | ((pixel[0] << shift) & mask);
  }
}

/// A full-resolution image buffer that reduced rows are scattered into (when
/// decoding) or gathered from (when encoding).
///
/// It also counts how many pixels of each full row have been written, so
/// that the decoder knows when a row is final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adam7Canvas {
  width: u32,
  bits_per_pixel: usize,
  stride: usize,
  bytes: Vec<u8>,
  filled: Vec<u32>,
}
impl Adam7Canvas {
  /// An all-zero canvas for the header's image.
  pub fn new(header: &IHDR) -> PngResult<Self> {
    let stride = header.bytes_per_full_row()?;
    let total = header.raw_image_bytes()?;
    let mut bytes = Vec::new();
    bytes.try_reserve_exact(total).map_err(|_| PngError::ImageTooLarge)?;
    bytes.resize(total, 0);
    let mut filled = Vec::new();
    filled.try_reserve_exact(header.height as usize).map_err(|_| PngError::ImageTooLarge)?;
    filled.resize(header.height as usize, 0);
    Ok(Self { width: header.width, bits_per_pixel: header.bits_per_pixel(), stride, bytes, filled })
  }

  /// Bytes per full row.
  #[inline]
  #[must_use]
  pub fn stride(&self) -> usize {
    self.stride
  }

  /// A full row.
  #[inline]
  #[must_use]
  pub fn row(&self, y: u32) -> &[u8] {
    let start = y as usize * self.stride;
    &self.bytes[start..start + self.stride]
  }

  /// A full row, for filling in before gathering.
  #[inline]
  #[must_use]
  pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
    let start = y as usize * self.stride;
    &mut self.bytes[start..start + self.stride]
  }

  /// If every pixel of the row has been scattered in.
  #[inline]
  #[must_use]
  pub fn is_row_complete(&self, y: u32) -> bool {
    self.filled[y as usize] == self.width
  }

  /// Places the pixels of one reduced row into the full image, returning the
  /// full image row that it landed on.
  pub fn scatter(&mut self, pass: &InterlacePass, reduced_y: u32, reduced_row: &[u8]) -> u32 {
    let (_, y) = pass.to_full(0, reduced_y);
    let start = y as usize * self.stride;
    let full_row = &mut self.bytes[start..start + self.stride];
    let g = pass.geometry;
    if g.x_step == 1 {
      full_row.copy_from_slice(&reduced_row[..self.stride]);
    } else {
      for reduced_x in 0..pass.width as usize {
        let x = g.x_start as usize + reduced_x * g.x_step as usize;
        let pixel = read_pixel(reduced_row, reduced_x, self.bits_per_pixel);
        write_pixel(full_row, x, self.bits_per_pixel, pixel);
      }
    }
    self.filled[y as usize] += pass.width;
    y
  }

  /// Collects the pixels of one reduced row out of the full image.
  ///
  /// `out` must be the reduced row's byte length. Padding bits at the end of
  /// a sub-byte row are left zero.
  pub fn gather(&self, pass: &InterlacePass, reduced_y: u32, out: &mut [u8]) {
    let (_, y) = pass.to_full(0, reduced_y);
    let full_row = self.row(y);
    let g = pass.geometry;
    if g.x_step == 1 {
      out.copy_from_slice(full_row);
    } else {
      out.fill(0);
      for reduced_x in 0..pass.width as usize {
        let x = g.x_start as usize + reduced_x * g.x_step as usize;
        let pixel = read_pixel(full_row, x, self.bits_per_pixel);
        write_pixel(out, reduced_x, self.bits_per_pixel, pixel);
      }
    }
  }
}

#[test]
fn test_reduced_image_dimensions() {
  assert_eq!(reduced_image_dimensions(0, 0), [(0, 0); 8]);
  // one
  for (w, ex) in (1..=8).zip([1, 1, 1, 1, 1, 1, 1, 1]) {
    assert_eq!(reduced_image_dimensions(w, 0)[1].0, ex, "failed w:{w}");
  }
  // two
  for (w, ex) in (1..=8).zip([0, 0, 0, 0, 1, 1, 1, 1]) {
    assert_eq!(reduced_image_dimensions(w, 0)[2].0, ex, "failed w:{w}");
  }
  // three
  for (h, ex) in (1..=8).zip([0, 0, 0, 0, 1, 1, 1, 1]) {
    assert_eq!(reduced_image_dimensions(0, h)[3].1, ex, "failed h: {h}");
  }
  // six
  for (w, ex) in (1..=8).zip([0, 1, 1, 2, 2, 3, 3, 4]) {
    assert_eq!(reduced_image_dimensions(w, 0)[6].0, ex, "failed w: {w}");
  }
  // seven
  for (h, ex) in (1..=8).zip([0, 1, 1, 2, 2, 3, 3, 4]) {
    assert_eq!(reduced_image_dimensions(0, h)[7].1, ex, "failed h: {h}");
  }
  //
  assert_eq!(
    reduced_image_dimensions(8, 8),
    [
      (8, 8), // zeroth
      (1, 1), // one
      (1, 1), // two
      (2, 1), // three
      (2, 2), // four
      (4, 2), // five
      (4, 4), // six
      (8, 4), // seven
    ]
  );
}

#[test]
fn test_reduced_dimensions_match_geometry() {
  fn count(full: u32, start: u32, step: u32) -> u32 {
    if full <= start {
      0
    } else {
      (full - start + step - 1) / step
    }
  }
  for w in 0..40 {
    for h in 0..40 {
      let dims = reduced_image_dimensions(w, h);
      for (i, g) in ADAM7_PASSES.iter().enumerate() {
        assert_eq!(dims[i + 1], (count(w, g.x_start, g.x_step), count(h, g.y_start, g.y_step)));
      }
    }
  }
}

#[test]
fn test_passes_cover_every_pixel_once() {
  for w in 1..=19 {
    for h in 1..=19 {
      let mut hits = alloc::vec![0_u8; (w * h) as usize];
      for pass in interlace_passes(w, h, true) {
        assert!(!pass.is_empty());
        for ry in 0..pass.height {
          for rx in 0..pass.width {
            let (x, y) = pass.to_full(rx, ry);
            assert!(x < w && y < h);
            hits[(y * w + x) as usize] += 1;
            assert_eq!(full_pos_to_interlaced_pos(x, y), (pass.index, rx, ry));
          }
        }
      }
      assert!(hits.iter().all(|&n| n == 1), "w {w}, h {h}");
    }
  }
}

#[test]
fn test_tiny_images_skip_empty_passes() {
  let indexes: Vec<u8> = interlace_passes(1, 1, true).map(|p| p.index).collect();
  assert_eq!(indexes, [0]);
  let indexes: Vec<u8> = interlace_passes(3, 2, true).map(|p| p.index).collect();
  assert_eq!(indexes, [0, 3, 5, 6]);
  let only: Vec<InterlacePass> = interlace_passes(5, 9, false).collect();
  assert_eq!(only, [InterlacePass { index: 0, geometry: FULL_IMAGE_PASS, width: 5, height: 9 }]);
}

#[test]
fn test_canvas_scatter_then_gather_sub_byte() {
  let header =
    IHDR { width: 11, height: 5, bit_depth: 2, color_type: PngColorType::Y, is_interlaced: true };
  let mut source = Adam7Canvas::new(&header).unwrap();
  for y in 0..5 {
    for (i, b) in source.row_mut(y).iter_mut().enumerate() {
      *b = (y as u8).wrapping_mul(37) ^ (i as u8).wrapping_mul(101);
    }
    // clear the padding bits of the last byte
    let last = source.stride() - 1;
    source.row_mut(y)[last] &= 0b1111_1100;
  }
  let mut rebuilt = Adam7Canvas::new(&header).unwrap();
  for pass in interlace_passes(11, 5, true) {
    let mut reduced = alloc::vec![0; header.bytes_per_row(pass.width).unwrap()];
    for ry in 0..pass.height {
      source.gather(&pass, ry, &mut reduced);
      rebuilt.scatter(&pass, ry, &reduced);
    }
  }
  for y in 0..5 {
    assert!(rebuilt.is_row_complete(y));
    assert_eq!(rebuilt.row(y), source.row(y), "row {y}");
  }
}
