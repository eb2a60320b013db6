//! The per-row predictive filters.
//!
//! Quoting the PNG spec:
//!
//! > Filters are applied to **bytes**, not to pixels, regardless of the bit
//! > depth or color type of the image.
//!
//! Each filtered row is preceded by a tag byte saying which filter was used.
//! Predictions look at `a` (the byte `bpp` positions to the left), `b` (the
//! byte above, in the previous reconstructed row) and `c` (above and to the
//! left). Anything off the left edge is 0, and the row above the first row of
//! each pass is all 0.
//!
//! All the math is wrapping `u8` math, except inside the Paeth predictor.

use super::*;

/// The five filter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum FilterType {
  None = 0,
  Sub = 1,
  Up = 2,
  Average = 3,
  Paeth = 4,
}
impl FilterType {
  /// All filter types, in tag order.
  pub const ALL: [FilterType; 5] =
    [FilterType::None, FilterType::Sub, FilterType::Up, FilterType::Average, FilterType::Paeth];
}
impl TryFrom<u8> for FilterType {
  type Error = PngError;
  #[inline]
  fn try_from(value: u8) -> Result<Self, Self::Error> {
    Ok(match value {
      0 => FilterType::None,
      1 => FilterType::Sub,
      2 => FilterType::Up,
      3 => FilterType::Average,
      4 => FilterType::Paeth,
      other => return Err(PngError::InvalidFilterType(other)),
    })
  }
}

/// How the encoder picks a filter for each row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterChoice {
  /// Use the same filter for every row.
  Fixed(FilterType),
  /// Try all five and keep the one whose output has the smallest sum of
  /// absolute values (treating bytes as signed). Ties go to the lower tag.
  #[default]
  Adaptive,
}

/// The Paeth filter function computes a simple linear function of the three
/// neighboring bytes (left `a`, above `b`, upper left `c`).
///
/// The output is the neighbor closest to the computed value.
#[inline]
#[must_use]
pub const fn paeth_predictor(a: u8, b: u8, c: u8) -> u8 {
  // Note(Lokathor): PNG spec says "The calculations within the PaethPredictor
  // function shall be performed exactly, without overflow.", so we use i32 math
  // here, which is wide enough to never give us trouble no matter what the u8
  // input values are.
  let a_ = a as i32;
  let b_ = b as i32;
  let c_ = c as i32;
  let p = a_ + b_ - c_;
  let pa = (p - a_).abs();
  let pb = (p - b_).abs();
  let pc = (p - c_).abs();
  // Note(Lokathor): The PNG spec is extremely specific that you shall not,
  // under any circumstances, alter the order of evaluation of this
  // expression's tests.
  if pa <= pb && pa <= pc {
    a
  } else if pb <= pc {
    b
  } else {
    c
  }
}

/// Reconstructs a filtered row in place.
///
/// * `bpp` is the filter stride (see [`IHDR::filter_bpp`]), at least 1.
/// * `prev` is the previous reconstructed row of the same pass, or all zero
///   for the first row. It must be the same length as `row`.
///
/// Bytes are processed left to right, so when a prediction reads `a` or `c`
/// it only ever sees bytes that were already reconstructed.
pub fn unfilter_row(filter: FilterType, bpp: usize, prev: &[u8], row: &mut [u8]) {
  debug_assert!(bpp >= 1);
  debug_assert_eq!(prev.len(), row.len());
  let bpp = bpp.min(row.len());
  match filter {
    FilterType::None => (),
    FilterType::Sub => {
      for i in bpp..row.len() {
        row[i] = row[i].wrapping_add(row[i - bpp]);
      }
    }
    FilterType::Up => {
      row.iter_mut().zip(prev.iter()).for_each(|(x, b)| *x = x.wrapping_add(*b));
    }
    FilterType::Average => {
      for i in 0..bpp {
        row[i] = row[i].wrapping_add(prev[i] / 2);
      }
      for i in bpp..row.len() {
        let a = u16::from(row[i - bpp]);
        let b = u16::from(prev[i]);
        row[i] = row[i].wrapping_add(((a + b) / 2) as u8);
      }
    }
    FilterType::Paeth => {
      for i in 0..bpp {
        // `a` and `c` are both 0 here, so the predictor is always `b`.
        row[i] = row[i].wrapping_add(prev[i]);
      }
      for i in bpp..row.len() {
        let p = paeth_predictor(row[i - bpp], prev[i], prev[i - bpp]);
        row[i] = row[i].wrapping_add(p);
      }
    }
  }
}

/// Filters a raw row into `out`, the reverse of [`unfilter_row`].
///
/// `row`, `prev`, and `out` must all be the same length.
pub fn filter_row(filter: FilterType, bpp: usize, prev: &[u8], row: &[u8], out: &mut [u8]) {
  debug_assert!(bpp >= 1);
  debug_assert_eq!(prev.len(), row.len());
  debug_assert_eq!(out.len(), row.len());
  let left = |i: usize, line: &[u8]| if i >= bpp { line[i - bpp] } else { 0 };
  match filter {
    FilterType::None => out.copy_from_slice(row),
    FilterType::Sub => {
      for i in 0..row.len() {
        out[i] = row[i].wrapping_sub(left(i, row));
      }
    }
    FilterType::Up => {
      for i in 0..row.len() {
        out[i] = row[i].wrapping_sub(prev[i]);
      }
    }
    FilterType::Average => {
      for i in 0..row.len() {
        let avg = (u16::from(left(i, row)) + u16::from(prev[i])) / 2;
        out[i] = row[i].wrapping_sub(avg as u8);
      }
    }
    FilterType::Paeth => {
      for i in 0..row.len() {
        out[i] = row[i].wrapping_sub(paeth_predictor(left(i, row), prev[i], left(i, prev)));
      }
    }
  }
}

/// Filters a row the way `choice` says to, writing the tag byte and then the
/// filtered bytes to `out`.
///
/// `out` must be one byte longer than `row`. `scratch` is reused between calls
/// to avoid allocating per row.
pub fn filter_row_with_choice(
  choice: FilterChoice, bpp: usize, prev: &[u8], row: &[u8], out: &mut [u8], scratch: &mut Vec<u8>,
) -> FilterType {
  let (tag, body) = out.split_at_mut(1);
  let chosen = match choice {
    FilterChoice::Fixed(f) => {
      filter_row(f, bpp, prev, row, body);
      f
    }
    FilterChoice::Adaptive => {
      scratch.resize(row.len(), 0);
      let mut best = (u64::MAX, FilterType::None);
      for f in FilterType::ALL {
        filter_row(f, bpp, prev, row, scratch);
        let score: u64 = scratch.iter().map(|&b| u64::from((b as i8).unsigned_abs())).sum();
        if score < best.0 {
          best = (score, f);
          body.copy_from_slice(scratch);
        }
      }
      best.1
    }
  };
  tag[0] = chosen as u8;
  chosen
}

#[test]
fn test_paeth_predictor_tie_order() {
  // all equal distance: `a` wins
  assert_eq!(paeth_predictor(10, 10, 10), 10);
  // p = 10 + 20 - 10 = 20, so `b` is exact
  assert_eq!(paeth_predictor(10, 20, 10), 20);
  // p = 0 + 0 - 255 = -255, pa = pb = 255, pc = 510: `a`
  assert_eq!(paeth_predictor(0, 0, 255), 0);
  // p = 255 + 255 - 0 = 510, pc largest, pa == pb: `a`
  assert_eq!(paeth_predictor(255, 255, 0), 255);
  // p = 3 + 9 - 8 = 4: pa 1, pb 5, pc 4 -> a
  assert_eq!(paeth_predictor(3, 9, 8), 3);
  // p = 9 + 3 - 8 = 4: pa 5, pb 1, pc 4 -> b
  assert_eq!(paeth_predictor(9, 3, 8), 3);
}

#[test]
fn test_filter_then_unfilter_is_identity() {
  let prev: Vec<u8> = (0..23_u32).map(|i| (i * 53 + 7) as u8).collect();
  let row: Vec<u8> = (0..23_u32).map(|i| (i * 191 + 250) as u8).collect();
  for bpp in [1, 2, 3, 4, 6, 8] {
    for f in FilterType::ALL {
      let mut filtered = alloc::vec![0; row.len()];
      filter_row(f, bpp, &prev, &row, &mut filtered);
      unfilter_row(f, bpp, &prev, &mut filtered);
      assert_eq!(filtered, row, "filter {f:?} bpp {bpp}");
    }
  }
}

#[test]
fn test_unfilter_known_values() {
  let prev = [10, 20, 30, 40];
  let mut row = [1, 1, 1, 1];
  unfilter_row(FilterType::Sub, 1, &prev, &mut row);
  assert_eq!(row, [1, 2, 3, 4]);
  let mut row = [1, 1, 255, 1];
  unfilter_row(FilterType::Up, 1, &prev, &mut row);
  assert_eq!(row, [11, 21, 29, 41]);
  let mut row = [0, 0, 0, 0];
  unfilter_row(FilterType::Average, 2, &prev, &mut row);
  // [10/2, 20/2, (5+30)/2, (10+40)/2]
  assert_eq!(row, [5, 10, 17, 25]);
  let mut row = [0, 0, 0, 0];
  unfilter_row(FilterType::Paeth, 1, &[0; 4], &mut row);
  assert_eq!(row, [0, 0, 0, 0]);
}

#[test]
fn test_filter_type_tags() {
  for f in FilterType::ALL {
    assert_eq!(FilterType::try_from(f as u8), Ok(f));
  }
  assert_eq!(FilterType::try_from(5), Err(PngError::InvalidFilterType(5)));
}

#[test]
fn test_adaptive_choice_prefers_smooth_filters() {
  // a ramp is all zeros after Sub (except the first byte)
  let row: Vec<u8> = (0..32).collect();
  let prev = [0_u8; 32];
  let mut out = [0_u8; 33];
  let mut scratch = Vec::new();
  let f = filter_row_with_choice(FilterChoice::Adaptive, 1, &prev, &row, &mut out, &mut scratch);
  assert_eq!(f, FilterType::Sub);
  assert_eq!(out[0], 1);
  let mut back = out[1..].to_vec();
  unfilter_row(f, 1, &prev, &mut back);
  assert_eq!(back, row);
}
