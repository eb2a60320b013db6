//! Chunk ordering rules.
//!
//! The decoder feeds each verified chunk type through a [`ChunkOrder`] before
//! acting on it. Breaking a rule about a critical chunk is fatal, breaking a
//! rule about an ancillary chunk just gets that chunk skipped.

use super::*;

/// Where the stream is relative to the `IDAT` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdatRun {
  NotStarted,
  Inside,
  Ended,
}

/// The ordering state of one stream, from after `IHDR` on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOrder {
  color_type: PngColorType,
  palette_len: usize,
  seen_plte: bool,
  idat: IdatRun,
  /// bit `n` is set once the [`AncillaryKind`] with discriminant `n` was
  /// accepted
  seen_once: u32,
}
impl ChunkOrder {
  /// The state right after a valid `IHDR`.
  #[must_use]
  pub const fn new(header: &IHDR) -> Self {
    Self { color_type: header.color_type, palette_len: 0, seen_plte: false, idat: IdatRun::NotStarted, seen_once: 0 }
  }

  #[inline]
  #[must_use]
  pub const fn idat_run(&self) -> IdatRun {
    self.idat
  }

  #[inline]
  #[must_use]
  pub const fn palette_len(&self) -> usize {
    self.palette_len
  }

  /// Notes that a chunk of this type arrived. If this ends the `IDAT` run the
  /// output is `true`.
  pub fn end_of_idat_run(&mut self, chunk_ty: ChunkType) -> bool {
    if self.idat == IdatRun::Inside && chunk_ty != ChunkType::IDAT {
      self.idat = IdatRun::Ended;
      true
    } else {
      false
    }
  }

  /// Checks a critical chunk, and advances the state if it's allowed.
  ///
  /// ## Failure
  /// * A second `IHDR`.
  /// * `PLTE` twice, after `IDAT`, or in a greyscale image.
  /// * `IDAT` after the run ended, or before the required `PLTE` of an
  ///   indexed image.
  /// * `IEND` before any `IDAT`.
  pub fn check_critical(&mut self, chunk_ty: ChunkType, data_len: usize) -> PngResult<()> {
    match chunk_ty {
      ChunkType::IHDR => Err(PngError::StructuralOrderViolation("IHDR must appear once, first")),
      ChunkType::PLTE => {
        if self.seen_plte {
          Err(PngError::StructuralOrderViolation("more than one PLTE"))
        } else if self.idat != IdatRun::NotStarted {
          Err(PngError::StructuralOrderViolation("PLTE after IDAT"))
        } else if matches!(self.color_type, PngColorType::Y | PngColorType::YA) {
          Err(PngError::StructuralOrderViolation("PLTE in a greyscale image"))
        } else {
          self.seen_plte = true;
          self.palette_len = data_len / 3;
          Ok(())
        }
      }
      ChunkType::IDAT => match self.idat {
        IdatRun::Ended => Err(PngError::StructuralOrderViolation("IDAT chunks are not contiguous")),
        _ if self.color_type == PngColorType::Index && !self.seen_plte => {
          Err(PngError::StructuralOrderViolation("indexed image has no PLTE before IDAT"))
        }
        _ => {
          self.idat = IdatRun::Inside;
          Ok(())
        }
      },
      ChunkType::IEND => {
        if self.idat == IdatRun::NotStarted {
          Err(PngError::StructuralOrderViolation("IEND before any IDAT"))
        } else {
          Ok(())
        }
      }
      other => Err(PngError::UnsupportedCriticalChunk(other)),
    }
  }

  /// Checks a known ancillary chunk. If it should be skipped the output is
  /// the warning to report.
  ///
  /// This doesn't count the chunk as seen, since its content may still turn
  /// out to be malformed. Call [`accept_ancillary`](Self::accept_ancillary)
  /// once it's kept.
  pub fn check_ancillary(&self, kind: AncillaryKind) -> Option<PngWarning> {
    let chunk_ty = kind.chunk_type();
    let bit = 1_u32 << (kind as u32);
    if kind.at_most_once() && (self.seen_once & bit) != 0 {
      return Some(PngWarning::DuplicateAncillaryChunk(chunk_ty));
    }
    let misplaced = (kind.before_plte() && self.seen_plte)
      || (kind.before_idat() && self.idat != IdatRun::NotStarted)
      || (kind.after_plte()
        && !self.seen_plte
        && (kind == AncillaryKind::hIST || self.color_type == PngColorType::Index));
    if misplaced {
      return Some(PngWarning::MisplacedAncillaryChunk(chunk_ty));
    }
    None
  }

  /// Notes that a chunk of this kind was kept, so a later copy of an
  /// at-most-once kind is a duplicate.
  pub fn accept_ancillary(&mut self, kind: AncillaryKind) {
    if kind.at_most_once() {
      self.seen_once |= 1_u32 << (kind as u32);
    }
  }
}

#[cfg(test)]
fn order_for(color_type: PngColorType) -> ChunkOrder {
  ChunkOrder::new(&IHDR { width: 1, height: 1, bit_depth: 8, color_type, is_interlaced: false })
}

#[test]
fn test_critical_order() {
  let mut o = order_for(PngColorType::Index);
  assert!(matches!(o.check_critical(ChunkType::IDAT, 10), Err(PngError::StructuralOrderViolation(_))));
  assert!(matches!(o.check_critical(ChunkType::IEND, 0), Err(PngError::StructuralOrderViolation(_))));
  o.check_critical(ChunkType::PLTE, 9).unwrap();
  assert_eq!(o.palette_len(), 3);
  assert!(o.check_critical(ChunkType::PLTE, 9).is_err());
  o.check_critical(ChunkType::IDAT, 10).unwrap();
  o.check_critical(ChunkType::IDAT, 10).unwrap();
  assert!(!o.end_of_idat_run(ChunkType::IDAT));
  assert!(o.end_of_idat_run(ChunkType::tEXt));
  assert!(!o.end_of_idat_run(ChunkType::tEXt));
  assert!(matches!(o.check_critical(ChunkType::IDAT, 10), Err(PngError::StructuralOrderViolation(_))));
  assert!(matches!(o.check_critical(ChunkType::PLTE, 9), Err(PngError::StructuralOrderViolation(_))));
  o.check_critical(ChunkType::IEND, 0).unwrap();
  assert_eq!(
    o.check_critical(ChunkType(*b"ZZZZ"), 0),
    Err(PngError::UnsupportedCriticalChunk(ChunkType(*b"ZZZZ")))
  );
}

#[test]
fn test_greyscale_rejects_palette() {
  let mut o = order_for(PngColorType::YA);
  assert!(matches!(o.check_critical(ChunkType::PLTE, 9), Err(PngError::StructuralOrderViolation(_))));
  // but a truecolor image may carry a suggested palette
  let mut o = order_for(PngColorType::RGB);
  assert!(o.check_critical(ChunkType::PLTE, 9).is_ok());
}

#[test]
fn test_ancillary_order() {
  let mut o = order_for(PngColorType::Index);
  assert_eq!(o.check_ancillary(AncillaryKind::gAMA), None);
  o.accept_ancillary(AncillaryKind::gAMA);
  assert_eq!(o.check_ancillary(AncillaryKind::gAMA), Some(PngWarning::DuplicateAncillaryChunk(ChunkType::gAMA)));
  assert_eq!(o.check_ancillary(AncillaryKind::tRNS), Some(PngWarning::MisplacedAncillaryChunk(ChunkType::tRNS)));
  o.check_critical(ChunkType::PLTE, 6).unwrap();
  assert_eq!(o.check_ancillary(AncillaryKind::sRGB), Some(PngWarning::MisplacedAncillaryChunk(ChunkType::sRGB)));
  assert_eq!(o.check_ancillary(AncillaryKind::tRNS), None);
  o.check_critical(ChunkType::IDAT, 1).unwrap();
  assert_eq!(o.check_ancillary(AncillaryKind::pHYs), Some(PngWarning::MisplacedAncillaryChunk(ChunkType::pHYs)));
  o.accept_ancillary(AncillaryKind::tEXt);
  assert_eq!(o.check_ancillary(AncillaryKind::tEXt), None);
  assert_eq!(o.check_ancillary(AncillaryKind::tIME), None);
  o.accept_ancillary(AncillaryKind::tIME);
  assert_eq!(o.check_ancillary(AncillaryKind::tIME), Some(PngWarning::DuplicateAncillaryChunk(ChunkType::tIME)));
}

#[test]
fn test_rejected_copy_does_not_count_as_seen() {
  let o = order_for(PngColorType::RGB);
  // a first gAMA that's checked but then thrown out as malformed
  assert_eq!(o.check_ancillary(AncillaryKind::gAMA), None);
  // leaves room for a good one
  assert_eq!(o.check_ancillary(AncillaryKind::gAMA), None);
}
