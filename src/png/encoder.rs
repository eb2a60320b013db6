//! The encoding session.
//!
//! Rows go in one at a time with [`PngEncoder::encode_row`], and PNG bytes
//! come out as soon as there's a full `IDAT` chunk's worth. The first call
//! also gives the signature and every chunk that goes before the image data.
//!
//! Interlaced images can't be filtered until all rows are known, so their
//! rows are kept and all of the image data comes out of
//! [`finish`](PngEncoder::finish).

use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncodeStage {
  Start,
  Rows,
  Fatal(PngError),
}

/// An incremental PNG encoder.
#[derive(Debug)]
pub struct PngEncoder {
  config: EncoderConfig,
  stage: EncodeStage,
  ctx: ZlibContext,
  claim: Option<ZlibClaim>,
  row_bytes: usize,
  rows_given: u32,
  prev: Vec<u8>,
  filtered: Vec<u8>,
  scratch: Vec<u8>,
  /// compressed image data not yet put in a chunk
  pending: Vec<u8>,
  canvas: Option<Adam7Canvas>,
}
impl PngEncoder {
  /// Starts a new encoding session.
  ///
  /// ## Failure
  /// * The config must pass [`EncoderConfig::validate`].
  pub fn new(config: EncoderConfig) -> PngResult<Self> {
    config.validate()?;
    let header = config.header;
    let row_bytes = header.bytes_per_full_row()?;
    let canvas = if header.is_interlaced { Some(Adam7Canvas::new(&header)?) } else { None };
    let ctx = ZlibContext::for_deflate(config.compression_level, config.strategy);
    Ok(Self {
      config,
      stage: EncodeStage::Start,
      ctx,
      claim: None,
      row_bytes,
      rows_given: 0,
      prev: alloc::vec![0; row_bytes],
      filtered: alloc::vec![0; row_bytes + 1],
      scratch: Vec::new(),
      pending: Vec::new(),
      canvas,
    })
  }

  /// The header being written.
  #[inline]
  #[must_use]
  pub fn header(&self) -> &IHDR {
    &self.config.header
  }

  /// Bytes each row given to [`encode_row`](Self::encode_row) must have.
  #[inline]
  #[must_use]
  pub fn row_bytes(&self) -> usize {
    self.row_bytes
  }

  /// Adds the next row of the image, top to bottom.
  ///
  /// The output is whatever PNG bytes are ready, possibly none. Padding bits
  /// at the end of a row with less than 8 bits per pixel are written as 0.
  ///
  /// ## Failure
  /// * The row must be exactly [`row_bytes`](Self::row_bytes) long.
  /// * There can't be more rows than the image height.
  /// * After any error the session only gives [`PngError::SessionFailed`].
  pub fn encode_row(&mut self, row: &[u8]) -> PngResult<Vec<u8>> {
    if let EncodeStage::Fatal(_) = self.stage {
      return Err(PngError::SessionFailed);
    }
    let mut out = Vec::new();
    match self.push_row(row, &mut out) {
      Ok(()) => Ok(out),
      Err(e) => {
        self.fail(e);
        Err(e)
      }
    }
  }

  /// Ends the image, giving the rest of the PNG bytes.
  ///
  /// ## Failure
  /// * Every row must have been given.
  pub fn finish(mut self) -> PngResult<Vec<u8>> {
    if let EncodeStage::Fatal(_) = self.stage {
      return Err(PngError::SessionFailed);
    }
    let mut out = Vec::new();
    match self.write_trailer(&mut out) {
      Ok(()) => Ok(out),
      Err(e) => {
        self.fail(e);
        Err(e)
      }
    }
  }

  fn fail(&mut self, e: PngError) {
    if let Some(claim) = self.claim.take() {
      // the claim came from this encoder's own context
      let _ = self.ctx.abort(claim);
    }
    debug!("encode failed: {e}");
    self.stage = EncodeStage::Fatal(e);
  }

  fn push_row(&mut self, row: &[u8], out: &mut Vec<u8>) -> PngResult<()> {
    if self.rows_given >= self.config.header.height {
      return Err(PngError::TooManyRows);
    }
    if row.len() != self.row_bytes {
      return Err(PngError::RowLengthMismatch { expected: self.row_bytes, actual: row.len() });
    }
    if self.stage == EncodeStage::Start {
      self.write_leading_chunks(out)?;
      self.claim = Some(self.ctx.claim(ClaimPurpose::ImageData)?);
      self.stage = EncodeStage::Rows;
    }
    let header = self.config.header;
    if let Some(canvas) = self.canvas.as_mut() {
      let dest = canvas.row_mut(self.rows_given);
      dest.copy_from_slice(row);
      clear_padding_bits(dest, header.width, header.bits_per_pixel());
    } else {
      let mut raw = row.to_vec();
      clear_padding_bits(&mut raw, header.width, header.bits_per_pixel());
      filter_row_with_choice(
        self.config.filter,
        header.filter_bpp(),
        &self.prev,
        &raw,
        &mut self.filtered,
        &mut self.scratch,
      );
      self.prev = raw;
      self.compress_filtered()?;
      self.frame_idat(out, false)?;
    }
    self.rows_given += 1;
    Ok(())
  }

  fn compress_filtered(&mut self) -> PngResult<()> {
    let claim = self.claim.as_mut().ok_or(PngError::SessionFailed)?;
    claim.write(&self.filtered, &mut self.pending)
  }

  /// Frames pending image data into `IDAT` chunks. Unless `all` is set, a
  /// partial chunk stays pending.
  fn frame_idat(&mut self, out: &mut Vec<u8>, all: bool) -> PngResult<()> {
    let size = self.config.idat_chunk_size as usize;
    let mut start = 0;
    while self.pending.len() - start >= size || (all && start < self.pending.len()) {
      let end = (start + size).min(self.pending.len());
      write_chunk_into(out, ChunkType::IDAT, &self.pending[start..end])?;
      trace!("wrote IDAT chunk of {} bytes", end - start);
      start = end;
    }
    self.pending.drain(..start);
    Ok(())
  }

  /// Signature, `IHDR`, and every chunk that has to come before `IDAT`.
  fn write_leading_chunks(&mut self, out: &mut Vec<u8>) -> PngResult<()> {
    let header = self.config.header;
    out.extend_from_slice(&PNG_SIGNATURE);
    write_chunk_into(out, ChunkType::IHDR, &header.to_bytes())?;
    let (early, late): (Vec<&AncillaryChunk>, Vec<&AncillaryChunk>) = self
      .config
      .ancillary
      .iter()
      .partition(|c| AncillaryKind::of(c.chunk_ty).is_some_and(AncillaryKind::before_plte));
    for chunk in early {
      write_chunk_into(out, chunk.chunk_ty, &chunk.data)?;
    }
    if let Some(icc) = &self.config.icc_profile {
      let data = icc.to_chunk_data(&mut self.ctx)?;
      write_chunk_into(out, ChunkType::iCCP, &data)?;
    }
    if let Some(palette) = &self.config.palette {
      write_chunk_into(out, ChunkType::PLTE, palette.as_bytes())?;
    }
    for chunk in late {
      write_chunk_into(out, chunk.chunk_ty, &chunk.data)?;
    }
    debug!("wrote leading chunks for {header:?}");
    Ok(())
  }

  /// All remaining image data, the text chunks, and `IEND`.
  fn write_trailer(&mut self, out: &mut Vec<u8>) -> PngResult<()> {
    let header = self.config.header;
    if self.rows_given < header.height {
      return Err(PngError::MissingRows(header.height - self.rows_given));
    }
    if let Some(canvas) = self.canvas.take() {
      let bpp = header.filter_bpp();
      for pass in interlace_passes(header.width, header.height, true) {
        let reduced_bytes = header.bytes_per_row(pass.width)?;
        let mut prev = alloc::vec![0; reduced_bytes];
        let mut reduced = alloc::vec![0; reduced_bytes];
        self.filtered.resize(reduced_bytes + 1, 0);
        for reduced_y in 0..pass.height {
          canvas.gather(&pass, reduced_y, &mut reduced);
          filter_row_with_choice(self.config.filter, bpp, &prev, &reduced, &mut self.filtered, &mut self.scratch);
          core::mem::swap(&mut prev, &mut reduced);
          self.compress_filtered()?;
        }
        debug!("compressed pass {}", pass.index);
      }
    }
    let claim = self.claim.take().ok_or(PngError::SessionFailed)?;
    let tail = self.ctx.finish(claim)?;
    self.pending.extend_from_slice(&tail);
    self.frame_idat(out, true)?;
    let texts = core::mem::take(&mut self.config.texts);
    for text in &texts {
      let data = text.to_chunk_data(&mut self.ctx)?;
      write_chunk_into(out, text.chunk_type(), &data)?;
    }
    write_chunk_into(out, ChunkType::IEND, &[])?;
    debug!("finished encoding");
    Ok(())
  }
}

/// Zeroes the unused low bits of the last byte of a packed row.
fn clear_padding_bits(row: &mut [u8], width: u32, bits_per_pixel: usize) {
  let used_bits = width as usize * bits_per_pixel;
  let spare = (8 - used_bits % 8) % 8;
  if let Some(last) = row.last_mut() {
    *last &= 0xFF_u8 << spare;
  }
}

/// Encodes a whole image in one go.
pub fn encode_png<R: AsRef<[u8]>>(
  config: EncoderConfig, rows: impl IntoIterator<Item = R>,
) -> PngResult<Vec<u8>> {
  let mut encoder = PngEncoder::new(config)?;
  let mut out = Vec::new();
  for row in rows {
    out.extend_from_slice(&encoder.encode_row(row.as_ref())?);
  }
  out.extend_from_slice(&encoder.finish()?);
  Ok(out)
}

#[test]
fn test_clear_padding_bits() {
  let mut row = [0xFF_u8; 2];
  clear_padding_bits(&mut row, 3, 4);
  assert_eq!(row, [0xFF, 0xF0]);
  let mut row = [0xFF_u8; 1];
  clear_padding_bits(&mut row, 7, 1);
  assert_eq!(row, [0xFE]);
  let mut row = [0xFF_u8; 3];
  clear_padding_bits(&mut row, 1, 24);
  assert_eq!(row, [0xFF; 3]);
}

#[test]
fn test_encoder_misuse() {
  let header =
    IHDR { width: 3, height: 2, bit_depth: 8, color_type: PngColorType::RGB, is_interlaced: false };
  let mut enc = PngEncoder::new(EncoderConfig::new(header)).unwrap();
  assert_eq!(enc.row_bytes(), 9);
  assert_eq!(enc.encode_row(&[0; 8]), Err(PngError::RowLengthMismatch { expected: 9, actual: 8 }));
  assert_eq!(enc.encode_row(&[0; 9]), Err(PngError::SessionFailed));

  let mut enc = PngEncoder::new(EncoderConfig::new(header)).unwrap();
  let first = enc.encode_row(&[1; 9]).unwrap();
  assert!(is_png_signature_correct(&first));
  assert_eq!(enc.finish(), Err(PngError::MissingRows(1)));

  let mut enc = PngEncoder::new(EncoderConfig::new(header)).unwrap();
  enc.encode_row(&[1; 9]).unwrap();
  enc.encode_row(&[2; 9]).unwrap();
  assert_eq!(enc.encode_row(&[3; 9]), Err(PngError::TooManyRows));
}

#[test]
fn test_idat_chunks_are_split() {
  let header =
    IHDR { width: 64, height: 64, bit_depth: 8, color_type: PngColorType::RGBA, is_interlaced: false };
  let config = EncoderConfig::new(header).with_compression(0, DeflateStrategy::Default).with_idat_chunk_size(1000);
  let rows: Vec<Vec<u8>> = (0..64_u32).map(|y| (0..256_u32).map(|x| (x * 7 + y * 13) as u8).collect()).collect();
  let png = encode_png(config, &rows).unwrap();
  let idat_sizes: Vec<usize> =
    RawChunkIter::new(&png).filter(|c| c.chunk_ty == ChunkType::IDAT).map(|c| c.data.len()).collect();
  assert!(idat_sizes.len() > 16);
  let (last, full) = idat_sizes.split_last().unwrap();
  assert!(full.iter().all(|&n| n == 1000));
  assert!(*last <= 1000 && *last > 0);
  for chunk in RawChunkIter::new(&png) {
    assert_eq!(chunk.declared_crc, chunk.compute_actual_crc());
  }
}
