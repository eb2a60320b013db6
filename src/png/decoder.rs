//! The decoding session.
//!
//! [`PngDecoder`] is a push parser: give it bytes in pieces of any size with
//! [`decode_step`](PngDecoder::decode_step) and it hands back every image row
//! that became final. It never needs to see a byte twice. Whatever part of the
//! current micro-step (a chunk header, chunk data, a CRC) is missing is kept in
//! the session until the next call.
//!
//! Chunks are only acted on after their CRC checks out, so the row output and
//! any error are the same no matter how the input was split up.

use super::*;

/// A fixed-size accumulator for a piece of the stream that may arrive split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Partial<const N: usize> {
  buf: [u8; N],
  filled: usize,
}
impl<const N: usize> Partial<N> {
  const fn new() -> Self {
    Self { buf: [0; N], filled: 0 }
  }

  #[inline]
  const fn is_empty(&self) -> bool {
    self.filled == 0
  }

  /// Takes what it can from `input`, giving the bytes once all `N` are here.
  fn fill(&mut self, input: &mut &[u8]) -> Option<[u8; N]> {
    if fill_from(&mut self.buf, &mut self.filled, input) {
      Some(self.buf)
    } else {
      None
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Stage {
  Signature(Partial<8>),
  ChunkHeader(Partial<8>),
  ChunkData { header: ChunkHeader, data: Vec<u8> },
  ChunkCrc { header: ChunkHeader, data: Vec<u8>, crc: Partial<4> },
  Done,
  Fatal(PngError),
}

/// How a decode step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
  /// All input was used and the stream isn't over.
  NeedMoreInput,
  /// The `IEND` chunk was reached.
  Done,
  /// Decoding failed. The session won't do anything more.
  Fatal(PngError),
}

/// The result of one [`PngDecoder::decode_step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeStep {
  /// Rows that became final during this step, in image order, unfiltered and
  /// packed the same way as in the image data.
  pub rows: Vec<Vec<u8>>,
  pub status: DecodeStatus,
}

/// Collects warnings and passes them to the caller's sink.
#[derive(Default)]
struct WarningLog {
  collected: Vec<PngWarning>,
  sink: Option<Box<dyn FnMut(&PngWarning)>>,
}
impl WarningLog {
  fn report(&mut self, warning: PngWarning) {
    warn!("{warning}");
    if let Some(sink) = self.sink.as_mut() {
      sink(&warning);
    }
    self.collected.push(warning);
  }
}

/// Turns decompressed bytes into final image rows.
///
/// The filtered row currently being collected is `line`, tag byte first, and
/// `line_filled` says how much of it is here.
#[derive(Debug, Clone)]
struct RowAssembler {
  header: IHDR,
  passes: Vec<InterlacePass>,
  pass_index: usize,
  row_in_pass: u32,
  line: Vec<u8>,
  line_filled: usize,
  prev: Vec<u8>,
  bpp: usize,
  canvas: Option<Adam7Canvas>,
  next_out_row: u32,
  held_last_row: Option<Vec<u8>>,
}
impl RowAssembler {
  fn new(header: IHDR) -> PngResult<Self> {
    let passes: Vec<InterlacePass> =
      interlace_passes(header.width, header.height, header.is_interlaced).collect();
    let canvas = if header.is_interlaced { Some(Adam7Canvas::new(&header)?) } else { None };
    let mut out = Self {
      header,
      passes,
      pass_index: 0,
      row_in_pass: 0,
      line: Vec::new(),
      line_filled: 0,
      prev: Vec::new(),
      bpp: header.filter_bpp(),
      canvas,
      next_out_row: 0,
      held_last_row: None,
    };
    out.start_pass()?;
    Ok(out)
  }

  fn start_pass(&mut self) -> PngResult<()> {
    if let Some(pass) = self.passes.get(self.pass_index) {
      let row_bytes = self.header.bytes_per_row(pass.width)?;
      debug!("starting pass {} ({}x{}, {} bytes per row)", pass.index, pass.width, pass.height, row_bytes);
      self.line.clear();
      self.line.resize(row_bytes + 1, 0);
      self.prev.clear();
      self.prev.resize(row_bytes, 0);
      self.line_filled = 0;
      self.row_in_pass = 0;
    }
    Ok(())
  }

  /// If every row of every pass has been reconstructed.
  #[inline]
  fn is_complete(&self) -> bool {
    self.pass_index >= self.passes.len()
  }

  /// Accepts decompressed image data, pushing finished rows to `out`.
  fn push_filtered(&mut self, mut bytes: &[u8], out: &mut Vec<Vec<u8>>) -> PngResult<()> {
    while !bytes.is_empty() {
      if self.is_complete() {
        return Err(PngError::CompressedStreamError("image data is longer than the header describes"));
      }
      if fill_from(&mut self.line, &mut self.line_filled, &mut bytes) {
        self.finish_line(out)?;
      }
    }
    Ok(())
  }

  fn finish_line(&mut self, out: &mut Vec<Vec<u8>>) -> PngResult<()> {
    let pass = self.passes[self.pass_index];
    let filter = FilterType::try_from(self.line[0])?;
    let row = &mut self.line[1..];
    unfilter_row(filter, self.bpp, &self.prev, row);
    self.prev.copy_from_slice(row);
    self.line_filled = 0;
    if let Some(canvas) = self.canvas.as_mut() {
      canvas.scatter(&pass, self.row_in_pass, &self.prev);
      while let Some(row) = self.next_complete_row() {
        self.emit(row, out);
      }
    } else {
      let row = self.prev.clone();
      self.emit(row, out);
    }
    self.row_in_pass += 1;
    if self.row_in_pass == pass.height {
      self.pass_index += 1;
      self.start_pass()?;
    }
    Ok(())
  }

  /// The next full image row, if every pixel of it has arrived.
  fn next_complete_row(&self) -> Option<Vec<u8>> {
    let canvas = self.canvas.as_ref()?;
    if self.next_out_row < self.header.height && canvas.is_row_complete(self.next_out_row) {
      Some(canvas.row(self.next_out_row).to_vec())
    } else {
      None
    }
  }

  /// The last row is held back until the stream's trailer checks out.
  fn emit(&mut self, row: Vec<u8>, out: &mut Vec<Vec<u8>>) {
    self.next_out_row += 1;
    if self.next_out_row == self.header.height {
      self.held_last_row = Some(row);
    } else {
      out.push(row);
    }
  }
}

/// Per-image state, created by a valid `IHDR`.
#[derive(Debug)]
struct ImageState {
  header: IHDR,
  order: ChunkOrder,
  rows: RowAssembler,
  idat_claim: Option<ZlibClaim>,
  warned_trailing_data: bool,
}

/// An incremental PNG decoder.
pub struct PngDecoder {
  config: DecoderConfig,
  stage: Stage,
  ctx: ZlibContext,
  image: Option<ImageState>,
  palette: Option<Palette>,
  metadata: PngMetadata,
  warnings: WarningLog,
  warned_after_end: bool,
}
impl Debug for PngDecoder {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("PngDecoder")
      .field("config", &self.config)
      .field("stage", &self.stage)
      .field("header", &self.header())
      .field("warnings", &self.warnings.collected)
      .finish_non_exhaustive()
  }
}
impl PngDecoder {
  /// Starts a new decoding session.
  #[must_use]
  pub fn new(config: DecoderConfig) -> Self {
    Self {
      config,
      stage: Stage::Signature(Partial::new()),
      ctx: ZlibContext::for_inflate(),
      image: None,
      palette: None,
      metadata: PngMetadata::default(),
      warnings: WarningLog::default(),
      warned_after_end: false,
    }
  }

  /// Sets a function that's called with each warning as it happens.
  ///
  /// Warnings are also logged and kept in [`warnings`](Self::warnings).
  #[must_use]
  pub fn with_warning_sink(mut self, sink: impl FnMut(&PngWarning) + 'static) -> Self {
    self.warnings.sink = Some(Box::new(sink));
    self
  }

  /// The image header, once it's been read.
  #[inline]
  #[must_use]
  pub fn header(&self) -> Option<&IHDR> {
    self.image.as_ref().map(|image| &image.header)
  }

  /// The palette, if one has been read.
  #[inline]
  #[must_use]
  pub fn palette(&self) -> Option<&Palette> {
    self.palette.as_ref()
  }

  /// The ancillary data read so far.
  #[inline]
  #[must_use]
  pub fn metadata(&self) -> &PngMetadata {
    &self.metadata
  }

  /// All warnings so far.
  #[inline]
  #[must_use]
  pub fn warnings(&self) -> &[PngWarning] {
    &self.warnings.collected
  }

  /// If the whole stream has been decoded.
  #[inline]
  #[must_use]
  pub fn is_done(&self) -> bool {
    self.stage == Stage::Done
  }

  /// The error that stopped the session, if any.
  #[inline]
  #[must_use]
  pub fn error(&self) -> Option<PngError> {
    match self.stage {
      Stage::Fatal(e) => Some(e),
      _ => None,
    }
  }

  /// Decodes as far as `input` allows.
  ///
  /// All of `input` is always used up, either processed or kept for the next
  /// call. Rows that are returned are never taken back, even if a later part
  /// of the stream fails.
  pub fn decode_step(&mut self, input: &[u8]) -> DecodeStep {
    if let Stage::Fatal(_) = self.stage {
      return DecodeStep { rows: Vec::new(), status: DecodeStatus::Fatal(PngError::SessionFailed) };
    }
    let mut rows = Vec::new();
    let mut input = input;
    let status = match self.run(&mut input, &mut rows) {
      Ok(status) => status,
      Err(e) => {
        self.fail(e);
        DecodeStatus::Fatal(e)
      }
    };
    DecodeStep { rows, status }
  }

  /// Decodes a complete PNG held in memory.
  ///
  /// This is the same state machine as [`decode_step`](Self::decode_step),
  /// except that running out of input is
  /// [`PngError::UnexpectedEof`] instead of a suspension.
  pub fn decode_all(&mut self, bytes: &[u8]) -> DecodeStep {
    let mut step = self.decode_step(bytes);
    if step.status == DecodeStatus::NeedMoreInput {
      self.fail(PngError::UnexpectedEof);
      step.status = DecodeStatus::Fatal(PngError::UnexpectedEof);
    }
    step
  }

  /// Every fatal error goes through here, so the image data claim can't be
  /// left out.
  fn fail(&mut self, e: PngError) {
    if let Some(claim) = self.image.as_mut().and_then(|image| image.idat_claim.take()) {
      // the claim came from this session's own context
      let _ = self.ctx.abort(claim);
    }
    debug!("decode failed: {e}");
    self.stage = Stage::Fatal(e);
  }

  fn run(&mut self, input: &mut &[u8], rows: &mut Vec<Vec<u8>>) -> PngResult<DecodeStatus> {
    loop {
      match &mut self.stage {
        Stage::Fatal(_) => return Err(PngError::SessionFailed),
        Stage::Done => {
          if !input.is_empty() && !self.warned_after_end {
            self.warned_after_end = true;
            self.warnings.report(PngWarning::TrailingBytesAfterEnd);
          }
          *input = &[];
          return Ok(DecodeStatus::Done);
        }
        Stage::Signature(partial) => {
          let Some(signature) = partial.fill(input) else { return Ok(DecodeStatus::NeedMoreInput) };
          if signature != PNG_SIGNATURE {
            return Err(PngError::InvalidSignature);
          }
          self.stage = Stage::ChunkHeader(Partial::new());
        }
        Stage::ChunkHeader(partial) => {
          let max_chunk_size = self.config.limits.max_chunk_size;
          let header = if partial.is_empty() {
            match read_chunk_header(input, max_chunk_size)? {
              Some(header) => header,
              None => {
                partial.fill(input);
                return Ok(DecodeStatus::NeedMoreInput);
              }
            }
          } else {
            let Some(bytes) = partial.fill(input) else { return Ok(DecodeStatus::NeedMoreInput) };
            ChunkHeader::parse(bytes, max_chunk_size)?
          };
          trace!("chunk header: {:?}, {} bytes", header.chunk_ty, header.length);
          if self.image.is_none() && header.chunk_ty != ChunkType::IHDR {
            return Err(PngError::StructuralOrderViolation("the first chunk must be IHDR"));
          }
          self.stage = Stage::ChunkData { header, data: Vec::new() };
        }
        Stage::ChunkData { header, data } => {
          if data.is_empty() {
            // the whole chunk is in this fragment, so it needn't be copied
            let header = *header;
            let mut rest: &[u8] = *input;
            if let Some(chunk_data) = read_chunk_data(&mut rest, header.length) {
              if read_and_verify_crc(&mut rest, header.chunk_ty, chunk_data)?.is_some() {
                *input = rest;
                self.stage = Stage::ChunkHeader(Partial::new());
                self.dispatch(header.chunk_ty, chunk_data, rows)?;
                continue;
              }
            }
          }
          let want = header.length as usize - data.len();
          let take = want.min(input.len());
          data.extend_from_slice(&input[..take]);
          *input = &input[take..];
          if take < want {
            return Ok(DecodeStatus::NeedMoreInput);
          }
          let header = *header;
          let data = core::mem::take(data);
          self.stage = Stage::ChunkCrc { header, data, crc: Partial::new() };
        }
        Stage::ChunkCrc { header, data, crc } => {
          let header = *header;
          if crc.is_empty() {
            if read_and_verify_crc(input, header.chunk_ty, data)?.is_none() {
              crc.fill(input);
              return Ok(DecodeStatus::NeedMoreInput);
            }
          } else {
            let Some(crc_bytes) = crc.fill(input) else { return Ok(DecodeStatus::NeedMoreInput) };
            check_chunk_crc(header.chunk_ty, data, u32::from_be_bytes(crc_bytes))?;
          }
          let data = core::mem::take(data);
          self.stage = Stage::ChunkHeader(Partial::new());
          self.dispatch(header.chunk_ty, &data, rows)?;
        }
      }
    }
  }

  /// Acts on one verified chunk.
  fn dispatch(&mut self, chunk_ty: ChunkType, data: &[u8], rows: &mut Vec<Vec<u8>>) -> PngResult<()> {
    let Some(image) = self.image.as_mut() else {
      let header = IHDR::try_from(data)?;
      self.config.limits.check_image(&header)?;
      debug!("image header: {header:?}");
      self.image = Some(ImageState {
        header,
        order: ChunkOrder::new(&header),
        rows: RowAssembler::new(header)?,
        idat_claim: None,
        warned_trailing_data: false,
      });
      return Ok(());
    };
    if image.order.end_of_idat_run(chunk_ty) {
      end_idat_run(image, &mut self.ctx, &mut self.warnings)?;
    }
    if chunk_ty.is_ancillary() {
      return self.read_ancillary(chunk_ty, data);
    }
    image.order.check_critical(chunk_ty, data.len())?;
    match chunk_ty {
      ChunkType::PLTE => self.palette = Some(Palette::parse(data, &image.header)?),
      ChunkType::IDAT => {
        if image.idat_claim.is_none() {
          image.idat_claim = Some(self.ctx.claim(ClaimPurpose::ImageData)?);
        }
        feed_image_data(image, data, rows, &mut self.warnings)?;
      }
      ChunkType::IEND => {
        if !data.is_empty() {
          self.warnings.report(PngWarning::NonEmptyTrailer);
        }
        if let Some(row) = image.rows.held_last_row.take() {
          rows.push(row);
        }
        debug!("reached IEND");
        self.stage = Stage::Done;
      }
      _ => return Err(PngError::UnsupportedCriticalChunk(chunk_ty)),
    }
    Ok(())
  }

  fn read_ancillary(&mut self, chunk_ty: ChunkType, data: &[u8]) -> PngResult<()> {
    let Some(image) = self.image.as_mut() else { return Ok(()) };
    let Some(kind) = AncillaryKind::of(chunk_ty) else {
      let warning = classify_unknown_chunk(chunk_ty)?;
      self.warnings.report(warning);
      return Ok(());
    };
    if let Some(warning) = image.order.check_ancillary(kind) {
      self.warnings.report(warning);
      return Ok(());
    }
    if !kind.is_length_ok(data.len(), &image.header, image.order.palette_len()) {
      self.warnings.report(PngWarning::MalformedAncillaryChunk(chunk_ty));
      return Ok(());
    }
    let max_metadata = self.config.limits.max_metadata_bytes;
    let accepted = match kind {
      AncillaryKind::tEXt | AncillaryKind::zTXt | AncillaryKind::iTXt => {
        match read_text_chunk(chunk_ty, data, &mut self.ctx, max_metadata)? {
          Some(text) => {
            self.metadata.texts.push(text);
            true
          }
          None => false,
        }
      }
      AncillaryKind::iCCP => match read_icc_chunk(data, &mut self.ctx, max_metadata)? {
        Some(icc) => {
          self.metadata.icc_profile = Some(icc);
          true
        }
        None => false,
      },
      _ => {
        self.metadata.chunks.push(AncillaryChunk { chunk_ty, data: data.to_vec() });
        true
      }
    };
    if accepted {
      image.order.accept_ancillary(kind);
    } else {
      self.warnings.report(PngWarning::MalformedAncillaryChunk(chunk_ty));
    }
    Ok(())
  }
}

fn feed_image_data(
  image: &mut ImageState, data: &[u8], rows: &mut Vec<Vec<u8>>, warnings: &mut WarningLog,
) -> PngResult<()> {
  let used = match image.idat_claim.as_mut() {
    Some(claim) => {
      let assembler = &mut image.rows;
      claim.feed_with(data, |bytes| assembler.push_filtered(bytes, rows))?
    }
    None => 0,
  };
  if used < data.len() && !image.warned_trailing_data {
    image.warned_trailing_data = true;
    warnings.report(PngWarning::TrailingCompressedData);
  }
  Ok(())
}

/// The image data claim ends with the `IDAT` run, so that compressed chunks
/// after it can have the engine.
fn end_idat_run(image: &mut ImageState, ctx: &mut ZlibContext, warnings: &mut WarningLog) -> PngResult<()> {
  let claim = image.idat_claim.take();
  if !image.rows.is_complete() {
    if let Some(claim) = claim {
      ctx.abort(claim)?;
    }
    return Err(PngError::CompressedStreamError("image data ended before the last row"));
  }
  match claim {
    Some(claim) if claim.is_stream_end() => {
      ctx.finish(claim)?;
    }
    Some(claim) => {
      ctx.abort(claim)?;
      warnings.report(PngWarning::MissingStreamChecksum);
    }
    None => (),
  }
  debug!("image data finished");
  Ok(())
}

/// Everything from decoding a whole PNG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPng {
  pub header: IHDR,
  pub palette: Option<Palette>,
  pub metadata: PngMetadata,
  /// Image rows, top to bottom.
  pub rows: Vec<Vec<u8>>,
  pub warnings: Vec<PngWarning>,
}

/// Decodes a complete PNG held in memory.
pub fn decode_png(png: &[u8], config: DecoderConfig) -> PngResult<DecodedPng> {
  let mut decoder = PngDecoder::new(config);
  let step = decoder.decode_all(png);
  match step.status {
    DecodeStatus::Done => (),
    DecodeStatus::Fatal(e) => return Err(e),
    DecodeStatus::NeedMoreInput => return Err(PngError::UnexpectedEof),
  }
  let header = *decoder.header().ok_or(PngError::UnexpectedEof)?;
  Ok(DecodedPng {
    header,
    palette: decoder.palette.take(),
    metadata: core::mem::take(&mut decoder.metadata),
    rows: step.rows,
    warnings: core::mem::take(&mut decoder.warnings.collected),
  })
}
