//! The compression multiplexer.
//!
//! A session owns exactly one zlib engine (an inflater when decoding, a
//! deflater when encoding). Every logical zlib stream in the PNG (the image
//! data, each compressed text chunk, the ICC profile) borrows that engine by
//! taking a [`ZlibClaim`]:
//!
//! * While a claim is out, the engine lives *inside* the claim and the
//!   context only remembers who has it. A second [`claim`](ZlibContext::claim)
//!   fails with [`PngError::AlreadyClaimed`].
//! * Giving the claim back ([`finish`](ZlibContext::finish) or
//!   [`abort`](ZlibContext::abort)) resets the engine before it's stored again,
//!   so the next claim always starts from a fresh state. There's no way to get
//!   an engine back into the context without going through the reset.
//! * [`with_claim`](ZlibContext::with_claim) takes and returns a claim around a
//!   closure, returning it on the error path too.
//! * A claim can only be given back to the context that issued it. A claim
//!   that's dropped instead of given back takes its engine with it, and the
//!   context builds a fresh one at the next claim.

use super::*;

use alloc::sync::{Arc, Weak};

use miniz_oxide::{
  deflate::{
    core::{create_comp_flags_from_zip_params, CompressorOxide},
    stream::deflate,
  },
  inflate::stream::{inflate, InflateState},
  DataFormat, MZError, MZFlush, MZStatus,
};

/// Size of the buffer that each engine step writes into.
const SCRATCH_SIZE: usize = 32 * 1024;

/// Which logical stream a claim is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClaimPurpose {
  /// The `IDAT` stream.
  ImageData,
  /// A `zTXt` chunk, or an `iTXt` chunk with the compression flag set.
  CompressedText,
  /// An `iCCP` chunk.
  IccProfile,
}

/// Deflate strategy, as used by zlib.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum DeflateStrategy {
  #[default]
  Default = 0,
  Filtered = 1,
  HuffmanOnly = 2,
  Rle = 3,
  Fixed = 4,
}

enum EngineKind {
  Inflate(Box<InflateState>),
  Deflate(Box<CompressorOxide>),
}

struct Engine {
  kind: EngineKind,
  scratch: Vec<u8>,
}
impl Engine {
  fn reset(&mut self) {
    match &mut self.kind {
      EngineKind::Inflate(state) => state.reset(DataFormat::Zlib),
      EngineKind::Deflate(compressor) => compressor.reset(),
    }
  }
}

/// What kind of engine a context holds, so that a lost one can be rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineSpec {
  Inflate,
  Deflate { flags: u32 },
}
impl EngineSpec {
  fn build(self) -> Engine {
    let kind = match self {
      Self::Inflate => EngineKind::Inflate(InflateState::new_boxed(DataFormat::Zlib)),
      Self::Deflate { flags } => EngineKind::Deflate(Box::new(CompressorOxide::new(flags))),
    };
    Engine { kind, scratch: alloc::vec![0; SCRATCH_SIZE] }
  }
}

enum ContextState {
  /// Holds an engine that is in its reset state.
  Idle(Engine),
  /// The engine is out with the claim that holds the other end of `ticket`.
  Claimed { purpose: ClaimPurpose, ticket: Weak<ClaimPurpose> },
}

/// The one zlib engine of a session.
pub struct ZlibContext {
  spec: EngineSpec,
  state: ContextState,
}
impl Debug for ZlibContext {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("ZlibContext").field("spec", &self.spec).field("claimed", &self.claimed_by()).finish()
  }
}
impl ZlibContext {
  /// A context for decompressing.
  #[must_use]
  pub fn for_inflate() -> Self {
    let spec = EngineSpec::Inflate;
    Self { spec, state: ContextState::Idle(spec.build()) }
  }

  /// A context for compressing.
  ///
  /// The `level` is 0 (store only) through 10 (slowest).
  #[must_use]
  pub fn for_deflate(level: u8, strategy: DeflateStrategy) -> Self {
    let flags = create_comp_flags_from_zip_params(i32::from(level.min(10)), 15, strategy as i32);
    let spec = EngineSpec::Deflate { flags };
    Self { spec, state: ContextState::Idle(spec.build()) }
  }

  /// Who holds the engine, if anyone.
  ///
  /// A claim that was dropped without being given back doesn't count.
  #[inline]
  #[must_use]
  pub fn claimed_by(&self) -> Option<ClaimPurpose> {
    match &self.state {
      ContextState::Idle(_) => None,
      ContextState::Claimed { purpose, ticket } => (ticket.strong_count() > 0).then_some(*purpose),
    }
  }

  /// Takes the engine for one logical stream.
  pub fn claim(&mut self, purpose: ClaimPurpose) -> PngResult<ZlibClaim> {
    self.claim_with_limit(purpose, usize::MAX)
  }

  /// Takes the engine for one logical stream, with a cap on how much output
  /// decompression may produce.
  ///
  /// ## Failure
  /// * [`PngError::AlreadyClaimed`] while an earlier claim is still alive.
  ///   If the earlier claim was dropped instead of given back, its engine is
  ///   gone, so a fresh one is built and the new claim goes ahead.
  pub fn claim_with_limit(
    &mut self, purpose: ClaimPurpose, max_output: usize,
  ) -> PngResult<ZlibClaim> {
    let ticket = Arc::new(purpose);
    let claimed = ContextState::Claimed { purpose, ticket: Arc::downgrade(&ticket) };
    let engine = match core::mem::replace(&mut self.state, claimed) {
      ContextState::Idle(engine) => engine,
      ContextState::Claimed { purpose: held, ticket: old } => {
        if old.strong_count() > 0 {
          self.state = ContextState::Claimed { purpose: held, ticket: old };
          return Err(PngError::AlreadyClaimed { held, requested: purpose });
        }
        warn!("zlib claim for {held:?} was dropped without being released, rebuilding the engine");
        self.spec.build()
      }
    };
    trace!("zlib engine claimed for {purpose:?}");
    Ok(ZlibClaim { purpose, ticket, engine, total_in: 0, total_out: 0, max_output, stream_end: false })
  }

  /// If this context issued the claim, and it's the claim currently out.
  #[inline]
  fn owns(&self, claim: &ZlibClaim) -> bool {
    match &self.state {
      ContextState::Claimed { ticket, .. } => ticket.as_ptr() == Arc::as_ptr(&claim.ticket),
      ContextState::Idle(_) => false,
    }
  }

  /// Ends a claim normally.
  ///
  /// * When compressing, this flushes the stream and gives back the final
  ///   compressed bytes.
  /// * When decompressing, this checks that the stream reached its end (and
  ///   so passed its checksum), and gives back nothing.
  ///
  /// The engine is reset and returned to the context even if this errors.
  ///
  /// ## Failure
  /// * [`PngError::ForeignClaim`] if the claim came from another context. The
  ///   claim is dropped, and the context that issued it rebuilds its engine
  ///   on its next claim.
  pub fn finish(&mut self, mut claim: ZlibClaim) -> PngResult<Vec<u8>> {
    if !self.owns(&claim) {
      return Err(PngError::ForeignClaim(claim.purpose));
    }
    let result = claim.finish_stream();
    self.release(claim);
    result
  }

  /// Ends a claim without flushing or checking anything.
  ///
  /// ## Failure
  /// * [`PngError::ForeignClaim`], same as [`finish`](Self::finish).
  pub fn abort(&mut self, claim: ZlibClaim) -> PngResult<()> {
    if !self.owns(&claim) {
      return Err(PngError::ForeignClaim(claim.purpose));
    }
    trace!("zlib claim for {:?} aborted", claim.purpose);
    self.release(claim);
    Ok(())
  }

  fn release(&mut self, claim: ZlibClaim) {
    let ZlibClaim { mut engine, purpose, total_in, total_out, .. } = claim;
    engine.reset();
    trace!("zlib engine released by {purpose:?} after {total_in} bytes in, {total_out} bytes out");
    self.state = ContextState::Idle(engine);
  }

  /// Runs `op` with a claim, then finishes the claim if `op` worked or aborts
  /// it if `op` failed.
  ///
  /// On success the output is `op`'s value and whatever bytes `finish` gave.
  pub fn with_claim<T>(
    &mut self, purpose: ClaimPurpose, max_output: usize,
    op: impl FnOnce(&mut ZlibClaim) -> PngResult<T>,
  ) -> PngResult<(T, Vec<u8>)> {
    let mut claim = self.claim_with_limit(purpose, max_output)?;
    match op(&mut claim) {
      Ok(t) => Ok((t, self.finish(claim)?)),
      Err(e) => {
        self.abort(claim)?;
        Err(e)
      }
    }
  }

  /// Decompresses a complete zlib stream through a temporary claim.
  pub fn inflate_all(
    &mut self, purpose: ClaimPurpose, data: &[u8], max_output: usize,
  ) -> PngResult<Vec<u8>> {
    let (out, _) = self.with_claim(purpose, max_output, |claim| {
      let mut out = Vec::new();
      let used = claim.feed(data, &mut out)?;
      if used < data.len() {
        debug!("{:?} stream has {} bytes after its end", purpose, data.len() - used);
      }
      Ok(out)
    })?;
    Ok(out)
  }

  /// Compresses bytes into a complete zlib stream through a temporary claim.
  pub fn deflate_all(&mut self, purpose: ClaimPurpose, data: &[u8]) -> PngResult<Vec<u8>> {
    let (mut out, tail) = self.with_claim(purpose, usize::MAX, |claim| {
      let mut out = Vec::new();
      claim.write(data, &mut out)?;
      Ok(out)
    })?;
    out.extend_from_slice(&tail);
    Ok(out)
  }
}

/// The right to drive the session's zlib engine for one logical stream.
///
/// A claim can't be cloned. Hand it back to the [`ZlibContext`] it came from
/// with [`finish`](ZlibContext::finish) or [`abort`](ZlibContext::abort).
pub struct ZlibClaim {
  purpose: ClaimPurpose,
  /// the context that issued this claim holds a weak handle to this
  ticket: Arc<ClaimPurpose>,
  engine: Engine,
  total_in: usize,
  total_out: usize,
  max_output: usize,
  stream_end: bool,
}
impl Debug for ZlibClaim {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("ZlibClaim")
      .field("purpose", &self.purpose)
      .field("total_in", &self.total_in)
      .field("total_out", &self.total_out)
      .field("stream_end", &self.stream_end)
      .finish()
  }
}
impl ZlibClaim {
  /// What this claim is for.
  #[inline]
  #[must_use]
  pub fn purpose(&self) -> ClaimPurpose {
    self.purpose
  }

  /// If decompression has seen the end of the zlib stream.
  #[inline]
  #[must_use]
  pub fn is_stream_end(&self) -> bool {
    self.stream_end
  }

  /// Total bytes produced so far.
  #[inline]
  #[must_use]
  pub fn total_out(&self) -> usize {
    self.total_out
  }

  /// Decompresses more of the stream, appending the output to `out`.
  ///
  /// The stream can be fed in pieces of any size. The return value is how
  /// many input bytes were used; this is less than the input length only when
  /// the stream ended partway through the input.
  ///
  /// ## Failure
  /// * Corrupt data (including a bad Adler-32) is a
  ///   [`PngError::CompressedStreamError`].
  /// * So is producing more than the claim's output limit.
  /// * Calling this on a compressing claim is a
  ///   [`PngError::CompressedStreamError`].
  pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) -> PngResult<usize> {
    self.feed_with(input, |bytes| {
      out.extend_from_slice(bytes);
      Ok(())
    })
  }

  /// Like [`feed`](Self::feed), but hands each piece of output to `sink`
  /// as soon as it's ready instead of collecting it.
  ///
  /// Errors from `sink` stop decompression and are passed back.
  pub fn feed_with(
    &mut self, mut input: &[u8], mut sink: impl FnMut(&[u8]) -> PngResult<()>,
  ) -> PngResult<usize> {
    let Engine { kind, scratch } = &mut self.engine;
    let EngineKind::Inflate(state) = kind else {
      return Err(PngError::CompressedStreamError("cannot decompress with a compressing engine"));
    };
    let start_len = input.len();
    while !self.stream_end {
      let res = inflate(state, input, scratch, MZFlush::None);
      input = &input[res.bytes_consumed..];
      self.total_in += res.bytes_consumed;
      self.total_out = self.total_out.saturating_add(res.bytes_written);
      if self.total_out > self.max_output {
        return Err(PngError::CompressedStreamError("decompressed data exceeds the limit"));
      }
      sink(&scratch[..res.bytes_written])?;
      let progressed = res.bytes_consumed > 0 || res.bytes_written > 0;
      match res.status {
        Ok(MZStatus::StreamEnd) => self.stream_end = true,
        Ok(_) | Err(MZError::Buf) => {
          if !progressed {
            break;
          }
        }
        Err(_) => return Err(PngError::CompressedStreamError("corrupt zlib data")),
      }
    }
    Ok(start_len - input.len())
  }

  /// Compresses more bytes, appending compressed output to `out`.
  ///
  /// ## Failure
  /// * Calling this on a decompressing claim is a
  ///   [`PngError::CompressedStreamError`].
  pub fn write(&mut self, mut input: &[u8], out: &mut Vec<u8>) -> PngResult<()> {
    let Engine { kind, scratch } = &mut self.engine;
    let EngineKind::Deflate(compressor) = kind else {
      return Err(PngError::CompressedStreamError("cannot compress with a decompressing engine"));
    };
    self.total_in += input.len();
    while !input.is_empty() {
      let res = deflate(compressor, input, scratch, MZFlush::None);
      input = &input[res.bytes_consumed..];
      self.total_out += res.bytes_written;
      out.extend_from_slice(&scratch[..res.bytes_written]);
      match res.status {
        Ok(_) => (),
        Err(MZError::Buf) if res.bytes_consumed > 0 || res.bytes_written > 0 => (),
        Err(_) => return Err(PngError::CompressedStreamError("deflate failed")),
      }
    }
    Ok(())
  }

  fn finish_stream(&mut self) -> PngResult<Vec<u8>> {
    let Engine { kind, scratch } = &mut self.engine;
    match kind {
      EngineKind::Inflate(_) => {
        if self.stream_end {
          Ok(Vec::new())
        } else {
          Err(PngError::CompressedStreamError("zlib stream ended early"))
        }
      }
      EngineKind::Deflate(compressor) => {
        let mut out = Vec::new();
        loop {
          let res = deflate(compressor, &[], scratch, MZFlush::Finish);
          self.total_out += res.bytes_written;
          out.extend_from_slice(&scratch[..res.bytes_written]);
          match res.status {
            Ok(MZStatus::StreamEnd) => break,
            Ok(_) => (),
            Err(_) => return Err(PngError::CompressedStreamError("deflate failed to finish")),
          }
        }
        self.stream_end = true;
        Ok(out)
      }
    }
  }
}

#[cfg(test)]
fn compress_for_test(data: &[u8]) -> Vec<u8> {
  ZlibContext::for_deflate(6, DeflateStrategy::Default)
    .deflate_all(ClaimPurpose::ImageData, data)
    .unwrap()
}

#[test]
fn test_second_claim_fails_until_release() {
  let mut ctx = ZlibContext::for_inflate();
  let claim = ctx.claim(ClaimPurpose::ImageData).unwrap();
  assert_eq!(
    ctx.claim(ClaimPurpose::CompressedText).unwrap_err(),
    PngError::AlreadyClaimed { held: ClaimPurpose::ImageData, requested: ClaimPurpose::CompressedText }
  );
  assert_eq!(ctx.claimed_by(), Some(ClaimPurpose::ImageData));
  ctx.abort(claim).unwrap();
  assert_eq!(ctx.claimed_by(), None);
  let claim = ctx.claim(ClaimPurpose::CompressedText).unwrap();
  ctx.abort(claim).unwrap();
}

#[test]
fn test_claims_do_not_share_history() {
  let first: Vec<u8> = (0..5000_u32).map(|i| (i % 251) as u8).collect();
  let second = b"a completely different stream".repeat(20);
  let z1 = compress_for_test(&first);
  let z2 = compress_for_test(&second);

  let mut ctx = ZlibContext::for_inflate();
  // abandon the first stream halfway through
  let mut claim = ctx.claim(ClaimPurpose::ImageData).unwrap();
  let mut out = Vec::new();
  claim.feed(&z1[..z1.len() / 2], &mut out).unwrap();
  assert!(ctx.finish(claim).is_err());
  // the next claim must act like a fresh engine
  assert_eq!(ctx.inflate_all(ClaimPurpose::CompressedText, &z2, usize::MAX).unwrap(), second);
  assert_eq!(ctx.inflate_all(ClaimPurpose::ImageData, &z1, usize::MAX).unwrap(), first);

  let mut dctx = ZlibContext::for_deflate(6, DeflateStrategy::Default);
  let a = dctx.deflate_all(ClaimPurpose::ImageData, &first).unwrap();
  let b = dctx.deflate_all(ClaimPurpose::ImageData, &first).unwrap();
  assert_eq!(a, b, "deflate output must not depend on earlier claims");
}

#[test]
fn test_feed_in_pieces() {
  let data: Vec<u8> = (0..70_000_u32).map(|i| (i.wrapping_mul(i) % 256) as u8).collect();
  let z = compress_for_test(&data);
  let mut ctx = ZlibContext::for_inflate();
  let mut claim = ctx.claim(ClaimPurpose::ImageData).unwrap();
  let mut out = Vec::new();
  for piece in z.chunks(7) {
    assert_eq!(claim.feed(piece, &mut out).unwrap(), piece.len());
  }
  assert!(claim.is_stream_end());
  assert_eq!(ctx.finish(claim).unwrap(), Vec::<u8>::new());
  assert_eq!(out, data);
}

#[test]
fn test_corrupt_stream_then_clean_claim() {
  let data = b"hello hello hello hello".repeat(10);
  let mut z = compress_for_test(&data);
  let n = z.len();
  // break the adler32
  z[n - 1] ^= 0xFF;
  let mut ctx = ZlibContext::for_inflate();
  let err = ctx.inflate_all(ClaimPurpose::CompressedText, &z, usize::MAX).unwrap_err();
  assert!(matches!(err, PngError::CompressedStreamError(_)));
  assert_eq!(ctx.claimed_by(), None, "error path must release the claim");
  z[n - 1] ^= 0xFF;
  assert_eq!(ctx.inflate_all(ClaimPurpose::CompressedText, &z, usize::MAX).unwrap(), data);
}

#[test]
fn test_output_limit() {
  let data = [7_u8; 10_000];
  let z = compress_for_test(&data);
  let mut ctx = ZlibContext::for_inflate();
  assert!(matches!(
    ctx.inflate_all(ClaimPurpose::IccProfile, &z, 9_999),
    Err(PngError::CompressedStreamError(_))
  ));
  assert_eq!(ctx.inflate_all(ClaimPurpose::IccProfile, &z, 10_000).unwrap().len(), 10_000);
}

#[test]
fn test_wrong_direction_is_an_error() {
  let mut ctx = ZlibContext::for_inflate();
  let mut claim = ctx.claim(ClaimPurpose::ImageData).unwrap();
  assert!(claim.write(b"abc", &mut Vec::new()).is_err());
  ctx.abort(claim).unwrap();
  let mut ctx = ZlibContext::for_deflate(1, DeflateStrategy::Rle);
  let mut claim = ctx.claim(ClaimPurpose::ImageData).unwrap();
  assert!(claim.feed(b"abc", &mut Vec::new()).is_err());
  ctx.abort(claim).unwrap();
}

#[test]
fn test_claim_only_returns_to_its_own_context() {
  let mut a = ZlibContext::for_inflate();
  let mut b = ZlibContext::for_deflate(6, DeflateStrategy::Default);
  let claim = a.claim(ClaimPurpose::ImageData).unwrap();
  assert_eq!(b.abort(claim), Err(PngError::ForeignClaim(ClaimPurpose::ImageData)));
  // `b` still has its own deflater
  assert_eq!(b.claimed_by(), None);
  let data = b"not mixed up with the inflater".repeat(4);
  let z = b.deflate_all(ClaimPurpose::CompressedText, &data).unwrap();
  // and `a` recovers from losing its claim
  assert_eq!(a.claimed_by(), None);
  assert_eq!(a.inflate_all(ClaimPurpose::CompressedText, &z, usize::MAX).unwrap(), data);

  let claim = a.claim(ClaimPurpose::IccProfile).unwrap();
  assert_eq!(b.finish(claim).unwrap_err(), PngError::ForeignClaim(ClaimPurpose::IccProfile));
  assert_eq!(a.inflate_all(ClaimPurpose::ImageData, &z, usize::MAX).unwrap(), data);
}

#[test]
fn test_dropped_claim_does_not_lock_the_context() {
  let data = b"after the lost claim".repeat(8);
  let z = compress_for_test(&data);
  let mut ctx = ZlibContext::for_inflate();
  let mut claim = ctx.claim(ClaimPurpose::CompressedText).unwrap();
  // leave the engine partway through a stream, then lose it
  claim.feed(&z[..z.len() / 2], &mut Vec::new()).unwrap();
  assert_eq!(ctx.claimed_by(), Some(ClaimPurpose::CompressedText));
  drop(claim);
  assert_eq!(ctx.claimed_by(), None);
  assert_eq!(ctx.inflate_all(ClaimPurpose::ImageData, &z, usize::MAX).unwrap(), data);
  // a live claim still blocks others
  let claim = ctx.claim(ClaimPurpose::ImageData).unwrap();
  assert!(matches!(ctx.claim(ClaimPurpose::IccProfile), Err(PngError::AlreadyClaimed { .. })));
  ctx.abort(claim).unwrap();
}
