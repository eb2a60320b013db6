use crate::png::ChunkType;

/// A fatal error from the codec.
///
/// Once a session reports one of these it stays failed. Rows that were handed
/// out before the error are still valid, they're never taken back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PngError {
  /// The first eight bytes were not the PNG signature.
  #[error("the stream does not start with the PNG signature")]
  InvalidSignature,

  /// A chunk's declared CRC doesn't match the CRC of its type and data.
  #[error("CRC mismatch in {chunk:?}: declared {declared:#010x}, computed {actual:#010x}")]
  CrcMismatch { chunk: ChunkType, declared: u32, actual: u32 },

  /// A chunk length with the high bit set. The format caps lengths at
  /// `2^31 - 1`.
  #[error("chunk length {0} exceeds 2^31-1")]
  InvalidChunkLength(u32),

  /// A chunk longer than the configured [`Limits::max_chunk_size`](crate::png::Limits).
  #[error("{chunk:?} chunk of {length} bytes exceeds the limit of {limit}")]
  ChunkTooLarge { chunk: ChunkType, length: u32, limit: u32 },

  /// The chunk type contained something other than ASCII letters.
  #[error("chunk type {0:?} is not four ASCII letters")]
  InvalidChunkType([u8; 4]),

  /// A critical chunk that this codec doesn't know how to handle.
  #[error("unsupported critical chunk {0:?}")]
  UnsupportedCriticalChunk(ChunkType),

  /// The `IHDR` data was illegal.
  #[error("invalid image header: {0}")]
  InvalidHeader(&'static str),

  /// The `PLTE` data was illegal for the image.
  #[error("invalid palette: {0}")]
  InvalidPalette(&'static str),

  /// Some size computed from the header overflowed or went over a limit.
  #[error("image dimensions exceed the configured limits")]
  ImageTooLarge,

  /// A zlib stream was corrupt, ended early, or produced too much data.
  #[error("compressed stream error: {0}")]
  CompressedStreamError(&'static str),

  /// A filtered row started with a filter tag other than 0 through 4.
  #[error("invalid filter type {0}")]
  InvalidFilterType(u8),

  /// The compression context was claimed while another claim was live.
  #[error("compression context is already claimed for {held:?}, cannot claim for {requested:?}")]
  AlreadyClaimed { held: crate::png::ClaimPurpose, requested: crate::png::ClaimPurpose },

  /// A compression claim was given back to a context that didn't issue it.
  #[error("the {0:?} claim was issued by a different compression context")]
  ForeignClaim(crate::png::ClaimPurpose),

  /// The chunks arrived in an order the format doesn't allow.
  #[error("chunk order violation: {0}")]
  StructuralOrderViolation(&'static str),

  /// The input ended while the decoder still needed more bytes.
  #[error("unexpected end of input")]
  UnexpectedEof,

  /// The session already failed and can't be used any more.
  #[error("the session already failed")]
  SessionFailed,

  /// A row given to the encoder had the wrong number of bytes.
  #[error("row has {actual} bytes, expected {expected}")]
  RowLengthMismatch { expected: usize, actual: usize },

  /// The encoder was given more rows than the image height.
  #[error("more rows were given than the image height")]
  TooManyRows,

  /// The encoder was finished before every row was given.
  #[error("the image still needs {0} more rows")]
  MissingRows(u32),

  /// The configuration can't produce a legal PNG.
  #[error("invalid configuration: {0}")]
  InvalidConfig(&'static str),
}

/// Result alias used throughout the crate.
pub type PngResult<T> = Result<T, PngError>;

/// A recoverable problem. Decoding keeps going after one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PngWarning {
  /// An ancillary chunk this codec doesn't know. It was skipped.
  #[error("skipped unknown ancillary chunk {0:?}")]
  UnknownAncillaryChunk(ChunkType),

  /// An ancillary chunk in a position the format doesn't allow. It was skipped.
  #[error("skipped misplaced ancillary chunk {0:?}")]
  MisplacedAncillaryChunk(ChunkType),

  /// A second copy of an ancillary chunk that may appear only once. It was
  /// skipped.
  #[error("skipped duplicate ancillary chunk {0:?}")]
  DuplicateAncillaryChunk(ChunkType),

  /// An ancillary chunk whose content was not well formed. It was skipped.
  #[error("skipped malformed ancillary chunk {0:?}")]
  MalformedAncillaryChunk(ChunkType),

  /// The `IEND` chunk had data in it.
  #[error("the IEND chunk is not empty")]
  NonEmptyTrailer,

  /// The image data stream kept going after the zlib end marker.
  #[error("ignored data after the end of the image data stream")]
  TrailingCompressedData,

  /// Every row was decoded but the zlib stream never reached its end marker,
  /// so its checksum wasn't checked.
  #[error("the image data stream ended without its checksum")]
  MissingStreamChecksum,

  /// Bytes were given after the `IEND` chunk. Reported once per session.
  #[error("ignored bytes after the IEND chunk")]
  TrailingBytesAfterEnd,
}
