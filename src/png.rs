#![forbid(unsafe_code)]

//! Module for streaming PNG encoding and decoding.
//!
//! * [Portable Network Graphics Specification (Third Edition)][png-spec]
//!
//! [png-spec]: https://www.w3.org/TR/png-3/
//!
//! ## Decoding
//!
//! Make a [`PngDecoder`] and push bytes at it with
//! [`decode_step`](PngDecoder::decode_step) as they arrive, in pieces of any
//! size. Each step gives back the image rows that became final, and a status
//! saying if more input is needed, if the image is done, or if decoding
//! failed.
//!
//! ```
//! use pngpush::png::*;
//! # let header = IHDR { width: 2, height: 2, bit_depth: 8, color_type: PngColorType::Y, is_interlaced: false };
//! # let png = encode_png(EncoderConfig::new(header), [[1_u8, 2], [3, 4]]).unwrap();
//! let mut decoder = PngDecoder::new(DecoderConfig::default());
//! let mut rows = Vec::new();
//! for piece in png.chunks(5) {
//!   let step = decoder.decode_step(piece);
//!   rows.extend(step.rows);
//!   if let DecodeStatus::Fatal(e) = step.status {
//!     panic!("{e}");
//!   }
//! }
//! assert!(decoder.is_done());
//! assert_eq!(rows, [[1, 2], [3, 4]]);
//! ```
//!
//! Rows come out top to bottom, unfiltered, with pixels packed the same way
//! as in the image data: sub-byte pixels share bytes (high bits first) and 16
//! bit channels are big-endian. Interlaced images are put back together
//! before their rows come out.
//!
//! If all the bytes are already in memory, [`decode_png`] does the whole
//! thing at once.
//!
//! ## Encoding
//!
//! Make a [`PngEncoder`] from an [`EncoderConfig`], give it each row with
//! [`encode_row`](PngEncoder::encode_row), and collect the bytes it gives back,
//! then [`finish`](PngEncoder::finish) it. Or just call [`encode_png`].
//!
//! ## Strictness
//!
//! Quoting [section 13.2 of the PNG
//! spec](https://www.w3.org/TR/png-3/#13Decoders.Errors):
//!
//! > Errors that have little or no effect on the processing of the image may be
//! > ignored, while those that affect critical data shall be dealt with in a
//! > manner appropriate to the application.
//!
//! So the decoder is strict about the structure of the stream and lax about
//! metadata:
//!
//! * Every CRC is checked, and so is the Adler-32 of every zlib stream.
//! * The critical chunk ordering rules are enforced.
//! * Unknown, misplaced, duplicate, or malformed ancillary chunks are skipped
//!   with a [`PngWarning`].
//!
//! ## The zlib engine
//!
//! Each session has exactly one zlib engine, in a [`ZlibContext`]. The image
//! data and every compressed ancillary chunk are separate zlib streams, and
//! each one borrows the engine with a [`ZlibClaim`] while it's being
//! processed. Only one claim can be out at a time.

use core::fmt::{Debug, Write};

use alloc::{boxed::Box, vec::Vec};

use log::{debug, trace, warn};

use crate::{fill_from, try_split_off_byte_array, PngError, PngResult, PngWarning};

mod adam7;
pub use adam7::*;

mod ancillary;
pub use ancillary::*;

mod chunk_type;
pub use chunk_type::*;

mod config;
pub use config::*;

mod crc32;
pub use crc32::*;

mod decoder;
pub use decoder::*;

mod encoder;
pub use encoder::*;

mod filter;
pub use filter::*;

mod framer;
pub use framer::*;

mod ihdr;
pub use ihdr::*;

mod ordering;
pub use ordering::*;

mod plte;
pub use plte::*;

mod zlib;
pub use zlib::*;

#[cfg(test)]
mod tests;
