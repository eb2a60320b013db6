use super::*;

use alloc::rc::Rc;
use core::cell::RefCell;

fn png_from_chunks(chunks: &[(ChunkType, &[u8])]) -> Vec<u8> {
  let mut out = PNG_SIGNATURE.to_vec();
  for (chunk_ty, data) in chunks {
    write_chunk_into(&mut out, *chunk_ty, data).unwrap();
  }
  out
}

fn zlib(data: &[u8]) -> Vec<u8> {
  ZlibContext::for_deflate(6, DeflateStrategy::Default).deflate_all(ClaimPurpose::ImageData, data).unwrap()
}

fn grey8(width: u32, height: u32) -> IHDR {
  IHDR { width, height, bit_depth: 8, color_type: PngColorType::Y, is_interlaced: false }
}

/// An 8x8 greyscale image where pixel `(x, y)` is `y * 8 + x`, every row
/// stored with the Up filter.
fn up_filtered_example() -> (Vec<Vec<u8>>, Vec<u8>) {
  let raw: Vec<Vec<u8>> = (0..8_u8).map(|y| (0..8_u8).map(|x| y * 8 + x).collect()).collect();
  let mut filtered = Vec::new();
  let mut prev = [0_u8; 8];
  for row in &raw {
    filtered.push(2);
    filtered.extend(row.iter().zip(prev.iter()).map(|(r, p)| r.wrapping_sub(*p)));
    prev.copy_from_slice(row);
  }
  let png = png_from_chunks(&[
    (ChunkType::IHDR, &grey8(8, 8).to_bytes()),
    (ChunkType::IDAT, &zlib(&filtered)),
    (ChunkType::IEND, &[]),
  ]);
  (raw, png)
}

fn decode_in_pieces(png: &[u8], piece: usize) -> (Vec<Vec<u8>>, DecodeStatus) {
  let mut decoder = PngDecoder::new(DecoderConfig::default());
  let mut rows = Vec::new();
  let mut status = DecodeStatus::NeedMoreInput;
  for bytes in png.chunks(piece) {
    let step = decoder.decode_step(bytes);
    rows.extend(step.rows);
    status = step.status;
    if let DecodeStatus::Fatal(_) = status {
      break;
    }
  }
  (rows, status)
}

#[test]
fn test_up_filtered_example_decodes() {
  let (raw, png) = up_filtered_example();
  let decoded = decode_png(&png, DecoderConfig::default()).unwrap();
  assert_eq!(decoded.header, grey8(8, 8));
  assert_eq!(decoded.rows, raw);
  assert!(decoded.warnings.is_empty());
}

#[test]
fn test_corrupt_trailer_crc_after_seven_rows() {
  let (raw, mut png) = up_filtered_example();
  let last = png.len() - 1;
  png[last] ^= 0x01;
  let mut decoder = PngDecoder::new(DecoderConfig::default());
  let step = decoder.decode_all(&png);
  assert_eq!(step.rows, raw[..7]);
  assert!(matches!(step.status, DecodeStatus::Fatal(PngError::CrcMismatch { chunk: ChunkType::IEND, .. })));
  // the same in push mode, one byte at a time
  let (rows, status) = decode_in_pieces(&png, 1);
  assert_eq!(rows, raw[..7]);
  assert_eq!(status, step.status);
}

#[test]
fn test_rows_arrive_before_the_stream_ends() {
  let (raw, png) = up_filtered_example();
  let iend_start = png.len() - 12;
  let mut decoder = PngDecoder::new(DecoderConfig::default());
  let step = decoder.decode_step(&png[..iend_start]);
  assert_eq!(step.status, DecodeStatus::NeedMoreInput);
  assert_eq!(step.rows, raw[..7]);
  let step = decoder.decode_step(&png[iend_start..]);
  assert_eq!(step.status, DecodeStatus::Done);
  assert_eq!(step.rows, raw[7..]);
}

#[test]
fn test_truncated_input_in_sync_mode() {
  let (_, png) = up_filtered_example();
  let mut decoder = PngDecoder::new(DecoderConfig::default());
  let step = decoder.decode_all(&png[..png.len() - 3]);
  assert_eq!(step.status, DecodeStatus::Fatal(PngError::UnexpectedEof));
  assert_eq!(decode_png(&png[..20], DecoderConfig::default()), Err(PngError::UnexpectedEof));
}

#[test]
fn test_fatal_state_is_absorbing() {
  let (_, mut png) = up_filtered_example();
  png[0] = 0;
  let mut decoder = PngDecoder::new(DecoderConfig::default());
  assert_eq!(decoder.decode_step(&png).status, DecodeStatus::Fatal(PngError::InvalidSignature));
  assert_eq!(decoder.error(), Some(PngError::InvalidSignature));
  assert_eq!(decoder.decode_step(&png).status, DecodeStatus::Fatal(PngError::SessionFailed));
}

#[test]
fn test_first_chunk_must_be_the_header() {
  let png = png_from_chunks(&[(ChunkType::tEXt, b"Title\0x"), (ChunkType::IHDR, &grey8(1, 1).to_bytes())]);
  assert!(matches!(
    decode_png(&png, DecoderConfig::default()),
    Err(PngError::StructuralOrderViolation(_))
  ));
}

#[test]
fn test_bad_filter_type() {
  let png = png_from_chunks(&[
    (ChunkType::IHDR, &grey8(2, 2).to_bytes()),
    (ChunkType::IDAT, &zlib(&[0, 1, 2, 7, 3, 4])),
    (ChunkType::IEND, &[]),
  ]);
  let mut decoder = PngDecoder::new(DecoderConfig::default());
  let step = decoder.decode_all(&png);
  // the first row was fine, and it's not the last row, so it came out
  assert_eq!(step.rows, [[1, 2]]);
  assert_eq!(step.status, DecodeStatus::Fatal(PngError::InvalidFilterType(7)));
}

#[test]
fn test_image_data_length_must_match() {
  let short = png_from_chunks(&[
    (ChunkType::IHDR, &grey8(2, 2).to_bytes()),
    (ChunkType::IDAT, &zlib(&[0, 1, 2, 0])),
    (ChunkType::IEND, &[]),
  ]);
  assert!(matches!(decode_png(&short, DecoderConfig::default()), Err(PngError::CompressedStreamError(_))));
  let long = png_from_chunks(&[
    (ChunkType::IHDR, &grey8(2, 2).to_bytes()),
    (ChunkType::IDAT, &zlib(&[0, 1, 2, 0, 3, 4, 0])),
    (ChunkType::IEND, &[]),
  ]);
  assert!(matches!(decode_png(&long, DecoderConfig::default()), Err(PngError::CompressedStreamError(_))));
}

#[test]
fn test_missing_adler_is_a_warning() {
  let z = zlib(&[0, 1, 2, 0, 3, 4]);
  let png = png_from_chunks(&[
    (ChunkType::IHDR, &grey8(2, 2).to_bytes()),
    (ChunkType::IDAT, &z[..z.len() - 4]),
    (ChunkType::IEND, &[]),
  ]);
  let decoded = decode_png(&png, DecoderConfig::default()).unwrap();
  assert_eq!(decoded.rows, [[1, 2], [3, 4]]);
  assert_eq!(decoded.warnings, [PngWarning::MissingStreamChecksum]);
}

#[test]
fn test_data_after_the_zlib_end_is_a_warning() {
  let mut z = zlib(&[0, 1, 2, 0, 3, 4]);
  z.extend_from_slice(b"junk");
  let png = png_from_chunks(&[
    (ChunkType::IHDR, &grey8(2, 2).to_bytes()),
    (ChunkType::IDAT, &z),
    (ChunkType::IDAT, b"more junk"),
    (ChunkType::IEND, &[]),
  ]);
  let decoded = decode_png(&png, DecoderConfig::default()).unwrap();
  assert_eq!(decoded.rows, [[1, 2], [3, 4]]);
  assert_eq!(decoded.warnings, [PngWarning::TrailingCompressedData]);
}

#[test]
fn test_idat_split_across_chunks() {
  let (raw, _) = up_filtered_example();
  let filtered: Vec<u8> = raw.iter().flat_map(|row| core::iter::once(0).chain(row.iter().copied())).collect();
  let z = zlib(&filtered);
  let (a, rest) = z.split_at(3);
  let (b, c) = rest.split_at(rest.len() / 2);
  let png = png_from_chunks(&[
    (ChunkType::IHDR, &grey8(8, 8).to_bytes()),
    (ChunkType::IDAT, a),
    (ChunkType::IDAT, &[]),
    (ChunkType::IDAT, b),
    (ChunkType::IDAT, c),
    (ChunkType::IEND, &[]),
  ]);
  assert_eq!(decode_png(&png, DecoderConfig::default()).unwrap().rows, raw);
}

#[test]
fn test_critical_ordering_violations() {
  let header = grey8(2, 1).to_bytes();
  let z = zlib(&[0, 1, 2]);
  let split = png_from_chunks(&[
    (ChunkType::IHDR, &header),
    (ChunkType::IDAT, &z[..4]),
    (ChunkType::tEXt, b"Title\0x"),
    (ChunkType::IDAT, &z[4..]),
    (ChunkType::IEND, &[]),
  ]);
  // the text chunk ends the image data before all rows were there
  assert!(matches!(decode_png(&split, DecoderConfig::default()), Err(PngError::CompressedStreamError(_))));
  let no_idat = png_from_chunks(&[(ChunkType::IHDR, &header), (ChunkType::IEND, &[])]);
  assert!(matches!(decode_png(&no_idat, DecoderConfig::default()), Err(PngError::StructuralOrderViolation(_))));
  let indexed = IHDR { color_type: PngColorType::Index, ..grey8(2, 1) };
  let no_plte = png_from_chunks(&[(ChunkType::IHDR, &indexed.to_bytes()), (ChunkType::IDAT, &z), (ChunkType::IEND, &[])]);
  assert!(matches!(decode_png(&no_plte, DecoderConfig::default()), Err(PngError::StructuralOrderViolation(_))));
  let unknown = png_from_chunks(&[(ChunkType::IHDR, &header), (ChunkType(*b"ABCD"), &[]), (ChunkType::IDAT, &z)]);
  assert_eq!(
    decode_png(&unknown, DecoderConfig::default()),
    Err(PngError::UnsupportedCriticalChunk(ChunkType(*b"ABCD")))
  );
}

#[test]
fn test_chunk_size_limit() {
  let (_, png) = up_filtered_example();
  let config = DecoderConfig::default().with_max_chunk_size(12);
  assert_eq!(
    decode_png(&png, config),
    Err(PngError::ChunkTooLarge { chunk: ChunkType::IHDR, length: 13, limit: 12 })
  );
}

#[test]
fn test_ancillary_chunks_and_warnings() {
  let header = grey8(2, 1).to_bytes();
  let z = zlib(&[0, 1, 2]);
  let ztxt = TextEntry::new(b"Comment", b"after the image").with_compression(true);
  let ztxt_data = ztxt.to_chunk_data(&mut ZlibContext::for_deflate(6, DeflateStrategy::Default)).unwrap();
  let png = png_from_chunks(&[
    (ChunkType::IHDR, &header),
    (ChunkType::gAMA, &45455_u32.to_be_bytes()),
    (ChunkType::gAMA, &1_u32.to_be_bytes()),
    (ChunkType::pHYs, &[1, 2, 3]),
    (ChunkType(*b"prVt"), b"private"),
    (ChunkType::IDAT, &z),
    (ChunkType::zTXt, &ztxt_data),
    (ChunkType::tIME, &[7, 234, 1, 2, 3, 4, 5]),
    (ChunkType::IEND, b"x"),
  ]);
  let seen = Rc::new(RefCell::new(Vec::new()));
  let sink_seen = Rc::clone(&seen);
  let mut decoder = PngDecoder::new(DecoderConfig::default())
    .with_warning_sink(move |w: &PngWarning| sink_seen.borrow_mut().push(*w));
  let mut step = decoder.decode_all(&png);
  assert_eq!(step.status, DecodeStatus::Done);
  assert_eq!(step.rows.pop(), Some(alloc::vec![1, 2]));
  let expected = [
    PngWarning::DuplicateAncillaryChunk(ChunkType::gAMA),
    PngWarning::MalformedAncillaryChunk(ChunkType::pHYs),
    PngWarning::UnknownAncillaryChunk(ChunkType(*b"prVt")),
    PngWarning::NonEmptyTrailer,
  ];
  assert_eq!(decoder.warnings(), expected);
  assert_eq!(*seen.borrow(), expected);
  let meta = decoder.metadata();
  assert_eq!(meta.texts, [ztxt]);
  assert_eq!(meta.chunk(ChunkType::gAMA).unwrap().data, 45455_u32.to_be_bytes());
  assert_eq!(meta.chunk(ChunkType::tIME).unwrap().data, [7, 234, 1, 2, 3, 4, 5]);
  assert!(meta.chunk(ChunkType::pHYs).is_none());
}

#[test]
fn test_bytes_after_iend() {
  let (raw, mut png) = up_filtered_example();
  png.extend_from_slice(&[0; 5]);
  let mut decoder = PngDecoder::new(DecoderConfig::default());
  let step = decoder.decode_all(&png);
  assert_eq!(step.status, DecodeStatus::Done);
  assert_eq!(step.rows, raw);
  assert_eq!(decoder.warnings(), [PngWarning::TrailingBytesAfterEnd]);
  assert_eq!(decoder.decode_step(&[1]).status, DecodeStatus::Done);
  assert_eq!(decoder.warnings(), [PngWarning::TrailingBytesAfterEnd]);
  // the same warnings however the extra bytes were split up
  let (_, clean) = up_filtered_example();
  let mut split = PngDecoder::new(DecoderConfig::default());
  assert_eq!(split.decode_step(&clean).status, DecodeStatus::Done);
  for _ in 0..5 {
    assert_eq!(split.decode_step(&[0]).status, DecodeStatus::Done);
  }
  assert_eq!(split.warnings(), decoder.warnings());
}

#[test]
fn test_malformed_chunk_does_not_block_a_good_copy() {
  let png = png_from_chunks(&[
    (ChunkType::IHDR, &grey8(2, 1).to_bytes()),
    (ChunkType::gAMA, &[1, 2]),
    (ChunkType::gAMA, &45455_u32.to_be_bytes()),
    (ChunkType::iCCP, b" bad name\x00\x00"),
    (ChunkType::iCCP, &IccProfile { name: b"Good".to_vec(), profile: alloc::vec![3; 40] }
      .to_chunk_data(&mut ZlibContext::for_deflate(6, DeflateStrategy::Default))
      .unwrap()),
    (ChunkType::IDAT, &zlib(&[0, 1, 2])),
    (ChunkType::IEND, &[]),
  ]);
  let decoded = decode_png(&png, DecoderConfig::default()).unwrap();
  assert_eq!(
    decoded.warnings,
    [PngWarning::MalformedAncillaryChunk(ChunkType::gAMA), PngWarning::MalformedAncillaryChunk(ChunkType::iCCP)]
  );
  assert_eq!(decoded.metadata.chunk(ChunkType::gAMA).unwrap().data, 45455_u32.to_be_bytes());
  assert_eq!(decoded.metadata.icc_profile.unwrap().name, b"Good");
}

#[test]
fn test_whole_chunk_fragments_match_single_bytes() {
  let (raw, _) = up_filtered_example();
  let filtered: Vec<u8> = raw.iter().flat_map(|row| core::iter::once(0).chain(row.iter().copied())).collect();
  let stream = zlib(&filtered);
  let (front, back) = stream.split_at(stream.len() / 2);
  let chunks: [(ChunkType, &[u8]); 7] = [
    (ChunkType::IHDR, &grey8(8, 8).to_bytes()),
    (ChunkType::gAMA, &45455_u32.to_be_bytes()),
    (ChunkType::tEXt, b"Title\x00whole"),
    (ChunkType::IDAT, front),
    (ChunkType::IDAT, back),
    (ChunkType(*b"vpAg"), &[0; 9]),
    (ChunkType::IEND, &[]),
  ];
  // every fragment is exactly one chunk, so nothing needs buffering
  let mut whole = PngDecoder::new(DecoderConfig::default());
  let mut rows = whole.decode_step(&PNG_SIGNATURE).rows;
  for (chunk_ty, data) in chunks {
    let step = whole.decode_step(&write_chunk(chunk_ty, data).unwrap());
    rows.extend(step.rows);
    if chunk_ty == ChunkType::IEND {
      assert_eq!(step.status, DecodeStatus::Done);
    } else {
      assert_eq!(step.status, DecodeStatus::NeedMoreInput);
    }
  }
  assert_eq!(rows, raw);
  let png = png_from_chunks(&chunks);
  let mut bytewise = PngDecoder::new(DecoderConfig::default());
  let mut rows = Vec::new();
  for b in &png {
    rows.extend(bytewise.decode_step(core::slice::from_ref(b)).rows);
  }
  assert_eq!(rows, raw);
  assert_eq!(bytewise.warnings(), whole.warnings());
  assert_eq!(bytewise.metadata(), whole.metadata());
  assert_eq!(whole.warnings(), [PngWarning::UnknownAncillaryChunk(ChunkType(*b"vpAg"))]);
}

#[test]
fn test_interlaced_rows_come_out_in_order() {
  let header = IHDR { width: 5, height: 6, bit_depth: 8, color_type: PngColorType::RGB, is_interlaced: true };
  let rows: Vec<Vec<u8>> =
    (0..6_u32).map(|y| (0..15_u32).map(|i| (y * 31 + i * 7) as u8).collect()).collect();
  let png = encode_png(EncoderConfig::new(header), &rows).unwrap();
  let (got, status) = decode_in_pieces(&png, 3);
  assert_eq!(status, DecodeStatus::Done);
  assert_eq!(got, rows);
}

#[test]
fn test_encoder_writes_metadata_in_order() {
  let header = IHDR { width: 3, height: 1, bit_depth: 4, color_type: PngColorType::Index, is_interlaced: false };
  let icc = IccProfile { name: b"Test".to_vec(), profile: alloc::vec![9; 300] };
  let config = EncoderConfig::new(header)
    .with_palette(Palette::from(&[[1_u8, 2, 3], [4, 5, 6]][..]))
    .with_icc_profile(icc.clone())
    .with_ancillary(ChunkType::tRNS, &[0, 255])
    .with_ancillary(ChunkType::gAMA, &45455_u32.to_be_bytes())
    .with_text(TextEntry::new(b"Title", b"tiny"));
  let png = encode_png(config, [[0x01_u8, 0x10]]).unwrap();
  let order: Vec<ChunkType> = RawChunkIter::new(&png).map(|c| c.chunk_ty).collect();
  assert_eq!(
    order,
    [
      ChunkType::IHDR,
      ChunkType::gAMA,
      ChunkType::iCCP,
      ChunkType::PLTE,
      ChunkType::tRNS,
      ChunkType::IDAT,
      ChunkType::tEXt,
      ChunkType::IEND
    ]
  );
  let decoded = decode_png(&png, DecoderConfig::default()).unwrap();
  assert!(decoded.warnings.is_empty(), "{:?}", decoded.warnings);
  assert_eq!(decoded.rows, [[0x01, 0x10]]);
  assert_eq!(decoded.palette.unwrap().entries(), &[[1, 2, 3], [4, 5, 6]]);
  assert_eq!(decoded.metadata.icc_profile, Some(icc));
  assert_eq!(decoded.metadata.texts, [TextEntry::new(b"Title", b"tiny")]);
  assert_eq!(decoded.metadata.chunk(ChunkType::tRNS).unwrap().data, [0, 255]);
}
