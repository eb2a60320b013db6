use pngpush::{png::*, PngError};
use proptest::prelude::*;

const FORMATS: &[(PngColorType, u8)] = &[
  (PngColorType::Y, 1),
  (PngColorType::Y, 2),
  (PngColorType::Y, 4),
  (PngColorType::Y, 8),
  (PngColorType::Y, 16),
  (PngColorType::RGB, 8),
  (PngColorType::RGB, 16),
  (PngColorType::Index, 1),
  (PngColorType::Index, 2),
  (PngColorType::Index, 4),
  (PngColorType::Index, 8),
  (PngColorType::YA, 8),
  (PngColorType::YA, 16),
  (PngColorType::RGBA, 8),
  (PngColorType::RGBA, 16),
];

/// Random rows for the header, with the padding bits at the end of each row
/// cleared the same way the encoder writes them.
fn random_rows(header: &IHDR) -> Vec<Vec<u8>> {
  let row_bytes = header.bytes_per_full_row().unwrap();
  let used_bits = header.width as usize * header.bits_per_pixel();
  let spare = row_bytes * 8 - used_bits;
  (0..header.height)
    .map(|_| {
      let mut row = super::rand_bytes(row_bytes);
      if let Some(last) = row.last_mut() {
        *last &= 0xFF_u8 << spare;
      }
      row
    })
    .collect()
}

fn config_for(header: IHDR) -> EncoderConfig {
  let config = EncoderConfig::new(header);
  if header.color_type == PngColorType::Index {
    config.with_palette(Palette::from(&[[0_u8, 0, 0], [255, 255, 255]][..]))
  } else {
    config
  }
}

fn small_example() -> (Vec<Vec<u8>>, Vec<u8>) {
  let header =
    IHDR { width: 4, height: 4, bit_depth: 8, color_type: PngColorType::RGB, is_interlaced: false };
  let rows = random_rows(&header);
  let png = encode_png(config_for(header).with_text(TextEntry::new(b"Title", b"tiny")), &rows).unwrap();
  (rows, png)
}

/// Pushes the bytes in pieces cut at `splits`, stopping at the first fatal
/// status.
fn decode_split(png: &[u8], splits: &[usize]) -> (Vec<Vec<u8>>, DecodeStatus) {
  let mut decoder = PngDecoder::new(DecoderConfig::default());
  let mut rows = Vec::new();
  let mut status = DecodeStatus::NeedMoreInput;
  let mut start = 0;
  for end in splits.iter().copied().chain(Some(png.len())) {
    let end = end.clamp(start, png.len());
    let step = decoder.decode_step(&png[start..end]);
    rows.extend(step.rows);
    status = step.status;
    start = end;
    if matches!(status, DecodeStatus::Fatal(_)) {
      break;
    }
  }
  (rows, status)
}

#[test]
fn test_RawChunkIter_no_panics() {
  let (_, png) = small_example();
  let types: Vec<ChunkType> = RawChunkIter::new(&png).map(|chunk| chunk.chunk_ty).collect();
  assert_eq!(types, [ChunkType::IHDR, ChunkType::IDAT, ChunkType::tEXt, ChunkType::IEND]);
  for chunk in RawChunkIter::new(&png) {
    assert_eq!(chunk.declared_crc, chunk.compute_actual_crc());
  }
  // even totally random data should never panic the iterator!
  for _ in 0..10 {
    let v = super::rand_bytes(1024);
    for _ in RawChunkIter::new(&v) {
      //
    }
    let mut v2 = PNG_SIGNATURE.to_vec();
    v2.extend_from_slice(&v);
    for _ in RawChunkIter::new(&v2) {
      //
    }
  }
}

#[test]
fn test_PngDecoder_no_panics() {
  let (_, png) = small_example();
  for _ in 0..50 {
    // random garbage after the signature
    let mut v = PNG_SIGNATURE.to_vec();
    v.extend_from_slice(&super::rand_bytes(512));
    let _ = decode_png(&v, DecoderConfig::default());
    // a real image with a few random bytes stomped on
    let mut v = png.clone();
    let stomp = super::rand_bytes(8);
    for pair in stomp.chunks(2) {
      let i = pair[0] as usize % v.len();
      v[i] = pair[1];
    }
    let _ = decode_png(&v, DecoderConfig::default());
    let _ = decode_split(&v, &[3, 17, 40]);
  }
}

#[test]
fn test_round_trip_every_format() {
  for &(color_type, bit_depth) in FORMATS {
    for is_interlaced in [false, true] {
      for (width, height) in [(1, 1), (3, 2), (7, 5), (13, 9)] {
        let header = IHDR { width, height, bit_depth, color_type, is_interlaced };
        let rows = random_rows(&header);
        let png = encode_png(config_for(header), &rows).unwrap();
        let decoded = decode_png(&png, DecoderConfig::default()).unwrap();
        assert_eq!(decoded.header, header);
        assert_eq!(decoded.rows, rows, "{header:?}");
        assert!(decoded.warnings.is_empty());
      }
    }
  }
}

#[test]
fn test_round_trip_every_filter_and_level() {
  let header =
    IHDR { width: 9, height: 6, bit_depth: 16, color_type: PngColorType::YA, is_interlaced: false };
  let rows = random_rows(&header);
  let choices = [
    FilterChoice::Adaptive,
    FilterChoice::Fixed(FilterType::None),
    FilterChoice::Fixed(FilterType::Sub),
    FilterChoice::Fixed(FilterType::Up),
    FilterChoice::Fixed(FilterType::Average),
    FilterChoice::Fixed(FilterType::Paeth),
  ];
  for filter in choices {
    for level in [0, 1, 6, 10] {
      for strategy in [DeflateStrategy::Default, DeflateStrategy::Filtered, DeflateStrategy::Fixed] {
        let config = config_for(header)
          .with_filter(filter)
          .with_compression(level, strategy)
          .with_idat_chunk_size(16);
        let png = encode_png(config, &rows).unwrap();
        assert_eq!(decode_png(&png, DecoderConfig::default()).unwrap().rows, rows);
      }
    }
  }
}

#[test]
fn test_streaming_encoder_output_decodes_incrementally() {
  let header =
    IHDR { width: 256, height: 128, bit_depth: 8, color_type: PngColorType::RGBA, is_interlaced: false };
  let rows = random_rows(&header);
  let mut encoder = PngEncoder::new(config_for(header).with_idat_chunk_size(1024)).unwrap();
  let mut decoder = PngDecoder::new(DecoderConfig::default());
  let mut decoded = Vec::new();
  for row in &rows {
    let bytes = encoder.encode_row(row).unwrap();
    let step = decoder.decode_step(&bytes);
    assert_eq!(step.status, DecodeStatus::NeedMoreInput);
    decoded.extend(step.rows);
  }
  // the compressor gives up blocks long before the end of this much data
  assert!(!decoded.is_empty());
  assert!(decoded.len() < rows.len());
  let step = decoder.decode_step(&encoder.finish().unwrap());
  assert_eq!(step.status, DecodeStatus::Done);
  decoded.extend(step.rows);
  assert_eq!(decoded, rows);
}

#[test]
fn test_single_bit_flips_are_crc_mismatches() {
  let (_, png) = small_example();
  let mut chunk_starts = Vec::new();
  let mut pos = PNG_SIGNATURE.len();
  for chunk in RawChunkIter::new(&png) {
    chunk_starts.push((pos, chunk.chunk_ty, chunk.data.len()));
    pos += 12 + chunk.data.len();
  }
  for (start, chunk_ty, len) in chunk_starts {
    // every bit of the data
    for byte in start + 8..start + 8 + len {
      for bit in 0..8 {
        let mut v = png.clone();
        v[byte] ^= 1 << bit;
        let result = decode_png(&v, DecoderConfig::default());
        assert!(
          matches!(result, Err(PngError::CrcMismatch { chunk, .. }) if chunk == chunk_ty),
          "{chunk_ty:?} byte {byte} bit {bit}: {result:?}"
        );
      }
    }
    // flipping letter case keeps the type legal, so only the CRC catches it
    if chunk_ty != ChunkType::IHDR {
      for byte in start + 4..start + 8 {
        let mut v = png.clone();
        v[byte] ^= 0x20;
        let result = decode_png(&v, DecoderConfig::default());
        assert!(matches!(result, Err(PngError::CrcMismatch { .. })), "{result:?}");
      }
    }
  }
}

#[test]
fn test_claims_are_exclusive_within_a_session() {
  // a session can't claim its engine twice
  let mut ctx = ZlibContext::for_inflate();
  let claim = ctx.claim(ClaimPurpose::ImageData).unwrap();
  assert_eq!(
    ctx.claim(ClaimPurpose::CompressedText).map(|_| ()),
    Err(PngError::AlreadyClaimed { held: ClaimPurpose::ImageData, requested: ClaimPurpose::CompressedText })
  );
  ctx.abort(claim).unwrap();
  assert_eq!(ctx.claimed_by(), None);
  // but separate sessions never share one
  let (rows, png) = small_example();
  let mut a = PngDecoder::new(DecoderConfig::default());
  let mut b = PngDecoder::new(DecoderConfig::default());
  let mut a_rows = Vec::new();
  let mut b_rows = Vec::new();
  for piece in png.chunks(7) {
    a_rows.extend(a.decode_step(piece).rows);
    b_rows.extend(b.decode_step(piece).rows);
  }
  assert!(a.is_done() && b.is_done());
  assert_eq!(a_rows, rows);
  assert_eq!(b_rows, rows);
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(64))]

  #[test]
  fn prop_unfilter_undoes_filter(
    row in proptest::collection::vec(any::<u8>(), 1..64),
    seed in any::<u8>(),
    bpp in 1_usize..=8,
    tag in 0_u8..5,
  ) {
    let filter = FilterType::try_from(tag).unwrap();
    let prev: Vec<u8> = row.iter().map(|b| b.wrapping_mul(31).wrapping_add(seed)).collect();
    let mut filtered = vec![0; row.len()];
    filter_row(filter, bpp, &prev, &row, &mut filtered);
    unfilter_row(filter, bpp, &prev, &mut filtered);
    prop_assert_eq!(filtered, row);
  }

  #[test]
  fn prop_any_split_decodes_the_same(splits in proptest::collection::vec(0_usize..400, 0..12)) {
    let header =
      IHDR { width: 5, height: 7, bit_depth: 4, color_type: PngColorType::Y, is_interlaced: true };
    let rows = random_rows(&header);
    let png = encode_png(config_for(header), &rows).unwrap();
    let mut splits = splits;
    splits.sort_unstable();
    let (split_rows, status) = decode_split(&png, &splits);
    prop_assert_eq!(status, DecodeStatus::Done);
    prop_assert_eq!(split_rows, rows);
  }

  #[test]
  fn prop_corruption_is_seen_the_same_in_any_split(
    splits in proptest::collection::vec(0_usize..200, 0..8),
    at in 8_usize..200,
    bit in 0_u8..8,
  ) {
    let (_, mut png) = small_example();
    let at = at % png.len();
    png[at] ^= 1 << bit;
    let mut whole = PngDecoder::new(DecoderConfig::default());
    let step = whole.decode_step(&png);
    let mut splits = splits;
    splits.sort_unstable();
    let (split_rows, status) = decode_split(&png, &splits);
    prop_assert_eq!(status, step.status);
    prop_assert_eq!(split_rows, step.rows);
  }

  #[test]
  fn prop_adam7_covers_every_pixel_once(width in 1_u32..40, height in 1_u32..40) {
    let passes: Vec<InterlacePass> = interlace_passes(width, height, true).collect();
    let total: u64 = passes.iter().map(|p| u64::from(p.width) * u64::from(p.height)).sum();
    prop_assert_eq!(total, u64::from(width) * u64::from(height));
    for y in 0..height {
      for x in 0..width {
        let (index, rx, ry) = full_pos_to_interlaced_pos(x, y);
        let pass = passes.iter().find(|p| p.index == index).unwrap();
        prop_assert!(rx < pass.width && ry < pass.height);
        prop_assert_eq!(pass.to_full(rx, ry), (x, y));
      }
    }
  }
}
