//! PDF Stream Filters
//!
//! Handles decompression and decoding of PDF streams according to ISO 32000-1 Section 7.4.
//!
//! The store only needs streams decoded in two places (cross-reference
//! streams and object streams), and both go through the [`StreamDecoder`]
//! trait so callers can plug in a richer codec layer.

use super::objects::{PdfDictionary, PdfName};
use super::{ParseError, ParseResult};

#[cfg(feature = "compression")]
use flate2::read::{DeflateDecoder, ZlibDecoder};
#[cfg(feature = "compression")]
use std::io::Read;

/// Decodes a raw stream body through a chain of filters
pub trait StreamDecoder: Send + Sync {
    /// `params[i]` holds the `/DecodeParms` entry for `filters[i]`, if any
    fn decode(
        &self,
        raw: &[u8],
        filters: &[PdfName],
        params: &[Option<PdfDictionary>],
    ) -> ParseResult<Vec<u8>>;
}

/// Supported PDF filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// ASCII hex decode
    ASCIIHexDecode,

    /// ASCII 85 decode
    ASCII85Decode,

    /// LZW decode
    LZWDecode,

    /// Flate decode (zlib/deflate compression)
    FlateDecode,

    /// Run length decode
    RunLengthDecode,

    /// CCITT fax decode
    CCITTFaxDecode,

    /// JBIG2 decode
    JBIG2Decode,

    /// DCT decode (JPEG)
    DCTDecode,

    /// JPX decode (JPEG 2000)
    JPXDecode,

    /// Crypt filter
    Crypt,
}

impl Filter {
    /// Parse filter from name, including the abbreviated inline-image forms
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ASCIIHexDecode" | "AHx" => Some(Filter::ASCIIHexDecode),
            "ASCII85Decode" | "A85" => Some(Filter::ASCII85Decode),
            "LZWDecode" | "LZW" => Some(Filter::LZWDecode),
            "FlateDecode" | "Fl" => Some(Filter::FlateDecode),
            "RunLengthDecode" | "RL" => Some(Filter::RunLengthDecode),
            "CCITTFaxDecode" | "CCF" => Some(Filter::CCITTFaxDecode),
            "JBIG2Decode" => Some(Filter::JBIG2Decode),
            "DCTDecode" | "DCT" => Some(Filter::DCTDecode),
            "JPXDecode" => Some(Filter::JPXDecode),
            "Crypt" => Some(Filter::Crypt),
            _ => None,
        }
    }
}

/// Decoder for the filters the object store itself relies on
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardDecoder;

impl StreamDecoder for StandardDecoder {
    fn decode(
        &self,
        raw: &[u8],
        filters: &[PdfName],
        params: &[Option<PdfDictionary>],
    ) -> ParseResult<Vec<u8>> {
        let mut result = raw.to_vec();
        for (i, name) in filters.iter().enumerate() {
            let filter = Filter::from_name(name.as_str()).ok_or_else(|| {
                ParseError::StreamDecodeError(format!("Unknown filter: {}", name.as_str()))
            })?;
            result = apply_filter(&result, filter)?;
            if let Some(Some(parms)) = params.get(i) {
                result = apply_predictor(result, parms)?;
            }
        }
        Ok(result)
    }
}

/// Apply a single filter to data
fn apply_filter(data: &[u8], filter: Filter) -> ParseResult<Vec<u8>> {
    match filter {
        Filter::FlateDecode => decode_flate(data),
        Filter::ASCIIHexDecode => decode_ascii_hex(data),
        Filter::ASCII85Decode => decode_ascii85(data),
        _ => Err(ParseError::StreamDecodeError(format!(
            "Filter {filter:?} is not supported"
        ))),
    }
}

/// Decode FlateDecode (zlib/deflate) compressed data
#[cfg(feature = "compression")]
fn decode_flate(data: &[u8]) -> ParseResult<Vec<u8>> {
    let mut result = Vec::new();
    match ZlibDecoder::new(data).read_to_end(&mut result) {
        Ok(_) => Ok(result),
        Err(zlib_err) => {
            // Some writers emit raw deflate without the zlib header
            let mut raw = Vec::new();
            match DeflateDecoder::new(data).read_to_end(&mut raw) {
                Ok(_) => Ok(raw),
                Err(_) if !result.is_empty() => {
                    tracing::warn!("Truncated Flate stream, keeping {} bytes", result.len());
                    Ok(result)
                }
                Err(_) => Err(ParseError::StreamDecodeError(format!(
                    "Flate decode error: {zlib_err}"
                ))),
            }
        }
    }
}

#[cfg(not(feature = "compression"))]
fn decode_flate(_data: &[u8]) -> ParseResult<Vec<u8>> {
    Err(ParseError::StreamDecodeError(
        "FlateDecode requires 'compression' feature".to_string(),
    ))
}

/// Decode ASCIIHexDecode data
fn decode_ascii_hex(data: &[u8]) -> ParseResult<Vec<u8>> {
    let mut result = Vec::new();
    let mut digits = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .take_while(|&b| b != b'>');

    while let Some(high) = digits.next() {
        // Odd number of digits pads with 0
        let low = digits.next().unwrap_or(b'0');
        let high_val = hex_digit_value(high).ok_or_else(|| {
            ParseError::StreamDecodeError(format!("Invalid hex digit: {}", high as char))
        })?;
        let low_val = hex_digit_value(low).ok_or_else(|| {
            ParseError::StreamDecodeError(format!("Invalid hex digit: {}", low as char))
        })?;
        result.push((high_val << 4) | low_val);
    }

    Ok(result)
}

fn hex_digit_value(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        _ => None,
    }
}

/// Decode ASCII85Decode data
fn decode_ascii85(data: &[u8]) -> ParseResult<Vec<u8>> {
    let mut body: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if body.starts_with(b"<~") {
        body.drain(..2);
    }

    let mut result = Vec::new();
    let mut group = Vec::with_capacity(5);
    let mut terminated = false;

    let mut iter = body.iter().copied();
    while let Some(c) = iter.next() {
        match c {
            b'~' => {
                if iter.next() != Some(b'>') {
                    return Err(ParseError::StreamDecodeError(
                        "Invalid ASCII85 end marker".to_string(),
                    ));
                }
                terminated = true;
                break;
            }
            // 'z' stands for four zero bytes
            b'z' if group.is_empty() => result.extend_from_slice(&[0, 0, 0, 0]),
            b'!'..=b'u' => {
                group.push(c);
                if group.len() == 5 {
                    let value = u32::try_from(ascii85_value(&group)).map_err(|_| {
                        ParseError::StreamDecodeError("ASCII85 group out of range".to_string())
                    })?;
                    result.extend_from_slice(&value.to_be_bytes());
                    group.clear();
                }
            }
            _ => {
                return Err(ParseError::StreamDecodeError(format!(
                    "Invalid ASCII85 character: {}",
                    c as char
                )))
            }
        }
    }

    if !terminated {
        tracing::debug!("ASCII85 data without ~> terminator");
    }

    if !group.is_empty() {
        let kept = group.len() - 1;
        group.resize(5, b'u');
        let value = u32::try_from(ascii85_value(&group)).unwrap_or(u32::MAX);
        let bytes = value.to_be_bytes();
        result.extend_from_slice(&bytes[..kept]);
    }

    Ok(result)
}

fn ascii85_value(group: &[u8]) -> u64 {
    group
        .iter()
        .fold(0u64, |acc, &ch| acc * 85 + u64::from(ch - b'!'))
}

/// Undo a PNG (Predictor >= 10) or TIFF (Predictor 2) predictor
fn apply_predictor(data: Vec<u8>, parms: &PdfDictionary) -> ParseResult<Vec<u8>> {
    let predictor = parms.get_integer("Predictor").unwrap_or(1);
    if predictor <= 1 {
        return Ok(data);
    }

    let colors = parms.get_integer("Colors").unwrap_or(1).clamp(1, 32) as usize;
    let bits = parms.get_integer("BitsPerComponent").unwrap_or(8).clamp(1, 16) as usize;
    let columns = usize::try_from(parms.get_integer("Columns").unwrap_or(1).max(1))
        .map_err(|_| ParseError::StreamDecodeError("Predictor /Columns out of range".to_string()))?;

    let bytes_per_pixel = (colors * bits).div_ceil(8);
    let row_len = (colors * bits)
        .checked_mul(columns)
        .map(|row_bits| row_bits.div_ceil(8))
        .ok_or_else(|| {
            ParseError::StreamDecodeError(format!("Predictor row of {columns} columns overflows"))
        })?;

    if data.is_empty() {
        return Ok(data);
    }
    // A row never exceeds the decoded data it is cut from
    if row_len > data.len() {
        return Err(ParseError::StreamDecodeError(format!(
            "Predictor row length {row_len} exceeds {} decoded bytes",
            data.len()
        )));
    }

    match predictor {
        2 => Ok(undo_tiff_predictor(data, row_len, bytes_per_pixel, bits)),
        10..=15 => undo_png_predictor(&data, row_len, bytes_per_pixel),
        other => Err(ParseError::StreamDecodeError(format!(
            "Unsupported predictor {other}"
        ))),
    }
}

fn undo_tiff_predictor(mut data: Vec<u8>, row_len: usize, bpp: usize, bits: usize) -> Vec<u8> {
    if bits != 8 {
        tracing::warn!("TIFF predictor with {} bits per component left as is", bits);
        return data;
    }
    for row in data.chunks_mut(row_len) {
        for i in bpp..row.len() {
            row[i] = row[i].wrapping_add(row[i - bpp]);
        }
    }
    data
}

fn undo_png_predictor(data: &[u8], row_len: usize, bpp: usize) -> ParseResult<Vec<u8>> {
    let stride = row_len + 1;
    let mut result = Vec::with_capacity(data.len() / stride * row_len);
    let mut previous = vec![0u8; row_len];

    for chunk in data.chunks(stride) {
        if chunk.len() < 2 {
            break;
        }
        let tag = chunk[0];
        let mut row = chunk[1..].to_vec();
        row.resize(row_len, 0);

        for i in 0..row_len {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let up = previous[i];
            let up_left = if i >= bpp { previous[i - bpp] } else { 0 };
            row[i] = match tag {
                0 => row[i],
                1 => row[i].wrapping_add(left),
                2 => row[i].wrapping_add(up),
                3 => row[i].wrapping_add(((u16::from(left) + u16::from(up)) / 2) as u8),
                4 => row[i].wrapping_add(paeth(left, up, up_left)),
                other => {
                    return Err(ParseError::StreamDecodeError(format!(
                        "Invalid PNG predictor tag {other}"
                    )))
                }
            };
        }

        result.extend_from_slice(&row);
        previous = row;
    }

    Ok(result)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = i16::from(a) + i16::from(b) - i16::from(c);
    let pa = (p - i16::from(a)).abs();
    let pb = (p - i16::from(b)).abs();
    let pc = (p - i16::from(c)).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::objects::{PdfArray, PdfObject, PdfStream};

    fn names(list: &[&str]) -> Vec<PdfName> {
        list.iter().map(|n| PdfName::new(*n)).collect()
    }

    #[test]
    fn test_ascii_hex_decode() {
        assert_eq!(decode_ascii_hex(b"48656C6C6F>").unwrap(), b"Hello");
        assert_eq!(decode_ascii_hex(b"48 65 6C 6C 6F>").unwrap(), b"Hello");
        assert_eq!(decode_ascii_hex(b"48656C6C6>").unwrap(), b"Hell`");
        assert_eq!(decode_ascii_hex(b"48656C6C6F").unwrap(), b"Hello");
        assert!(decode_ascii_hex(b">").unwrap().is_empty());
        assert!(decode_ascii_hex(b"GG>").is_err());
    }

    #[test]
    fn test_ascii85_decode() {
        assert_eq!(decode_ascii85(b"87cURD]j7BEbo80~>").unwrap(), b"Hello world!");
        assert_eq!(decode_ascii85(b"<~87cURD]j7BEbo80~>").unwrap(), b"Hello world!");
        assert_eq!(decode_ascii85(b"z~>").unwrap(), &[0, 0, 0, 0]);
        assert!(decode_ascii85(b"~>").unwrap().is_empty());
        assert!(decode_ascii85(b"invalid~>").is_err());
    }

    #[test]
    fn test_filter_from_name() {
        assert_eq!(Filter::from_name("FlateDecode"), Some(Filter::FlateDecode));
        assert_eq!(Filter::from_name("Fl"), Some(Filter::FlateDecode));
        assert_eq!(Filter::from_name("AHx"), Some(Filter::ASCIIHexDecode));
        assert_eq!(Filter::from_name("UnknownFilter"), None);
    }

    #[test]
    fn test_unsupported_filters_fail() {
        for filter in [Filter::LZWDecode, Filter::DCTDecode, Filter::Crypt] {
            assert!(matches!(
                apply_filter(b"data", filter),
                Err(ParseError::StreamDecodeError(_))
            ));
        }
    }

    #[test]
    fn test_decoder_chain() {
        let decoder = StandardDecoder;
        let once = b"343836353643364336463E>";
        let out = decoder
            .decode(once, &names(&["ASCIIHexDecode", "ASCIIHexDecode"]), &[None, None])
            .unwrap();
        assert_eq!(out, b"Hello");
    }

    #[test]
    fn test_stream_decode_reads_filter_entry() {
        let mut dict = PdfDictionary::new();
        dict.insert(
            "Filter".to_string(),
            PdfObject::Array(PdfArray(vec![PdfObject::Name(PdfName::new("AHx"))])),
        );
        let stream = PdfStream {
            dict,
            data: b"48656C6C6F>".to_vec(),
        };
        assert_eq!(stream.decode(&StandardDecoder).unwrap(), b"Hello");

        let mut bad = stream.clone();
        bad.dict.insert("Filter".to_string(), PdfObject::Integer(42));
        assert!(bad.decode(&StandardDecoder).is_err());
    }

    #[test]
    fn test_png_up_predictor() {
        // Two rows of 3 columns, both tagged "Up"
        let data = vec![2, 1, 2, 3, 2, 1, 1, 1];
        let mut parms = PdfDictionary::new();
        parms.insert("Predictor".to_string(), PdfObject::Integer(12));
        parms.insert("Columns".to_string(), PdfObject::Integer(3));
        let out = apply_predictor(data, &parms).unwrap();
        assert_eq!(out, vec![1, 2, 3, 2, 3, 4]);
    }

    #[test]
    fn test_png_sub_and_paeth_predictors() {
        let data = vec![1, 5, 1, 1, 4, 0, 0, 0];
        let mut parms = PdfDictionary::new();
        parms.insert("Predictor".to_string(), PdfObject::Integer(15));
        parms.insert("Columns".to_string(), PdfObject::Integer(3));
        let out = apply_predictor(data, &parms).unwrap();
        // Row 1: Sub -> 5 6 7; Row 2: Paeth on zeros copies the row above
        assert_eq!(out, vec![5, 6, 7, 5, 6, 7]);
    }

    #[test]
    fn test_tiff_predictor() {
        let mut parms = PdfDictionary::new();
        parms.insert("Predictor".to_string(), PdfObject::Integer(2));
        parms.insert("Columns".to_string(), PdfObject::Integer(3));
        let out = apply_predictor(vec![1, 1, 1, 10, 0, 5], &parms).unwrap();
        assert_eq!(out, vec![1, 2, 3, 10, 10, 15]);
    }

    #[test]
    fn test_predictor_rejects_oversized_columns() {
        let data = vec![2, 1, 2, 3, 2, 1, 1, 1];
        for columns in [i64::MAX, 1_099_511_627_776, 9] {
            let mut parms = PdfDictionary::new();
            parms.insert("Predictor".to_string(), PdfObject::Integer(12));
            parms.insert("Columns".to_string(), PdfObject::Integer(columns));
            parms.insert("Colors".to_string(), PdfObject::Integer(4));
            assert!(matches!(
                apply_predictor(data.clone(), &parms),
                Err(ParseError::StreamDecodeError(_))
            ));
        }
    }

    #[test]
    fn test_predictor_through_decoder_with_hostile_parms() {
        let mut parms = PdfDictionary::new();
        parms.insert("Predictor".to_string(), PdfObject::Integer(12));
        parms.insert("Columns".to_string(), PdfObject::Integer(i64::MAX));
        let result = StandardDecoder.decode(
            b"0201020302010101>",
            &names(&["ASCIIHexDecode"]),
            &[Some(parms)],
        );
        assert!(matches!(result, Err(ParseError::StreamDecodeError(_))));
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_flate_decode() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let original = b"Hello, compressed world!";
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(original).unwrap();
        let compressed = encoder.finish().unwrap();

        let out = StandardDecoder
            .decode(&compressed, &names(&["FlateDecode"]), &[None])
            .unwrap();
        assert_eq!(out, original);
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_raw_deflate_fallback() {
        use flate2::write::DeflateEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"raw deflate body").unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(decode_flate(&compressed).unwrap(), b"raw deflate body");
    }

    #[cfg(not(feature = "compression"))]
    #[test]
    fn test_flate_decode_not_supported() {
        assert!(decode_flate(b"compressed data").is_err());
    }
}
