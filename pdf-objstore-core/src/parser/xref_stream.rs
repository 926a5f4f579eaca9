//! Cross-reference stream support for PDF 1.5+
//!
//! This module implements cross-reference streams according to
//! ISO 32000-1:2008 Section 7.5.8 (Cross-Reference Streams).
//!
//! A cross-reference stream packs one fixed-size binary record per object:
//! three big-endian unsigned fields whose widths come from `/W`. Object
//! numbers are assigned by walking the `/Index` pairs, one number per record.

use super::filters::StreamDecoder;
use super::objects::{ObjectId, PdfDictionary, PdfStream};
use super::xref_types::{SectionKind, XRefEntryType, XRefSection, XRefSink};
use super::{ParseError, ParseOptions, ParseResult};

/// `/W` and `/Index` of one cross-reference stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XRefStreamLayout {
    /// Field widths in bytes
    pub widths: [usize; 3],
    /// `(first object number, count)` pairs
    pub index: Vec<(u32, u32)>,
}

impl XRefStreamLayout {
    /// Read the layout from the stream dictionary
    pub fn from_dict(dict: &PdfDictionary, max_object_number: u32) -> ParseResult<Self> {
        let w_array = dict
            .get("W")
            .and_then(|obj| obj.as_array())
            .ok_or_else(|| ParseError::MissingKey("W".to_string()))?;
        if w_array.len() != 3 {
            return Err(ParseError::InvalidXRef(format!(
                "W array must have 3 elements, found {}",
                w_array.len()
            )));
        }
        let mut widths = [0usize; 3];
        for (slot, obj) in widths.iter_mut().zip(&w_array.0) {
            *slot = obj
                .as_integer()
                .and_then(|w| usize::try_from(w).ok())
                .filter(|&w| w <= 8)
                .ok_or_else(|| ParseError::InvalidXRef(format!("Invalid W entry {obj:?}")))?;
        }

        let index = match dict.get("Index").and_then(|obj| obj.as_array()) {
            Some(array) => {
                if array.len() % 2 != 0 {
                    return Err(ParseError::InvalidXRef(
                        "Index array must have an even number of elements".to_string(),
                    ));
                }
                array
                    .0
                    .chunks(2)
                    .map(|pair| {
                        let first = pair[0].as_integer();
                        let count = pair[1].as_integer();
                        match (first, count) {
                            (Some(first), Some(count)) => {
                                checked_range(first, count, max_object_number)
                            }
                            _ => Err(ParseError::InvalidXRef(
                                "Index values must be integers".to_string(),
                            )),
                        }
                    })
                    .collect::<ParseResult<Vec<_>>>()?
            }
            None => {
                let size = dict
                    .get_integer("Size")
                    .ok_or_else(|| ParseError::MissingKey("Size".to_string()))?;
                vec![checked_range(0, size, max_object_number)?]
            }
        };

        Ok(Self { widths, index })
    }

    pub fn record_size(&self) -> usize {
        self.widths.iter().sum()
    }

    /// Total records the `/Index` pairs announce
    pub fn record_count(&self) -> usize {
        self.index.iter().map(|&(_, count)| count as usize).sum()
    }
}

fn checked_range(first: i64, count: i64, max_object_number: u32) -> ParseResult<(u32, u32)> {
    if first < 0 || count < 0 {
        return Err(ParseError::InvalidXRef(format!(
            "Negative Index pair {first} {count}"
        )));
    }
    if first + count > i64::from(max_object_number) + 1 {
        return Err(ParseError::LimitExceeded(format!(
            "Index pair {first} {count} exceeds object number limit {max_object_number}"
        )));
    }
    Ok((first as u32, count as u32))
}

/// Decodes cross-reference streams into registrations
pub struct XRefStreamParser<'a> {
    decoder: &'a dyn StreamDecoder,
    options: &'a ParseOptions,
}

impl<'a> XRefStreamParser<'a> {
    pub fn new(decoder: &'a dyn StreamDecoder, options: &'a ParseOptions) -> Self {
        Self { decoder, options }
    }

    /// Decode the stream read from `offset` into a section; the stream's
    /// dictionary becomes the section trailer
    pub fn parse_stream(&self, offset: u64, stream: &PdfStream) -> ParseResult<XRefSection> {
        if stream.dict.get_type() != Some("XRef") {
            if !self.options.lenient_syntax || !stream.dict.contains_key("W") {
                return Err(ParseError::InvalidXRef(format!(
                    "Object at {offset} is not a cross-reference stream"
                )));
            }
            tracing::warn!("Cross-reference stream at {} lacks /Type /XRef", offset);
        }

        let layout = XRefStreamLayout::from_dict(&stream.dict, self.options.max_object_number)?;
        let data = stream.decode(self.decoder)?;

        let mut section = XRefSection::new(SectionKind::Stream, offset, stream.dict.clone());
        let records = self.decode_records(&data, &layout, &mut section.entries)?;
        tracing::debug!(
            "Cross-reference stream at {} with {} records, W={:?}",
            offset,
            records,
            layout.widths
        );
        Ok(section)
    }

    /// Decode the record blob against `layout`, reporting to `sink`.
    /// Returns the number of records read.
    pub fn decode_records(
        &self,
        data: &[u8],
        layout: &XRefStreamLayout,
        sink: &mut dyn XRefSink,
    ) -> ParseResult<usize> {
        let record_size = layout.record_size();
        if record_size == 0 {
            return Err(ParseError::InvalidXRef(
                "Cross-reference stream records have zero size".to_string(),
            ));
        }
        if data.len() % record_size != 0 {
            return Err(ParseError::InvalidXRef(format!(
                "Stream length {} is not a multiple of record size {}",
                data.len(),
                record_size
            )));
        }
        let available = data.len() / record_size;
        let expected = layout.record_count();
        if available != expected {
            return Err(ParseError::InvalidXRef(format!(
                "Index announces {expected} records but stream holds {available}"
            )));
        }

        let [w0, w1, w2] = layout.widths;
        let mut records = data.chunks_exact(record_size);
        for &(first, count) in &layout.index {
            for number in first..first + count {
                let Some(record) = records.next() else {
                    break;
                };
                let (type_field, rest) = record.split_at(w0);
                let (field2, field3) = rest.split_at(w1);
                debug_assert_eq!(field3.len(), w2);

                // A zero-width type field defaults to 1
                let entry_type = if w0 == 0 {
                    XRefEntryType::Uncompressed
                } else {
                    XRefEntryType::from_value(read_field(type_field))
                };
                let field2 = read_field(field2);
                let field3 = read_field(field3);

                match entry_type {
                    XRefEntryType::Free => {}
                    XRefEntryType::Uncompressed => match u16::try_from(field3) {
                        Ok(generation) => {
                            sink.register(ObjectId::new(number, generation), field2);
                        }
                        Err(_) => tracing::warn!(
                            "Object {} has out of range generation {}",
                            number,
                            field3
                        ),
                    },
                    XRefEntryType::Compressed => {
                        match (u32::try_from(field2), u32::try_from(field3)) {
                            (Ok(container), Ok(index)) => {
                                sink.register_compressed(ObjectId::new(number, 0), container, index);
                            }
                            _ => tracing::warn!(
                                "Object {} has out of range container entry {} {}",
                                number,
                                field2,
                                field3
                            ),
                        }
                    }
                    XRefEntryType::Unknown(value) => {
                        tracing::trace!("Ignoring entry type {} for object {}", value, number);
                    }
                }
            }
        }

        Ok(expected)
    }
}

/// Read a field from bytes (big-endian); empty fields read as 0
fn read_field(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |value, &byte| (value << 8) | u64::from(byte))
}
