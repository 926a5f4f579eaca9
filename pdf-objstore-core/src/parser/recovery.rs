//! XRef recovery for corrupted PDF files
//!
//! Rebuilds the object table by scanning the whole file for `N G obj`
//! headers when the cross-reference chain cannot be used. Every object found
//! is parsed once and seeded into the table at its byte position, so later
//! resolution returns the scanned value. Members of object streams found
//! along the way are registered as compressed entries.
//!
//! The trailer is taken from the last `trailer` dictionary whose `/Root`
//! exists, else from the last cross-reference stream dictionary with a valid
//! `/Root`, else synthesized around the last `/Type /Catalog` object seen.

use super::filters::StreamDecoder;
use super::lexer::{find_bytes, is_delimiter, is_whitespace, rfind_bytes};
use super::object_stream::ObjectStream;
use super::objects::{ObjectId, ObjectParser, PdfDictionary, PdfObject};
use super::trailer::{Bootstrap, PdfTrailer, TrailerChain};
use super::xref_table::XRefTable;
use super::{ParseError, ParseOptions, ParseResult};

/// Recovery statistics
#[derive(Debug, Default)]
struct RecoveryStats {
    /// Number of `N G obj` objects parsed
    objects_found: usize,
    /// Number of object stream members registered
    compressed_found: usize,
    /// Number of headers that did not parse
    errors: usize,
    /// Whether a `trailer` dictionary supplied the trailer
    trailer_found: bool,
}

/// Scan `data` and build a table from whatever objects it holds
pub fn scan(data: &[u8], options: &ParseOptions, decoder: &dyn StreamDecoder) -> ParseResult<Bootstrap> {
    let mut scanner = RecoveryScanner::new(data, options, decoder);
    scanner.scan_objects();
    scanner.register_object_streams();
    let trailer = scanner.build_trailer()?;

    tracing::info!(
        "Recovered {} objects and {} compressed members ({} unparsable headers, trailer {})",
        scanner.stats.objects_found,
        scanner.stats.compressed_found,
        scanner.stats.errors,
        if scanner.stats.trailer_found { "found" } else { "synthesized" }
    );

    Ok(Bootstrap {
        table: scanner.table,
        chain: TrailerChain::new(trailer),
        recovered: true,
        sections: 0,
    })
}

struct RecoveryScanner<'a> {
    data: &'a [u8],
    options: &'a ParseOptions,
    decoder: &'a dyn StreamDecoder,
    table: XRefTable,
    stats: RecoveryStats,
    max_number: u32,
    catalog: Option<ObjectId>,
    /// Dictionaries of cross-reference streams, in file order
    xref_streams: Vec<(u64, PdfDictionary)>,
    object_streams: Vec<ObjectId>,
}

impl<'a> RecoveryScanner<'a> {
    fn new(data: &'a [u8], options: &'a ParseOptions, decoder: &'a dyn StreamDecoder) -> Self {
        Self {
            data,
            options,
            decoder,
            table: XRefTable::new(options.max_object_number),
            stats: RecoveryStats::default(),
            max_number: 0,
            catalog: None,
            xref_streams: Vec::new(),
            object_streams: Vec::new(),
        }
    }

    /// Parse every `N G obj` in file order; later copies of a number replace
    /// earlier ones
    fn scan_objects(&mut self) {
        let mut cursor = 0;
        while let Some(found) = find_bytes(&self.data[cursor..], b"obj") {
            let keyword = cursor + found;
            cursor = keyword + 3;
            let Some(start) = header_start(self.data, keyword) else {
                continue;
            };

            let mut parser = ObjectParser::at(self.data, start).with_options(self.options);
            match parser.read_indirect() {
                Ok((id, object)) => {
                    self.record(id, object, start as u64);
                    cursor = cursor.max(parser.position());
                }
                Err(e) => {
                    tracing::debug!("Unparsable object header at {}: {}", start, e);
                    self.stats.errors += 1;
                }
            }
        }
    }

    fn record(&mut self, id: ObjectId, object: PdfObject, position: u64) {
        if let Some(dict) = object.as_dict().or_else(|| object.as_stream().map(|s| &s.dict)) {
            match dict.get_type() {
                Some("Catalog") => self.catalog = Some(id),
                Some("ObjStm") => self.object_streams.push(id),
                Some("XRef") => self.xref_streams.push((position, dict.clone())),
                _ => {}
            }
        }

        match self.table.register_inline(id, object, Some(position)) {
            Ok(_) => {
                self.stats.objects_found += 1;
                self.max_number = self.max_number.max(id.number);
            }
            Err(e) => {
                tracing::debug!("Skipping recovered object {}: {}", id, e);
                self.stats.errors += 1;
            }
        }
    }

    /// Plain objects found by the scan keep precedence over members
    fn register_object_streams(&mut self) {
        for container in std::mem::take(&mut self.object_streams) {
            // A later plain object may have replaced the container
            let Some(slot) = self.table.get(container) else {
                continue;
            };
            let Some(stream) = slot.cached().and_then(|o| o.as_stream()) else {
                continue;
            };
            let built =
                ObjectStream::build_offset_table(container, stream, self.decoder, self.options);
            let objstm = match built {
                Ok(objstm) => objstm,
                Err(e) => {
                    tracing::debug!("Unreadable object stream {}: {}", container, e);
                    self.stats.errors += 1;
                    continue;
                }
            };

            for (index, number) in objstm.object_numbers().enumerate() {
                let id = ObjectId::new(number, 0);
                if !self.table.register_compressed(id, container.number, index as u32) {
                    continue;
                }
                self.stats.compressed_found += 1;
                self.max_number = self.max_number.max(number);
                if self.catalog.is_none() {
                    let is_catalog = objstm.get_member(index).is_ok_and(|(_, member)| {
                        member.as_dict().and_then(PdfDictionary::get_type) == Some("Catalog")
                    });
                    if is_catalog {
                        self.catalog = Some(id);
                    }
                }
            }
        }
    }

    fn build_trailer(&mut self) -> ParseResult<PdfTrailer> {
        let size = self.max_number + 1;

        if let Some(mut trailer) = self.last_trailer_keyword() {
            self.stats.trailer_found = true;
            if trailer.size().map_or(true, |s| s < size) {
                tracing::warn!("Recovered trailer /Size patched to {}", size);
                trailer.set_size(size);
            }
            return Ok(trailer);
        }

        let stream_trailer = self
            .xref_streams
            .iter()
            .rev()
            .find(|(_, dict)| dict.get_reference("Root").is_some_and(|r| self.table.contains(r)));
        if let Some((position, dict)) = stream_trailer {
            let mut trailer = PdfTrailer::from_dict(dict.clone(), *position);
            if trailer.size().map_or(true, |s| s < size) {
                trailer.set_size(size);
            }
            return Ok(trailer);
        }

        let catalog = self.catalog.ok_or(ParseError::InvalidTrailer)?;
        tracing::warn!("Synthesizing trailer around catalog {}", catalog);
        let mut dict = PdfDictionary::new();
        dict.insert("Root".to_string(), PdfObject::Reference(catalog));
        dict.insert("Size".to_string(), PdfObject::Integer(i64::from(size)));
        Ok(PdfTrailer::from_dict(dict, 0))
    }

    /// Last `trailer` dictionary whose `/Root` names a recovered object
    fn last_trailer_keyword(&self) -> Option<PdfTrailer> {
        let mut end = self.data.len();
        while let Some(position) = rfind_bytes(&self.data[..end], b"trailer") {
            end = position;
            let trailer = ObjectParser::at(self.data, position)
                .with_options(self.options)
                .read_trailer();
            match trailer {
                Ok(dict) if dict.get_reference("Root").is_some_and(|r| self.table.contains(r)) => {
                    return Some(PdfTrailer::from_dict(dict, position as u64));
                }
                Ok(_) => tracing::debug!("Trailer at {} has no usable /Root", position),
                Err(e) => tracing::debug!("Unparsable trailer at {}: {}", position, e),
            }
        }
        None
    }
}

/// Given the offset of an `obj` keyword, the offset of the `N G` before it
fn header_start(data: &[u8], keyword: usize) -> Option<usize> {
    // `obj` must be a whole token
    if !data
        .get(keyword + 3)
        .map_or(true, |&b| is_whitespace(b) || is_delimiter(b))
    {
        return None;
    }

    let mut pos = keyword;
    let generation_end = skip_back_whitespace(data, pos, true)?;
    pos = skip_back_digits(data, generation_end)?;
    pos = skip_back_whitespace(data, pos, true)?;
    let start = skip_back_digits(data, pos)?;

    if start > 0 && !(is_whitespace(data[start - 1]) || is_delimiter(data[start - 1])) {
        return None;
    }
    Some(start)
}

/// Step back over whitespace ending at `end`; `required` demands at least one byte
fn skip_back_whitespace(data: &[u8], end: usize, required: bool) -> Option<usize> {
    let mut pos = end;
    while pos > 0 && is_whitespace(data[pos - 1]) {
        pos -= 1;
    }
    (!required || pos < end).then_some(pos)
}

/// Step back over at least one digit ending at `end`
fn skip_back_digits(data: &[u8], end: usize) -> Option<usize> {
    let mut pos = end;
    while pos > 0 && data[pos - 1].is_ascii_digit() {
        pos -= 1;
    }
    (pos < end).then_some(pos)
}
