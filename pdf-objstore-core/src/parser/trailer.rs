//! PDF Trailer Parser
//!
//! Parses PDF trailer according to ISO 32000-1 Section 7.5.5, and walks the
//! chain of cross-reference sections a file accumulates through incremental
//! updates (Section 7.5.6) and hybrid-reference files (Section 7.5.8.4).
//!
//! The resolver works in four steps:
//!
//! 1. find the `startxref` offset in a progressively wider tail window
//! 2. classify the section at that offset (classic table or stream)
//! 3. follow `/Prev` and `/XRefStm` back to the oldest section
//! 4. fold every section into a fresh [`XRefTable`], newest first
//!
//! When any of this fails with a structural error and recovery is enabled,
//! the whole file is rescanned instead (see [`super::recovery`]).

use super::filters::StreamDecoder;
use super::lexer::{is_delimiter, is_whitespace, rfind_bytes, Lexer, Token};
use super::objects::{ObjectId, ObjectParser, PdfDictionary, PdfObject};
use super::recovery;
use super::stack_safe::VisitedSet;
use super::xref::ClassicTableParser;
use super::xref_stream::XRefStreamParser;
use super::xref_table::XRefTable;
use super::xref_types::{SectionKind, XRefSection};
use super::{ParseError, ParseOptions, ParseResult};

/// PDF Trailer information
#[derive(Debug, Clone, PartialEq)]
pub struct PdfTrailer {
    /// The trailer dictionary
    pub dict: PdfDictionary,
    /// Byte offset of the xref section this trailer belongs to
    pub xref_offset: u64,
}

impl PdfTrailer {
    /// Parse trailer from a dictionary
    pub fn from_dict(dict: PdfDictionary, xref_offset: u64) -> Self {
        PdfTrailer { dict, xref_offset }
    }

    /// Get the size (highest object number + 1)
    pub fn size(&self) -> ParseResult<u32> {
        self.dict
            .get_integer("Size")
            .and_then(|i| u32::try_from(i).ok())
            .ok_or_else(|| ParseError::MissingKey("Size".to_string()))
    }

    /// Get the root object reference (document catalog)
    pub fn root(&self) -> ParseResult<ObjectId> {
        self.dict
            .get_reference("Root")
            .ok_or_else(|| ParseError::MissingKey("Root".to_string()))
    }

    /// Get the info object reference (document information dictionary)
    pub fn info(&self) -> Option<ObjectId> {
        self.dict.get_reference("Info")
    }

    /// Get the ID array (file identifiers)
    pub fn id(&self) -> Option<&PdfObject> {
        self.dict.get("ID")
    }

    /// Check if this PDF is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.dict.contains_key("Encrypt")
    }

    /// Get the encryption dictionary reference
    pub fn encrypt(&self) -> Option<ObjectId> {
        self.dict.get_reference("Encrypt")
    }

    /// Byte offset of previous xref section (if any)
    pub fn prev(&self) -> Option<u64> {
        self.dict
            .get_integer("Prev")
            .and_then(|p| u64::try_from(p).ok())
    }

    /// Byte offset of the companion cross-reference stream of a hybrid file
    pub fn xref_stm(&self) -> Option<u64> {
        self.dict
            .get_integer("XRefStm")
            .and_then(|p| u64::try_from(p).ok())
    }

    /// Validate the trailer dictionary
    pub fn validate(&self) -> ParseResult<()> {
        self.size()?;
        self.root()?;
        Ok(())
    }

    /// Get access to the trailer dictionary
    pub fn dict(&self) -> &PdfDictionary {
        &self.dict
    }

    pub(crate) fn set_size(&mut self, size: u32) {
        self.dict
            .insert("Size".to_string(), PdfObject::Integer(i64::from(size)));
    }
}

/// Represents the complete trailer chain for PDFs with updates
#[derive(Debug, Clone)]
pub struct TrailerChain {
    /// List of trailers from newest to oldest
    trailers: Vec<PdfTrailer>,
}

impl TrailerChain {
    /// Create a new trailer chain with a single trailer
    pub fn new(trailer: PdfTrailer) -> Self {
        Self {
            trailers: vec![trailer],
        }
    }

    /// Add an older trailer to the chain
    pub fn add_previous(&mut self, trailer: PdfTrailer) {
        self.trailers.push(trailer);
    }

    /// Get the most recent trailer
    pub fn current(&self) -> &PdfTrailer {
        &self.trailers[0]
    }

    pub(crate) fn current_mut(&mut self) -> &mut PdfTrailer {
        &mut self.trailers[0]
    }

    /// Get all trailers in the chain
    pub fn all(&self) -> &[PdfTrailer] {
        &self.trailers
    }

    pub fn iter(&self) -> impl Iterator<Item = &PdfTrailer> {
        self.trailers.iter()
    }

    pub fn len(&self) -> usize {
        self.trailers.len()
    }

    /// Never true; a chain holds at least one trailer
    pub fn is_empty(&self) -> bool {
        self.trailers.is_empty()
    }

    /// Check if there are previous versions
    pub fn has_previous(&self) -> bool {
        self.trailers.len() > 1
    }

    /// Catalog of the newest trailer that names one
    pub fn root(&self) -> Option<ObjectId> {
        self.trailers.iter().find_map(|t| t.root().ok())
    }
}

/// Result of bootstrapping a document's object table
#[derive(Debug)]
pub struct Bootstrap {
    pub table: XRefTable,
    pub chain: TrailerChain,
    /// The table was rebuilt by scanning the file
    pub recovered: bool,
    /// Cross-reference sections folded into the table
    pub sections: usize,
}

/// Sections of one chain walk, newest first
#[derive(Debug, Default)]
pub struct ChainWalk {
    /// In fold order. A hybrid companion stream sits between the in-use
    /// and the free entries of its classic section.
    pub sections: Vec<XRefSection>,
    /// One per classic section or primary stream, newest first
    pub trailers: Vec<PdfTrailer>,
    /// Hybrid companion streams read
    pub companions: usize,
}

/// Finds the cross-reference sections of a file and builds its table
pub struct TrailerResolver<'a> {
    data: &'a [u8],
    options: &'a ParseOptions,
    decoder: &'a dyn StreamDecoder,
}

impl<'a> TrailerResolver<'a> {
    pub fn new(data: &'a [u8], options: &'a ParseOptions, decoder: &'a dyn StreamDecoder) -> Self {
        Self {
            data,
            options,
            decoder,
        }
    }

    /// Build the object table, falling back to a recovery scan when the
    /// cross-reference chain is structurally broken
    pub fn resolve(&self) -> ParseResult<Bootstrap> {
        match self.resolve_chain() {
            Ok(bootstrap) => Ok(bootstrap),
            Err(e) if self.options.recover_xref && e.is_structural() => {
                tracing::warn!("Cross-reference chain unusable ({}), scanning file", e);
                recovery::scan(self.data, self.options, self.decoder)
            }
            Err(e) => Err(e),
        }
    }

    /// Build the object table from the cross-reference chain only
    pub fn resolve_chain(&self) -> ParseResult<Bootstrap> {
        let start = self.find_startxref()?;
        let walk = self.walk_chain(start)?;
        let section_count = walk.trailers.len() + walk.companions;

        let mut trailers = walk.trailers.into_iter();
        let newest = trailers.next().ok_or(ParseError::InvalidTrailer)?;
        let mut chain = TrailerChain::new(newest);
        for trailer in trailers {
            chain.add_previous(trailer);
        }

        let root = chain
            .root()
            .ok_or_else(|| ParseError::MissingKey("Root".to_string()))?;

        let table = XRefTable::new(self.options.max_object_number);
        let max = fold(&walk.sections, &table);

        if !table.contains(root) {
            return Err(ParseError::InvalidXRef(format!(
                "Catalog {root} is not in the cross-reference table"
            )));
        }
        self.check_size(&mut chain, max)?;

        Ok(Bootstrap {
            table,
            chain,
            recovered: false,
            sections: section_count,
        })
    }

    /// Offset named by the last `startxref` keyword
    pub fn find_startxref(&self) -> ParseResult<u64> {
        for &window in &self.options.startxref_windows {
            let start = self.data.len().saturating_sub(window);
            let Some(found) = rfind_bytes(&self.data[start..], b"startxref") else {
                tracing::debug!("No startxref in the last {} bytes", window);
                continue;
            };
            let mut lexer = Lexer::at(self.data, start + found + b"startxref".len());
            return match lexer.next_token()? {
                Token::Integer(offset) if offset >= 0 => Ok(offset as u64),
                other => Err(ParseError::InvalidXRef(format!(
                    "startxref is followed by {other:?}"
                ))),
            };
        }
        Err(ParseError::InvalidXRef("startxref not found".to_string()))
    }

    /// Follow `/Prev` from `start`, collecting every section
    pub fn walk_chain(&self, start: u64) -> ParseResult<ChainWalk> {
        let mut visited = VisitedSet::new("Cross-reference chain");
        let mut walk = ChainWalk::default();
        let mut next = Some(start);

        while let Some(offset) = next {
            visited.visit(offset)?;
            let bootstrap = walk.trailers.is_empty();
            let mut section = match self.read_section(offset, bootstrap) {
                Ok(section) => section,
                Err(e) if !bootstrap && self.options.lenient_syntax => {
                    tracing::warn!("Dropping older section at {}: {}", offset, e);
                    break;
                }
                Err(e) => return Err(e),
            };

            let mut companion = None;
            if section.kind == SectionKind::Classic {
                if let Some(stm) = section.xref_stm() {
                    match self.read_companion(&mut visited, stm) {
                        Ok(stream) => companion = Some(stream),
                        Err(e) if self.options.lenient_syntax => {
                            tracing::warn!("Ignoring XRefStm at {}: {}", stm, e);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }

            next = section.prev();
            walk.trailers
                .push(PdfTrailer::from_dict(section.trailer.clone(), section.offset));
            match companion {
                // Classic `n` entries beat the stream; the stream's entries
                // beat the classic `f` placeholders
                Some(stream) => {
                    let free = section.split_free();
                    walk.sections.push(section);
                    walk.sections.push(stream);
                    walk.sections.push(free);
                    walk.companions += 1;
                }
                None => walk.sections.push(section),
            }
        }

        tracing::debug!(
            "Cross-reference chain has {} sections and {} trailers",
            walk.sections.len(),
            walk.trailers.len()
        );
        Ok(walk)
    }

    fn read_companion(&self, visited: &mut VisitedSet<u64>, offset: u64) -> ParseResult<XRefSection> {
        visited.visit(offset)?;
        let section = self.read_section(offset, false)?;
        if section.kind != SectionKind::Stream {
            return Err(ParseError::InvalidXRef(format!(
                "XRefStm {offset} does not point at a cross-reference stream"
            )));
        }
        Ok(section)
    }

    /// Parse the section at `offset`, trying the repair strategies in turn.
    /// The last-`xref`-keyword strategy only applies to the bootstrap section.
    pub fn read_section(&self, offset: u64, bootstrap: bool) -> ParseResult<XRefSection> {
        let exact = usize::try_from(offset)
            .ok()
            .filter(|&o| o < self.data.len())
            .ok_or_else(|| {
                ParseError::InvalidXRef(format!("Section offset {offset} is past end of file"))
            });

        let first_error = match exact.and_then(|o| self.parse_section_at(o)) {
            Ok(section) => return Ok(section),
            Err(e) => e,
        };
        if !self.options.lenient_syntax {
            return Err(first_error);
        }
        tracing::warn!("No section at {}: {}", offset, first_error);

        if let Ok(position) = usize::try_from(offset) {
            let mut lexer = Lexer::at(self.data, position);
            if lexer.skip_whitespace() > 0 {
                match self.parse_section_at(lexer.position()) {
                    Ok(section) => return Ok(section),
                    Err(e) => tracing::debug!("Whitespace-skipping strategy failed: {}", e),
                }
            }
        }

        if bootstrap {
            if let Some(position) = last_xref_keyword(self.data) {
                if position as u64 != offset {
                    tracing::warn!("Using last xref keyword at {} instead of {}", position, offset);
                    match self.parse_section_at(position) {
                        Ok(section) => return Ok(section),
                        Err(e) => tracing::debug!("Last-xref strategy failed: {}", e),
                    }
                }
            }
        }

        Err(first_error)
    }

    fn parse_section_at(&self, position: usize) -> ParseResult<XRefSection> {
        if ClassicTableParser::is_classic_at(self.data, position) {
            return ClassicTableParser::new(self.data, self.options).parse_section(position as u64);
        }

        let (id, object) = ObjectParser::at(self.data, position)
            .with_options(self.options)
            .read_indirect()?;
        let stream = object.as_stream().ok_or_else(|| {
            ParseError::InvalidXRef(format!(
                "{id} at {position} is a {}, not a cross-reference stream",
                object.type_name()
            ))
        })?;
        XRefStreamParser::new(self.decoder, self.options).parse_stream(position as u64, stream)
    }

    fn check_size(&self, chain: &mut TrailerChain, max: Option<u32>) -> ParseResult<()> {
        let Some(max) = max else {
            return Ok(());
        };
        let needed = max + 1;
        match chain.current().size() {
            Ok(size) if size >= needed => Ok(()),
            _ if self.options.lenient_syntax => {
                tracing::warn!("Trailer /Size patched to {}", needed);
                chain.current_mut().set_size(needed);
                Ok(())
            }
            Ok(size) => Err(ParseError::InvalidXRef(format!(
                "Trailer /Size {size} is smaller than object number {max} + 1"
            ))),
            Err(e) => Err(e),
        }
    }
}

/// Fold `sections` into `table` in order; the first registration of a
/// number wins. Returns the highest object number the sections mention.
pub fn fold(sections: &[XRefSection], table: &XRefTable) -> Option<u32> {
    let max = sections.iter().filter_map(XRefSection::max_object_number).max();
    // Sized from the entries rather than /Size, which may be hostile
    table.ensure_capacity(max.map_or(0, |m| m as usize + 1));

    let mut sink = table;
    let applied: usize = sections.iter().map(|s| s.replay(&mut sink)).sum();
    tracing::debug!(
        "Folded {} sections, {} registrations took effect",
        sections.len(),
        applied
    );
    max
}

/// Start of the last `xref` keyword that is not part of `startxref`
fn last_xref_keyword(data: &[u8]) -> Option<usize> {
    let mut end = data.len();
    while let Some(position) = rfind_bytes(&data[..end], b"xref") {
        let boundary_before = position == 0 || is_whitespace(data[position - 1]);
        let boundary_after = data
            .get(position + 4)
            .map_or(true, |&b| is_whitespace(b) || is_delimiter(b));
        if boundary_before && boundary_after {
            return Some(position);
        }
        end = position;
    }
    None
}
