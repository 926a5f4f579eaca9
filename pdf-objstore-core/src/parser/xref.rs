//! PDF Cross-Reference Table Parser
//!
//! Parses classic xref tables according to ISO 32000-1 Section 7.5.4

use super::lexer::{Lexer, Token};
use super::objects::{ObjectId, ObjectParser};
use super::xref_types::{SectionKind, XRefSection, XRefSink};
use super::{ParseError, ParseOptions, ParseResult};

/// One `nnnnnnnnnn ggggg n` line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassicEntry {
    /// Byte offset for in-use entries, next free object for free ones
    pub offset: u64,
    pub generation: u16,
    pub in_use: bool,
}

/// Parser for the text form of a cross-reference section
pub struct ClassicTableParser<'a> {
    data: &'a [u8],
    options: &'a ParseOptions,
}

impl<'a> ClassicTableParser<'a> {
    pub fn new(data: &'a [u8], options: &'a ParseOptions) -> Self {
        Self { data, options }
    }

    /// Whether the bytes at `offset` open a classic section
    pub fn is_classic_at(data: &[u8], offset: usize) -> bool {
        data.get(offset..)
            .map(|rest| rest.starts_with(b"xref"))
            .unwrap_or(false)
    }

    /// Parse the section starting at `offset` (at the `xref` keyword),
    /// including its trailer dictionary
    pub fn parse_section(&self, offset: u64) -> ParseResult<XRefSection> {
        let start = usize::try_from(offset)
            .ok()
            .filter(|&o| o < self.data.len())
            .ok_or_else(|| {
                ParseError::InvalidXRef(format!("Section offset {offset} is past end of file"))
            })?;

        let mut lexer = Lexer::at(self.data, start);
        match lexer.next_token()? {
            Token::XRef => {}
            other => {
                return Err(ParseError::InvalidXRef(format!(
                    "Expected 'xref' at {offset}, found {other:?}"
                )))
            }
        }

        let mut entries = Vec::new();
        self.parse_subsections(&mut lexer, &mut entries)?;

        let trailer = ObjectParser::at(self.data, lexer.position())
            .with_options(self.options)
            .read_trailer()?;

        let mut section = XRefSection::new(SectionKind::Classic, offset, trailer);
        section.entries = entries;
        tracing::debug!(
            "Classic xref section at {} with {} entries",
            offset,
            section.entries.len()
        );
        Ok(section)
    }

    /// Parse subsections until the `trailer` keyword, reporting to `sink`
    pub fn parse_subsections(
        &self,
        lexer: &mut Lexer<'a>,
        sink: &mut dyn XRefSink,
    ) -> ParseResult<()> {
        loop {
            let header_pos = lexer.position();
            let first = match lexer.next_token()? {
                Token::Trailer => {
                    lexer.set_position(header_pos);
                    return Ok(());
                }
                Token::Integer(first) => first,
                Token::Eof => return Err(ParseError::InvalidTrailer),
                other => {
                    return Err(ParseError::InvalidXRef(format!(
                        "Bad subsection header at {header_pos}: {other:?}"
                    )))
                }
            };
            let count = match lexer.next_token()? {
                Token::Integer(count) => count,
                other => {
                    return Err(ParseError::InvalidXRef(format!(
                        "Bad subsection count at {header_pos}: {other:?}"
                    )))
                }
            };

            let (first, count) = self.check_subsection(first, count)?;

            for i in 0..count {
                let number = first + i;
                let entry_pos = lexer.position();
                let entry = match self.parse_entry(lexer) {
                    Ok(entry) => entry,
                    Err(e) if self.options.lenient_syntax => {
                        let failed_at = lexer.position();

                        // A short subsection runs into the trailer or off the end
                        lexer.set_position(entry_pos);
                        if matches!(lexer.next_token(), Ok(Token::Trailer | Token::Eof)) {
                            tracing::warn!(
                                "Subsection {} {} ends after {} entries",
                                first,
                                count,
                                i
                            );
                            lexer.set_position(entry_pos);
                            break;
                        }

                        tracing::warn!("Skipping damaged xref entry for object {}: {}", number, e);
                        lexer.set_position(failed_at);
                        skip_line(lexer);
                        if lexer.position() == entry_pos {
                            break;
                        }
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                // Object 0 heads the free list and is never a real object
                if number == 0 {
                    continue;
                }

                let id = ObjectId::new(number, entry.generation);
                if entry.in_use {
                    sink.register(id, entry.offset);
                } else {
                    sink.free(id);
                }
            }
        }
    }

    fn check_subsection(&self, first: i64, count: i64) -> ParseResult<(u32, u32)> {
        let max = i64::from(self.options.max_object_number);
        if first < 0 || count < 0 {
            return Err(ParseError::InvalidXRef(format!(
                "Negative subsection {first} {count}"
            )));
        }
        if first + count > max + 1 {
            return Err(ParseError::LimitExceeded(format!(
                "Subsection {first} {count} exceeds object number limit {max}"
            )));
        }
        // Both fit in u32 after the bound check
        Ok((first as u32, count as u32))
    }

    /// Parse one entry line: offset, generation, `n` or `f`
    fn parse_entry(&self, lexer: &mut Lexer<'a>) -> ParseResult<ClassicEntry> {
        let position = lexer.position();
        let offset = match lexer.next_token()? {
            Token::Integer(v) if v >= 0 => v as u64,
            other => return Err(bad_entry(position, &other)),
        };
        let generation = match lexer.next_token()? {
            Token::Integer(v) => u16::try_from(v).map_err(|_| {
                ParseError::InvalidXRef(format!("Generation {v} out of range at {position}"))
            })?,
            other => return Err(bad_entry(position, &other)),
        };
        let in_use = match lexer.next_token()? {
            Token::Keyword(flag) if flag == "n" => true,
            Token::Keyword(flag) if flag == "f" => false,
            other => return Err(bad_entry(position, &other)),
        };
        Ok(ClassicEntry {
            offset,
            generation,
            in_use,
        })
    }
}

fn bad_entry(position: usize, found: &Token) -> ParseError {
    ParseError::InvalidXRef(format!("Malformed xref entry at {position}: {found:?}"))
}

fn skip_line(lexer: &mut Lexer<'_>) {
    while let Some(b) = lexer.peek_byte() {
        lexer.set_position(lexer.position() + 1);
        if b == b'\n' || b == b'\r' {
            break;
        }
    }
}
