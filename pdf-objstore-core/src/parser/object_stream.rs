//! PDF Object Stream Parser
//!
//! Handles compressed objects stored in object streams (PDF 1.5+),
//! ISO 32000-1 Section 7.5.7.
//!
//! A container is decoded once, when its offset table is built. Members are
//! parsed on demand, each from its own slice of the decoded body, so reads of
//! different members never share a cursor.

use super::filters::StreamDecoder;
use super::lexer::{Lexer, Token};
use super::objects::{ObjectId, ObjectParser, PdfObject, PdfStream};
use super::stack_safe::VisitedSet;
use super::store::{FromPdfObject, ResolveScope};
use super::{ParseError, ParseOptions, ParseResult};

/// A decoded object stream
#[derive(Debug)]
pub struct ObjectStream {
    id: ObjectId,
    /// Byte offset of the first member within `data`
    first: usize,
    /// `(object number, offset relative to first)`, in header order
    offsets: Vec<(u32, usize)>,
    /// Decoded stream body
    data: Vec<u8>,
    extends: Option<ObjectId>,
    options: ParseOptions,
}

impl ObjectStream {
    /// Decode `stream` and read its header into the offset table
    pub fn build_offset_table(
        id: ObjectId,
        stream: &PdfStream,
        decoder: &dyn StreamDecoder,
        options: &ParseOptions,
    ) -> ParseResult<Self> {
        let dict = &stream.dict;
        if let Some(kind) = dict.get_type() {
            if kind != "ObjStm" && !options.lenient_syntax {
                return Err(ParseError::InvalidXRef(format!(
                    "{id} has /Type /{kind}, expected /ObjStm"
                )));
            }
        }

        let n = non_negative(dict.get_integer("N"), "N")?;
        let first = non_negative(dict.get_integer("First"), "First")?;

        let extends = dict.get_reference("Extends");
        if extends == Some(id) {
            return Err(ParseError::CircularReference(format!(
                "Object stream {id} extends itself"
            )));
        }

        let data = stream.decode(decoder)?;
        if first > data.len() {
            return Err(ParseError::InvalidXRef(format!(
                "Object stream {id} has /First {first} beyond its {} bytes",
                data.len()
            )));
        }

        let offsets = Self::read_header(id, &data[..first], n, first, data.len(), options)?;
        tracing::trace!("Object stream {} holds {} members", id, offsets.len());

        Ok(Self {
            id,
            first,
            offsets,
            data,
            extends,
            options: options.clone(),
        })
    }

    fn read_header(
        id: ObjectId,
        header: &[u8],
        n: usize,
        first: usize,
        total: usize,
        options: &ParseOptions,
    ) -> ParseResult<Vec<(u32, usize)>> {
        let mut lexer = Lexer::new(header);
        // Every pair needs at least four bytes ("1 0 "), which bounds N
        let mut offsets = Vec::with_capacity(n.min(header.len() / 4 + 1));

        for i in 0..n {
            let pair = match (lexer.next_token(), lexer.next_token()) {
                (Ok(Token::Integer(number)), Ok(Token::Integer(offset))) => {
                    let number = u32::try_from(number).ok();
                    let offset = usize::try_from(offset)
                        .ok()
                        .filter(|&o| first + o <= total);
                    number.zip(offset)
                }
                _ => None,
            };
            match pair {
                Some(pair) => offsets.push(pair),
                None if options.lenient_syntax => {
                    tracing::warn!(
                        "Object stream {} header ends after {} of {} members",
                        id,
                        i,
                        n
                    );
                    break;
                }
                None => {
                    return Err(ParseError::InvalidXRef(format!(
                        "Object stream {id} header entry {i} is malformed"
                    )))
                }
            }
        }

        Ok(offsets)
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Members declared by this container alone
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// The container this one extends, if any
    pub fn extends(&self) -> Option<ObjectId> {
        self.extends
    }

    /// Object numbers in header order
    pub fn object_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.offsets.iter().map(|&(number, _)| number)
    }

    /// Parse member `index`; members are bare values, identified as
    /// `(object number, 0)`
    pub fn get_member(&self, index: usize) -> ParseResult<(ObjectId, PdfObject)> {
        let &(number, relative) = self.offsets.get(index).ok_or_else(|| {
            ParseError::InvalidXRef(format!(
                "Index {index} out of range for object stream {} with {} members",
                self.id,
                self.offsets.len()
            ))
        })?;

        let start = self.first + relative;
        // A member ends where the next one (by offset) begins
        let end = self
            .offsets
            .iter()
            .map(|&(_, o)| self.first + o)
            .filter(|&o| o > start)
            .min()
            .unwrap_or(self.data.len());

        let object = ObjectParser::new(&self.data[start..end])
            .with_options(&self.options)
            .read_object()?;
        Ok((ObjectId::new(number, 0), object))
    }

    /// Members of this container plus every container it extends
    pub fn total_count(&self, scope: &ResolveScope<'_>) -> ParseResult<usize> {
        let mut visited = VisitedSet::new("Object stream Extends chain");
        visited.visit(self.id)?;
        let mut total = self.len();
        let mut next = self.extends;
        while let Some(id) = next {
            visited.visit(id)?;
            let parent = scope.coerce::<ObjectStream>(id)?;
            total += parent.len();
            next = parent.extends;
        }
        Ok(total)
    }

    /// Look up `index` here, or past the local range in the Extends chain
    pub fn find_member(
        &self,
        scope: &ResolveScope<'_>,
        index: usize,
    ) -> ParseResult<(ObjectId, PdfObject)> {
        if index < self.len() {
            return self.get_member(index);
        }
        let mut visited = VisitedSet::new("Object stream Extends chain");
        visited.visit(self.id)?;
        let mut remaining = index - self.len();
        let mut next = self.extends;
        while let Some(id) = next {
            visited.visit(id)?;
            let parent = scope.coerce::<ObjectStream>(id)?;
            if remaining < parent.len() {
                return parent.get_member(remaining);
            }
            remaining -= parent.len();
            next = parent.extends;
        }
        // Reports the local range
        self.get_member(index)
    }
}

impl FromPdfObject for ObjectStream {
    const TYPE_NAME: &'static str = "object stream";

    fn from_pdf_object(
        scope: &ResolveScope<'_>,
        id: ObjectId,
        object: &PdfObject,
    ) -> ParseResult<Self> {
        let stream = object.as_stream().ok_or(ParseError::TypeMismatch {
            id,
            expected: Self::TYPE_NAME,
        })?;
        Self::build_offset_table(id, stream, scope.decoder(), scope.options())
    }
}

fn non_negative(value: Option<i64>, key: &str) -> ParseResult<usize> {
    let value = value.ok_or_else(|| ParseError::MissingKey(key.to_string()))?;
    usize::try_from(value)
        .map_err(|_| ParseError::InvalidXRef(format!("Object stream /{key} is negative: {value}")))
}
