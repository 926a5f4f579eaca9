//! PDF Object Parser
//!
//! Parses PDF objects from tokens according to ISO 32000-1 Section 7.3

use super::filters::StreamDecoder;
use super::lexer::{Lexer, Token};
use super::{ParseError, ParseOptions, ParseResult};
use std::collections::HashMap;
use std::fmt;

/// Two-part identity of an indirect object: object number and generation.
///
/// Ordering is by number, then generation. Number 0 is reserved as the
/// null reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ObjectId {
    pub number: u32,
    pub generation: u16,
}

impl ObjectId {
    /// The reserved null reference
    pub const NULL: ObjectId = ObjectId {
        number: 0,
        generation: 0,
    };

    pub const fn new(number: u32, generation: u16) -> Self {
        Self { number, generation }
    }

    pub fn is_null(&self) -> bool {
        self.number == 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.number, self.generation)
    }
}

impl From<(u32, u16)> for ObjectId {
    fn from((number, generation): (u32, u16)) -> Self {
        Self::new(number, generation)
    }
}

/// PDF Name object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PdfName(pub String);

/// PDF String object
#[derive(Debug, Clone, PartialEq)]
pub struct PdfString(pub Vec<u8>);

/// PDF Array object
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PdfArray(pub Vec<PdfObject>);

/// PDF Dictionary object
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PdfDictionary(pub HashMap<PdfName, PdfObject>);

/// PDF Stream object
#[derive(Debug, Clone, PartialEq)]
pub struct PdfStream {
    pub dict: PdfDictionary,
    pub data: Vec<u8>,
}

impl PdfStream {
    /// Decode the stream data through its `/Filter` chain
    pub fn decode(&self, decoder: &dyn StreamDecoder) -> ParseResult<Vec<u8>> {
        let filters = self.filter_names()?;
        if filters.is_empty() {
            return Ok(self.data.clone());
        }
        let params = self.decode_params(filters.len());
        decoder.decode(&self.data, &filters, &params)
    }

    /// Get the raw (possibly compressed) stream data
    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }

    fn filter_names(&self) -> ParseResult<Vec<PdfName>> {
        match self.dict.get("Filter") {
            None | Some(PdfObject::Null) => Ok(Vec::new()),
            Some(PdfObject::Name(name)) => Ok(vec![name.clone()]),
            Some(PdfObject::Array(array)) => array
                .0
                .iter()
                .map(|obj| {
                    obj.as_name().cloned().ok_or_else(|| {
                        ParseError::StreamDecodeError("Invalid filter in array".to_string())
                    })
                })
                .collect(),
            Some(_) => Err(ParseError::StreamDecodeError(
                "Invalid Filter type".to_string(),
            )),
        }
    }

    fn decode_params(&self, count: usize) -> Vec<Option<PdfDictionary>> {
        let mut params = match self.dict.get("DecodeParms") {
            Some(PdfObject::Dictionary(dict)) => vec![Some(dict.clone())],
            Some(PdfObject::Array(array)) => array
                .0
                .iter()
                .map(|obj| match obj {
                    PdfObject::Dictionary(dict) => Some(dict.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        params.resize(count, None);
        params
    }
}

/// PDF Object types
#[derive(Debug, Clone, PartialEq)]
pub enum PdfObject {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    String(PdfString),
    Name(PdfName),
    Array(PdfArray),
    Dictionary(PdfDictionary),
    Stream(PdfStream),
    Reference(ObjectId),
}

impl PdfObject {
    /// Check if this object is null
    pub fn is_null(&self) -> bool {
        matches!(self, PdfObject::Null)
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PdfObject::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as integer
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PdfObject::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as real number
    pub fn as_real(&self) -> Option<f64> {
        match self {
            PdfObject::Real(r) => Some(*r),
            PdfObject::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Get as string
    pub fn as_string(&self) -> Option<&PdfString> {
        match self {
            PdfObject::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as name
    pub fn as_name(&self) -> Option<&PdfName> {
        match self {
            PdfObject::Name(n) => Some(n),
            _ => None,
        }
    }

    /// Get as array
    pub fn as_array(&self) -> Option<&PdfArray> {
        match self {
            PdfObject::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get as dictionary (a stream's dictionary counts)
    pub fn as_dict(&self) -> Option<&PdfDictionary> {
        match self {
            PdfObject::Dictionary(d) => Some(d),
            PdfObject::Stream(s) => Some(&s.dict),
            _ => None,
        }
    }

    /// Get as stream
    pub fn as_stream(&self) -> Option<&PdfStream> {
        match self {
            PdfObject::Stream(s) => Some(s),
            _ => None,
        }
    }

    /// Get as reference
    pub fn as_reference(&self) -> Option<ObjectId> {
        match self {
            PdfObject::Reference(id) => Some(*id),
            _ => None,
        }
    }

    /// Short type label used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            PdfObject::Null => "null",
            PdfObject::Boolean(_) => "boolean",
            PdfObject::Integer(_) => "integer",
            PdfObject::Real(_) => "real",
            PdfObject::String(_) => "string",
            PdfObject::Name(_) => "name",
            PdfObject::Array(_) => "array",
            PdfObject::Dictionary(_) => "dictionary",
            PdfObject::Stream(_) => "stream",
            PdfObject::Reference(_) => "reference",
        }
    }
}

impl PdfDictionary {
    /// Create a new empty dictionary
    pub fn new() -> Self {
        PdfDictionary(HashMap::new())
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Option<&PdfObject> {
        self.0.get(&PdfName(key.to_string()))
    }

    /// Insert a key-value pair
    pub fn insert(&mut self, key: String, value: PdfObject) {
        self.0.insert(PdfName(key), value);
    }

    /// Check if dictionary contains a key
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(&PdfName(key.to_string()))
    }

    /// Get the dictionary type (value of /Type key)
    pub fn get_type(&self) -> Option<&str> {
        self.get("Type")
            .and_then(|obj| obj.as_name())
            .map(|n| n.0.as_str())
    }

    pub fn get_integer(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(PdfObject::as_integer)
    }

    pub fn get_reference(&self, key: &str) -> Option<ObjectId> {
        self.get(key).and_then(PdfObject::as_reference)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keys in sorted order, for stable output
    pub fn sorted_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.0.keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        keys
    }
}

impl PdfArray {
    /// Create a new empty array
    pub fn new() -> Self {
        PdfArray(Vec::new())
    }

    /// Get array length
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if array is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get element at index
    pub fn get(&self, index: usize) -> Option<&PdfObject> {
        self.0.get(index)
    }

    /// Push an element
    pub fn push(&mut self, obj: PdfObject) {
        self.0.push(obj);
    }
}

impl PdfString {
    /// Create a new PDF string
    pub fn new(data: Vec<u8>) -> Self {
        PdfString(data)
    }

    /// Get as UTF-8 string if possible
    pub fn as_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.0)
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl PdfName {
    /// Create a new PDF name
    pub fn new(name: impl Into<String>) -> Self {
        PdfName(name.into())
    }

    /// Get the name as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One item read at the top level of a file: either a bare value or a
/// numbered object wrapper (`N G obj ... endobj`).
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedItem {
    Object(PdfObject),
    Indirect { id: ObjectId, object: PdfObject },
}

/// Resolves an indirect stream `/Length`. Returning `None` makes the parser
/// fall back to searching for `endstream`.
pub type LengthResolver<'r> = dyn Fn(ObjectId) -> Option<usize> + 'r;

/// Parses values, numbered objects and trailers from a byte slice
pub struct ObjectParser<'a, 'r> {
    lexer: Lexer<'a>,
    lenient: bool,
    max_depth: usize,
    length_resolver: Option<&'r LengthResolver<'r>>,
}

impl<'a, 'r> ObjectParser<'a, 'r> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::at(data, 0)
    }

    /// Create a parser whose cursor starts at `position`
    pub fn at(data: &'a [u8], position: usize) -> Self {
        let defaults = ParseOptions::default();
        Self {
            lexer: Lexer::at(data, position),
            lenient: defaults.lenient_syntax,
            max_depth: defaults.max_depth,
            length_resolver: None,
        }
    }

    pub fn with_options(mut self, options: &ParseOptions) -> Self {
        self.lenient = options.lenient_syntax;
        self.max_depth = options.max_depth;
        self
    }

    pub fn with_length_resolver(mut self, resolver: &'r LengthResolver<'r>) -> Self {
        self.length_resolver = Some(resolver);
        self
    }

    pub fn position(&self) -> usize {
        self.lexer.position()
    }

    pub fn set_position(&mut self, position: usize) {
        self.lexer.set_position(position);
    }

    /// Read one top-level item, recognizing the `N G obj` wrapper
    pub fn read_item(&mut self) -> ParseResult<ParsedItem> {
        let start = self.lexer.position();
        if let Some(id) = self.try_object_header()? {
            let object = self.read_object()?;
            self.expect_endobj(id)?;
            return Ok(ParsedItem::Indirect { id, object });
        }
        self.lexer.set_position(start);
        self.read_object().map(ParsedItem::Object)
    }

    /// Read a numbered object and fail unless one is found
    pub fn read_indirect(&mut self) -> ParseResult<(ObjectId, PdfObject)> {
        let position = self.lexer.position();
        match self.read_item()? {
            ParsedItem::Indirect { id, object } => Ok((id, object)),
            ParsedItem::Object(object) => Err(ParseError::UnexpectedToken {
                expected: "numbered object".to_string(),
                found: format!("{} at {position}", object.type_name()),
            }),
        }
    }

    /// Read one bare value
    pub fn read_object(&mut self) -> ParseResult<PdfObject> {
        let token = self.lexer.next_token()?;
        self.parse_value(token, 0)
    }

    /// Read the dictionary that follows a `trailer` keyword
    pub fn read_trailer(&mut self) -> ParseResult<PdfDictionary> {
        match self.lexer.next_token()? {
            Token::Trailer => {}
            other => {
                return Err(ParseError::UnexpectedToken {
                    expected: "trailer".to_string(),
                    found: format!("{other:?}"),
                })
            }
        }
        match self.lexer.next_token()? {
            Token::DictStart => self.parse_dictionary(1),
            _ => Err(ParseError::InvalidTrailer),
        }
    }

    /// Consume `N G obj` if present; the cursor is unspecified on `None`
    fn try_object_header(&mut self) -> ParseResult<Option<ObjectId>> {
        let number = match self.lexer.next_token()? {
            Token::Integer(n) => n,
            _ => return Ok(None),
        };
        let generation = match self.lexer.next_token() {
            Ok(Token::Integer(g)) => g,
            _ => return Ok(None),
        };
        match self.lexer.next_token() {
            Ok(Token::Obj) => {}
            _ => return Ok(None),
        }
        match to_object_id(number, generation) {
            Some(id) => Ok(Some(id)),
            None => Err(ParseError::syntax(
                self.lexer.position(),
                format!("Invalid object header {number} {generation} obj"),
            )),
        }
    }

    fn expect_endobj(&mut self, id: ObjectId) -> ParseResult<()> {
        let before = self.lexer.position();
        match self.lexer.next_token() {
            Ok(Token::EndObj) => Ok(()),
            _ if self.lenient => {
                tracing::debug!("Object {} is missing endobj", id);
                self.lexer.set_position(before);
                Ok(())
            }
            Ok(token) => Err(ParseError::UnexpectedToken {
                expected: "endobj".to_string(),
                found: format!("{token:?}"),
            }),
            Err(e) => Err(e),
        }
    }

    fn parse_value(&mut self, token: Token, depth: usize) -> ParseResult<PdfObject> {
        if depth > self.max_depth {
            return Err(ParseError::LimitExceeded(format!(
                "Nesting deeper than {} levels",
                self.max_depth
            )));
        }
        match token {
            Token::Null => Ok(PdfObject::Null),
            Token::Boolean(b) => Ok(PdfObject::Boolean(b)),
            Token::Integer(i) => Ok(self.integer_or_reference(i)),
            Token::Real(r) => Ok(PdfObject::Real(r)),
            Token::String(s) => Ok(PdfObject::String(PdfString(s))),
            Token::Name(n) => Ok(PdfObject::Name(PdfName(n))),
            Token::ArrayStart => self.parse_array(depth + 1),
            Token::DictStart => self.parse_dictionary_or_stream(depth + 1),
            Token::Eof => Err(ParseError::syntax(
                self.lexer.position(),
                "Unexpected end of file",
            )),
            other => Err(ParseError::UnexpectedToken {
                expected: "PDF object".to_string(),
                found: format!("{other:?}"),
            }),
        }
    }

    /// Fold `N G R` into a reference, otherwise keep the integer
    fn integer_or_reference(&mut self, number: i64) -> PdfObject {
        let saved = self.lexer.position();
        if let Ok(Token::Integer(generation)) = self.lexer.next_token() {
            if let Ok(Token::R) = self.lexer.next_token() {
                if let Some(id) = to_object_id(number, generation) {
                    return PdfObject::Reference(id);
                }
            }
        }
        self.lexer.set_position(saved);
        PdfObject::Integer(number)
    }

    fn parse_array(&mut self, depth: usize) -> ParseResult<PdfObject> {
        let mut elements = Vec::new();
        loop {
            match self.lexer.next_token()? {
                Token::ArrayEnd => break,
                Token::Eof => {
                    return Err(ParseError::syntax(
                        self.lexer.position(),
                        "Unterminated array",
                    ))
                }
                token => elements.push(self.parse_value(token, depth)?),
            }
        }
        Ok(PdfObject::Array(PdfArray(elements)))
    }

    fn parse_dictionary(&mut self, depth: usize) -> ParseResult<PdfDictionary> {
        let mut dict = HashMap::new();
        loop {
            match self.lexer.next_token()? {
                Token::DictEnd => break,
                Token::Name(key) => {
                    let token = self.lexer.next_token()?;
                    let value = self.parse_value(token, depth)?;
                    dict.insert(PdfName(key), value);
                }
                token => {
                    return Err(ParseError::UnexpectedToken {
                        expected: "dictionary key (name) or >>".to_string(),
                        found: format!("{token:?}"),
                    })
                }
            }
        }
        Ok(PdfDictionary(dict))
    }

    /// Parse a dictionary and check if it's followed by a stream
    fn parse_dictionary_or_stream(&mut self, depth: usize) -> ParseResult<PdfObject> {
        let dict = self.parse_dictionary(depth)?;
        let saved = self.lexer.position();
        match self.lexer.next_token() {
            Ok(Token::Stream) => {
                let data = self.parse_stream_data(&dict)?;
                Ok(PdfObject::Stream(PdfStream { dict, data }))
            }
            _ => {
                self.lexer.set_position(saved);
                Ok(PdfObject::Dictionary(dict))
            }
        }
    }

    fn parse_stream_data(&mut self, dict: &PdfDictionary) -> ParseResult<Vec<u8>> {
        self.lexer.skip_stream_eol();
        let start = self.lexer.position();

        let declared = match dict.get("Length") {
            Some(PdfObject::Integer(len)) => usize::try_from(*len).ok(),
            Some(PdfObject::Reference(id)) => self.length_resolver.and_then(|resolve| resolve(*id)),
            _ => None,
        };

        if let Some(length) = declared {
            if let Some(data) = self.lexer.take_bytes(length) {
                if self.lexer.lookahead_is(b"endstream") {
                    self.lexer.next_token()?;
                    return Ok(data.to_vec());
                }
            }
            tracing::debug!(
                "Stream at {} has wrong /Length {}, searching for endstream",
                start,
                length
            );
            self.lexer.set_position(start);
        }

        let end = self.lexer.find(b"endstream").ok_or_else(|| {
            ParseError::syntax(start, "Stream without endstream")
        })?;
        let data = self.lexer.data();
        let mut data_end = end;
        if data_end > start && data[data_end - 1] == b'\n' {
            data_end -= 1;
        }
        if data_end > start && data[data_end - 1] == b'\r' {
            data_end -= 1;
        }
        let bytes = data[start..data_end].to_vec();
        self.lexer.set_position(end + b"endstream".len());
        Ok(bytes)
    }
}

fn to_object_id(number: i64, generation: i64) -> Option<ObjectId> {
    let number = u32::try_from(number).ok()?;
    let generation = u16::try_from(generation).ok()?;
    Some(ObjectId::new(number, generation))
}
