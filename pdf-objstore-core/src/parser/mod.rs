//! PDF Object Store
//!
//! This module turns the bytes of a PDF file into a graph of lazily resolved,
//! identity-stable objects according to ISO 32000-1 Section 7.5 (File Structure).
//!
//! The pieces, leaf first:
//! - [`lexer`] and [`objects`] tokenize and parse primitive values
//! - [`xref`] and [`xref_stream`] decode classic tables and cross-reference streams
//! - [`xref_table`] is the registry of object slots indexed by object number
//! - [`object_stream`] unpacks compressed objects on demand
//! - [`store`] resolves and caches objects, thread-safely
//! - [`trailer`] and [`recovery`] bootstrap the table, falling back to a full scan
//! - [`page_tree`] presents the page tree as a flat, indexable sequence
//! - [`document`] ties it together for one open file

pub mod document;
pub mod filters;
pub mod header;
pub mod lexer;
pub mod object_stream;
pub mod objects;
pub mod page_tree;
pub mod recovery;
pub mod stack_safe;
pub mod store;
pub mod trailer;
pub mod xref;
pub mod xref_stream;
pub mod xref_table;
pub mod xref_types;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use self::document::PdfDocument;
pub use self::filters::{StandardDecoder, StreamDecoder};
pub use self::header::{PdfHeader, PdfVersion};
pub use self::object_stream::ObjectStream;
pub use self::objects::{ObjectId, PdfArray, PdfDictionary, PdfName, PdfObject, PdfStream, PdfString};
pub use self::page_tree::{PageNode, PageTreeView};
pub use self::store::{FromPdfObject, ObjectStore, PdfBytes, Reference, ResolveScope};
pub use self::trailer::{Bootstrap, PdfTrailer, TrailerChain, TrailerResolver};
pub use self::xref_table::{Location, ReferenceSlot, XRefStats, XRefTable};

/// Result type for parser operations
pub type ParseResult<T> = Result<T, ParseError>;

/// PDF Parser errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid PDF header")]
    InvalidHeader,

    #[error("Syntax error at position {position}: {message}")]
    SyntaxError { position: usize, message: String },

    #[error("Unexpected token: expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },

    #[error("Missing required key: {0}")]
    MissingKey(String),

    #[error("Invalid xref: {0}")]
    InvalidXRef(String),

    #[error("Invalid trailer")]
    InvalidTrailer,

    #[error("Wrong object at offset {offset}: expected {expected}, found {found}")]
    WrongObject {
        expected: ObjectId,
        found: ObjectId,
        offset: u64,
    },

    #[error("Circular reference detected: {0}")]
    CircularReference(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("Object {id} cannot be read as {expected}")]
    TypeMismatch { id: ObjectId, expected: &'static str },

    #[error("Stream decode error: {0}")]
    StreamDecodeError(String),

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Page index {index} out of range (document has {count} pages)")]
    PageOutOfRange { index: usize, count: usize },
}

impl ParseError {
    /// Whether this error describes broken file geometry (tables, streams,
    /// headers) rather than a problem with one particular object.
    ///
    /// Structural errors raised while bootstrapping escalate to a recovery scan.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ParseError::InvalidHeader
                | ParseError::SyntaxError { .. }
                | ParseError::UnexpectedToken { .. }
                | ParseError::MissingKey(_)
                | ParseError::InvalidXRef(_)
                | ParseError::InvalidTrailer
                | ParseError::StreamDecodeError(_)
                | ParseError::CircularReference(_)
                | ParseError::LimitExceeded(_)
        )
    }

    pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
        ParseError::SyntaxError {
            position,
            message: message.into(),
        }
    }
}

/// Highest object number a conforming file may use (ISO 32000-1 Annex C).
pub const MAX_OBJECT_NUMBER: u32 = 8_388_607;

/// Options controlling how forgiving the parser is.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOptions {
    /// Tolerate recoverable syntax damage
    pub lenient_syntax: bool,
    /// Fall back to scanning the whole file when the xref chain is unusable
    pub recover_xref: bool,
    /// Largest object number the table will grow to
    pub max_object_number: u32,
    /// Maximum nesting depth for values and for nested resolution
    pub max_depth: usize,
    /// Tail windows searched for `startxref`, smallest first
    pub startxref_windows: Vec<usize>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self::lenient()
    }
}

impl ParseOptions {
    /// Strict parsing: malformed structure is an error, no recovery scan
    pub fn strict() -> Self {
        Self {
            lenient_syntax: false,
            recover_xref: false,
            max_object_number: MAX_OBJECT_NUMBER,
            max_depth: stack_safe::MAX_RECURSION_DEPTH,
            startxref_windows: vec![50, 1024],
        }
    }

    /// Lenient parsing: best effort on damaged files
    pub fn lenient() -> Self {
        Self {
            lenient_syntax: true,
            recover_xref: true,
            max_object_number: MAX_OBJECT_NUMBER,
            max_depth: stack_safe::MAX_RECURSION_DEPTH,
            startxref_windows: vec![50, 1024, 16 * 1024, 256 * 1024],
        }
    }

    pub fn with_recovery(mut self, recover_xref: bool) -> Self {
        self.recover_xref = recover_xref;
        self
    }

    pub fn with_max_object_number(mut self, max: u32) -> Self {
        self.max_object_number = max;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}
