//! # pdf-objstore
//!
//! Indirect-object storage and cross-reference resolution for PDF files.
//!
//! ## Features
//!
//! - **Lazy resolution**: objects are parsed the first time they are asked for
//! - **Stable identity**: every resolution of an object yields the same `Arc`
//! - **Full xref support**: classic tables, cross-reference streams, hybrid files
//!   and incremental updates chained through `/Prev`
//! - **Object streams**: compressed objects, including `/Extends` chains
//! - **Recovery**: a damaged or missing table is rebuilt by scanning the file
//! - **Page tree**: flattened, indexable view over the `/Pages` hierarchy
//! - **Thread-safe**: a document can be shared and resolved from many threads
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_objstore::{ObjectId, PdfDocument};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let document = PdfDocument::open("document.pdf")?;
//! println!("{} pages", document.page_count()?);
//!
//! let first = document.page(0)?;
//! let page = document.resolve(first)?;
//! assert!(std::sync::Arc::ptr_eq(&page, &document.resolve(first)?));
//!
//! let stats = document.store().stats();
//! println!("{} of {} objects parsed", stats.cached, stats.slots);
//! # let _ = ObjectId::new(1, 0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Damaged files
//!
//! [`ParseOptions::lenient`] (the default) tolerates recoverable damage and
//! falls back to a full scan when the cross-reference chain is unusable.
//! [`ParseOptions::strict`] reports the first structural problem instead.

pub mod parser;

// Re-export the session and store types
pub use parser::{
    FromPdfObject, ObjectId, ObjectStore, PageTreeView, ParseError, ParseOptions, ParseResult,
    PdfArray, PdfDictionary, PdfDocument, PdfName, PdfObject, PdfStream, PdfString, PdfTrailer,
    Reference, XRefTable,
};

/// Current version of pdf-objstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
