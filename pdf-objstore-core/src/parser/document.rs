//! PDF Document session
//!
//! [`PdfDocument`] ties the pieces together: it reads the header, bootstraps
//! the object table through the [`TrailerResolver`], and hands out the
//! [`ObjectStore`] and the [`PageTreeView`] built on top of it.
//!
//! The document is `Send + Sync`; share it across reader threads with an
//! `Arc` and resolve objects concurrently.
//!
//! # Example
//!
//! ```rust,no_run
//! use pdf_objstore::parser::{ObjectId, PdfDocument};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let document = PdfDocument::open("document.pdf")?;
//!
//! println!("Version: {:?}", document.version());
//! println!("Pages: {}", document.page_count()?);
//!
//! let info = document.store().resolve(ObjectId::new(1, 0))?;
//! println!("Object 1 is a {}", info.type_name());
//! # Ok(())
//! # }
//! ```

use super::filters::StandardDecoder;
use super::header::{PdfHeader, PdfVersion};
use super::objects::{ObjectId, PdfObject};
use super::page_tree::PageTreeView;
use super::store::{ObjectStore, PdfBytes};
use super::trailer::{PdfTrailer, TrailerChain, TrailerResolver};
use super::{ParseError, ParseOptions, ParseResult};
use memmap2::Mmap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// An opened PDF file
#[derive(Debug)]
pub struct PdfDocument {
    store: Arc<ObjectStore>,
    header: Option<PdfHeader>,
    trailers: TrailerChain,
    recovered: bool,
    page_tree: OnceLock<PageTreeView>,
}

impl PdfDocument {
    /// Memory-map and open the file at `path` with default options
    pub fn open<P: AsRef<Path>>(path: P) -> ParseResult<Self> {
        Self::open_with_options(path, ParseOptions::default())
    }

    pub fn open_with_options<P: AsRef<Path>>(path: P, options: ParseOptions) -> ParseResult<Self> {
        let file = File::open(path.as_ref())?;
        // SAFETY: the map is read-only; the file must not be truncated while
        // the document is alive.
        let map = unsafe { Mmap::map(&file) }?;
        tracing::debug!("Mapped {} ({} bytes)", path.as_ref().display(), map.len());
        Self::from_pdf_bytes(PdfBytes::Mapped(map), options)
    }

    /// Open a document held in memory
    pub fn from_bytes(data: Vec<u8>) -> ParseResult<Self> {
        Self::from_bytes_with_options(data, ParseOptions::default())
    }

    pub fn from_bytes_with_options(data: Vec<u8>, options: ParseOptions) -> ParseResult<Self> {
        Self::from_pdf_bytes(PdfBytes::Owned(data), options)
    }

    /// Read `reader` to the end and open the result
    pub fn from_reader<R: Read>(reader: R) -> ParseResult<Self> {
        Self::from_reader_with_options(reader, ParseOptions::default())
    }

    pub fn from_reader_with_options<R: Read>(mut reader: R, options: ParseOptions) -> ParseResult<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes_with_options(data, options)
    }

    fn from_pdf_bytes(data: PdfBytes, options: ParseOptions) -> ParseResult<Self> {
        let header = match PdfHeader::parse(&data) {
            Ok(header) => Some(header),
            Err(e) if options.lenient_syntax => {
                tracing::warn!("Ignoring bad header: {}", e);
                None
            }
            Err(e) => return Err(e),
        };

        let decoder = StandardDecoder;
        let bootstrap = TrailerResolver::new(&data, &options, &decoder).resolve()?;
        if bootstrap.recovered {
            tracing::warn!("Document opened from a recovery scan");
        }

        let store = ObjectStore::new(data, bootstrap.table, options);
        Ok(Self {
            store: Arc::new(store),
            header,
            trailers: bootstrap.chain,
            recovered: bootstrap.recovered,
            page_tree: OnceLock::new(),
        })
    }

    /// Version from the `%PDF-` header, if it could be read
    pub fn version(&self) -> Option<PdfVersion> {
        self.header.as_ref().map(|h| h.version)
    }

    pub fn header(&self) -> Option<&PdfHeader> {
        self.header.as_ref()
    }

    /// The authoritative (newest) trailer
    pub fn trailer(&self) -> &PdfTrailer {
        self.trailers.current()
    }

    /// Every trailer, newest first
    pub fn trailers(&self) -> &TrailerChain {
        &self.trailers
    }

    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    /// Resolve an object; shorthand for `store().resolve(id)`
    pub fn resolve(&self, id: ObjectId) -> ParseResult<Arc<PdfObject>> {
        self.store.resolve(id)
    }

    /// The document catalog
    pub fn catalog(&self) -> ParseResult<Arc<PdfObject>> {
        let root = self
            .trailers
            .root()
            .ok_or_else(|| ParseError::MissingKey("Root".to_string()))?;
        let catalog = self.store.resolve(root)?;
        if catalog.as_dict().is_none() {
            return Err(ParseError::TypeMismatch {
                id: root,
                expected: "catalog",
            });
        }
        Ok(catalog)
    }

    /// Page tree view over the catalog's `/Pages`, built on first use
    pub fn page_tree(&self) -> ParseResult<&PageTreeView> {
        if let Some(tree) = self.page_tree.get() {
            return Ok(tree);
        }
        let catalog = self.catalog()?;
        let pages = catalog
            .as_dict()
            .and_then(|dict| dict.get_reference("Pages"))
            .ok_or_else(|| ParseError::MissingKey("Pages".to_string()))?;
        Ok(self
            .page_tree
            .get_or_init(|| PageTreeView::new(Arc::clone(&self.store), pages)))
    }

    pub fn page_count(&self) -> ParseResult<usize> {
        self.page_tree()?.count()
    }

    /// Object id of page `index`
    pub fn page(&self, index: usize) -> ParseResult<ObjectId> {
        self.page_tree()?.get(index)
    }

    /// Whether the trailer names an encryption dictionary. Encrypted
    /// strings and streams are returned as stored.
    pub fn is_encrypted(&self) -> bool {
        self.trailers.current().is_encrypted()
    }

    /// Whether the object table was rebuilt by scanning the file
    pub fn was_recovered(&self) -> bool {
        self.recovered
    }
}
