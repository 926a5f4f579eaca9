//! XRef Entry Type Definitions
//!
//! Entry types shared by classic tables and cross-reference streams, and the
//! [`XRefSink`] seam through which both parsers report what they find.
//!
//! Parsers never write into the table directly. Each parsed section records
//! its operations in an [`XRefSection`]; the trailer resolver then folds the
//! sections into the table newest-first, so the first registration of an
//! object number wins.

use super::objects::{ObjectId, PdfDictionary};

/// XRef entry type enumeration (cross-reference stream field 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntryType {
    /// Type 0: Free object (f)
    Free,
    /// Type 1: Normal uncompressed object (n)
    Uncompressed,
    /// Type 2: Compressed object in an object stream
    Compressed,
    /// Any other value; readers must ignore these entries
    Unknown(u64),
}

impl XRefEntryType {
    /// Parse entry type from a numeric value
    pub fn from_value(value: u64) -> Self {
        match value {
            0 => XRefEntryType::Free,
            1 => XRefEntryType::Uncompressed,
            2 => XRefEntryType::Compressed,
            n => XRefEntryType::Unknown(n),
        }
    }

    /// Check if this type represents an in-use object
    pub fn is_in_use(&self) -> bool {
        matches!(
            self,
            XRefEntryType::Uncompressed | XRefEntryType::Compressed
        )
    }
}

/// One decoded cross-reference record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefOp {
    /// In use at a byte offset
    Register { id: ObjectId, offset: u64 },
    /// In use inside an object stream (generation is always 0)
    RegisterCompressed {
        id: ObjectId,
        container: u32,
        index: u32,
    },
    /// Free entry
    Delete(ObjectId),
}

impl XRefOp {
    pub fn id(&self) -> ObjectId {
        match self {
            XRefOp::Register { id, .. } | XRefOp::RegisterCompressed { id, .. } => *id,
            XRefOp::Delete(id) => *id,
        }
    }
}

/// Receives registrations from the section parsers.
///
/// Implementations decide precedence; the object table keeps the first
/// registration it sees for each object number.
pub trait XRefSink {
    /// An in-use object at a byte offset. Returns whether it took effect.
    fn register(&mut self, id: ObjectId, offset: u64) -> bool;

    /// An in-use object stored in object stream `container` at `index`
    fn register_compressed(&mut self, id: ObjectId, container: u32, index: u32) -> bool;

    /// A free entry. Only marks the object free if nothing registered it first.
    fn free(&mut self, id: ObjectId) -> bool;
}

impl XRefSink for Vec<XRefOp> {
    fn register(&mut self, id: ObjectId, offset: u64) -> bool {
        self.push(XRefOp::Register { id, offset });
        true
    }

    fn register_compressed(&mut self, id: ObjectId, container: u32, index: u32) -> bool {
        self.push(XRefOp::RegisterCompressed {
            id,
            container,
            index,
        });
        true
    }

    fn free(&mut self, id: ObjectId) -> bool {
        self.push(XRefOp::Delete(id));
        true
    }
}

/// Which syntax a section was written in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// `xref` keyword, text subsections, `trailer` dictionary
    Classic,
    /// `/Type /XRef` stream; its dictionary doubles as the trailer
    Stream,
}

/// One parsed cross-reference section with its trailer
#[derive(Debug, Clone, PartialEq)]
pub struct XRefSection {
    pub kind: SectionKind,
    /// Byte offset the section was read from
    pub offset: u64,
    pub entries: Vec<XRefOp>,
    pub trailer: PdfDictionary,
}

impl XRefSection {
    pub fn new(kind: SectionKind, offset: u64, trailer: PdfDictionary) -> Self {
        Self {
            kind,
            offset,
            entries: Vec::new(),
            trailer,
        }
    }

    /// Offset of the previous section (`/Prev`)
    pub fn prev(&self) -> Option<u64> {
        self.trailer
            .get_integer("Prev")
            .and_then(|p| u64::try_from(p).ok())
    }

    /// Offset of the companion cross-reference stream of a hybrid file
    pub fn xref_stm(&self) -> Option<u64> {
        self.trailer
            .get_integer("XRefStm")
            .and_then(|p| u64::try_from(p).ok())
    }

    /// Declared `/Size`
    pub fn size(&self) -> Option<u32> {
        self.trailer
            .get_integer("Size")
            .and_then(|s| u32::try_from(s).ok())
    }

    /// Highest object number this section mentions, including containers
    pub fn max_object_number(&self) -> Option<u32> {
        self.entries
            .iter()
            .map(|op| match op {
                XRefOp::RegisterCompressed { id, container, .. } => id.number.max(*container),
                other => other.id().number,
            })
            .max()
    }

    /// Move the free entries into a section of their own, keeping the
    /// in-use entries here
    pub fn split_free(&mut self) -> XRefSection {
        let (free, in_use) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|op| matches!(op, XRefOp::Delete(_)));
        self.entries = in_use;
        XRefSection {
            kind: self.kind,
            offset: self.offset,
            entries: free,
            trailer: self.trailer.clone(),
        }
    }

    /// Replay the recorded operations, in file order, into `sink`
    pub fn replay(&self, sink: &mut dyn XRefSink) -> usize {
        let mut applied = 0;
        for op in &self.entries {
            let took_effect = match *op {
                XRefOp::Register { id, offset } => sink.register(id, offset),
                XRefOp::RegisterCompressed {
                    id,
                    container,
                    index,
                } => sink.register_compressed(id, container, index),
                XRefOp::Delete(id) => sink.free(id),
            };
            if took_effect {
                applied += 1;
            }
        }
        applied
    }
}
