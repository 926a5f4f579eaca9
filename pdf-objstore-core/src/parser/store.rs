//! Object Store
//!
//! Lazy, cached dereferencing on top of the [`XRefTable`]. The store owns the
//! document bytes, the table and the stream decoder, and is the only place
//! objects are loaded from their locations.
//!
//! Resolution is identity-stable: once a slot holds a value, every later
//! [`ObjectStore::resolve`] of that id returns the same `Arc`. Two threads
//! racing on an empty slot both parse, but only the first fill is kept and
//! both observe it.

use super::filters::{StandardDecoder, StreamDecoder};
use super::object_stream::ObjectStream;
use super::objects::{ObjectId, ObjectParser, PdfObject};
use super::stack_safe::{ReferenceGuard, StackSafeContext, VisitedSet};
use super::xref_table::{Location, XRefStats, XRefTable};
use super::{ParseError, ParseOptions, ParseResult};
use memmap2::Mmap;
use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Backing bytes of a document
pub enum PdfBytes {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl Deref for PdfBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            PdfBytes::Owned(data) => data,
            PdfBytes::Mapped(map) => map,
        }
    }
}

impl From<Vec<u8>> for PdfBytes {
    fn from(data: Vec<u8>) -> Self {
        PdfBytes::Owned(data)
    }
}

impl fmt::Debug for PdfBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            PdfBytes::Owned(_) => "Owned",
            PdfBytes::Mapped(_) => "Mapped",
        };
        write!(f, "PdfBytes::{kind}({} bytes)", self.len())
    }
}

/// A richer type built from a resolved object, cached per slot by
/// [`ObjectStore::coerce`]
pub trait FromPdfObject: Any + Send + Sync + Sized {
    /// Used in [`ParseError::TypeMismatch`]
    const TYPE_NAME: &'static str;

    fn from_pdf_object(scope: &ResolveScope<'_>, id: ObjectId, object: &PdfObject)
        -> ParseResult<Self>;
}

/// Document bytes plus the object table
pub struct ObjectStore {
    data: PdfBytes,
    table: XRefTable,
    decoder: Box<dyn StreamDecoder>,
    options: ParseOptions,
    null: Arc<PdfObject>,
}

impl ObjectStore {
    pub fn new(data: impl Into<PdfBytes>, table: XRefTable, options: ParseOptions) -> Self {
        Self {
            data: data.into(),
            table,
            decoder: Box::new(StandardDecoder),
            options,
            null: Arc::new(PdfObject::Null),
        }
    }

    /// Replace the stream decoder
    pub fn with_decoder(mut self, decoder: Box<dyn StreamDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn table(&self) -> &XRefTable {
        &self.table
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    pub fn decoder(&self) -> &dyn StreamDecoder {
        self.decoder.as_ref()
    }

    /// Handle for `id` if the table has a slot with exactly this identity
    pub fn get(&self, id: ObjectId) -> Option<Reference<'_>> {
        self.table.contains(id).then_some(Reference { id, store: self })
    }

    /// Handle for `id` whether or not it exists; resolving a missing object
    /// fails with [`ParseError::ObjectNotFound`]
    pub fn reference(&self, id: ObjectId) -> Reference<'_> {
        Reference { id, store: self }
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.table.contains(id)
    }

    /// Load and cache the object `id`
    pub fn resolve(&self, id: ObjectId) -> ParseResult<Arc<PdfObject>> {
        let context = StackSafeContext::with_max_depth(self.options.max_depth);
        self.resolve_in(&context, id)
    }

    /// Like [`ObjectStore::resolve`], but a broken reference reads as null
    pub fn resolve_or_null(&self, id: ObjectId) -> Arc<PdfObject> {
        match self.resolve(id) {
            Ok(object) => object,
            Err(e) => {
                tracing::warn!("Object {} resolves to null: {}", id, e);
                Arc::clone(&self.null)
            }
        }
    }

    /// Follow `object` through any chain of references. Direct values are
    /// returned as a fresh `Arc`.
    pub fn resolve_value(&self, object: &PdfObject) -> ParseResult<Arc<PdfObject>> {
        let Some(mut id) = object.as_reference() else {
            return Ok(Arc::new(object.clone()));
        };
        let mut visited = VisitedSet::new("Reference chain");
        loop {
            visited.visit(id)?;
            let resolved = self.resolve(id)?;
            match resolved.as_reference() {
                Some(next) => id = next,
                None => return Ok(resolved),
            }
        }
    }

    /// Resolve `id` and build a `T` from it. The result is cached in the
    /// slot; asking for a different type later is a type mismatch.
    pub fn coerce<T: FromPdfObject>(&self, id: ObjectId) -> ParseResult<Arc<T>> {
        let context = StackSafeContext::with_max_depth(self.options.max_depth);
        self.coerce_in(&context, id)
    }

    /// Seed a new object under the next free number
    pub fn add_object(&self, value: PdfObject) -> ParseResult<ObjectId> {
        let (id, _) = self.table.allocate_inline(value)?;
        tracing::debug!("Added object {}", id);
        Ok(id)
    }

    /// Drop every cached value that can be reloaded
    pub fn flush_cache(&self) -> usize {
        self.table.flush_cache()
    }

    /// Handles for every registered slot, in object-number order
    pub fn references(&self) -> impl Iterator<Item = Reference<'_>> {
        self.table.enumerate().map(move |slot| Reference {
            id: slot.id(),
            store: self,
        })
    }

    pub fn stats(&self) -> XRefStats {
        self.table.stats()
    }

    fn resolve_in(&self, context: &StackSafeContext, id: ObjectId) -> ParseResult<Arc<PdfObject>> {
        let slot = self.table.get(id).ok_or(ParseError::ObjectNotFound(id))?;
        if let Some(object) = slot.cached() {
            return Ok(Arc::clone(object));
        }

        let object = match slot.location() {
            Location::Free => PdfObject::Null,
            Location::Unresolved => return Err(ParseError::ObjectNotFound(id)),
            Location::ByteOffset(offset) => {
                let _guard = ReferenceGuard::new(context, id)?;
                self.load_at(context, id, offset)?
            }
            Location::InContainer { container, index } => {
                let _guard = ReferenceGuard::new(context, id)?;
                self.load_member(context, id, container, index)?
            }
        };

        tracing::trace!("Resolved {} as {}", id, object.type_name());
        Ok(slot.fill(Arc::new(object)))
    }

    fn load_at(
        &self,
        context: &StackSafeContext,
        id: ObjectId,
        offset: u64,
    ) -> ParseResult<PdfObject> {
        let position = usize::try_from(offset)
            .ok()
            .filter(|&p| p < self.data.len())
            .ok_or(ParseError::ObjectNotFound(id))?;

        let length = |length_id: ObjectId| {
            self.resolve_in(context, length_id)
                .ok()
                .and_then(|object| object.as_integer())
                .and_then(|length| usize::try_from(length).ok())
        };

        let (found, object) = ObjectParser::at(&self.data, position)
            .with_options(&self.options)
            .with_length_resolver(&length)
            .read_indirect()?;

        if found != id {
            return Err(ParseError::WrongObject {
                expected: id,
                found,
                offset,
            });
        }
        Ok(object)
    }

    fn load_member(
        &self,
        context: &StackSafeContext,
        id: ObjectId,
        container: ObjectId,
        index: u32,
    ) -> ParseResult<PdfObject> {
        let stream = self.coerce_in::<ObjectStream>(context, container)?;
        let scope = ResolveScope {
            store: self,
            context,
        };
        let (found, object) = stream.find_member(&scope, index as usize)?;
        if found.number != id.number {
            return Err(ParseError::WrongObject {
                expected: id,
                found,
                offset: u64::from(index),
            });
        }
        Ok(object)
    }

    fn coerce_in<T: FromPdfObject>(
        &self,
        context: &StackSafeContext,
        id: ObjectId,
    ) -> ParseResult<Arc<T>> {
        let mismatch = || ParseError::TypeMismatch {
            id,
            expected: T::TYPE_NAME,
        };

        let slot = self.table.get(id).ok_or(ParseError::ObjectNotFound(id))?;
        if let Some(typed) = slot.cached_typed() {
            return Arc::clone(typed).downcast::<T>().map_err(|_| mismatch());
        }

        let object = self.resolve_in(context, id)?;
        let scope = ResolveScope {
            store: self,
            context,
        };
        let value = T::from_pdf_object(&scope, id, &object)?;
        slot.fill_typed(Arc::new(value))
            .downcast::<T>()
            .map_err(|_| mismatch())
    }
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("data", &self.data)
            .field("table", &self.table.stats())
            .field("options", &self.options)
            .finish()
    }
}

/// Resolution context handed to [`FromPdfObject`] implementations, so that
/// nested lookups share the caller's cycle and depth tracking
pub struct ResolveScope<'s> {
    store: &'s ObjectStore,
    context: &'s StackSafeContext,
}

impl<'s> ResolveScope<'s> {
    pub fn store(&self) -> &'s ObjectStore {
        self.store
    }

    pub fn resolve(&self, id: ObjectId) -> ParseResult<Arc<PdfObject>> {
        self.store.resolve_in(self.context, id)
    }

    pub fn coerce<T: FromPdfObject>(&self, id: ObjectId) -> ParseResult<Arc<T>> {
        self.store.coerce_in(self.context, id)
    }

    pub fn decoder(&self) -> &'s dyn StreamDecoder {
        self.store.decoder()
    }

    pub fn options(&self) -> &'s ParseOptions {
        &self.store.options
    }
}

/// Lazy handle to one object: an id plus the store that can load it
#[derive(Clone, Copy)]
pub struct Reference<'s> {
    id: ObjectId,
    store: &'s ObjectStore,
}

impl<'s> Reference<'s> {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn resolve(&self) -> ParseResult<Arc<PdfObject>> {
        self.store.resolve(self.id)
    }

    pub fn coerce<T: FromPdfObject>(&self) -> ParseResult<Arc<T>> {
        self.store.coerce(self.id)
    }

    pub fn is_resolved(&self) -> bool {
        self.store
            .table
            .get(self.id)
            .is_some_and(|slot| slot.cached().is_some())
    }

    pub fn location(&self) -> Option<Location> {
        self.store.table.get(self.id).map(|slot| slot.location())
    }
}

impl fmt::Debug for Reference<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("id", &self.id)
            .field("location", &self.location())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
