//! Object Table
//!
//! The registry of every object number a document knows about. Each number
//! maps to one [`ReferenceSlot`]: the object's identity, where its bytes are,
//! and write-once caches for the parsed value and its typed form.
//!
//! Registration is first-writer-wins. Sections are folded newest-first, so
//! the first registration of a number is the authoritative one; later ones
//! are ignored unless they fill in a forward-declared placeholder.
//!
//! Slots are shared as `Arc<ReferenceSlot>`. The table lock only guards the
//! slot vector; resolution reads a slot under a short read lock and then
//! fills the slot's caches without holding any lock.

use super::objects::{ObjectId, PdfObject};
use super::xref_types::XRefSink;
use super::{ParseError, ParseResult, MAX_OBJECT_NUMBER};
use std::any::Any;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Where an object's bytes live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Known to exist but not yet located (a forward-declared container)
    Unresolved,
    /// `N G obj` at this byte offset
    ByteOffset(u64),
    /// Member `index` of the object stream `container`
    InContainer { container: ObjectId, index: u32 },
    /// Free entry; resolves to null
    Free,
}

impl Location {
    pub fn is_resolvable(&self) -> bool {
        matches!(self, Location::ByteOffset(_) | Location::InContainer { .. })
    }
}

/// Type-erased value held by a slot's typed cache
pub type TypedValue = Arc<dyn Any + Send + Sync>;

/// One entry of the table
pub struct ReferenceSlot {
    id: ObjectId,
    location: Location,
    inline: bool,
    value: OnceLock<Arc<PdfObject>>,
    typed: OnceLock<TypedValue>,
}

impl ReferenceSlot {
    fn new(id: ObjectId, location: Location) -> Self {
        Self {
            id,
            location,
            inline: false,
            value: OnceLock::new(),
            typed: OnceLock::new(),
        }
    }

    fn inline(id: ObjectId, value: Arc<PdfObject>, position: Option<u64>) -> Self {
        let slot = Self {
            id,
            location: position.map_or(Location::Unresolved, Location::ByteOffset),
            inline: true,
            value: OnceLock::new(),
            typed: OnceLock::new(),
        };
        let _ = slot.value.set(value);
        slot
    }

    /// Same identity and location, empty caches
    fn relocated(&self, location: Location) -> Self {
        Self::new(self.id, location)
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn location(&self) -> Location {
        self.location
    }

    /// Seeded directly with a value rather than loaded from its location
    pub fn is_inline(&self) -> bool {
        self.inline
    }

    pub fn is_free(&self) -> bool {
        self.location == Location::Free
    }

    /// The cached value, if the slot has been resolved
    pub fn cached(&self) -> Option<&Arc<PdfObject>> {
        self.value.get()
    }

    /// Store `value` unless another thread got there first; returns the
    /// value every caller will observe from now on
    pub fn fill(&self, value: Arc<PdfObject>) -> Arc<PdfObject> {
        Arc::clone(self.value.get_or_init(|| value))
    }

    pub fn cached_typed(&self) -> Option<&TypedValue> {
        self.typed.get()
    }

    /// Same race rule as [`ReferenceSlot::fill`], for the typed cache
    pub fn fill_typed(&self, value: TypedValue) -> TypedValue {
        Arc::clone(self.typed.get_or_init(|| value))
    }
}

impl std::fmt::Debug for ReferenceSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceSlot")
            .field("id", &self.id)
            .field("location", &self.location)
            .field("inline", &self.inline)
            .field("cached", &self.value.get().is_some())
            .field("typed", &self.typed.get().is_some())
            .finish()
    }
}

/// Slot counts by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XRefStats {
    pub slots: usize,
    pub byte_offset: usize,
    pub in_container: usize,
    pub unresolved: usize,
    pub free: usize,
    pub inline: usize,
    pub cached: usize,
}

/// Sparse array of slots indexed by object number
#[derive(Debug)]
pub struct XRefTable {
    slots: RwLock<Vec<Option<Arc<ReferenceSlot>>>>,
    max_object_number: u32,
}

impl Default for XRefTable {
    fn default() -> Self {
        Self::new(MAX_OBJECT_NUMBER)
    }
}

impl XRefTable {
    /// Create an empty table that never grows past `max_object_number`
    pub fn new(max_object_number: u32) -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            max_object_number,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Option<Arc<ReferenceSlot>>>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Option<Arc<ReferenceSlot>>>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_object_number(&self) -> u32 {
        self.max_object_number
    }

    /// Grow the slot array to at least `n` entries, capped at the object
    /// number limit. Returns the resulting capacity.
    pub fn ensure_capacity(&self, n: usize) -> usize {
        let mut slots = self.write();
        let cap = n.min(self.max_object_number as usize + 1);
        if cap < n {
            tracing::warn!(
                "Capacity {} capped at object number limit {}",
                n,
                self.max_object_number
            );
        }
        if slots.len() < cap {
            slots.resize(cap, None);
        }
        slots.len()
    }

    fn grow_for(&self, slots: &mut Vec<Option<Arc<ReferenceSlot>>>, number: u32) -> bool {
        if number > self.max_object_number {
            tracing::warn!(
                "Object number {} exceeds limit {}, ignored",
                number,
                self.max_object_number
            );
            return false;
        }
        let needed = number as usize + 1;
        if slots.len() < needed {
            slots.resize(needed, None);
        }
        true
    }

    /// Shared first-writer-wins insert
    fn insert_located(&self, id: ObjectId, location: Location) -> bool {
        if id.is_null() {
            return false;
        }
        let mut slots = self.write();
        if !self.grow_for(&mut slots, id.number) {
            return false;
        }
        let entry = &mut slots[id.number as usize];
        let replacement = match entry.as_deref() {
            None => ReferenceSlot::new(id, location),
            // Forward-declared placeholder for this exact identity
            Some(slot)
                if slot.id == id
                    && slot.location == Location::Unresolved
                    && !slot.inline
                    && location != Location::Free =>
            {
                slot.relocated(location)
            }
            Some(slot) => {
                tracing::trace!(
                    "Keeping {} at {:?}, ignoring {} at {:?}",
                    slot.id,
                    slot.location,
                    id,
                    location
                );
                return false;
            }
        };
        *entry = Some(Arc::new(replacement));
        true
    }

    /// Register an object at a byte offset
    pub fn register(&self, id: ObjectId, offset: u64) -> bool {
        self.insert_located(id, Location::ByteOffset(offset))
    }

    /// Register a member of an object stream. The container gets an
    /// unresolved placeholder slot if it has none yet.
    pub fn register_compressed(&self, id: ObjectId, container: u32, index: u32) -> bool {
        if container == id.number {
            tracing::warn!("Object {} claims to live inside itself", id);
            return false;
        }
        let container_id = ObjectId::new(container, 0);
        let registered = self.insert_located(
            id,
            Location::InContainer {
                container: container_id,
                index,
            },
        );
        if registered {
            self.insert_located(container_id, Location::Unresolved);
        }
        registered
    }

    /// Mark an object free unless a newer section already placed it
    pub fn mark_free(&self, id: ObjectId) -> bool {
        self.insert_located(id, Location::Free)
    }

    /// Seed a slot with an already-parsed value. Always replaces whatever
    /// the slot held; `position` records where the value was found.
    pub fn register_inline(
        &self,
        id: ObjectId,
        value: PdfObject,
        position: Option<u64>,
    ) -> ParseResult<Arc<PdfObject>> {
        if id.is_null() {
            return Err(ParseError::ObjectNotFound(id));
        }
        let mut slots = self.write();
        if !self.grow_for(&mut slots, id.number) {
            return Err(ParseError::LimitExceeded(format!(
                "Object number {} exceeds limit {}",
                id.number, self.max_object_number
            )));
        }
        let value = Arc::new(value);
        slots[id.number as usize] = Some(Arc::new(ReferenceSlot::inline(
            id,
            Arc::clone(&value),
            position,
        )));
        Ok(value)
    }

    /// Allocate the next unused object number and seed it with `value`
    pub fn allocate_inline(&self, value: PdfObject) -> ParseResult<(ObjectId, Arc<PdfObject>)> {
        let mut slots = self.write();
        let number = slots.len().max(1);
        let number = u32::try_from(number)
            .ok()
            .filter(|&n| n <= self.max_object_number)
            .ok_or_else(|| {
                ParseError::LimitExceeded(format!(
                    "No object numbers left below {}",
                    self.max_object_number
                ))
            })?;
        if !self.grow_for(&mut slots, number) {
            return Err(ParseError::LimitExceeded(format!("Object number {number}")));
        }
        let id = ObjectId::new(number, 0);
        let value = Arc::new(value);
        slots[number as usize] = Some(Arc::new(ReferenceSlot::inline(
            id,
            Arc::clone(&value),
            None,
        )));
        Ok((id, value))
    }

    /// Mark the slot free unconditionally
    pub fn delete(&self, id: ObjectId) -> bool {
        let mut slots = self.write();
        match slots.get_mut(id.number as usize) {
            Some(entry) if entry.is_some() => {
                *entry = Some(Arc::new(ReferenceSlot::new(id, Location::Free)));
                true
            }
            _ => false,
        }
    }

    /// The slot for `id`, only if number and generation both match
    pub fn get(&self, id: ObjectId) -> Option<Arc<ReferenceSlot>> {
        self.slot(id.number).filter(|slot| slot.id == id)
    }

    /// The slot for an object number, whatever its generation
    pub fn slot(&self, number: u32) -> Option<Arc<ReferenceSlot>> {
        self.read().get(number as usize).and_then(Clone::clone)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }

    /// Number of populated slots
    pub fn len(&self) -> usize {
        self.read().iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length of the slot array (highest number + 1)
    pub fn capacity(&self) -> usize {
        self.read().len()
    }

    /// Highest populated object number
    pub fn max_number(&self) -> Option<u32> {
        self.read()
            .iter()
            .rposition(Option::is_some)
            .map(|n| n as u32)
    }

    /// Snapshot of the populated slots in object-number order. Each call
    /// starts a fresh iteration.
    pub fn enumerate(&self) -> impl Iterator<Item = Arc<ReferenceSlot>> {
        let snapshot: Vec<Arc<ReferenceSlot>> = self.read().iter().flatten().cloned().collect();
        snapshot.into_iter()
    }

    /// Drop cached values of every slot that can be reloaded from its
    /// location. Inline slots keep theirs. Returns the number flushed.
    pub fn flush_cache(&self) -> usize {
        let mut slots = self.write();
        let mut flushed = 0;
        for entry in slots.iter_mut() {
            let replacement = match entry.as_deref() {
                Some(slot)
                    if !slot.inline
                        && slot.location.is_resolvable()
                        && (slot.value.get().is_some() || slot.typed.get().is_some()) =>
                {
                    slot.relocated(slot.location)
                }
                _ => continue,
            };
            *entry = Some(Arc::new(replacement));
            flushed += 1;
        }
        flushed
    }

    /// Tear the table down
    pub fn trim(&self) {
        let mut slots = self.write();
        slots.clear();
        slots.shrink_to_fit();
    }

    pub fn stats(&self) -> XRefStats {
        let slots = self.read();
        let mut stats = XRefStats::default();
        for slot in slots.iter().flatten() {
            stats.slots += 1;
            match slot.location {
                Location::ByteOffset(_) => stats.byte_offset += 1,
                Location::InContainer { .. } => stats.in_container += 1,
                Location::Unresolved => stats.unresolved += 1,
                Location::Free => stats.free += 1,
            }
            if slot.inline {
                stats.inline += 1;
            }
            if slot.value.get().is_some() {
                stats.cached += 1;
            }
        }
        stats
    }
}

/// A shared table folds sections through its interior locking
impl XRefSink for &XRefTable {
    fn register(&mut self, id: ObjectId, offset: u64) -> bool {
        XRefTable::register(*self, id, offset)
    }

    fn register_compressed(&mut self, id: ObjectId, container: u32, index: u32) -> bool {
        XRefTable::register_compressed(*self, id, container, index)
    }

    fn free(&mut self, id: ObjectId) -> bool {
        self.mark_free(id)
    }
}
