//! Stack-safe resolution utilities
//!
//! Resolving one object can require resolving others first: an indirect
//! stream `/Length`, the object stream that holds a compressed member, the
//! object stream that one extends. This module bounds that nesting and
//! detects cycles, so a crafted file cannot recurse forever.
//!
//! It also provides [`VisitedSet`], the visited-set used by every chain walk
//! (Prev offsets, Extends chains, page tree nodes).

use super::objects::ObjectId;
use super::{ParseError, ParseResult};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt::Display;
use std::hash::Hash;

/// Maximum recursion depth for PDF parsing operations
pub const MAX_RECURSION_DEPTH: usize = 1000;

/// Per-resolution context, threaded through nested resolution.
///
/// State lives in cells so that guards can be taken through a shared
/// reference, including from inside the parser's length callback.
#[derive(Debug)]
pub struct StackSafeContext {
    depth: Cell<usize>,
    max_depth: usize,
    in_progress: RefCell<HashSet<ObjectId>>,
}

impl Default for StackSafeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl StackSafeContext {
    /// Create a new stack-safe context
    pub fn new() -> Self {
        Self::with_max_depth(MAX_RECURSION_DEPTH)
    }

    /// Create a new context with a custom depth limit
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            depth: Cell::new(0),
            max_depth,
            in_progress: RefCell::new(HashSet::new()),
        }
    }

    /// Current recursion depth
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    /// Whether `id` is currently being resolved further up the stack
    pub fn is_resolving(&self, id: ObjectId) -> bool {
        self.in_progress.borrow().contains(&id)
    }

    fn enter(&self, id: ObjectId) -> ParseResult<()> {
        let depth = self.depth.get() + 1;
        if depth > self.max_depth {
            return Err(ParseError::LimitExceeded(format!(
                "Maximum resolution depth exceeded: {depth} (limit: {})",
                self.max_depth
            )));
        }
        if !self.in_progress.borrow_mut().insert(id) {
            return Err(ParseError::CircularReference(format!(
                "{id} depends on itself"
            )));
        }
        self.depth.set(depth);
        Ok(())
    }

    fn exit(&self, id: ObjectId) {
        self.in_progress.borrow_mut().remove(&id);
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

/// RAII guard marking one object as in progress
pub struct ReferenceGuard<'a> {
    context: &'a StackSafeContext,
    id: ObjectId,
}

impl<'a> ReferenceGuard<'a> {
    /// Enter `id`, failing on a cycle or when the depth limit is reached
    pub fn new(context: &'a StackSafeContext, id: ObjectId) -> ParseResult<Self> {
        context.enter(id)?;
        Ok(Self { context, id })
    }
}

impl Drop for ReferenceGuard<'_> {
    fn drop(&mut self) {
        self.context.exit(self.id);
    }
}

/// Visited-set for one traversal; a revisit is a circular reference
#[derive(Debug)]
pub struct VisitedSet<K> {
    what: &'static str,
    seen: HashSet<K>,
}

impl<K: Hash + Eq + Display + Copy> VisitedSet<K> {
    /// `what` names the traversal in error messages
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            seen: HashSet::new(),
        }
    }

    pub fn visit(&mut self, key: K) -> ParseResult<()> {
        if self.seen.insert(key) {
            Ok(())
        } else {
            Err(ParseError::CircularReference(format!(
                "{} revisits {key}",
                self.what
            )))
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
