//! PDF Page Tree Navigation
//!
//! Presents the hierarchical page tree of a document (ISO 32000-1 Section
//! 7.7.3) as a flat, randomly indexable sequence of page objects.
//!
//! # Overview
//!
//! The PDF page tree consists of:
//! - **Page Tree Nodes**: Interior nodes (`/Type /Pages`) listing their
//!   children in `/Kids`
//! - **Page Objects**: Leaf nodes (`/Type /Page`) representing individual pages
//!
//! Nodes are read through [`ObjectStore::coerce`], so each node dictionary is
//! turned into a [`PageNode`] once and cached in its slot. Leaf counts are
//! memoized per node until the tree is edited.
//!
//! Every traversal threads a visited set and checks that an interior node's
//! `/Parent` names the node it was reached through. A tree whose parent
//! pointers disagree with its `/Kids`, or which lists a node twice, is
//! rejected with [`ParseError::CircularReference`] instead of being walked.
//!
//! # Example
//!
//! ```rust,no_run
//! use pdf_objstore::parser::PdfDocument;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let document = PdfDocument::open("document.pdf")?;
//! let pages = document.page_tree()?;
//!
//! println!("{} pages", pages.count()?);
//! let first = pages.get(0)?;
//! println!("Page 0 is object {}", first);
//! assert_eq!(pages.find_index_of(first)?, Some(0));
//! # Ok(())
//! # }
//! ```

use super::objects::{ObjectId, PdfArray, PdfObject};
use super::stack_safe::VisitedSet;
use super::store::{FromPdfObject, ObjectStore, ResolveScope};
use super::{ParseError, ParseResult};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// One node of the page tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageNode {
    /// A page
    Leaf { parent: Option<ObjectId> },
    /// A `/Pages` node
    Interior {
        kids: Vec<ObjectId>,
        parent: Option<ObjectId>,
        /// `/Count` as written in the file; informational only
        declared_count: Option<usize>,
    },
}

impl PageNode {
    pub fn parent(&self) -> Option<ObjectId> {
        match self {
            PageNode::Leaf { parent } | PageNode::Interior { parent, .. } => *parent,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, PageNode::Leaf { .. })
    }
}

impl FromPdfObject for PageNode {
    const TYPE_NAME: &'static str = "page tree node";

    fn from_pdf_object(
        scope: &ResolveScope<'_>,
        id: ObjectId,
        object: &PdfObject,
    ) -> ParseResult<Self> {
        let mismatch = || ParseError::TypeMismatch {
            id,
            expected: Self::TYPE_NAME,
        };
        let dict = object.as_dict().ok_or_else(mismatch)?;
        let parent = dict.get_reference("Parent");

        let interior = match dict.get_type() {
            Some("Pages") => true,
            Some("Page") => false,
            // Untyped nodes are classified by shape
            None => dict.contains_key("Kids"),
            Some(_) => return Err(mismatch()),
        };
        if !interior {
            return Ok(PageNode::Leaf { parent });
        }

        let kids = match dict.get("Kids") {
            Some(PdfObject::Array(kids)) => collect_kids(id, kids),
            Some(PdfObject::Reference(kids_id)) => {
                let resolved = scope.resolve(*kids_id)?;
                match resolved.as_array() {
                    Some(kids) => collect_kids(id, kids),
                    None => return Err(ParseError::MissingKey("Kids".to_string())),
                }
            }
            _ => return Err(ParseError::MissingKey("Kids".to_string())),
        };

        Ok(PageNode::Interior {
            kids,
            parent,
            declared_count: dict
                .get_integer("Count")
                .and_then(|c| usize::try_from(c).ok()),
        })
    }
}

fn collect_kids(id: ObjectId, kids: &PdfArray) -> Vec<ObjectId> {
    kids.0
        .iter()
        .filter_map(|kid| {
            let reference = kid.as_reference();
            if reference.is_none() {
                tracing::warn!("Skipping direct {} in /Kids of {}", kid.type_name(), id);
            }
            reference
        })
        .collect()
}

/// Flat view over a page tree rooted at a `/Pages` node
#[derive(Debug)]
pub struct PageTreeView {
    store: Arc<ObjectStore>,
    root: ObjectId,
    /// Memoized leaf counts per node
    counts: RwLock<HashMap<ObjectId, usize>>,
}

impl PageTreeView {
    /// Create a view over the tree rooted at `root`
    pub fn new(store: Arc<ObjectStore>, root: ObjectId) -> Self {
        Self {
            store,
            root,
            counts: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> ObjectId {
        self.root
    }

    /// Total number of pages
    pub fn count(&self) -> ParseResult<usize> {
        let mut visited = VisitedSet::new("Page tree");
        self.count_node(self.root, None, &mut visited, 0)
    }

    /// Object id of page `index`
    pub fn get(&self, index: usize) -> ParseResult<ObjectId> {
        let count = self.count()?;
        if index >= count {
            return Err(ParseError::PageOutOfRange { index, count });
        }

        let mut visited = VisitedSet::new("Page tree");
        let mut node_id = self.root;
        let mut expected_parent = None;
        let mut remaining = index;

        'descend: loop {
            visited.visit(node_id)?;
            let node = self.node(node_id, expected_parent)?;
            let PageNode::Interior { kids, .. } = &*node else {
                // Counting has already bounded `remaining` to this leaf
                return Ok(node_id);
            };

            for &kid in kids {
                let mut subtree = VisitedSet::new("Page tree");
                let kid_count = self.count_node(kid, Some(node_id), &mut subtree, 0)?;
                if remaining < kid_count {
                    expected_parent = Some(node_id);
                    node_id = kid;
                    continue 'descend;
                }
                remaining -= kid_count;
            }

            return Err(ParseError::InvalidXRef(format!(
                "Page tree node {node_id} holds fewer pages than counted"
            )));
        }
    }

    /// Index of the page `id`, or `None` if it is not in the tree
    pub fn find_index_of(&self, id: ObjectId) -> ParseResult<Option<usize>> {
        let mut visited = VisitedSet::new("Page tree");
        let mut offset = 0;
        self.find_in(self.root, None, id, &mut offset, &mut visited, 0)
    }

    /// Every page in document order
    pub fn pages(&self) -> ParseResult<impl Iterator<Item = ObjectId>> {
        let mut visited = VisitedSet::new("Page tree");
        let mut leaves = Vec::new();
        self.collect_leaves(self.root, None, &mut leaves, &mut visited, 0)?;
        Ok(leaves.into_iter())
    }

    /// Append `page_id` as the last kid of the root node. The page must
    /// already be an object of the store.
    pub fn add_page(&self, page_id: ObjectId) -> ParseResult<usize> {
        if !self.store.contains(page_id) {
            return Err(ParseError::ObjectNotFound(page_id));
        }
        if !self.store.coerce::<PageNode>(page_id)?.is_leaf() {
            return Err(ParseError::TypeMismatch {
                id: page_id,
                expected: "page",
            });
        }
        if self.find_index_of(page_id)?.is_some() {
            return Err(ParseError::CircularReference(format!(
                "Page {page_id} is already in the page tree"
            )));
        }

        let count = self.count()?;
        let mut root_dict = self
            .store
            .resolve(self.root)?
            .as_dict()
            .cloned()
            .ok_or(ParseError::TypeMismatch {
                id: self.root,
                expected: PageNode::TYPE_NAME,
            })?;
        let mut kids = match root_dict.get("Kids") {
            Some(kids) => self
                .store
                .resolve_value(kids)?
                .as_array()
                .cloned()
                .unwrap_or_default(),
            None => PdfArray::new(),
        };
        kids.push(PdfObject::Reference(page_id));
        root_dict.insert("Kids".to_string(), PdfObject::Array(kids));
        root_dict.insert("Count".to_string(), PdfObject::Integer(count as i64 + 1));

        let mut page_dict = self
            .store
            .resolve(page_id)?
            .as_dict()
            .cloned()
            .ok_or(ParseError::TypeMismatch {
                id: page_id,
                expected: "page",
            })?;
        page_dict.insert("Parent".to_string(), PdfObject::Reference(self.root));

        let table = self.store.table();
        table.register_inline(self.root, PdfObject::Dictionary(root_dict), None)?;
        table.register_inline(page_id, PdfObject::Dictionary(page_dict), None)?;
        self.invalidate();

        tracing::debug!("Added page {} at index {}", page_id, count);
        Ok(count)
    }

    /// Forget memoized counts
    pub fn invalidate(&self) {
        self.counts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Load `id` as a node and check its parent pointer
    fn node(&self, id: ObjectId, expected_parent: Option<ObjectId>) -> ParseResult<Arc<PageNode>> {
        let node = self.store.coerce::<PageNode>(id)?;
        if let (Some(expected), PageNode::Interior { parent, .. }) = (expected_parent, &*node) {
            match parent {
                Some(parent) if *parent == expected => {}
                None if self.store.options().lenient_syntax => {
                    tracing::warn!("Page tree node {} has no /Parent", id);
                }
                _ => {
                    return Err(ParseError::CircularReference(format!(
                        "Page tree node {id} is reached from {expected} but names parent {parent:?}"
                    )))
                }
            }
        }
        Ok(node)
    }

    fn check_depth(&self, depth: usize) -> ParseResult<()> {
        let max = self.store.options().max_depth;
        if depth > max {
            return Err(ParseError::LimitExceeded(format!(
                "Page tree deeper than {max} levels"
            )));
        }
        Ok(())
    }

    fn count_node(
        &self,
        id: ObjectId,
        expected_parent: Option<ObjectId>,
        visited: &mut VisitedSet<ObjectId>,
        depth: usize,
    ) -> ParseResult<usize> {
        self.check_depth(depth)?;
        visited.visit(id)?;
        let memo = self
            .counts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .copied();
        if let Some(count) = memo {
            return Ok(count);
        }

        let node = self.node(id, expected_parent)?;
        let count = match &*node {
            PageNode::Leaf { .. } => 1,
            PageNode::Interior {
                kids,
                declared_count,
                ..
            } => {
                let mut total = 0;
                for &kid in kids {
                    total += self.count_node(kid, Some(id), visited, depth + 1)?;
                }
                if declared_count.is_some_and(|declared| declared != total) {
                    tracing::debug!(
                        "Page tree node {} declares /Count {:?} but holds {} pages",
                        id,
                        declared_count,
                        total
                    );
                }
                total
            }
        };

        self.counts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, count);
        Ok(count)
    }

    fn find_in(
        &self,
        id: ObjectId,
        expected_parent: Option<ObjectId>,
        target: ObjectId,
        offset: &mut usize,
        visited: &mut VisitedSet<ObjectId>,
        depth: usize,
    ) -> ParseResult<Option<usize>> {
        self.check_depth(depth)?;
        visited.visit(id)?;
        let node = self.node(id, expected_parent)?;
        match &*node {
            PageNode::Leaf { .. } if id == target => Ok(Some(*offset)),
            PageNode::Leaf { .. } => {
                *offset += 1;
                Ok(None)
            }
            PageNode::Interior { kids, .. } => {
                for &kid in kids {
                    if let Some(index) =
                        self.find_in(kid, Some(id), target, offset, visited, depth + 1)?
                    {
                        return Ok(Some(index));
                    }
                }
                Ok(None)
            }
        }
    }

    fn collect_leaves(
        &self,
        id: ObjectId,
        expected_parent: Option<ObjectId>,
        leaves: &mut Vec<ObjectId>,
        visited: &mut VisitedSet<ObjectId>,
        depth: usize,
    ) -> ParseResult<()> {
        self.check_depth(depth)?;
        visited.visit(id)?;
        match &*self.node(id, expected_parent)? {
            PageNode::Leaf { .. } => leaves.push(id),
            PageNode::Interior { kids, .. } => {
                for &kid in kids {
                    self.collect_leaves(kid, Some(id), leaves, visited, depth + 1)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_helpers::store_with_objects;
    use crate::parser::PdfDictionary;

    fn view(objects: &[(u32, u16, &str)], root: u32) -> PageTreeView {
        PageTreeView::new(Arc::new(store_with_objects(objects)), ObjectId::new(root, 0))
    }

    /// Root 2 with kids [3 (page), 4 (pages: 5, 6)], page 7 unattached
    fn nested() -> PageTreeView {
        view(
            &[
                (2, 0, "<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 3 >>"),
                (3, 0, "<< /Type /Page /Parent 2 0 R >>"),
                (4, 0, "<< /Type /Pages /Parent 2 0 R /Kids [5 0 R 6 0 R] /Count 2 >>"),
                (5, 0, "<< /Type /Page /Parent 4 0 R >>"),
                (6, 0, "<< /Type /Page /Parent 4 0 R >>"),
                (7, 0, "<< /Type /Page >>"),
            ],
            2,
        )
    }

    #[test]
    fn test_count_and_index() {
        let tree = nested();
        assert_eq!(tree.count().unwrap(), 3);
        assert_eq!(tree.get(0).unwrap(), ObjectId::new(3, 0));
        assert_eq!(tree.get(1).unwrap(), ObjectId::new(5, 0));
        assert_eq!(tree.get(2).unwrap(), ObjectId::new(6, 0));
        assert!(matches!(
            tree.get(3),
            Err(ParseError::PageOutOfRange { index: 3, count: 3 })
        ));
    }

    #[test]
    fn test_find_index_of() {
        let tree = nested();
        assert_eq!(tree.find_index_of(ObjectId::new(6, 0)).unwrap(), Some(2));
        assert_eq!(tree.find_index_of(ObjectId::new(3, 0)).unwrap(), Some(0));
        assert_eq!(tree.find_index_of(ObjectId::new(7, 0)).unwrap(), None);
        // Interior nodes are not pages
        assert_eq!(tree.find_index_of(ObjectId::new(4, 0)).unwrap(), None);
    }

    #[test]
    fn test_pages_iterator() {
        let tree = nested();
        let pages: Vec<u32> = tree.pages().unwrap().map(|id| id.number).collect();
        assert_eq!(pages, vec![3, 5, 6]);
    }

    #[test]
    fn test_wrong_parent_is_rejected() {
        // Node 4 is a kid of 2 but claims 3 as its parent
        let tree = view(
            &[
                (2, 0, "<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 >>"),
                (3, 0, "<< /Type /Pages /Parent 2 0 R /Kids [5 0 R] /Count 1 >>"),
                (4, 0, "<< /Type /Pages /Parent 3 0 R /Kids [6 0 R] /Count 1 >>"),
                (5, 0, "<< /Type /Page /Parent 3 0 R >>"),
                (6, 0, "<< /Type /Page /Parent 4 0 R >>"),
            ],
            2,
        );
        assert!(matches!(tree.get(1), Err(ParseError::CircularReference(_))));
        assert!(matches!(tree.count(), Err(ParseError::CircularReference(_))));
    }

    #[test]
    fn test_looped_tree_terminates() {
        // 3 lists 2 as a kid, and 2 lists 3
        let tree = view(
            &[
                (2, 0, "<< /Type /Pages /Parent 3 0 R /Kids [3 0 R] /Count 1 >>"),
                (3, 0, "<< /Type /Pages /Parent 2 0 R /Kids [2 0 R] /Count 1 >>"),
            ],
            2,
        );
        assert!(matches!(tree.count(), Err(ParseError::CircularReference(_))));
    }

    #[test]
    fn test_duplicate_kid_is_rejected() {
        let tree = view(
            &[
                (2, 0, "<< /Type /Pages /Kids [3 0 R 3 0 R] /Count 2 >>"),
                (3, 0, "<< /Type /Page /Parent 2 0 R >>"),
            ],
            2,
        );
        assert!(matches!(tree.count(), Err(ParseError::CircularReference(_))));
    }

    #[test]
    fn test_untyped_nodes_and_indirect_kids() {
        let tree = view(
            &[
                (2, 0, "<< /Kids 8 0 R /Count 1 >>"),
                (3, 0, "<< /Parent 2 0 R /MediaBox [0 0 10 10] >>"),
                (8, 0, "[3 0 R << /Type /Page >>]"),
            ],
            2,
        );
        assert_eq!(tree.count().unwrap(), 1);
        assert_eq!(tree.get(0).unwrap(), ObjectId::new(3, 0));
    }

    #[test]
    fn test_other_types_are_not_nodes() {
        let tree = view(&[(2, 0, "<< /Type /Catalog >>")], 2);
        assert!(matches!(tree.count(), Err(ParseError::TypeMismatch { .. })));
    }

    #[test]
    fn test_add_page() {
        let tree = nested();
        assert_eq!(tree.add_page(ObjectId::new(7, 0)).unwrap(), 3);
        assert_eq!(tree.count().unwrap(), 4);
        assert_eq!(tree.get(3).unwrap(), ObjectId::new(7, 0));

        let root = tree.store.resolve(ObjectId::new(2, 0)).unwrap();
        assert_eq!(root.as_dict().unwrap().get_integer("Count"), Some(4));
        let page = tree.store.resolve(ObjectId::new(7, 0)).unwrap();
        assert_eq!(
            page.as_dict().unwrap().get_reference("Parent"),
            Some(ObjectId::new(2, 0))
        );
    }

    #[test]
    fn test_add_page_requires_stable_address() {
        let tree = nested();
        assert!(matches!(
            tree.add_page(ObjectId::new(40, 0)),
            Err(ParseError::ObjectNotFound(_))
        ));
        assert!(tree.add_page(ObjectId::new(4, 0)).is_err());
        assert!(tree.add_page(ObjectId::new(5, 0)).is_err());

        // A page created in memory gets an address first
        let mut dict = PdfDictionary::new();
        dict.insert("Type".to_string(), PdfObject::Name(crate::parser::PdfName::new("Page")));
        let id = tree.store.add_object(PdfObject::Dictionary(dict)).unwrap();
        assert_eq!(tree.add_page(id).unwrap(), 3);
        assert_eq!(tree.find_index_of(id).unwrap(), Some(3));
    }
}
