//! Row identities handed out by the instruction compilers.
//!
//! A [`RefId`] starts empty and is filled in exactly once, when the row it
//! stands for is inserted. Clones share the same slot, so the id becomes
//! visible through every copy handed to the caller. A [`RefTree`] mirrors the
//! shape of a nested create and lets callers address generated ids by path.
use std::fmt;
use std::sync::{Arc, OnceLock};

// so regular expressions don't have to be recompiled
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

use crate::datatype::OtherHasher;

lazy_static! {
    static ref SEGMENT: Regex = Regex::new(r"^([@A-Za-z_][A-Za-z0-9_\-]*)(?:\[(\d+)\])?$").unwrap();
}

#[derive(Clone, Default)]
pub struct RefId {
    slot: Arc<OnceLock<i64>>,
}

impl RefId {
    /// An identifier still waiting for its row.
    pub fn new() -> Self {
        Self::default()
    }
    /// An identifier of a row that already exists.
    pub fn from_id(id: i64) -> Self {
        let slot = OnceLock::new();
        let _ = slot.set(id);
        Self { slot: Arc::new(slot) }
    }
    pub fn id(&self) -> Option<i64> {
        self.slot.get().copied()
    }
    pub fn is_assigned(&self) -> bool {
        self.slot.get().is_some()
    }
    /// Fills the slot. Returns false if it was already filled.
    pub(crate) fn assign(&self, id: i64) -> bool {
        self.slot.set(id).is_ok()
    }
}

impl From<i64> for RefId {
    fn from(id: i64) -> Self {
        RefId::from_id(id)
    }
}

impl PartialEq for RefId {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot) || (self.id().is_some() && self.id() == other.id())
    }
}

impl fmt::Debug for RefId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.id() {
            Some(id) => write!(f, "RefId({})", id),
            None => write!(f, "RefId(?)"),
        }
    }
}
impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.id() {
            Some(id) => write!(f, "{}", id),
            None => write!(f, "?"),
        }
    }
}

/// Ids of a nested creation. Owned single references are kept under `refs`,
/// owned collections under `cols` in declaration order.
#[derive(Debug, Clone, Default)]
pub struct RefTree {
    root: RefId,
    refs: HashMap<String, RefTree, OtherHasher>,
    cols: HashMap<String, Vec<RefTree>, OtherHasher>,
}

impl RefTree {
    pub fn new(root: RefId) -> Self {
        Self {
            root,
            refs: HashMap::default(),
            cols: HashMap::default(),
        }
    }
    pub fn root(&self) -> &RefId {
        &self.root
    }
    pub(crate) fn push_ref(&mut self, name: &str, tree: RefTree) {
        self.refs.insert(name.to_owned(), tree);
    }
    pub(crate) fn push_col(&mut self, name: &str, tree: RefTree) {
        self.cols.entry(name.to_owned()).or_default().push(tree);
    }
    /// Resolves a path such as `address.country` or `details[1]` to a subtree.
    /// A collection segment without an index addresses its first element.
    pub fn tree(&self, path: &str) -> Option<&RefTree> {
        let mut current = self;
        for segment in path.split('.') {
            let captures = SEGMENT.captures(segment)?;
            let name = captures.get(1)?.as_str();
            current = match captures.get(2) {
                Some(index) => {
                    let index: usize = index.as_str().parse().ok()?;
                    current.cols.get(name)?.get(index)?
                }
                None => match current.refs.get(name) {
                    Some(tree) => tree,
                    None => current.cols.get(name)?.first()?,
                },
            };
        }
        Some(current)
    }
    pub fn find(&self, path: &str) -> Option<&RefId> {
        self.tree(path).map(|t| t.root())
    }
    /// The element `index` of the collection found at `path`.
    pub fn find_at(&self, path: &str, index: usize) -> Option<&RefId> {
        let (parent, name) = match path.rsplit_once('.') {
            Some((parent, name)) => (self.tree(parent)?, name),
            None => (self, path),
        };
        parent.cols.get(name)?.get(index).map(|t| t.root())
    }
    /// Number of created elements under an owned collection.
    pub fn count(&self, name: &str) -> usize {
        self.cols.get(name).map_or(0, |c| c.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOp {
    Add,
    Del,
}

impl fmt::Display for LinkOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LinkOp::Add => write!(f, "@add"),
            LinkOp::Del => write!(f, "@del"),
        }
    }
}

/// A link mutation of a linked relation, produced by `@add` and `@del`.
#[derive(Debug, Clone, PartialEq)]
pub struct RefLink {
    pub op: LinkOp,
    pub ref_id: RefId,
}

impl RefLink {
    pub fn new(op: LinkOp, ref_id: RefId) -> Self {
        Self { op, ref_id }
    }
}
