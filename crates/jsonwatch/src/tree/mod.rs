//! The live tree: nodes and typed leaf items, addressed by path.
//!
//! # Storage
//!
//! All entries live in an arena owned by [`Tree`]. Instead of pointers, an
//! entry refers to its parent and children through [`EntryId`]s (slot index
//! plus generation), so the child → parent back-reference never owns
//! anything and a stale id can never alias an entry that later reuses the
//! same slot.
//!
//! # Ordering
//!
//! Children are kept in an [`IndexMap`] keyed by child key. Insertion order
//! is the display order, and [`Tree::index_of`] / [`Tree::at`] translate
//! between identity and row position. Removal shifts later siblings up, so
//! positions must be recomputed after every mutation rather than cached.

mod error;
pub mod item;

pub use error::TreeError;
pub use item::{Item, ItemType, ItemValue, MetadataError, MAX_DECIMALS};

use indexmap::IndexMap;
use jsonwatch_path::{dotted, format_path, Path, ToPath};
use serde_json::{Map, Value};

// ── Identity ──────────────────────────────────────────────────────────────

/// Stable identity of a tree entry.
///
/// Ids compare by identity, never by content: two items with identical
/// metadata and values are still distinct entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId {
    index: u32,
    generation: u32,
}

// ── Entries ───────────────────────────────────────────────────────────────

/// A container entry grouping children by unique key.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub(crate) key: String,
    pub(crate) parent: Option<EntryId>,
    pub name: String,
    pub fresh: bool,
    pub(crate) children: IndexMap<String, EntryId>,
    /// Last merge cycle that evaluated this node's children.
    pub(crate) touched: u64,
}

impl Node {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            parent: None,
            name: String::new(),
            fresh: false,
            children: IndexMap::new(),
            touched: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn parent(&self) -> Option<EntryId> {
        self.parent
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Child ids in display order.
    pub fn children(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.children.values().copied()
    }

    pub fn child(&self, key: &str) -> Option<EntryId> {
        self.children.get(key).copied()
    }
}

/// A tree entry: either a node or an item.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Node(Node),
    Item(Item),
}

impl Entry {
    pub fn key(&self) -> &str {
        match self {
            Entry::Node(n) => &n.key,
            Entry::Item(i) => &i.key,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Entry::Node(n) => &n.name,
            Entry::Item(i) => &i.name,
        }
    }

    pub fn fresh(&self) -> bool {
        match self {
            Entry::Node(n) => n.fresh,
            Entry::Item(i) => i.fresh,
        }
    }

    pub fn parent(&self) -> Option<EntryId> {
        match self {
            Entry::Node(n) => n.parent,
            Entry::Item(i) => i.parent,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Entry::Node(n) => Some(n),
            Entry::Item(_) => None,
        }
    }

    pub fn as_item(&self) -> Option<&Item> {
        match self {
            Entry::Item(i) => Some(i),
            Entry::Node(_) => None,
        }
    }

    pub fn is_item(&self) -> bool {
        matches!(self, Entry::Item(_))
    }

    fn set_key(&mut self, key: String) {
        match self {
            Entry::Node(n) => n.key = key,
            Entry::Item(i) => i.key = key,
        }
    }

    fn set_parent(&mut self, parent: EntryId) {
        match self {
            Entry::Node(n) => n.parent = Some(parent),
            Entry::Item(i) => i.parent = Some(parent),
        }
    }
}

// ── Tree ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Arena-backed live tree.
///
/// The root is a node with an empty key and no parent; it always exists.
#[derive(Debug, Clone)]
pub struct Tree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: EntryId,
    /// Merge cycle counter, incremented once per applied delta.
    cycle: u64,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        let root = Slot { generation: 0, entry: Some(Entry::Node(Node::new(""))) };
        Self {
            slots: vec![root],
            free: Vec::new(),
            root: EntryId { index: 0, generation: 0 },
            cycle: 0,
        }
    }

    pub fn root(&self) -> EntryId {
        self.root
    }

    /// Number of merge cycles applied so far.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub(crate) fn begin_cycle(&mut self) -> u64 {
        self.cycle += 1;
        self.cycle
    }

    /// Number of live entries, root excluded.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.node(self.root).map_or(true, Node::is_empty)
    }

    // ── Access ────────────────────────────────────────────────────────────

    pub fn contains(&self, id: EntryId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: EntryId) -> Option<&Entry> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    pub fn node(&self, id: EntryId) -> Option<&Node> {
        self.get(id).and_then(Entry::as_node)
    }

    pub fn item(&self, id: EntryId) -> Option<&Item> {
        self.get(id).and_then(Entry::as_item)
    }

    pub(crate) fn node_mut(&mut self, id: EntryId) -> Option<&mut Node> {
        match self.get_mut(id)? {
            Entry::Node(n) => Some(n),
            Entry::Item(_) => None,
        }
    }

    /// Mutable access to an item's metadata and value.
    ///
    /// The key is not reachable through this handle; use [`Tree::rename`].
    pub fn item_mut(&mut self, id: EntryId) -> Option<&mut Item> {
        match self.get_mut(id)? {
            Entry::Item(i) => Some(i),
            Entry::Node(_) => None,
        }
    }

    pub fn parent_of(&self, id: EntryId) -> Option<EntryId> {
        self.get(id)?.parent()
    }

    pub fn child(&self, parent: EntryId, key: &str) -> Option<EntryId> {
        self.node(parent)?.child(key)
    }

    // ── Positional access ─────────────────────────────────────────────────

    /// The child at row `index` of `parent`.
    pub fn at(&self, parent: EntryId, index: usize) -> Option<EntryId> {
        self.node(parent)?.children.get_index(index).map(|(_, id)| *id)
    }

    /// Row position of `child` within its parent, consistent with [`Tree::at`].
    pub fn index_of(&self, child: EntryId) -> Option<usize> {
        let entry = self.get(child)?;
        let parent = self.node(entry.parent()?)?;
        parent.children.get_index_of(entry.key())
    }

    pub fn child_count(&self, parent: EntryId) -> usize {
        self.node(parent).map_or(0, Node::len)
    }

    pub fn children(&self, parent: EntryId) -> impl Iterator<Item = EntryId> + '_ {
        self.node(parent).into_iter().flat_map(Node::children)
    }

    // ── Addressing ────────────────────────────────────────────────────────

    /// Resolve a path to an entry. The empty path resolves to the root.
    ///
    /// # Errors
    ///
    /// [`TreeError::Path`] for malformed paths, [`TreeError::NotFound`] if
    /// any step is missing or crosses an item.
    pub fn resolve<P: ToPath + ?Sized>(&self, path: &P) -> Result<EntryId, TreeError> {
        let path = path.to_path()?;
        self.resolve_steps(&path)
    }

    pub(crate) fn resolve_steps(&self, path: &[String]) -> Result<EntryId, TreeError> {
        let mut current = self.root;
        for step in path {
            current = self
                .child(current, step)
                .ok_or_else(|| TreeError::NotFound(format_path(path)))?;
        }
        Ok(current)
    }

    /// Reconstruct the path of an entry by following parent links.
    pub fn path_of(&self, id: EntryId) -> Option<Path> {
        let mut steps = Vec::new();
        let mut current = id;
        loop {
            let entry = self.get(current)?;
            match entry.parent() {
                Some(parent) => {
                    steps.push(entry.key().to_string());
                    current = parent;
                }
                None => break,
            }
        }
        steps.reverse();
        Some(steps)
    }

    /// Ancestors of `id`, nearest first, root last.
    pub fn ancestors(&self, id: EntryId) -> impl Iterator<Item = EntryId> + '_ {
        std::iter::successors(self.parent_of(id), move |current| self.parent_of(*current))
    }

    // ── Mutation ──────────────────────────────────────────────────────────

    pub fn add_node(&mut self, parent: EntryId, node: Node) -> Result<EntryId, TreeError> {
        self.insert(parent, Entry::Node(node))
    }

    pub fn add_item(&mut self, parent: EntryId, item: Item) -> Result<EntryId, TreeError> {
        self.insert(parent, Entry::Item(item))
    }

    fn insert(&mut self, parent: EntryId, mut entry: Entry) -> Result<EntryId, TreeError> {
        let key = entry.key().to_string();
        if key.is_empty() {
            return Err(TreeError::InvalidKey(key));
        }
        let node = self.node(parent).ok_or_else(|| self.not_a_node(parent))?;
        if node.children.contains_key(&key) {
            return Err(TreeError::DuplicateKey(key));
        }
        entry.set_parent(parent);
        let id = self.alloc(entry);
        if let Some(node) = self.node_mut(parent) {
            node.children.insert(key, id);
        }
        Ok(id)
    }

    /// Remove the child `key` of `parent` together with its descendants.
    pub fn remove(&mut self, parent: EntryId, key: &str) -> Result<(), TreeError> {
        let node = self.node_mut(parent).ok_or(TreeError::NotFound(key.to_string()))?;
        let id = node
            .children
            .shift_remove(key)
            .ok_or_else(|| TreeError::NotFound(key.to_string()))?;
        for doomed in self.walk_from(id) {
            self.release(doomed);
        }
        Ok(())
    }

    /// Remove the entry at `path` together with its descendants.
    pub fn remove_path<P: ToPath + ?Sized>(&mut self, path: &P) -> Result<(), TreeError> {
        let path = path.to_path()?;
        let (key, parent_path) = path.split_last().ok_or(TreeError::RootImmutable)?;
        let parent = self.resolve_steps(parent_path)?;
        self.remove(parent, key)
    }

    /// Remove everything below the root.
    pub fn clear(&mut self) {
        let children: Vec<EntryId> = self.children(self.root).collect();
        for child in children {
            for doomed in self.walk_from(child) {
                self.release(doomed);
            }
        }
        if let Some(root) = self.node_mut(self.root) {
            root.children.clear();
            root.fresh = false;
        }
    }

    /// Change the key of an entry in place, keeping its row position.
    pub fn rename(&mut self, id: EntryId, new_key: &str) -> Result<(), TreeError> {
        if new_key.is_empty() {
            return Err(TreeError::InvalidKey(new_key.to_string()));
        }
        let entry = self.get(id).ok_or_else(|| self.not_found(id))?;
        let parent = entry.parent().ok_or(TreeError::RootImmutable)?;
        let old_key = entry.key().to_string();
        if old_key == new_key {
            return Ok(());
        }
        let node = self.node_mut(parent).ok_or(TreeError::NotFound(old_key.clone()))?;
        if node.children.contains_key(new_key) {
            return Err(TreeError::DuplicateKey(new_key.to_string()));
        }
        let position = node
            .children
            .get_index_of(&old_key)
            .ok_or_else(|| TreeError::NotFound(old_key.clone()))?;
        node.children.shift_remove_index(position);
        node.children.shift_insert(position, new_key.to_string(), id);
        if let Some(entry) = self.get_mut(id) {
            entry.set_key(new_key.to_string());
        }
        Ok(())
    }

    // ── Traversal ─────────────────────────────────────────────────────────

    /// Pre-order traversal of `start` and its descendants, in display order.
    pub fn walk_from(&self, start: EntryId) -> Vec<EntryId> {
        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if !self.contains(id) {
                continue;
            }
            out.push(id);
            if let Some(node) = self.node(id) {
                stack.extend(node.children.values().rev().copied());
            }
        }
        out
    }

    /// All items in display order.
    pub fn items(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.walk_from(self.root).into_iter().filter(move |id| {
            self.get(*id).is_some_and(Entry::is_item)
        })
    }

    /// JSON snapshot of the current values. Unsynchronized items are `null`.
    pub fn view(&self) -> Value {
        self.view_of(self.root)
    }

    pub fn view_of(&self, id: EntryId) -> Value {
        match self.get(id) {
            Some(Entry::Node(node)) => {
                let mut map = Map::new();
                for (key, child) in &node.children {
                    map.insert(key.clone(), self.view_of(*child));
                }
                Value::Object(map)
            }
            Some(Entry::Item(item)) => item.value.as_ref().map_or(Value::Null, ItemValue::to_json),
            None => Value::Null,
        }
    }

    /// One row per item: dotted path label and current value.
    pub fn flatten(&self) -> Vec<(String, Option<ItemValue>)> {
        self.items()
            .filter_map(|id| {
                let item = self.item(id)?;
                let path = self.path_of(id)?;
                Some((dotted(&path), item.value.clone()))
            })
            .collect()
    }

    // ── Arena internals ───────────────────────────────────────────────────

    fn alloc(&mut self, entry: Entry) -> EntryId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return EntryId { index, generation: slot.generation };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, entry: Some(entry) });
        EntryId { index, generation: 0 }
    }

    fn release(&mut self, id: EntryId) {
        if id == self.root {
            return;
        }
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.generation == id.generation && slot.entry.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
            }
        }
    }

    fn not_found(&self, id: EntryId) -> TreeError {
        TreeError::NotFound(format!("#{}", id.index))
    }

    fn not_a_node(&self, id: EntryId) -> TreeError {
        match self.path_of(id) {
            Some(path) if self.item(id).is_some() => TreeError::NotANode(format_path(&path)),
            _ => self.not_found(id),
        }
    }
}
