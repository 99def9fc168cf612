//! Merge engine: applies decoded deltas to the live tree.
//!
//! Each applied delta is one *cycle*. Within a cycle, ops are applied in
//! line order:
//!
//! 1. the parent node of every assignment is resolved, creating missing
//!    intermediate nodes (`NodeCreated`);
//! 2. unknown leaf keys become items with an inferred type (`ItemCreated`);
//! 3. the raw scalar is decoded with the item's current scale factor and
//!    stored together with the raw wire value;
//! 4. the item and all of its ancestors are marked fresh;
//! 5. `ValueChanged` is emitted for every assignment, whether or not the
//!    value differs from the previous one.
//!
//! Staleness is evaluated lazily: the first time a node is touched in a
//! cycle its direct child items are marked stale, and the items present in
//! the delta are re-marked fresh as they are assigned. Child *nodes* that the
//! delta does not mention keep their flag, so a branch the device did not
//! report this time is left alone while a value that disappeared from an
//! active branch goes stale.
//!
//! The whole delta is checked against the tree before anything is mutated,
//! so a line either applies completely or not at all.

use jsonwatch_path::{format_path, Path};
use thiserror::Error;

use crate::codec::{decode_line, decode_value, CodecError, Delta, DeltaOp};
use crate::events::{Event, EventQueue, Origin};
use crate::tree::{Entry, EntryId, Item, Node, Tree};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MergeError {
    #[error(transparent)]
    Malformed(#[from] CodecError),
    #[error("{path:?} is {found} in the tree but {expected} in the delta")]
    KindConflict {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Summary of one applied cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub cycle: u64,
    pub assignments: usize,
    pub nodes_created: usize,
    pub items_created: usize,
}

/// Decode and apply one protocol line.
///
/// # Errors
///
/// [`MergeError::Malformed`] if the line does not decode, in which case the
/// tree is untouched.
pub fn apply_line(
    tree: &mut Tree,
    line: &str,
    events: &mut EventQueue,
) -> Result<MergeReport, MergeError> {
    let delta = decode_line(line)?;
    apply_delta(tree, &delta, events)
}

/// Apply a decoded delta as one complete cycle.
///
/// # Errors
///
/// [`MergeError::KindConflict`] if the delta treats an existing item as a
/// node or vice versa. Nothing is applied in that case.
pub fn apply_delta(
    tree: &mut Tree,
    delta: &Delta,
    events: &mut EventQueue,
) -> Result<MergeReport, MergeError> {
    check(tree, delta)?;
    let cycle = tree.begin_cycle();
    let mut merge = Merge {
        tree,
        events,
        cycle,
        report: MergeReport { cycle, ..MergeReport::default() },
    };
    for op in delta.ops() {
        match op {
            DeltaOp::Node(path) => {
                let id = merge.ensure_node(path)?;
                merge.touch_with_ancestors(id);
            }
            DeltaOp::Leaf(path, raw) => {
                let Some((key, parent_path)) = path.split_last() else {
                    continue;
                };
                let parent = merge.ensure_node(parent_path)?;
                merge.touch_with_ancestors(parent);
                let id = match merge.tree.child(parent, key) {
                    Some(id) => id,
                    None => merge.create_item(parent, path, Item::new(key.clone(), raw.inferred_type()))?,
                };
                let item = merge
                    .tree
                    .item_mut(id)
                    .ok_or_else(|| conflict(path, "an item", "a node"))?;
                let value = decode_value(raw, item);
                item.raw_value = Some(raw.to_json());
                item.value = Some(value.clone());
                item.fresh = true;
                merge.report.assignments += 1;
                merge.events.push(Event::ValueChanged {
                    path: path.clone(),
                    id,
                    value,
                    origin: Origin::Device,
                });
            }
        }
    }
    let report = merge.report;
    tracing::debug!(
        cycle = report.cycle,
        assignments = report.assignments,
        nodes_created = report.nodes_created,
        items_created = report.items_created,
        "merged delta"
    );
    Ok(report)
}

struct Merge<'a> {
    tree: &'a mut Tree,
    events: &'a mut EventQueue,
    cycle: u64,
    report: MergeReport,
}

impl Merge<'_> {
    fn ensure_node(&mut self, path: &[String]) -> Result<EntryId, MergeError> {
        let mut current = self.tree.root();
        for (depth, step) in path.iter().enumerate() {
            current = match self.tree.child(current, step) {
                Some(id) if self.tree.node(id).is_some() => id,
                Some(_) => return Err(conflict(&path[..=depth], "a node", "an item")),
                None => {
                    let id = self
                        .tree
                        .add_node(current, Node::new(step.clone()))
                        .map_err(|_| conflict(&path[..=depth], "a node", "an item"))?;
                    self.report.nodes_created += 1;
                    self.events.push(Event::NodeCreated { path: path[..=depth].to_vec(), id });
                    id
                }
            };
        }
        Ok(current)
    }

    fn create_item(&mut self, parent: EntryId, path: &Path, item: Item) -> Result<EntryId, MergeError> {
        let id = self
            .tree
            .add_item(parent, item)
            .map_err(|_| conflict(path, "an item", "a node"))?;
        self.report.items_created += 1;
        self.events.push(Event::ItemCreated { path: path.clone(), id });
        Ok(id)
    }

    /// Mark `id` and every ancestor fresh, evaluating each for staleness on
    /// its first touch this cycle.
    fn touch_with_ancestors(&mut self, id: EntryId) {
        let mut chain = vec![id];
        chain.extend(self.tree.ancestors(id));
        for node in chain {
            self.touch(node);
        }
    }

    fn touch(&mut self, id: EntryId) {
        let cycle = self.cycle;
        let Some(node) = self.tree.node_mut(id) else {
            return;
        };
        node.fresh = true;
        if node.touched == cycle {
            return;
        }
        node.touched = cycle;
        let children: Vec<EntryId> = node.children().collect();
        for child in children {
            if let Some(item) = self.tree.item_mut(child) {
                item.fresh = false;
            }
        }
    }
}

/// Verify every op against the current tree shape without mutating it.
fn check(tree: &Tree, delta: &Delta) -> Result<(), MergeError> {
    for op in delta.ops() {
        let path = op.path();
        let mut current = tree.root();
        for (depth, step) in path.iter().enumerate() {
            let Some(child) = tree.child(current, step) else {
                break;
            };
            let last = depth + 1 == path.len();
            let wants_item = last && matches!(op, DeltaOp::Leaf(..));
            match (tree.get(child), wants_item) {
                (Some(Entry::Item(_)), false) => {
                    return Err(conflict(&path[..=depth], "a node", "an item"));
                }
                (Some(Entry::Node(_)), true) => {
                    return Err(conflict(path, "an item", "a node"));
                }
                _ => {}
            }
            current = child;
        }
    }
    Ok(())
}

fn conflict(path: &[String], expected: &'static str, found: &'static str) -> MergeError {
    MergeError::KindConflict { path: format_path(path), expected, found }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{ItemType, ItemValue};
    use serde_json::json;

    fn merge(tree: &mut Tree, line: &str) -> MergeReport {
        let mut events = EventQueue::new();
        apply_line(tree, line, &mut events).unwrap()
    }

    fn fresh(tree: &Tree, path: &str) -> bool {
        tree.get(tree.resolve(path).unwrap()).unwrap().fresh()
    }

    #[test]
    fn first_sight_creates_typed_items() {
        let mut tree = Tree::new();
        let mut events = EventQueue::new();
        let report = apply_line(&mut tree, r#"{"temp": 235}"#, &mut events).unwrap();
        assert_eq!(report.items_created, 1);
        assert_eq!(report.assignments, 1);

        let temp = tree.item(tree.resolve("temp").unwrap()).unwrap();
        assert_eq!(temp.kind(), ItemType::Int);
        assert_eq!(temp.value, Some(ItemValue::Number(235.0)));
        assert_eq!(temp.raw_value, Some(json!(235)));
        assert!(temp.fresh);
        assert!(!temp.readonly);

        let kinds: Vec<&'static str> = events
            .drain()
            .map(|e| match e {
                Event::NodeCreated { .. } => "node",
                Event::ItemCreated { .. } => "item",
                Event::ValueChanged { .. } => "value",
            })
            .collect();
        assert_eq!(kinds, ["item", "value"]);
    }

    #[test]
    fn missing_sibling_goes_stale() {
        let mut tree = Tree::new();
        merge(&mut tree, r#"{"temp": 235}"#);
        merge(&mut tree, r#"{"other": 1}"#);
        assert!(!fresh(&tree, "temp"));
        assert!(fresh(&tree, "other"));
    }

    #[test]
    fn untouched_branch_is_not_evaluated() {
        let mut tree = Tree::new();
        merge(&mut tree, r#"{"a": {"x": 1, "y": 2}, "b": {"z": 3}}"#);
        merge(&mut tree, r#"{"b": {"z": 4}}"#);
        assert!(fresh(&tree, "a"));
        assert!(fresh(&tree, "a/x"));
        assert!(fresh(&tree, "a/y"));
        assert!(fresh(&tree, "b/z"));

        merge(&mut tree, r#"{"a": {"x": 5}}"#);
        assert!(fresh(&tree, "a/x"));
        assert!(!fresh(&tree, "a/y"));
        assert!(fresh(&tree, "b"));
    }

    #[test]
    fn intermediate_nodes_are_created_in_order() {
        let mut tree = Tree::new();
        let mut events = EventQueue::new();
        apply_line(&mut tree, r#"{"pid": {"gains": {"kp": 1.5}}}"#, &mut events).unwrap();
        let paths: Vec<String> = events.drain().map(|e| format_path(e.path())).collect();
        assert_eq!(paths, ["pid", "pid/gains", "pid/gains/kp", "pid/gains/kp"]);
        assert!(fresh(&tree, "pid"));
        assert!(fresh(&tree, "pid/gains"));
    }

    #[test]
    fn value_changed_is_unconditional() {
        let mut tree = Tree::new();
        let mut events = EventQueue::new();
        apply_line(&mut tree, r#"{"t": 1}"#, &mut events).unwrap();
        events.clear();
        apply_line(&mut tree, r#"{"t": 1}"#, &mut events).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events.pop(), Some(Event::ValueChanged { origin: Origin::Device, .. })));
    }

    #[test]
    fn existing_metadata_drives_decode() {
        let mut tree = Tree::new();
        let root = tree.root();
        tree.add_item(root, Item::new("kp", ItemType::Int).with_scalefactor(10.0).unwrap())
            .unwrap();
        merge(&mut tree, r#"{"kp": 55}"#);
        let kp = tree.item(tree.resolve("kp").unwrap()).unwrap();
        assert_eq!(kp.value, Some(ItemValue::Number(5.5)));
        assert_eq!(kp.raw_value, Some(json!(55)));
    }

    #[test]
    fn out_of_range_inbound_is_stored() {
        let mut tree = Tree::new();
        let root = tree.root();
        tree.add_item(root, Item::new("kp", ItemType::Float).with_range(Some(0.0), Some(1.0)))
            .unwrap();
        merge(&mut tree, r#"{"kp": 7.5}"#);
        let kp = tree.item(tree.resolve("kp").unwrap()).unwrap();
        assert_eq!(kp.value, Some(ItemValue::Number(7.5)));
    }

    #[test]
    fn malformed_line_has_no_effect() {
        let mut tree = Tree::new();
        merge(&mut tree, r#"{"t": 1}"#);
        let before = tree.view();
        let cycle = tree.cycle();
        let mut events = EventQueue::new();
        let err = apply_line(&mut tree, r#"{"t": 2"#, &mut events).unwrap_err();
        assert!(matches!(err, MergeError::Malformed(CodecError::MalformedDelta(_))));
        assert_eq!(tree.view(), before);
        assert_eq!(tree.cycle(), cycle);
        assert!(fresh(&tree, "t"));
        assert!(events.is_empty());
    }

    #[test]
    fn kind_conflicts_abort_the_whole_line() {
        let mut tree = Tree::new();
        merge(&mut tree, r#"{"t": 1, "n": {"x": 1}}"#);
        let before = tree.view();
        let mut events = EventQueue::new();

        let err = apply_line(&mut tree, r#"{"fresh": 1, "t": {"deeper": 2}}"#, &mut events)
            .unwrap_err();
        assert_eq!(
            err,
            MergeError::KindConflict { path: "t".into(), expected: "a node", found: "an item" }
        );
        let err = apply_line(&mut tree, r#"{"n": 5}"#, &mut events).unwrap_err();
        assert_eq!(
            err,
            MergeError::KindConflict { path: "n".into(), expected: "an item", found: "a node" }
        );
        assert_eq!(tree.view(), before);
        assert!(tree.resolve("fresh").is_err());
        assert!(events.is_empty());
    }

    #[test]
    fn merge_never_removes() {
        let mut tree = Tree::new();
        merge(&mut tree, r#"{"a": 1, "b": 2}"#);
        merge(&mut tree, r#"{}"#);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.view(), json!({"a": 1, "b": 2}));
    }
}
