//! Local edits: validation, wire encoding and the optimistic mirror update.
//!
//! An edit is split in two so nothing is sent before it is known to be
//! valid. [`prepare_edit`] is pure: it checks the target and the value and
//! produces the wire line. [`apply_edit`] then mirrors the change into the
//! tree, after the caller has written the line to the device.

use jsonwatch_path::{format_path, Path, ToPath};
use serde_json::Value;
use thiserror::Error;

use crate::codec::{decode_value, encode_edit, encode_raw, CodecError, RawScalar};
use crate::events::{Event, EventQueue, Origin};
use crate::tree::{Entry, EntryId, ItemType, ItemValue, Tree};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EditError {
    #[error("no entry at {0:?}")]
    NotFound(String),
    #[error("{0:?} is a node, not an item")]
    NotAnItem(String),
    #[error("{0:?} is read-only")]
    ReadOnly(String),
    #[error("value {value} outside [{}, {}]", fmt_bound(*min), fmt_bound(*max))]
    OutOfRange {
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },
    #[error("a {found} value does not fit a {expected} item")]
    TypeMismatch { expected: ItemType, found: &'static str },
    #[error("not connected")]
    NotConnected,
    #[error("connection lost")]
    ConnectionLost,
}

fn fmt_bound(bound: Option<f64>) -> String {
    bound.map_or_else(|| "-".to_string(), |b| b.to_string())
}

/// A validated edit, ready to be written and mirrored.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedEdit {
    pub id: EntryId,
    pub path: Path,
    /// Wire scalar sent to the device.
    pub raw: Value,
    /// What the device will echo back once `raw` is decoded again.
    pub value: ItemValue,
    /// Protocol line without the trailing newline.
    pub line: String,
}

/// Validate an edit of the item at `path` and encode its wire line.
///
/// Checks run in order: the target must exist and be an item, must not be
/// read-only, the value kind must fit the item type, and numeric values
/// must be finite and within `[min, max]`.
///
/// ```
/// use jsonwatch::command::prepare_edit;
/// use jsonwatch::tree::{Item, ItemType, Tree};
///
/// let mut tree = Tree::new();
/// let root = tree.root();
/// tree.add_item(root, Item::new("kp", ItemType::Int).with_scalefactor(10.0).unwrap()).unwrap();
///
/// let edit = prepare_edit(&tree, "kp", 5.5).unwrap();
/// assert_eq!(edit.line, r#"{"kp":55}"#);
/// ```
pub fn prepare_edit<P: ToPath + ?Sized>(
    tree: &Tree,
    path: &P,
    value: impl Into<ItemValue>,
) -> Result<PreparedEdit, EditError> {
    let path = path.to_path().map_err(|e| EditError::NotFound(e.to_string()))?;
    let value = value.into();
    let id = tree
        .resolve_steps(&path)
        .map_err(|_| EditError::NotFound(format_path(&path)))?;
    let item = match tree.get(id) {
        Some(Entry::Item(item)) => item,
        Some(Entry::Node(_)) => return Err(EditError::NotAnItem(format_path(&path))),
        None => return Err(EditError::NotFound(format_path(&path))),
    };
    if item.readonly {
        return Err(EditError::ReadOnly(format_path(&path)));
    }
    let fits = match (&value, item.kind) {
        (ItemValue::Number(_), kind) => kind.is_numeric(),
        (ItemValue::Bool(_), kind) => kind == ItemType::Bool,
        (ItemValue::String(_), kind) => kind == ItemType::String,
    };
    if !fits {
        return Err(EditError::TypeMismatch { expected: item.kind, found: value.kind_name() });
    }
    if let ItemValue::Number(n) = value {
        if !n.is_finite() || !item.in_range(n) {
            return Err(EditError::OutOfRange { value: n, min: item.min, max: item.max });
        }
    }
    let raw = encode_raw(&value, item).map_err(|e| match e {
        CodecError::TypeMismatch { expected, found } => EditError::TypeMismatch { expected, found },
        _ => EditError::OutOfRange {
            value: value.as_f64().unwrap_or(f64::NAN),
            min: item.min,
            max: item.max,
        },
    })?;
    let echoed = decode_value(&RawScalar::from_json(&raw), item);
    let line = encode_edit(&path, raw.clone());
    Ok(PreparedEdit { id, path, raw, value: echoed, line })
}

/// Mirror a prepared edit into the tree ahead of the device echo.
///
/// `fresh` is left alone: the value is only confirmed once the device
/// reports it.
///
/// # Errors
///
/// [`EditError::NotFound`] if the item was removed since the edit was
/// prepared.
pub fn apply_edit(
    tree: &mut Tree,
    edit: &PreparedEdit,
    events: &mut EventQueue,
) -> Result<(), EditError> {
    let item = tree
        .item_mut(edit.id)
        .ok_or_else(|| EditError::NotFound(format_path(&edit.path)))?;
    item.raw_value = Some(edit.raw.clone());
    item.value = Some(edit.value.clone());
    events.push(Event::ValueChanged {
        path: edit.path.clone(),
        id: edit.id,
        value: edit.value.clone(),
        origin: Origin::Local,
    });
    Ok(())
}
