//! Persisted tree configuration.
//!
//! A configuration document describes the tree's shape and item metadata,
//! never live values:
//!
//! ```json
//! {
//!   "pid": {
//!     "name": "PID controller",
//!     "children": {
//!       "kp": {"type": "int", "scalefactor": 10, "decimals": 1, "min": 0, "max": 100},
//!       "kd": {"type": "float", "readonly": true}
//!     }
//!   },
//!   "temp": {"type": "float", "unit": "°C", "decimals": 1}
//! }
//! ```
//!
//! Entries with `children` are nodes, entries with `type` are items.

use std::io;
use std::path::Path as FsPath;

use indexmap::IndexMap;
use jsonwatch_path::{format_path, join, Path};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tree::{Entry, EntryId, Item, ItemType, MetadataError, Node, Tree, TreeError};

// ── Error ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("{path:?}: scalefactor must be finite and nonzero, got {value}")]
    InvalidScalefactor { path: String, value: f64 },
    #[error("{path:?}: too many decimals ({value})")]
    InvalidDecimals { path: String, value: u8 },
    #[error("cannot read configuration: {0}")]
    Io(#[from] io::Error),
}

// ── Document types ────────────────────────────────────────────────────────

/// Top level of a configuration document: child key → entry.
pub type TreeConfig = IndexMap<String, EntryConfig>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryConfig {
    Node(NodeConfig),
    Item(ItemConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub children: TreeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ItemConfig {
    #[serde(rename = "type")]
    pub kind: ItemType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub decimals: u8,
    #[serde(default = "unit_scale", skip_serializing_if = "is_unit_scale")]
    pub scalefactor: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub readonly: bool,
}

fn unit_scale() -> f64 {
    1.0
}

fn is_unit_scale(value: &f64) -> bool {
    *value == 1.0
}

fn is_zero(value: &u8) -> bool {
    *value == 0
}

fn is_false(value: &bool) -> bool {
    !*value
}

// ── Load ──────────────────────────────────────────────────────────────────

/// Parse a configuration document.
pub fn parse(text: &str) -> Result<TreeConfig, ConfigError> {
    Ok(serde_json::from_str(text)?)
}

/// Build a fresh tree from a parsed configuration. Items start unsynchronized.
pub fn build(config: &TreeConfig) -> Result<Tree, ConfigError> {
    let mut tree = Tree::new();
    let root = tree.root();
    add_children(&mut tree, root, &Vec::new(), config)?;
    Ok(tree)
}

/// Parse and build in one step.
///
/// ```
/// let tree = jsonwatch::config::load_str(r#"{"kp": {"type": "int", "scalefactor": 10}}"#).unwrap();
/// let kp = tree.item(tree.resolve("kp").unwrap()).unwrap();
/// assert_eq!(kp.scalefactor(), 10.0);
/// assert_eq!(kp.value, None);
/// ```
pub fn load_str(text: &str) -> Result<Tree, ConfigError> {
    build(&parse(text)?)
}

pub fn load_file(path: impl AsRef<FsPath>) -> Result<Tree, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    load_str(&text)
}

fn add_children(
    tree: &mut Tree,
    parent: EntryId,
    prefix: &Path,
    children: &TreeConfig,
) -> Result<(), ConfigError> {
    for (key, entry) in children {
        let path = join(prefix, key);
        match entry {
            EntryConfig::Node(node) => {
                let id = tree.add_node(parent, Node::new(key.clone()).with_name(node.name.clone()))?;
                add_children(tree, id, &path, &node.children)?;
            }
            EntryConfig::Item(item) => {
                tree.add_item(parent, item_from_config(key, &path, item)?)?;
            }
        }
    }
    Ok(())
}

fn item_from_config(key: &str, path: &Path, config: &ItemConfig) -> Result<Item, ConfigError> {
    let at = |e: MetadataError| match e {
        MetadataError::InvalidScalefactor(value) => {
            ConfigError::InvalidScalefactor { path: format_path(path), value }
        }
        MetadataError::InvalidDecimals(value) => {
            ConfigError::InvalidDecimals { path: format_path(path), value }
        }
    };
    Ok(Item::new(key, config.kind)
        .with_name(config.name.clone())
        .with_unit(config.unit.clone())
        .with_range(config.min, config.max)
        .with_readonly(config.readonly)
        .with_scalefactor(config.scalefactor)
        .map_err(at)?
        .with_decimals(config.decimals)
        .map_err(at)?)
}

// ── Dump ──────────────────────────────────────────────────────────────────

/// Describe the tree's current shape and metadata. Values are not included.
pub fn dump(tree: &Tree) -> TreeConfig {
    dump_children(tree, tree.root())
}

pub fn dump_string(tree: &Tree) -> Result<String, ConfigError> {
    Ok(serde_json::to_string_pretty(&dump(tree))?)
}

fn dump_children(tree: &Tree, parent: EntryId) -> TreeConfig {
    let mut out = TreeConfig::new();
    for id in tree.children(parent) {
        match tree.get(id) {
            Some(Entry::Node(node)) => {
                out.insert(
                    node.key().to_string(),
                    EntryConfig::Node(NodeConfig {
                        name: node.name.clone(),
                        children: dump_children(tree, id),
                    }),
                );
            }
            Some(Entry::Item(item)) => {
                out.insert(
                    item.key().to_string(),
                    EntryConfig::Item(ItemConfig {
                        kind: item.kind(),
                        name: item.name.clone(),
                        unit: item.unit.clone(),
                        decimals: item.decimals(),
                        scalefactor: item.scalefactor(),
                        min: item.min,
                        max: item.max,
                        readonly: item.readonly,
                    }),
                );
            }
            None => {}
        }
    }
    out
}
