//! Leaf entries: typed, scaled scalars.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::EntryId;
use crate::codec::{decode_value, RawScalar};

/// Largest supported number of decimals.
pub const MAX_DECIMALS: u8 = 10;

// ── Type tag ──────────────────────────────────────────────────────────────

/// Scalar type of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Bool,
    Int,
    Float,
    #[serde(alias = "str")]
    String,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Bool => "bool",
            ItemType::Int => "int",
            ItemType::Float => "float",
            ItemType::String => "string",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ItemType::Int | ItemType::Float)
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Decoded value ─────────────────────────────────────────────────────────

/// Application-level value of an item, after scale factors are applied.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl ItemValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ItemValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ItemValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ItemValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ItemValue::Bool(_) => "bool",
            ItemValue::Number(_) => "number",
            ItemValue::String(_) => "string",
        }
    }

    /// JSON form used by views. Whole numbers render without a fraction.
    pub fn to_json(&self) -> Value {
        match self {
            ItemValue::Bool(b) => Value::Bool(*b),
            ItemValue::Number(n) => number_to_json(*n),
            ItemValue::String(s) => Value::String(s.clone()),
        }
    }
}

/// Largest magnitude at which every integer is exactly representable in f64.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

pub(crate) fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

impl From<bool> for ItemValue {
    fn from(b: bool) -> Self {
        ItemValue::Bool(b)
    }
}

impl From<f64> for ItemValue {
    fn from(n: f64) -> Self {
        ItemValue::Number(n)
    }
}

impl From<i64> for ItemValue {
    fn from(n: i64) -> Self {
        ItemValue::Number(n as f64)
    }
}

impl From<i32> for ItemValue {
    fn from(n: i32) -> Self {
        ItemValue::Number(f64::from(n))
    }
}

impl From<&str> for ItemValue {
    fn from(s: &str) -> Self {
        ItemValue::String(s.to_string())
    }
}

impl From<String> for ItemValue {
    fn from(s: String) -> Self {
        ItemValue::String(s)
    }
}

// ── Metadata errors ───────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MetadataError {
    #[error("decimals must be within 0..={MAX_DECIMALS}, got {0}")]
    InvalidDecimals(u8),
    #[error("scalefactor must be finite and nonzero, got {0}")]
    InvalidScalefactor(f64),
}

// ── Item ──────────────────────────────────────────────────────────────────

/// A typed leaf entry.
///
/// `value` stays `None` until the item is synchronized for the first time,
/// so an unsynchronized item is distinguishable from a genuine `0`/`false`.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub(crate) key: String,
    pub(crate) parent: Option<EntryId>,
    pub name: String,
    /// Display unit, meaningful for numeric types only.
    pub unit: String,
    pub(crate) kind: ItemType,
    pub value: Option<ItemValue>,
    /// Last wire scalar received from (or sent to) the device.
    pub raw_value: Option<Value>,
    pub(crate) decimals: u8,
    pub(crate) scalefactor: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub readonly: bool,
    pub fresh: bool,
}

impl Item {
    /// Create an item with default metadata: no name or unit, no bounds,
    /// `scalefactor = 1`, `decimals = 0`, writable, not fresh.
    pub fn new(key: impl Into<String>, kind: ItemType) -> Self {
        Self {
            key: key.into(),
            parent: None,
            name: String::new(),
            unit: String::new(),
            kind,
            value: None,
            raw_value: None,
            decimals: 0,
            scalefactor: 1.0,
            min: None,
            max: None,
            readonly: false,
            fresh: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// Set the scale factor without touching `decimals`.
    ///
    /// # Errors
    ///
    /// Rejects zero and non-finite factors.
    pub fn with_scalefactor(mut self, scalefactor: f64) -> Result<Self, MetadataError> {
        self.set_scalefactor(scalefactor)?;
        Ok(self)
    }

    /// Set `decimals` as stored metadata, without the int decimal shift.
    ///
    /// Used when metadata is loaded as a whole (configuration), where
    /// `scalefactor` is given alongside.
    pub fn with_decimals(mut self, decimals: u8) -> Result<Self, MetadataError> {
        check_decimals(decimals)?;
        self.decimals = decimals;
        Ok(self)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn parent(&self) -> Option<EntryId> {
        self.parent
    }

    /// Changed only through [`Item::set_type`], which keeps `value` in step.
    pub fn kind(&self) -> ItemType {
        self.kind
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn scalefactor(&self) -> f64 {
        self.scalefactor
    }

    pub fn is_numeric(&self) -> bool {
        self.kind.is_numeric()
    }

    pub fn set_scalefactor(&mut self, scalefactor: f64) -> Result<(), MetadataError> {
        if scalefactor == 0.0 || !scalefactor.is_finite() {
            return Err(MetadataError::InvalidScalefactor(scalefactor));
        }
        self.scalefactor = scalefactor;
        Ok(())
    }

    /// Change the number of decimals.
    ///
    /// For `int` items the wire carries a scaled integer, so `scalefactor`
    /// follows the shift: `scalefactor * 10^(new - old)`. Going from
    /// `decimals = 1, scalefactor = 10` to `decimals = 0` yields
    /// `scalefactor = 1`. The stored `value` is left as it is.
    pub fn set_decimals(&mut self, decimals: u8) -> Result<(), MetadataError> {
        check_decimals(decimals)?;
        if self.kind == ItemType::Int {
            let shift = i32::from(decimals) - i32::from(self.decimals);
            let shifted = if shift >= 0 {
                self.scalefactor * 10f64.powi(shift)
            } else {
                self.scalefactor / 10f64.powi(-shift)
            };
            self.set_scalefactor(shifted)?;
        }
        self.decimals = decimals;
        Ok(())
    }

    /// Change the item type. A stored wire value is decoded again under the
    /// new type so `value` keeps matching `raw_value`.
    pub fn set_type(&mut self, kind: ItemType) {
        self.kind = kind;
        if let Some(raw) = &self.raw_value {
            let raw = RawScalar::from_json(raw);
            self.value = Some(decode_value(&raw, self));
        }
    }

    /// Whether `value` satisfies the advisory `[min, max]` bounds.
    pub fn in_range(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }

    /// Render the value for display: `decimals` digits plus unit for numbers,
    /// `-` while unsynchronized.
    ///
    /// ```
    /// use jsonwatch::tree::{Item, ItemType, ItemValue};
    ///
    /// let mut item = Item::new("temp", ItemType::Float)
    ///     .with_unit("°C")
    ///     .with_decimals(2)
    ///     .unwrap();
    /// assert_eq!(item.format_value(), "-");
    /// item.value = Some(ItemValue::Number(23.5));
    /// assert_eq!(item.format_value(), "23.50 °C");
    /// ```
    pub fn format_value(&self) -> String {
        match &self.value {
            None => "-".to_string(),
            Some(ItemValue::Bool(b)) => b.to_string(),
            Some(ItemValue::String(s)) => s.clone(),
            Some(ItemValue::Number(n)) => {
                let digits = usize::from(self.decimals);
                if self.unit.is_empty() {
                    format!("{n:.digits$}")
                } else {
                    format!("{n:.digits$} {}", self.unit)
                }
            }
        }
    }
}

fn check_decimals(decimals: u8) -> Result<(), MetadataError> {
    if decimals > MAX_DECIMALS {
        return Err(MetadataError::InvalidDecimals(decimals));
    }
    Ok(())
}
