//! Outbound side: application value → wire scalar → protocol line.

use serde_json::{Map, Number, Value};

use super::CodecError;
use crate::tree::{Item, ItemType, ItemValue};

/// Convert an application value into the raw scalar the device expects.
///
/// Numeric values are multiplied by the item's `scalefactor`; `int` items
/// round the product to the nearest integer.
///
/// # Errors
///
/// [`CodecError::TypeMismatch`] if the value's kind does not fit the item,
/// [`CodecError::NotFinite`] if the scaled number is NaN or infinite.
///
/// ```
/// use jsonwatch::codec::encode_raw;
/// use jsonwatch::tree::{Item, ItemType, ItemValue};
/// use serde_json::json;
///
/// let kp = Item::new("kp", ItemType::Int).with_scalefactor(10.0).unwrap();
/// assert_eq!(encode_raw(&ItemValue::Number(5.5), &kp).unwrap(), json!(55));
/// ```
pub fn encode_raw(value: &ItemValue, item: &Item) -> Result<Value, CodecError> {
    let mismatch = || CodecError::TypeMismatch { expected: item.kind, found: value.kind_name() };
    match (item.kind, value) {
        (ItemType::Int, ItemValue::Number(n)) => {
            let scaled = (n * item.scalefactor()).round();
            if !scaled.is_finite() || scaled.abs() > i64::MAX as f64 {
                return Err(CodecError::NotFinite(scaled));
            }
            Ok(Value::from(scaled as i64))
        }
        (ItemType::Float, ItemValue::Number(n)) => {
            let scaled = n * item.scalefactor();
            Number::from_f64(scaled)
                .map(Value::Number)
                .ok_or(CodecError::NotFinite(scaled))
        }
        (ItemType::Bool, ItemValue::Bool(b)) => Ok(Value::Bool(*b)),
        (ItemType::String, ItemValue::String(s)) => Ok(Value::String(s.clone())),
        _ => Err(mismatch()),
    }
}

/// Wrap a raw scalar in the minimal object that mirrors `path`.
///
/// ```
/// use jsonwatch::codec::encode_edit;
/// use serde_json::json;
///
/// let path = vec!["settings".to_string(), "kd".to_string()];
/// assert_eq!(encode_edit(&path, json!(10)), r#"{"settings":{"kd":10}}"#);
/// ```
pub fn encode_edit(path: &[String], raw: Value) -> String {
    let nested = path.iter().rev().fold(raw, |inner, step| {
        let mut map = Map::new();
        map.insert(step.clone(), inner);
        Value::Object(map)
    });
    nested.to_string()
}

/// A single-member control message such as `{"resetpid":1}`.
pub fn encode_command(key: &str, value: impl Into<Value>) -> String {
    let mut map = Map::new();
    map.insert(key.to_string(), value.into());
    Value::Object(map).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(text: &str) -> Vec<String> {
        jsonwatch_path::parse_path(text)
    }

    #[test]
    fn int_items_round_after_scaling() {
        let item = Item::new("kp", ItemType::Int).with_scalefactor(10.0).unwrap();
        assert_eq!(encode_raw(&ItemValue::Number(5.54), &item).unwrap(), json!(55));
        assert_eq!(encode_raw(&ItemValue::Number(-0.26), &item).unwrap(), json!(-3));
        let plain = Item::new("n", ItemType::Int);
        assert_eq!(encode_raw(&ItemValue::Number(7.0), &plain).unwrap(), json!(7));
    }

    #[test]
    fn float_items_keep_fraction() {
        let item = Item::new("t", ItemType::Float).with_scalefactor(2.0).unwrap();
        assert_eq!(encode_raw(&ItemValue::Number(1.25), &item).unwrap(), json!(2.5));
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let flag = Item::new("on", ItemType::Bool);
        assert_eq!(
            encode_raw(&ItemValue::Number(1.0), &flag),
            Err(CodecError::TypeMismatch { expected: ItemType::Bool, found: "number" })
        );
        let number = Item::new("n", ItemType::Float);
        assert!(encode_raw(&ItemValue::String("x".into()), &number).is_err());
    }

    #[test]
    fn non_finite_is_rejected() {
        let item = Item::new("t", ItemType::Float);
        assert!(matches!(
            encode_raw(&ItemValue::Number(f64::INFINITY), &item),
            Err(CodecError::NotFinite(_))
        ));
        let item = Item::new("n", ItemType::Int);
        assert!(matches!(
            encode_raw(&ItemValue::Number(f64::NAN), &item),
            Err(CodecError::NotFinite(_))
        ));
    }

    #[test]
    fn edit_lines_mirror_the_path() {
        assert_eq!(encode_edit(&p("kp"), json!(55)), r#"{"kp":55}"#);
        assert_eq!(encode_edit(&p("a/b/c"), json!(true)), r#"{"a":{"b":{"c":true}}}"#);
        assert_eq!(encode_edit(&p("name"), json!("x\"y")), r#"{"name":"x\"y"}"#);
    }

    #[test]
    fn command_lines() {
        assert_eq!(encode_command("resetpid", 1), r#"{"resetpid":1}"#);
    }
}
