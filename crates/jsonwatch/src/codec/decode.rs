//! Inbound side: protocol line → [`Delta`], raw scalar → [`ItemValue`].

use jsonwatch_path::{Path, MAX_PATH_DEPTH};
use serde_json::{Map, Value};

use super::{CodecError, Delta, DeltaOp, RawScalar};
use crate::tree::{Item, ItemType, ItemValue};

/// Decode one protocol line.
///
/// # Errors
///
/// [`CodecError::MalformedDelta`] if the line is not valid JSON, its top
/// level is not an object, a member key is empty, or nesting is deeper than
/// a path may be.
///
/// ```
/// use jsonwatch::codec::{decode_line, DeltaOp, RawScalar};
///
/// let delta = decode_line(r#"{"temp": 235, "pid": {"kp": 55}}"#).unwrap();
/// assert_eq!(delta.ops()[0], DeltaOp::Leaf(vec!["temp".into()], RawScalar::Int(235)));
/// assert_eq!(delta.ops()[1], DeltaOp::Node(vec!["pid".into()]));
/// assert_eq!(delta.leaves().count(), 2);
/// ```
pub fn decode_line(line: &str) -> Result<Delta, CodecError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| CodecError::MalformedDelta(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(CodecError::MalformedDelta(format!(
            "expected a JSON object, got {}",
            kind_name(&value)
        )));
    };
    let mut delta = Delta::default();
    let mut prefix = Vec::new();
    collect(&map, &mut prefix, &mut delta.ops)?;
    Ok(delta)
}

fn collect(map: &Map<String, Value>, prefix: &mut Path, ops: &mut Vec<DeltaOp>) -> Result<(), CodecError> {
    if prefix.len() >= MAX_PATH_DEPTH {
        return Err(CodecError::MalformedDelta("nesting too deep".to_string()));
    }
    for (key, value) in map {
        if key.is_empty() {
            return Err(CodecError::MalformedDelta("empty member key".to_string()));
        }
        prefix.push(key.clone());
        match value {
            Value::Object(inner) => {
                ops.push(DeltaOp::Node(prefix.clone()));
                collect(inner, prefix, ops)?;
            }
            leaf => ops.push(DeltaOp::Leaf(prefix.clone(), RawScalar::from_json(leaf))),
        }
        prefix.pop();
    }
    Ok(())
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Convert a raw wire scalar into the item's application value.
///
/// Numeric items divide by their `scalefactor`; the result is not rounded,
/// even for `int` items (`55` with `scalefactor = 10` is `5.5`). A scalar of
/// the wrong kind is coerced when that is unambiguous and otherwise kept as
/// text.
pub fn decode_value(raw: &RawScalar, item: &Item) -> ItemValue {
    match item.kind {
        ItemType::Int | ItemType::Float => {
            let number = match raw {
                RawScalar::Int(_) | RawScalar::UInt(_) | RawScalar::Float(_) => raw.as_f64(),
                RawScalar::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                RawScalar::String(s) => s.trim().parse::<f64>().ok(),
            };
            match number {
                Some(n) => ItemValue::Number(n / item.scalefactor()),
                None => ItemValue::String(text_of(raw)),
            }
        }
        ItemType::Bool => match raw {
            RawScalar::Bool(b) => ItemValue::Bool(*b),
            RawScalar::Int(i) => ItemValue::Bool(*i != 0),
            RawScalar::UInt(u) => ItemValue::Bool(*u != 0),
            RawScalar::Float(f) => ItemValue::Bool(*f != 0.0),
            RawScalar::String(s) => match s.as_str() {
                "true" => ItemValue::Bool(true),
                "false" => ItemValue::Bool(false),
                _ => ItemValue::String(s.clone()),
            },
        },
        ItemType::String => ItemValue::String(text_of(raw)),
    }
}

fn text_of(raw: &RawScalar) -> String {
    match raw {
        RawScalar::Bool(b) => b.to_string(),
        RawScalar::Int(i) => i.to_string(),
        RawScalar::UInt(u) => u.to_string(),
        RawScalar::Float(f) => f.to_string(),
        RawScalar::String(s) => s.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> Path {
        jsonwatch_path::parse_path(text)
    }

    #[test]
    fn nested_objects_imply_nodes_in_line_order() {
        let delta = decode_line(r#"{"a": {"b": {"c": 1}, "d": 2.5}, "e": "x"}"#).unwrap();
        assert_eq!(
            delta.ops(),
            &[
                DeltaOp::Node(p("a")),
                DeltaOp::Node(p("a/b")),
                DeltaOp::Leaf(p("a/b/c"), RawScalar::Int(1)),
                DeltaOp::Leaf(p("a/d"), RawScalar::Float(2.5)),
                DeltaOp::Leaf(p("e"), RawScalar::String("x".into())),
            ]
        );
    }

    #[test]
    fn empty_object_is_an_empty_delta() {
        assert!(decode_line("{}").unwrap().is_empty());
        let delta = decode_line(r#"{"n": {}}"#).unwrap();
        assert_eq!(delta.ops(), &[DeltaOp::Node(p("n"))]);
    }

    #[test]
    fn malformed_lines() {
        for line in ["", "not json", "[1,2]", "42", "\"str\"", "{\"a\": 1", r#"{"": 1}"#] {
            assert!(
                matches!(decode_line(line), Err(CodecError::MalformedDelta(_))),
                "{line:?} should be rejected"
            );
        }
    }

    #[test]
    fn keys_with_separators_stay_single_steps() {
        let delta = decode_line(r#"{"a/b": 1}"#).unwrap();
        assert_eq!(delta.ops(), &[DeltaOp::Leaf(vec!["a/b".to_string()], RawScalar::Int(1))]);
    }

    #[test]
    fn numeric_decode_applies_scalefactor() {
        let item = Item::new("kp", ItemType::Int).with_scalefactor(10.0).unwrap();
        assert_eq!(decode_value(&RawScalar::Int(55), &item), ItemValue::Number(5.5));
        let item = Item::new("t", ItemType::Float).with_scalefactor(0.5).unwrap();
        assert_eq!(decode_value(&RawScalar::Float(1.25), &item), ItemValue::Number(2.5));
    }

    #[test]
    fn kind_coercions() {
        let flag = Item::new("on", ItemType::Bool);
        assert_eq!(decode_value(&RawScalar::Int(0), &flag), ItemValue::Bool(false));
        assert_eq!(decode_value(&RawScalar::String("true".into()), &flag), ItemValue::Bool(true));

        let number = Item::new("n", ItemType::Float);
        assert_eq!(decode_value(&RawScalar::String("2.5".into()), &number), ItemValue::Number(2.5));
        assert_eq!(
            decode_value(&RawScalar::String("n/a".into()), &number),
            ItemValue::String("n/a".into())
        );

        let text = Item::new("s", ItemType::String);
        assert_eq!(decode_value(&RawScalar::Int(7), &text), ItemValue::String("7".into()));
    }
}
