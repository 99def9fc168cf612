//! Logic behind the command-line tools.
//!
//! - `jsonwatch-replay` - merge captured device lines and print the result
//! - `jsonwatch-edit`   - validate an edit against a configuration and print
//!   its wire line

use serde_json::Value;

use crate::command::{prepare_edit, EditError};
use crate::config::{self, ConfigError};
use crate::session::Session;
use crate::tree::ItemValue;

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum CliError {
    Config(ConfigError),
    Edit(EditError),
    Json(serde_json::Error),
    Value(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Config(e) => write!(f, "{e}"),
            CliError::Edit(e)   => write!(f, "{e}"),
            CliError::Json(e)   => write!(f, "{e}"),
            CliError::Value(v)  => write!(f, "Unsupported value: {v}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self { CliError::Config(e) }
}

impl From<EditError> for CliError {
    fn from(e: EditError) -> Self { CliError::Edit(e) }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self { CliError::Json(e) }
}

// ── jsonwatch-replay ──────────────────────────────────────────────────────

/// Result of replaying a capture.
#[derive(Debug)]
pub struct Replay {
    /// Final tree values as pretty-printed JSON.
    pub view: String,
    pub applied: usize,
    /// 1-based line number and reason for every rejected line.
    pub rejected: Vec<(usize, String)>,
}

/// Merge every line of `capture` into a tree built from `config_json` (or
/// an empty tree) and render the final state.
pub fn replay(config_json: Option<&str>, capture: &str) -> Result<Replay, CliError> {
    let mut session = match config_json {
        Some(text) => Session::with_tree(config::load_str(text)?),
        None => Session::new(),
    };
    let (applied, rejected) = replay_into(&mut session, capture);
    let view = serde_json::to_string_pretty(&session.tree().view())?;
    Ok(Replay { view, applied, rejected })
}

/// Feed every non-blank line of `capture` into `session`. Nothing consumes
/// the events, so they are dropped after each line.
fn replay_into(session: &mut Session, capture: &str) -> (usize, Vec<(usize, String)>) {
    let mut applied = 0;
    let mut rejected = Vec::new();
    for (index, line) in capture.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match session.apply_line(line) {
            Ok(_) => applied += 1,
            Err(e) => rejected.push((index + 1, e.to_string())),
        }
        session.events_mut().clear();
    }
    (applied, rejected)
}

// ── jsonwatch-edit ────────────────────────────────────────────────────────

/// Interpret a command-line value: JSON scalars as themselves, anything that
/// is not valid JSON as a bare string.
pub fn parse_value(text: &str) -> Result<ItemValue, CliError> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Bool(b)) => Ok(ItemValue::Bool(b)),
        Ok(Value::Number(n)) => n
            .as_f64()
            .map(ItemValue::Number)
            .ok_or_else(|| CliError::Value(text.to_string())),
        Ok(Value::String(s)) => Ok(ItemValue::String(s)),
        Ok(_) => Err(CliError::Value(text.to_string())),
        Err(_) => Ok(ItemValue::String(text.to_string())),
    }
}

/// Validate an edit of `path` against the configuration and return the
/// line that would be sent to the device.
pub fn edit_line(config_json: &str, path: &str, value: &str) -> Result<String, CliError> {
    let tree = config::load_str(config_json)?;
    let edit = prepare_edit(&tree, path, parse_value(value)?)?;
    Ok(edit.line)
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "kp": {"type": "int", "scalefactor": 10, "min": 0, "max": 100},
        "settings": {"children": {"kd": {"type": "float", "readonly": true}}}
    }"#;

    #[test]
    fn replay_without_config_infers_everything() {
        let out = replay(None, "{\"t\": 1}\n\nnot json\n{\"t\": 2, \"on\": true}\n").unwrap();
        assert_eq!(out.applied, 2);
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.rejected[0].0, 3);
        let view: Value = serde_json::from_str(&out.view).unwrap();
        assert_eq!(view, serde_json::json!({"t": 2, "on": true}));
    }

    #[test]
    fn replay_does_not_accumulate_events() {
        let mut session = Session::new();
        let capture = "{\"t\": 1, \"n\": {\"x\": 2}}\n".repeat(50);
        let (applied, rejected) = replay_into(&mut session, &capture);
        assert_eq!((applied, rejected.len()), (50, 0));
        assert!(session.drain_events().is_empty());
    }

    #[test]
    fn replay_applies_configured_scaling() {
        let out = replay(Some(CONFIG), "{\"kp\": 55}").unwrap();
        let view: Value = serde_json::from_str(&out.view).unwrap();
        assert_eq!(view["kp"], 5.5);
        assert_eq!(view["settings"]["kd"], Value::Null);
    }

    #[test]
    fn edit_line_encodes_valid_edits() {
        assert_eq!(edit_line(CONFIG, "kp", "5.5").unwrap(), r#"{"kp":55}"#);
    }

    #[test]
    fn edit_line_reports_validation_errors() {
        assert!(matches!(
            edit_line(CONFIG, "kp", "150"),
            Err(CliError::Edit(EditError::OutOfRange { .. }))
        ));
        assert!(matches!(
            edit_line(CONFIG, "settings/kd", "1.0"),
            Err(CliError::Edit(EditError::ReadOnly(_)))
        ));
    }

    #[test]
    fn values_parse_as_json_then_text() {
        assert_eq!(parse_value("true").unwrap(), ItemValue::Bool(true));
        assert_eq!(parse_value("2.5").unwrap(), ItemValue::Number(2.5));
        assert_eq!(parse_value("\"7\"").unwrap(), ItemValue::String("7".into()));
        assert_eq!(parse_value("idle").unwrap(), ItemValue::String("idle".into()));
        assert!(parse_value("[1]").is_err());
    }
}
