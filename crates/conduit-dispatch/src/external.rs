//! Building [`ExternalCommandSpec`]s from request input.
//!
//! External descriptors read four reserved input keys:
//!
//! | Key | Type | Default |
//! |-----|------|---------|
//! | `argv` | array of scalars, or a shell-quoted string | no arguments |
//! | `stdin` | string (other values are sent as JSON text) | empty |
//! | `background` | bool | `false` |
//! | `capture` | bool | `true` |

use std::path::Path;

use conduit_pipe::ExternalCommandSpec;
use serde_json::Value;

use crate::error::DispatchError;
use crate::value::InputMap;

pub const ARGV_KEY: &str = "argv";
pub const STDIN_KEY: &str = "stdin";
pub const BACKGROUND_KEY: &str = "background";
pub const CAPTURE_KEY: &str = "capture";

/// Maps the reserved keys of `input` onto a command spec for `executable`.
///
/// Every malformed key is listed in the resulting `ArgumentMismatch`.
pub fn command_spec(
    label: &str,
    executable: &Path,
    input: &InputMap,
) -> Result<ExternalCommandSpec, DispatchError> {
    let mut invalid = Vec::new();

    let argv = match present(input, ARGV_KEY) {
        None => Vec::new(),
        Some(value) => argv_of(value).unwrap_or_else(|| {
            invalid.push(ARGV_KEY.to_string());
            Vec::new()
        }),
    };
    let stdin = match present(input, STDIN_KEY) {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    let background = flag(input, BACKGROUND_KEY, false, &mut invalid);
    let capture = flag(input, CAPTURE_KEY, true, &mut invalid);

    if !invalid.is_empty() {
        return Err(DispatchError::ArgumentMismatch {
            target: label.to_string(),
            missing: invalid,
        });
    }

    Ok(ExternalCommandSpec::new(label, executable)
        .args(argv)
        .stdin(stdin)
        .background(background)
        .capture(capture))
}

fn present<'a>(input: &'a InputMap, key: &str) -> Option<&'a Value> {
    input.get(key).filter(|v| !v.is_null())
}

fn argv_of(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(line) => shell_words::split(line).ok(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

fn flag(input: &InputMap, key: &str, default: bool, invalid: &mut Vec<String>) -> bool {
    match present(input, key) {
        None => default,
        Some(Value::Bool(b)) => *b,
        Some(_) => {
            invalid.push(key.to_string());
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_pipe::PipeMode;
    use serde_json::json;

    fn input(value: Value) -> InputMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_defaults() {
        let spec = command_spec("cli/cat", Path::new("/bin/cat"), &InputMap::new()).unwrap();
        assert_eq!(spec.label, "cli/cat");
        assert!(spec.argv.is_empty());
        assert!(spec.stdin.is_empty());
        assert_eq!(spec.mode(), PipeMode::Capture);
    }

    #[test]
    fn test_argv_forms() {
        let spec = command_spec(
            "cli/echo",
            Path::new("echo"),
            &input(json!({"argv": ["-n", 3, true]})),
        )
        .unwrap();
        assert_eq!(spec.argv, vec!["-n", "3", "true"]);

        let spec = command_spec(
            "cli/echo",
            Path::new("echo"),
            &input(json!({"argv": "say 'hello world'"})),
        )
        .unwrap();
        assert_eq!(spec.argv, vec!["say", "hello world"]);
    }

    #[test]
    fn test_stdin_and_modes() {
        let spec = command_spec(
            "cli/cat",
            Path::new("cat"),
            &input(json!({"stdin": {"a": 1}, "capture": false})),
        )
        .unwrap();
        assert_eq!(spec.stdin, r#"{"a":1}"#);
        assert_eq!(spec.mode(), PipeMode::Discard);

        let spec = command_spec(
            "cli/cat",
            Path::new("cat"),
            &input(json!({"background": true})),
        )
        .unwrap();
        assert_eq!(spec.mode(), PipeMode::Background);
    }

    #[test]
    fn test_invalid_keys_collected() {
        let err = command_spec(
            "cli/cat",
            Path::new("cat"),
            &input(json!({"argv": [{"x": 1}], "background": "yes", "capture": null})),
        )
        .unwrap_err();
        match err {
            DispatchError::ArgumentMismatch { target, missing } => {
                assert_eq!(target, "cli/cat");
                assert_eq!(missing, vec!["argv", "background"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unbalanced_quotes_rejected() {
        assert!(command_spec(
            "cli/echo",
            Path::new("echo"),
            &input(json!({"argv": "say 'oops"}))
        )
        .is_err());
    }
}
