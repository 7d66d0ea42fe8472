//! Lenient decoding of JSON emitted by the control utilities.
//!
//! `prlctl ... --json` prints plain-text diagnostics instead of JSON on some
//! error paths, so callers supply a default rather than handling parse errors.

use serde::de::DeserializeOwned;
use tracing::debug;

/// Parse `text` as JSON, or return `default` if it is not valid for `T`.
pub fn json<T: DeserializeOwned>(text: &str, default: T) -> T {
    match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "malformed JSON from control utility, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json as value, Value};
    use std::collections::HashMap;

    #[test]
    fn test_well_formed_json_is_parsed() {
        let parsed: Value = json(r#"[{"uuid": "{abc}"}]"#, Value::Null);
        assert_eq!(parsed, value!([{"uuid": "{abc}"}]));
    }

    #[test]
    fn test_malformed_json_returns_default() {
        let parsed: Vec<Value> = json("Failed to get VM config: access denied", vec![value!(1)]);
        assert_eq!(parsed, vec![value!(1)]);
    }

    #[test]
    fn test_empty_output_returns_default() {
        let parsed: HashMap<String, String> = json("", HashMap::new());
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_shape_mismatch_returns_default() {
        let parsed: Vec<String> = json(r#"{"not": "a list"}"#, Vec::new());
        assert!(parsed.is_empty());
    }
}
