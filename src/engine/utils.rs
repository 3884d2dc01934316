//! # Utility Functions Module
//!
//! Helpers shared by the context accessors and script evaluation:
//! - Dot-path navigation into JSON values
//! - JSON truthiness for condition results

use serde_json::Value;

/// Get nested value from JSON using dot notation path
///
/// Supports both object property access and array indexing:
/// - `"scan.code"` - Access object property
/// - `"items.0"` - Access array element by index
/// - `"order.lines.0.sku"` - Combined object and array access
/// - `"slots.#20"` - Access field named "20" (# prefix removed)
///
/// An empty path returns the value itself. Invalid indices and missing keys
/// return `None`.
pub fn get_nested_value<'b>(data: &'b Value, path: &str) -> Option<&'b Value> {
    if path.is_empty() {
        return Some(data);
    }

    let mut current = data;

    for part in path.split('.') {
        match current {
            Value::Object(map) => {
                let field_name = part.strip_prefix('#').unwrap_or(part);
                current = map.get(field_name)?;
            }
            Value::Array(arr) => {
                let index = part.parse::<usize>().ok()?;
                current = arr.get(index)?;
            }
            _ => return None,
        }
    }

    Some(current)
}

/// JSON truthiness as used for node conditions
///
/// `false`, `null`, `0`, `""`, `[]` and `{}` are falsy; everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(arr) => !arr.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_nested_value() {
        let data = json!({
            "order": {
                "id": "A-100",
                "lines": [
                    {"sku": "COFFEE", "qty": 2},
                    {"sku": "BAGEL", "qty": 1}
                ]
            },
            "slots": [4, 5, 6]
        });

        assert_eq!(get_nested_value(&data, "order.id"), Some(&json!("A-100")));
        assert_eq!(get_nested_value(&data, "slots.1"), Some(&json!(5)));
        assert_eq!(
            get_nested_value(&data, "order.lines.1.sku"),
            Some(&json!("BAGEL"))
        );
        assert_eq!(get_nested_value(&data, ""), Some(&data));

        assert_eq!(get_nested_value(&data, "order.missing"), None);
        assert_eq!(get_nested_value(&data, "slots.10"), None);
        assert_eq!(get_nested_value(&data, "slots.x"), None);
        assert_eq!(get_nested_value(&data, "order.id.deeper"), None);
    }

    #[test]
    fn test_hash_prefix_in_paths() {
        let data = json!({"slots": {"20": "open", "#": "hash"}});
        assert_eq!(get_nested_value(&data, "slots.#20"), Some(&json!("open")));
        assert_eq!(get_nested_value(&data, "slots.##"), Some(&json!("hash")));
    }

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!(-0.5)));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!([0])));
        assert!(is_truthy(&json!({"a": 1})));

        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(0.0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(!is_truthy(&json!({})));
    }
}
