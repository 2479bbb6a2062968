//! Attribute key normalization
//!
//! The panel API returns node attributes with snake_case keys; the
//! event surface exposes them camelCased. Conversion is recursive so
//! nested objects (e.g. allocated resources) normalize too.

use serde_json::Value;

/// Convert one snake_case key to camelCase. Keys without underscores
/// pass through unchanged.
pub fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;

    for ch in key.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }

    out
}

/// Recursively camelCase every object key in a JSON value.
pub fn camel_case_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, inner)| (camel_case(&key), camel_case_keys(inner)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(camel_case_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_snake_to_camel() {
        assert_eq!(camel_case("memory_limit"), "memoryLimit");
        assert_eq!(camel_case("behind_proxy"), "behindProxy");
        assert_eq!(camel_case("fqdn"), "fqdn");
        assert_eq!(camel_case("daemon_sftp_port"), "daemonSftpPort");
    }

    #[test]
    fn normalizes_nested_objects_and_arrays() {
        let input = json!({
            "memory_limit": 4096,
            "allocated_resources": {
                "disk_mb": 10240,
                "memory_mb": 2048
            },
            "relationships": [
                { "node_id": 1 },
                { "node_id": 2 }
            ]
        });

        let out = camel_case_keys(input);
        assert_eq!(out["memoryLimit"], 4096);
        assert_eq!(out["allocatedResources"]["diskMb"], 10240);
        assert_eq!(out["relationships"][0]["nodeId"], 1);
        assert!(out.get("memory_limit").is_none());
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(camel_case_keys(json!(42)), json!(42));
        assert_eq!(camel_case_keys(json!("snake_case")), json!("snake_case"));
        assert_eq!(camel_case_keys(Value::Null), Value::Null);
    }
}
