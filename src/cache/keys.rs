//! Cache key derivation.
//!
//! Keys start with their namespace (the prefix or tag name) so that prefix
//! invalidation stays a literal string match.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::options::Tag;

/// Where a cached entry is grouped for invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeySpec {
    Prefix(String),
    Tag(Tag),
}

impl KeySpec {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Prefix(_) => "prefix",
            Self::Tag(_) => "tag",
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Self::Prefix(prefix) => prefix,
            Self::Tag(tag) => tag.as_str(),
        }
    }
}

/// Deterministic mapping from (function, spec, args) to a backend key.
pub trait KeyMaker: Send + Sync + 'static {
    fn make(&self, function: &str, spec: &KeySpec, args: &Value) -> String;
}

/// `"{namespace}::{function}::{sha256 hex}"`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultKeyMaker;

impl KeyMaker for DefaultKeyMaker {
    fn make(&self, function: &str, spec: &KeySpec, args: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(function.as_bytes());
        hasher.update([0u8]);
        hasher.update(spec.kind().as_bytes());
        hasher.update([b':']);
        hasher.update(spec.namespace().as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical(args).to_string().as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("{}::{}::{}", spec.namespace(), function, digest)
    }
}

/// Rebuild `value` with object keys in sorted order at every level.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(key, value)| (key.clone(), canonical(value)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn prefix(name: &str) -> KeySpec {
        KeySpec::Prefix(name.to_string())
    }

    #[test]
    fn key_is_deterministic_and_namespaced() {
        let maker = DefaultKeyMaker;
        let first = maker.make("get_user", &prefix("get_user"), &json!([1, "a"]));
        let second = maker.make("get_user", &prefix("get_user"), &json!([1, "a"]));
        assert_eq!(first, second);
        assert!(first.starts_with("get_user::get_user::"));
        assert_eq!(first.rsplit("::").next().map(str::len), Some(64));
    }

    #[test]
    fn keyword_order_does_not_matter() {
        let maker = DefaultKeyMaker;
        let a = maker.make("f", &prefix("p"), &json!({"b": 2, "a": {"y": 1, "x": 0}}));
        let b = maker.make("f", &prefix("p"), &json!({"a": {"x": 0, "y": 1}, "b": 2}));
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_produce_different_keys() {
        let maker = DefaultKeyMaker;
        let base = maker.make("f", &prefix("p"), &json!([1]));
        assert_ne!(base, maker.make("f", &prefix("p"), &json!([2])));
        assert_ne!(base, maker.make("g", &prefix("p"), &json!([1])));
        assert_ne!(
            base,
            maker.make("f", &KeySpec::Tag(Tag::new("p")), &json!([1]))
        );
    }
}
