//! Option bags
//!
//! The monitor hands every device command a bag of key/value options. The
//! bag keeps insertion order because property application is
//! order-sensitive, and splits the `id` key out since it names the
//! instance rather than a field.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{DevError, Result};

/// Insertion-ordered key/value options for one device command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionBag {
    id: Option<String>,
    entries: Vec<(String, String)>,
}

impl OptionBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bag from key/value pairs, in order
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut bag = Self::new();
        for (key, value) in pairs {
            bag.set(key, value);
        }
        bag
    }

    /// Build a bag from a JSON object; strings pass through, numbers are
    /// rendered in decimal, booleans become `on`/`off`. Other value types
    /// are skipped.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| DevError::invalid_parameter_value("arguments", "a JSON object"))?;
        let mut bag = Self::new();
        for (key, value) in object {
            match value {
                Value::String(s) => bag.set(key.as_str(), s.clone()),
                Value::Number(n) => bag.set(key.as_str(), n.to_string()),
                Value::Bool(true) => bag.set(key.as_str(), "on"),
                Value::Bool(false) => bag.set(key.as_str(), "off"),
                other => warn!("option '{key}' has unsupported type, skipped: {other}"),
            }
        }
        Ok(bag)
    }

    /// Set an option; `id` is routed to the instance identifier
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if key == "id" {
            self.id = Some(value);
            return;
        }
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
            return;
        }
        self.entries.push((key, value));
    }

    /// Look an option up; `id` resolves to the instance identifier
    pub fn get(&self, key: &str) -> Option<&str> {
        if key == "id" {
            return self.id.as_deref();
        }
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The user-assigned instance identifier, if any
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// All non-`id` options in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_order_preserved() {
        let bag = OptionBag::from_pairs([("driver", "blinker"), ("rate", "500"), ("bus", "/")]);
        let keys: Vec<_> = bag.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["driver", "rate", "bus"]);
    }

    #[test]
    fn test_id_is_split_out() {
        let bag = OptionBag::from_pairs([("driver", "blinker"), ("id", "led0")]);
        assert_eq!(bag.id(), Some("led0"));
        assert_eq!(bag.get("id"), Some("led0"));
        assert_eq!(bag.len(), 1);
        assert!(bag.iter().all(|(k, _)| k != "id"));
    }

    #[test]
    fn test_from_json() {
        let bag = OptionBag::from_json(&json!({
            "driver": "blinker",
            "rate": 500,
            "enabled": true,
            "ignored": [1, 2],
        }))
        .unwrap();
        assert_eq!(bag.get("driver"), Some("blinker"));
        assert_eq!(bag.get("rate"), Some("500"));
        assert_eq!(bag.get("enabled"), Some("on"));
        assert_eq!(bag.get("ignored"), None);

        assert!(OptionBag::from_json(&json!("not-an-object")).is_err());
    }
}
