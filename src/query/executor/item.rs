// Pipeline Items
//
// An item is one in-flight result document: a JSON value plus metadata such
// as the document key. Items move by value from one operator to the next.

use serde_json::{Map, Value};

use crate::common::json;

/// One document flowing through the pipeline
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Item {
    value: Value,
    meta: Map<String, Value>,
}

impl Item {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            meta: Map::new(),
        }
    }

    /// Empty object document annotated with its primary key
    pub fn with_key(key: &str) -> Self {
        let mut item = Self::new(Value::Object(Map::new()));
        item.set_meta("id", Value::String(key.to_string()));
        item
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn set_value(&mut self, value: Value) {
        self.value = value;
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn key(&self) -> Option<&str> {
        self.meta.get("id").and_then(Value::as_str)
    }

    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    pub fn set_meta(&mut self, name: &str, value: Value) {
        self.meta.insert(name.to_string(), value);
    }

    /// Set a top-level field, turning the value into an object if needed
    pub fn set_field(&mut self, name: &str, value: Value) {
        if !self.value.is_object() {
            self.value = Value::Object(Map::new());
        }
        if let Value::Object(fields) = &mut self.value {
            fields.insert(name.to_string(), value);
        }
    }

    /// Look up a nested field; `None` if any step is missing
    pub fn field<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        path.iter()
            .try_fold(&self.value, |current, step| current.get(step.as_ref()))
    }

    /// Serialize the document value into `buf`
    pub fn write_json(&self, buf: &mut Vec<u8>, prefix: &str, indent: &str) -> serde_json::Result<()> {
        json::write_value(buf, &self.value, prefix, indent)
    }
}
