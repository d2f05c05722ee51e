//! Result records.

use serde::ser::{Serialize, Serializer};
use serde_json::{json, Map, Value};

/// One row emitted by a query, with its fields in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    keys: Vec<String>,
    fields: Vec<Value>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field, keeping column order.
    pub fn push(&mut self, key: impl Into<String>, value: Value) {
        self.keys.push(key.into());
        self.fields.push(value);
    }

    /// Builder-style variant of [`Record::push`].
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.push(key, value);
        self
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the field at a column position.
    pub fn field(&self, index: usize) -> Option<&Value> {
        self.fields.get(index)
    }

    /// Returns the field with the given column name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.keys
            .iter()
            .position(|k| k == key)
            .and_then(|idx| self.fields.get(idx))
    }

    /// Renders the record in the layout the JavaScript driver produces when a
    /// record is stringified, so browser clients can keep reading `_fields`.
    pub fn to_value(&self) -> Value {
        let lookup: Map<String, Value> = self
            .keys
            .iter()
            .enumerate()
            .map(|(idx, key)| (key.clone(), Value::from(idx)))
            .collect();

        json!({
            "keys": self.keys,
            "length": self.fields.len(),
            "_fields": self.fields,
            "_fieldLookup": lookup,
        })
    }

    /// Consumes the record, yielding its fields in column order.
    pub fn into_fields(self) -> Vec<Value> {
        self.fields
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let (keys, fields) = iter.into_iter().unzip();
        Self { keys, fields }
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}
