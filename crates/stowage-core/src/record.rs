//! The schema-less record model.
//!
//! A [`Record`] is one decoded JSON object plus two provenance fields naming
//! the archive entry and the partition it came from. Nothing about the shape
//! of the object is validated; field order from the source is preserved.

use crate::error::{DecodeError, Result};
use serde_json::{Map, Value};

/// Field holding the archive entry a record was decoded from.
pub const SOURCE_FILE_FIELD: &str = "_source_file";

/// Field holding the partition (top-level folder) a record belongs to.
pub const SOURCE_FOLDER_FIELD: &str = "_source_folder";

/// Partition name used for entries that sit at the archive root.
pub const ROOT_PARTITION: &str = "root";

/// One decoded document.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    /// Build a record from a parsed JSON value.
    ///
    /// Only objects are accepted at the top level.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(DecodeError::NotAnObject {
                found: value_kind(&other),
            }),
        }
    }

    /// Stamp the record with its origin.
    ///
    /// Existing keys with the same names are overwritten: provenance always
    /// reflects where the record was actually read from.
    pub fn with_provenance(mut self, entry: &str, partition: &str) -> Self {
        self.fields
            .insert(SOURCE_FILE_FIELD.to_string(), Value::String(entry.to_string()));
        self.fields.insert(
            SOURCE_FOLDER_FIELD.to_string(),
            Value::String(partition.to_string()),
        );
        self
    }

    /// Look up a top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Whether a top-level field is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// The entry this record was decoded from, if provenance has been applied.
    pub fn source_file(&self) -> Option<&str> {
        self.fields.get(SOURCE_FILE_FIELD).and_then(Value::as_str)
    }

    /// The partition this record belongs to, if provenance has been applied.
    pub fn source_folder(&self) -> Option<&str> {
        self.fields.get(SOURCE_FOLDER_FIELD).and_then(Value::as_str)
    }

    /// Number of top-level fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields at all.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Borrow the underlying ordered map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Consume the record, returning the underlying ordered map.
    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Derive a destination collection name from a partition name.
///
/// Lowercases, turns spaces into underscores, and replaces the characters
/// MongoDB refuses in collection names (`$` and NUL). An empty name falls
/// back to [`ROOT_PARTITION`].
pub fn canonical_collection_name(partition: &str) -> String {
    let name: String = partition
        .chars()
        .map(|c| match c {
            ' ' | '$' | '\0' => '_',
            other => other,
        })
        .collect::<String>()
        .to_lowercase();

    if name.is_empty() {
        ROOT_PARTITION.to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_accepts_object() {
        let record = Record::from_value(json!({"factura_num": 17, "total": 9.5})).unwrap();
        assert_eq!(record.len(), 2);
        assert_eq!(record.get("factura_num"), Some(&json!(17)));
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        for (value, found) in [
            (json!([1, 2]), "an array"),
            (json!("text"), "a string"),
            (json!(3), "a number"),
            (json!(null), "null"),
        ] {
            match Record::from_value(value) {
                Err(DecodeError::NotAnObject { found: got }) => assert_eq!(got, found),
                other => panic!("expected NotAnObject, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_provenance_is_injected() {
        let record = Record::from_value(json!({"a": 1}))
            .unwrap()
            .with_provenance("ventas/001.json", "ventas");
        assert_eq!(record.source_file(), Some("ventas/001.json"));
        assert_eq!(record.source_folder(), Some("ventas"));
        assert_eq!(record.len(), 3);
    }

    #[test]
    fn test_provenance_overrides_source_keys() {
        let record = Record::from_value(json!({
            "_source_file": "forged.json",
            "_source_folder": "elsewhere",
            "b": true
        }))
        .unwrap()
        .with_provenance("compras/7.json", "compras");

        assert_eq!(record.source_file(), Some("compras/7.json"));
        assert_eq!(record.source_folder(), Some("compras"));
        assert_eq!(record.len(), 3);
    }

    #[test]
    fn test_field_order_preserved() {
        let record: Record = serde_json::from_str::<Value>(r#"{"z": 1, "a": 2, "m": 3}"#)
            .map(|v| Record::from_value(v).unwrap())
            .unwrap();
        let keys: Vec<_> = record.fields().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_canonical_collection_name() {
        assert_eq!(canonical_collection_name("Facturas Enero"), "facturas_enero");
        assert_eq!(canonical_collection_name("VENTAS"), "ventas");
        assert_eq!(canonical_collection_name("a$b"), "a_b");
        assert_eq!(canonical_collection_name(""), "root");
        assert_eq!(canonical_collection_name("Ventas "), "ventas_");
        assert_eq!(canonical_collection_name(" "), "_");
        assert_eq!(canonical_collection_name("root"), "root");
    }
}
