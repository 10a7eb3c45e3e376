//! Conversion between records and BSON documents.

use mongodb::bson::{Bson, Document};
use serde_json::{Map, Value};
use stowage_core::Record;

/// Convert a record into a BSON document, keeping field order.
///
/// Integers are stored as `Int32` when they fit, `Int64` otherwise; anything
/// beyond `i64` (large unsigned values, fractions) becomes a `Double`.
pub fn record_to_document(record: Record) -> Document {
    map_to_document(record.into_fields())
}

/// Convert a BSON document back into a record, using relaxed extended JSON
/// for BSON-only types (ObjectId, dates).
pub fn document_to_record(document: Document) -> Record {
    match Bson::Document(document).into_relaxed_extjson() {
        Value::Object(fields) => Record::from(fields),
        _ => Record::from(Map::new()),
    }
}

fn map_to_document(map: Map<String, Value>) -> Document {
    let mut document = Document::new();
    for (key, value) in map {
        document.insert(key, json_to_bson(value));
    }
    document
}

fn json_to_bson(value: Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i32::try_from(i).map(Bson::Int32).unwrap_or(Bson::Int64(i))
            } else if let Some(f) = n.as_f64() {
                Bson::Double(f)
            } else {
                Bson::String(n.to_string())
            }
        }
        Value::String(s) => Bson::String(s),
        Value::Array(items) => Bson::Array(items.into_iter().map(json_to_bson).collect()),
        Value::Object(map) => Bson::Document(map_to_document(map)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn test_numbers() {
        let doc = record_to_document(record(json!({
            "small": 7,
            "big": 9_000_000_000i64,
            "huge": u64::MAX,
            "fraction": 2.5
        })));
        assert_eq!(doc.get("small"), Some(&Bson::Int32(7)));
        assert_eq!(doc.get("big"), Some(&Bson::Int64(9_000_000_000)));
        assert!(matches!(doc.get("huge"), Some(Bson::Double(_))));
        assert_eq!(doc.get("fraction"), Some(&Bson::Double(2.5)));
    }

    #[test]
    fn test_nested_values_and_order() {
        let doc = record_to_document(record(json!({
            "z": {"b": [1, "x", null, true]},
            "a": "first?"
        })));
        let keys: Vec<_> = doc.keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a"]);

        let inner = doc.get_document("z").unwrap();
        let items = inner.get_array("b").unwrap();
        assert_eq!(
            items,
            &vec![
                Bson::Int32(1),
                Bson::String("x".to_string()),
                Bson::Null,
                Bson::Boolean(true)
            ]
        );
    }

    #[test]
    fn test_document_to_record_keeps_provenance() {
        let original = record(json!({"factura_num": "F-9"})).with_provenance("a/1.json", "a");
        let back = document_to_record(record_to_document(original));
        assert_eq!(back.source_file(), Some("a/1.json"));
        assert_eq!(back.source_folder(), Some("a"));
        assert!(back.contains_key("factura_num"));
    }
}
