/// Value model shared by every database handle
///
/// Parameters and row cells are JSON values so a row fetched through the
/// embedded engine and one decoded off the wire compare equal.

use base64::{engine::general_purpose::STANDARD, Engine};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Map, Number, Value};

/// One result row: column name to cell value, in column order.
pub type Row = Map<String, Value>;

/// Positional statement parameters.
pub type Params = Vec<Value>;

/// Coerce an arbitrary JSON value into a parameter list.
///
/// Anything other than an array becomes an empty list.
pub fn params_from_json(value: Option<Value>) -> Params {
    match value {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// Convert a JSON parameter into an engine value.
pub fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        // Nested structures are stored as their JSON text
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

/// Convert an engine cell into a JSON value.
///
/// BLOBs are base64 encoded; non-finite REALs become null.
pub fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(Number::from(i)),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(STANDARD.encode(bytes)),
    }
}

/// Build a [`Row`] from an engine row given its column names.
pub fn row_to_json(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<Row> {
    let mut out = Map::with_capacity(columns.len());
    for (idx, name) in columns.iter().enumerate() {
        out.insert(name.clone(), from_value_ref(row.get_ref(idx)?));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_from_json_defaults_to_empty() {
        assert!(params_from_json(None).is_empty());
        assert!(params_from_json(Some(json!({"a": 1}))).is_empty());
        assert!(params_from_json(Some(json!("x"))).is_empty());
        assert_eq!(params_from_json(Some(json!([1, "a"]))), vec![json!(1), json!("a")]);
    }

    #[test]
    fn test_to_sql_value() {
        assert_eq!(to_sql_value(&json!(null)), SqlValue::Null);
        assert_eq!(to_sql_value(&json!(true)), SqlValue::Integer(1));
        assert_eq!(to_sql_value(&json!(42)), SqlValue::Integer(42));
        assert_eq!(to_sql_value(&json!(1.5)), SqlValue::Real(1.5));
        assert_eq!(to_sql_value(&json!("hi")), SqlValue::Text("hi".into()));
        assert_eq!(
            to_sql_value(&json!({"k": [1]})),
            SqlValue::Text(r#"{"k":[1]}"#.into())
        );
    }

    #[test]
    fn test_from_value_ref() {
        assert_eq!(from_value_ref(ValueRef::Null), json!(null));
        assert_eq!(from_value_ref(ValueRef::Integer(-7)), json!(-7));
        assert_eq!(from_value_ref(ValueRef::Real(2.25)), json!(2.25));
        assert_eq!(from_value_ref(ValueRef::Real(f64::NAN)), json!(null));
        assert_eq!(from_value_ref(ValueRef::Text(b"abc")), json!("abc"));
        assert_eq!(from_value_ref(ValueRef::Blob(&[1, 2, 3])), json!("AQID"));
    }
}
