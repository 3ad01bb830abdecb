//! Parameter binding and row decoding.
//!
//! Requests carry query parameters as an ordered JSON array with no fixed
//! schema; [`ParamValue`] is the tagged variant they decode into, and its
//! [`ToSql`] impl maps each variant to the native bind type the prepared
//! statement expects. Going the other way, [`JsonCell`] decodes one result
//! column into a `serde_json::Value` so rows can be serialized without
//! knowing the statement shape up front.
use bytes::BytesMut;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};

use crate::error::GatewayError;

type BoxError = Box<dyn std::error::Error + Sync + Send>;

pub type JsonMap = serde_json::Map<String, JsonValue>;

/// One bound query parameter, decoded from the wire without a schema.
///
/// Variant order matters: integral JSON numbers decode as `Int` before
/// `Float` gets a chance, and `Json` catches arrays and objects.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(JsonValue),
}

impl ToSql for ParamValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            ParamValue::Null => Ok(IsNull::Yes),
            ParamValue::Bool(b) => b.to_sql(ty, out),
            ParamValue::Int(n) => match ty.name() {
                "int2" => i16::try_from(*n)?.to_sql(ty, out),
                "int4" => i32::try_from(*n)?.to_sql(ty, out),
                "int8" => n.to_sql(ty, out),
                "oid" => u32::try_from(*n)?.to_sql(ty, out),
                "float4" => (*n as f32).to_sql(ty, out),
                "float8" => (*n as f64).to_sql(ty, out),
                "text" | "varchar" | "bpchar" | "name" => n.to_string().to_sql(ty, out),
                other => Err(format!("cannot bind integer parameter to {other}").into()),
            },
            ParamValue::Float(n) => match ty.name() {
                "float4" => (*n as f32).to_sql(ty, out),
                "float8" => n.to_sql(ty, out),
                "text" | "varchar" | "bpchar" | "name" => n.to_string().to_sql(ty, out),
                other => Err(format!("cannot bind float parameter to {other}").into()),
            },
            ParamValue::Text(s) => match ty.name() {
                "uuid" => uuid::Uuid::parse_str(s)?.to_sql(ty, out),
                "json" | "jsonb" => JsonValue::String(s.clone()).to_sql(ty, out),
                _ => s.as_str().to_sql(ty, out),
            },
            ParamValue::Json(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // Accept everything; variant/type mismatches surface from to_sql.
        true
    }

    to_sql_checked!();
}

/// One result column decoded to JSON, whatever its backend type.
#[derive(Debug)]
pub struct JsonCell(pub JsonValue);

fn json_f64(f: f64) -> JsonValue {
    // NaN and infinities have no JSON representation.
    serde_json::Number::from_f64(f)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

impl<'a> FromSql<'a> for JsonCell {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        let value = match ty.name() {
            "bool" => JsonValue::Bool(bool::from_sql(ty, raw)?),
            "int2" => JsonValue::from(i16::from_sql(ty, raw)?),
            "int4" => JsonValue::from(i32::from_sql(ty, raw)?),
            "int8" => JsonValue::from(i64::from_sql(ty, raw)?),
            "oid" => JsonValue::from(u32::from_sql(ty, raw)?),
            "float4" => json_f64(f32::from_sql(ty, raw)? as f64),
            "float8" => json_f64(f64::from_sql(ty, raw)?),
            "json" | "jsonb" => JsonValue::from_sql(ty, raw)?,
            "uuid" => JsonValue::String(uuid::Uuid::from_sql(ty, raw)?.to_string()),
            "timestamp" => JsonValue::String(
                chrono::NaiveDateTime::from_sql(ty, raw)?
                    .format("%Y-%m-%dT%H:%M:%S%.f")
                    .to_string(),
            ),
            "timestamptz" => JsonValue::String(
                chrono::DateTime::<chrono::Utc>::from_sql(ty, raw)?.to_rfc3339(),
            ),
            "date" => JsonValue::String(chrono::NaiveDate::from_sql(ty, raw)?.to_string()),
            "text" | "varchar" | "bpchar" | "name" | "unknown" => {
                JsonValue::String(String::from_sql(ty, raw)?)
            }
            // Types without a dedicated decoder come out as lossy text.
            _ => JsonValue::String(String::from_utf8_lossy(raw).into_owned()),
        };

        Ok(JsonCell(value))
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(JsonCell(JsonValue::Null))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Borrow a parameter slice the way `query_raw` wants it.
pub fn bind_params(params: &[ParamValue]) -> impl ExactSizeIterator<Item = &dyn ToSql> + '_ {
    params.iter().map(|p| p as &dyn ToSql)
}

/// Zip column names with row values into an ordered field->value record.
///
/// This is the single point where values become field-named records; the
/// arity invariant is enforced here and nowhere else.
pub fn record_from_values(
    columns: &[String],
    values: Vec<JsonValue>,
) -> Result<JsonMap, GatewayError> {
    if columns.len() != values.len() {
        return Err(GatewayError::RowMapping {
            columns: columns.len(),
            values: values.len(),
        });
    }

    let mut record = JsonMap::new();
    for (name, value) in columns.iter().zip(values) {
        record.insert(name.clone(), value);
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_decode_from_ordered_json_array() {
        let params: Vec<ParamValue> =
            serde_json::from_str(r#"[null, true, 7, 2.5, "x", {"a": 1}]"#).expect("decodes");

        assert_eq!(
            params,
            vec![
                ParamValue::Null,
                ParamValue::Bool(true),
                ParamValue::Int(7),
                ParamValue::Float(2.5),
                ParamValue::Text("x".to_string()),
                ParamValue::Json(json!({"a": 1})),
            ]
        );
    }

    #[test]
    fn test_cell_decodes_wire_values() {
        let cell = JsonCell::from_sql(&Type::INT8, &42i64.to_be_bytes()).expect("int8");
        assert_eq!(cell.0, json!(42));

        let cell = JsonCell::from_sql(&Type::BOOL, &[1]).expect("bool");
        assert_eq!(cell.0, json!(true));

        let cell = JsonCell::from_sql(&Type::TEXT, b"hello").expect("text");
        assert_eq!(cell.0, json!("hello"));

        let cell = JsonCell::from_sql_null(&Type::TEXT).expect("null");
        assert_eq!(cell.0, JsonValue::Null);
    }

    #[test]
    fn test_record_preserves_column_order() {
        let columns = vec!["b".to_string(), "a".to_string()];
        let record =
            record_from_values(&columns, vec![json!(1), json!(2)]).expect("arity matches");

        let keys: Vec<&String> = record.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_record_arity_mismatch_is_fatal() {
        let columns = vec!["a".to_string(), "b".to_string()];
        let err = record_from_values(&columns, vec![json!(1)]).expect_err("mismatch");
        assert!(matches!(
            err,
            GatewayError::RowMapping { columns: 2, values: 1 }
        ));
    }
}
