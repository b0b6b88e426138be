//! Postgres row to JSON conversion.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Per-category decoders handle the actual value extraction
//!
//! Services deserialize the resulting maps into their own structs with serde,
//! which keeps them independent of the driver's row type.

use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo};

/// One decoded row, keyed by column name.
pub type JsonRow = serde_json::Map<String, JsonValue>;

/// Logical category for Postgres column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Timestamp,
    TimestampTz,
    Date,
    Uuid,
    Unknown,
}

/// Classify a Postgres type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Check first as it overlaps with "numeric" in float checks
    if lower.contains("numeric") || lower.contains("decimal") {
        return TypeCategory::Decimal;
    }

    match lower.as_str() {
        "int2" | "int4" | "int8" | "smallint" | "integer" | "bigint" | "serial"
        | "bigserial" => TypeCategory::Integer,
        "float4" | "float8" | "real" | "double precision" => TypeCategory::Float,
        "bool" | "boolean" => TypeCategory::Boolean,
        "bytea" => TypeCategory::Binary,
        "json" | "jsonb" => TypeCategory::Json,
        "timestamptz" | "timestamp with time zone" => TypeCategory::TimestampTz,
        "timestamp" | "timestamp without time zone" => TypeCategory::Timestamp,
        "date" => TypeCategory::Date,
        "uuid" => TypeCategory::Uuid,
        "text" | "varchar" | "char" | "bpchar" | "name" | "citext" | "character varying" => {
            TypeCategory::Text
        }
        _ => TypeCategory::Unknown,
    }
}

/// Encode binary data for JSON output.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    JsonValue::String(STANDARD.encode(bytes))
}

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> JsonRow;
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> JsonRow {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name());
                (col.name().to_string(), decode_column(self, idx, category))
            })
            .collect()
    }
}

fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
    match category {
        TypeCategory::Decimal => decode_decimal(row, idx),
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Boolean => decode_boolean(row, idx),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Binary => decode_binary_col(row, idx),
        TypeCategory::Json => decode_json(row, idx),
        TypeCategory::TimestampTz => decode_timestamptz(row, idx),
        TypeCategory::Timestamp => decode_timestamp(row, idx),
        TypeCategory::Date => decode_date(row, idx),
        TypeCategory::Uuid => decode_uuid(row, idx),
        _ => decode_text(row, idx),
    }
}

// NUMERIC arrives in binary form; queries should cast it (`amount::text`).
fn decode_decimal(_row: &PgRow, idx: usize) -> JsonValue {
    tracing::debug!(column = idx, "NUMERIC column not cast to text, returning null");
    JsonValue::Null
}

fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
    if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    JsonValue::Null
}

fn decode_boolean(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<bool>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::Bool)
        .unwrap_or(JsonValue::Null)
}

fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
        return serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string()));
    }
    if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
        return serde_json::Number::from_f64(v as f64)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string()));
    }
    JsonValue::Null
}

fn decode_binary_col(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<Vec<u8>>, _>(idx)
        .ok()
        .flatten()
        .map(|v| encode_binary_value(&v))
        .unwrap_or(JsonValue::Null)
}

fn decode_json(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<JsonValue>, _>(idx)
        .ok()
        .flatten()
        .unwrap_or(JsonValue::Null)
}

fn decode_timestamptz(row: &PgRow, idx: usize) -> JsonValue {
    use chrono::{DateTime, SecondsFormat, Utc};

    row.try_get::<Option<DateTime<Utc>>, _>(idx)
        .ok()
        .flatten()
        .map(|v| JsonValue::String(v.to_rfc3339_opts(SecondsFormat::Millis, true)))
        .unwrap_or(JsonValue::Null)
}

fn decode_timestamp(row: &PgRow, idx: usize) -> JsonValue {
    use chrono::NaiveDateTime;

    row.try_get::<Option<NaiveDateTime>, _>(idx)
        .ok()
        .flatten()
        .map(|v| JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()))
        .unwrap_or(JsonValue::Null)
}

fn decode_date(row: &PgRow, idx: usize) -> JsonValue {
    use chrono::NaiveDate;

    row.try_get::<Option<NaiveDate>, _>(idx)
        .ok()
        .flatten()
        .map(|v| JsonValue::String(v.to_string()))
        .unwrap_or(JsonValue::Null)
}

fn decode_uuid(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<uuid::Uuid>, _>(idx)
        .ok()
        .flatten()
        .map(|v| JsonValue::String(v.to_string()))
        .unwrap_or(JsonValue::Null)
}

fn decode_text(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<String>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::String)
        .unwrap_or(JsonValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_integer_types() {
        for name in ["INT2", "INT4", "INT8", "bigint"] {
            assert_eq!(categorize_type(name), TypeCategory::Integer, "{name}");
        }
    }

    #[test]
    fn test_categorize_numeric_before_float() {
        assert_eq!(categorize_type("NUMERIC"), TypeCategory::Decimal);
        assert_eq!(categorize_type("FLOAT8"), TypeCategory::Float);
    }

    #[test]
    fn test_categorize_temporal_types() {
        assert_eq!(categorize_type("TIMESTAMPTZ"), TypeCategory::TimestampTz);
        assert_eq!(categorize_type("TIMESTAMP"), TypeCategory::Timestamp);
        assert_eq!(categorize_type("DATE"), TypeCategory::Date);
    }

    #[test]
    fn test_categorize_json_and_text() {
        assert_eq!(categorize_type("JSONB"), TypeCategory::Json);
        assert_eq!(categorize_type("JSON"), TypeCategory::Json);
        assert_eq!(categorize_type("VARCHAR"), TypeCategory::Text);
        assert_eq!(categorize_type("UUID"), TypeCategory::Uuid);
        assert_eq!(categorize_type("tsvector"), TypeCategory::Unknown);
    }

    #[test]
    fn test_encode_binary_value() {
        assert_eq!(
            encode_binary_value(b"zstd"),
            JsonValue::String("enN0ZA==".to_string())
        );
    }
}
