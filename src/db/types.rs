//! Row to JSON conversion.
//!
//! Type conversion is two-phase:
//! 1. `TypeCategory` classifies the column's declared type name
//! 2. a decoder tries the Rust types for that category, then falls back to
//!    text, integer, float and bytes before giving up with `null`

use crate::models::{ColumnMetadata, DatabaseType};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo};
use tracing::debug;

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Temporal,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Checked first: "numeric" would otherwise read as a float
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC affinity is a float
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if (lower.starts_with("int") && lower != "interval")
        || lower.ends_with("int")
        || lower.contains("int ")
        || lower.contains("serial")
    {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.starts_with("timestamp")
        || lower.starts_with("date")
        || lower.starts_with("time")
    {
        return TypeCategory::Temporal;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

/// Raw DECIMAL/NUMERIC values kept as the database's string form.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Encode binary data as a base64 JSON string.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

/// Conversion of a backend row into a JSON object keyed by column name.
pub trait RowToJson {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue>;
    fn column_metadata(&self) -> Vec<ColumnMetadata>;
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DatabaseType::PostgreSQL);
                let value = match category {
                    TypeCategory::Decimal => decode_raw_decimal(self, idx),
                    _ => None,
                }
                .unwrap_or_else(|| decode_column(self, idx, category));
                (col.name().to_string(), value)
            })
            .collect()
    }

    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        column_metadata(self)
    }
}

impl RowToJson for MySqlRow {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::MySQL);
                let value = match category {
                    TypeCategory::Decimal => decode_raw_decimal(self, idx),
                    TypeCategory::Integer if type_name.to_lowercase().contains("unsigned") => {
                        optional(self.try_get::<Option<u64>, _>(idx), JsonValue::from)
                    }
                    _ => None,
                }
                .unwrap_or_else(|| decode_column(self, idx, category));
                (col.name().to_string(), value)
            })
            .collect()
    }

    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        column_metadata(self)
    }
}

impl RowToJson for SqliteRow {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DatabaseType::SQLite);
                (col.name().to_string(), decode_column(self, idx, category))
            })
            .collect()
    }

    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        column_metadata(self)
    }
}

fn column_metadata<R: Row>(row: &R) -> Vec<ColumnMetadata> {
    row.columns()
        .iter()
        .map(|col| ColumnMetadata::new(col.name(), col.type_info().name()))
        .collect()
}

/// Map a decode attempt: `Err` means "wrong type, try another", `Ok(None)` is SQL NULL.
fn optional<T>(
    result: Result<Option<T>, sqlx::Error>,
    to_json: impl FnOnce(T) -> JsonValue,
) -> Option<JsonValue> {
    match result {
        Ok(Some(v)) => Some(to_json(v)),
        Ok(None) => Some(JsonValue::Null),
        Err(_) => None,
    }
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v).map_or(JsonValue::Null, JsonValue::Number)
}

fn decode_raw_decimal<'r, R>(row: &'r R, idx: usize) -> Option<JsonValue>
where
    R: Row,
    usize: ColumnIndex<R>,
    RawDecimal: Decode<'r, R::Database> + Type<R::Database>,
{
    optional(row.try_get::<Option<RawDecimal>, _>(idx), |v| {
        JsonValue::String(v.0)
    })
}

fn decode_column<'r, R>(row: &'r R, idx: usize, category: TypeCategory) -> JsonValue
where
    R: Row,
    usize: ColumnIndex<R>,
    i64: Decode<'r, R::Database> + Type<R::Database>,
    f64: Decode<'r, R::Database> + Type<R::Database>,
    bool: Decode<'r, R::Database> + Type<R::Database>,
    String: Decode<'r, R::Database> + Type<R::Database>,
    Vec<u8>: Decode<'r, R::Database> + Type<R::Database>,
    JsonValue: Decode<'r, R::Database> + Type<R::Database>,
    DateTime<Utc>: Decode<'r, R::Database> + Type<R::Database>,
    NaiveDateTime: Decode<'r, R::Database> + Type<R::Database>,
    NaiveDate: Decode<'r, R::Database> + Type<R::Database>,
    NaiveTime: Decode<'r, R::Database> + Type<R::Database>,
{
    let typed = match category {
        TypeCategory::Integer => optional(row.try_get::<Option<i64>, _>(idx), JsonValue::from),
        TypeCategory::Float | TypeCategory::Decimal => {
            optional(row.try_get::<Option<f64>, _>(idx), float_value)
        }
        TypeCategory::Boolean => optional(row.try_get::<Option<bool>, _>(idx), JsonValue::Bool),
        TypeCategory::Json => optional(row.try_get::<Option<JsonValue>, _>(idx), |v| v),
        TypeCategory::Binary => optional(row.try_get::<Option<Vec<u8>>, _>(idx), |v| {
            encode_binary_value(&v)
        }),
        TypeCategory::Temporal => optional(row.try_get::<Option<DateTime<Utc>>, _>(idx), |v| {
            JsonValue::String(v.to_rfc3339())
        })
        .or_else(|| {
            optional(row.try_get::<Option<NaiveDateTime>, _>(idx), |v| {
                JsonValue::String(v.to_string())
            })
        })
        .or_else(|| {
            optional(row.try_get::<Option<NaiveDate>, _>(idx), |v| {
                JsonValue::String(v.to_string())
            })
        })
        .or_else(|| {
            optional(row.try_get::<Option<NaiveTime>, _>(idx), |v| {
                JsonValue::String(v.to_string())
            })
        }),
        TypeCategory::Text | TypeCategory::Unknown => None,
    };

    typed
        .or_else(|| optional(row.try_get::<Option<String>, _>(idx), JsonValue::String))
        .or_else(|| optional(row.try_get::<Option<i64>, _>(idx), JsonValue::from))
        .or_else(|| optional(row.try_get::<Option<f64>, _>(idx), float_value))
        .or_else(|| {
            optional(row.try_get::<Option<Vec<u8>>, _>(idx), |v| {
                encode_binary_value(&v)
            })
        })
        .unwrap_or_else(|| {
            debug!(column = idx, ?category, "Unsupported column type, returning null");
            JsonValue::Null
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[test]
    fn test_categorize_type() {
        use DatabaseType::*;
        assert_eq!(categorize_type("INT8", PostgreSQL), TypeCategory::Integer);
        assert_eq!(categorize_type("BIGINT UNSIGNED", MySQL), TypeCategory::Integer);
        assert_eq!(categorize_type("INTEGER", SQLite), TypeCategory::Integer);
        assert_eq!(categorize_type("INTERVAL", PostgreSQL), TypeCategory::Unknown);
        assert_eq!(categorize_type("NUMERIC", PostgreSQL), TypeCategory::Decimal);
        assert_eq!(categorize_type("NUMERIC", SQLite), TypeCategory::Float);
        assert_eq!(categorize_type("FLOAT8", PostgreSQL), TypeCategory::Float);
        assert_eq!(categorize_type("BOOLEAN", SQLite), TypeCategory::Boolean);
        assert_eq!(categorize_type("JSONB", PostgreSQL), TypeCategory::Json);
        assert_eq!(categorize_type("BYTEA", PostgreSQL), TypeCategory::Binary);
        assert_eq!(categorize_type("TIMESTAMPTZ", PostgreSQL), TypeCategory::Temporal);
        assert_eq!(categorize_type("DATETIME", SQLite), TypeCategory::Temporal);
        assert_eq!(categorize_type("VARCHAR", MySQL), TypeCategory::Text);
    }

    #[test]
    fn test_encode_binary_value() {
        assert_eq!(encode_binary_value(b"hi"), JsonValue::String("aGk=".to_string()));
    }

    #[tokio::test]
    async fn test_sqlite_row_to_json() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::raw_sql(
            "CREATE TABLE t (id INTEGER, name TEXT, score REAL, data BLOB, missing TEXT);
             INSERT INTO t VALUES (1, 'alice', 2.5, x'6869', NULL);",
        )
        .execute(&pool)
        .await
        .unwrap();

        let row = sqlx::query("SELECT id, name, score, data, missing FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();
        let json = row.to_json_map();
        assert_eq!(json["id"], 1);
        assert_eq!(json["name"], "alice");
        assert_eq!(json["score"], 2.5);
        assert_eq!(json["data"], "aGk=");
        assert_eq!(json["missing"], JsonValue::Null);

        let columns = row.column_metadata();
        assert_eq!(columns.len(), 5);
        assert_eq!(columns[0].name, "id");
    }
}
