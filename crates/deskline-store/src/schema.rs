//! Column whitelists and value conversion for the three collections.
//!
//! Field names coming from callers are only ever used after being looked up
//! here; values are always passed as bind parameters.

use chrono::{DateTime, SecondsFormat, Utc};
use deskline_shared::constants::{CREATED_AT_FIELD, CUSTOMER_NAME_FIELD, ID_FIELD};
use deskline_shared::{Collection, Record};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value;

use crate::error::{Result, StoreError};

/// Physical columns of a collection, in select order.
pub fn columns(collection: Collection) -> &'static [&'static str] {
    match collection {
        Collection::ChatUser => &["id", "name", "email", "created_at"],
        Collection::Chat => &["id", "user_id", "admin_id", "status", "created_at"],
        Collection::Message => &["id", "chat_id", "sender_id", "content", "created_at"],
    }
}

/// Columns a caller may set on create (besides `created_at`) and on update.
pub fn writable(collection: Collection) -> &'static [&'static str] {
    match collection {
        Collection::ChatUser => &["name", "email"],
        Collection::Chat => &["user_id", "admin_id", "status"],
        Collection::Message => &["chat_id", "sender_id", "content"],
    }
}

/// Columns that must be present on create.
pub fn required(collection: Collection) -> &'static [&'static str] {
    match collection {
        Collection::ChatUser => &["name", "email"],
        Collection::Chat => &["user_id"],
        Collection::Message => &["chat_id", "sender_id", "content"],
    }
}

/// Check that `field` is a physical column usable in a filter or sort.
pub fn check_column(collection: Collection, field: &str) -> Result<&'static str> {
    columns(collection)
        .iter()
        .copied()
        .find(|c| *c == field)
        .ok_or_else(|| StoreError::UnknownField {
            collection: collection.to_string(),
            field: field.to_string(),
        })
}

/// Check that `field` may be written by a caller.
pub fn check_writable(collection: Collection, field: &str) -> Result<&'static str> {
    if field == ID_FIELD {
        return Err(StoreError::ReadOnlyField(field.to_string()));
    }
    writable(collection)
        .iter()
        .copied()
        .find(|c| *c == field)
        .ok_or_else(|| StoreError::UnknownField {
            collection: collection.to_string(),
            field: field.to_string(),
        })
}

/// `SELECT ... FROM <table>` for a collection, qualified so that filters can
/// be appended as `<table>.<column> = ?`.
///
/// Chat rows carry the joined customer name so that every consumer sees the
/// same shape, whether the row came from a read or from the feed.
pub fn select_sql(collection: Collection) -> String {
    let table = collection.table();
    let cols = columns(collection)
        .iter()
        .map(|c| format!("{table}.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    match collection {
        Collection::Chat => format!(
            "SELECT {cols}, chat_user.name AS {CUSTOMER_NAME_FIELD} \
             FROM chat LEFT JOIN chat_user ON chat_user.id = chat.user_id"
        ),
        _ => format!("SELECT {cols} FROM {table}"),
    }
}

/// Render a timestamp in the fixed-width form stored in `created_at`
/// columns, so that lexical and chronological order agree.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Convert a JSON field value into a bind parameter.
pub fn to_sql(field: &str, value: &Value) -> Result<SqlValue> {
    match value {
        Value::Null => Ok(SqlValue::Null),
        Value::String(s) if field == CREATED_AT_FIELD => {
            let ts = DateTime::parse_from_rfc3339(s).map_err(|e| StoreError::InvalidValue {
                field: field.to_string(),
                reason: e.to_string(),
            })?;
            Ok(SqlValue::Text(format_timestamp(ts.with_timezone(&Utc))))
        }
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        Value::Bool(b) => Ok(SqlValue::Text(b.to_string())),
        Value::Number(n) => Ok(SqlValue::Text(n.to_string())),
        Value::Array(_) | Value::Object(_) => Err(StoreError::InvalidValue {
            field: field.to_string(),
            reason: "nested values are not supported".to_string(),
        }),
    }
}

/// Column names of a prepared statement, captured before rows borrow it.
pub fn column_names(stmt: &rusqlite::Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(String::from).collect()
}

/// Convert a result row into a [`Record`], keyed by column name.
pub fn row_to_record(row: &rusqlite::Row<'_>, names: &[String]) -> rusqlite::Result<Record> {
    let mut record = Record::new();
    for (i, name) in names.iter().enumerate() {
        let value = match row.get_ref(i)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(n) => Value::from(n),
            ValueRef::Real(f) => Value::from(f),
            ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
        };
        record.insert(name.clone(), value);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_never_writable() {
        assert!(matches!(
            check_writable(Collection::Chat, "id"),
            Err(StoreError::ReadOnlyField(_))
        ));
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let err = check_column(Collection::Message, "chat_id; DROP TABLE chat").unwrap_err();
        assert!(matches!(err, StoreError::UnknownField { .. }));
        assert_eq!(check_column(Collection::Message, "chat_id").unwrap(), "chat_id");
    }

    #[test]
    fn chat_select_joins_customer_name() {
        let sql = select_sql(Collection::Chat);
        assert!(sql.contains("LEFT JOIN chat_user"));
        assert!(sql.contains("customer_name"));
    }

    #[test]
    fn timestamps_are_normalised() {
        let v = to_sql("created_at", &Value::from("2024-03-01T10:00:00+02:00")).unwrap();
        assert_eq!(v, SqlValue::Text("2024-03-01T08:00:00.000000Z".to_string()));
        assert!(to_sql("created_at", &Value::from("yesterday")).is_err());
    }
}
