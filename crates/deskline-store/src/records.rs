//! Generic, parameterized CRUD over the support-desk collections.
//!
//! Every successful write is re-read through the collection's select so the
//! record published on the live hub has exactly the shape a read returns.

use chrono::Utc;
use deskline_shared::constants::{CREATED_AT_FIELD, ID_FIELD};
use deskline_shared::{ChangeAction, Collection, Direction, Filter, OrderBy, Record, RecordId};
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::schema;

/// `WHERE` clause plus its bind parameters, starting at `?{first}`.
fn where_clause(collection: Collection, filter: &Filter, first: usize) -> Result<(String, Vec<SqlValue>)> {
    let table = collection.table();
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    for (field, value) in filter.terms() {
        let column = schema::check_column(collection, field)?;
        let value = schema::to_sql(field, value)?;
        if value == SqlValue::Null {
            clauses.push(format!("{table}.{column} IS NULL"));
        } else {
            params.push(value);
            clauses.push(format!("{table}.{column} = ?{}", first + params.len() - 1));
        }
    }
    Ok((clauses.join(" AND "), params))
}

impl Database {
    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Read every record of `collection` matching `filter`.
    pub fn select(
        &self,
        collection: Collection,
        filter: &Filter,
        order: Option<&OrderBy>,
        limit: Option<u32>,
    ) -> Result<Vec<Record>> {
        let table = collection.table();
        let mut sql = schema::select_sql(collection);
        let (clause, mut params) = where_clause(collection, filter, 1)?;
        if !clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        if let Some(order) = order {
            let column = schema::check_column(collection, &order.field)?;
            let dir = match order.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            sql.push_str(&format!(" ORDER BY {table}.{column} {dir}, {table}.rowid {dir}"));
        }
        if let Some(limit) = limit {
            params.push(SqlValue::Integer(i64::from(limit)));
            sql.push_str(&format!(" LIMIT ?{}", params.len()));
        }

        let mut stmt = self.conn().prepare(&sql)?;
        let names = schema::column_names(&stmt);
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            schema::row_to_record(row, &names)
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Fetch a single record by identity.
    pub fn get(&self, id: &RecordId) -> Result<Record> {
        let filter = Filter::eq(ID_FIELD, id.to_string());
        self.select(id.collection(), &filter, None, Some(1))?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Count the records of `collection` matching `filter`.
    pub fn count(&self, collection: Collection, filter: &Filter) -> Result<u64> {
        let mut sql = format!("SELECT COUNT(*) FROM {}", collection.table());
        let (clause, params) = where_clause(collection, filter, 1)?;
        if !clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        let n: i64 = self
            .conn()
            .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a record, assigning it a fresh identity. `created_at` defaults
    /// to now.
    pub fn create(&self, collection: Collection, fields: &Record) -> Result<Record> {
        for field in schema::required(collection) {
            match fields.get(*field) {
                Some(v) if !v.is_null() => {}
                _ => return Err(StoreError::MissingField(field.to_string())),
            }
        }

        let id = RecordId::generate(collection);
        let mut columns = vec![ID_FIELD];
        let mut values = vec![SqlValue::Text(id.to_string())];
        let mut has_created_at = false;

        for (field, value) in fields {
            if field == CREATED_AT_FIELD {
                has_created_at = true;
                columns.push(CREATED_AT_FIELD);
            } else {
                columns.push(schema::check_writable(collection, field)?);
            }
            values.push(schema::to_sql(field, value)?);
        }
        if !has_created_at {
            columns.push(CREATED_AT_FIELD);
            values.push(SqlValue::Text(schema::format_timestamp(Utc::now())));
        }

        let placeholders = (1..=values.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            collection.table(),
            columns.join(", ")
        );
        self.conn().execute(&sql, params_from_iter(values.iter()))?;

        let record = self.get(&id)?;
        self.hub.publish(collection, ChangeAction::Create, &record);
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Merge `partial` into the record. Fails with `NotFound` if absent.
    pub fn merge(&self, id: &RecordId, partial: &Record) -> Result<Record> {
        self.merge_if(id, partial, &Filter::All)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Merge `partial` into the record only if it currently matches
    /// `precondition`.
    ///
    /// Returns `Ok(None)` when the record exists but the precondition does
    /// not hold, and `NotFound` when the record does not exist.
    pub fn merge_if(
        &self,
        id: &RecordId,
        partial: &Record,
        precondition: &Filter,
    ) -> Result<Option<Record>> {
        let collection = id.collection();
        if partial.is_empty() {
            return Err(StoreError::InvalidValue {
                field: String::from("*"),
                reason: "empty update".to_string(),
            });
        }

        let mut sets = Vec::new();
        let mut params = Vec::new();
        for (field, value) in partial {
            let column = schema::check_writable(collection, field)?;
            params.push(schema::to_sql(field, value)?);
            sets.push(format!("{column} = ?{}", params.len()));
        }
        params.push(SqlValue::Text(id.to_string()));
        let mut sql = format!(
            "UPDATE {} SET {} WHERE {}.id = ?{}",
            collection.table(),
            sets.join(", "),
            collection.table(),
            params.len()
        );
        let (clause, extra) = where_clause(collection, precondition, params.len() + 1)?;
        if !clause.is_empty() {
            sql.push_str(" AND ");
            sql.push_str(&clause);
        }
        params.extend(extra);

        let affected = self.conn().execute(&sql, params_from_iter(params.iter()))?;
        if affected == 0 {
            // Distinguish a failed precondition from a missing record.
            self.get(id)?;
            return Ok(None);
        }

        let record = self.get(id)?;
        self.hub.publish(collection, ChangeAction::Update, &record);
        Ok(Some(record))
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete the record, returning it as it was before deletion.
    pub fn delete(&self, id: &RecordId) -> Result<Record> {
        let record = self.get(id)?;
        self.conn().execute(
            &format!("DELETE FROM {} WHERE id = ?1", id.collection().table()),
            [id.to_string()],
        )?;
        self.hub.publish(id.collection(), ChangeAction::Delete, &record);
        Ok(record)
    }
}
