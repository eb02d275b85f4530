//! Unified structured+vector store, backed by `rusqlite`.
//!
//! Grounded on the original `StorageSystem` (DuckDB-backed), translated to
//! SQLite with parameterized statements in place of the original's
//! f-string-built SQL — see `DESIGN.md` for that deviation's rationale.

pub mod record;

use crate::error::StoreError;
use record::Record;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Handle to the on-disk unified store.
pub struct UnifiedStore {
    conn: Connection,
}

impl UnifiedStore {
    /// Open (creating if absent) the store at `path`, initializing its schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS unified_data (
                record_id    TEXT PRIMARY KEY,
                file_path    TEXT NOT NULL,
                file_name    TEXT NOT NULL,
                file_type    TEXT NOT NULL,
                processed_at TEXT NOT NULL,
                sub_id       INTEGER NOT NULL,
                data         TEXT NOT NULL,
                vector       TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_unified_data_file_path ON unified_data(file_path);
            CREATE INDEX IF NOT EXISTS idx_unified_data_file_type ON unified_data(file_type);
            CREATE INDEX IF NOT EXISTS idx_unified_data_processed_at ON unified_data(processed_at);
            CREATE TABLE IF NOT EXISTS file_cache (
                path          TEXT PRIMARY KEY,
                processed_at  TEXT NOT NULL,
                size_bytes    INTEGER NOT NULL,
                record_count  INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Replace all records for the given set of file paths in a single
    /// transaction: delete existing rows for those paths, then insert the
    /// new set. Matches the original's delete-then-insert rebuild-by-path
    /// behavior, including the "rename is delete+create" invariant (a
    /// renamed file's old path's rows are deleted, and its new path's rows
    /// are inserted fresh, with no identity carried across the rename).
    pub fn replace_records_for_paths(
        &mut self,
        paths: &[String],
        records: &[Record],
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut del = tx.prepare("DELETE FROM unified_data WHERE file_path = ?1")?;
            for path in paths {
                del.execute(params![path])?;
            }
        }
        {
            let mut ins = tx.prepare(
                "INSERT INTO unified_data
                    (record_id, file_path, file_name, file_type, processed_at, sub_id, data, vector)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for record in records {
                let data_json = serde_json::to_string(&record.data)?;
                let vector_json = record
                    .vector
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                ins.execute(params![
                    record.record_id,
                    record.file_path,
                    record.file_name,
                    record.file_type,
                    record.processed_at.to_rfc3339(),
                    record.sub_id,
                    data_json,
                    vector_json,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete every record associated with the given file paths, returning
    /// the number of rows removed.
    pub fn remove_by_paths(&mut self, paths: &[String]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let mut removed = 0usize;
        {
            let mut del = tx.prepare("DELETE FROM unified_data WHERE file_path = ?1")?;
            for path in paths {
                removed += del.execute(params![path])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Fetch every record that carries a non-null embedding vector, for
    /// rebuilding the in-memory vector index at startup.
    pub fn load_vectors(&self) -> Result<Vec<Record>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT record_id, file_path, file_name, file_type, processed_at, sub_id, data, vector
             FROM unified_data WHERE vector IS NOT NULL",
        )?;
        let rows = stmt.query_map([], Self::row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Run a structured, parameterized text-substring query against `data`.
    pub fn query_text(&self, keyword: &str, limit: i64) -> Result<Vec<Record>, StoreError> {
        let pattern = format!("%{}%", keyword.to_lowercase());
        let mut stmt = self.conn.prepare(
            "SELECT record_id, file_path, file_name, file_type, processed_at, sub_id, data, vector
             FROM unified_data WHERE lower(data) LIKE ?1
             ORDER BY processed_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![pattern, limit], Self::row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Run a structured query over `file_type`.
    pub fn query_file_type(&self, file_type: &str, limit: i64) -> Result<Vec<Record>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT record_id, file_path, file_name, file_type, processed_at, sub_id, data, vector
             FROM unified_data WHERE file_type = ?1
             ORDER BY processed_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![file_type, limit], Self::row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Run a structured query over the `processed_at` date range, inclusive.
    /// Matches the original's unlimited-results behavior for date queries.
    pub fn query_date_range(
        &self,
        start: &str,
        end: &str,
    ) -> Result<Vec<Record>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT record_id, file_path, file_name, file_type, processed_at, sub_id, data, vector
             FROM unified_data WHERE processed_at BETWEEN ?1 AND ?2
             ORDER BY processed_at DESC",
        )?;
        let rows = stmt.query_map(params![start, end], Self::row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Look up the cached ingestion metadata for `path`, if any.
    pub fn get_cache_entry(&self, path: &str) -> Result<Option<(String, u64, u64)>, StoreError> {
        self.conn
            .query_row(
                "SELECT processed_at, size_bytes, record_count FROM file_cache WHERE path = ?1",
                params![path],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)? as u64,
                        row.get::<_, i64>(2)? as u64,
                    ))
                },
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// Insert or replace the cache entry for `path`.
    pub fn put_cache_entry(
        &self,
        path: &str,
        processed_at: &str,
        size_bytes: u64,
        record_count: u64,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO file_cache (path, processed_at, size_bytes, record_count)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                processed_at = excluded.processed_at,
                size_bytes = excluded.size_bytes,
                record_count = excluded.record_count",
            params![path, processed_at, size_bytes as i64, record_count as i64],
        )?;
        Ok(())
    }

    /// Remove the cache entry for `path`, if present.
    pub fn remove_cache_entry(&self, path: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM file_cache WHERE path = ?1", params![path])?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        let data_json: String = row.get(6)?;
        let vector_json: Option<String> = row.get(7)?;
        let data: BTreeMap<String, Value> = serde_json::from_str(&data_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e)))?;
        let vector = vector_json
            .map(|v| serde_json::from_str::<Vec<f32>>(&v))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e)))?;
        let processed_at_raw: String = row.get(4)?;
        let processed_at = chrono::DateTime::parse_from_rfc3339(&processed_at_raw)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?;
        Ok(Record {
            record_id: row.get(0)?,
            file_path: row.get(1)?,
            file_name: row.get(2)?,
            file_type: row.get(3)?,
            processed_at,
            sub_id: row.get(5)?,
            data,
            vector,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record(path: &str, sub_id: i64) -> Record {
        Record {
            record_id: format!("{path}:{sub_id}"),
            file_path: path.to_string(),
            file_name: path.to_string(),
            file_type: "text".to_string(),
            processed_at: chrono::Utc::now(),
            sub_id,
            data: Record::flatten_record(&json!({"content": "hello world"})),
            vector: Some(vec![0.1, 0.2, 0.3]),
        }
    }

    #[test]
    fn replace_then_query_roundtrips() {
        let mut store = UnifiedStore::open_in_memory().unwrap();
        let records = vec![sample_record("a.txt", 0)];
        store
            .replace_records_for_paths(&["a.txt".to_string()], &records)
            .unwrap();
        let found = store.query_text("hello", 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record_id, "a.txt:0");
    }

    #[test]
    fn rename_is_delete_then_create_not_update() {
        let mut store = UnifiedStore::open_in_memory().unwrap();
        store
            .replace_records_for_paths(&["old.txt".to_string()], &[sample_record("old.txt", 0)])
            .unwrap();
        // Simulate a rename: delete the old path, insert fresh records at the new path.
        store.remove_by_paths(&["old.txt".to_string()]).unwrap();
        store
            .replace_records_for_paths(&["new.txt".to_string()], &[sample_record("new.txt", 0)])
            .unwrap();
        assert!(store.query_file_type("text", 10).unwrap().iter().all(|r| r.file_path == "new.txt"));
    }

    #[test]
    fn load_vectors_only_returns_rows_with_a_vector() {
        let mut store = UnifiedStore::open_in_memory().unwrap();
        let mut no_vector = sample_record("b.txt", 0);
        no_vector.vector = None;
        store
            .replace_records_for_paths(
                &["a.txt".to_string(), "b.txt".to_string()],
                &[sample_record("a.txt", 0), no_vector],
            )
            .unwrap();
        let vectors = store.load_vectors().unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].file_path, "a.txt");
    }
}
