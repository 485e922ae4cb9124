//! SQLite document store: schema, CRUD, scans, and transactions.
//!
//! Two relations: `documents` (id, text, timestamps) and
//! `document_metadata` (document_id, key, value, timestamps), the latter
//! cascade-deleted with its parent. Secondary indexes cover `text` for
//! substring scans and `(key, value)` for exact metadata lookups.
//!
//! The store wraps a single `rusqlite::Connection` and supports at most one
//! explicit transaction at a time, tracked by a flag; a transaction still
//! open when the store drops is rolled back.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{generate_document_id, now_secs, Document};

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS documents (
    id         TEXT PRIMARY KEY,
    text       TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS document_metadata (
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL,
    PRIMARY KEY (document_id, key)
);

CREATE INDEX IF NOT EXISTS idx_documents_text ON documents(text);
CREATE INDEX IF NOT EXISTS idx_metadata_key_value ON document_metadata(key, value);
";

pub struct DocumentStore {
    conn: Connection,
    in_transaction: bool,
}

impl DocumentStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            in_transaction: false,
        })
    }

    /// Insert a new document and its metadata rows, returning the assigned id.
    ///
    /// An empty or absent `custom_id` gets a generated id; a supplied id that
    /// already exists fails with [`Error::IdConflict`] (callers wanting
    /// replace-in-place use [`DocumentStore::upsert`]).
    pub fn add(
        &mut self,
        text: &str,
        metadata: &BTreeMap<String, String>,
        custom_id: Option<&str>,
    ) -> Result<String> {
        let id = match custom_id.filter(|s| !s.is_empty()) {
            Some(custom) => {
                if self.exists(custom)? {
                    return Err(Error::IdConflict(custom.to_string()));
                }
                custom.to_string()
            }
            None => generate_document_id(),
        };

        let now = now_secs();
        self.conn
            .execute(
                "INSERT INTO documents (id, text, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![id, text, now, now],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Error::IdConflict(id.clone())
                }
                other => other.into(),
            })?;

        self.write_metadata(&id, metadata, now)?;
        Ok(id)
    }

    /// Insert-or-replace keyed on `id`. Preserves `created_at` for an
    /// existing row; metadata is replaced wholesale. Returns whether a row
    /// with this id already existed.
    pub fn upsert(
        &mut self,
        id: &str,
        text: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<bool> {
        let existed = self.exists(id)?;
        let now = now_secs();
        self.conn.execute(
            "INSERT INTO documents (id, text, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET text = excluded.text, updated_at = excluded.updated_at",
            params![id, text, now, now],
        )?;
        self.conn.execute(
            "DELETE FROM document_metadata WHERE document_id = ?1",
            params![id],
        )?;
        self.write_metadata(id, metadata, now)?;
        Ok(existed)
    }

    /// Update an existing document. Returns `Ok(false)` without side effects
    /// when the id is unknown.
    pub fn update(
        &mut self,
        id: &str,
        text: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<bool> {
        let now = now_secs();
        let changed = self.conn.execute(
            "UPDATE documents SET text = ?1, updated_at = ?2 WHERE id = ?3",
            params![text, now, id],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        self.conn.execute(
            "DELETE FROM document_metadata WHERE document_id = ?1",
            params![id],
        )?;
        self.write_metadata(id, metadata, now)?;
        Ok(true)
    }

    /// Delete a document; metadata rows cascade. Returns whether a row was
    /// removed.
    pub fn delete(&mut self, id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    pub fn get(&self, id: &str) -> Result<Option<Document>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, text, created_at, updated_at FROM documents WHERE id = ?1",
                params![id],
                row_to_document,
            )
            .optional()?;
        match row {
            Some(mut doc) => {
                doc.metadata = self.metadata_for(&doc.id)?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    /// All documents ordered by id.
    pub fn get_all(&self) -> Result<Vec<Document>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, text, created_at, updated_at FROM documents ORDER BY id")?;
        let rows = stmt.query_map([], row_to_document)?;
        let mut docs = Vec::new();
        for row in rows {
            docs.push(row?);
        }
        drop(stmt);
        for doc in &mut docs {
            doc.metadata = self.metadata_for(&doc.id)?;
        }
        Ok(docs)
    }

    pub fn count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// All document ids ordered by id.
    pub fn all_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM documents ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        let hit: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM documents WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    /// Documents whose text contains `query` as a literal substring, ordered
    /// by id. `instr` rather than `LIKE`, so `%` and `_` match themselves.
    pub fn search_substring(&self, query: &str) -> Result<Vec<Document>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, text, created_at, updated_at FROM documents
             WHERE instr(text, ?1) > 0 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![query], row_to_document)?;
        let mut docs = Vec::new();
        for row in rows {
            docs.push(row?);
        }
        drop(stmt);
        for doc in &mut docs {
            doc.metadata = self.metadata_for(&doc.id)?;
        }
        Ok(docs)
    }

    /// Documents carrying an exact `(key, value)` metadata pair, distinct by
    /// id and ordered by id.
    pub fn get_by_metadata(&self, key: &str, value: &str) -> Result<Vec<Document>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT d.id, d.text, d.created_at, d.updated_at
             FROM documents d
             JOIN document_metadata dm ON d.id = dm.document_id
             WHERE dm.key = ?1 AND dm.value = ?2
             ORDER BY d.id",
        )?;
        let rows = stmt.query_map(params![key, value], row_to_document)?;
        let mut docs = Vec::new();
        for row in rows {
            docs.push(row?);
        }
        drop(stmt);
        for doc in &mut docs {
            doc.metadata = self.metadata_for(&doc.id)?;
        }
        Ok(docs)
    }

    /// Begin an explicit transaction. At most one may be active per store.
    pub fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(Error::Storage("transaction already active".to_string()));
        }
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        self.in_transaction = true;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::Storage("no active transaction".to_string()));
        }
        self.conn.execute_batch("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::Storage("no active transaction".to_string()));
        }
        self.conn.execute_batch("ROLLBACK")?;
        self.in_transaction = false;
        Ok(())
    }

    fn write_metadata(
        &mut self,
        id: &str,
        metadata: &BTreeMap<String, String>,
        now: i64,
    ) -> Result<()> {
        for (key, value) in metadata {
            self.conn.execute(
                "INSERT OR REPLACE INTO document_metadata
                 (document_id, key, value, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, key, value, now, now],
            )?;
        }
        Ok(())
    }

    fn metadata_for(&self, id: &str) -> Result<BTreeMap<String, String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM document_metadata WHERE document_id = ?1")?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut metadata = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            metadata.insert(key, value);
        }
        Ok(metadata)
    }
}

impl Drop for DocumentStore {
    fn drop(&mut self) {
        if self.in_transaction {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        text: row.get(1)?,
        metadata: BTreeMap::new(),
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}
