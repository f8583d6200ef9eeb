//! C1: the relational chunk/document store plus the append-only chat
//! message log. A single `rusqlite::Connection` behind a `parking_lot::Mutex`
//! — `rusqlite` connections aren't `Sync`, and ingestion writes are
//! serialized anyway (§5).

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use crate::types::{ChatMessage, ChatRole, Chunk, ChunkWithSource, Document};

pub struct ChunkStore {
    conn: Mutex<Connection>,
}

impl ChunkStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY,
                filename TEXT NOT NULL,
                sha256 TEXT NOT NULL UNIQUE,
                content_type TEXT NOT NULL,
                stored_path TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY,
                document_id INTEGER NOT NULL REFERENCES documents(id),
                chunk_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id);

            CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chat_messages_session ON chat_messages(session_id);
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "
            CREATE TABLE documents (
                id INTEGER PRIMARY KEY,
                filename TEXT NOT NULL,
                sha256 TEXT NOT NULL UNIQUE,
                content_type TEXT NOT NULL,
                stored_path TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE chunks (
                id INTEGER PRIMARY KEY,
                document_id INTEGER NOT NULL REFERENCES documents(id),
                chunk_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE chat_messages (
                id INTEGER PRIMARY KEY,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Look up a document by content hash, for ingest dedup (invariant 1).
    pub fn find_document_by_sha256(&self, sha256: &str) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, filename, sha256, content_type, stored_path, created_at
             FROM documents WHERE sha256 = ?1",
            params![sha256],
            row_to_document,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Insert a document plus all of its chunks in a single transaction, so a
    /// crash never leaves a document without its chunks or vice versa.
    pub fn insert_document_with_chunks(
        &self,
        filename: &str,
        sha256: &str,
        content_type: &str,
        stored_path: &str,
        created_at: i64,
        chunk_texts: &[String],
        chunk_metadata: &[HashMap<String, serde_json::Value>],
    ) -> Result<(i64, Vec<i64>)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO documents (filename, sha256, content_type, stored_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![filename, sha256, content_type, stored_path, created_at],
        )?;
        let document_id = tx.last_insert_rowid();

        let mut chunk_ids = Vec::with_capacity(chunk_texts.len());
        for (index, text) in chunk_texts.iter().enumerate() {
            let metadata_json = serde_json::to_string(&chunk_metadata[index])?;
            tx.execute(
                "INSERT INTO chunks (document_id, chunk_index, text, metadata_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![document_id, index as i64, text, metadata_json, created_at],
            )?;
            chunk_ids.push(tx.last_insert_rowid());
        }

        tx.commit()?;
        Ok((document_id, chunk_ids))
    }

    /// Fetch chunks by id, joined with their document's filename, preserving
    /// no particular order — callers that need fused-score order re-sort.
    pub fn fetch_chunks_by_ids(&self, ids: &[i64]) -> Result<Vec<ChunkWithSource>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT c.id, c.document_id, c.chunk_index, c.text, c.metadata_json, c.created_at, d.filename
             FROM chunks c JOIN documents d ON d.id = c.document_id
             WHERE c.id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let params_dyn: Vec<&dyn rusqlite::ToSql> =
            ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(params_dyn.as_slice(), |row| {
            Ok(ChunkWithSource {
                chunk: row_to_chunk(row)?,
                filename: row.get(6)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn get_chunk(&self, id: i64) -> Result<Option<Chunk>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, document_id, chunk_index, text, metadata_json, created_at
             FROM chunks WHERE id = ?1",
            params![id],
            row_to_chunk,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn document_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn chunk_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn append_chat_message(
        &self,
        session_id: &str,
        role: ChatRole,
        content: &str,
        created_at: i64,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        let sequence: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence), -1) + 1 FROM chat_messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO chat_messages (session_id, role, content, sequence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, role.as_str(), content, sequence, created_at],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn recent_chat_messages(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, sequence, created_at
             FROM chat_messages WHERE session_id = ?1
             ORDER BY sequence DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![session_id, limit as i64], row_to_chat_message)?;
        let mut messages = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }
}

fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        filename: row.get(1)?,
        sha256: row.get(2)?,
        content_type: row.get(3)?,
        stored_path: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn row_to_chunk(row: &rusqlite::Row) -> rusqlite::Result<Chunk> {
    let metadata_json: String = row.get(4)?;
    let metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
    Ok(Chunk {
        id: row.get(0)?,
        document_id: row.get(1)?,
        chunk_index: row.get::<_, i64>(2)? as u32,
        text: row.get(3)?,
        metadata,
        created_at: row.get(5)?,
    })
}

fn row_to_chat_message(row: &rusqlite::Row) -> rusqlite::Result<ChatMessage> {
    let role_str: String = row.get(2)?;
    let role = match role_str.as_str() {
        "system" => ChatRole::System,
        "assistant" => ChatRole::Assistant,
        _ => ChatRole::User,
    };
    Ok(ChatMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role,
        content: row.get(3)?,
        sequence: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn insert_and_fetch_roundtrip() {
        let store = ChunkStore::open_in_memory().unwrap();
        let (doc_id, chunk_ids) = store
            .insert_document_with_chunks(
                "a.txt",
                "abc123",
                "text/plain",
                "/raw/abc123_a.txt",
                0,
                &["hello world".to_string(), "second chunk".to_string()],
                &[HashMap::new(), HashMap::new()],
            )
            .unwrap();
        assert_eq!(chunk_ids.len(), 2);

        let fetched = store.fetch_chunks_by_ids(&chunk_ids).unwrap();
        assert_eq!(fetched.len(), 2);
        assert!(fetched.iter().all(|c| c.filename == "a.txt"));
        assert_eq!(store.document_count().unwrap(), 1);
        assert_eq!(store.chunk_count().unwrap(), 2);

        let found = store.find_document_by_sha256("abc123").unwrap().unwrap();
        assert_eq!(found.id, doc_id);
    }

    #[test]
    fn dedup_lookup_misses_unknown_hash() {
        let store = ChunkStore::open_in_memory().unwrap();
        assert!(store.find_document_by_sha256("nope").unwrap().is_none());
    }

    #[test]
    fn chat_messages_preserve_session_order() {
        let store = ChunkStore::open_in_memory().unwrap();
        store
            .append_chat_message("s1", ChatRole::User, "hi", 0)
            .unwrap();
        store
            .append_chat_message("s1", ChatRole::Assistant, "hello", 1)
            .unwrap();
        let messages = store.recent_chat_messages("s1", 10).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[1].content, "hello");
    }
}
