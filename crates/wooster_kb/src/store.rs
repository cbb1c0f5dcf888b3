//! Metadata, full-text, and vector-row storage.

use crate::error::KbError;
use crate::types::{Block, BlockKind, Document, LinkRecord, RefKind, RetrievalTrace};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;

/// SQLite-backed store for documents, blocks, links, FTS rows, vectors,
/// retrieval traces, and ingestion failure records.
///
/// Runs in WAL mode with a single writer connection behind a mutex.
/// Document upserts write metadata, FTS rows, and links in one transaction:
/// either all land or none do.
pub struct KbStore {
    conn: Mutex<Connection>,
}

impl KbStore {
    /// Opens (and migrates) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the database cannot be opened or the
    /// schema cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KbError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens an in-memory store, for tests.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, KbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, KbError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                 id           TEXT PRIMARY KEY,
                 path         TEXT NOT NULL UNIQUE,
                 title        TEXT NOT NULL,
                 aliases      TEXT NOT NULL DEFAULT '[]',
                 tags         TEXT NOT NULL DEFAULT '[]',
                 created_at   TEXT NOT NULL,
                 updated_at   TEXT NOT NULL,
                 content_hash TEXT NOT NULL,
                 namespace    TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS blocks (
                 id           TEXT PRIMARY KEY,
                 doc_id       TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                 kind         TEXT NOT NULL,
                 heading_path TEXT NOT NULL DEFAULT '[]',
                 start_offset INTEGER NOT NULL,
                 end_offset   INTEGER NOT NULL,
                 text         TEXT NOT NULL,
                 block_hash   TEXT NOT NULL,
                 has_embedding INTEGER NOT NULL DEFAULT 0
             );
             CREATE INDEX IF NOT EXISTS blocks_by_doc ON blocks(doc_id);
             CREATE TABLE IF NOT EXISTS links (
                 id             INTEGER PRIMARY KEY AUTOINCREMENT,
                 src_block_id   TEXT NOT NULL REFERENCES blocks(id) ON DELETE CASCADE,
                 dst_reference  TEXT NOT NULL,
                 resolved_doc_id TEXT,
                 ref_kind       TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS links_by_target ON links(resolved_doc_id);
             CREATE TABLE IF NOT EXISTS block_vectors (
                 block_id TEXT PRIMARY KEY REFERENCES blocks(id) ON DELETE CASCADE,
                 embedding BLOB NOT NULL
             );
             CREATE VIRTUAL TABLE IF NOT EXISTS block_fts
                 USING fts5(block_id UNINDEXED, text, tokenize='porter unicode61');
             CREATE TABLE IF NOT EXISTS retrieval_traces (
                 id            TEXT PRIMARY KEY,
                 timestamp     TEXT NOT NULL,
                 query         TEXT NOT NULL,
                 fts_hits      TEXT NOT NULL,
                 vector_hits   TEXT NOT NULL,
                 rerank_scores TEXT NOT NULL,
                 selected      TEXT NOT NULL,
                 latency_ms    INTEGER NOT NULL,
                 degraded      INTEGER NOT NULL DEFAULT 0
             );
             CREATE TABLE IF NOT EXISTS ingest_failures (
                 path        TEXT PRIMARY KEY,
                 error       TEXT NOT NULL,
                 failed_at   TEXT NOT NULL,
                 retry_count INTEGER NOT NULL DEFAULT 0
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Documents and blocks
    // ─────────────────────────────────────────────────────────────────────

    /// Upserts a document with its blocks and links in one transaction.
    ///
    /// Blocks keep their ids (and therefore their vectors) when their hash
    /// is unchanged; removed blocks cascade to links, FTS rows, and vectors.
    /// Returns the ids of blocks that are new or changed and need embedding.
    pub fn upsert_document(
        &self,
        document: &Document,
        blocks: &[Block],
        links: &[LinkRecord],
    ) -> Result<Vec<String>, KbError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        // Replace-by-path: a moved id under the same path is a new document.
        let previous_id: Option<String> = tx
            .query_row(
                "SELECT id FROM documents WHERE path = ?1",
                [&document.path],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(previous_id) = &previous_id
            && previous_id != &document.id
        {
            delete_document_tx(&tx, previous_id)?;
        }

        tx.execute(
            "INSERT INTO documents (id, path, title, aliases, tags, created_at, updated_at, content_hash, namespace)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                 path = excluded.path,
                 title = excluded.title,
                 aliases = excluded.aliases,
                 tags = excluded.tags,
                 updated_at = excluded.updated_at,
                 content_hash = excluded.content_hash,
                 namespace = excluded.namespace",
            params![
                document.id,
                document.path,
                document.title,
                serde_json::to_string(&document.aliases)?,
                serde_json::to_string(&document.tags)?,
                document.created_at.to_rfc3339(),
                document.updated_at.to_rfc3339(),
                document.content_hash,
                document.namespace,
            ],
        )?;

        // Diff blocks by id (ids are content-derived, so an unchanged block
        // keeps its id and its embedding).
        let mut existing: std::collections::HashSet<String> = {
            let mut stmt = tx.prepare("SELECT id FROM blocks WHERE doc_id = ?1")?;
            let rows = stmt.query_map([&document.id], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };

        let mut needs_embedding = Vec::new();
        for block in blocks {
            if existing.remove(&block.id) {
                tx.execute(
                    "UPDATE blocks SET heading_path = ?2, start_offset = ?3, end_offset = ?4
                     WHERE id = ?1",
                    params![
                        block.id,
                        serde_json::to_string(&block.heading_path)?,
                        block.start_offset as i64,
                        block.end_offset as i64,
                    ],
                )?;
            } else {
                tx.execute(
                    "INSERT INTO blocks (id, doc_id, kind, heading_path, start_offset, end_offset, text, block_hash, has_embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
                    params![
                        block.id,
                        block.doc_id,
                        block.kind.as_str(),
                        serde_json::to_string(&block.heading_path)?,
                        block.start_offset as i64,
                        block.end_offset as i64,
                        block.text,
                        block.block_hash,
                    ],
                )?;
                tx.execute(
                    "INSERT INTO block_fts (block_id, text) VALUES (?1, ?2)",
                    params![block.id, block.text],
                )?;
                needs_embedding.push(block.id.clone());
            }
        }

        // Whatever is left existed before but not anymore.
        for stale_id in existing {
            tx.execute("DELETE FROM block_fts WHERE block_id = ?1", [&stale_id])?;
            tx.execute("DELETE FROM blocks WHERE id = ?1", [&stale_id])?;
        }

        // Links are cheap; rewrite them wholesale.
        tx.execute(
            "DELETE FROM links WHERE src_block_id IN (SELECT id FROM blocks WHERE doc_id = ?1)",
            [&document.id],
        )?;
        for link in links {
            tx.execute(
                "INSERT INTO links (src_block_id, dst_reference, resolved_doc_id, ref_kind)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    link.src_block_id,
                    link.dst_reference,
                    link.resolved_doc_id,
                    link.ref_kind.as_str(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(needs_embedding)
    }

    /// Deletes a document, cascading to blocks, links, FTS rows, vectors.
    pub fn delete_document(&self, doc_id: &str) -> Result<(), KbError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        delete_document_tx(&tx, doc_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Fetches a document by id.
    pub fn document(&self, doc_id: &str) -> Result<Option<Document>, KbError> {
        self.conn
            .lock()
            .query_row(
                &format!("{SELECT_DOCUMENT} WHERE id = ?1"),
                [doc_id],
                row_to_document,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Fetches a document by source path.
    pub fn document_by_path(&self, path: &str) -> Result<Option<Document>, KbError> {
        self.conn
            .lock()
            .query_row(
                &format!("{SELECT_DOCUMENT} WHERE path = ?1"),
                [path],
                row_to_document,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Resolves a wikilink reference: by id, then by title, then by alias.
    ///
    /// Ties within a class resolve to the lexicographically smallest path.
    pub fn resolve_reference(&self, reference: &str) -> Result<Option<String>, KbError> {
        let conn = self.conn.lock();
        if let Some(id) = conn
            .query_row(
                "SELECT id FROM documents WHERE id = ?1",
                [reference],
                |row| row.get::<_, String>(0),
            )
            .optional()?
        {
            return Ok(Some(id));
        }
        if let Some(id) = conn
            .query_row(
                "SELECT id FROM documents WHERE title = ?1 ORDER BY path LIMIT 1",
                [reference],
                |row| row.get::<_, String>(0),
            )
            .optional()?
        {
            return Ok(Some(id));
        }
        // Aliases live in a JSON array column; scan is fine at note scale.
        let mut stmt = conn.prepare("SELECT id, aliases FROM documents ORDER BY path")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, aliases_json) = row?;
            let aliases: Vec<String> = serde_json::from_str(&aliases_json).unwrap_or_default();
            if aliases.iter().any(|alias| alias == reference) {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Lists all documents, optionally restricted to a namespace.
    pub fn documents(&self, namespace: Option<&str>) -> Result<Vec<Document>, KbError> {
        let conn = self.conn.lock();
        let mut out = Vec::new();
        match namespace {
            Some(namespace) => {
                let mut stmt =
                    conn.prepare(&format!("{SELECT_DOCUMENT} WHERE namespace = ?1 ORDER BY path"))?;
                let rows = stmt.query_map([namespace], row_to_document)?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!("{SELECT_DOCUMENT} ORDER BY path"))?;
                let rows = stmt.query_map([], row_to_document)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    /// Returns the stored content hash for a path, if the document exists.
    pub fn content_hash_of_path(&self, path: &str) -> Result<Option<String>, KbError> {
        self.conn
            .lock()
            .query_row(
                "SELECT content_hash FROM documents WHERE path = ?1",
                [path],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Fetches blocks by id, preserving the requested order.
    pub fn blocks_by_ids(&self, ids: &[String]) -> Result<Vec<Block>, KbError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("{SELECT_BLOCK} WHERE id = ?1"))?;
        let mut out = Vec::new();
        for id in ids {
            if let Some(block) = stmt.query_row([id], row_to_block).optional()? {
                out.push(block);
            }
        }
        Ok(out)
    }

    /// Returns the ids of all blocks of a document.
    pub fn block_ids_of(&self, doc_id: &str) -> Result<Vec<String>, KbError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id FROM blocks WHERE doc_id = ?1 ORDER BY start_offset")?;
        let rows = stmt.query_map([doc_id], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Returns the first (by offset) block of a document.
    pub fn first_block_of(&self, doc_id: &str) -> Result<Option<Block>, KbError> {
        self.conn
            .lock()
            .query_row(
                &format!("{SELECT_BLOCK} WHERE doc_id = ?1 ORDER BY start_offset LIMIT 1"),
                [doc_id],
                row_to_block,
            )
            .optional()
            .map_err(Into::into)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Full-text search
    // ─────────────────────────────────────────────────────────────────────

    /// Runs stemmed full-text search and returns `(block_id, bm25)` pairs,
    /// best first. Lower bm25 is better; the query layer normalizes.
    pub fn fts_search(&self, query: &str, limit: usize) -> Result<Vec<(String, f64)>, KbError> {
        let Some(match_expr) = fts_match_expression(query) else {
            return Ok(Vec::new());
        };
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT block_id, bm25(block_fts) FROM block_fts
             WHERE block_fts MATCH ?1 ORDER BY bm25(block_fts) LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![match_expr, limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Vectors
    // ─────────────────────────────────────────────────────────────────────

    /// Block ids still waiting for embeddings, oldest first.
    pub fn pending_blocks(&self, limit: usize) -> Result<Vec<Block>, KbError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_BLOCK} WHERE has_embedding = 0 ORDER BY rowid LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit as i64], row_to_block)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Stores vectors for a batch of blocks atomically.
    ///
    /// Either every `(block, vector)` pair lands and the blocks are marked
    /// embedded, or the previous vectors stay in place untouched.
    pub fn store_vectors(&self, entries: &[(String, Vec<f32>)]) -> Result<(), KbError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for (block_id, vector) in entries {
            tx.execute(
                "INSERT INTO block_vectors (block_id, embedding) VALUES (?1, ?2)
                 ON CONFLICT(block_id) DO UPDATE SET embedding = excluded.embedding",
                params![block_id, vector_to_bytes(vector)],
            )?;
            tx.execute(
                "UPDATE blocks SET has_embedding = 1 WHERE id = ?1",
                [block_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Loads every stored vector, for index warm-up.
    pub fn all_vectors(&self) -> Result<Vec<(String, Vec<f32>)>, KbError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT block_id, embedding FROM block_vectors")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (block_id, bytes) = row?;
            out.push((block_id, bytes_to_vector(&bytes)));
        }
        Ok(out)
    }

    /// Drops all vectors and marks every block un-embedded.
    ///
    /// Used by the explicit rebuild after an embedder change.
    pub fn clear_vectors(&self) -> Result<(), KbError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM block_vectors", [])?;
        tx.execute("UPDATE blocks SET has_embedding = 0", [])?;
        tx.commit()?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Links
    // ─────────────────────────────────────────────────────────────────────

    /// Links whose resolved target is `doc_id`.
    pub fn backlinks(&self, doc_id: &str) -> Result<Vec<LinkRecord>, KbError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT src_block_id, dst_reference, resolved_doc_id, ref_kind
             FROM links WHERE resolved_doc_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([doc_id], row_to_link)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Number of distinct documents linking to `doc_id`.
    pub fn in_degree(&self, doc_id: &str) -> Result<usize, KbError> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(DISTINCT b.doc_id) FROM links l
             JOIN blocks b ON b.id = l.src_block_id
             WHERE l.resolved_doc_id = ?1",
            [doc_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Documents referenced from blocks of `doc_id` (outgoing neighbors).
    pub fn outgoing_neighbors(&self, doc_id: &str, limit: usize) -> Result<Vec<String>, KbError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT l.resolved_doc_id FROM links l
             JOIN blocks b ON b.id = l.src_block_id
             WHERE b.doc_id = ?1 AND l.resolved_doc_id IS NOT NULL LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![doc_id, limit as i64], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Blocks in other documents that mention this document's title or an
    /// alias without linking to it.
    pub fn unlinked_mentions(&self, document: &Document) -> Result<Vec<Block>, KbError> {
        let mut needles = vec![document.title.clone()];
        needles.extend(document.aliases.iter().cloned());

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_BLOCK} WHERE doc_id != ?1 AND text LIKE ?2
             AND NOT EXISTS (
                 SELECT 1 FROM links
                 WHERE links.src_block_id = blocks.id AND links.resolved_doc_id = ?1
             )
             ORDER BY id"
        ))?;

        let mut out: Vec<Block> = Vec::new();
        for needle in needles {
            if needle.is_empty() {
                continue;
            }
            let pattern = format!("%{needle}%");
            let rows = stmt.query_map(params![document.id, pattern], row_to_block)?;
            for row in rows {
                let block = row?;
                if !out.iter().any(|seen| seen.id == block.id) {
                    out.push(block);
                }
            }
        }
        Ok(out)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Traces and failure records
    // ─────────────────────────────────────────────────────────────────────

    /// Persists a retrieval trace.
    pub fn insert_trace(&self, trace: &RetrievalTrace) -> Result<(), KbError> {
        self.conn.lock().execute(
            "INSERT INTO retrieval_traces
                 (id, timestamp, query, fts_hits, vector_hits, rerank_scores, selected, latency_ms, degraded)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                trace.id,
                trace.timestamp.to_rfc3339(),
                trace.query,
                serde_json::to_string(&trace.fts_hits)?,
                serde_json::to_string(&trace.vector_hits)?,
                serde_json::to_string(&trace.rerank_scores)?,
                serde_json::to_string(&trace.selected)?,
                trace.latency_ms as i64,
                trace.degraded,
            ],
        )?;
        Ok(())
    }

    /// Fetches a retrieval trace by id.
    pub fn trace(&self, trace_id: &str) -> Result<Option<RetrievalTrace>, KbError> {
        self.conn
            .lock()
            .query_row(
                "SELECT id, timestamp, query, fts_hits, vector_hits, rerank_scores, selected, latency_ms, degraded
                 FROM retrieval_traces WHERE id = ?1",
                [trace_id],
                |row| {
                    let timestamp: String = row.get(1)?;
                    let fts_hits: String = row.get(3)?;
                    let vector_hits: String = row.get(4)?;
                    let rerank_scores: String = row.get(5)?;
                    let selected: String = row.get(6)?;
                    Ok(RetrievalTrace {
                        id: row.get(0)?,
                        timestamp: DateTime::parse_from_rfc3339(&timestamp)
                            .map(|dt| dt.with_timezone(&Utc))
                            .unwrap_or_default(),
                        query: row.get(2)?,
                        fts_hits: serde_json::from_str(&fts_hits).unwrap_or_default(),
                        vector_hits: serde_json::from_str(&vector_hits).unwrap_or_default(),
                        rerank_scores: serde_json::from_str(&rerank_scores).unwrap_or_default(),
                        selected: serde_json::from_str(&selected).unwrap_or_default(),
                        latency_ms: row.get::<_, i64>(7)? as u64,
                        degraded: row.get(8)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Records (or bumps) an ingestion failure for a path.
    pub fn record_ingest_failure(&self, path: &str, error: &str) -> Result<(), KbError> {
        self.conn.lock().execute(
            "INSERT INTO ingest_failures (path, error, failed_at, retry_count)
             VALUES (?1, ?2, ?3, 0)
             ON CONFLICT(path) DO UPDATE SET
                 error = excluded.error,
                 failed_at = excluded.failed_at,
                 retry_count = retry_count + 1",
            params![path, error, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Clears the failure record for a path after a successful ingestion.
    pub fn clear_ingest_failure(&self, path: &str) -> Result<(), KbError> {
        self.conn
            .lock()
            .execute("DELETE FROM ingest_failures WHERE path = ?1", [path])?;
        Ok(())
    }

    /// Paths with outstanding ingestion failures.
    pub fn failed_paths(&self) -> Result<Vec<String>, KbError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT path FROM ingest_failures ORDER BY path")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

impl core::fmt::Debug for KbStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KbStore").finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping and helpers
// ─────────────────────────────────────────────────────────────────────────────

const SELECT_DOCUMENT: &str = "SELECT id, path, title, aliases, tags, created_at, updated_at, content_hash, namespace
     FROM documents";

const SELECT_BLOCK: &str = "SELECT id, doc_id, kind, heading_path, start_offset, end_offset, text, block_hash
     FROM blocks";

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    let aliases: String = row.get(3)?;
    let tags: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    Ok(Document {
        id: row.get(0)?,
        path: row.get(1)?,
        title: row.get(2)?,
        aliases: serde_json::from_str(&aliases).unwrap_or_default(),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
        content_hash: row.get(7)?,
        namespace: row.get(8)?,
    })
}

fn row_to_block(row: &Row<'_>) -> rusqlite::Result<Block> {
    let kind: String = row.get(2)?;
    let heading_path: String = row.get(3)?;
    Ok(Block {
        id: row.get(0)?,
        doc_id: row.get(1)?,
        kind: BlockKind::parse(&kind).unwrap_or(BlockKind::Paragraph),
        heading_path: serde_json::from_str(&heading_path).unwrap_or_default(),
        start_offset: row.get::<_, i64>(4)? as usize,
        end_offset: row.get::<_, i64>(5)? as usize,
        text: row.get(6)?,
        block_hash: row.get(7)?,
    })
}

fn row_to_link(row: &Row<'_>) -> rusqlite::Result<LinkRecord> {
    let ref_kind: String = row.get(3)?;
    Ok(LinkRecord {
        src_block_id: row.get(0)?,
        dst_reference: row.get(1)?,
        resolved_doc_id: row.get(2)?,
        ref_kind: RefKind::parse(&ref_kind).unwrap_or(RefKind::Wikilink),
    })
}

fn parse_datetime(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn delete_document_tx(tx: &rusqlite::Transaction<'_>, doc_id: &str) -> Result<(), KbError> {
    // FTS rows are not FK-governed; clear them before the cascade.
    tx.execute(
        "DELETE FROM block_fts WHERE block_id IN (SELECT id FROM blocks WHERE doc_id = ?1)",
        [doc_id],
    )?;
    tx.execute("DELETE FROM documents WHERE id = ?1", [doc_id])?;
    Ok(())
}

/// Builds an FTS5 match expression from free text: quoted terms joined with
/// OR for recall. Returns `None` when nothing searchable remains.
fn fts_match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|term| {
            term.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
        })
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{term}\""))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockKind;

    fn doc(id: &str, path: &str, title: &str) -> Document {
        Document {
            id: id.to_string(),
            path: path.to_string(),
            title: title.to_string(),
            aliases: vec![],
            tags: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            content_hash: "hash".to_string(),
            namespace: "notes".to_string(),
        }
    }

    fn block(id: &str, doc_id: &str, text: &str) -> Block {
        Block {
            id: id.to_string(),
            doc_id: doc_id.to_string(),
            kind: BlockKind::Paragraph,
            heading_path: vec![],
            start_offset: 0,
            end_offset: text.len(),
            text: text.to_string(),
            block_hash: format!("h-{id}"),
        }
    }

    #[test]
    fn upsert_reports_only_new_blocks_for_embedding() {
        let store = KbStore::open_in_memory().unwrap();
        let document = doc("d1", "/notes/a.md", "A");

        let first = store
            .upsert_document(
                &document,
                &[block("b1", "d1", "alpha"), block("b2", "d1", "beta")],
                &[],
            )
            .unwrap();
        assert_eq!(first, vec!["b1".to_string(), "b2".to_string()]);

        // Re-ingesting with one unchanged and one new block.
        let second = store
            .upsert_document(
                &document,
                &[block("b1", "d1", "alpha"), block("b3", "d1", "gamma")],
                &[],
            )
            .unwrap();
        assert_eq!(second, vec!["b3".to_string()]);

        // b2 is gone everywhere.
        assert!(store.blocks_by_ids(&["b2".to_string()]).unwrap().is_empty());
        assert!(store.fts_search("beta", 10).unwrap().is_empty());
    }

    #[test]
    fn fts_finds_stemmed_terms() {
        let store = KbStore::open_in_memory().unwrap();
        let document = doc("d1", "/notes/a.md", "A");
        store
            .upsert_document(
                &document,
                &[block("b1", "d1", "retrieval combines signals")],
                &[],
            )
            .unwrap();

        // Porter stemming: "combining" matches "combines".
        let hits = store.fts_search("combining retrieval", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "b1");
    }

    #[test]
    fn delete_document_cascades_everywhere() {
        let store = KbStore::open_in_memory().unwrap();
        let document = doc("d1", "/notes/a.md", "A");
        store
            .upsert_document(&document, &[block("b1", "d1", "alpha")], &[])
            .unwrap();
        store
            .store_vectors(&[("b1".to_string(), vec![0.1, 0.2])])
            .unwrap();

        store.delete_document("d1").unwrap();

        assert!(store.document("d1").unwrap().is_none());
        assert!(store.blocks_by_ids(&["b1".to_string()]).unwrap().is_empty());
        assert!(store.all_vectors().unwrap().is_empty());
        assert!(store.fts_search("alpha", 10).unwrap().is_empty());
    }

    #[test]
    fn reference_resolution_prefers_id_then_title_then_alias() {
        let store = KbStore::open_in_memory().unwrap();
        let mut by_alias = doc("d-alias", "/notes/alias.md", "Unrelated");
        by_alias.aliases = vec!["target".to_string()];
        let by_title = doc("d-title", "/notes/title.md", "target");
        let by_id = doc("target", "/notes/id.md", "Something Else");

        for d in [&by_alias, &by_title, &by_id] {
            store.upsert_document(d, &[], &[]).unwrap();
        }

        assert_eq!(
            store.resolve_reference("target").unwrap(),
            Some("target".to_string())
        );

        store.delete_document("target").unwrap();
        assert_eq!(
            store.resolve_reference("target").unwrap(),
            Some("d-title".to_string())
        );

        store.delete_document("d-title").unwrap();
        assert_eq!(
            store.resolve_reference("target").unwrap(),
            Some("d-alias".to_string())
        );
    }

    #[test]
    fn vectors_roundtrip_and_pending_shrinks() {
        let store = KbStore::open_in_memory().unwrap();
        let document = doc("d1", "/notes/a.md", "A");
        store
            .upsert_document(
                &document,
                &[block("b1", "d1", "alpha"), block("b2", "d1", "beta")],
                &[],
            )
            .unwrap();

        assert_eq!(store.pending_blocks(10).unwrap().len(), 2);
        store
            .store_vectors(&[("b1".to_string(), vec![1.0, -0.5])])
            .unwrap();

        let pending = store.pending_blocks(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "b2");

        let vectors = store.all_vectors().unwrap();
        assert_eq!(vectors[0].1, vec![1.0, -0.5]);
    }

    #[test]
    fn backlinks_and_in_degree() {
        let store = KbStore::open_in_memory().unwrap();
        let target = doc("target", "/notes/t.md", "Target");
        let source = doc("src", "/notes/s.md", "Source");
        store.upsert_document(&target, &[], &[]).unwrap();
        store
            .upsert_document(
                &source,
                &[block("b1", "src", "see [[Target]]")],
                &[LinkRecord {
                    src_block_id: "b1".to_string(),
                    dst_reference: "Target".to_string(),
                    resolved_doc_id: Some("target".to_string()),
                    ref_kind: RefKind::Wikilink,
                }],
            )
            .unwrap();

        let backlinks = store.backlinks("target").unwrap();
        assert_eq!(backlinks.len(), 1);
        assert_eq!(backlinks[0].src_block_id, "b1");
        assert_eq!(store.in_degree("target").unwrap(), 1);
    }

    #[test]
    fn unlinked_mentions_excludes_linked_blocks() {
        let store = KbStore::open_in_memory().unwrap();
        let target = doc("target", "/notes/t.md", "Wooster");
        let source = doc("src", "/notes/s.md", "Source");
        store.upsert_document(&target, &[], &[]).unwrap();
        store
            .upsert_document(
                &source,
                &[
                    block("b1", "src", "Wooster is mentioned here without a link"),
                    block("b2", "src", "linked mention of [[Wooster]]"),
                ],
                &[LinkRecord {
                    src_block_id: "b2".to_string(),
                    dst_reference: "Wooster".to_string(),
                    resolved_doc_id: Some("target".to_string()),
                    ref_kind: RefKind::Wikilink,
                }],
            )
            .unwrap();

        let mentions = store.unlinked_mentions(&target).unwrap();
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].id, "b1");
    }
}
