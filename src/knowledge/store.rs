//! Knowledge Store - rusqlite 기반 문서/청크 저장소
//!
//! 문서 레코드와 청크 텍스트를 저장하고 FTS5 키워드 검색을 제공합니다.
//! 저장 위치: `<data_dir>/knowledge.db`
//!
//! - documents: 문서 레코드 (상태, 전체 텍스트)
//! - chunks: 청크 텍스트 (object_id 기준 upsert)
//! - chunks_fts: chunks의 FTS5 외부 콘텐츠 인덱스 (트리거로 동기화)

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row};

use crate::error::{RagError, Result};

use super::document::{ChunkRecord, DocumentRecord, DocumentStatus};
use super::vector::{blob_to_vec, vec_to_blob, ScoredChunk, SearchFilter};

/// SQLite 에러를 재시도 가능 에러로 변환
fn db_err(context: &'static str) -> impl FnOnce(rusqlite::Error) -> RagError {
    move |e| RagError::retryable(format!("{}: {}", context, e))
}

// ============================================================================
// KnowledgeStore
// ============================================================================

/// Knowledge Store - 동기 SQLite 저장소
///
/// 복제본은 같은 연결을 공유합니다. 비동기 코드에서는 `spawn_blocking` 안에서 호출합니다.
#[derive(Clone)]
pub struct KnowledgeStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl KnowledgeStore {
    /// 저장소 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RagError::fatal(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(db_err("Failed to open SQLite database"))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub(super) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RagError::fatal(format!("Lock error: {}", e)))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                object_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                bucket TEXT NOT NULL,
                text TEXT NOT NULL DEFAULT '',
                processed INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                failure_reason TEXT,
                doc_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                vector BLOB
            );

            CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id);

            CREATE TABLE IF NOT EXISTS chunks (
                object_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                sequence_index INTEGER NOT NULL,
                text TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
            CREATE INDEX IF NOT EXISTS idx_chunks_owner ON chunks(owner_id);
            "#,
        )
        .map_err(db_err("Failed to create tables"))?;

        // FTS5 가상 테이블 (키워드 검색용)
        // source: https://www.sqlite.org/fts5.html
        conn.execute_batch(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                text,
                content=chunks,
                content_rowid=rowid
            );

            CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
                INSERT INTO chunks_fts(rowid, text) VALUES (new.rowid, new.text);
            END;

            CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, text)
                VALUES('delete', old.rowid, old.text);
            END;

            CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, text)
                VALUES('delete', old.rowid, old.text);
                INSERT INTO chunks_fts(rowid, text) VALUES (new.rowid, new.text);
            END;
            "#,
        )
        .map_err(|e| RagError::fatal(format!("FTS5 not available: {}", e)))?;

        tracing::debug!("Knowledge store initialized at {:?}", self.db_path);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------------

    /// 문서 저장 (같은 ID면 덮어쓰기)
    pub fn put_document(&self, doc: &DocumentRecord) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "INSERT OR REPLACE INTO documents
                (object_id, owner_id, filename, bucket, text, processed, status,
                 failure_reason, doc_type, created_at, vector)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                doc.id,
                doc.owner_id,
                doc.filename,
                doc.bucket,
                doc.text,
                doc.processed(),
                doc.status.as_str(),
                doc.failure_reason,
                doc.doc_type,
                doc.created_at.to_rfc3339(),
                doc.vector.as_deref().map(vec_to_blob),
            ],
        )
        .map_err(db_err("Failed to upsert document"))?;

        Ok(())
    }

    /// ID로 문서 조회
    pub fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let conn = self.lock()?;

        conn.query_row(
            "SELECT object_id, owner_id, filename, bucket, text, status, failure_reason,
                    doc_type, created_at, vector
             FROM documents WHERE object_id = ?1",
            params![id],
            row_to_document,
        )
        .optional()
        .map_err(db_err("Failed to fetch document"))
    }

    /// owner의 문서 목록
    pub fn list_documents(&self, owner_id: &str, limit: usize) -> Result<Vec<DocumentRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                "SELECT object_id, owner_id, filename, bucket, text, status, failure_reason,
                        doc_type, created_at, vector
                 FROM documents
                 WHERE owner_id = ?1
                 ORDER BY created_at DESC, object_id ASC
                 LIMIT ?2",
            )
            .map_err(db_err("Failed to prepare document listing"))?;

        let docs = stmt
            .query_map(params![owner_id, limit as i64], row_to_document)
            .map_err(db_err("Failed to list documents"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Failed to read document row"))?;

        Ok(docs)
    }

    // ------------------------------------------------------------------------
    // Chunks
    // ------------------------------------------------------------------------

    /// 청크 텍스트 저장 (object_id 충돌 시 갱신)
    pub fn put_chunk(&self, chunk: &ChunkRecord) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO chunks (object_id, document_id, owner_id, sequence_index, text)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(object_id) DO UPDATE SET
                document_id = excluded.document_id,
                owner_id = excluded.owner_id,
                sequence_index = excluded.sequence_index,
                text = excluded.text",
            params![
                chunk.id,
                chunk.document_id,
                chunk.owner_id,
                chunk.sequence_index as i64,
                chunk.text,
            ],
        )
        .map_err(db_err("Failed to upsert chunk"))?;

        Ok(())
    }

    /// `sequence_index >= keep`인 청크 삭제
    pub fn prune_chunks(&self, document_id: &str, keep: usize) -> Result<usize> {
        let conn = self.lock()?;

        let removed = conn
            .execute(
                "DELETE FROM chunks WHERE document_id = ?1 AND sequence_index >= ?2",
                params![document_id, keep as i64],
            )
            .map_err(db_err("Failed to prune chunks"))?;

        Ok(removed)
    }

    /// 문서의 청크 개수
    pub fn count_chunks(&self, document_id: &str) -> Result<usize> {
        let conn = self.lock()?;

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM chunks WHERE document_id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .map_err(db_err("Failed to count chunks"))?;

        Ok(count as usize)
    }

    /// FTS5 키워드 검색
    ///
    /// BM25로 정렬하며, 관련도는 `-bm25` (높을수록 좋음)로 반환합니다.
    /// source: https://www.sqlite.org/fts5.html#the_bm25_function
    pub fn search_fts(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let match_expr = escape_fts5_query(query);
        if match_expr.is_empty() {
            return Ok(vec![]);
        }

        let mut sql = String::from(
            "SELECT c.object_id, c.text, c.document_id, c.owner_id, bm25(chunks_fts) AS rank
             FROM chunks_fts
             JOIN chunks c ON c.rowid = chunks_fts.rowid
             WHERE chunks_fts MATCH ?1 AND c.owner_id = ?2",
        );
        let mut bind: Vec<String> = vec![match_expr, filter.owner_id.clone()];

        if let Some(ref ids) = filter.document_ids {
            let placeholders: Vec<String> =
                (0..ids.len()).map(|i| format!("?{}", i + 3)).collect();
            sql.push_str(&format!(" AND c.document_id IN ({})", placeholders.join(", ")));
            bind.extend(ids.iter().cloned());
        }
        sql.push_str(&format!(" ORDER BY rank LIMIT {}", limit));

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(db_err("Failed to prepare FTS query"))?;

        let results = stmt
            .query_map(params_from_iter(bind.iter()), |row| {
                let bm25: f64 = row.get(4)?;
                Ok(ScoredChunk {
                    id: row.get(0)?,
                    text: row.get(1)?,
                    document_id: row.get(2)?,
                    owner_id: row.get(3)?,
                    score: -bm25,
                })
            })
            .map_err(db_err("Failed to execute FTS query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Failed to read FTS row"))?;

        Ok(results)
    }

    /// (문서 수, 청크 수)
    pub fn counts(&self) -> Result<(usize, usize)> {
        let conn = self.lock()?;

        let docs: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .map_err(db_err("Failed to count documents"))?;
        let chunks: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .map_err(db_err("Failed to count chunks"))?;

        Ok((docs as usize, chunks as usize))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
    let status: String = row.get(5)?;
    let created_at: String = row.get(8)?;
    let vector: Option<Vec<u8>> = row.get(9)?;

    Ok(DocumentRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        filename: row.get(2)?,
        bucket: row.get(3)?,
        text: row.get(4)?,
        status: status.parse().unwrap_or(DocumentStatus::Pending),
        failure_reason: row.get(6)?,
        doc_type: row.get(7)?,
        created_at: parse_datetime(&created_at),
        vector: vector.map(|b| blob_to_vec(&b)),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// FTS5 쿼리 이스케이프
///
/// 단어만 추출해 각각 따옴표로 감싸고 OR로 연결합니다.
/// source: https://www.sqlite.org/fts5.html#full_text_query_syntax
fn escape_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{}\"", w))
        .collect::<Vec<_>>()
        .join(" OR ")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, KnowledgeStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = KnowledgeStore::open(&db_path).unwrap();
        (dir, store)
    }

    fn chunk(doc: &str, owner: &str, idx: usize, text: &str) -> ChunkRecord {
        ChunkRecord::new(doc, owner, idx, text.to_string(), vec![])
    }

    #[test]
    fn test_put_and_get_document() {
        let (_dir, store) = create_test_store();

        let mut doc = DocumentRecord::pending("d1", "u1", "notes.md", "local");
        doc.vector = Some(vec![0.5, 0.25]);
        store.put_document(&doc).unwrap();

        let loaded = store.get_document("d1").unwrap().unwrap();
        assert_eq!(loaded.owner_id, "u1");
        assert_eq!(loaded.status, DocumentStatus::Pending);
        assert_eq!(loaded.doc_type, "source");
        assert_eq!(loaded.vector, Some(vec![0.5, 0.25]));

        assert!(store.get_document("missing").unwrap().is_none());
    }

    #[test]
    fn test_list_documents_owner_scoped() {
        let (_dir, store) = create_test_store();

        store
            .put_document(&DocumentRecord::pending("d1", "u1", "a.txt", "local"))
            .unwrap();
        store
            .put_document(&DocumentRecord::pending("d2", "u2", "b.txt", "local"))
            .unwrap();

        let docs = store.list_documents("u1", 10).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "d1");
    }

    #[test]
    fn test_chunk_upsert_and_prune() {
        let (_dir, store) = create_test_store();

        for i in 0..3 {
            store.put_chunk(&chunk("d1", "u1", i, "alpha beta")).unwrap();
        }
        // 같은 ID 재저장은 개수를 늘리지 않음
        store.put_chunk(&chunk("d1", "u1", 0, "gamma")).unwrap();
        assert_eq!(store.count_chunks("d1").unwrap(), 3);

        assert_eq!(store.prune_chunks("d1", 1).unwrap(), 2);
        assert_eq!(store.count_chunks("d1").unwrap(), 1);
    }

    #[test]
    fn test_search_fts_filters() {
        let (_dir, store) = create_test_store();

        store.put_chunk(&chunk("d1", "u1", 0, "django authentication guide")).unwrap();
        store.put_chunk(&chunk("d2", "u1", 0, "authentication with tokens")).unwrap();
        store.put_chunk(&chunk("d3", "u2", 0, "authentication authentication")).unwrap();

        let all = store
            .search_fts("authentication", &SearchFilter::owner("u1"), 10)
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|r| r.owner_id == "u1"));

        let ids = vec!["d2".to_string()];
        let scoped = store
            .search_fts(
                "authentication",
                &SearchFilter::with_documents("u1", Some(&ids)),
                10,
            )
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].document_id, "d2");
    }

    #[test]
    fn test_search_fts_sees_updated_text() {
        let (_dir, store) = create_test_store();

        store.put_chunk(&chunk("d1", "u1", 0, "old words")).unwrap();
        store.put_chunk(&chunk("d1", "u1", 0, "fresh words")).unwrap();

        let old = store.search_fts("old", &SearchFilter::owner("u1"), 10).unwrap();
        assert!(old.is_empty());
        let fresh = store.search_fts("fresh", &SearchFilter::owner("u1"), 10).unwrap();
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn test_escape_fts5_query() {
        assert_eq!(escape_fts5_query("hello world"), "\"hello\" OR \"world\"");
        assert_eq!(escape_fts5_query("  "), "");
        assert_eq!(escape_fts5_query("hello:world"), "\"helloworld\"");
        assert_eq!(escape_fts5_query("test-query_123"), "\"test-query_123\"");
    }
}
