//! 로컬 VectorStore - SQLite FTS5 + LanceDB
//!
//! - 문서 레코드, 청크 텍스트, 키워드 검색: [`KnowledgeStore`]
//! - 청크 벡터, ANN 검색: [`LanceChunkIndex`]
//!
//! 저장 위치:
//! - `<data_dir>/knowledge.db`
//! - `<data_dir>/vectors.lance`

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;

use crate::error::{RagError, Result};

use super::document::{ChunkRecord, DocumentRecord, DocumentUpdate};
use super::lance::LanceChunkIndex;
use super::store::KnowledgeStore;
use super::vector::{ScoredChunk, SearchFilter, StoreStats, VectorStore};

/// SQLite + LanceDB 조합 저장소
pub struct LocalVectorStore {
    sqlite: KnowledgeStore,
    lance: LanceChunkIndex,
    data_dir: PathBuf,
}

impl LocalVectorStore {
    /// 데이터 디렉토리에 저장소 열기
    ///
    /// # Arguments
    /// * `data_dir` - 데이터 저장 디렉토리
    /// * `dimension` - 임베딩 차원
    pub async fn open(data_dir: &Path, dimension: usize) -> anyhow::Result<Self> {
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir).context("Failed to create data directory")?;
        }

        let sqlite = KnowledgeStore::open(&data_dir.join("knowledge.db"))
            .context("Failed to open knowledge store")?;
        let lance = LanceChunkIndex::open(&data_dir.join("vectors.lance"), dimension)
            .await
            .context("Failed to open vector index")?;

        tracing::debug!("Opened local vector store at {}", data_dir.display());

        Ok(Self {
            sqlite,
            lance,
            data_dir: data_dir.to_path_buf(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// SQLite 작업을 블로킹 스레드에서 실행
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&KnowledgeStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sqlite = self.sqlite.clone();
        tokio::task::spawn_blocking(move || f(&sqlite))
            .await
            .map_err(|e| RagError::retryable(format!("SQLite task failed: {}", e)))?
    }
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn upsert_document(&self, doc: &DocumentRecord) -> Result<()> {
        let doc = doc.clone();
        self.blocking(move |sqlite| sqlite.put_document(&doc)).await
    }

    async fn update_document(&self, id: &str, update: &DocumentUpdate) -> Result<()> {
        let id = id.to_string();
        let update = update.clone();
        self.blocking(move |sqlite| {
            let mut doc = sqlite
                .get_document(&id)?
                .ok_or_else(|| RagError::not_found(&id))?;
            doc.apply(&update);
            sqlite.put_document(&doc)
        })
        .await
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let id = id.to_string();
        self.blocking(move |sqlite| sqlite.get_document(&id)).await
    }

    async fn list_documents(&self, owner_id: &str, limit: usize) -> Result<Vec<DocumentRecord>> {
        let owner_id = owner_id.to_string();
        self.blocking(move |sqlite| sqlite.list_documents(&owner_id, limit))
            .await
    }

    /// 벡터를 먼저 쓰고 텍스트를 씁니다.
    /// 중간 실패 시 재시도가 같은 ID로 덮어씁니다.
    async fn upsert_chunk(&self, chunk: &ChunkRecord) -> Result<()> {
        self.lance.upsert(chunk).await?;
        let chunk = chunk.clone();
        self.blocking(move |sqlite| sqlite.put_chunk(&chunk)).await
    }

    async fn prune_chunks(&self, document_id: &str, keep: usize) -> Result<usize> {
        let vectors = self.lance.prune(document_id, keep).await?;
        let id = document_id.to_string();
        let rows = self
            .blocking(move |sqlite| sqlite.prune_chunks(&id, keep))
            .await?;
        if vectors != rows {
            tracing::debug!(
                "Pruned {} vectors / {} rows for document {}",
                vectors,
                rows,
                document_id
            );
        }
        Ok(rows.max(vectors))
    }

    async fn count_chunks(&self, document_id: &str) -> Result<usize> {
        let id = document_id.to_string();
        self.blocking(move |sqlite| sqlite.count_chunks(&id)).await
    }

    async fn nearest_neighbors(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        self.lance.search(vector, filter, limit).await
    }

    async fn keyword_search(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let query = query.to_string();
        let filter = filter.clone();
        self.blocking(move |sqlite| sqlite.search_fts(&query, &filter, limit))
            .await
    }

    async fn stats(&self) -> Result<StoreStats> {
        let (document_count, chunk_count) = self.blocking(|sqlite| sqlite.counts()).await?;
        Ok(StoreStats {
            backend: self.name().to_string(),
            document_count,
            chunk_count,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::document::DocumentStatus;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    const DIM: usize = 3;

    #[tokio::test]
    async fn test_local_document_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalVectorStore::open(temp_dir.path(), DIM).await.unwrap();

        let doc = DocumentRecord::pending("d1", "u1", "notes.txt", "local");
        store.upsert_document(&doc).await.unwrap();
        store
            .update_document("d1", &DocumentUpdate::status(DocumentStatus::Processed))
            .await
            .unwrap();

        let loaded = store.get_document("d1").await.unwrap().unwrap();
        assert!(loaded.processed());

        let missing = store
            .update_document("nope", &DocumentUpdate::status(DocumentStatus::Processing))
            .await;
        assert!(matches!(missing, Err(RagError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_local_chunk_search_and_prune() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalVectorStore::open(temp_dir.path(), DIM).await.unwrap();

        let texts = ["rust ownership rules", "borrow checker basics", "lifetimes"];
        for (i, text) in texts.iter().enumerate() {
            let mut vector = vec![0.0; DIM];
            vector[i] = 1.0;
            store
                .upsert_chunk(&ChunkRecord::new("d1", "u1", i, text.to_string(), vector))
                .await
                .unwrap();
        }

        let filter = SearchFilter::owner("u1");
        let nearest = store
            .nearest_neighbors(&[0.0, 1.0, 0.0], &filter, 2)
            .await
            .unwrap();
        assert_eq!(nearest[0].text, "borrow checker basics");

        let keyword = store.keyword_search("ownership", &filter, 5).await.unwrap();
        assert_eq!(keyword.len(), 1);

        assert_eq!(store.prune_chunks("d1", 1).await.unwrap(), 2);
        assert_eq!(store.count_chunks("d1").await.unwrap(), 1);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.backend, "local");
        assert_eq!(stats.chunk_count, 1);
    }

    #[tokio::test]
    async fn test_busy_sqlite_does_not_block_runtime() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalVectorStore::open(temp_dir.path(), DIM).await.unwrap();

        let sqlite = store.sqlite.clone();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = sqlite.lock().unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(500));
        });
        locked_rx.recv().unwrap();

        let started = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_millis(50),
            store.keyword_search("rust", &SearchFilter::owner("u1"), 5),
        )
        .await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_millis(400));
        holder.join().unwrap();
    }
}
