//! 인메모리 VectorStore - 테스트 및 로컬 실험용
//!
//! `RwLock` 뒤의 `HashMap`/`Vec`으로 구현합니다.
//! - 벡터 검색: 전체 코사인 거리 계산 (brute-force)
//! - 키워드 검색: 질의 단어 출현 빈도 합

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::{RagError, Result};

use super::document::{ChunkRecord, DocumentRecord, DocumentUpdate};
use super::vector::{cosine_distance, ScoredChunk, SearchFilter, StoreStats, VectorStore};

/// 인메모리 벡터 저장소
///
/// 청크는 삽입 순서를 유지하며, 같은 ID로 upsert하면 제자리에서 교체됩니다.
#[derive(Default)]
pub struct InMemoryVectorStore {
    docs: RwLock<HashMap<String, DocumentRecord>>,
    chunks: RwLock<Vec<ChunkRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 문서의 청크를 sequence_index 순서로 반환
    pub fn chunks_for(&self, document_id: &str) -> Result<Vec<ChunkRecord>> {
        let chunks = read(&self.chunks)?;
        let mut found: Vec<ChunkRecord> = chunks
            .iter()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        found.sort_by_key(|c| c.sequence_index);
        Ok(found)
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|e| RagError::fatal(format!("Lock error: {}", e)))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|e| RagError::fatal(format!("Lock error: {}", e)))
}

/// 소문자 영숫자 토큰으로 분리
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn to_scored(chunk: &ChunkRecord, score: f64) -> ScoredChunk {
    ScoredChunk {
        id: chunk.id.clone(),
        text: chunk.text.clone(),
        document_id: chunk.document_id.clone(),
        owner_id: chunk.owner_id.clone(),
        score,
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert_document(&self, doc: &DocumentRecord) -> Result<()> {
        write(&self.docs)?.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn update_document(&self, id: &str, update: &DocumentUpdate) -> Result<()> {
        let mut docs = write(&self.docs)?;
        let doc = docs.get_mut(id).ok_or_else(|| RagError::not_found(id))?;
        doc.apply(update);
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        Ok(read(&self.docs)?.get(id).cloned())
    }

    async fn list_documents(&self, owner_id: &str, limit: usize) -> Result<Vec<DocumentRecord>> {
        let docs = read(&self.docs)?;
        let mut owned: Vec<DocumentRecord> = docs
            .values()
            .filter(|d| d.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        owned.truncate(limit);
        Ok(owned)
    }

    async fn upsert_chunk(&self, chunk: &ChunkRecord) -> Result<()> {
        let mut chunks = write(&self.chunks)?;
        match chunks.iter_mut().find(|c| c.id == chunk.id) {
            Some(existing) => *existing = chunk.clone(),
            None => chunks.push(chunk.clone()),
        }
        Ok(())
    }

    async fn prune_chunks(&self, document_id: &str, keep: usize) -> Result<usize> {
        let mut chunks = write(&self.chunks)?;
        let before = chunks.len();
        chunks.retain(|c| c.document_id != document_id || c.sequence_index < keep);
        Ok(before - chunks.len())
    }

    async fn count_chunks(&self, document_id: &str) -> Result<usize> {
        Ok(read(&self.chunks)?
            .iter()
            .filter(|c| c.document_id == document_id)
            .count())
    }

    async fn nearest_neighbors(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let chunks = read(&self.chunks)?;
        let mut results: Vec<ScoredChunk> = chunks
            .iter()
            .filter(|c| filter.matches(&c.owner_id, &c.document_id))
            .map(|c| to_scored(c, cosine_distance(vector, &c.vector) as f64))
            .collect();

        results.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }

    async fn keyword_search(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = read(&self.chunks)?;
        let mut results: Vec<ScoredChunk> = chunks
            .iter()
            .filter(|c| filter.matches(&c.owner_id, &c.document_id))
            .filter_map(|c| {
                let tokens = tokenize(&c.text);
                let hits = tokens.iter().filter(|t| terms.contains(t)).count();
                (hits > 0).then(|| to_scored(c, hits as f64))
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            backend: self.name().to_string(),
            document_count: read(&self.docs)?.len(),
            chunk_count: read(&self.chunks)?.len(),
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

    fn chunk(doc: &str, owner: &str, idx: usize, text: &str, vector: Vec<f32>) -> ChunkRecord {
        ChunkRecord::new(doc, owner, idx, text.to_string(), vector)
    }

    #[tokio::test]
    async fn test_upsert_chunk_replaces() {
        let store = InMemoryVectorStore::new();
        store
            .upsert_chunk(&chunk("d1", "u1", 0, "first", vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .upsert_chunk(&chunk("d1", "u1", 0, "second", vec![0.0, 1.0]))
            .await
            .unwrap();

        assert_eq!(store.count_chunks("d1").await.unwrap(), 1);
        assert_eq!(store.chunks_for("d1").unwrap()[0].text, "second");
    }

    #[tokio::test]
    async fn test_prune_chunks() {
        let store = InMemoryVectorStore::new();
        for i in 0..4 {
            store
                .upsert_chunk(&chunk("d1", "u1", i, "text", vec![1.0]))
                .await
                .unwrap();
        }
        store
            .upsert_chunk(&chunk("d2", "u1", 3, "other", vec![1.0]))
            .await
            .unwrap();

        let removed = store.prune_chunks("d1", 2).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count_chunks("d1").await.unwrap(), 2);
        assert_eq!(store.count_chunks("d2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_document() {
        let store = InMemoryVectorStore::new();
        let err = store
            .update_document("nope", &DocumentUpdate::status(DocumentStatus::Processing))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_nearest_neighbors_owner_filter() {
        let store = InMemoryVectorStore::new();
        store
            .upsert_chunk(&chunk("d1", "u1", 0, "mine", vec![0.8, 0.2]))
            .await
            .unwrap();
        store
            .upsert_chunk(&chunk("d2", "u2", 0, "theirs", vec![1.0, 0.0]))
            .await
            .unwrap();

        let results = store
            .nearest_neighbors(&[1.0, 0.0], &SearchFilter::owner("u1"), 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].owner_id, "u1");
    }

    #[tokio::test]
    async fn test_keyword_search_ranking() {
        let store = InMemoryVectorStore::new();
        store
            .upsert_chunk(&chunk("d1", "u1", 0, "rust is fast", vec![1.0]))
            .await
            .unwrap();
        store
            .upsert_chunk(&chunk("d1", "u1", 1, "rust rust everywhere, fast", vec![1.0]))
            .await
            .unwrap();
        store
            .upsert_chunk(&chunk("d1", "u1", 2, "python", vec![1.0]))
            .await
            .unwrap();

        let results = store
            .keyword_search("Rust fast", &SearchFilter::owner("u1"), 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "rust rust everywhere, fast");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_list_documents_by_owner() {
        let store = InMemoryVectorStore::new();
        store
            .upsert_document(&DocumentRecord::pending("d1", "u1", "a.txt", "local"))
            .await
            .unwrap();
        store
            .upsert_document(&DocumentRecord::pending("d2", "u2", "b.txt", "local"))
            .await
            .unwrap();

        let docs = store.list_documents("u1", 10).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "d1");

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.document_count, 2);
    }
}
