//! 통합 테스트 공용 도구
//!
//! - `HashEmbedder`: 토큰 해시 기반 결정적 임베더
//! - `FlakyStore`: 인메모리 저장소에 실패/지연을 주입하는 래퍼

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use ragcore::knowledge::ScoredChunk;
use ragcore::{
    ChunkRecord, DocumentRecord, DocumentUpdate, EmbeddingProvider, InMemoryVectorStore,
    RagError, Result, SearchFilter, StoreStats, VectorStore,
};

pub const DIM: usize = 16;

/// 토큰마다 FNV-1a 해시 버킷에 1을 더한 뒤 정규화
pub struct HashEmbedder {
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn fnv1a(token: &str) -> u64 {
    token.bytes().fold(0xcbf29ce484222325, |hash, b| {
        (hash ^ b as u64).wrapping_mul(0x100000001b3)
    })
}

pub fn hash_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIM];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let bucket = (fnv1a(&token.to_lowercase()) % DIM as u64) as usize;
        vector[bucket] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(hash_vector(text))
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// 실패 주입 래퍼
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryVectorStore,
    /// 남은 upsert_chunk 실패 횟수 (usize::MAX면 항상 실패)
    pub chunk_failures: AtomicUsize,
    pub fail_nearest: AtomicBool,
    pub fail_keyword: AtomicBool,
    pub nearest_delay: Option<Duration>,
    pub closes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_nearest_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            nearest_delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn fail_chunk_writes(&self, times: usize) {
        self.chunk_failures.store(times, Ordering::SeqCst);
    }

    pub fn set_fail_nearest(&self, fail: bool) {
        self.fail_nearest.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_keyword(&self, fail: bool) {
        self.fail_keyword.store(fail, Ordering::SeqCst);
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn chunks_for(&self, document_id: &str) -> Vec<ChunkRecord> {
        self.inner.chunks_for(document_id).unwrap()
    }
}

#[async_trait]
impl VectorStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn upsert_document(&self, doc: &DocumentRecord) -> Result<()> {
        self.inner.upsert_document(doc).await
    }

    async fn update_document(&self, id: &str, update: &DocumentUpdate) -> Result<()> {
        self.inner.update_document(id, update).await
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        self.inner.get_document(id).await
    }

    async fn list_documents(&self, owner_id: &str, limit: usize) -> Result<Vec<DocumentRecord>> {
        self.inner.list_documents(owner_id, limit).await
    }

    async fn upsert_chunk(&self, chunk: &ChunkRecord) -> Result<()> {
        let remaining = self.chunk_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != usize::MAX {
                self.chunk_failures.store(remaining - 1, Ordering::SeqCst);
            }
            return Err(RagError::retryable("vector store connection refused"));
        }
        self.inner.upsert_chunk(chunk).await
    }

    async fn prune_chunks(&self, document_id: &str, keep: usize) -> Result<usize> {
        self.inner.prune_chunks(document_id, keep).await
    }

    async fn count_chunks(&self, document_id: &str) -> Result<usize> {
        self.inner.count_chunks(document_id).await
    }

    async fn nearest_neighbors(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if let Some(delay) = self.nearest_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_nearest.load(Ordering::SeqCst) {
            return Err(RagError::retryable("vector index unavailable"));
        }
        self.inner.nearest_neighbors(vector, filter, limit).await
    }

    async fn keyword_search(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if self.fail_keyword.load(Ordering::SeqCst) {
            return Err(RagError::retryable("keyword index unavailable"));
        }
        self.inner.keyword_search(query, filter, limit).await
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.inner.stats().await
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
