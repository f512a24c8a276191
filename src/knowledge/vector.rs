//! Vector Store - 벡터 저장소 트레이트 및 유틸리티
//!
//! 수집 파이프라인과 검색 엔진이 요구하는 저장소 연산을 정의합니다.
//! 백엔드는 설정으로 선택합니다 (인메모리 / SQLite FTS5 + LanceDB).
//!
//! 모든 검색 연산은 owner 필터를 백엔드 쪽에서 강제해야 합니다.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

use super::document::{ChunkRecord, DocumentRecord, DocumentUpdate};

/// 기본 벡터 임베딩 차원 (Gemini gemini-embedding-001 기본값)
/// source: https://ai.google.dev/gemini-api/docs/embeddings
pub const EMBEDDING_DIMENSION: usize = 768;

// ============================================================================
// Types
// ============================================================================

/// 검색 필터
///
/// `owner_id` 일치 (필수) AND `document_ids` 중 하나 일치 (선택).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFilter {
    pub owner_id: String,
    pub document_ids: Option<Vec<String>>,
}

impl SearchFilter {
    /// owner 필터만
    pub fn owner(owner_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            document_ids: None,
        }
    }

    /// owner + 문서 집합 필터 (빈 목록은 필터 없음으로 취급)
    pub fn with_documents(owner_id: &str, document_ids: Option<&[String]>) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            document_ids: document_ids
                .filter(|ids| !ids.is_empty())
                .map(|ids| ids.to_vec()),
        }
    }

    /// 레코드가 필터를 만족하는지 확인
    pub fn matches(&self, owner_id: &str, document_id: &str) -> bool {
        if owner_id != self.owner_id {
            return false;
        }
        match self.document_ids {
            Some(ref ids) => ids.iter().any(|id| id == document_id),
            None => true,
        }
    }
}

/// 백엔드 검색 결과 행
///
/// `score`의 의미는 연산마다 다릅니다:
/// - `nearest_neighbors`: 코사인 거리 (낮을수록 좋음)
/// - `keyword_search`: 관련도 (높을수록 좋음)
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub id: String,
    pub text: String,
    pub document_id: String,
    pub owner_id: String,
    pub score: f64,
}

/// 저장소 통계
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub backend: String,
    pub document_count: usize,
    pub chunk_count: usize,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 벡터 저장소의 공통 인터페이스입니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 백엔드 이름
    fn name(&self) -> &str;

    /// 문서 생성 또는 덮어쓰기
    async fn upsert_document(&self, doc: &DocumentRecord) -> Result<()>;

    /// 문서 부분 갱신 (없으면 NotFound)
    async fn update_document(&self, id: &str, update: &DocumentUpdate) -> Result<()>;

    /// ID로 문서 조회
    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>>;

    /// owner의 문서 목록 (최신순)
    async fn list_documents(&self, owner_id: &str, limit: usize) -> Result<Vec<DocumentRecord>>;

    /// 청크 저장 (청크 ID 기준 덮어쓰기)
    async fn upsert_chunk(&self, chunk: &ChunkRecord) -> Result<()>;

    /// `sequence_index >= keep`인 청크 삭제
    async fn prune_chunks(&self, document_id: &str, keep: usize) -> Result<usize>;

    /// 문서의 청크 개수
    async fn count_chunks(&self, document_id: &str) -> Result<usize>;

    /// 최근접 이웃 검색 (거리 오름차순)
    async fn nearest_neighbors(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// 키워드 검색 (관련도 내림차순)
    async fn keyword_search(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// 저장소 통계
    async fn stats(&self) -> Result<StoreStats>;

    /// 백엔드 자원 해제
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 영벡터면 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 코사인 거리 (1 - 코사인 유사도, 0.0 ~ 2.0)
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// f32 벡터를 BLOB으로 인코딩 (little-endian)
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// BLOB을 f32 벡터로 디코딩
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
