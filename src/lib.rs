//! ragcore - 문서 수집 파이프라인 + 하이브리드 검색 엔진
//!
//! 사용자 소유 텍스트 문서를 청킹, 임베딩하여 색인하고
//! 시맨틱 / 키워드 / 하이브리드(RRF) 검색으로 조회합니다.
//!
//! - 저장소: 인메모리 또는 SQLite FTS5 + LanceDB
//! - 수집: 멱등 처리 + 재시도 정책
//! - 검색: 하위 검색 동시 실행, 부분 실패 시 경고와 함께 통합

pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod knowledge;
pub mod services;

// Re-exports
pub use config::{Backend, RagConfig};
pub use embedding::{get_api_key, has_api_key, EmbeddingProvider, GeminiEmbedding};
pub use error::{RagError, Result};
pub use ingest::{
    register_upload, ContentSource, Disposition, IngestReport, IngestRequest, IngestionPipeline,
    RetryPolicy, UploadPolicy,
};
pub use knowledge::{
    chunk_text, ChunkConfig, ChunkRecord, DocumentRecord, DocumentStatus, DocumentUpdate,
    HybridRetriever, InMemoryVectorStore, LocalVectorStore, SearchFilter, SearchMethod,
    SearchOptions, SearchResponse, SearchResult, SearchStrategy, StoreStats, VectorStore,
};
pub use services::Services;
