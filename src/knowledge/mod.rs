//! Knowledge 모듈 - 문서/청크 저장소와 하이브리드 검색
//!
//! - Chunker: 문자 단위 슬라이딩 윈도우 분할
//! - VectorStore: 저장소 트레이트 (인메모리 / SQLite FTS5 + LanceDB)
//! - Hybrid: RRF 알고리즘으로 시맨틱 + 키워드 검색 통합

mod chunker;
mod document;
mod hybrid;
mod lance;
mod local;
mod memory;
mod store;
mod vector;

// Re-exports
pub use chunker::{chunk_text, reassemble, ChunkConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
pub use document::{
    chunk_id, ChunkRecord, DocumentRecord, DocumentStatus, DocumentUpdate, SOURCE_DOC_TYPE,
};
pub use hybrid::{
    reciprocal_rank_fusion, HybridRetriever, SearchMethod, SearchOptions, SearchResponse,
    SearchResult, SearchStrategy, DEFAULT_SEARCH_TIMEOUT, RRF_K,
};
pub use lance::LanceChunkIndex;
pub use local::LocalVectorStore;
pub use memory::InMemoryVectorStore;
pub use store::KnowledgeStore;
pub use vector::{
    cosine_distance, cosine_similarity, ScoredChunk, SearchFilter, StoreStats, VectorStore,
    EMBEDDING_DIMENSION,
};
