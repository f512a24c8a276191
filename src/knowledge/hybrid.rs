//! 하이브리드 검색 - 시맨틱 + 키워드 RRF 통합
//!
//! RRF (Reciprocal Rank Fusion) 알고리즘으로
//! 키워드 검색과 벡터 검색을 통합합니다.
//!
//! - 두 하위 검색은 `tokio::join!`으로 동시에 실행되며 각자 타임아웃을 가집니다.
//! - 한쪽만 실패하면 남은 결과로 통합하고 경고를 붙입니다.
//! - 양쪽 모두 실패하면 [`RagError::SearchUnavailable`]을 반환합니다.
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

use super::vector::{ScoredChunk, SearchFilter, VectorStore};

/// RRF 기본 상수 k
pub const RRF_K: f64 = 60.0;

/// 하위 검색 기본 타임아웃
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Types
// ============================================================================

/// 검색 방법
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    /// 벡터 검색
    Semantic,
    /// 키워드 검색
    Keyword,
    /// 하이브리드 (RRF 통합)
    Hybrid,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Keyword => "keyword",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 검색 전략 (`search`의 분기 선택)
pub type SearchStrategy = SearchMethod;

impl FromStr for SearchMethod {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "semantic" => Ok(Self::Semantic),
            "keyword" => Ok(Self::Keyword),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(RagError::validation(format!(
                "Unknown search strategy: {} (expected semantic, keyword or hybrid)",
                other
            ))),
        }
    }
}

/// 검색 결과
///
/// JSON 직렬화 시 `_id`, `search_type` 키를 사용합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(rename = "_id")]
    pub id: String,
    pub text: String,
    pub document_id: String,
    pub owner_id: String,
    /// semantic: 코사인 거리 (낮을수록 좋음)
    /// keyword: 관련도 (높을수록 좋음)
    /// hybrid: RRF 스코어 (높을수록 좋음)
    pub score: f64,
    #[serde(rename = "search_type")]
    pub source: SearchMethod,
}

impl SearchResult {
    fn from_scored(chunk: ScoredChunk, source: SearchMethod) -> Self {
        Self {
            id: chunk.id,
            text: chunk.text,
            document_id: chunk.document_id,
            owner_id: chunk.owner_id,
            score: chunk.score,
            source,
        }
    }
}

/// 검색 옵션
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    /// 문서 ID 제한 (비어 있으면 owner의 모든 문서)
    pub document_ids: Option<Vec<String>>,
    /// 시맨틱 검색 최대 거리
    pub min_score: Option<f64>,
    /// RRF 상수
    pub rrf_k: f64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            document_ids: None,
            min_score: None,
            rrf_k: RRF_K,
        }
    }
}

/// 검색 응답
///
/// `results`가 비어 있으면 실제로 일치 항목이 없다는 뜻입니다.
/// 하위 검색 실패는 `warnings`로 전달됩니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl SearchResponse {
    fn complete(results: Vec<SearchResult>) -> Self {
        Self {
            results,
            warnings: Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 하이브리드 검색기
///
/// [`VectorStore`] (벡터 + 키워드)와 [`EmbeddingProvider`]를 RRF로 통합합니다.
pub struct HybridRetriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    search_timeout: Duration,
}

impl HybridRetriever {
    /// 새 하이브리드 검색기 생성
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedder,
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
        }
    }

    /// 하위 검색 타임아웃 지정
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    /// 통합 검색
    ///
    /// # Arguments
    /// * `query` - 검색 쿼리
    /// * `owner_id` - 검색 범위 owner
    /// * `limit` - 최대 결과 수
    /// * `strategy` - semantic / keyword / hybrid
    /// * `options` - 문서 제한, 최대 거리, RRF k
    pub async fn search(
        &self,
        query: &str,
        owner_id: &str,
        limit: usize,
        strategy: SearchStrategy,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        let doc_ids = options.document_ids.as_deref();

        let response = match strategy {
            SearchMethod::Semantic => SearchResponse::complete(
                self.semantic_search(query, owner_id, limit, doc_ids, options.min_score)
                    .await?,
            ),
            SearchMethod::Keyword => SearchResponse::complete(
                self.keyword_search(query, owner_id, limit, doc_ids).await?,
            ),
            SearchMethod::Hybrid => {
                self.hybrid_search(query, owner_id, limit, doc_ids, options.rrf_k)
                    .await?
            }
        };

        tracing::info!(
            "{} search returned {} results (owner={})",
            strategy,
            response.results.len(),
            owner_id
        );

        Ok(response)
    }

    /// 시맨틱 검색
    ///
    /// 스코어는 코사인 거리이며, `min_score`가 있으면 그보다 먼 결과를 버립니다.
    pub async fn semantic_search(
        &self,
        query: &str,
        owner_id: &str,
        limit: usize,
        document_ids: Option<&[String]>,
        min_score: Option<f64>,
    ) -> Result<Vec<SearchResult>> {
        validate_query(query, owner_id, limit)?;
        let filter = SearchFilter::with_documents(owner_id, document_ids);

        let query_vector = self.embedder.embed_query(query).await?;
        let rows = self
            .store
            .nearest_neighbors(&query_vector, &filter, limit)
            .await?;

        Ok(rows
            .into_iter()
            .filter(|row| row.owner_id == owner_id)
            .filter(|row| min_score.map_or(true, |max| row.score <= max))
            .map(|row| SearchResult::from_scored(row, SearchMethod::Semantic))
            .collect())
    }

    /// 키워드 검색
    pub async fn keyword_search(
        &self,
        query: &str,
        owner_id: &str,
        limit: usize,
        document_ids: Option<&[String]>,
    ) -> Result<Vec<SearchResult>> {
        validate_query(query, owner_id, limit)?;
        let filter = SearchFilter::with_documents(owner_id, document_ids);

        let rows = self.store.keyword_search(query, &filter, limit).await?;

        Ok(rows
            .into_iter()
            .filter(|row| row.owner_id == owner_id)
            .map(|row| SearchResult::from_scored(row, SearchMethod::Keyword))
            .collect())
    }

    /// 하이브리드 검색 (RRF 통합)
    ///
    /// 각 하위 검색에서 `2 × limit` 후보를 가져와 통합합니다.
    ///
    /// # Returns
    /// RRF 스코어 기준 정렬된 결과 + 부분 실패 경고
    pub async fn hybrid_search(
        &self,
        query: &str,
        owner_id: &str,
        limit: usize,
        document_ids: Option<&[String]>,
        k: f64,
    ) -> Result<SearchResponse> {
        validate_query(query, owner_id, limit)?;
        let candidates = limit.saturating_mul(2);

        let (semantic, keyword) = tokio::join!(
            self.with_deadline(
                "semantic",
                self.semantic_search(query, owner_id, candidates, document_ids, None)
            ),
            self.with_deadline(
                "keyword",
                self.keyword_search(query, owner_id, candidates, document_ids)
            ),
        );

        let mut warnings = Vec::new();
        let (semantic, keyword) = match (semantic, keyword) {
            (Ok(s), Ok(k)) => (s, k),
            (Ok(s), Err(e)) => {
                tracing::warn!("Keyword search failed, using semantic results only: {}", e);
                warnings.push(format!("keyword search unavailable: {}", e));
                (s, Vec::new())
            }
            (Err(e), Ok(k)) => {
                tracing::warn!("Semantic search failed, using keyword results only: {}", e);
                warnings.push(format!("semantic search unavailable: {}", e));
                (Vec::new(), k)
            }
            (Err(se), Err(ke)) => {
                tracing::error!("Both sub-searches failed: semantic={}, keyword={}", se, ke);
                return Err(RagError::SearchUnavailable {
                    semantic: se.to_string(),
                    keyword: ke.to_string(),
                });
            }
        };

        let results = reciprocal_rank_fusion(&[semantic, keyword], k, limit);
        Ok(SearchResponse { results, warnings })
    }

    /// 하위 검색에 타임아웃 적용 (타임아웃은 재시도 가능 에러)
    async fn with_deadline<F>(&self, label: &str, fut: F) -> Result<Vec<SearchResult>>
    where
        F: std::future::Future<Output = Result<Vec<SearchResult>>>,
    {
        match tokio::time::timeout(self.search_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RagError::retryable(format!(
                "{} search timed out after {:?}",
                label, self.search_timeout
            ))),
        }
    }
}

/// 질의 검증 (백엔드 호출 전)
fn validate_query(query: &str, owner_id: &str, limit: usize) -> Result<()> {
    if query.trim().is_empty() {
        return Err(RagError::validation("Query must not be empty"));
    }
    if owner_id.trim().is_empty() {
        return Err(RagError::validation("Owner id must not be empty"));
    }
    if limit == 0 {
        return Err(RagError::validation("Limit must be greater than zero"));
    }
    Ok(())
}

// ============================================================================
// RRF
// ============================================================================

/// RRF (Reciprocal Rank Fusion) 알고리즘
///
/// RRF Score(d) = Σ 1 / (k + rank(d)), rank는 1부터 시작.
/// 동점은 처음 발견된 순서 (앞 리스트부터 스캔)를 유지합니다.
/// 한 리스트 안에서 중복된 ID는 첫 등장만 계산하고, 순위는 중복을 뺀 리스트 기준입니다.
///
/// # Arguments
/// * `lists` - 순위 리스트 (best first)
/// * `k` - RRF 상수 (기본 60)
/// * `limit` - 최대 결과 수
pub fn reciprocal_rank_fusion(
    lists: &[Vec<SearchResult>],
    k: f64,
    limit: usize,
) -> Vec<SearchResult> {
    // id -> fused 인덱스 (삽입 순서 = 처음 발견 순서)
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut fused: Vec<SearchResult> = Vec::new();

    for list in lists {
        let mut seen: HashSet<&str> = HashSet::new();
        let unique = list.iter().filter(|r| seen.insert(r.id.as_str()));
        for (rank, result) in unique.enumerate() {
            let contribution = 1.0 / (k + rank as f64 + 1.0);

            match index.get(&result.id) {
                Some(&i) => fused[i].score += contribution,
                None => {
                    index.insert(result.id.clone(), fused.len());
                    fused.push(SearchResult {
                        score: contribution,
                        source: SearchMethod::Hybrid,
                        ..result.clone()
                    });
                }
            }
        }
    }

    // 안정 정렬: 동점은 발견 순서 유지
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused.truncate(limit);
    fused
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::document::{ChunkRecord, DocumentRecord, DocumentUpdate};
    use crate::knowledge::memory::InMemoryVectorStore;
    use crate::knowledge::vector::StoreStats;
    use async_trait::async_trait;

    fn result(id: &str, source: SearchMethod) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            text: format!("text {}", id),
            document_id: "d1".to_string(),
            owner_id: "u1".to_string(),
            score: 0.0,
            source,
        }
    }

    fn ids(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.id.as_str()).collect()
    }

    /// 첫 글자 기반 고정 벡터 임베더
    struct AxisEmbedder;

    #[async_trait]
    impl EmbeddingProvider for AxisEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(match text.chars().next() {
                Some('a') => vec![1.0, 0.0],
                _ => vec![0.0, 1.0],
            })
        }

        fn dimension(&self) -> usize {
            2
        }

        fn name(&self) -> &str {
            "axis"
        }
    }

    #[test]
    fn test_rrf_tie_break_first_discovery() {
        let semantic = vec![
            result("A", SearchMethod::Semantic),
            result("B", SearchMethod::Semantic),
            result("C", SearchMethod::Semantic),
        ];
        let keyword = vec![
            result("B", SearchMethod::Keyword),
            result("A", SearchMethod::Keyword),
            result("D", SearchMethod::Keyword),
        ];

        let fused = reciprocal_rank_fusion(&[semantic, keyword], RRF_K, 10);
        assert_eq!(ids(&fused), vec!["A", "B", "D", "C"]);

        let expected_a = 1.0 / 61.0 + 1.0 / 62.0;
        assert!((fused[0].score - expected_a).abs() < 1e-12);
        assert!((fused[2].score - 1.0 / 63.0).abs() < 1e-12);
        assert!(fused.iter().all(|r| r.source == SearchMethod::Hybrid));
    }

    #[test]
    fn test_rrf_ignores_duplicates_within_list() {
        let semantic = vec![
            result("A", SearchMethod::Semantic),
            result("A", SearchMethod::Semantic),
        ];
        let fused = reciprocal_rank_fusion(&[semantic], RRF_K, 10);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_rrf_rank_skips_duplicates() {
        let semantic = vec![
            result("A", SearchMethod::Semantic),
            result("A", SearchMethod::Semantic),
            result("B", SearchMethod::Semantic),
        ];
        let fused = reciprocal_rank_fusion(&[semantic], RRF_K, 10);
        assert_eq!(ids(&fused), vec!["A", "B"]);
        assert!((fused[1].score - 1.0 / 62.0).abs() < 1e-12);
    }

    #[test]
    fn test_rrf_truncates_and_handles_empty() {
        let list: Vec<SearchResult> = ["A", "B", "C"]
            .iter()
            .map(|id| result(id, SearchMethod::Keyword))
            .collect();
        assert_eq!(reciprocal_rank_fusion(&[list], RRF_K, 2).len(), 2);
        assert!(reciprocal_rank_fusion(&[vec![], vec![]], RRF_K, 5).is_empty());
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("hybrid".parse::<SearchStrategy>().unwrap(), SearchMethod::Hybrid);
        assert_eq!(" Semantic ".parse::<SearchStrategy>().unwrap(), SearchMethod::Semantic);
        assert!(matches!(
            "fuzzy".parse::<SearchStrategy>(),
            Err(RagError::Validation(_))
        ));
    }

    #[test]
    fn test_search_result_wire_names() {
        let json = serde_json::to_value(result("c1", SearchMethod::Keyword)).unwrap();
        assert_eq!(json["_id"], "c1");
        assert_eq!(json["search_type"], "keyword");
        assert!(json.get("id").is_none());
    }

    async fn seeded_retriever() -> HybridRetriever {
        let store = Arc::new(InMemoryVectorStore::new());
        let chunks = [
            ("d1", "u1", "apple pie recipe", vec![1.0, 0.0]),
            ("d2", "u1", "banana bread recipe", vec![0.0, 1.0]),
            ("d3", "u2", "apple tart recipe", vec![1.0, 0.0]),
        ];
        for (doc, owner, text, vector) in chunks {
            store
                .upsert_chunk(&ChunkRecord::new(doc, owner, 0, text.to_string(), vector))
                .await
                .unwrap();
        }
        HybridRetriever::new(store, Arc::new(AxisEmbedder))
    }

    #[tokio::test]
    async fn test_semantic_min_score_filters_distance() {
        let retriever = seeded_retriever().await;

        let all = retriever
            .semantic_search("apple", "u1", 10, None, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].document_id, "d1");
        assert!(all[0].score < 1e-6);

        let close = retriever
            .semantic_search("apple", "u1", 10, None, Some(0.5))
            .await
            .unwrap();
        assert_eq!(close.len(), 1);
    }

    #[tokio::test]
    async fn test_search_is_owner_scoped() {
        let retriever = seeded_retriever().await;
        let response = retriever
            .search("apple", "u1", 10, SearchMethod::Hybrid, &SearchOptions::default())
            .await
            .unwrap();

        assert!(!response.is_degraded());
        assert!(response.results.iter().all(|r| r.owner_id == "u1"));
        assert_eq!(response.results[0].document_id, "d1");
    }

    #[tokio::test]
    async fn test_document_filter() {
        let retriever = seeded_retriever().await;
        let only = vec!["d2".to_string()];
        let results = retriever
            .keyword_search("recipe", "u1", 10, Some(&only))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, "d2");
    }

    #[tokio::test]
    async fn test_validation_before_backend() {
        let retriever = seeded_retriever().await;
        let opts = SearchOptions::default();

        for (query, owner, limit) in [("  ", "u1", 5), ("apple", "u1", 0), ("apple", "", 5)] {
            let err = retriever
                .search(query, owner, limit, SearchMethod::Keyword, &opts)
                .await
                .unwrap_err();
            assert!(matches!(err, RagError::Validation(_)));
        }
    }

    /// 필터를 무시하고 모든 owner의 행을 돌려주는 저장소
    struct UnfilteredStore {
        rows: Vec<ScoredChunk>,
    }

    #[async_trait]
    impl VectorStore for UnfilteredStore {
        fn name(&self) -> &str {
            "unfiltered"
        }

        async fn upsert_document(&self, _doc: &DocumentRecord) -> Result<()> {
            Ok(())
        }

        async fn update_document(&self, id: &str, _update: &DocumentUpdate) -> Result<()> {
            Err(RagError::not_found(id))
        }

        async fn get_document(&self, _id: &str) -> Result<Option<DocumentRecord>> {
            Ok(None)
        }

        async fn list_documents(&self, _owner: &str, _limit: usize) -> Result<Vec<DocumentRecord>> {
            Ok(Vec::new())
        }

        async fn upsert_chunk(&self, _chunk: &ChunkRecord) -> Result<()> {
            Ok(())
        }

        async fn prune_chunks(&self, _document_id: &str, _keep: usize) -> Result<usize> {
            Ok(0)
        }

        async fn count_chunks(&self, _document_id: &str) -> Result<usize> {
            Ok(0)
        }

        async fn nearest_neighbors(
            &self,
            _vector: &[f32],
            _filter: &SearchFilter,
            _limit: usize,
        ) -> Result<Vec<ScoredChunk>> {
            Ok(self.rows.clone())
        }

        async fn keyword_search(
            &self,
            _query: &str,
            _filter: &SearchFilter,
            _limit: usize,
        ) -> Result<Vec<ScoredChunk>> {
            Ok(self.rows.clone())
        }

        async fn stats(&self) -> Result<StoreStats> {
            Ok(StoreStats::default())
        }
    }

    #[tokio::test]
    async fn test_foreign_owner_rows_are_dropped() {
        let rows = ["u1", "u2", "u1"]
            .iter()
            .enumerate()
            .map(|(i, owner)| ScoredChunk {
                id: format!("c{}", i),
                text: "apple".to_string(),
                document_id: format!("d{}", i),
                owner_id: owner.to_string(),
                score: 0.1,
            })
            .collect();
        let retriever =
            HybridRetriever::new(Arc::new(UnfilteredStore { rows }), Arc::new(AxisEmbedder));
        let opts = SearchOptions::default();

        for method in [SearchMethod::Semantic, SearchMethod::Keyword, SearchMethod::Hybrid] {
            let response = retriever.search("apple", "u1", 10, method, &opts).await.unwrap();
            assert_eq!(ids(&response.results), vec!["c0", "c2"], "{:?}", method);
        }
    }
}
