//! 수집 파이프라인 - 문서 → 청크 → 임베딩 → 저장소
//!
//! 문서 하나에 대한 멱등 처리 단위입니다.
//! 청크 ID가 `(document_id, index)`에서 파생되므로 같은 문서를 몇 번 다시 처리해도
//! 청크가 중복되지 않습니다.
//!
//! 상태 전이: `Pending → Processing → {Processed, Failed}`
//! (일시적 실패 시 `Processing → Pending`)
//!
//! `Failed`는 종료 상태입니다. 다시 전달된 트리거는 아무것도 바꾸지 않고 건너뜁니다.
//! `Processed` 문서는 다시 처리합니다 (재수집).

mod retry;
mod upload;

use std::path::PathBuf;
use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::knowledge::{
    ChunkConfig, ChunkRecord, DocumentRecord, DocumentStatus, DocumentUpdate, VectorStore,
};

pub use retry::{
    Disposition, RetryPolicy, DEFAULT_BASE_BACKOFF, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF,
};
pub use upload::{register_upload, UploadPolicy, DEFAULT_BUCKET, DEFAULT_MAX_UPLOAD_BYTES};

// ============================================================================
// Types
// ============================================================================

/// 원본 콘텐츠 위치
#[derive(Debug, Clone, PartialEq)]
pub enum ContentSource {
    /// 로컬 파일
    Path(PathBuf),
    /// 메모리 상의 바이트
    Bytes(Vec<u8>),
}

/// 수집 트리거 입력
#[derive(Debug, Clone, PartialEq)]
pub struct IngestRequest {
    pub document_id: String,
    pub owner_id: String,
    pub source: ContentSource,
    pub bucket: String,
    pub filename: String,
}

/// 성공한 처리 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub document_id: String,
    pub chunk_count: usize,
    /// 이전 처리에서 남은 청크 중 삭제된 수
    pub pruned: usize,
    /// 이미 Failed 상태라 처리하지 않음
    pub skipped: bool,
}

impl IngestReport {
    fn skipped(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            chunk_count: 0,
            pruned: 0,
            skipped: true,
        }
    }
}

// ============================================================================
// IngestionPipeline
// ============================================================================

/// 수집 파이프라인
pub struct IngestionPipeline {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunk: ChunkConfig,
    retry: RetryPolicy,
}

impl IngestionPipeline {
    /// 새 파이프라인 생성
    ///
    /// # Arguments
    /// * `store` - 문서/청크 저장소
    /// * `embedder` - 청크 임베딩 프로바이더
    /// * `chunk` - 청킹 설정 (검증됨)
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunk: ChunkConfig,
    ) -> Result<Self> {
        chunk.validate()?;
        Ok(Self {
            store,
            embedder,
            chunk,
            retry: RetryPolicy::default(),
        })
    }

    /// 재시도 정책 지정
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// 한 번의 처리 시도
    ///
    /// 실패하면 에러를 그대로 반환합니다. 재시도 여부는 [`handle_failure`](Self::handle_failure)가 결정합니다.
    /// 일시적 실패는 문서를 Pending으로 되돌리고, 그 외 실패는 즉시 Failed로 기록합니다.
    pub async fn process(&self, request: &IngestRequest) -> Result<IngestReport> {
        let doc = self
            .store
            .get_document(&request.document_id)
            .await?
            .ok_or_else(|| RagError::not_found(&request.document_id))?;

        if doc.status == DocumentStatus::Failed {
            tracing::info!("Document {} already failed, skipping", doc.id);
            return Ok(IngestReport::skipped(&doc.id));
        }

        match self.attempt(&doc, request).await {
            Ok(report) => Ok(report),
            Err(e) => {
                if e.is_retryable() {
                    self.revert_to_pending(&request.document_id).await;
                } else {
                    self.mark_failed(&request.document_id, &e.to_string()).await;
                }
                Err(e)
            }
        }
    }

    /// 소유자 확인 → Processing → 처리
    async fn attempt(
        &self,
        doc: &DocumentRecord,
        request: &IngestRequest,
    ) -> Result<IngestReport> {
        if doc.owner_id != request.owner_id {
            return Err(RagError::fatal(format!(
                "Owner mismatch for document {}: record owner {}, request owner {}",
                doc.id, doc.owner_id, request.owner_id
            )));
        }

        self.store
            .update_document(
                &request.document_id,
                &DocumentUpdate::status(DocumentStatus::Processing),
            )
            .await?;
        tracing::debug!("Document {} -> processing", request.document_id);

        self.run(request).await
    }

    /// 콘텐츠 로드 → 청킹 → 임베딩/저장 → 정리 → Processed
    async fn run(&self, request: &IngestRequest) -> Result<IngestReport> {
        let text = load_content(&request.source).await?;
        let chunks = self.chunk.chunk(&text)?;
        let chunk_count = chunks.len();

        tracing::info!(
            "Processing document {} ({} chunks, {} chars)",
            request.document_id,
            chunk_count,
            text.chars().count()
        );

        let dimension = self.embedder.dimension();
        for (index, chunk) in chunks.into_iter().enumerate() {
            let vector = self.embedder.embed(&chunk).await?;
            if vector.len() != dimension {
                return Err(RagError::fatal(format!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    dimension,
                    vector.len()
                )));
            }

            let record = ChunkRecord::new(
                &request.document_id,
                &request.owner_id,
                index,
                chunk,
                vector,
            );
            self.store.upsert_chunk(&record).await?;
        }

        let pruned = self
            .store
            .prune_chunks(&request.document_id, chunk_count)
            .await?;
        if pruned > 0 {
            tracing::debug!(
                "Pruned {} stale chunks from document {}",
                pruned,
                request.document_id
            );
        }

        self.store
            .update_document(
                &request.document_id,
                &DocumentUpdate {
                    text: Some(text),
                    status: Some(DocumentStatus::Processed),
                    bucket: Some(request.bucket.clone()),
                    filename: Some(request.filename.clone()),
                    failure_reason: None,
                },
            )
            .await?;

        tracing::info!(
            "Document {} processed ({} chunks)",
            request.document_id,
            chunk_count
        );

        Ok(IngestReport {
            document_id: request.document_id.clone(),
            chunk_count,
            pruned,
            skipped: false,
        })
    }

    /// 일시적 실패 후 Pending으로 되돌리기 (best effort)
    async fn revert_to_pending(&self, document_id: &str) {
        if let Err(e) = self
            .store
            .update_document(document_id, &DocumentUpdate::status(DocumentStatus::Pending))
            .await
        {
            tracing::warn!("Failed to revert document {} to pending: {}", document_id, e);
        }
    }

    /// 실패 처리
    ///
    /// - Fatal / Validation: 즉시 Failed
    /// - Retryable / NotFound: 남은 시도가 있으면 백오프 후 재시도, 없으면 Failed
    ///
    /// # Arguments
    /// * `document_id` - 실패한 문서
    /// * `error` - `process`가 반환한 에러
    /// * `attempt` - 방금 실패한 시도 번호 (1부터)
    pub async fn handle_failure(
        &self,
        document_id: &str,
        error: &RagError,
        attempt: u32,
    ) -> Disposition {
        if error.is_retryable() && self.retry.can_retry(attempt) {
            let after = self.retry.backoff(attempt);
            tracing::warn!(
                "Document {} attempt {}/{} failed, retrying in {:?}: {}",
                document_id,
                attempt,
                self.retry.max_attempts,
                after,
                error
            );
            return Disposition::Retry { after };
        }

        let reason = if error.is_retryable() {
            format!("gave up after {} attempts: {}", attempt, error)
        } else {
            error.to_string()
        };

        tracing::error!("Document {} failed: {}", document_id, reason);
        self.mark_failed(document_id, &reason).await;
        Disposition::Failed { reason }
    }

    async fn mark_failed(&self, document_id: &str, reason: &str) {
        match self
            .store
            .update_document(document_id, &DocumentUpdate::failed(reason))
            .await
        {
            Ok(()) => {}
            Err(RagError::NotFound(_)) => {
                tracing::warn!("Document {} not found, skipping failed status", document_id);
            }
            Err(e) => {
                tracing::error!("Failed to mark document {} as failed: {}", document_id, e);
            }
        }
    }

    /// 인프로세스 실행기
    ///
    /// 재시도 정책에 따라 `process`를 반복하고, 시도 사이에 백오프만큼 대기합니다.
    pub async fn run_to_completion(&self, request: &IngestRequest) -> Result<IngestReport> {
        let mut attempt = 1;
        loop {
            match self.process(request).await {
                Ok(report) => return Ok(report),
                Err(e) => match self
                    .handle_failure(&request.document_id, &e, attempt)
                    .await
                {
                    Disposition::Retry { after } => {
                        tokio::time::sleep(after).await;
                        attempt += 1;
                    }
                    Disposition::Failed { .. } => return Err(e),
                },
            }
        }
    }
}

// ============================================================================
// Content Loading
// ============================================================================

/// 원본 콘텐츠를 UTF-8 텍스트로 로드
///
/// - 파일 없음, 잘못된 UTF-8, 빈 콘텐츠: Fatal
/// - 그 외 I/O 에러: Retryable
pub async fn load_content(source: &ContentSource) -> Result<String> {
    let bytes = match source {
        ContentSource::Bytes(bytes) => bytes.clone(),
        ContentSource::Path(path) => match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RagError::fatal(format!(
                    "Source file not found: {}",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(RagError::retryable(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        },
    };

    let text = String::from_utf8(bytes)
        .map_err(|e| RagError::fatal(format!("Content is not valid UTF-8: {}", e)))?;

    if text.trim().is_empty() {
        return Err(RagError::fatal("Content is empty"));
    }

    Ok(text)
}

// ============================================================================
// Tests
// ============================================================================
