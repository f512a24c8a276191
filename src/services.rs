//! Services - 시작 시 한 번 구성하는 기능 객체
//!
//! 저장소와 임베딩 프로바이더를 소유하고, 수집 파이프라인과 검색기를 만들어 줍니다.
//! 종료 시 [`Services::close`]로 백엔드 자원을 해제합니다.

use std::sync::Arc;

use anyhow::Context;

use crate::config::{Backend, RagConfig};
use crate::embedding::{create_embedder_with_dimension, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::ingest::{register_upload, IngestionPipeline, UploadPolicy};
use crate::knowledge::{
    DocumentRecord, HybridRetriever, InMemoryVectorStore, LocalVectorStore, VectorStore,
};

/// 설정된 백엔드로 저장소 열기
pub async fn open_store(config: &RagConfig) -> anyhow::Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match config.backend {
        Backend::Memory => Arc::new(InMemoryVectorStore::new()),
        Backend::Local => Arc::new(
            LocalVectorStore::open(&config.data_dir, config.embedding_dimension)
                .await
                .context("Failed to open local vector store")?,
        ),
    };

    tracing::info!("Opened {} vector store", store.name());
    Ok(store)
}

/// 작업 결과와 관계없이 저장소를 닫고 결과를 돌려줌
///
/// 작업이 실패했다면 닫기 에러는 로그만 남기고 작업 에러를 반환합니다.
pub async fn close_after<T>(store: &dyn VectorStore, result: Result<T>) -> Result<T> {
    if let Err(e) = store.close().await {
        tracing::warn!("Failed to close {} store: {}", store.name(), e);
        if result.is_ok() {
            return Err(e);
        }
    }
    result
}

/// 기능 객체
pub struct Services {
    config: RagConfig,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Services {
    /// 설정으로 저장소와 Gemini 임베딩 프로바이더를 구성
    pub async fn open(config: RagConfig) -> anyhow::Result<Self> {
        config.validate().context("Invalid configuration")?;

        let store = open_store(&config).await?;
        let embedder = create_embedder_with_dimension(config.embedding_dimension)
            .context("Failed to create embedder")?;

        Ok(Self::with_capabilities(config, store, Arc::new(embedder)))
    }

    /// 이미 만든 저장소/임베더로 구성
    pub fn with_capabilities(
        config: RagConfig,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            config,
            store,
            embedder,
        }
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn upload_policy(&self) -> &UploadPolicy {
        &self.config.upload
    }

    /// 수집 파이프라인
    pub fn pipeline(&self) -> Result<IngestionPipeline> {
        Ok(IngestionPipeline::new(
            self.store.clone(),
            self.embedder.clone(),
            self.config.chunk,
        )?
        .with_retry_policy(self.config.retry))
    }

    /// 검색기
    pub fn retriever(&self) -> HybridRetriever {
        HybridRetriever::new(self.store.clone(), self.embedder.clone())
            .with_timeout(self.config.search_timeout)
    }

    /// 업로드 등록 (버킷 미지정 시 설정의 `storage_bucket`)
    pub async fn register_upload(
        &self,
        owner_id: &str,
        filename: &str,
        size: u64,
        bucket: Option<&str>,
    ) -> Result<DocumentRecord> {
        register_upload(
            self.store.as_ref(),
            &self.config.upload,
            owner_id,
            filename,
            size,
            bucket.unwrap_or(self.config.storage_bucket.as_str()),
        )
        .await
    }

    /// 작업 결과를 받아 닫기 ([`close_after`])
    pub async fn finish<T>(self, result: Result<T>) -> Result<T> {
        close_after(self.store.as_ref(), result).await
    }

    /// 백엔드 자원 해제
    pub async fn close(self) -> Result<()> {
        self.store.close().await.map_err(|e| {
            RagError::retryable(format!("Failed to close {} store: {}", self.store.name(), e))
        })
    }
}
