//! 에러 분류 - 수집 파이프라인과 검색 엔진이 공유하는 에러 타입
//!
//! - Validation: 작업 시작 전에 거부되는 입력 오류
//! - Retryable: 일시적 외부 서비스 장애 (타임아웃, 연결 거부, 429/5xx)
//! - Fatal: 재시도해도 의미 없는 실패 (인코딩 오류, 빈 콘텐츠, 잘못된 요청)
//! - NotFound: 갱신/조회 대상 문서가 없음 (커밋 전 트리거일 수 있으므로 재시도 대상)

use thiserror::Error;

/// 라이브러리 공통 Result 타입
pub type Result<T> = std::result::Result<T, RagError>;

/// ragcore 에러 타입
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RagError {
    /// 잘못된 파라미터 또는 입력
    #[error("validation failed: {0}")]
    Validation(String),

    /// 일시적 외부 서비스 장애
    #[error("external service unavailable: {0}")]
    Retryable(String),

    /// 재시도 불가능한 실패
    #[error("fatal error: {0}")]
    Fatal(String),

    /// 문서 없음
    #[error("document not found: {0}")]
    NotFound(String),

    /// 하이브리드 검색의 모든 하위 검색 실패
    #[error("all search backends failed (semantic: {semantic}; keyword: {keyword})")]
    SearchUnavailable { semantic: String, keyword: String },
}

impl RagError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// 외부 실행기의 백오프 재시도 대상인지 여부
    ///
    /// NotFound는 문서 레코드가 아직 보이지 않는 경우를 포함하므로 재시도 대상입니다.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_) | Self::NotFound(_))
    }
}

// ============================================================================
// Tests
// ============================================================================
