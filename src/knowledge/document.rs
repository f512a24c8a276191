//! 문서/청크 레코드 타입
//!
//! 벡터 저장소 백엔드가 공통으로 저장하는 레코드입니다.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::RagError;

/// 업로드 원본 문서의 doc_type 값
pub const SOURCE_DOC_TYPE: &str = "source";

// ============================================================================
// Document Status
// ============================================================================

/// 문서 처리 상태
///
/// `Pending → Processing → {Processed, Failed}`.
/// 일시적 실패 시에만 `Processing → Pending`으로 되돌아갑니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            other => Err(RagError::validation(format!(
                "unknown document status: {}",
                other
            ))),
        }
    }
}

// ============================================================================
// Document Record
// ============================================================================

/// 저장된 문서 레코드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// 문서 ID (object_id)
    pub id: String,
    pub owner_id: String,
    pub filename: String,
    /// 저장소 네임스페이스 라벨
    pub bucket: String,
    /// 처리 완료 후 채워지는 전체 텍스트
    pub text: String,
    pub status: DocumentStatus,
    /// Failed 상태일 때의 사유
    pub failure_reason: Option<String>,
    pub doc_type: String,
    pub created_at: DateTime<Utc>,
    /// 문서 단위 임베딩 (선택)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

impl DocumentRecord {
    /// 업로드 직후의 Pending 문서 생성
    pub fn pending(id: &str, owner_id: &str, filename: &str, bucket: &str) -> Self {
        Self {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            filename: filename.to_string(),
            bucket: bucket.to_string(),
            text: String::new(),
            status: DocumentStatus::Pending,
            failure_reason: None,
            doc_type: SOURCE_DOC_TYPE.to_string(),
            created_at: Utc::now(),
            vector: None,
        }
    }

    /// processed 플래그 (status == Processed)
    pub fn processed(&self) -> bool {
        self.status == DocumentStatus::Processed
    }

    /// 부분 갱신 적용
    pub fn apply(&mut self, update: &DocumentUpdate) {
        if let Some(ref text) = update.text {
            self.text = text.clone();
        }
        if let Some(ref bucket) = update.bucket {
            self.bucket = bucket.clone();
        }
        if let Some(ref filename) = update.filename {
            self.filename = filename.clone();
        }
        if let Some(status) = update.status {
            self.status = status;
            if status != DocumentStatus::Failed {
                self.failure_reason = None;
            }
        }
        if let Some(ref reason) = update.failure_reason {
            self.failure_reason = Some(reason.clone());
        }
    }
}

/// 문서 부분 갱신 필드
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentUpdate {
    pub text: Option<String>,
    pub status: Option<DocumentStatus>,
    pub bucket: Option<String>,
    pub filename: Option<String>,
    pub failure_reason: Option<String>,
}

impl DocumentUpdate {
    /// 상태만 변경
    pub fn status(status: DocumentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Failed + 사유
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: Some(DocumentStatus::Failed),
            failure_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

// ============================================================================
// Chunk Record
// ============================================================================

/// 저장된 청크 레코드
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    /// 청크 ID ([`chunk_id`]로 파생)
    pub id: String,
    pub document_id: String,
    /// 문서 owner_id 비정규화 (쿼리 시 조인 없이 필터링)
    pub owner_id: String,
    pub text: String,
    pub sequence_index: usize,
    pub vector: Vec<f32>,
}

impl ChunkRecord {
    pub fn new(
        document_id: &str,
        owner_id: &str,
        sequence_index: usize,
        text: String,
        vector: Vec<f32>,
    ) -> Self {
        Self {
            id: chunk_id(document_id, sequence_index),
            document_id: document_id.to_string(),
            owner_id: owner_id.to_string(),
            text,
            sequence_index,
            vector,
        }
    }
}

/// `(document_id, sequence_index)`에서 안정적인 청크 ID 파생
///
/// 같은 문서를 다시 처리하면 같은 ID가 나오므로 upsert가 덮어쓰기로 동작합니다.
pub fn chunk_id(document_id: &str, sequence_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(b":");
    hasher.update(sequence_index.to_string().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_stable() {
        assert_eq!(chunk_id("doc-1", 0), chunk_id("doc-1", 0));
        assert_ne!(chunk_id("doc-1", 0), chunk_id("doc-1", 1));
        assert_ne!(chunk_id("doc-1", 0), chunk_id("doc-2", 0));
        assert_eq!(chunk_id("doc-1", 3).len(), 32);
    }

    #[test]
    fn test_status_roundtrip_str() {
        for status in [
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            DocumentStatus::Processed,
            DocumentStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<DocumentStatus>().unwrap(), status);
        }
        assert!("done".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn test_apply_update() {
        let mut doc = DocumentRecord::pending("d1", "u1", "a.txt", "local");
        assert!(!doc.processed());

        doc.apply(&DocumentUpdate::failed("boom"));
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert_eq!(doc.failure_reason.as_deref(), Some("boom"));

        doc.apply(&DocumentUpdate {
            text: Some("full text".to_string()),
            status: Some(DocumentStatus::Processed),
            ..Default::default()
        });
        assert!(doc.processed());
        assert_eq!(doc.text, "full text");
        assert!(doc.failure_reason.is_none());
    }
}
