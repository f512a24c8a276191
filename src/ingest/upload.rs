//! 업로드 등록
//!
//! 업로드 파일을 검증하고 Pending 문서 레코드를 만듭니다.
//! 수집 파이프라인은 이 레코드가 저장된 뒤에 트리거됩니다.

use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RagError, Result};
use crate::knowledge::{DocumentRecord, VectorStore};

/// 업로드 최대 크기 (25 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 25 * 1024 * 1024;

/// 기본 저장소 버킷
pub const DEFAULT_BUCKET: &str = "local";

/// 업로드 정책
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPolicy {
    pub max_bytes: u64,
    /// 허용 확장자 (소문자, 점 없음)
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_extensions: ["txt", "md", "markdown", "csv", "json"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

impl UploadPolicy {
    /// 확장자 허용 여부 (대소문자 무시)
    pub fn allows(&self, filename: &str) -> bool {
        Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.allowed_extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    /// 파일명과 크기 검증
    pub fn check(&self, filename: &str, size: u64) -> Result<()> {
        if filename.trim().is_empty() {
            return Err(RagError::validation("Filename must not be empty"));
        }
        if size == 0 {
            return Err(RagError::validation(format!("File is empty: {}", filename)));
        }
        if size > self.max_bytes {
            return Err(RagError::validation(format!(
                "File too large: {} ({} bytes, max {})",
                filename, size, self.max_bytes
            )));
        }
        if !self.allows(filename) {
            return Err(RagError::validation(format!(
                "Unsupported file type: {} (allowed: {})",
                filename,
                self.allowed_extensions.join(", ")
            )));
        }
        Ok(())
    }
}

/// 업로드 등록
///
/// 검증 후 UUID v4 ID로 Pending 문서를 저장합니다.
///
/// # Returns
/// 저장된 문서 레코드 (파이프라인 트리거에 `id` 사용)
pub async fn register_upload(
    store: &dyn VectorStore,
    policy: &UploadPolicy,
    owner_id: &str,
    filename: &str,
    size: u64,
    bucket: &str,
) -> Result<DocumentRecord> {
    if owner_id.trim().is_empty() {
        return Err(RagError::validation("Owner id must not be empty"));
    }
    policy.check(filename, size)?;

    let id = Uuid::new_v4().to_string();
    let doc = DocumentRecord::pending(&id, owner_id, filename, bucket);
    store.upsert_document(&doc).await?;

    tracing::info!(
        "Registered upload {} as document {} (owner={}, {} bytes)",
        filename,
        id,
        owner_id,
        size
    );

    Ok(doc)
}
