//! Text Chunking Module
//!
//! 고정 크기 슬라이딩 윈도우 청킹을 제공합니다.
//!
//! - 윈도우: `[start, start + size)` (문자 단위, UTF-8 경계 안전)
//! - 다음 시작 위치: `start + size - overlap`
//! - 마지막 윈도우는 짧을 수 있으며, overlap보다 작은 꼬리 청크도 그대로 내보냅니다
//!
//! 같은 입력은 항상 같은 청크 목록을 만듭니다.
//! 재시도 시 청크 경계가 바뀌지 않으므로 청크 ID를 `(document_id, index)`로 고정할 수 있습니다.

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// 기본 청크 크기 (문자 수)
pub const DEFAULT_CHUNK_SIZE: usize = 800;

/// 기본 오버랩 크기 (문자 수)
pub const DEFAULT_CHUNK_OVERLAP: usize = 150;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// 청크 크기 (문자 수)
    pub size: usize,
    /// 오버랩 크기 (문자 수)
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkConfig {
    /// 설정으로 생성 (검증 포함)
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        let config = Self { size, overlap };
        config.validate()?;
        Ok(config)
    }

    /// `size > 0`, `overlap < size` 확인
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(RagError::validation("chunk size must be greater than 0"));
        }
        if self.overlap >= self.size {
            return Err(RagError::validation(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.overlap, self.size
            )));
        }
        Ok(())
    }

    /// 이 설정으로 텍스트 분할
    pub fn chunk(&self, text: &str) -> Result<Vec<String>> {
        chunk_text(text, self.size, self.overlap)
    }
}

// ============================================================================
// Sliding Window
// ============================================================================

/// 텍스트를 겹치는 고정 크기 청크로 분할
///
/// # Arguments
/// * `text` - 분할할 텍스트
/// * `size` - 청크 당 문자 수 (> 0)
/// * `overlap` - 청크 간 중첩 문자 수 (< size)
///
/// # Returns
/// 순서가 보존된 청크 목록. `text`가 `size` 이하이면 텍스트 전체 하나.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Result<Vec<String>> {
    ChunkConfig { size, overlap }.validate()?;

    // 문자 시작 바이트 오프셋 + 끝 오프셋
    let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let char_count = offsets.len();
    offsets.push(text.len());

    if char_count <= size {
        return Ok(vec![text.to_string()]);
    }

    let step = size - overlap;
    let mut chunks = Vec::with_capacity(char_count / step + 1);
    let mut start = 0;

    while start < char_count {
        let end = (start + size).min(char_count);
        chunks.push(text[offsets[start]..offsets[end]].to_string());
        start += step;
    }

    Ok(chunks)
}

/// 청크 목록을 원문으로 재구성
///
/// 마지막을 제외한 각 청크의 앞 `size - overlap` 문자와 마지막 청크 전체를 이어 붙입니다.
pub fn reassemble(chunks: &[String], size: usize, overlap: usize) -> String {
    let step = size.saturating_sub(overlap);
    let mut text = String::new();

    for (i, chunk) in chunks.iter().enumerate() {
        if i + 1 == chunks.len() {
            text.push_str(chunk);
        } else {
            text.extend(chunk.chars().take(step));
        }
    }

    text
}

// ============================================================================
// Tests
// ============================================================================
