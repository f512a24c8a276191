//! 설정 - 기본값 + 환경변수 오버라이드
//!
//! | env var | 필드 | 기본값 |
//! |---|---|---|
//! | `RAG_DATA_DIR` | `data_dir` | `<data_local_dir>/.ragcore` |
//! | `RAG_BACKEND` | `backend` | `local` |
//! | `RAG_CHUNK_SIZE` / `RAG_CHUNK_OVERLAP` | `chunk` | 800 / 150 |
//! | `RAG_EMBEDDING_DIMENSION` | `embedding_dimension` | 768 |
//! | `RAG_MAX_ATTEMPTS` | `retry.max_attempts` | 5 |
//! | `RAG_RETRY_BACKOFF_SECS` | `retry.base_backoff` | 30 |
//! | `RAG_SEARCH_TIMEOUT_SECS` | `search_timeout` | 10 |
//! | `RAG_STORAGE_BUCKET` | `storage_bucket` | `local` |
//! | `RAG_MAX_UPLOAD_BYTES` | `upload.max_bytes` | 25 MiB |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::ingest::{RetryPolicy, UploadPolicy, DEFAULT_BUCKET};
use crate::knowledge::{ChunkConfig, DEFAULT_SEARCH_TIMEOUT, EMBEDDING_DIMENSION};

/// 데이터 디렉토리 이름
const DATA_DIR_NAME: &str = ".ragcore";

/// 저장소 백엔드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// 프로세스 메모리 (재시작 시 사라짐)
    Memory,
    /// SQLite FTS5 + LanceDB
    Local,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Local => f.write_str("local"),
        }
    }
}

impl FromStr for Backend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "local" => Ok(Self::Local),
            other => Err(RagError::validation(format!(
                "Unknown backend: {} (expected memory or local)",
                other
            ))),
        }
    }
}

/// 전체 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagConfig {
    pub data_dir: PathBuf,
    pub backend: Backend,
    pub chunk: ChunkConfig,
    pub embedding_dimension: usize,
    pub retry: RetryPolicy,
    pub search_timeout: Duration,
    pub storage_bucket: String,
    pub upload: UploadPolicy,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend: Backend::Local,
            chunk: ChunkConfig::default(),
            embedding_dimension: EMBEDDING_DIMENSION,
            retry: RetryPolicy::default(),
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
            storage_bucket: DEFAULT_BUCKET.to_string(),
            upload: UploadPolicy::default(),
        }
    }
}

impl RagConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 조회 함수로 설정 로드 (비어 있는 값은 미설정으로 취급)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(dir) = get("RAG_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(backend) = get("RAG_BACKEND") {
            config.backend = backend.parse()?;
        }
        if let Some(size) = get("RAG_CHUNK_SIZE") {
            config.chunk.size = parse_number("RAG_CHUNK_SIZE", &size)?;
        }
        if let Some(overlap) = get("RAG_CHUNK_OVERLAP") {
            config.chunk.overlap = parse_number("RAG_CHUNK_OVERLAP", &overlap)?;
        }
        if let Some(dim) = get("RAG_EMBEDDING_DIMENSION") {
            config.embedding_dimension = parse_number("RAG_EMBEDDING_DIMENSION", &dim)?;
        }
        if let Some(attempts) = get("RAG_MAX_ATTEMPTS") {
            config.retry.max_attempts = parse_number("RAG_MAX_ATTEMPTS", &attempts)?;
        }
        if let Some(secs) = get("RAG_RETRY_BACKOFF_SECS") {
            config.retry.base_backoff =
                Duration::from_secs(parse_number("RAG_RETRY_BACKOFF_SECS", &secs)?);
        }
        if let Some(secs) = get("RAG_SEARCH_TIMEOUT_SECS") {
            config.search_timeout =
                Duration::from_secs(parse_number("RAG_SEARCH_TIMEOUT_SECS", &secs)?);
        }
        if let Some(bucket) = get("RAG_STORAGE_BUCKET") {
            config.storage_bucket = bucket;
        }
        if let Some(bytes) = get("RAG_MAX_UPLOAD_BYTES") {
            config.upload.max_bytes = parse_number("RAG_MAX_UPLOAD_BYTES", &bytes)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// 설정 값 검증
    pub fn validate(&self) -> Result<()> {
        self.chunk.validate()?;
        if self.embedding_dimension == 0 {
            return Err(RagError::validation("Embedding dimension must be greater than 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(RagError::validation("Max attempts must be at least 1"));
        }
        if self.search_timeout.is_zero() {
            return Err(RagError::validation("Search timeout must be greater than 0"));
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        RagError::validation(format!(
            "{} must be a non-negative integer, got {:?}",
            key, value
        ))
    })
}

/// 기본 데이터 디렉토리 (`<data_local_dir>/.ragcore`)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATA_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RagConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.backend, Backend::Local);
        assert_eq!(config.chunk, ChunkConfig::new(800, 150).unwrap());
        assert_eq!(config.embedding_dimension, 768);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_backoff, Duration::from_secs(30));
        assert_eq!(config.storage_bucket, "local");
        assert!(config.data_dir.ends_with(DATA_DIR_NAME));
    }

    #[test]
    fn test_overrides() {
        let config = RagConfig::from_lookup(lookup(&[
            ("RAG_BACKEND", "memory"),
            ("RAG_CHUNK_SIZE", "200"),
            ("RAG_CHUNK_OVERLAP", "20"),
            ("RAG_SEARCH_TIMEOUT_SECS", "3"),
            ("RAG_DATA_DIR", "/tmp/rag"),
            ("RAG_STORAGE_BUCKET", ""),
        ]))
        .unwrap();

        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.chunk.size, 200);
        assert_eq!(config.chunk.overlap, 20);
        assert_eq!(config.search_timeout, Duration::from_secs(3));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/rag"));
        assert_eq!(config.storage_bucket, "local");
    }

    #[test]
    fn test_malformed_values() {
        for pairs in [
            vec![("RAG_CHUNK_SIZE", "big")],
            vec![("RAG_BACKEND", "weaviate")],
            vec![("RAG_CHUNK_SIZE", "100"), ("RAG_CHUNK_OVERLAP", "100")],
            vec![("RAG_MAX_ATTEMPTS", "0")],
        ] {
            let result = RagConfig::from_lookup(lookup(&pairs));
            assert!(matches!(result, Err(RagError::Validation(_))), "{:?}", pairs);
        }
    }
}
