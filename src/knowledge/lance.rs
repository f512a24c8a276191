//! LanceDB Chunk Index - 청크 벡터 ANN 검색
//!
//! 청크 벡터를 owner_id / document_id 컬럼과 함께 저장하고,
//! 검색 시 `only_if` 필터로 owner 범위를 백엔드에서 강제합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;

use crate::error::{RagError, Result};

use super::document::ChunkRecord;
use super::vector::{ScoredChunk, SearchFilter};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "chunks";

/// LanceDB 에러를 재시도 가능 에러로 변환
fn lance_err(context: &'static str) -> impl FnOnce(lancedb::Error) -> RagError {
    move |e| RagError::retryable(format!("{}: {}", context, e))
}

// ============================================================================
// LanceChunkIndex
// ============================================================================

/// LanceDB 청크 벡터 인덱스
pub struct LanceChunkIndex {
    db: Connection,
    dimension: i32,
}

impl LanceChunkIndex {
    /// LanceDB 인덱스 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 차원
    pub async fn open(path: &Path, dimension: usize) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        let index = Self {
            db,
            dimension: i32::try_from(dimension).context("Embedding dimension too large")?,
        };

        if !index.table_exists().await {
            index
                .db
                .create_empty_table(TABLE_NAME, Arc::new(index.schema()))
                .execute()
                .await
                .context("Failed to create chunk table")?;
        }

        Ok(index)
    }

    /// 청크 테이블 스키마
    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("object_id", DataType::Utf8, false),
            Field::new("document_id", DataType::Utf8, false),
            Field::new("owner_id", DataType::Utf8, false),
            Field::new("sequence_index", DataType::Int32, false),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension,
                ),
                false,
            ),
        ])
    }

    /// 청크를 Arrow RecordBatch로 변환
    fn chunk_to_batch(&self, chunk: &ChunkRecord) -> Result<RecordBatch> {
        if chunk.vector.len() != self.dimension as usize {
            return Err(RagError::fatal(format!(
                "Vector dimension mismatch: expected {}, got {}",
                self.dimension,
                chunk.vector.len()
            )));
        }

        let sequence_index = i32::try_from(chunk.sequence_index).map_err(|_| {
            RagError::fatal(format!(
                "Sequence index {} out of range for chunk {}",
                chunk.sequence_index, chunk.id
            ))
        })?;

        let values = Float32Array::from(chunk.vector.clone());
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vectors = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .map_err(|e| RagError::fatal(format!("Failed to create vector array: {}", e)))?;

        RecordBatch::try_new(
            Arc::new(self.schema()),
            vec![
                Arc::new(StringArray::from(vec![chunk.id.as_str()])),
                Arc::new(StringArray::from(vec![chunk.document_id.as_str()])),
                Arc::new(StringArray::from(vec![chunk.owner_id.as_str()])),
                Arc::new(Int32Array::from(vec![sequence_index])),
                Arc::new(StringArray::from(vec![chunk.text.as_str()])),
                Arc::new(vectors),
            ],
        )
        .map_err(|e| RagError::fatal(format!("Failed to create RecordBatch: {}", e)))
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.contains(&TABLE_NAME.to_string()))
            .unwrap_or(false)
    }

    async fn table(&self) -> Result<lancedb::table::Table> {
        self.db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(lance_err("Failed to open chunk table"))
    }

    /// 청크 벡터 저장 (같은 object_id 행은 교체)
    pub async fn upsert(&self, chunk: &ChunkRecord) -> Result<()> {
        let batch = self.chunk_to_batch(chunk)?;
        let schema = batch.schema();
        let table = self.table().await?;

        table
            .delete(&format!("object_id = {}", quote(&chunk.id)))
            .await
            .map_err(lance_err("Failed to delete previous chunk vector"))?;

        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(batches)
            .execute()
            .await
            .map_err(lance_err("Failed to add chunk vector"))?;

        Ok(())
    }

    /// `sequence_index >= keep`인 벡터 삭제
    pub async fn prune(&self, document_id: &str, keep: usize) -> Result<usize> {
        let table = self.table().await?;
        let filter = format!(
            "document_id = {} AND sequence_index >= {}",
            quote(document_id),
            keep
        );

        let stale = table
            .count_rows(Some(filter.clone()))
            .await
            .map_err(lance_err("Failed to count stale vectors"))?;
        if stale > 0 {
            table
                .delete(&filter)
                .await
                .map_err(lance_err("Failed to prune vectors"))?;
        }

        Ok(stale)
    }

    /// 코사인 거리 기반 최근접 이웃 검색
    pub async fn search(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let table = self.table().await?;

        let stream = table
            .vector_search(vector.to_vec())
            .map_err(lance_err("Failed to create vector search"))?
            .distance_type(DistanceType::Cosine)
            .only_if(filter_expr(filter))
            .limit(limit)
            .execute()
            .await
            .map_err(lance_err("Failed to execute vector search"))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| {
                RagError::retryable(format!("Failed to read vector search results: {}", e))
            })?;

        let mut results = Vec::new();

        for batch in batches {
            let ids = string_column(&batch, "object_id")?;
            let texts = string_column(&batch, "text")?;
            let doc_ids = string_column(&batch, "document_id")?;
            let owners = string_column(&batch, "owner_id")?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| RagError::fatal("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                results.push(ScoredChunk {
                    id: ids.value(i).to_string(),
                    text: texts.value(i).to_string(),
                    document_id: doc_ids.value(i).to_string(),
                    owner_id: owners.value(i).to_string(),
                    score: distances.value(i) as f64,
                });
            }
        }

        results.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(results)
    }

    /// 벡터 개수 조회
    pub async fn count(&self) -> Result<usize> {
        let table = self.table().await?;
        table
            .count_rows(None)
            .await
            .map_err(lance_err("Failed to count rows"))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// SQL 문자열 리터럴 인용 (작은따옴표 이스케이프)
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// 검색 필터를 LanceDB 필터 식으로 변환
fn filter_expr(filter: &SearchFilter) -> String {
    let mut expr = format!("owner_id = {}", quote(&filter.owner_id));

    if let Some(ref ids) = filter.document_ids {
        let list: Vec<String> = ids.iter().map(|id| quote(id)).collect();
        expr.push_str(&format!(" AND document_id IN ({})", list.join(", ")));
    }

    expr
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| RagError::fatal(format!("Missing {} column", name)))
}

// ============================================================================
// Tests
// ============================================================================
