//! CLI 모듈
//!
//! ragcore CLI 명령어 정의 및 구현

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::collector::{CollectionStats, FileCollector};
use crate::config::RagConfig;
use crate::embedding::has_api_key;
use crate::ingest::{ContentSource, IngestRequest};
use crate::knowledge::{SearchOptions, SearchStrategy, RRF_K};
use crate::services::{close_after, open_store, Services};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "ragcore")]
#[command(version, about = "문서 수집 파이프라인 + 하이브리드 검색", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 파일 또는 폴더를 수집하여 색인
    Ingest {
        /// 문서 소유자 ID
        #[arg(short, long)]
        owner: String,

        /// 수집할 파일 경로
        #[arg(long, conflicts_with = "dir")]
        file: Option<PathBuf>,

        /// 수집할 폴더 경로 (재귀)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// 저장소 버킷 (기본: RAG_STORAGE_BUCKET)
        #[arg(short, long)]
        bucket: Option<String>,
    },

    /// 지식베이스 검색
    Query {
        /// 검색 쿼리
        query: String,

        /// 검색 범위 소유자 ID
        #[arg(short, long)]
        owner: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// 검색 전략 (semantic, keyword, hybrid)
        #[arg(short, long, default_value = "hybrid")]
        strategy: String,

        /// 문서 ID 제한 (여러 번 지정 가능)
        #[arg(long = "doc")]
        documents: Vec<String>,

        /// 시맨틱 검색 최대 거리
        #[arg(long)]
        min_score: Option<f64>,

        /// JSON 출력
        #[arg(long)]
        json: bool,
    },

    /// 저장된 문서 목록
    Documents {
        /// 소유자 ID
        #[arg(short, long)]
        owner: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = RagConfig::from_env().context("설정 로드 실패")?;

    match cli.command {
        Commands::Ingest {
            owner,
            file,
            dir,
            bucket,
        } => cmd_ingest(config, &owner, file, dir, bucket).await,
        Commands::Query {
            query,
            owner,
            limit,
            strategy,
            documents,
            min_score,
            json,
        } => {
            let options = SearchOptions {
                document_ids: (!documents.is_empty()).then_some(documents),
                min_score,
                rrf_k: RRF_K,
            };
            cmd_query(config, &query, &owner, limit, &strategy, options, json).await
        }
        Commands::Documents { owner, limit } => cmd_documents(config, &owner, limit).await,
        Commands::Status => cmd_status(config).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

fn require_api_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }
    Ok(())
}

/// 문서 수집 명령어 (ingest)
///
/// 파일마다 업로드를 등록한 뒤 파이프라인을 끝까지 실행합니다.
async fn cmd_ingest(
    config: RagConfig,
    owner: &str,
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    bucket: Option<String>,
) -> Result<()> {
    require_api_key()?;

    let collector = FileCollector::with_policy(config.upload.clone());

    let files = if let Some(ref file_path) = file {
        match collector.collect_file(file_path)? {
            Some(f) => vec![f],
            None => {
                println!("[!] 지원하지 않는 파일 형식: {:?}", file_path);
                return Ok(());
            }
        }
    } else if let Some(ref dir_path) = dir {
        collector.collect_directory(dir_path)?
    } else {
        bail!("--file 또는 --dir를 지정해야 합니다");
    };

    if files.is_empty() {
        println!("[!] 수집할 파일이 없습니다.");
        return Ok(());
    }

    let stats = CollectionStats::from_files(&files);
    println!("[*] 수집 대상: {} 파일", stats.total_files);
    println!("    총 크기: {}", format_bytes(stats.total_size as usize));
    println!();

    let services = Services::open(config).await.context("서비스 초기화 실패")?;
    let pipeline = match services.pipeline() {
        Ok(pipeline) => pipeline,
        Err(e) => return services.finish(Err(e)).await.context("파이프라인 생성 실패"),
    };

    let mut success_count = 0;
    let mut error_count = 0;

    for (i, collected_file) in files.iter().enumerate() {
        let filename = collected_file.filename();
        print!("[{}/{}] {}... ", i + 1, files.len(), filename);

        let doc = match services
            .register_upload(owner, &filename, collected_file.size, bucket.as_deref())
            .await
        {
            Ok(doc) => doc,
            Err(e) => {
                println!("등록 실패: {}", e);
                error_count += 1;
                continue;
            }
        };

        let request = IngestRequest {
            document_id: doc.id.clone(),
            owner_id: doc.owner_id.clone(),
            source: ContentSource::Path(collected_file.path.clone()),
            bucket: doc.bucket.clone(),
            filename,
        };

        match pipeline.run_to_completion(&request).await {
            Ok(report) if report.skipped => {
                println!("건너뜀 (이미 실패한 문서, ID: {})", report.document_id);
            }
            Ok(report) => {
                println!("완료 ({} 청크, ID: {})", report.chunk_count, report.document_id);
                success_count += 1;
            }
            Err(e) => {
                println!("실패: {}", e);
                error_count += 1;
            }
        }
    }

    println!();
    println!("[OK] 완료: 성공 {}, 실패 {}", success_count, error_count);

    services.close().await?;
    Ok(())
}

/// 검색 명령어 (query)
async fn cmd_query(
    config: RagConfig,
    query: &str,
    owner: &str,
    limit: usize,
    strategy: &str,
    options: SearchOptions,
    json: bool,
) -> Result<()> {
    let strategy: SearchStrategy = strategy.parse()?;
    require_api_key()?;

    let services = Services::open(config).await.context("서비스 초기화 실패")?;
    let result = services
        .retriever()
        .search(query, owner, limit, strategy, &options)
        .await;
    let response = services.finish(result).await.context("검색 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("[*] 검색: \"{}\" ({})", query, strategy);

    for warning in &response.warnings {
        println!("[!] {}", warning);
    }

    if response.results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", response.results.len());

    for (i, result) in response.results.iter().enumerate() {
        let method_str = match result.source {
            SearchStrategy::Semantic => "SEM",
            SearchStrategy::Keyword => "KEY",
            SearchStrategy::Hybrid => "HYB",
        };

        println!(
            "{}. [{}] [점수: {:.4}] Doc {}",
            i + 1,
            method_str,
            result.score,
            result.document_id
        );
        println!("   내용: {}", truncate_text(&result.text, 200));
        println!();
    }

    Ok(())
}

/// 문서 목록 명령어 (documents)
async fn cmd_documents(config: RagConfig, owner: &str, limit: usize) -> Result<()> {
    let store = open_store(&config).await?;

    let result = store.list_documents(owner, limit).await;
    let docs = close_after(store.as_ref(), result)
        .await
        .context("문서 목록 조회 실패")?;

    if docs.is_empty() {
        println!("[!] 저장된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 문서 ({} 건):\n", docs.len());

    for doc in docs {
        println!(
            "  {} [{}] {}",
            doc.id,
            doc.status,
            truncate_text(&doc.filename, 40)
        );
        println!(
            "        {} | bucket: {} | {} chars",
            doc.created_at.format("%Y-%m-%d %H:%M"),
            doc.bucket,
            doc.text.chars().count()
        );
        if let Some(ref reason) = doc.failure_reason {
            println!("        실패 사유: {}", truncate_text(reason, 80));
        }
        println!();
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: RagConfig) -> Result<()> {
    println!("ragcore v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!("[*] 백엔드: {}", config.backend);
    println!(
        "[*] 청킹: {} / 오버랩 {}",
        config.chunk.size, config.chunk.overlap
    );

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    match open_store(&config).await {
        Ok(store) => {
            match store.stats().await {
                Ok(stats) => {
                    println!("[OK] 저장된 문서: {} 건", stats.document_count);
                    println!("[OK] 청크: {} 건", stats.chunk_count);
                }
                Err(e) => {
                    println!("[!] 통계 조회 실패: {}", e);
                }
            }
            if let Err(e) = store.close().await {
                tracing::debug!("Failed to close store: {}", e);
            }
        }
        Err(e) => {
            println!("[!] 저장소 열기 실패: {}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_parse_query_command() {
        let cli = Cli::try_parse_from([
            "ragcore", "query", "rust traits", "--owner", "u1", "--doc", "d1", "--doc", "d2",
            "--json",
        ])
        .unwrap();

        match cli.command {
            Commands::Query {
                owner,
                documents,
                strategy,
                json,
                limit,
                ..
            } => {
                assert_eq!(owner, "u1");
                assert_eq!(documents, vec!["d1", "d2"]);
                assert_eq!(strategy, "hybrid");
                assert_eq!(limit, 5);
                assert!(json);
            }
            _ => panic!("expected query command"),
        }
    }

    #[test]
    fn test_ingest_requires_owner() {
        assert!(Cli::try_parse_from(["ragcore", "ingest", "--file", "a.txt"]).is_err());
        assert!(Cli::try_parse_from([
            "ragcore", "ingest", "--owner", "u1", "--file", "a.txt", "--dir", "docs"
        ])
        .is_err());
    }
}
