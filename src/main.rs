//! Agentic RAG 命令行
//!
//! 入口：加载配置、初始化日志，把文档目录切分入库，然后逐个回答问题。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use walkdir::WalkDir;

use agentic_rag::config::{load_config, AppConfig};
use agentic_rag::knowledge::{CachedEmbedder, EmbeddingCache, KnowledgeStore, Metadata, RecursiveSplitter};
use agentic_rag::llm::{create_embedder_from_config, create_llm_from_config, EmbeddingProvider};
use agentic_rag::rag::{RagEvent, RagOutcome, Scalar};
use agentic_rag::{observability, OrchestrationController};

#[derive(Debug, Parser)]
#[command(name = "agentic-rag", version, about = "检索 → 生成 → 反思 → 补充检索的迭代问答")]
struct Cli {
    /// 文档目录（读取其中的 .txt / .md 文件）
    #[arg(long)]
    docs: PathBuf,

    /// 额外的配置文件，覆盖 config/default.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// 以 JSON 输出完整结果
    #[arg(long)]
    json: bool,

    /// 把过程事件以 JSON 行写到 stderr
    #[arg(long)]
    events: bool,

    /// 要回答的问题，每个问题独立一个会话
    #[arg(required = true)]
    questions: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    observability::init();

    let cfg = load_config(cli.config.clone()).context("Failed to load config")?;

    let (documents, metadata) = load_documents(&cli.docs)
        .with_context(|| format!("Failed to read documents from {}", cli.docs.display()))?;
    anyhow::ensure!(!documents.is_empty(), "no .txt/.md documents under {}", cli.docs.display());

    let embedder = build_embedder(&cfg).context("Failed to open embedding cache")?;
    let store = Arc::new(KnowledgeStore::new(embedder));
    let splitter = RecursiveSplitter::new(cfg.ingest.chunk_size)
        .with_separators(cfg.ingest.separators.clone());
    store
        .setup_knowledge_base(
            &cfg.rag.collection,
            cfg.embedding.dimension,
            &documents,
            Some(&metadata),
            &splitter,
        )
        .await
        .context("Failed to set up knowledge base")?;

    let llm = create_llm_from_config(&cfg.llm);
    let mut controller = OrchestrationController::from_config(llm, store, &cfg.rag)
        .context("Invalid [rag] configuration")?;

    let printer = if cli.events {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<RagEvent>();
        controller = controller.with_event_tx(tx);
        Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&event) {
                    eprintln!("{}", line);
                }
            }
        }))
    } else {
        None
    };

    for question in &cli.questions {
        match controller.run_query(question).await {
            Ok(outcome) => print_outcome(&outcome, cli.json)?,
            Err(failure) => {
                if let Some(answer) = &failure.partial_answer {
                    eprintln!("部分回答（会话中断）：\n{}", answer);
                }
                return Err(failure).with_context(|| format!("Question failed: {}", question));
            }
        }
    }

    drop(controller);
    if let Some(handle) = printer {
        let _ = handle.await;
    }
    Ok(())
}

/// 读取目录下的 .txt / .md 文件，文件名作为 source 元数据
fn load_documents(dir: &Path) -> anyhow::Result<(Vec<String>, Vec<Metadata>)> {
    let mut documents = Vec::new();
    let mut metadata = Vec::new();

    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|ext| ext.to_str()),
                Some("txt") | Some("md")
            )
        })
        .collect();
    paths.sort();

    for path in paths {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if text.trim().is_empty() {
            continue;
        }
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut meta = BTreeMap::new();
        meta.insert("source".to_string(), Scalar::from(source));
        documents.push(text);
        metadata.push(meta);
    }
    tracing::info!(count = documents.len(), dir = %dir.display(), "documents loaded");
    Ok((documents, metadata))
}

fn build_embedder(cfg: &AppConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let e = &cfg.embedding;
    let base = create_embedder_from_config(&e.provider, e.base_url.as_deref(), &e.model, e.dimension);
    match e.resolved_cache_path(&cfg.app.data_dir) {
        Some(path) => {
            let cache = EmbeddingCache::open(&path)
                .with_context(|| format!("cache path {}", path.display()))?;
            Ok(Arc::new(CachedEmbedder::new(base, cache, e.batch_size)))
        }
        None => Ok(base),
    }
}

fn print_outcome(outcome: &RagOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    println!("问题：{}", outcome.question);
    println!("{}", outcome.final_answer);
    println!(
        "-- {}，反思 {} 轮，证据 {} 条，查询 {} 条",
        outcome.termination,
        outcome.iteration_history.len(),
        outcome.evidence.len(),
        outcome.issued_queries.len()
    );
    println!();
    Ok(())
}
