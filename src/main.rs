use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

use compliance_orchestrator::services::{LineStatementExtractor, LlmService, TomlFrameworkParser};
use compliance_orchestrator::utils::logging;
use compliance_orchestrator::{App, Capabilities, Config, DocumentExtractor, DocumentRef, JobStatus};

const USAGE: &str = "用法: compliance-orchestrator [--line-input] <输入文件> <框架文件或目录>...";

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::load().context("加载配置失败")?;

    // 初始化日志
    logging::init(config.verbose_logging);
    logging::log_startup(&config);

    let mut line_input = false;
    let mut paths = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--line-input" => line_input = true,
            "-h" | "--help" => {
                println!("{}", USAGE);
                return Ok(());
            }
            _ => paths.push(PathBuf::from(arg)),
        }
    }
    if paths.len() < 2 {
        bail!("{}", USAGE);
    }
    if config.llm_api_key.is_empty() {
        bail!("未设置 LLM_API_KEY（或 OPENAI_API_KEY），无法调用比对服务");
    }

    let input = DocumentRef::from_path(&paths[0])
        .await
        .with_context(|| format!("无法读取输入文件: {}", paths[0].display()))?;
    let mut frameworks = Vec::new();
    for path in &paths[1..] {
        frameworks.extend(load_framework_documents(path).await?);
    }
    info!("✓ 输入: {}，框架: {} 个", input.name, frameworks.len());

    // 组装能力
    let llm = Arc::new(LlmService::new(&config));
    let extractor: Arc<dyn DocumentExtractor> = if line_input {
        Arc::new(LineStatementExtractor::default())
    } else {
        llm.clone()
    };
    let capabilities = Capabilities {
        extractor,
        parser: Arc::new(TomlFrameworkParser::new()),
        oracle: llm.clone(),
        summarizer: llm,
    };

    let app = App::new(config, capabilities)?;
    let mut metadata = BTreeMap::new();
    metadata.insert("input_path".to_string(), paths[0].display().to_string());

    let job_id = app.submit_job(input, frameworks, metadata)?;
    let view = app
        .wait_for_terminal(&job_id, Duration::from_millis(500))
        .await?;

    match view.status {
        JobStatus::Complete => {
            let report = app.get_job_result(&job_id)?;
            println!("{}", serde_json::to_string_pretty(report.as_ref())?);
            app.shutdown().await;
            Ok(())
        }
        status => {
            let summary = view.error_summary.unwrap_or_default();
            app.shutdown().await;
            bail!("任务结束状态 {}: {}", status, summary)
        }
    }
}

/// 加载框架文档：文件直接读取，目录则读取其中所有 `.toml` 文件
async fn load_framework_documents(path: &Path) -> Result<Vec<DocumentRef>> {
    if !path.is_dir() {
        let doc = DocumentRef::from_path(path)
            .await
            .with_context(|| format!("无法读取框架文件: {}", path.display()))?;
        return Ok(vec![doc]);
    }

    let mut files = Vec::new();
    let mut entries = fs::read_dir(path)
        .await
        .with_context(|| format!("无法读取文件夹: {}", path.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let file = entry.path();
        if file.extension().and_then(|s| s.to_str()) == Some("toml") {
            files.push(file);
        }
    }
    files.sort();

    if files.is_empty() {
        warn!("⚠️ 在文件夹 {} 中没有找到 TOML 框架文件", path.display());
    }

    let mut docs = Vec::with_capacity(files.len());
    for file in files {
        info!(
            "正在加载框架: {}",
            file.file_name().unwrap_or_default().to_string_lossy()
        );
        docs.push(
            DocumentRef::from_path(&file)
                .await
                .with_context(|| format!("无法读取框架文件: {}", file.display()))?,
        );
    }
    Ok(docs)
}
