//! 集成测试共用的假能力实现
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use compliance_orchestrator::config::RetrySettings;
use compliance_orchestrator::models::framework::{FrameworkExtract, FrameworkIdentity};
use compliance_orchestrator::models::input::ParsedInput;
use compliance_orchestrator::services::{LineStatementExtractor, TomlFrameworkParser};
use compliance_orchestrator::{
    App, AppResult, Capabilities, ComplianceOracle, Config, DocumentExtractor, DocumentRef,
    FrameworkParser, JobId, JobStatusView, PipelineError, ReportSummarizer, SummaryContext,
};

/// 测试配置：重试很快，超时足够长
pub fn test_config(max_workers: usize, queue_capacity: usize) -> Config {
    Config {
        max_workers,
        queue_capacity,
        retry: RetrySettings {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 2.0,
        },
        capability_timeout_secs: 30,
        ..Config::default()
    }
}

/// 按行抽取，可选地在闸门打开前阻塞
pub struct GatedExtractor {
    inner: LineStatementExtractor,
    gate: watch::Receiver<bool>,
    pub calls: AtomicUsize,
}

impl GatedExtractor {
    /// 返回抽取器和闸门开关（`true` 为打开）
    pub fn new(open: bool) -> (Arc<Self>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(open);
        let extractor = Arc::new(Self {
            inner: LineStatementExtractor::default(),
            gate: rx,
            calls: AtomicUsize::new(0),
        });
        (extractor, tx)
    }
}

#[async_trait]
impl DocumentExtractor for GatedExtractor {
    async fn extract(&self, content: &[u8], mime_type: &str) -> AppResult<ParsedInput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.clone();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| PipelineError::ExtractionFailed("gate dropped".into()))?;
        self.inner.extract(content, mime_type).await
    }
}

/// 统计解析次数的 TOML 解析器
pub struct CountingParser {
    inner: TomlFrameworkParser,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl CountingParser {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: TomlFrameworkParser::new(),
            delay,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl FrameworkParser for CountingParser {
    async fn parse(
        &self,
        document: &DocumentRef,
        identity: &FrameworkIdentity,
    ) -> AppResult<FrameworkExtract> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.parse(document, identity).await
    }
}

/// 按陈述文本返回预设分数；未登记的陈述永远返回 `OracleUnavailable`
#[derive(Default)]
pub struct ScriptedOracle {
    scores: HashMap<String, f64>,
    default_score: Option<f64>,
    pub calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new(scores: &[(&str, f64)]) -> Arc<Self> {
        Arc::new(Self {
            scores: scores.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            default_score: None,
            calls: AtomicUsize::new(0),
        })
    }

    /// 所有陈述都返回同一个分数
    pub fn constant(score: f64) -> Arc<Self> {
        Arc::new(Self {
            default_score: Some(score),
            ..Default::default()
        })
    }
}

#[async_trait]
impl ComplianceOracle for ScriptedOracle {
    async fn compare(&self, statement: &str, _clause: &str) -> AppResult<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.scores
            .get(statement)
            .copied()
            .or(self.default_score)
            .ok_or_else(|| PipelineError::OracleUnavailable(format!("no answer for '{}'", statement)))
    }
}

/// 固定文本的摘要；`fail = true` 时总是失败
pub struct StaticSummarizer {
    pub fail: bool,
}

#[async_trait]
impl ReportSummarizer for StaticSummarizer {
    async fn summarize<'a>(&self, context: &SummaryContext<'a>) -> AppResult<String> {
        if self.fail {
            return Err(PipelineError::OracleUnavailable("summary model offline".into()));
        }
        Ok(format!(
            "Reviewed {} requirements across {} frameworks.",
            context.items.len(),
            context.framework_scores.len()
        ))
    }
}

pub struct Harness {
    pub app: App,
    pub extractor: Arc<GatedExtractor>,
    pub gate: watch::Sender<bool>,
    pub parser: Arc<CountingParser>,
    pub oracle: Arc<ScriptedOracle>,
}

/// 组装一个使用假能力的 App
pub fn harness(config: Config, oracle: Arc<ScriptedOracle>, gate_open: bool) -> Harness {
    harness_with(config, oracle, gate_open, false)
}

pub fn harness_with(
    config: Config,
    oracle: Arc<ScriptedOracle>,
    gate_open: bool,
    summary_fails: bool,
) -> Harness {
    let (extractor, gate) = GatedExtractor::new(gate_open);
    let parser = CountingParser::new(Duration::from_millis(20));
    let capabilities = Capabilities {
        extractor: extractor.clone(),
        parser: parser.clone(),
        oracle: oracle.clone(),
        summarizer: Arc::new(StaticSummarizer {
            fail: summary_fails,
        }),
    };
    let app = App::new(config, capabilities).expect("valid config");
    Harness {
        app,
        extractor,
        gate,
        parser,
        oracle,
    }
}

pub fn input_doc(lines: &[&str]) -> DocumentRef {
    DocumentRef::new("field-report.txt", lines.join("\n").into_bytes(), "text/plain")
}

pub fn framework_doc(name: &str, content: &str) -> DocumentRef {
    DocumentRef::new(format!("{}.toml", name), content.as_bytes().to_vec(), "application/toml")
}

/// 单条款框架：权重 3，罚款上限 1000，阈值 0.6
pub const PERMIT_FRAMEWORK: &str = r#"
name = "DRC Mining Code"
gap_threshold = 0.6

[[clauses]]
id = "301"
category = "Permits"
text = "Mining permits must be valid and displayed on site"
weight = 3.0

[clauses.penalty]
max_penalty = 1000.0
currency = "USD"
articles = ["301"]
"#;

/// 十条款框架，类别 C0..C9，每条权重 1
pub fn ten_clause_framework() -> String {
    let mut content = String::from("name = \"Ten\"\n");
    for i in 0..10 {
        content.push_str(&format!(
            "\n[[clauses]]\nid = \"{i}\"\ncategory = \"C{i}\"\ntext = \"requirement {i}\"\nweight = 1.0\n"
        ));
    }
    content
}

pub fn no_metadata() -> BTreeMap<String, String> {
    BTreeMap::new()
}

/// 等待任务进入终态（带总超时，防止测试挂起）
pub async fn wait_terminal(app: &App, id: &JobId) -> JobStatusView {
    tokio::time::timeout(
        Duration::from_secs(10),
        app.wait_for_terminal(id, Duration::from_millis(5)),
    )
    .await
    .expect("job did not finish in time")
    .expect("job exists")
}

/// 等待任务进入 Running
pub async fn wait_running(app: &App, id: &JobId) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let view = app.get_job_status(id).expect("job exists");
            if view.status == compliance_orchestrator::JobStatus::Running {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("job never started running");
}
