//! 流水线阶段
//!
//! 四个阶段按顺序执行：`Extract → LoadFrameworks → Compare → Aggregate`。
//! 每个阶段只依赖下面的能力接口，不关心调度，也不关心具体实现是 LLM 还是本地解析器。

pub mod aggregator;
pub mod comparator;
pub mod extract;
pub mod framework_loader;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::AppResult;
use crate::models::framework::{FrameworkExtract, FrameworkIdentity};
use crate::models::input::{DocumentRef, ParsedInput};
use crate::models::report::{ComplianceItem, FrameworkScore};

pub use aggregator::{aggregate, compute_scores, fallback_summary, ScoreSheet};
pub use comparator::{compare_all, CompareOutcome, ComparatorSettings, FrameworkTerms};
pub use extract::extract_input;
pub use framework_loader::load_frameworks;

/// 文档转文本能力
///
/// 可能失败：`UnsupportedFormat`（不重试）、`ExtractionTimeout`（重试）。
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, content: &[u8], mime_type: &str) -> AppResult<ParsedInput>;
}

/// 框架文档解析能力
#[async_trait]
pub trait FrameworkParser: Send + Sync {
    /// 返回的 `FrameworkExtract.identity` 必须等于传入的 `identity`
    async fn parse(
        &self,
        document: &DocumentRef,
        identity: &FrameworkIdentity,
    ) -> AppResult<FrameworkExtract>;
}

/// 语义比对 oracle：判断一条陈述对一条条款的满足程度
#[async_trait]
pub trait ComplianceOracle: Send + Sync {
    /// 返回 [0, 1] 之间的分数；瞬时失败返回 `OracleUnavailable`
    async fn compare(&self, statement: &str, clause: &str) -> AppResult<f64>;
}

/// 执行摘要的上下文
#[derive(Debug, Clone, Copy)]
pub struct SummaryContext<'a> {
    pub framework_scores: &'a [FrameworkScore],
    pub items: &'a [ComplianceItem],
    pub overall_score: f64,
    pub total_exposure: f64,
}

/// 文本生成能力（执行摘要）
#[async_trait]
pub trait ReportSummarizer: Send + Sync {
    async fn summarize<'a>(&self, context: &SummaryContext<'a>) -> AppResult<String>;
}

/// 编排器依赖的全部外部能力
#[derive(Clone)]
pub struct Capabilities {
    pub extractor: Arc<dyn DocumentExtractor>,
    pub parser: Arc<dyn FrameworkParser>,
    pub oracle: Arc<dyn ComplianceOracle>,
    pub summarizer: Arc<dyn ReportSummarizer>,
}
