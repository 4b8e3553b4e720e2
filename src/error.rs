//! 错误类型
//!
//! 所有流水线错误统一归类为 [`ErrorKind`]，由种类决定重试、失败和告警策略：
//!
//! - **瞬时**（transient）：在阶段内部按重试策略重试，重试耗尽后才向外暴露
//! - **非瞬时**：直接让任务失败，错误原样写入 `error_summary`
//! - **致命**（fatal）：说明是程序缺陷而非输入问题，除了让任务失败之外还会触发告警日志

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// 提交格式错误，任务创建前即被拒绝
    Validation,
    /// 文档格式不受支持
    UnsupportedFormat,
    /// 文本抽取超时
    ExtractionTimeout,
    /// 文本抽取失败
    ExtractionFailed,
    /// 框架加载失败
    FrameworkLoadFailed,
    /// 语义比对能力不可用（瞬时）
    OracleUnavailable,
    /// 调度队列已满
    Saturated,
    /// 非法的状态迁移（程序缺陷）
    InvalidTransition,
    /// 聚合不变量被破坏（程序缺陷）
    AggregationInvariantViolation,
    /// 执行任务的工作者异常退出（程序缺陷）
    WorkerPanicked,
    /// 结果尚未就绪
    NotReady,
    /// 任务不存在
    NotFound,
    /// 配置错误
    Config,
}

impl ErrorKind {
    /// 机器可读的错误代码
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            ErrorKind::ExtractionTimeout => "EXTRACTION_TIMEOUT",
            ErrorKind::ExtractionFailed => "EXTRACTION_FAILED",
            ErrorKind::FrameworkLoadFailed => "FRAMEWORK_LOAD_FAILED",
            ErrorKind::OracleUnavailable => "ORACLE_UNAVAILABLE",
            ErrorKind::Saturated => "SATURATED",
            ErrorKind::InvalidTransition => "INVALID_TRANSITION",
            ErrorKind::AggregationInvariantViolation => "AGGREGATION_INVARIANT_VIOLATION",
            ErrorKind::WorkerPanicked => "WORKER_PANICKED",
            ErrorKind::NotReady => "NOT_READY",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Config => "CONFIG_ERROR",
        }
    }

    /// 是否可以在阶段内部重试
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::ExtractionTimeout | ErrorKind::OracleUnavailable)
    }

    /// 是否属于程序缺陷（需要告警）
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidTransition
                | ErrorKind::AggregationInvariantViolation
                | ErrorKind::WorkerPanicked
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// 流水线错误
///
/// 只携带字符串上下文，可以 `Clone`，这样单飞加载的失败可以原样分发给所有等待者。
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("提交校验失败: {0}")]
    Validation(String),

    #[error("不支持的文档格式: {mime_type}")]
    UnsupportedFormat { mime_type: String },

    #[error("文本抽取超时 (已等待 {timeout_secs} 秒)")]
    ExtractionTimeout { timeout_secs: u64 },

    #[error("文本抽取失败: {0}")]
    ExtractionFailed(String),

    #[error("框架 {framework} 加载失败: {message}")]
    FrameworkLoadFailed { framework: String, message: String },

    #[error("语义比对服务不可用: {0}")]
    OracleUnavailable(String),

    #[error("调度队列已满 (容量 {capacity})，请稍后重试")]
    Saturated { capacity: usize },

    #[error("非法状态迁移: 任务 {job_id} 无法从 {from} 迁移到 {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },

    #[error("聚合不变量被破坏: {0}")]
    AggregationInvariantViolation(String),

    #[error("工作者异常退出: {0}")]
    WorkerPanicked(String),

    #[error("任务 {job_id} 的结果尚未就绪 (当前状态: {status})")]
    NotReady { job_id: String, status: String },

    #[error("任务不存在: {0}")]
    NotFound(String),

    #[error("配置错误: {0}")]
    Config(String),
}

impl PipelineError {
    /// 错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            PipelineError::ExtractionTimeout { .. } => ErrorKind::ExtractionTimeout,
            PipelineError::ExtractionFailed(_) => ErrorKind::ExtractionFailed,
            PipelineError::FrameworkLoadFailed { .. } => ErrorKind::FrameworkLoadFailed,
            PipelineError::OracleUnavailable(_) => ErrorKind::OracleUnavailable,
            PipelineError::Saturated { .. } => ErrorKind::Saturated,
            PipelineError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            PipelineError::AggregationInvariantViolation(_) => {
                ErrorKind::AggregationInvariantViolation
            }
            PipelineError::WorkerPanicked(_) => ErrorKind::WorkerPanicked,
            PipelineError::NotReady { .. } => ErrorKind::NotReady,
            PipelineError::NotFound(_) => ErrorKind::NotFound,
            PipelineError::Config(_) => ErrorKind::Config,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }

    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }

    /// 创建框架加载错误
    pub fn framework_load_failed(
        framework: impl Into<String>,
        message: impl fmt::Display,
    ) -> Self {
        PipelineError::FrameworkLoadFailed {
            framework: framework.into(),
            message: message.to_string(),
        }
    }

    /// 创建聚合不变量错误
    pub fn invariant(message: impl Into<String>) -> Self {
        PipelineError::AggregationInvariantViolation(message.into())
    }
}

// ========== 从常见错误类型转换 ==========

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::ExtractionFailed(format!("JSON解析失败: {}", err))
    }
}

impl From<toml::de::Error> for PipelineError {
    fn from(err: toml::de::Error) -> Self {
        PipelineError::Config(format!("TOML解析失败: {}", err))
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Validation(format!("读取文件失败: {}", err))
    }
}

impl From<async_openai::error::OpenAIError> for PipelineError {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        // 远端 LLM 的失败一律视为瞬时不可用，由重试策略兜底
        PipelineError::OracleUnavailable(format!("LLM API 调用失败: {}", err))
    }
}

/// 结构化的任务错误，写入 Job 记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobError {
    /// 错误分类
    pub kind: ErrorKind,
    /// 失败所在阶段（提交阶段失败时为空）
    pub stage: Option<String>,
    /// 人类可读的描述
    pub message: String,
}

impl JobError {
    pub fn from_pipeline(err: &PipelineError, stage: Option<&str>) -> Self {
        Self {
            kind: err.kind(),
            stage: stage.map(str::to_string),
            message: err.to_string(),
        }
    }

    /// 面向调用方的一行摘要，例如 `[ORACLE_UNAVAILABLE @ Compare] ...`
    pub fn summary(&self) -> String {
        match &self.stage {
            Some(stage) => format!("[{} @ {}] {}", self.kind.code(), stage, self.message),
            None => format!("[{}] {}", self.kind.code(), self.message),
        }
    }
}

// ========== Result 类型别名 ==========

/// 流水线结果类型
pub type AppResult<T> = Result<T, PipelineError>;
