//! # Compliance Orchestrator
//!
//! 把输入文档中抽取的陈述与一个或多个监管框架逐条比对，
//! 生成带缺口标记、评分和罚款敞口估算的合规报告。
//!
//! ## 架构设计
//!
//! ### ① 模型层（Models）
//! - `models/` - Job、FrameworkExtract、ParsedInput、FinalReport 等纯数据类型
//!
//! ### ② 状态层（Store / Cache）
//! - `store/` - `JobStore`，任务状态的唯一权威记录，按任务串行化写入，读取无锁快照
//! - `cache/` - `FrameworkCache`，按内容指纹缓存解析后的框架，同一框架同时只加载一次
//!
//! ### ③ 阶段层（Stages）
//! - `stages/` - 四个阶段及其依赖的能力接口
//! - `extract` → `framework_loader` → `comparator` → `aggregator`
//!
//! ### ④ 能力实现层（Services）
//! - `services/` - LLM（比对 / 摘要 / 抽取）、TOML 框架解析、按行抽取
//!
//! ### ⑤ 编排层（Orchestration）
//! - `orchestrator/scheduler` - 有界队列 + 工作者池
//! - `orchestrator/job_runner` - 单个任务的阶段调度、取消、失败策略
//! - `orchestrator/retry` - 统一的重试策略
//!
//! ### ⑥ 入口（App）
//! - `app` - `submit_job` / `get_job_status` / `get_job_result` / `cancel_job` / `list_jobs`
//!
//! ## 模块结构

pub mod app;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod stages;
pub mod store;
pub mod utils;

// 重新导出常用类型
pub use app::App;
pub use cache::{ExtractStore, FrameworkCache};
pub use config::Config;
pub use error::{AppResult, ErrorKind, JobError, PipelineError};
pub use models::{DocumentRef, FinalReport, JobId, JobStatus, JobStatusView};
pub use orchestrator::RetryPolicy;
pub use stages::{
    Capabilities, ComplianceOracle, DocumentExtractor, FrameworkParser, ReportSummarizer,
    SummaryContext,
};
pub use store::{JobBackend, JobStore};
