//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `scheduler` - 调度器
//! - 有界提交队列，满了直接返回 `Saturated`
//! - 固定数量的工作者，每个工作者一次执行一个任务
//!
//! ### `job_runner` - 单个任务执行器
//! - 认领任务、按顺序执行四个阶段、记录进度
//! - 阶段边界处理取消请求
//! - 按错误种类决定任务结局
//!
//! ### `retry` - 重试策略
//! - 所有外部能力调用共用的重试 / 退避 / 超时策略
//!
//! ## 层次关系
//!
//! ```text
//! scheduler (处理任务队列)
//!     ↓
//! job_runner (处理单个任务的四个阶段)
//!     ↓
//! stages (extract / framework_loader / comparator / aggregator)
//!     ↓
//! services (能力实现：LLM / TOML 解析 / 行抽取)
//! ```

pub mod job_runner;
pub mod retry;
pub mod scheduler;

pub use job_runner::Orchestrator;
pub use retry::RetryPolicy;
pub use scheduler::{QueuedJob, Scheduler, SubmitSlot};
