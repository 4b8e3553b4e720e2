//! 单个任务的执行器 - 编排层
//!
//! ## 职责
//!
//! 驱动一个任务依次经过 `Extract → LoadFrameworks → Compare → Aggregate`：
//!
//! 1. 认领任务（`Pending → Running`），同一任务只会被认领一次
//! 2. 每个阶段完成后先写入 JobStore，再开始下一个阶段
//! 3. 在阶段边界检查取消请求
//! 4. 按错误种类决定任务结局，致命错误额外打告警日志
//!
//! 不做任何具体的评分或解析，只调度阶段并记录进度。

use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::cache::FrameworkCache;
use crate::config::Config;
use crate::error::{AppResult, JobError, PipelineError};
use crate::models::job::{JobId, JobSpec, JobStatus, Stage};
use crate::models::report::FinalReport;
use crate::orchestrator::retry::RetryPolicy;
use crate::stages::{
    aggregate, compare_all, extract_input, load_frameworks, Capabilities, ComparatorSettings,
};
use crate::store::{JobPatch, JobStore};
use crate::utils::logging;

/// 阶段失败：记录失败发生在哪个阶段
struct StageFailure {
    stage: Stage,
    error: PipelineError,
}

fn at(stage: Stage) -> impl FnOnce(PipelineError) -> StageFailure {
    move |error| StageFailure { stage, error }
}

/// 阶段流的结局
enum Flow {
    Completed(Arc<FinalReport>),
    Cancelled(Stage),
}

/// 编排器
///
/// 持有执行任务所需的一切：存储、框架缓存、外部能力、重试策略。
pub struct Orchestrator {
    store: Arc<JobStore>,
    cache: Arc<FrameworkCache>,
    capabilities: Capabilities,
    policy: RetryPolicy,
    settings: ComparatorSettings,
    degradation_ceiling: f64,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        store: Arc<JobStore>,
        cache: Arc<FrameworkCache>,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            store,
            cache,
            capabilities,
            policy: RetryPolicy::from_config(config),
            settings: ComparatorSettings::from_config(config),
            degradation_ceiling: config.degradation_ceiling,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// 执行一个任务，返回任务的最终状态
    pub async fn run(&self, job_id: JobId, spec: JobSpec) -> AppResult<JobStatus> {
        let label = format!("[任务 {}]", job_id.short());

        match self.store.claim(&job_id) {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!("{} 🛑 已在排队期间取消", label);
                return Ok(JobStatus::Cancelled);
            }
            Err(e) => {
                error!(alert = e.is_fatal(), "{} ❌ 认领任务失败: {}", label, e);
                return Err(e);
            }
        }

        info!(
            "{} 🚀 开始处理: 输入 {}，{} 个框架",
            label,
            spec.input.name,
            spec.frameworks.len()
        );
        let started = Instant::now();

        let (status, patch) = match self.execute(&job_id, &spec, &label).await {
            Ok(Flow::Completed(report)) => {
                logging::log_job_finished(&label, &report, started.elapsed());
                (JobStatus::Complete, JobPatch::completed(report))
            }
            Ok(Flow::Cancelled(after)) => {
                info!("{} 🛑 已在 {} 阶段之后取消", label, after);
                (JobStatus::Cancelled, JobPatch::default())
            }
            Err(StageFailure { stage, error }) => {
                if error.is_fatal() {
                    error!(
                        alert = true,
                        "{} ❌ {} 阶段出现程序缺陷: {}", label, stage, error
                    );
                } else {
                    error!("{} ❌ {} 阶段失败: {}", label, stage, error);
                }
                let job_error = JobError::from_pipeline(&error, Some(stage.name()));
                (JobStatus::Failed, JobPatch::failed(job_error))
            }
        };

        self.store.transition(&job_id, status, patch)?;
        Ok(status)
    }

    async fn execute(
        &self,
        job_id: &JobId,
        spec: &JobSpec,
        label: &str,
    ) -> Result<Flow, StageFailure> {
        let caps = &self.capabilities;

        // ① 抽取输入
        let input = extract_input(caps.extractor.as_ref(), &spec.input, &self.policy, label)
            .await
            .map_err(at(Stage::Extract))?;
        if let Some(flow) = self.finish_stage(job_id, Stage::Extract)? {
            return Ok(flow);
        }

        // ② 加载框架（可能等待其他任务正在进行的同一框架加载）
        let frameworks = load_frameworks(
            &self.cache,
            caps.parser.clone(),
            &spec.frameworks,
            &self.policy,
            label,
        )
        .await
        .map_err(at(Stage::LoadFrameworks))?;
        if let Some(flow) = self.finish_stage(job_id, Stage::LoadFrameworks)? {
            return Ok(flow);
        }

        // ③ 比对
        let outcome = compare_all(
            caps.oracle.as_ref(),
            &input,
            &frameworks,
            &self.settings,
            &self.policy,
            label,
        )
        .await;
        let fraction = outcome.degraded_fraction();
        if fraction > self.degradation_ceiling {
            return Err(StageFailure {
                stage: Stage::Compare,
                error: PipelineError::OracleUnavailable(format!(
                    "{} / {} 条条款比对失败 ({:.0}%)，超过允许的 {:.0}%",
                    outcome.degraded_count(),
                    outcome.items.len(),
                    fraction * 100.0,
                    self.degradation_ceiling * 100.0
                )),
            });
        }
        if let Some(flow) = self.finish_stage(job_id, Stage::Compare)? {
            return Ok(flow);
        }

        // ④ 聚合（纯计算，不重试；摘要能力有自己的兜底）
        let report = aggregate(
            caps.summarizer.as_ref(),
            &outcome.terms,
            outcome.items,
            &self.policy,
            label,
        )
        .await
        .map_err(at(Stage::Aggregate))?;

        Ok(Flow::Completed(Arc::new(report)))
    }

    /// 记录阶段完成，并检查是否需要在此边界停下
    fn finish_stage(&self, job_id: &JobId, stage: Stage) -> Result<Option<Flow>, StageFailure> {
        self.store
            .transition(job_id, JobStatus::Running, JobPatch::stage_completed(stage))
            .map_err(at(stage))?;

        if self.store.is_cancel_requested(job_id) {
            return Ok(Some(Flow::Cancelled(stage)));
        }
        Ok(None)
    }

    /// 工作者异常退出时兜底：把仍在运行的任务标记为失败
    pub fn fail_abandoned(&self, job_id: &JobId, reason: &str) {
        let label = format!("[任务 {}]", job_id.short());
        let Ok(job) = self.store.read(job_id) else {
            return;
        };
        if job.status.is_terminal() {
            return;
        }
        error!(alert = true, "{} ❌ 工作者异常退出: {}", label, reason);

        let err = PipelineError::WorkerPanicked(reason.to_string());
        let stage = Stage::ALL.get(job.completed_stages.len()).map(|s| s.name());
        let patch = JobPatch::failed(JobError::from_pipeline(&err, stage));
        if let Err(e) = self.store.transition(job_id, JobStatus::Failed, patch) {
            warn!("{} 无法标记为失败: {}", label, e);
        }
    }
}
