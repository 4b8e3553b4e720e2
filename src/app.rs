//! 应用入口 - 对外暴露的全部操作
//!
//! `App` 持有 JobStore、FrameworkCache 和调度器，全部以显式对象的形式传递，
//! 没有任何进程级的全局状态。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::{ExtractStore, FrameworkCache, InMemoryExtractStore};
use crate::config::Config;
use crate::error::{AppResult, PipelineError};
use crate::models::input::DocumentRef;
use crate::models::job::{JobId, JobSpec, JobStatus, JobStatusView};
use crate::models::report::FinalReport;
use crate::orchestrator::job_runner::Orchestrator;
use crate::orchestrator::scheduler::{QueuedJob, Scheduler};
use crate::stages::Capabilities;
use crate::store::{InMemoryJobBackend, JobBackend, JobStore};

/// 应用主结构
pub struct App {
    store: Arc<JobStore>,
    cache: Arc<FrameworkCache>,
    scheduler: Scheduler,
}

impl App {
    /// 使用进程内存储初始化（必须在 tokio 运行时内调用）
    pub fn new(config: Config, capabilities: Capabilities) -> AppResult<Self> {
        Self::with_backends(
            config,
            capabilities,
            Arc::new(InMemoryJobBackend::new()),
            Arc::new(InMemoryExtractStore::new()),
        )
    }

    /// 使用自定义存储后端初始化
    pub fn with_backends(
        config: Config,
        capabilities: Capabilities,
        job_backend: Arc<dyn JobBackend>,
        extract_store: Arc<dyn ExtractStore>,
    ) -> AppResult<Self> {
        config.validate()?;

        let store = Arc::new(JobStore::new(job_backend));
        let cache = Arc::new(FrameworkCache::new(extract_store));
        let orchestrator = Arc::new(Orchestrator::new(
            &config,
            store.clone(),
            cache.clone(),
            capabilities,
        ));
        let scheduler = Scheduler::start(orchestrator, config.max_workers, config.queue_capacity);

        Ok(Self {
            store,
            cache,
            scheduler,
        })
    }

    /// 提交任务
    ///
    /// 立即返回任务 ID（状态 Pending），不在调用方执行任何流水线工作。
    /// 提交内容不合法时返回 `Validation`，队列已满时返回 `Saturated`，两种情况都不会创建任务。
    pub fn submit_job(
        &self,
        input: DocumentRef,
        frameworks: Vec<DocumentRef>,
        metadata: BTreeMap<String, String>,
    ) -> AppResult<JobId> {
        validate_submission(&input, &frameworks)?;

        let slot = self.scheduler.try_reserve()?;
        let id = self.store.create(metadata.clone());
        slot.send(QueuedJob {
            id,
            spec: JobSpec {
                input,
                frameworks,
                metadata,
            },
        });

        info!(
            "[任务 {}] 📥 已提交 (队列 {}/{})",
            id.short(),
            self.scheduler.queue_depth(),
            self.scheduler.capacity()
        );
        Ok(id)
    }

    /// 任务状态（快照读取，不会等待正在运行的阶段）
    pub fn get_job_status(&self, id: &JobId) -> AppResult<JobStatusView> {
        Ok(self.store.read(id)?.status_view())
    }

    /// 任务结果；任务未完成（包括失败和取消）时返回 `NotReady`
    pub fn get_job_result(&self, id: &JobId) -> AppResult<Arc<FinalReport>> {
        let job = self.store.read(id)?;
        match (&job.status, &job.result) {
            (JobStatus::Complete, Some(report)) => Ok(report.clone()),
            _ => Err(PipelineError::NotReady {
                job_id: id.to_string(),
                status: job.status.to_string(),
            }),
        }
    }

    /// 取消任务，返回处理后的状态
    pub fn cancel_job(&self, id: &JobId) -> AppResult<JobStatus> {
        let status = self.store.request_cancel(id)?;
        info!("[任务 {}] 🛑 取消请求，当前状态 {}", id.short(), status);
        Ok(status)
    }

    /// 所有任务的状态，按创建时间排序
    pub fn list_jobs(&self) -> Vec<JobStatusView> {
        self.store.list().iter().map(|j| j.status_view()).collect()
    }

    /// 轮询直到任务进入终态
    pub async fn wait_for_terminal(&self, id: &JobId, poll: Duration) -> AppResult<JobStatusView> {
        let mut last_progress = None;
        loop {
            let view = self.get_job_status(id)?;
            if last_progress != Some(view.progress) {
                debug!("[任务 {}] 进度 {}%", id.short(), view.progress);
                last_progress = Some(view.progress);
            }
            if view.status.is_terminal() {
                return Ok(view);
            }
            tokio::time::sleep(poll).await;
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn framework_cache(&self) -> &Arc<FrameworkCache> {
        &self.cache
    }

    /// 停止接收新任务，等待已排队任务执行完毕
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;
    }
}

/// 提交校验：输入和每个框架都不能为空，至少一个框架
fn validate_submission(input: &DocumentRef, frameworks: &[DocumentRef]) -> AppResult<()> {
    if input.is_empty() {
        return Err(PipelineError::Validation(format!(
            "输入文档 {} 为空",
            input.name
        )));
    }
    if frameworks.is_empty() {
        return Err(PipelineError::Validation("至少需要一个监管框架".into()));
    }
    if let Some(empty) = frameworks.iter().find(|f| f.is_empty()) {
        return Err(PipelineError::Validation(format!(
            "框架文档 {} 为空",
            empty.name
        )));
    }
    Ok(())
}
