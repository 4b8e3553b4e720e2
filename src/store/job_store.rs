//! 任务存储 - 唯一的可变共享状态
//!
//! ## 并发模型
//!
//! - **写**：每个任务一把迁移锁，同一任务的所有补丁串行执行
//! - **读**：只读取后端里的 `Arc<Job>` 快照，不碰迁移锁；
//!   读者看到的要么是迁移前的快照，要么是迁移后的快照，不会看到写了一半的记录
//! - **存储**：通过 [`JobBackend`] 注入，默认是进程内的 [`InMemoryJobBackend`]

use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error};

use crate::error::{AppResult, JobError, PipelineError};
use crate::models::job::{Job, JobId, JobStatus, Stage};
use crate::models::report::FinalReport;

/// 任务记录的存储后端
pub trait JobBackend: Send + Sync {
    fn load(&self, id: &JobId) -> Option<Arc<Job>>;
    fn save(&self, job: Arc<Job>);
    fn list(&self) -> Vec<Arc<Job>>;
}

/// 进程内存储后端
#[derive(Default)]
pub struct InMemoryJobBackend {
    jobs: RwLock<HashMap<JobId, Arc<Job>>>,
}

impl InMemoryJobBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobBackend for InMemoryJobBackend {
    fn load(&self, id: &JobId) -> Option<Arc<Job>> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.get(id).cloned()
    }

    fn save(&self, job: Arc<Job>) {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        jobs.insert(job.id, job);
    }

    fn list(&self) -> Vec<Arc<Job>> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.values().cloned().collect()
    }
}

/// 状态迁移补丁
#[derive(Debug, Default, Clone)]
pub struct JobPatch {
    /// 刚完成的阶段（必须是下一个应完成的阶段）
    pub completed_stage: Option<Stage>,
    pub progress: Option<u8>,
    pub error: Option<JobError>,
    pub result: Option<Arc<FinalReport>>,
}

impl JobPatch {
    pub fn stage_completed(stage: Stage) -> Self {
        Self {
            completed_stage: Some(stage),
            progress: Some(stage.progress_after()),
            ..Default::default()
        }
    }

    pub fn failed(error: JobError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn completed(report: Arc<FinalReport>) -> Self {
        Self {
            completed_stage: Some(Stage::Aggregate),
            progress: Some(100),
            result: Some(report),
            ..Default::default()
        }
    }
}

/// 任务存储
pub struct JobStore {
    backend: Arc<dyn JobBackend>,
    transition_locks: Mutex<HashMap<JobId, Arc<Mutex<()>>>>,
    cancel_requests: Mutex<HashSet<JobId>>,
}

impl JobStore {
    pub fn new(backend: Arc<dyn JobBackend>) -> Self {
        Self {
            backend,
            transition_locks: Mutex::new(HashMap::new()),
            cancel_requests: Mutex::new(HashSet::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryJobBackend::new()))
    }

    /// 创建新任务（Pending，进度 0）
    pub fn create(&self, metadata: BTreeMap<String, String>) -> JobId {
        let job = Job::new(metadata);
        let id = job.id;
        self.backend.save(Arc::new(job));
        debug!("[任务 {}] 已创建", id.short());
        id
    }

    /// 读取最新提交的快照，从不等待迁移锁
    pub fn read(&self, id: &JobId) -> AppResult<Arc<Job>> {
        self.backend
            .load(id)
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))
    }

    /// 所有任务，按创建时间排序
    pub fn list(&self) -> Vec<Arc<Job>> {
        let mut jobs = self.backend.list();
        jobs.sort_by_key(|j| (j.created_at, j.id));
        jobs
    }

    /// 原子地推进任务状态
    ///
    /// 以下情况返回 `InvalidTransition`：
    /// - 从终态迁出，或向后迁移
    /// - `Running → Running` 却没有记录阶段完成（重复认领）
    /// - 阶段乱序、进度回退
    /// - 迁移后违反生命周期不变量（如 Complete 却没有结果）
    pub fn transition(&self, id: &JobId, next: JobStatus, patch: JobPatch) -> AppResult<Arc<Job>> {
        self.with_transition_lock(id, || {
            let current = self.read(id)?;
            let updated = Arc::new(apply_patch(&current, next, patch)?);
            self.backend.save(updated.clone());
            Ok(updated)
        })
    }

    /// 工作者认领任务：`Pending → Running`
    ///
    /// 排队期间已被取消的任务返回 `Ok(None)`，不视为非法迁移。
    pub fn claim(&self, id: &JobId) -> AppResult<Option<Arc<Job>>> {
        self.with_transition_lock(id, || {
            let current = self.read(id)?;
            if current.status == JobStatus::Cancelled {
                debug!("[任务 {}] 排队期间已取消，跳过", id.short());
                return Ok(None);
            }
            let updated = Arc::new(apply_patch(&current, JobStatus::Running, JobPatch::default())?);
            self.backend.save(updated.clone());
            Ok(Some(updated))
        })
    }

    /// 请求取消任务
    ///
    /// - Pending：立即进入 Cancelled
    /// - Running：登记取消请求，由编排器在下一个阶段边界处理
    /// - 终态：不做任何事
    ///
    /// 返回处理后的状态。
    pub fn request_cancel(&self, id: &JobId) -> AppResult<JobStatus> {
        self.with_transition_lock(id, || {
            let current = self.read(id)?;
            match current.status {
                JobStatus::Pending => {
                    let updated = apply_patch(&current, JobStatus::Cancelled, JobPatch::default())?;
                    self.backend.save(Arc::new(updated));
                    Ok(JobStatus::Cancelled)
                }
                JobStatus::Running => {
                    self.cancel_requests
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(*id);
                    Ok(JobStatus::Running)
                }
                terminal => Ok(terminal),
            }
        })
    }

    pub fn is_cancel_requested(&self, id: &JobId) -> bool {
        self.cancel_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id)
    }

    /// 持有该任务的迁移锁执行 `f`
    ///
    /// 结束时任务已是终态或根本不存在，就清掉它的锁和取消登记，
    /// 对终态任务的重复调用不会留下表项。
    fn with_transition_lock<T>(&self, id: &JobId, f: impl FnOnce() -> AppResult<T>) -> AppResult<T> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let result = f();
        let settled = self
            .backend
            .load(id)
            .map_or(true, |job| job.status.is_terminal());
        if settled {
            self.forget(id);
        }
        result
    }

    fn lock_for(&self, id: &JobId) -> Arc<Mutex<()>> {
        let mut locks = self
            .transition_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        locks.entry(*id).or_default().clone()
    }

    fn forget(&self, id: &JobId) {
        self.transition_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        self.cancel_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }
}

fn apply_patch(current: &Job, next: JobStatus, patch: JobPatch) -> AppResult<Job> {
    let invalid = |reason: &str| {
        error!(
            alert = true,
            "[任务 {}] ❌ 非法状态迁移 {} -> {}: {}",
            current.id.short(),
            current.status,
            next,
            reason
        );
        PipelineError::InvalidTransition {
            job_id: current.id.to_string(),
            from: current.status.to_string(),
            to: next.to_string(),
        }
    };

    if !current.status.can_transition_to(next) {
        return Err(invalid("状态机不允许"));
    }
    if current.status == JobStatus::Running
        && next == JobStatus::Running
        && patch.completed_stage.is_none()
    {
        return Err(invalid("任务已在运行"));
    }

    let mut job = current.clone();
    job.status = next;

    if let Some(stage) = patch.completed_stage {
        let expected = Stage::ALL.get(job.completed_stages.len()).copied();
        if expected != Some(stage) {
            return Err(invalid("阶段乱序"));
        }
        job.completed_stages.push(stage);
    }
    if let Some(progress) = patch.progress {
        if progress < job.progress || progress > 100 {
            return Err(invalid("进度回退或越界"));
        }
        job.progress = progress;
    }
    if patch.error.is_some() {
        job.error = patch.error;
    }
    if patch.result.is_some() {
        job.result = patch.result;
    }
    if next.is_terminal() {
        job.completed_at = Some(Utc::now());
    }

    if !job.lifecycle_consistent() {
        return Err(invalid("违反生命周期不变量"));
    }
    Ok(job)
}
