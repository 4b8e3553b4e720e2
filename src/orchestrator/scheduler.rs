//! 调度器 - 有界工作者池 + 有界提交队列
//!
//! ## 模型
//!
//! - 提交方通过 [`Scheduler::try_reserve`] 先占一个队列位置，占不到立即返回 `Saturated`，
//!   永远不会阻塞调用方
//! - `max_workers` 个工作者共享同一个接收端，每个工作者一次只执行一个任务
//! - 每个任务在独立的 tokio 任务里执行，工作者能感知到执行过程中的 panic

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError, Permit};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{AppResult, PipelineError};
use crate::models::job::{JobId, JobSpec};
use crate::orchestrator::job_runner::Orchestrator;

/// 队列中的一个任务
pub struct QueuedJob {
    pub id: JobId,
    pub spec: JobSpec,
}

/// 已占到的队列位置
///
/// 丢弃而不调用 [`SubmitSlot::send`] 会归还位置。
pub struct SubmitSlot<'a> {
    permit: Permit<'a, QueuedJob>,
}

impl SubmitSlot<'_> {
    pub fn send(self, job: QueuedJob) {
        self.permit.send(job);
    }
}

/// 调度器
pub struct Scheduler {
    sender: mpsc::Sender<QueuedJob>,
    capacity: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// 启动工作者池（必须在 tokio 运行时内调用）
    pub fn start(orchestrator: Arc<Orchestrator>, max_workers: usize, queue_capacity: usize) -> Self {
        let capacity = queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (1..=max_workers.max(1))
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    receiver.clone(),
                    orchestrator.clone(),
                ))
            })
            .collect();

        info!(
            "📊 调度器已启动: {} 个工作者，队列容量 {}",
            max_workers.max(1),
            capacity
        );

        Self {
            sender,
            capacity,
            workers: Mutex::new(workers),
        }
    }

    /// 占一个队列位置；队列已满时返回 `Saturated`
    pub fn try_reserve(&self) -> AppResult<SubmitSlot<'_>> {
        match self.sender.try_reserve() {
            Ok(permit) => Ok(SubmitSlot { permit }),
            Err(TrySendError::Full(())) => Err(PipelineError::Saturated {
                capacity: self.capacity,
            }),
            Err(TrySendError::Closed(())) => Err(PipelineError::Saturated { capacity: 0 }),
        }
    }

    /// 当前排队（尚未被工作者取走）的任务数
    pub fn queue_depth(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 关闭队列并等待所有工作者退出（已排队的任务会被执行完）
    pub async fn shutdown(self) {
        let Scheduler {
            sender, workers, ..
        } = self;
        drop(sender);

        let handles = workers.into_inner().unwrap_or_else(|e| e.into_inner());
        for handle in handles {
            if let Err(e) = handle.await {
                error!("工作者退出异常: {}", e);
            }
        }
        info!("调度器已关闭");
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedJob>>>,
    orchestrator: Arc<Orchestrator>,
) {
    loop {
        // 只在取任务时持有接收端的锁
        let next = receiver.lock().await.recv().await;
        let Some(QueuedJob { id, spec }) = next else {
            debug!("工作者 {} 退出", worker_id);
            break;
        };

        debug!("工作者 {} 取到任务 {}", worker_id, id.short());
        let runner = orchestrator.clone();
        let handle = tokio::spawn(async move { runner.run(id, spec).await });
        match handle.await {
            Ok(Ok(status)) => debug!("工作者 {} 完成任务 {}: {}", worker_id, id.short(), status),
            Ok(Err(e)) => error!("[任务 {}] 无法记录最终状态: {}", id.short(), e),
            Err(e) => orchestrator.fail_abandoned(&id, &e.to_string()),
        }
    }
}
