//! 任务模型
//!
//! 任务生命周期：`Pending → Running → {Complete | Failed | Cancelled}`，终态不可再变。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::JobError;
use crate::models::input::DocumentRef;
use crate::models::report::FinalReport;

/// 任务 ID（不透明）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// 日志里使用的短 ID
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// 状态机允许的迁移
    ///
    /// `Running → Running` 只用于记录阶段完成，由 JobStore 额外校验补丁内容。
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Running, Running)
                | (Running, Complete)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Pending => "Pending",
            JobStatus::Running => "Running",
            JobStatus::Complete => "Complete",
            JobStatus::Failed => "Failed",
            JobStatus::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// 流水线阶段（严格按顺序执行）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Stage {
    Extract,
    LoadFrameworks,
    Compare,
    Aggregate,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Extract,
        Stage::LoadFrameworks,
        Stage::Compare,
        Stage::Aggregate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Extract => "Extract",
            Stage::LoadFrameworks => "LoadFrameworks",
            Stage::Compare => "Compare",
            Stage::Aggregate => "Aggregate",
        }
    }

    /// 该阶段完成后的进度百分比（按阶段粒度）
    pub fn progress_after(self) -> u8 {
        let done = Stage::ALL.iter().position(|s| *s == self).unwrap_or(0) + 1;
        (done * 100 / Stage::ALL.len()) as u8
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 任务提交内容
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// 待审查的输入文档
    pub input: DocumentRef,
    /// 一个或多个监管框架文档
    pub frameworks: Vec<DocumentRef>,
    /// 调用方附带的元数据（原样保存）
    pub metadata: BTreeMap<String, String>,
}

/// 任务记录
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// 已完成的阶段（按完成顺序）
    pub completed_stages: Vec<Stage>,
    /// 进度 0-100，单调递增
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<JobError>,
    pub result: Option<Arc<FinalReport>>,
    pub metadata: BTreeMap<String, String>,
}

impl Job {
    pub fn new(metadata: BTreeMap<String, String>) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            completed_stages: Vec::new(),
            progress: 0,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            result: None,
            metadata,
        }
    }

    /// 生命周期不变量：result ⇔ Complete，error ⇔ Failed
    pub fn lifecycle_consistent(&self) -> bool {
        let result_ok = self.result.is_some() == (self.status == JobStatus::Complete);
        let error_ok = self.error.is_some() == (self.status == JobStatus::Failed);
        let completed_ok = self.completed_at.is_some() == self.status.is_terminal();
        result_ok && error_ok && completed_ok
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id,
            status: self.status,
            progress: self.progress,
            completed_stages: self.completed_stages.clone(),
            error_summary: self.error.as_ref().map(JobError::summary),
        }
    }
}

/// 对外暴露的任务状态
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub completed_stages: Vec<Stage>,
    pub error_summary: Option<String>,
}
