pub mod framework;
pub mod input;
pub mod job;
pub mod report;

pub use framework::{Clause, FrameworkExtract, FrameworkIdentity, PenaltyMeta};
pub use input::{mime_from_path, DocumentRef, ParsedInput, Statement};
pub use job::{Job, JobId, JobSpec, JobStatus, JobStatusView, Stage};
pub use report::{
    format_usd, ComplianceItem, FindingsSummary, FinalReport, FrameworkScore, Priority,
    StatementRef,
};
