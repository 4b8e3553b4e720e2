//! 输入抽取阶段

use tracing::{debug, info};

use crate::error::{AppResult, PipelineError};
use crate::models::input::{DocumentRef, ParsedInput};
use crate::orchestrator::retry::RetryPolicy;
use crate::stages::DocumentExtractor;

/// 把输入文档交给抽取能力，超时按 `ExtractionTimeout` 重试
///
/// 抽取服务本身不可用（例如 LLM 端点连不上）时同样按瞬时错误重试，
/// 重试耗尽后归为 `ExtractionFailed`，错误始终落在抽取类别下。
pub async fn extract_input(
    extractor: &dyn DocumentExtractor,
    input: &DocumentRef,
    policy: &RetryPolicy,
    label: &str,
) -> AppResult<ParsedInput> {
    debug!("{} 抽取输入文档 {} ({})", label, input.name, input.mime_type);

    let mut parsed = policy
        .run(
            &format!("{} Extract", label),
            |elapsed| PipelineError::ExtractionTimeout {
                timeout_secs: elapsed.as_secs(),
            },
            || extractor.extract(&input.content, &input.mime_type),
        )
        .await
        .map_err(|e| match e {
            PipelineError::OracleUnavailable(message) => {
                PipelineError::ExtractionFailed(format!("抽取服务不可用，重试已耗尽: {}", message))
            }
            other => other,
        })?;

    if parsed.source.is_empty() {
        parsed.source = input.name.clone();
    }
    info!(
        "{} 📄 抽取完成: {} 条陈述",
        label,
        parsed.statements.len()
    );
    Ok(parsed)
}
