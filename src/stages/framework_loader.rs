//! 框架加载阶段
//!
//! 按内容指纹从 [`FrameworkCache`] 取框架，未命中时解析；解析过程包在重试策略里，
//! 所以等待单飞结果的其他任务同样受这套超时和重试约束。

use futures::future::try_join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::FrameworkCache;
use crate::error::{AppResult, PipelineError};
use crate::models::framework::{FrameworkExtract, FrameworkIdentity};
use crate::models::input::DocumentRef;
use crate::orchestrator::retry::RetryPolicy;
use crate::stages::FrameworkParser;

/// 加载本任务需要的全部框架
///
/// 内容相同的框架文档只保留第一次出现的那一份。
pub async fn load_frameworks(
    cache: &FrameworkCache,
    parser: Arc<dyn FrameworkParser>,
    documents: &[DocumentRef],
    policy: &RetryPolicy,
    label: &str,
) -> AppResult<Vec<Arc<FrameworkExtract>>> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for doc in documents {
        let identity = FrameworkIdentity::from_content(&doc.content);
        if seen.insert(identity.clone()) {
            unique.push((identity, doc.clone()));
        } else {
            warn!("{} 框架 {} 与之前的框架内容相同，已忽略", label, doc.name);
        }
    }

    let loads = unique.into_iter().map(|(identity, doc)| {
        let parser = parser.clone();
        let policy = policy.clone();
        let label = format!("{} LoadFrameworks({})", label, doc.name);
        async move {
            cache
                .get_or_load(&identity, {
                    let identity = identity.clone();
                    move || parse_with_policy(parser, doc, identity, policy, label)
                })
                .await
        }
    });
    let extracts = try_join_all(loads).await?;

    info!(
        "{} 📚 已加载 {} 个框架，共 {} 条条款",
        label,
        extracts.len(),
        extracts.iter().map(|f| f.clause_count()).sum::<usize>()
    );
    Ok(extracts)
}

/// 单个框架的加载：解析 + 重试 + 校验
///
/// 超时在重试阶段视为瞬时错误，重试耗尽后统一归为 `FrameworkLoadFailed`。
async fn parse_with_policy(
    parser: Arc<dyn FrameworkParser>,
    doc: DocumentRef,
    identity: FrameworkIdentity,
    policy: RetryPolicy,
    label: String,
) -> AppResult<FrameworkExtract> {
    let extract = policy
        .run(
            &label,
            |elapsed| PipelineError::ExtractionTimeout {
                timeout_secs: elapsed.as_secs(),
            },
            || parser.parse(&doc, &identity),
        )
        .await
        .map_err(|err| match err {
            PipelineError::FrameworkLoadFailed { .. } => err,
            other => PipelineError::framework_load_failed(doc.name.clone(), other),
        })?;

    validate_extract(&extract)?;
    Ok(extract)
}

/// 框架必须至少有一条条款，权重和阈值必须合法
fn validate_extract(extract: &FrameworkExtract) -> AppResult<()> {
    let fail = |msg: String| Err(PipelineError::framework_load_failed(extract.name.clone(), msg));

    if extract.clause_count() == 0 {
        return fail("框架中没有任何条款".to_string());
    }
    for clause in extract.clauses() {
        if !clause.severity_weight.is_finite() || clause.severity_weight < 0.0 {
            return fail(format!(
                "条款 {} 的权重非法: {}",
                clause.id, clause.severity_weight
            ));
        }
        if let Some(penalty) = &clause.penalty {
            if !penalty.max_penalty.is_finite() || penalty.max_penalty < 0.0 {
                return fail(format!(
                    "条款 {} 的罚款上限非法: {}",
                    clause.id, penalty.max_penalty
                ));
            }
        }
    }
    if let Some(threshold) = extract.gap_threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return fail(format!("缺口阈值必须在 [0, 1] 之间: {}", threshold));
        }
    }
    Ok(())
}
