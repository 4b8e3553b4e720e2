//! 聚合阶段
//!
//! 纯计算：框架得分 = Σ(score × weight) / Σ(weight)，总体得分按各框架的条款权重总和加权。
//! 这里的任何失败都意味着上游产出了违反不变量的数据，属于程序缺陷，不重试。

use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::error::{AppResult, PipelineError};
use crate::models::framework::FrameworkIdentity;
use crate::models::report::{
    format_usd, ComplianceItem, FinalReport, FindingsSummary, FrameworkScore, COMPLIANT_FROM,
    NON_COMPLIANT_BELOW,
};
use crate::orchestrator::retry::RetryPolicy;
use crate::stages::comparator::FrameworkTerms;
use crate::stages::{ReportSummarizer, SummaryContext};

/// 关键建议的最大条数
const MAX_CRITICAL_RECOMMENDATIONS: usize = 10;

/// 聚合出的全部数值结果（不含执行摘要）
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSheet {
    pub framework_scores: Vec<FrameworkScore>,
    pub overall_score: f64,
    pub total_exposure: f64,
    pub penalty_by_framework: BTreeMap<String, f64>,
    pub critical_recommendations: Vec<String>,
    pub findings: FindingsSummary,
}

/// 计算分数（纯函数，可重复执行）
///
/// `terms` 决定框架的输出顺序。框架按内容指纹区分，显示名称必须各不相同，
/// 每个 item 的 `framework_id` 必须出现在其中。
pub fn compute_scores(terms: &[FrameworkTerms], items: &[ComplianceItem]) -> AppResult<ScoreSheet> {
    let mut lookup: BTreeMap<&FrameworkIdentity, &FrameworkTerms> = BTreeMap::new();
    let mut names: BTreeMap<&str, &FrameworkIdentity> = BTreeMap::new();
    for term in terms {
        if lookup.insert(&term.identity, term).is_some() {
            return Err(PipelineError::invariant(format!("框架 {} 重复出现", term.identity.short())));
        }
        if names.insert(term.name.as_str(), &term.identity).is_some() {
            return Err(PipelineError::invariant(format!("框架名称 {} 不唯一", term.name)));
        }
    }

    for item in items {
        let term = lookup.get(&item.framework_id).ok_or_else(|| {
            PipelineError::invariant(format!(
                "条款 {} 属于未知框架 {} ({})",
                item.clause.id,
                item.framework,
                item.framework_id.short()
            ))
        })?;
        check_item(item, term)?;
    }

    let mut framework_scores = Vec::with_capacity(terms.len());
    let mut penalty_by_framework = BTreeMap::new();
    for term in terms {
        let mut weighted = 0.0;
        let mut weight_total = 0.0;
        let mut exposure = 0.0;
        let mut item_count = 0;
        let mut gap_count = 0;
        for item in items.iter().filter(|i| i.framework_id == term.identity) {
            weighted += item.score * item.clause.severity_weight;
            weight_total += item.clause.severity_weight;
            exposure += item.penalty;
            item_count += 1;
            if item.gap {
                gap_count += 1;
            }
        }
        // 权重全为 0 的框架得分记 0，也不参与总体加权
        let score = if weight_total > 0.0 {
            weighted / weight_total
        } else {
            0.0
        };
        penalty_by_framework.insert(term.name.clone(), exposure);
        framework_scores.push(FrameworkScore {
            framework: term.name.clone(),
            framework_id: term.identity.clone(),
            score,
            weight_total,
            item_count,
            gap_count,
            exposure,
        });
    }

    let total_weight: f64 = framework_scores.iter().map(|s| s.weight_total).sum();
    let overall_score = if total_weight > 0.0 {
        framework_scores
            .iter()
            .map(|s| s.score * s.weight_total)
            .sum::<f64>()
            / total_weight
    } else {
        0.0
    };
    let total_exposure = items.iter().map(|i| i.penalty).sum();

    for score in &framework_scores {
        ensure_unit(score.score, &format!("框架 {} 得分", score.framework))?;
    }
    ensure_unit(overall_score, "总体得分")?;

    Ok(ScoreSheet {
        framework_scores,
        overall_score,
        total_exposure,
        penalty_by_framework,
        critical_recommendations: critical_recommendations(items, &lookup),
        findings: findings(items),
    })
}

fn check_item(item: &ComplianceItem, term: &FrameworkTerms) -> AppResult<()> {
    let id = &item.clause.id;
    ensure_unit(item.score, &format!("条款 {} 得分", id))?;

    let weight = item.clause.severity_weight;
    if !weight.is_finite() || weight < 0.0 {
        return Err(PipelineError::invariant(format!("条款 {} 权重非法: {}", id, weight)));
    }
    if !item.penalty.is_finite() || item.penalty < 0.0 {
        return Err(PipelineError::invariant(format!(
            "条款 {} 罚款估算非法: {}",
            id, item.penalty
        )));
    }
    if item.gap != (item.score < term.gap_threshold) {
        return Err(PipelineError::invariant(format!(
            "条款 {} 缺口标记与得分不一致 (score {}, threshold {}, gap {})",
            id, item.score, term.gap_threshold, item.gap
        )));
    }
    if item.penalty > 0.0 && !item.gap {
        return Err(PipelineError::invariant(format!(
            "条款 {} 不是缺口却有罚款 {}",
            id, item.penalty
        )));
    }
    Ok(())
}

fn ensure_unit(value: f64, what: &str) -> AppResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(PipelineError::invariant(format!("{} 超出 [0, 1]: {}", what, value)))
    }
}

/// 严重缺口的建议：按罚款降序、权重降序，最多 10 条
fn critical_recommendations(
    items: &[ComplianceItem],
    lookup: &BTreeMap<&FrameworkIdentity, &FrameworkTerms>,
) -> Vec<String> {
    let mut critical: Vec<&ComplianceItem> = items
        .iter()
        .filter(|i| {
            i.gap
                && (i.score < NON_COMPLIANT_BELOW
                    || lookup
                        .get(&i.framework_id)
                        .is_some_and(|t| t.is_critical(&i.clause)))
        })
        .collect();
    critical.sort_by(|a, b| {
        b.penalty
            .total_cmp(&a.penalty)
            .then(b.clause.severity_weight.total_cmp(&a.clause.severity_weight))
    });
    critical
        .into_iter()
        .take(MAX_CRITICAL_RECOMMENDATIONS)
        .map(|i| format!("[{}] {}: {}", i.framework, i.clause.category, i.recommendation))
        .collect()
}

fn findings(items: &[ComplianceItem]) -> FindingsSummary {
    let mut summary = FindingsSummary::default();
    for item in items {
        if item.score >= COMPLIANT_FROM {
            summary.compliant += 1;
        } else if item.score >= NON_COMPLIANT_BELOW {
            summary.review_needed += 1;
        } else {
            summary.non_compliant += 1;
        }
        if item.degraded {
            summary.degraded += 1;
        }
    }
    summary
}

/// 模板兜底摘要（摘要能力失败时使用）
pub fn fallback_summary(sheet: &ScoreSheet, items: &[ComplianceItem]) -> String {
    let names: Vec<&str> = sheet
        .framework_scores
        .iter()
        .map(|s| s.framework.as_str())
        .collect();
    let gaps = items.iter().filter(|i| i.gap).count();
    format!(
        "本次评估覆盖 {} 个监管框架（{}），总体合规得分 {:.1}%。共发现 {} 项缺口，其中 {} 项需优先处理，预估罚款敞口 {}。",
        names.len(),
        names.join("、"),
        sheet.overall_score * 100.0,
        gaps,
        sheet.critical_recommendations.len(),
        format_usd(sheet.total_exposure)
    )
}

/// 聚合阶段：计算分数 + 调用摘要能力
///
/// 摘要失败或返回空文本时退回模板摘要，不影响任务结果。
pub async fn aggregate(
    summarizer: &dyn ReportSummarizer,
    terms: &[FrameworkTerms],
    items: Vec<ComplianceItem>,
    policy: &RetryPolicy,
    label: &str,
) -> AppResult<FinalReport> {
    let sheet = compute_scores(terms, &items)?;

    let context = SummaryContext {
        framework_scores: &sheet.framework_scores,
        items: &items,
        overall_score: sheet.overall_score,
        total_exposure: sheet.total_exposure,
    };
    let summary = policy
        .run(
            &format!("{} Summarize", label),
            |elapsed| {
                PipelineError::OracleUnavailable(format!("摘要生成超时 ({} 秒)", elapsed.as_secs()))
            },
            || summarizer.summarize(&context),
        )
        .await;

    let (executive_summary, summary_is_fallback) = match summary {
        Ok(text) if !text.trim().is_empty() => (text.trim().to_string(), false),
        Ok(_) => {
            warn!("{} 摘要为空，使用模板摘要", label);
            (fallback_summary(&sheet, &items), true)
        }
        Err(e) => {
            warn!("{} ⚠️ 摘要生成失败，使用模板摘要: {}", label, e);
            (fallback_summary(&sheet, &items), true)
        }
    };

    info!(
        "{} 📊 总体得分 {:.2}，罚款敞口 {}",
        label,
        sheet.overall_score,
        format_usd(sheet.total_exposure)
    );

    Ok(FinalReport {
        generated_at: Utc::now(),
        framework_scores: sheet.framework_scores,
        overall_score: sheet.overall_score,
        total_exposure: sheet.total_exposure,
        penalty_by_framework: sheet.penalty_by_framework,
        executive_summary,
        summary_is_fallback,
        critical_recommendations: sheet.critical_recommendations,
        findings: sheet.findings,
        items,
    })
}
