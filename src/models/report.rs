//! 合规报告模型

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::framework::{Clause, FrameworkIdentity};

/// 单项合规结论的优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Priority {
    Critical,
    Medium,
    Low,
}

/// 不合规分数线（低于此分数视为严重）
pub const NON_COMPLIANT_BELOW: f64 = 0.5;
/// 完全合规分数线
pub const COMPLIANT_FROM: f64 = 0.8;

impl Priority {
    /// 分数低于 0.5，或关键条款存在缺口 → Critical；低于 0.8 → Medium；否则 Low
    pub fn classify(score: f64, gap: bool, critical_clause: bool) -> Self {
        if score < NON_COMPLIANT_BELOW || (gap && critical_clause) {
            Priority::Critical
        } else if score < COMPLIANT_FROM {
            Priority::Medium
        } else {
            Priority::Low
        }
    }
}

/// 被匹配的陈述引用
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementRef {
    /// 在 ParsedInput 中的序号
    pub index: usize,
    pub text: String,
}

/// 单项合规结论
///
/// 不变量：`gap == (score < gap_threshold)`；`penalty > 0` 仅当 `gap` 且条款带罚款元数据。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceItem {
    /// 报告中显示的框架名称（同一任务内唯一）
    pub framework: String,
    /// 所属框架的内容指纹
    pub framework_id: FrameworkIdentity,
    pub clause: Clause,
    pub matched_statement: Option<StatementRef>,
    pub score: f64,
    pub gap: bool,
    pub recommendation: String,
    pub penalty: f64,
    pub priority: Priority,
    /// 比对调用重试耗尽后降级的结论
    pub degraded: bool,
}

/// 单个框架的得分
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameworkScore {
    pub framework: String,
    pub framework_id: FrameworkIdentity,
    /// 按严重程度加权的平均分
    pub score: f64,
    /// 该框架所有条款的权重之和
    pub weight_total: f64,
    pub item_count: usize,
    pub gap_count: usize,
    pub exposure: f64,
}

/// 结论分布统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FindingsSummary {
    pub compliant: usize,
    pub review_needed: usize,
    pub non_compliant: usize,
    pub degraded: usize,
}

/// 最终报告（由聚合阶段一次性生成，之后不可变）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalReport {
    pub generated_at: DateTime<Utc>,
    pub framework_scores: Vec<FrameworkScore>,
    pub overall_score: f64,
    pub total_exposure: f64,
    pub penalty_by_framework: BTreeMap<String, f64>,
    pub executive_summary: String,
    /// 摘要是否来自模板兜底
    pub summary_is_fallback: bool,
    pub critical_recommendations: Vec<String>,
    pub findings: FindingsSummary,
    pub items: Vec<ComplianceItem>,
}

impl FinalReport {
    pub fn framework_score(&self, framework: &str) -> Option<&FrameworkScore> {
        self.framework_scores.iter().find(|s| s.framework == framework)
    }

    pub fn gap_count(&self) -> usize {
        self.items.iter().filter(|i| i.gap).count()
    }
}

#[cfg(test)]
impl FinalReport {
    /// 测试用的空报告
    pub(crate) fn empty() -> Self {
        Self {
            generated_at: Utc::now(),
            framework_scores: Vec::new(),
            overall_score: 0.0,
            total_exposure: 0.0,
            penalty_by_framework: BTreeMap::new(),
            executive_summary: String::new(),
            summary_is_fallback: true,
            critical_recommendations: Vec::new(),
            findings: FindingsSummary::default(),
            items: Vec::new(),
        }
    }
}

/// 金额格式化，例如 `$1,234,567.89`
pub fn format_usd(amount: f64) -> String {
    let cents = (amount * 100.0).round() as i64;
    let whole = (cents / 100).abs().to_string();
    let frac = (cents % 100).abs();

    let mut grouped = String::new();
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if cents < 0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, frac)
}
