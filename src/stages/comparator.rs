//! 比对阶段 - 评分算法
//!
//! ## 算法
//!
//! 对每个框架的每条条款：
//! 1. 候选陈述 = 推断类别与条款类别一致的陈述（保持输入顺序）
//! 2. 没有候选：`matched = None, score = 0.0, gap = true`（没有证据即视为不合规）
//! 3. 有候选：逐一调用 oracle 打分，取最高分；同分取最早出现的陈述
//! 4. `gap = score < gap_threshold`，`penalty = weight × max_penalty × (1 - score)`（仅缺口时）
//!
//! 某条条款只要有一个候选配对在重试耗尽后仍失败，该条款就降级为"匹配出错"：
//! 分数 0，附带诊断建议，不中断整个任务。

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppResult, PipelineError};
use crate::models::framework::{Clause, FrameworkExtract, FrameworkIdentity};
use crate::models::input::ParsedInput;
use crate::models::report::{ComplianceItem, Priority, StatementRef};
use crate::orchestrator::retry::RetryPolicy;
use crate::stages::ComplianceOracle;

/// 比对参数
#[derive(Debug, Clone)]
pub struct ComparatorSettings {
    pub default_gap_threshold: f64,
    pub critical_weight_threshold: f64,
    /// 单个任务内同时进行的 oracle 调用数
    pub oracle_concurrency: usize,
}

impl ComparatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_gap_threshold: config.default_gap_threshold,
            critical_weight_threshold: config.critical_weight_threshold,
            oracle_concurrency: config.oracle_concurrency.max(1),
        }
    }
}

/// 某个框架在本次评估中生效的阈值
#[derive(Debug, Clone, PartialEq)]
pub struct FrameworkTerms {
    /// 聚合时区分框架的唯一依据
    pub identity: FrameworkIdentity,
    /// 报告中显示的名称
    pub name: String,
    pub gap_threshold: f64,
    pub critical_weight_threshold: f64,
}

impl FrameworkTerms {
    pub fn resolve(extract: &FrameworkExtract, settings: &ComparatorSettings) -> Self {
        Self {
            identity: extract.identity.clone(),
            name: extract.name.clone(),
            gap_threshold: extract.gap_threshold_or(settings.default_gap_threshold),
            critical_weight_threshold: extract
                .critical_threshold_or(settings.critical_weight_threshold),
        }
    }

    /// 解析一个任务的全部框架；重名但内容不同的框架在名称后附上短指纹
    pub fn resolve_all(frameworks: &[Arc<FrameworkExtract>], settings: &ComparatorSettings) -> Vec<Self> {
        let mut name_counts: HashMap<&str, usize> = HashMap::new();
        for framework in frameworks {
            *name_counts.entry(framework.name.as_str()).or_default() += 1;
        }
        frameworks
            .iter()
            .map(|framework| {
                let mut terms = Self::resolve(framework, settings);
                if name_counts.get(framework.name.as_str()).copied().unwrap_or(0) > 1 {
                    terms.name = format!("{} [{}]", framework.name, framework.identity.short());
                }
                terms
            })
            .collect()
    }

    pub fn is_critical(&self, clause: &Clause) -> bool {
        clause.severity_weight >= self.critical_weight_threshold
    }
}

/// 比对结果
#[derive(Debug, Clone)]
pub struct CompareOutcome {
    pub items: Vec<ComplianceItem>,
    pub terms: Vec<FrameworkTerms>,
    pub oracle_calls: usize,
}

impl CompareOutcome {
    pub fn degraded_count(&self) -> usize {
        self.items.iter().filter(|i| i.degraded).count()
    }

    /// 降级条款占全部条款的比例
    pub fn degraded_fraction(&self) -> f64 {
        if self.items.is_empty() {
            0.0
        } else {
            self.degraded_count() as f64 / self.items.len() as f64
        }
    }
}

/// 一次配对的打分结果：(条款序号, 陈述序号, 分数)
type Scored = (usize, usize, AppResult<f64>);

/// 一次 (陈述, 条款) 配对
struct Pairing<'a> {
    item: usize,
    statement: usize,
    statement_text: &'a str,
    clause_text: &'a str,
}

/// 对所有框架执行比对
pub async fn compare_all(
    oracle: &dyn ComplianceOracle,
    input: &ParsedInput,
    frameworks: &[Arc<FrameworkExtract>],
    settings: &ComparatorSettings,
    policy: &RetryPolicy,
    label: &str,
) -> CompareOutcome {
    // 1. 展开条款，收集需要调用 oracle 的配对
    let terms = FrameworkTerms::resolve_all(frameworks, settings);
    let mut slots: Vec<(&FrameworkTerms, &Clause, Vec<usize>)> = Vec::new();
    for (framework, term) in frameworks.iter().zip(&terms) {
        for clause in framework.clauses() {
            let candidates = input.candidates_for(&clause.category).map(|(i, _)| i).collect();
            slots.push((term, clause, candidates));
        }
    }

    let pairings: Vec<Pairing<'_>> = slots
        .iter()
        .enumerate()
        .flat_map(|(item, (_, clause, candidates))| {
            candidates.iter().map(move |&statement| Pairing {
                item,
                statement,
                statement_text: &input.statements[statement].text,
                clause_text: &clause.text,
            })
        })
        .collect();
    let oracle_calls = pairings.len();
    debug!(
        "{} 共 {} 条条款，{} 个配对需要打分",
        label,
        slots.len(),
        oracle_calls
    );

    // 2. 有界并发调用 oracle，结果保持配对顺序
    let call_label = format!("{} Compare", label);
    let calls: Vec<BoxFuture<'_, Scored>> = pairings
        .into_iter()
        .map(|pairing| score_pairing(oracle, policy, &call_label, pairing).boxed())
        .collect();
    let scored: Vec<Scored> = stream::iter(calls)
        .buffered(settings.oracle_concurrency.max(1))
        .collect()
        .await;

    let mut by_item: HashMap<usize, Vec<(usize, AppResult<f64>)>> = HashMap::new();
    for (item, statement, result) in scored {
        by_item.entry(item).or_default().push((statement, result));
    }

    // 3. 每条条款生成一项结论
    let items: Vec<ComplianceItem> = slots
        .iter()
        .enumerate()
        .map(|(idx, (term, clause, _))| {
            let results = by_item.remove(&idx).unwrap_or_default();
            build_item(term, clause, input, results)
        })
        .collect();

    let outcome = CompareOutcome {
        items,
        terms,
        oracle_calls,
    };
    let degraded = outcome.degraded_count();
    if degraded > 0 {
        warn!(
            "{} ⚠️ {} / {} 条条款因比对服务失败被降级",
            label,
            degraded,
            outcome.items.len()
        );
    }
    info!(
        "{} 🔍 比对完成: {} 条条款，{} 项缺口",
        label,
        outcome.items.len(),
        outcome.items.iter().filter(|i| i.gap).count()
    );
    outcome
}

/// 对单个配对打分（带重试和超时）
async fn score_pairing(
    oracle: &dyn ComplianceOracle,
    policy: &RetryPolicy,
    label: &str,
    pairing: Pairing<'_>,
) -> Scored {
    let Pairing {
        item,
        statement,
        statement_text,
        clause_text,
    } = pairing;
    let result = policy
        .run(
            label,
            |elapsed| PipelineError::OracleUnavailable(format!("比对超时 ({} 秒)", elapsed.as_secs())),
            || async move { normalize_score(oracle.compare(statement_text, clause_text).await?) },
        )
        .await;
    (item, statement, result)
}

/// oracle 分数规整：NaN 视为瞬时失败，其余裁剪到 [0, 1]
fn normalize_score(raw: f64) -> AppResult<f64> {
    if raw.is_nan() {
        return Err(PipelineError::OracleUnavailable("oracle 返回了 NaN".into()));
    }
    Ok(raw.clamp(0.0, 1.0))
}

/// 选出最高分配对；同分时保留最早出现的陈述
///
/// `results` 必须按陈述顺序排列。
fn select_best(results: &[(usize, AppResult<f64>)]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (statement, result) in results {
        if let Ok(score) = result {
            match best {
                Some((_, current)) if *score <= current => {}
                _ => best = Some((*statement, *score)),
            }
        }
    }
    best
}

fn build_item(
    term: &FrameworkTerms,
    clause: &Clause,
    input: &ParsedInput,
    results: Vec<(usize, AppResult<f64>)>,
) -> ComplianceItem {
    let statement_ref = |index: usize| StatementRef {
        index,
        text: input.statements[index].text.clone(),
    };

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    let first_failure = results
        .iter()
        .find_map(|(index, r)| r.as_ref().err().map(|e| (*index, e)));

    let (matched, score, degraded, recommendation) = match (first_failure, select_best(&results)) {
        // 任一候选在重试耗尽后失败，整条条款都不可信
        (Some((index, error)), _) => (
            Some(statement_ref(index)),
            0.0,
            true,
            format!(
                "比对服务调用失败（{}/{} 个候选陈述），条款 {} 需要人工复核：{}",
                failed,
                results.len(),
                clause.id,
                error
            ),
        ),
        (None, Some((index, score))) => {
            let recommendation = if score < term.gap_threshold {
                format!(
                    "条款 {} 未达标（得分 {:.2}，阈值 {:.2}），需整改：{}",
                    clause.id, score, term.gap_threshold, clause.text
                )
            } else {
                format!("条款 {} 已满足，保持现有措施", clause.id)
            };
            (Some(statement_ref(index)), score, false, recommendation)
        }
        (None, None) => (
            None,
            0.0,
            false,
            format!(
                "未找到与类别「{}」相关的陈述，请补充证明材料以满足条款 {}：{}",
                clause.category, clause.id, clause.text
            ),
        ),
    };

    let gap = score < term.gap_threshold;
    let penalty = if gap {
        (clause.severity_weight * clause.max_penalty() * (1.0 - score)).max(0.0)
    } else {
        0.0
    };

    ComplianceItem {
        framework: term.name.clone(),
        framework_id: term.identity.clone(),
        clause: clause.clone(),
        matched_statement: matched,
        score,
        gap,
        recommendation,
        penalty,
        priority: Priority::classify(score, gap, term.is_critical(clause)),
        degraded,
    }
}
