//! 监管框架模型

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// 框架身份：由文档内容计算的指纹，与文件名、上传路径无关
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FrameworkIdentity(String);

impl FrameworkIdentity {
    /// 对原始内容做 SHA-256
    pub fn from_content(content: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(content)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 日志里使用的短指纹
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for FrameworkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 罚款元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyMeta {
    /// 单项违规的最高罚款
    pub max_penalty: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// 涉及的法规条款（如 "301"、"299 bis"）
    #[serde(default)]
    pub articles: Vec<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// 框架条款（单项要求）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    pub id: String,
    pub text: String,
    pub category: String,
    /// 严重程度权重
    pub severity_weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub penalty: Option<PenaltyMeta>,
}

impl Clause {
    /// 条款的最高罚款（无罚款元数据时为 0）
    pub fn max_penalty(&self) -> f64 {
        self.penalty.as_ref().map_or(0.0, |p| p.max_penalty)
    }
}

/// 解析后的框架要求
///
/// 由 FrameworkCache 独占持有，计算完成后以 `Arc` 只读共享给各任务。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameworkExtract {
    pub identity: FrameworkIdentity,
    pub name: String,
    /// 框架自定义的缺口阈值，缺省时使用全局配置
    pub gap_threshold: Option<f64>,
    /// 框架自定义的关键条款权重阈值，缺省时使用全局配置
    pub critical_weight_threshold: Option<f64>,
    /// 类别 → 有序条款列表
    pub categories: BTreeMap<String, Vec<Clause>>,
}

impl FrameworkExtract {
    pub fn new(identity: FrameworkIdentity, name: impl Into<String>) -> Self {
        Self {
            identity,
            name: name.into(),
            gap_threshold: None,
            critical_weight_threshold: None,
            categories: BTreeMap::new(),
        }
    }

    /// 追加条款，保持每个类别内的声明顺序
    pub fn push_clause(&mut self, clause: Clause) {
        self.categories
            .entry(clause.category.clone())
            .or_default()
            .push(clause);
    }

    /// 按类别顺序遍历所有条款
    pub fn clauses(&self) -> impl Iterator<Item = &Clause> {
        self.categories.values().flatten()
    }

    pub fn clause_count(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    pub fn total_weight(&self) -> f64 {
        self.clauses().map(|c| c.severity_weight).sum()
    }

    pub fn gap_threshold_or(&self, default: f64) -> f64 {
        self.gap_threshold.unwrap_or(default)
    }

    pub fn critical_threshold_or(&self, default: f64) -> f64 {
        self.critical_weight_threshold.unwrap_or(default)
    }
}
