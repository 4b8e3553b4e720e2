//! TOML 框架解析器
//!
//! 结构化的框架文档格式：
//!
//! ```toml
//! name = "DRC Mining Code"
//! gap_threshold = 0.6               # 可选
//! critical_weight_threshold = 2.5   # 可选
//!
//! [[clauses]]
//! id = "301"
//! category = "Permits"
//! text = "Mining permits must be valid and displayed on site"
//! weight = 3.0
//!
//! [clauses.penalty]                 # 可选
//! max_penalty = 1000.0
//! currency = "USD"
//! articles = ["301"]
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{AppResult, PipelineError};
use crate::models::framework::{Clause, FrameworkExtract, FrameworkIdentity, PenaltyMeta};
use crate::models::input::DocumentRef;
use crate::stages::FrameworkParser;

#[derive(Debug, Deserialize)]
struct FrameworkDocument {
    name: Option<String>,
    gap_threshold: Option<f64>,
    critical_weight_threshold: Option<f64>,
    #[serde(default)]
    clauses: Vec<ClauseEntry>,
}

#[derive(Debug, Deserialize)]
struct ClauseEntry {
    id: String,
    category: String,
    text: String,
    #[serde(default = "default_weight")]
    weight: f64,
    penalty: Option<PenaltyMeta>,
}

fn default_weight() -> f64 {
    1.0
}

/// 解析 `application/toml` 框架文档（纯本地计算）
#[derive(Debug, Default, Clone, Copy)]
pub struct TomlFrameworkParser;

impl TomlFrameworkParser {
    pub fn new() -> Self {
        Self
    }

    /// 同步解析，供测试和离线工具直接调用
    pub fn parse_str(
        &self,
        content: &str,
        fallback_name: &str,
        identity: &FrameworkIdentity,
    ) -> AppResult<FrameworkExtract> {
        let doc: FrameworkDocument = toml::from_str(content)
            .map_err(|e| PipelineError::framework_load_failed(fallback_name, e))?;

        let name = doc
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| fallback_name.to_string());
        let mut extract = FrameworkExtract::new(identity.clone(), name);
        extract.gap_threshold = doc.gap_threshold;
        extract.critical_weight_threshold = doc.critical_weight_threshold;

        for entry in doc.clauses {
            extract.push_clause(Clause {
                id: entry.id,
                text: entry.text,
                category: entry.category.trim().to_string(),
                severity_weight: entry.weight,
                penalty: entry.penalty,
            });
        }

        debug!(
            "解析框架 {}: {} 个类别，{} 条条款",
            extract.name,
            extract.categories.len(),
            extract.clause_count()
        );
        Ok(extract)
    }
}

#[async_trait]
impl FrameworkParser for TomlFrameworkParser {
    async fn parse(
        &self,
        document: &DocumentRef,
        identity: &FrameworkIdentity,
    ) -> AppResult<FrameworkExtract> {
        if !matches!(document.mime_type.as_str(), "application/toml" | "text/plain") {
            return Err(PipelineError::framework_load_failed(
                document.name.clone(),
                format!("不支持的框架格式 {}", document.mime_type),
            ));
        }
        let content = std::str::from_utf8(&document.content).map_err(|e| {
            PipelineError::framework_load_failed(document.name.clone(), format!("不是 UTF-8 文本: {}", e))
        })?;
        self.parse_str(content, document.stem(), identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DRC: &str = r#"
name = "DRC Mining Code"
gap_threshold = 0.7

[[clauses]]
id = "301"
category = "Permits"
text = "Mining permits must be valid and displayed on site"
weight = 3.0

[clauses.penalty]
max_penalty = 1000.0
articles = ["301"]

[[clauses]]
id = "404"
category = "Environmental Compliance"
text = "Tailings facilities must be inspected monthly"
"#;

    #[test]
    fn test_parse_full_document() {
        let identity = FrameworkIdentity::from_content(DRC.as_bytes());
        let extract = TomlFrameworkParser::new()
            .parse_str(DRC, "drc", &identity)
            .unwrap();

        assert_eq!(extract.name, "DRC Mining Code");
        assert_eq!(extract.gap_threshold, Some(0.7));
        assert_eq!(extract.clause_count(), 2);

        let permit = &extract.categories["Permits"][0];
        assert_eq!(permit.severity_weight, 3.0);
        let penalty = permit.penalty.as_ref().unwrap();
        assert_eq!(penalty.max_penalty, 1000.0);
        assert_eq!(penalty.currency, "USD");

        let env = &extract.categories["Environmental Compliance"][0];
        assert_eq!(env.severity_weight, 1.0);
        assert!(env.penalty.is_none());
    }

    #[tokio::test]
    async fn test_malformed_document_is_load_failure() {
        let doc = DocumentRef::new("broken.toml", b"[[clauses]\nid =".to_vec(), "application/toml");
        let identity = FrameworkIdentity::from_content(&doc.content);
        let err = TomlFrameworkParser::new().parse(&doc, &identity).await.unwrap_err();
        assert!(matches!(err, PipelineError::FrameworkLoadFailed { .. }));
    }

    #[tokio::test]
    async fn test_name_falls_back_to_file_stem() {
        let content = "[[clauses]]\nid = \"1\"\ncategory = \"A\"\ntext = \"t\"\n";
        let doc = DocumentRef::new("iso27001.toml", content.as_bytes().to_vec(), "application/toml");
        let identity = FrameworkIdentity::from_content(&doc.content);
        let extract = TomlFrameworkParser::new().parse(&doc, &identity).await.unwrap();
        assert_eq!(extract.name, "iso27001");
    }
}
