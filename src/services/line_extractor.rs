//! 按行抽取陈述
//!
//! 离线使用的确定性抽取器，每行一条陈述：
//!
//! ```text
//! [Site Access] All visitors sign in at the gate
//! [Environmental Compliance] Tailings dam inspected monthly
//! Unlabelled lines go to the default category
//! ```

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

use crate::error::{AppResult, PipelineError};
use crate::models::input::{ParsedInput, Statement};
use crate::stages::DocumentExtractor;

/// `[类别] 陈述`
static LABELLED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[([^\]]+)\]\s*(.+)$").expect("valid regex"));

/// `text/plain` 行抽取器
#[derive(Debug, Clone)]
pub struct LineStatementExtractor {
    default_category: String,
}

impl Default for LineStatementExtractor {
    fn default() -> Self {
        Self::new("General")
    }
}

impl LineStatementExtractor {
    pub fn new(default_category: impl Into<String>) -> Self {
        Self {
            default_category: default_category.into(),
        }
    }

    /// 解析文本，`source_offset` 为行号（从 0 开始）
    pub fn parse_text(&self, text: &str) -> ParsedInput {
        let statements = text
            .lines()
            .enumerate()
            .filter_map(|(line_no, line)| {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    return None;
                }
                let (category, body) = match LABELLED_LINE.captures(line) {
                    Some(caps) => (caps[1].trim().to_string(), caps[2].trim().to_string()),
                    None => (self.default_category.clone(), line.to_string()),
                };
                Some(Statement {
                    text: body,
                    category,
                    source_offset: line_no,
                })
            })
            .collect();

        ParsedInput {
            source: String::new(),
            statements,
        }
    }
}

#[async_trait]
impl DocumentExtractor for LineStatementExtractor {
    async fn extract(&self, content: &[u8], mime_type: &str) -> AppResult<ParsedInput> {
        if !matches!(mime_type, "text/plain" | "text/markdown") {
            return Err(PipelineError::UnsupportedFormat {
                mime_type: mime_type.to_string(),
            });
        }
        let text = std::str::from_utf8(content)
            .map_err(|e| PipelineError::ExtractionFailed(format!("不是 UTF-8 文本: {}", e)))?;
        Ok(self.parse_text(text))
    }
}
