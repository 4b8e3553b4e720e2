//! 输入文档模型

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// 文档引用：名称 + 原始字节 + MIME 类型
///
/// 字节用 `Arc` 持有，任务排队和重试时不会复制文档内容。
#[derive(Debug, Clone)]
pub struct DocumentRef {
    pub name: String,
    pub content: Arc<[u8]>,
    pub mime_type: String,
}

impl DocumentRef {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: Arc::from(content.into()),
            mime_type: mime_type.into(),
        }
    }

    /// 从文件加载，MIME 类型按扩展名推断
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let content = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        Ok(Self::new(name, content, mime_from_path(path)))
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// 文件名去掉扩展名，用作框架的默认名称
    pub fn stem(&self) -> &str {
        self.name
            .rsplit_once('.')
            .map_or(self.name.as_str(), |(stem, _)| stem)
    }
}

/// 根据扩展名推断 MIME 类型
pub fn mime_from_path(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "txt" | "md" => "text/plain",
        "json" => "application/json",
        "toml" => "application/toml",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// 从输入文档中抽取的一条陈述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub text: String,
    /// 推断出的合规类别
    pub category: String,
    /// 在原文中的位置（字节偏移或行号，由抽取器决定）
    pub source_offset: usize,
}

/// 解析后的输入：有序的陈述列表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedInput {
    pub source: String,
    pub statements: Vec<Statement>,
}

impl ParsedInput {
    /// 类别是否匹配（忽略首尾空白和 ASCII 大小写）
    pub fn category_matches(a: &str, b: &str) -> bool {
        a.trim().eq_ignore_ascii_case(b.trim())
    }

    /// 返回类别匹配的陈述及其在输入中的序号，保持原始顺序
    pub fn candidates_for<'a>(
        &'a self,
        category: &'a str,
    ) -> impl Iterator<Item = (usize, &'a Statement)> + 'a {
        self.statements
            .iter()
            .enumerate()
            .filter(move |(_, s)| Self::category_matches(&s.category, category))
    }
}
