//! 能力实现层（Services）
//!
//! 只描述"我能做什么"，每个实现对应 `stages` 中的一个能力接口：
//!
//! - `LlmService` - 语义比对、执行摘要、文本抽取（LLM）
//! - `TomlFrameworkParser` - 结构化框架文档解析
//! - `LineStatementExtractor` - `[类别] 陈述` 格式的按行抽取

pub mod line_extractor;
pub mod llm_service;
pub mod toml_framework;

pub use line_extractor::LineStatementExtractor;
pub use llm_service::LlmService;
pub use toml_framework::TomlFrameworkParser;
