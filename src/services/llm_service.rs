//! LLM 服务 - 业务能力层
//!
//! 通过一个兼容 OpenAI API 的端点同时提供三种能力：
//! - [`ComplianceOracle`]：判断陈述对条款的满足程度（0-1 分）
//! - [`ReportSummarizer`]：生成 3-4 句的执行摘要
//! - [`DocumentExtractor`]：把纯文本 / JSON 文档按合规类别拆成陈述
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AppResult, PipelineError};
use crate::models::input::{ParsedInput, Statement};
use crate::models::report::format_usd;
use crate::stages::{ComplianceOracle, DocumentExtractor, ReportSummarizer, SummaryContext};
use crate::utils::logging::truncate_text;

/// 送入抽取提示词的最大字符数
const MAX_EXTRACT_CHARS: usize = 50_000;
/// 简化提示词使用的最大字符数
const MAX_SIMPLE_EXTRACT_CHARS: usize = 10_000;

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").expect("valid regex"));
static BARE_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\{[\s\S]*\}|\[[\s\S]*\])").expect("valid regex"));

/// LLM 服务
///
/// 职责：
/// - 调用 LLM API，处理单次的比对、摘要、抽取请求
/// - 不关心任务、阶段和重试（重试由编排器的策略负责）
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl LlmService {
    /// 创建新的 LLM 服务
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
        }
    }

    /// 通用的 LLM 调用函数
    ///
    /// 其他所有 LLM 相关功能都基于此函数。API 调用失败归为 `OracleUnavailable`（瞬时）。
    pub async fn send_to_llm(
        &self,
        user_message: &str,
        system_message: Option<&str>,
        max_tokens: u32,
    ) -> AppResult<String> {
        debug!(
            "调用 LLM API，模型: {}，消息长度: {} 字符",
            self.model_name,
            user_message.len()
        );

        let mut messages = Vec::new();
        if let Some(sys_msg) = system_message {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg)
                .build()?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user_message)
            .build()?;
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(0.0)
            .max_tokens(max_tokens)
            .build()?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            PipelineError::from(e)
        })?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| PipelineError::OracleUnavailable("LLM 返回内容为空".into()))?;

        debug!("LLM 响应: {}", truncate_text(&content, 120));
        Ok(content.trim().to_string())
    }

    fn build_compare_message(statement: &str, clause: &str) -> String {
        format!(
            r#"Judge how well the field statement demonstrates compliance with the regulatory clause.

Clause:
{}

Statement:
{}

Scoring guide:
- 1.0: fully compliant, the statement clearly satisfies the clause
- 0.8: mostly compliant, minor documentation gaps
- 0.5: partially compliant, needs review
- 0.2: largely non-compliant
- 0.0: non-compliant or unrelated

Reply with a single number between 0 and 1 and nothing else."#,
            clause, statement
        )
    }

    fn build_summary_message(context: &SummaryContext<'_>) -> String {
        let frameworks: Vec<String> = context
            .framework_scores
            .iter()
            .map(|s| format!("{} ({:.1}%)", s.framework, s.score * 100.0))
            .collect();
        let gaps = context.items.iter().filter(|i| i.gap).count();
        let categories: std::collections::BTreeSet<&str> = context
            .items
            .iter()
            .map(|i| i.clause.category.as_str())
            .collect();
        format!(
            r#"Generate a concise executive summary (3-4 sentences) for this compliance audit:
- Overall compliance score: {:.1}%
- Frameworks assessed: {}
- Gaps found: {} of {} requirements
- Categories reviewed: {}
- Total maximum financial exposure: {}

Note: financial exposure includes administrative penalties only.
Emphasize the financial risk if penalties are significant."#,
            context.overall_score * 100.0,
            frameworks.join(", "),
            gaps,
            context.items.len(),
            categories.len(),
            format_usd(context.total_exposure)
        )
    }

    fn build_extract_message(content: &str, simple: bool) -> String {
        if simple {
            return format!(
                r#"Extract key statements from this document.

Return a simple JSON with this format:
{{"parsed_data": [{{"category": "General", "statements": ["statement 1", "statement 2"]}}]}}

Content:
{}"#,
                truncate_chars(content, MAX_SIMPLE_EXTRACT_CHARS)
            );
        }
        format!(
            r#"Parse this content into structured compliance statements.

Group statements by relevant compliance categories such as (but not limited to):
- Site Access and Security
- Mining Operations
- Environmental Compliance
- Safety Procedures
- Corporate Governance
- Community Relations

Extract all factual statements, observations, and findings.

Output as JSON in this exact format:
{{"parsed_data": [{{"category": "Category Name", "statements": ["statement 1", "statement 2"]}}]}}

Content to parse:
{}"#,
            truncate_chars(content, MAX_EXTRACT_CHARS)
        )
    }
}

#[async_trait]
impl ComplianceOracle for LlmService {
    async fn compare(&self, statement: &str, clause: &str) -> AppResult<f64> {
        let response = self
            .send_to_llm(
                &Self::build_compare_message(statement, clause),
                Some("You are a regulatory compliance expert auditor."),
                16,
            )
            .await?;
        parse_score_response(&response).ok_or_else(|| {
            PipelineError::OracleUnavailable(format!(
                "无法从响应中解析分数: '{}'",
                truncate_text(&response, 60)
            ))
        })
    }
}

#[async_trait]
impl ReportSummarizer for LlmService {
    async fn summarize<'a>(&self, context: &SummaryContext<'a>) -> AppResult<String> {
        self.send_to_llm(
            &Self::build_summary_message(context),
            Some("You are an executive report writer for compliance audits."),
            512,
        )
        .await
    }
}

#[async_trait]
impl DocumentExtractor for LlmService {
    async fn extract(&self, content: &[u8], mime_type: &str) -> AppResult<ParsedInput> {
        if !matches!(mime_type, "text/plain" | "text/markdown" | "application/json") {
            return Err(PipelineError::UnsupportedFormat {
                mime_type: mime_type.to_string(),
            });
        }
        let text = String::from_utf8_lossy(content);
        let system = "You are an expert compliance auditor parsing field reports and questionnaires, \
                      your goal is to parse for anything that would be relevant to a compliance audit.";

        // 第一次用完整提示词，解析失败再用简化提示词试一次
        for simple in [false, true] {
            let response = self
                .send_to_llm(&Self::build_extract_message(&text, simple), Some(system), 4096)
                .await?;
            match parse_extract_response(&response) {
                Some(parsed) => return Ok(parsed),
                None => warn!(
                    "无法从抽取响应中解析 JSON{}: {}",
                    if simple { "" } else { "，改用简化提示词重试" },
                    truncate_text(&response, 200)
                ),
            }
        }
        Err(PipelineError::ExtractionFailed(
            "LLM 未返回可解析的陈述列表".into(),
        ))
    }
}

/// 解析比对分数
///
/// 接受 `0.85`、`Score: 0.85`、`85%`、`85` 等形式。带 `%` 或大于 1.5 的数按百分制处理，
/// 介于 1 和 1.5 之间的数视为略微越界的小数并裁剪到 1。
fn parse_score_response(response: &str) -> Option<f64> {
    let response = response.trim();

    let normalize = |value: f64, percent: bool| -> Option<f64> {
        if !value.is_finite() || value < 0.0 || value > 100.0 {
            None
        } else if percent || value > 1.5 {
            Some(value / 100.0)
        } else {
            Some(value.min(1.0))
        }
    };

    // 尝试直接解析数字
    if let Ok(value) = response.parse::<f64>() {
        return normalize(value, false);
    }

    // 尝试从文本中提取数字
    for word in response.split_whitespace() {
        let cleaned = word.trim_matches(|c: char| !c.is_ascii_digit() && c != '.' && c != '%');
        let percent = cleaned.ends_with('%');
        let cleaned = cleaned.trim_end_matches('%').trim_end_matches('.');
        if let Ok(value) = cleaned.parse::<f64>() {
            if let Some(score) = normalize(value, percent) {
                debug!("从响应 '{}' 中提取到分数: {}", response, score);
                return Some(score);
            }
        }
    }
    None
}

/// 从 LLM 响应中提取 JSON：先整体解析，再找 ```json 代码块，最后找第一个 `{...}` / `[...]`
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }

    if let Some(block) = FENCED_JSON.captures(text).and_then(|c| c.get(1)) {
        if let Ok(value) = serde_json::from_str(block.as_str()) {
            return Some(value);
        }
    }

    BARE_JSON
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| serde_json::from_str(m.as_str()).ok())
}

#[derive(Debug, Deserialize)]
struct LlmParsedInput {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    parsed_data: Vec<LlmCategory>,
}

#[derive(Debug, Deserialize)]
struct LlmCategory {
    category: String,
    #[serde(default)]
    statements: Vec<String>,
}

fn parse_extract_response(response: &str) -> Option<ParsedInput> {
    let value = extract_json(response)?;
    let parsed: LlmParsedInput = serde_json::from_value(value).ok()?;

    let statements = parsed
        .parsed_data
        .into_iter()
        .flat_map(|group| {
            let category = group.category;
            group
                .statements
                .into_iter()
                .filter(|s| !s.trim().is_empty())
                .map(move |text| (category.clone(), text))
        })
        .enumerate()
        .map(|(offset, (category, text))| Statement {
            text: text.trim().to_string(),
            category,
            source_offset: offset,
        })
        .collect();

    Some(ParsedInput {
        source: parsed.source.unwrap_or_default(),
        statements,
    })
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
