use crate::error::{AppResult, PipelineError};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// 程序配置
///
/// 加载顺序：默认值 → TOML 配置文件（可选）→ 环境变量
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 并发执行的任务数量（工作者数量）
    pub max_workers: usize,
    /// 等待队列容量，超出后提交直接返回 Saturated
    pub queue_capacity: usize,
    /// 外部能力调用的重试配置
    pub retry: RetrySettings,
    /// 单次外部能力调用的超时时间（秒）
    pub capability_timeout_secs: u64,
    /// 允许降级的比对项比例上限，超过则任务失败
    pub degradation_ceiling: f64,
    /// 框架未声明时使用的缺口阈值
    pub default_gap_threshold: f64,
    /// 框架未声明时使用的"关键条款"权重阈值
    pub critical_weight_threshold: f64,
    /// 单个任务内同时进行的比对调用数量
    pub oracle_concurrency: usize,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
}

/// 重试配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// 最大尝试次数（包含第一次）
    pub max_attempts: u32,
    /// 首次退避时间（毫秒）
    pub base_delay_ms: u64,
    /// 退避上限（毫秒）
    pub max_delay_ms: u64,
    /// 退避倍数
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: 5,
            queue_capacity: 20,
            retry: RetrySettings::default(),
            capability_timeout_secs: 60,
            degradation_ceiling: 0.2,
            default_gap_threshold: 0.6,
            critical_weight_threshold: 2.5,
            oracle_concurrency: 4,
            verbose_logging: false,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
        }
    }
}

impl Config {
    /// 从环境变量覆盖默认配置
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 从 TOML 文件加载配置（缺省字段使用默认值）
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("无法读取配置文件 {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// 完整加载：`COMPLIANCE_CONFIG` 指向的文件（如有）+ 环境变量，并做校验
    pub fn load() -> AppResult<Self> {
        let base = match std::env::var("COMPLIANCE_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        let config = base.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn with_env_overrides(self) -> Self {
        let default = self;
        Self {
            max_workers: env_parse("MAX_WORKERS").unwrap_or(default.max_workers),
            queue_capacity: env_parse("QUEUE_CAPACITY").unwrap_or(default.queue_capacity),
            retry: RetrySettings {
                max_attempts: env_parse("RETRY_MAX_ATTEMPTS").unwrap_or(default.retry.max_attempts),
                base_delay_ms: env_parse("RETRY_BASE_DELAY_MS").unwrap_or(default.retry.base_delay_ms),
                max_delay_ms: env_parse("RETRY_MAX_DELAY_MS").unwrap_or(default.retry.max_delay_ms),
                multiplier: env_parse("RETRY_MULTIPLIER").unwrap_or(default.retry.multiplier),
            },
            capability_timeout_secs: env_parse("CAPABILITY_TIMEOUT_SECS").unwrap_or(default.capability_timeout_secs),
            degradation_ceiling: env_parse("DEGRADATION_CEILING").unwrap_or(default.degradation_ceiling),
            default_gap_threshold: env_parse("DEFAULT_GAP_THRESHOLD").unwrap_or(default.default_gap_threshold),
            critical_weight_threshold: env_parse("CRITICAL_WEIGHT_THRESHOLD").unwrap_or(default.critical_weight_threshold),
            oracle_concurrency: env_parse("ORACLE_CONCURRENCY").unwrap_or(default.oracle_concurrency),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(default.verbose_logging),
            llm_api_key: std::env::var("LLM_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
        }
    }

    /// 校验配置取值
    pub fn validate(&self) -> AppResult<()> {
        if self.max_workers == 0 {
            return Err(PipelineError::Config("max_workers 必须大于 0".into()));
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::Config("queue_capacity 必须大于 0".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::Config("retry.max_attempts 必须大于 0".into()));
        }
        if self.oracle_concurrency == 0 {
            return Err(PipelineError::Config("oracle_concurrency 必须大于 0".into()));
        }
        if !(0.0..=1.0).contains(&self.degradation_ceiling) {
            return Err(PipelineError::Config(format!(
                "degradation_ceiling 必须在 [0, 1] 之间，当前为 {}",
                self.degradation_ceiling
            )));
        }
        if !(0.0..=1.0).contains(&self.default_gap_threshold) {
            return Err(PipelineError::Config(format!(
                "default_gap_threshold 必须在 [0, 1] 之间，当前为 {}",
                self.default_gap_threshold
            )));
        }
        Ok(())
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_secs(self.capability_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
