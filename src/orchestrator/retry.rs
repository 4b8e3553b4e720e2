//! 重试策略
//!
//! 所有外部能力调用（抽取、框架解析、比对、摘要）都经由同一个 [`RetryPolicy`]：
//! 只有瞬时错误才重试，退避时间按指数增长并有上限；每次尝试都有独立超时。

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::config::{Config, RetrySettings};
use crate::error::{AppResult, PipelineError};

/// 显式的重试策略对象
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大尝试次数（包含第一次）
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// 单次尝试的超时时间
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self::from_settings(&config.retry, config.capability_timeout())
    }

    pub fn from_settings(settings: &RetrySettings, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            multiplier: settings.multiplier.max(1.0),
            attempt_timeout,
        }
    }

    /// 不重试（用于聚合等纯计算阶段）
    pub fn no_retry(attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            attempt_timeout,
        }
    }

    /// 第 `attempt` 次失败后（从 1 开始）的退避时间
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = self.base_delay.mul_f64(exp);
        delay.min(self.max_delay)
    }

    /// 执行操作，瞬时错误按策略重试
    ///
    /// - `label`：日志标签，例如 `[任务 ab12cd34] Extract`
    /// - `on_timeout`：把单次超时映射成对应阶段的错误种类
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        on_timeout: impl Fn(Duration) -> PipelineError,
        mut op: F,
    ) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 1;
        loop {
            let outcome = match timeout(self.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(on_timeout(self.attempt_timeout)),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "{} 瞬时失败 (尝试 {}/{}): {}，{:?} 后重试...",
                        label, attempt, self.max_attempts, err, delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        warn!("{} 已重试 {} 次仍失败: {}", label, self.max_attempts, err);
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
            attempt_timeout: Duration::from_millis(200),
        }
    }

    fn oracle_timeout(_: Duration) -> PipelineError {
        PipelineError::OracleUnavailable("timeout".into())
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
            attempt_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_transient_error_is_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = fast_policy(3)
            .run("test", oracle_timeout, || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(PipelineError::OracleUnavailable("flaky".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: AppResult<()> = fast_policy(3)
            .run("test", oracle_timeout, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(PipelineError::OracleUnavailable("down".into()))
                }
            })
            .await;
        assert!(matches!(result, Err(PipelineError::OracleUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: AppResult<()> = fast_policy(5)
            .run("test", oracle_timeout, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(PipelineError::UnsupportedFormat {
                        mime_type: "audio/mpeg".into(),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(PipelineError::UnsupportedFormat { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_stage_error() {
        let policy = RetryPolicy {
            attempt_timeout: Duration::from_millis(10),
            ..fast_policy(2)
        };
        let result: AppResult<()> = policy
            .run(
                "test",
                |d| PipelineError::ExtractionTimeout {
                    timeout_secs: d.as_secs(),
                },
                || async {
                    sleep(Duration::from_secs(5)).await;
                    Ok(())
                },
            )
            .await;
        assert!(matches!(result, Err(PipelineError::ExtractionTimeout { .. })));
    }
}
