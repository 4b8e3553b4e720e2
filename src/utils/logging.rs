/// 日志工具模块
///
/// 提供日志初始化和格式化输出的辅助函数
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::report::{format_usd, FinalReport};

/// 初始化 tracing 订阅者
///
/// 优先使用 `RUST_LOG`，否则按 `verbose` 选择 `debug` 或 `info`。重复调用是安全的。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 合规分析编排模式");
    info!(
        "📊 工作者数量: {}，队列容量: {}",
        config.max_workers, config.queue_capacity
    );
    info!(
        "🔁 重试: 最多 {} 次，单次超时 {} 秒",
        config.retry.max_attempts, config.capability_timeout_secs
    );
    info!("🤖 模型: {}", config.llm_model_name);
    info!("{}", "=".repeat(60));
}

/// 打印单个任务的最终统计
pub fn log_job_finished(label: &str, report: &FinalReport, elapsed: Duration) {
    info!("{} {}", label, "─".repeat(40));
    info!("{} ✅ 处理完成，用时 {:.1} 秒", label, elapsed.as_secs_f64());
    for score in &report.framework_scores {
        info!(
            "{} 📋 {}: {:.1}% ({} 项缺口 / {} 条条款)",
            label,
            score.framework,
            score.score * 100.0,
            score.gap_count,
            score.item_count
        );
    }
    info!(
        "{} 📊 总体: {:.1}%，罚款敞口 {}",
        label,
        report.overall_score * 100.0,
        format_usd(report.total_exposure)
    );
    if report.findings.degraded > 0 {
        info!("{} ⚠️ 降级条款: {}", label, report.findings.degraded);
    }
    info!("{} {}", label, "─".repeat(40));
}

/// 截断长文本用于日志显示
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
