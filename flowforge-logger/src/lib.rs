//! # FlowForge Logger
//!
//! tracing 订阅器初始化以及执行上下文摘要日志

use flowforge_context::ExecutionContext;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// 未设置 `RUST_LOG` 时使用的过滤级别
pub const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// 初始化文本格式的 tracing 订阅器
///
/// 已存在全局订阅器时返回 `false`。
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .try_init()
        .is_ok()
}

/// 初始化 JSON 格式的 tracing 订阅器
pub fn init_tracing_json() -> bool {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter())
        .with_current_span(true)
        .try_init()
        .is_ok()
}

/// 执行上下文摘要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSummary {
    pub trace_id: String,
    pub outputs: usize,
    pub variables: usize,
    pub secrets_enabled: bool,
    pub secrets_loaded: bool,
    pub secret_provider: Option<String>,
}

impl ContextSummary {
    pub fn of(context: &ExecutionContext) -> Self {
        let secrets = context.secrets();
        Self {
            trace_id: context.trace_id.clone(),
            outputs: context.outputs().len(),
            variables: context.variables().len(),
            secrets_enabled: secrets.is_enabled(),
            secrets_loaded: secrets.is_loaded(),
            secret_provider: secrets.provider_name().map(str::to_string),
        }
    }
}

/// 带 trace id 的日志记录器
#[derive(Debug, Clone)]
pub struct Logger {
    pub trace_id: String,
}

impl Logger {
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_trace_id(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
        }
    }

    /// 沿用执行上下文的 trace id
    pub fn for_context(context: &ExecutionContext) -> Self {
        Self::with_trace_id(context.trace_id.clone())
    }

    pub fn info(&self, message: &str) {
        info!(trace_id = %self.trace_id, "{}", message);
    }

    pub fn warn(&self, message: &str) {
        warn!(trace_id = %self.trace_id, "{}", message);
    }

    pub fn error(&self, message: &str) {
        error!(trace_id = %self.trace_id, "{}", message);
    }

    pub fn debug(&self, message: &str) {
        debug!(trace_id = %self.trace_id, "{}", message);
    }

    /// 输出执行上下文摘要；密钥只记录状态，不记录内容
    pub fn log_context_summary(&self, context: &ExecutionContext) -> ContextSummary {
        let summary = ContextSummary::of(context);
        info!(
            trace_id = %summary.trace_id,
            outputs = summary.outputs,
            variables = summary.variables,
            secrets_enabled = summary.secrets_enabled,
            secrets_loaded = summary.secrets_loaded,
            secret_provider = summary.secret_provider.as_deref().unwrap_or("none"),
            "执行上下文摘要"
        );

        let mut keys: Vec<&String> = context.outputs().keys().collect();
        keys.sort();
        for key in keys {
            debug!(trace_id = %summary.trace_id, output = %key, "任务输出");
        }
        summary
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_summary_counts_context_entries() {
        let context = ExecutionContext::new_with_trace_id("trace-1".into())
            .with_variables(HashMap::from([("region".to_string(), json!("eu"))]))
            .with_outputs(HashMap::from([
                ("a".to_string(), json!(1)),
                ("b".to_string(), json!({"ok": true})),
            ]));

        let summary = Logger::for_context(&context).log_context_summary(&context);
        assert_eq!(
            summary,
            ContextSummary {
                trace_id: "trace-1".into(),
                outputs: 2,
                variables: 1,
                secrets_enabled: false,
                secrets_loaded: false,
                secret_provider: None,
            }
        );
    }

    #[test]
    fn test_logger_trace_ids() {
        assert_eq!(Logger::with_trace_id("abc").trace_id, "abc");
        assert_ne!(Logger::new().trace_id, Logger::new().trace_id);
    }

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        // 第二次初始化不会 panic，只返回 false
        assert!(!init_tracing());
        assert!(!init_tracing_json());
    }
}
