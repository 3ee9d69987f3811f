//! 运行时配置

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 运行时配置
///
/// 所有字段都有默认值，配置文件中只需写出需要覆盖的部分。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// 触发器轮询间隔（毫秒）
    pub trigger_interval_ms: u64,
    /// 队列暂停时的轮询间隔（毫秒）
    pub pause_poll_interval_ms: u64,
    /// 无人取走的作业结果保留时长（毫秒）
    pub completed_job_ttl_ms: u64,
    /// 默认工作流超时（毫秒）
    pub default_workflow_timeout_ms: u64,
    /// 默认任务超时（毫秒）
    pub default_task_timeout_ms: u64,
    /// 并行度下限
    pub min_parallelism: usize,
    /// 每个逻辑 CPU 允许的并行度
    pub parallelism_per_cpu: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trigger_interval_ms: 30_000,
            pause_poll_interval_ms: 100,
            completed_job_ttl_ms: 5 * 60 * 1000,
            default_workflow_timeout_ms: 30 * 60 * 1000,
            default_task_timeout_ms: 2 * 60 * 1000,
            min_parallelism: 2,
            parallelism_per_cpu: 2,
        }
    }
}

impl RuntimeConfig {
    /// 从 YAML 字符串加载
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse runtime config YAML")
    }

    /// 从 JSON 字符串加载
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse runtime config JSON")
    }

    /// 从文件加载，`.json` 按 JSON 解析，其余按 YAML 解析
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
        .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn trigger_interval(mut self, interval: Duration) -> Self {
        self.trigger_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn pause_poll_interval(mut self, interval: Duration) -> Self {
        self.pause_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn completed_job_ttl(mut self, ttl: Duration) -> Self {
        self.completed_job_ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn default_workflow_timeout(mut self, timeout: Duration) -> Self {
        self.default_workflow_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn default_task_timeout(mut self, timeout: Duration) -> Self {
        self.default_task_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn min_parallelism(mut self, min: usize) -> Self {
        self.min_parallelism = min;
        self
    }

    pub fn parallelism_per_cpu(mut self, factor: usize) -> Self {
        self.parallelism_per_cpu = factor;
        self
    }

    pub fn trigger_interval_duration(&self) -> Duration {
        Duration::from_millis(self.trigger_interval_ms)
    }

    pub fn pause_poll_duration(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms)
    }

    pub fn completed_job_ttl_duration(&self) -> Duration {
        Duration::from_millis(self.completed_job_ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.trigger_interval_ms, 30_000);
        assert_eq!(config.default_workflow_timeout_ms, 1_800_000);
        assert_eq!(config.default_task_timeout_ms, 120_000);
        assert_eq!(config.min_parallelism, 2);
        assert_eq!(config.completed_job_ttl_duration(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = RuntimeConfig::from_yaml_str("trigger_interval_ms: 500\n").unwrap();
        assert_eq!(config.trigger_interval_ms, 500);
        assert_eq!(config.pause_poll_interval_ms, 100);
    }

    #[test]
    fn test_json_and_builders() {
        let config =
            RuntimeConfig::from_json_str(r#"{"min_parallelism": 4}"#).unwrap();
        assert_eq!(config.min_parallelism, 4);

        let config = RuntimeConfig::default()
            .trigger_interval(Duration::from_secs(1))
            .parallelism_per_cpu(3);
        assert_eq!(config.trigger_interval_duration(), Duration::from_secs(1));
        assert_eq!(config.parallelism_per_cpu, 3);
    }

    #[test]
    fn test_invalid_yaml_has_context() {
        let err = RuntimeConfig::from_yaml_str("trigger_interval_ms: [").unwrap_err();
        assert!(err.to_string().contains("runtime config YAML"));
    }
}
