//! # FlowForge Context
//!
//! 单次执行的上下文：任务输出、工作流变量以及按需拉取的密钥缓存

mod secrets;

pub use secrets::{Secret, SecretCache, SecretFactory, SecretProvider};

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// 执行上下文
///
/// 一个上下文对应一次工作流执行；`outputs` 随任务完成而增长，
/// `variables` 在整个运行期间保持不变。
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub trace_id: String,
    outputs: HashMap<String, Value>,
    variables: HashMap<String, Value>,
    secrets: SecretCache,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new_with_trace_id(Uuid::new_v4().to_string())
    }
}

impl ExecutionContext {
    pub fn new_with_trace_id(trace_id: String) -> Self {
        Self {
            trace_id,
            outputs: HashMap::new(),
            variables: HashMap::new(),
            secrets: SecretCache::disabled(),
        }
    }

    /// 使用工作流变量创建上下文
    pub fn with_variables(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    /// 使用已有的任务输出创建上下文
    pub fn with_outputs(mut self, outputs: HashMap<String, Value>) -> Self {
        self.outputs = outputs;
        self
    }

    /// 绑定密钥提供者
    pub fn with_secret_provider(mut self, provider: Arc<dyn SecretProvider>) -> Self {
        self.secrets = SecretCache::new(provider);
        self
    }

    /// 通过工厂获取默认密钥提供者；工厂未提供时保持禁用
    pub fn with_secret_factory(mut self, factory: &dyn SecretFactory) -> Self {
        self.secrets = match factory.default_provider() {
            Some(provider) => SecretCache::new(provider),
            None => SecretCache::disabled(),
        };
        self
    }

    pub fn set_output(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        tracing::debug!(trace_id = %self.trace_id, key = %key, "set output");
        self.outputs.insert(key, value);
    }

    pub fn output(&self, key: &str) -> Option<&Value> {
        self.outputs.get(key)
    }

    pub fn outputs(&self) -> &HashMap<String, Value> {
        &self.outputs
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    pub fn variable(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.variables
    }

    pub fn secrets(&self) -> &SecretCache {
        &self.secrets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outputs_grow_and_variables_are_kept() {
        let mut variables = HashMap::new();
        variables.insert("threshold".to_string(), json!(70));

        let mut ctx = ExecutionContext::new_with_trace_id("trace-1".into())
            .with_variables(variables);
        assert!(ctx.outputs().is_empty());

        ctx.set_output("score", json!(85));
        ctx.set_output("grade", json!("A"));

        assert_eq!(ctx.output("score"), Some(&json!(85)));
        assert_eq!(ctx.outputs().len(), 2);
        assert_eq!(ctx.variable("threshold"), Some(&json!(70)));
        assert_eq!(ctx.trace_id, "trace-1");
    }

    #[test]
    fn test_default_context_has_no_secret_provider() {
        let ctx = ExecutionContext::default();
        assert!(!ctx.secrets().is_enabled());
        assert!(!ctx.trace_id.is_empty());
    }
}
