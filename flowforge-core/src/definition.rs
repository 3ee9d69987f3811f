//! # FlowForge Core - 工作流定义
//!
//! 工作流、任务、条件分支以及错误处理策略的数据结构

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// 工作流定义
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// 工作流名称
    #[serde(default)]
    pub name: String,
    /// 工作流描述
    #[serde(default)]
    pub description: String,
    /// 工作流级变量（单次运行期间不变）
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    /// 执行配置
    #[serde(default)]
    pub configuration: WorkflowConfiguration,
    /// 任务列表（保持声明顺序）
    #[serde(default)]
    pub tasks: Vec<WorkflowTask>,
}

/// 工作流执行配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConfiguration {
    /// 最大并行度
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degree_of_parallelism: Option<usize>,
    /// 工作流整体超时（毫秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_milliseconds: Option<u64>,
}

/// 任务定义
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTask {
    /// 任务名称（唯一键）
    pub name: String,
    /// 任务描述，可包含 `$[...]` 表达式
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// 依赖的任务名称列表
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// 条件分支
    #[serde(default)]
    pub conditional_branches: Vec<ConditionalBranch>,
    /// 任务超时（毫秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_milliseconds: Option<u64>,
    /// 任务参数，字符串叶子节点可包含 `$[...]` 表达式
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    /// 错误处理策略
    #[serde(default)]
    pub error_handling: ErrorHandling,
}

/// 条件分支：表达式为真时路由到目标任务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalBranch {
    /// 运行时求值的条件表达式
    pub expression: String,
    /// 目标任务名称
    pub target_task_name: String,
}

/// 错误处理策略
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorHandling {
    /// 重试策略
    #[serde(default)]
    pub retry_policy: RetryPolicy,
}

/// 重试策略
///
/// `max_retries` 保留符号，负数由校验器拒绝。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// 最大重试次数
    #[serde(default)]
    pub max_retries: i32,
    /// 重试延迟（毫秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_milliseconds: Option<i64>,
}

impl WorkflowDefinition {
    /// 创建新的工作流定义
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 添加任务
    pub fn with_task(mut self, task: WorkflowTask) -> Self {
        self.tasks.push(task);
        self
    }

    /// 设置变量
    pub fn with_variable(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// 设置并行度
    pub fn with_parallelism(mut self, degree: usize) -> Self {
        self.configuration.degree_of_parallelism = Some(degree);
        self
    }

    /// 设置整体超时
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.configuration.timeout_milliseconds = Some(timeout_ms);
        self
    }

    /// 按名称查找任务
    pub fn task(&self, name: &str) -> Option<&WorkflowTask> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// 是否包含指定任务
    pub fn contains_task(&self, name: &str) -> bool {
        self.task(name).is_some()
    }
}

impl WorkflowTask {
    /// 创建新的任务
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 添加依赖
    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    /// 添加条件分支
    pub fn branch(
        mut self,
        expression: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.conditional_branches.push(ConditionalBranch {
            expression: expression.into(),
            target_task_name: target.into(),
        });
        self
    }

    /// 设置超时
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_milliseconds = Some(timeout_ms);
        self
    }

    /// 设置描述
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// 设置参数
    pub fn with_parameter(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// 设置最大重试次数
    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.error_handling.retry_policy.max_retries = max_retries;
        self
    }

    /// 条件分支目标名称
    pub fn branch_targets(&self) -> impl Iterator<Item = &str> {
        self.conditional_branches
            .iter()
            .map(|b| b.target_task_name.as_str())
    }
}
