use thiserror::Error;

/// 工作流结构性错误（依赖图层面）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    /// 依赖图或分支图中存在环
    #[error("Workflow '{workflow}' has cyclic dependencies: {cycle}")]
    CyclicDependencies { workflow: String, cycle: String },

    /// 引用了不存在的任务
    #[error(
        "Workflow '{workflow}' has missing dependencies: task '{task}' references unknown {kind} target '{target}'"
    )]
    MissingDependencies {
        workflow: String,
        task: String,
        target: String,
        kind: EdgeKind,
    },

    /// 任务名称重复
    #[error("Workflow '{workflow}' declares task '{task}' more than once")]
    DuplicateTaskName { workflow: String, task: String },
}

/// 任务级配置错误，与结构性错误刻意区分
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid configuration for task '{task}': {reason}")]
pub struct InvalidConfigurationError {
    pub task: String,
    pub reason: String,
}

impl InvalidConfigurationError {
    pub fn new(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            reason: reason.into(),
        }
    }
}

/// 依赖图中的边类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// 声明的依赖
    Dependency,
    /// 条件分支目标
    Branch,
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeKind::Dependency => write!(f, "dependency"),
            EdgeKind::Branch => write!(f, "branch"),
        }
    }
}
