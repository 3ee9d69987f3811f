//! # 工作流校验器
//!
//! 在依赖边与分支边合并而成的有向图上检查结构正确性，
//! 然后检查任务级配置。任一检查失败立即返回。

use flowforge_core::{
    EdgeKind, InvalidConfigurationError, WorkflowDefinition, WorkflowError,
    WorkflowTask,
};
use flowforge_expression::ExpressionParser;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// 校验失败
///
/// 结构性错误与配置错误保持为两种不同的类型。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Configuration(#[from] InvalidConfigurationError),
}

/// 带标签的边
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Edge {
    to: usize,
    kind: EdgeKind,
}

/// 任务依赖图：节点为任务下标，边为依赖或分支
#[derive(Debug)]
struct TaskGraph<'a> {
    names: Vec<&'a str>,
    edges: Vec<Vec<Edge>>,
}

impl<'a> TaskGraph<'a> {
    fn build(definition: &'a WorkflowDefinition) -> Result<Self, WorkflowError> {
        let names: Vec<&str> = definition.tasks.iter().map(|t| t.name.as_str()).collect();
        let index: HashMap<&str, usize> =
            names.iter().enumerate().map(|(i, n)| (*n, i)).collect();

        let mut edges = vec![Vec::new(); names.len()];
        for (from, task) in definition.tasks.iter().enumerate() {
            let targets = task
                .dependencies
                .iter()
                .map(|d| (d.as_str(), EdgeKind::Dependency))
                .chain(task.branch_targets().map(|t| (t, EdgeKind::Branch)));

            for (target, kind) in targets {
                let Some(&to) = index.get(target) else {
                    return Err(WorkflowError::MissingDependencies {
                        workflow: definition.name.clone(),
                        task: task.name.clone(),
                        target: target.to_string(),
                        kind,
                    });
                };
                edges[from].push(Edge { to, kind });
            }
        }

        Ok(Self { names, edges })
    }

    /// 深度优先搜索，搜索栈中再次遇到的节点即构成环
    ///
    /// 使用显式栈，链长不受线程栈大小限制。
    fn find_cycle(&self) -> Option<String> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.names.len()];
        // (节点, 下一条待检查边的下标)
        let mut stack: Vec<(usize, usize)> = Vec::new();
        for start in 0..self.names.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }
            marks[start] = Mark::OnStack;
            stack.push((start, 0));

            while let Some((node, next)) = stack.last_mut() {
                let node = *node;
                let Some(edge) = self.edges[node].get(*next).copied() else {
                    marks[node] = Mark::Done;
                    stack.pop();
                    continue;
                };
                *next += 1;

                match marks[edge.to] {
                    Mark::OnStack => {
                        // 栈中每个节点的下标已越过当前所走的边
                        let path: Vec<(usize, EdgeKind)> = stack
                            .iter()
                            .map(|&(n, i)| (n, self.edges[n][i - 1].kind))
                            .collect();
                        return Some(self.describe_cycle(&path, edge.to));
                    }
                    Mark::Unvisited => {
                        marks[edge.to] = Mark::OnStack;
                        stack.push((edge.to, 0));
                    }
                    Mark::Done => {}
                }
            }
        }
        None
    }

    /// 形如 `A -[dependency]-> C -[branch]-> A`
    fn describe_cycle(&self, path: &[(usize, EdgeKind)], back_to: usize) -> String {
        let start = path
            .iter()
            .position(|(node, _)| *node == back_to)
            .unwrap_or(0);
        let mut text = String::new();
        for (node, kind) in &path[start..] {
            text.push_str(self.names[*node]);
            text.push_str(&format!(" -[{kind}]-> "));
        }
        text.push_str(self.names[back_to]);
        text
    }
}

/// 工作流校验器
#[derive(Debug, Clone, Default)]
pub struct WorkflowValidator;

impl WorkflowValidator {
    pub fn new() -> Self {
        Self
    }

    /// 校验工作流定义
    ///
    /// 检查顺序：任务名唯一 → 引用完整 → 无环 → 任务配置合法。
    /// 表达式语法只做尽力检查，问题仅记录警告。
    #[tracing::instrument(level = "debug", skip(self, definition), fields(workflow = %definition.name, tasks = definition.tasks.len()))]
    pub fn validate(&self, definition: &WorkflowDefinition) -> Result<(), ValidationError> {
        check_unique_names(definition)?;

        let graph = TaskGraph::build(definition)?;
        if let Some(cycle) = graph.find_cycle() {
            return Err(WorkflowError::CyclicDependencies {
                workflow: definition.name.clone(),
                cycle,
            }
            .into());
        }

        for task in &definition.tasks {
            check_task_configuration(task)?;
        }

        for task in &definition.tasks {
            warn_on_syntax_errors(&definition.name, task);
        }

        tracing::debug!(workflow = %definition.name, "工作流校验通过");
        Ok(())
    }
}

fn check_unique_names(definition: &WorkflowDefinition) -> Result<(), WorkflowError> {
    let mut seen = HashSet::new();
    for task in &definition.tasks {
        if !seen.insert(task.name.as_str()) {
            return Err(WorkflowError::DuplicateTaskName {
                workflow: definition.name.clone(),
                task: task.name.clone(),
            });
        }
    }
    Ok(())
}

fn check_task_configuration(task: &WorkflowTask) -> Result<(), InvalidConfigurationError> {
    let policy = &task.error_handling.retry_policy;
    if policy.max_retries < 0 {
        return Err(InvalidConfigurationError::new(
            &task.name,
            format!("maxRetries must not be negative (got {})", policy.max_retries),
        ));
    }
    if let Some(delay) = policy.delay_milliseconds.filter(|d| *d < 0) {
        return Err(InvalidConfigurationError::new(
            &task.name,
            format!("retry delayMilliseconds must not be negative (got {delay})"),
        ));
    }
    Ok(())
}

fn warn_on_syntax_errors(workflow: &str, task: &WorkflowTask) {
    let mut fields: Vec<(&str, &str)> = task
        .conditional_branches
        .iter()
        .map(|b| ("conditionalBranches", b.expression.as_str()))
        .collect();
    if let Some(description) = &task.description {
        fields.push(("description", description.as_str()));
    }
    collect_strings(task.parameters.values(), &mut fields);

    for (field, text) in fields {
        if let Err(e) = ExpressionParser::check_syntax(text) {
            tracing::warn!(
                workflow = %workflow,
                task = %task.name,
                field = field,
                error = %e,
                "表达式语法检查未通过"
            );
        }
    }
}

fn collect_strings<'v>(
    values: impl Iterator<Item = &'v Value>,
    out: &mut Vec<(&'static str, &'v str)>,
) {
    for value in values {
        match value {
            Value::String(s) => out.push(("parameters", s.as_str())),
            Value::Array(items) => collect_strings(items.iter(), out),
            Value::Object(map) => collect_strings(map.values(), out),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> WorkflowDefinition {
        WorkflowDefinition::new("chain")
            .with_task(WorkflowTask::new("A"))
            .with_task(WorkflowTask::new("B").depends_on("A"))
            .with_task(WorkflowTask::new("C").depends_on("B"))
    }

    #[test]
    fn test_linear_chain_is_valid() {
        assert!(WorkflowValidator::new().validate(&chain()).is_ok());
    }

    #[test]
    fn test_long_chain_does_not_exhaust_the_stack() {
        let mut definition = WorkflowDefinition::new("long").with_task(WorkflowTask::new("t0"));
        for i in 1..100_000 {
            definition = definition.with_task(WorkflowTask::new(format!("t{i}")).depends_on(format!("t{}", i - 1)));
        }
        assert!(WorkflowValidator::new().validate(&definition).is_ok());

        // 链尾回指链首
        definition.tasks[0].dependencies.push("t99999".to_string());
        let err = WorkflowValidator::new().validate(&definition).unwrap_err();
        let ValidationError::Workflow(WorkflowError::CyclicDependencies { cycle, .. }) = &err
        else {
            panic!("expected cyclic dependencies, got {err:?}");
        };
        assert!(cycle.starts_with("t0 -[dependency]-> t99999 -[dependency]-> t99998"));
        assert!(cycle.ends_with("t1 -[dependency]-> t0"));
    }

    #[test]
    fn test_three_task_dependency_cycle() {
        let definition = WorkflowDefinition::new("cycle")
            .with_task(WorkflowTask::new("A").depends_on("C"))
            .with_task(WorkflowTask::new("B").depends_on("A"))
            .with_task(WorkflowTask::new("C").depends_on("B"));

        let err = WorkflowValidator::new().validate(&definition).unwrap_err();
        let ValidationError::Workflow(WorkflowError::CyclicDependencies { cycle, .. }) = &err
        else {
            panic!("expected cyclic dependencies, got {err:?}");
        };
        assert_eq!(
            cycle,
            "A -[dependency]-> C -[dependency]-> B -[dependency]-> A"
        );
    }

    #[test]
    fn test_branch_cycle() {
        let definition = WorkflowDefinition::new("branches")
            .with_task(WorkflowTask::new("A").branch("$[true]", "B"))
            .with_task(WorkflowTask::new("B").branch("$[true]", "A"));

        let err = WorkflowValidator::new().validate(&definition).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::Workflow(WorkflowError::CyclicDependencies { .. })
        ));
        assert!(err.to_string().contains("-[branch]->"));
    }

    #[test]
    fn test_mixed_cycle() {
        let definition = WorkflowDefinition::new("mixed")
            .with_task(WorkflowTask::new("A").depends_on("B"))
            .with_task(WorkflowTask::new("B").branch("$[true]", "A"));

        let err = WorkflowValidator::new().validate(&definition).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::Workflow(WorkflowError::CyclicDependencies { .. })
        ));
    }

    #[test]
    fn test_missing_branch_target() {
        let definition = WorkflowDefinition::new("dangling")
            .with_task(WorkflowTask::new("A").branch("$[true]", "Ghost"));

        let err = WorkflowValidator::new().validate(&definition).unwrap_err();
        assert_eq!(
            err,
            ValidationError::Workflow(WorkflowError::MissingDependencies {
                workflow: "dangling".into(),
                task: "A".into(),
                target: "Ghost".into(),
                kind: EdgeKind::Branch,
            })
        );
    }

    #[test]
    fn test_missing_dependency() {
        let definition = WorkflowDefinition::new("dangling")
            .with_task(WorkflowTask::new("A").depends_on("Ghost"));

        let err = WorkflowValidator::new().validate(&definition).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::Workflow(WorkflowError::MissingDependencies {
                kind: EdgeKind::Dependency,
                ..
            })
        ));
    }

    #[test]
    fn test_negative_retries_is_configuration_error() {
        let definition = WorkflowDefinition::new("retries")
            .with_task(WorkflowTask::new("A").with_max_retries(-1));

        let err = WorkflowValidator::new().validate(&definition).unwrap_err();
        let ValidationError::Configuration(inner) = &err else {
            panic!("expected configuration error, got {err:?}");
        };
        assert_eq!(inner.task, "A");
    }

    #[test]
    fn test_negative_delay_is_configuration_error() {
        let mut task = WorkflowTask::new("A");
        task.error_handling.retry_policy.delay_milliseconds = Some(-5);
        let definition = WorkflowDefinition::new("delay").with_task(task);

        assert!(matches!(
            WorkflowValidator::new().validate(&definition),
            Err(ValidationError::Configuration(_))
        ));
    }

    #[test]
    fn test_duplicate_task_names() {
        let definition = WorkflowDefinition::new("dup")
            .with_task(WorkflowTask::new("A"))
            .with_task(WorkflowTask::new("A"));

        assert!(matches!(
            WorkflowValidator::new().validate(&definition),
            Err(ValidationError::Workflow(WorkflowError::DuplicateTaskName { .. }))
        ));
    }

    #[test]
    fn test_bad_expression_syntax_only_warns() {
        let definition = WorkflowDefinition::new("syntax")
            .with_task(WorkflowTask::new("A").branch("$[Outputs('x'", "B"))
            .with_task(WorkflowTask::new("B"));

        assert!(WorkflowValidator::new().validate(&definition).is_ok());
    }
}
