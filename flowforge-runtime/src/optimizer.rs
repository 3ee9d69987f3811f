//! # 工作流优化服务
//!
//! 计算 DAG 分层与最大宽度，为未设置的并行度与超时补充默认值，
//! 并对依赖列表去重。

use crate::config::RuntimeConfig;
use flowforge_core::{WorkflowDefinition, WorkflowTask};
use std::collections::{HashMap, HashSet};

/// 未做任何修改时的说明文本
pub const NO_CHANGES_EXPLANATION: &str = "No changes required; workflow already optimized.";

/// DAG 分层结果
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DagLevels {
    /// 每层的任务名称，层内保持定义顺序
    pub levels: Vec<Vec<String>>,
    /// 最宽一层的任务数
    pub max_width: usize,
}

/// 优化结果
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizedWorkflow {
    pub definition: WorkflowDefinition,
    pub explanation: String,
}

impl OptimizedWorkflow {
    /// 是否发生了修改
    pub fn changed(&self) -> bool {
        self.explanation != NO_CHANGES_EXPLANATION
    }
}

/// 工作流优化服务
#[derive(Debug, Clone)]
pub struct WorkflowOptimizationService {
    config: RuntimeConfig,
    processor_count: usize,
}

impl Default for WorkflowOptimizationService {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowOptimizationService {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            config,
            processor_count: num_cpus::get(),
        }
    }

    /// 指定逻辑 CPU 数量
    pub fn with_processor_count(mut self, count: usize) -> Self {
        self.processor_count = count;
        self
    }

    pub fn processor_count(&self) -> usize {
        self.processor_count
    }

    /// 按依赖关系分层
    pub fn compute_levels(&self, definition: &WorkflowDefinition) -> DagLevels {
        compute_levels_by(&definition.tasks, |task| {
            task.dependencies.iter().map(String::as_str).collect()
        })
    }

    /// 优化工作流定义，只补充未设置的字段，不覆盖显式配置
    #[tracing::instrument(level = "debug", skip(self, definition), fields(workflow = %definition.name))]
    pub fn optimize(&self, definition: &WorkflowDefinition) -> OptimizedWorkflow {
        let mut optimized = definition.clone();
        let mut changes = Vec::new();

        if optimized.configuration.degree_of_parallelism.is_none() {
            let levels = self.compute_levels(&optimized);
            let degree = self.parallelism_for(levels.max_width);
            optimized.configuration.degree_of_parallelism = Some(degree);
            changes.push(format!(
                "Set degree of parallelism to {degree} based on maximum DAG width {}.",
                levels.max_width
            ));
        }

        if optimized.configuration.timeout_milliseconds.is_none() {
            let timeout = self.config.default_workflow_timeout_ms;
            optimized.configuration.timeout_milliseconds = Some(timeout);
            changes.push(format!("Applied default workflow timeout of {timeout} ms."));
        }

        for task in &mut optimized.tasks {
            if task.timeout_milliseconds.is_none() {
                let timeout = self.config.default_task_timeout_ms;
                task.timeout_milliseconds = Some(timeout);
                changes.push(format!(
                    "Applied default timeout of {timeout} ms to task '{}'.",
                    task.name
                ));
            }
            if dedup_dependencies(task) {
                changes.push(format!(
                    "Removed duplicate dependencies from task '{}'.",
                    task.name
                ));
            }
        }

        let explanation = if changes.is_empty() {
            NO_CHANGES_EXPLANATION.to_string()
        } else {
            changes.join("\n")
        };

        tracing::debug!(
            workflow = %optimized.name,
            changes = changes.len(),
            "工作流优化完成"
        );

        OptimizedWorkflow {
            definition: optimized,
            explanation,
        }
    }

    /// clamp(max_width, min, cpu * factor)
    fn parallelism_for(&self, max_width: usize) -> usize {
        let min = self.config.min_parallelism;
        let upper = (self.processor_count * self.config.parallelism_per_cpu).max(min);
        max_width.clamp(min, upper)
    }
}

/// 依赖去重，保留首次出现的顺序；返回是否有改动
fn dedup_dependencies(task: &mut WorkflowTask) -> bool {
    let before = task.dependencies.len();
    let mut seen = HashSet::new();
    task.dependencies.retain(|d| seen.insert(d.clone()));
    task.dependencies.len() != before
}

/// 通用分层算法
///
/// 层级 = 1 + 可解析前驱的最大层级，没有可解析前驱时为 0。
/// 未知名称视为不存在，遇到环时忽略回边。
pub(crate) fn compute_levels_by<'a, F>(tasks: &'a [WorkflowTask], predecessors: F) -> DagLevels
where
    F: Fn(&'a WorkflowTask) -> Vec<&'a str>,
{
    let index: HashMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();
    let preds: Vec<Vec<usize>> = tasks
        .iter()
        .map(|t| {
            predecessors(t)
                .into_iter()
                .filter_map(|name| index.get(name).copied())
                .collect()
        })
        .collect();

    #[derive(Clone, Copy)]
    enum State {
        Pending,
        Visiting,
        Leveled(usize),
    }

    // 显式栈上的后序遍历：(节点, 下一个待处理前驱的下标)
    let mut states = vec![State::Pending; tasks.len()];
    let mut stack: Vec<(usize, usize)> = Vec::new();
    for start in 0..tasks.len() {
        if !matches!(states[start], State::Pending) {
            continue;
        }
        states[start] = State::Visiting;
        stack.push((start, 0));

        while let Some((node, next)) = stack.last_mut() {
            let node = *node;
            if let Some(&pred) = preds[node].get(*next) {
                *next += 1;
                if matches!(states[pred], State::Pending) {
                    states[pred] = State::Visiting;
                    stack.push((pred, 0));
                }
                continue;
            }

            // 仍处于 Visiting 的前驱是回边，按不存在处理
            let level = preds[node]
                .iter()
                .filter_map(|&pred| match states[pred] {
                    State::Leveled(level) => Some(level + 1),
                    _ => None,
                })
                .max()
                .unwrap_or(0);
            states[node] = State::Leveled(level);
            stack.pop();
        }
    }

    let mut levels: Vec<Vec<String>> = Vec::new();
    for (task, state) in tasks.iter().zip(&states) {
        let level = match state {
            State::Leveled(level) => *level,
            _ => 0,
        };
        if levels.len() <= level {
            levels.resize_with(level + 1, Vec::new);
        }
        levels[level].push(task.name.clone());
    }
    levels.retain(|level| !level.is_empty());

    let max_width = levels.iter().map(Vec::len).max().unwrap_or(0);
    DagLevels { levels, max_width }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(cpus: usize) -> WorkflowOptimizationService {
        WorkflowOptimizationService::new().with_processor_count(cpus)
    }

    fn names(level: &[&str]) -> Vec<String> {
        level.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_long_chain_levels() {
        let mut definition = WorkflowDefinition::new("long").with_task(WorkflowTask::new("t0"));
        for i in 1..100_000 {
            definition = definition.with_task(WorkflowTask::new(format!("t{i}")).depends_on(format!("t{}", i - 1)));
        }
        // 逆序排列，迫使遍历从链尾一路走到链首
        definition.tasks.reverse();

        let levels = service(4).compute_levels(&definition);
        assert_eq!(levels.levels.len(), 100_000);
        assert_eq!(levels.max_width, 1);
        assert_eq!(levels.levels[0], names(&["t0"]));
        assert_eq!(levels.levels[99_999], names(&["t99999"]));
    }

    #[test]
    fn test_diamond_levels() {
        let definition = WorkflowDefinition::new("diamond")
            .with_task(WorkflowTask::new("A"))
            .with_task(WorkflowTask::new("B").depends_on("A"))
            .with_task(WorkflowTask::new("C").depends_on("A"))
            .with_task(WorkflowTask::new("D").depends_on("B").depends_on("C"))
            .with_task(WorkflowTask::new("E"));

        let levels = service(4).compute_levels(&definition);
        assert_eq!(
            levels.levels,
            vec![names(&["A", "E"]), names(&["B", "C"]), names(&["D"])]
        );
        assert_eq!(levels.max_width, 2);
    }

    #[test]
    fn test_unknown_dependency_is_root() {
        let definition = WorkflowDefinition::new("unknown")
            .with_task(WorkflowTask::new("A").depends_on("Ghost"));
        let levels = service(4).compute_levels(&definition);
        assert_eq!(levels.levels, vec![names(&["A"])]);
    }

    #[test]
    fn test_cycles_do_not_recurse_forever() {
        let definition = WorkflowDefinition::new("cycle")
            .with_task(WorkflowTask::new("A").depends_on("B"))
            .with_task(WorkflowTask::new("B").depends_on("A"));
        let levels = service(4).compute_levels(&definition);
        assert_eq!(levels.levels.iter().map(Vec::len).sum::<usize>(), 2);
    }

    #[test]
    fn test_parallelism_is_clamped() {
        let definition = WorkflowDefinition::new("wide")
            .with_task(WorkflowTask::new("A"))
            .with_task(WorkflowTask::new("B"))
            .with_task(WorkflowTask::new("C"));

        for (cpus, expected) in [(1, 2), (8, 3)] {
            let result = service(cpus).optimize(&definition);
            assert_eq!(
                result.definition.configuration.degree_of_parallelism,
                Some(expected)
            );
        }

        let narrow = WorkflowDefinition::new("narrow").with_task(WorkflowTask::new("A"));
        let result = service(8).optimize(&narrow);
        assert_eq!(result.definition.configuration.degree_of_parallelism, Some(2));
    }

    #[test]
    fn test_default_timeouts() {
        let definition = WorkflowDefinition::new("single").with_task(WorkflowTask::new("A"));
        let result = service(4).optimize(&definition);

        assert_eq!(
            result.definition.configuration.timeout_milliseconds,
            Some(1_800_000)
        );
        assert_eq!(result.definition.tasks[0].timeout_milliseconds, Some(120_000));
        assert!(result.changed());
        assert_eq!(
            result.explanation,
            "Set degree of parallelism to 2 based on maximum DAG width 1.\n\
             Applied default workflow timeout of 1800000 ms.\n\
             Applied default timeout of 120000 ms to task 'A'."
        );
        // 输入不被修改
        assert!(definition.configuration.timeout_milliseconds.is_none());
    }

    #[test]
    fn test_dependencies_are_deduplicated() {
        let definition = WorkflowDefinition::new("dups")
            .with_parallelism(2)
            .with_timeout(1000)
            .with_task(WorkflowTask::new("A").with_timeout(10))
            .with_task(WorkflowTask::new("B").with_timeout(10))
            .with_task(
                WorkflowTask::new("C")
                    .with_timeout(10)
                    .depends_on("A")
                    .depends_on("A")
                    .depends_on("B")
                    .depends_on("B"),
            );

        let result = service(4).optimize(&definition);
        assert_eq!(result.definition.tasks[2].dependencies, vec!["A", "B"]);
        assert_eq!(
            result.explanation,
            "Removed duplicate dependencies from task 'C'."
        );
    }

    #[test]
    fn test_already_optimized() {
        let definition = WorkflowDefinition::new("done")
            .with_parallelism(7)
            .with_timeout(5000)
            .with_task(WorkflowTask::new("A").with_timeout(100));

        let result = service(4).optimize(&definition);
        assert_eq!(result.explanation, NO_CHANGES_EXPLANATION);
        assert_eq!(result.definition, definition);
        assert!(!result.changed());
    }
}
