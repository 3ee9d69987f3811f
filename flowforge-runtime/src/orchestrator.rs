//! # 本地编排器
//!
//! 按层执行已存储的工作流定义。层级同时考虑依赖边与分支边；
//! 层内任务受并行度限制并发执行，每个任务有独立的超时与重试。
//! 分支目标只有在至少一个指向它的分支表达式为真时才会执行，
//! 被跳过任务的下游同样被跳过。

use crate::optimizer::compute_levels_by;
use crate::submission::DefinitionStore;
use crate::worker::WorkflowOrchestrator;
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use flowforge_context::{ExecutionContext, SecretFactory};
use flowforge_core::{WorkflowDefinition, WorkflowTask};
use flowforge_expression::{ExpressionParser, FunctionRegistry, PlaceholderReplacer};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 任务处理器：执行单个已完成占位符替换的任务
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run_task(
        &self,
        task: &WorkflowTask,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<Value>;
}

/// 一次执行的报告
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub workflow: String,
    pub user_id: String,
    pub outputs: HashMap<String, Value>,
    /// 按完成顺序（层序，层内为定义顺序）
    pub completed: Vec<String>,
    pub skipped: Vec<String>,
}

/// 本地编排器
pub struct LocalWorkflowOrchestrator {
    store: Arc<dyn DefinitionStore>,
    handler: Arc<dyn TaskHandler>,
    secret_factory: Option<Arc<dyn SecretFactory>>,
    functions: FunctionRegistry,
    reports: DashMap<Uuid, ExecutionReport>,
}

impl LocalWorkflowOrchestrator {
    pub fn new(store: Arc<dyn DefinitionStore>, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            store,
            handler,
            secret_factory: None,
            functions: FunctionRegistry::with_builtins(),
            reports: DashMap::new(),
        }
    }

    pub fn with_secret_factory(mut self, factory: Arc<dyn SecretFactory>) -> Self {
        self.secret_factory = Some(factory);
        self
    }

    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    /// 成功执行的报告
    pub fn report(&self, execution_id: Uuid) -> Option<ExecutionReport> {
        self.reports.get(&execution_id).map(|r| r.value().clone())
    }

    fn new_context(&self, definition: &WorkflowDefinition, execution_id: Uuid) -> ExecutionContext {
        let context = ExecutionContext::new_with_trace_id(execution_id.to_string())
            .with_variables(definition.variables.clone());
        match &self.secret_factory {
            Some(factory) => context.with_secret_factory(factory.as_ref()),
            None => context,
        }
    }

    async fn run_definition(
        &self,
        definition: &WorkflowDefinition,
        mut context: ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<(ExecutionContext, Vec<String>, Vec<String>)> {
        let branch_sources = branch_sources(definition);
        let plan = compute_levels_by(&definition.tasks, |task| {
            let mut preds: Vec<&str> = task.dependencies.iter().map(String::as_str).collect();
            if let Some(sources) = branch_sources.get(task.name.as_str()) {
                preds.extend(sources.iter().copied());
            }
            preds
        });
        let parallelism = definition
            .configuration
            .degree_of_parallelism
            .unwrap_or(1)
            .max(1);
        let semaphore = Arc::new(Semaphore::new(parallelism));

        let mut activated: HashSet<String> = HashSet::new();
        let mut skipped: HashSet<String> = HashSet::new();
        let mut completed = Vec::new();
        let mut skipped_order = Vec::new();

        for (depth, level) in plan.levels.iter().enumerate() {
            if cancel.is_cancelled() {
                anyhow::bail!("Workflow '{}' was canceled", definition.name);
            }

            let mut runnable = Vec::new();
            for name in level {
                let Some(task) = definition.task(name) else {
                    continue;
                };
                let blocked = task.dependencies.iter().any(|d| skipped.contains(d));
                let gated = branch_sources.contains_key(name.as_str()) && !activated.contains(name);
                if blocked || gated {
                    tracing::debug!(task = %name, "跳过任务");
                    skipped.insert(name.clone());
                    skipped_order.push(name.clone());
                } else {
                    runnable.push(task.clone());
                }
            }
            tracing::debug!(level = depth, tasks = runnable.len(), "执行层");

            let mut join_set = JoinSet::new();
            for task in runnable.iter().cloned() {
                let semaphore = semaphore.clone();
                let handler = self.handler.clone();
                let functions = self.functions.clone();
                let snapshot = context.clone();
                let token = cancel.clone();
                join_set.spawn(async move {
                    let name = task.name.clone();
                    let result = async {
                        let _permit = semaphore
                            .acquire_owned()
                            .await
                            .context("Task semaphore closed")?;
                        run_task(handler, functions, snapshot, task, token).await
                    }
                    .await;
                    (name, result)
                });
            }

            let mut results: HashMap<String, Value> = HashMap::new();
            while let Some(joined) = join_set.join_next().await {
                let (name, result) = joined.context("Task panicked or was aborted")?;
                match result {
                    Ok(value) => {
                        results.insert(name, value);
                    }
                    Err(e) => {
                        cancel.cancel();
                        join_set.abort_all();
                        return Err(e.context(format!("Task '{name}' failed")));
                    }
                }
            }

            for task in &runnable {
                if let Some(value) = results.remove(&task.name) {
                    context.set_output(task.name.clone(), value);
                    completed.push(task.name.clone());
                }
            }

            let parser = ExpressionParser::with_functions(context.clone(), self.functions.clone());
            for task in &runnable {
                for branch in &task.conditional_branches {
                    let taken = parser
                        .evaluate_condition(&branch.expression)
                        .await
                        .with_context(|| {
                            format!("Failed to evaluate branch of task '{}'", task.name)
                        })?;
                    tracing::debug!(
                        task = %task.name,
                        target = %branch.target_task_name,
                        taken = taken,
                        "分支求值"
                    );
                    if taken {
                        activated.insert(branch.target_task_name.clone());
                    }
                }
            }
        }

        Ok((context, completed, skipped_order))
    }
}

#[async_trait]
impl WorkflowOrchestrator for LocalWorkflowOrchestrator {
    #[tracing::instrument(skip(self, cancel), fields(workflow = tracing::field::Empty))]
    async fn execute_workflow(
        &self,
        user_id: &str,
        workflow_id: Uuid,
        execution_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<()> {
        let definition = self
            .store
            .get(workflow_id)
            .await?
            .with_context(|| format!("Workflow '{workflow_id}' is not registered"))?;
        tracing::Span::current().record("workflow", definition.name.as_str());

        let context = self.new_context(&definition, execution_id);
        let run_token = cancel.child_token();
        let run = self.run_definition(&definition, context, &run_token);
        let outcome = match definition.configuration.timeout_milliseconds {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    run_token.cancel();
                    anyhow::bail!("Workflow '{}' timed out after {ms} ms", definition.name);
                }
            },
            None => run.await,
        };
        let (context, completed, skipped) = outcome?;

        tracing::info!(
            workflow = %definition.name,
            completed = completed.len(),
            skipped = skipped.len(),
            "工作流执行结束"
        );
        self.reports.insert(
            execution_id,
            ExecutionReport {
                execution_id,
                workflow_id,
                workflow: definition.name.clone(),
                user_id: user_id.to_string(),
                outputs: context.outputs().clone(),
                completed,
                skipped,
            },
        );
        Ok(())
    }
}

/// 分支目标 → 指向它的任务
fn branch_sources(definition: &WorkflowDefinition) -> HashMap<&str, Vec<&str>> {
    let mut sources: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in &definition.tasks {
        for target in task.branch_targets() {
            sources.entry(target).or_default().push(task.name.as_str());
        }
    }
    sources
}

async fn run_task(
    handler: Arc<dyn TaskHandler>,
    functions: FunctionRegistry,
    context: ExecutionContext,
    task: WorkflowTask,
    cancel: CancellationToken,
) -> Result<Value> {
    let parser = ExpressionParser::with_functions(context, functions);
    let resolved = PlaceholderReplacer::new(&parser)
        .replace_task(&task)
        .await
        .with_context(|| format!("Failed to resolve placeholders for task '{}'", task.name))?;

    let (attempts, delay) = retry_plan(&task);
    let timeout = task.timeout_milliseconds.map(Duration::from_millis);
    let mut attempt = 0;
    loop {
        attempt += 1;
        tracing::debug!(task = %task.name, attempt = attempt, "执行任务");
        let call = handler.run_task(&resolved, parser.context(), &cancel);
        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                Err(anyhow::anyhow!(
                    "Task '{}' timed out after {} ms",
                    task.name,
                    limit.as_millis()
                ))
            }),
            None => call.await,
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && !cancel.is_cancelled() => {
                tracing::warn!(task = %task.name, attempt = attempt, error = %e, "任务失败，准备重试");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(e),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// (最大尝试次数, 重试间隔)
#[cfg(feature = "retry")]
fn retry_plan(task: &WorkflowTask) -> (u32, Duration) {
    let policy = &task.error_handling.retry_policy;
    let retries = u32::try_from(policy.max_retries).unwrap_or(0);
    let delay = u64::try_from(policy.delay_milliseconds.unwrap_or(0)).unwrap_or(0);
    (retries.saturating_add(1), Duration::from_millis(delay))
}

#[cfg(not(feature = "retry"))]
fn retry_plan(_task: &WorkflowTask) -> (u32, Duration) {
    (1, Duration::ZERO)
}
