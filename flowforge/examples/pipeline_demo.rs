use async_trait::async_trait;
use flowforge::logger::{init_tracing, Logger};
use flowforge::prelude::*;
use flowforge::runtime::{ExecutionStatus, TimeSchedule, TimeBasedTriggerProcessor};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const WORKFLOW_YAML: &str = r#"
name: nightly-report
description: Fetch orders, total them and publish when the total is large enough
variables:
  region: eu-west
  threshold: 100
tasks:
  - name: fetch
    parameters:
      source: "orders-$[Variables('region')]"
  - name: total
    dependencies: [fetch]
    parameters:
      sum: "$[Sum(Outputs('fetch').amounts)]"
    conditionalBranches:
      - expression: "$[Outputs('total').sum >= Variables('threshold')]"
        targetTaskName: publish
      - expression: "$[Outputs('total').sum < Variables('threshold')]"
        targetTaskName: archive
  - name: publish
    description: "Publishing $[Outputs('total').sum] for $[Variables('region')]"
    errorHandling:
      retryPolicy:
        maxRetries: 2
        delayMilliseconds: 50
  - name: archive
"#;

/// 模拟任务执行：fetch 返回订单金额，其余任务回显参数
struct DemoHandler;

#[async_trait]
impl TaskHandler for DemoHandler {
    async fn run_task(
        &self,
        task: &WorkflowTask,
        _context: &ExecutionContext,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<Value> {
        println!(
            "  running '{}' {}",
            task.name,
            task.description.as_deref().unwrap_or("")
        );
        Ok(match task.name.as_str() {
            "fetch" => json!({ "amounts": [40, 35, 60] }),
            _ => Value::Object(task.parameters.clone()),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    println!("=== FlowForge Pipeline Demo ===\n");

    let definition = DefinitionLoader::from_yaml_str(WORKFLOW_YAML)?;

    let store = InMemoryDefinitionStore::new();
    let queue = InMemoryExecutionQueue::new();
    let orchestrator = Arc::new(LocalWorkflowOrchestrator::new(
        Arc::new(store.clone()),
        Arc::new(DemoHandler),
    ));

    // 1. 校验 + 优化 + 存储
    let submission = WorkflowSubmissionService::new(Arc::new(store.clone()), Arc::new(queue.clone()));
    let registered = submission.register(&definition).await?;
    println!("1. Registered '{}':", registered.definition.name);
    for line in registered.explanation.lines() {
        println!("   - {line}");
    }

    // 2. 启动 worker 与触发服务
    let shutdown = CancellationToken::new();
    let worker = WorkflowExecutionWorker::new(Arc::new(queue.clone()), orchestrator.clone())
        .spawn(shutdown.clone());

    let triggers = TimeBasedTriggerProcessor::new().with_schedule(TimeSchedule::every(
        registered.workflow_id,
        "scheduler",
        Duration::from_secs(3600),
    ));
    let config = RuntimeConfig::default().trigger_interval(Duration::from_millis(200));
    let trigger_service = TriggerProcessingService::with_config(Arc::new(queue.clone()), &config)
        .with_processor(Arc::new(triggers))
        .spawn(shutdown.clone());

    // 3. 手动提交一次执行
    let execution_id = submission.trigger(registered.workflow_id, "demo-user").await?;
    println!("\n2. Submitted execution {execution_id}");

    while !queue.status(execution_id).is_some_and(|s| s.is_terminal()) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    println!("\n3. Execution finished: {:?}", queue.status(execution_id));
    if queue.status(execution_id) == Some(ExecutionStatus::Failed) {
        println!("   reason: {:?}", queue.failure_reason(execution_id));
    }

    if let Some(report) = orchestrator.report(execution_id) {
        println!("   completed: {:?}", report.completed);
        println!("   skipped:   {:?}", report.skipped);
        let context = ExecutionContext::new_with_trace_id(execution_id.to_string())
            .with_outputs(report.outputs.clone());
        Logger::for_context(&context).log_context_summary(&context);
    }

    shutdown.cancel();
    worker.await??;
    trigger_service.await??;

    println!("\n=== Demo Completed ===");
    Ok(())
}
