use anyhow::Result;
use async_trait::async_trait;
use flowforge::prelude::*;
use flowforge::runtime::ExecutionStatus;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct CountingVault {
    calls: AtomicUsize,
}

#[async_trait]
impl SecretProvider for CountingVault {
    fn name(&self) -> &str {
        "vault"
    }

    async fn get_secrets(&self) -> Result<Vec<Secret>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Secret::new("ApiKey", "s3cr3t")])
    }
}

struct VaultFactory(Arc<CountingVault>);

impl SecretFactory for VaultFactory {
    fn default_provider(&self) -> Option<Arc<dyn SecretProvider>> {
        Some(self.0.clone())
    }
}

/// 记录收到的已解析任务；名称以 `fail` 开头的任务总是失败
#[derive(Default)]
struct RecordingHandler {
    seen: Mutex<Vec<WorkflowTask>>,
}

#[async_trait]
impl TaskHandler for RecordingHandler {
    async fn run_task(
        &self,
        task: &WorkflowTask,
        _context: &ExecutionContext,
        _cancel: &CancellationToken,
    ) -> Result<Value> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(task.clone());
        }
        if task.name.starts_with("fail") {
            anyhow::bail!("handler rejected '{}'", task.name);
        }
        Ok(Value::Object(task.parameters.clone()))
    }
}

struct Pipeline {
    queue: InMemoryExecutionQueue,
    submission: WorkflowSubmissionService,
    orchestrator: Arc<LocalWorkflowOrchestrator>,
    shutdown: CancellationToken,
    worker: tokio::task::JoinHandle<Result<()>>,
}

impl Pipeline {
    fn start(handler: Arc<RecordingHandler>, vault: Arc<CountingVault>) -> Self {
        let store = InMemoryDefinitionStore::new();
        let queue = InMemoryExecutionQueue::new();
        let orchestrator = Arc::new(
            LocalWorkflowOrchestrator::new(Arc::new(store.clone()), handler)
                .with_secret_factory(Arc::new(VaultFactory(vault))),
        );
        let submission =
            WorkflowSubmissionService::new(Arc::new(store), Arc::new(queue.clone()));
        let shutdown = CancellationToken::new();
        let worker = WorkflowExecutionWorker::new(Arc::new(queue.clone()), orchestrator.clone())
            .spawn(shutdown.clone());
        Self {
            queue,
            submission,
            orchestrator,
            shutdown,
            worker,
        }
    }

    async fn wait(&self, execution_id: Uuid) -> ExecutionStatus {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match self.queue.status(execution_id) {
                    Some(status) if status.is_terminal() => return status,
                    _ => tokio::time::sleep(Duration::from_millis(5)).await,
                }
            }
        })
        .await
        .expect("execution timed out")
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.worker.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_secrets_are_resolved_once_per_execution() {
    let handler = Arc::new(RecordingHandler::default());
    let vault = Arc::new(CountingVault {
        calls: AtomicUsize::new(0),
    });
    let pipeline = Pipeline::start(handler.clone(), vault.clone());

    let definition = WorkflowDefinition::new("secrets")
        .with_task(WorkflowTask::new("login").with_parameter("token", "$[Secrets('apikey')]"))
        .with_task(
            WorkflowTask::new("call")
                .depends_on("login")
                .with_parameter("header", "Bearer $[Secrets('ApiKey')]")
                .with_description("reuses $[Outputs('login').token]"),
        );

    let submitted = pipeline.submission.submit(&definition, "alice").await.unwrap();
    assert_eq!(
        pipeline.wait(submitted.execution_id).await,
        ExecutionStatus::Completed
    );

    let report = pipeline.orchestrator.report(submitted.execution_id).unwrap();
    assert_eq!(report.outputs["login"], json!({"token": "s3cr3t"}));
    assert_eq!(report.outputs["call"], json!({"header": "Bearer s3cr3t"}));
    assert_eq!(vault.calls.load(Ordering::SeqCst), 1);

    let seen = handler.seen.lock().unwrap().clone();
    let call = seen.iter().find(|t| t.name == "call").unwrap();
    assert_eq!(call.description.as_deref(), Some("reuses s3cr3t"));

    pipeline.stop().await;
}

#[tokio::test]
async fn test_failed_execution_does_not_stop_the_worker() {
    let handler = Arc::new(RecordingHandler::default());
    let vault = Arc::new(CountingVault {
        calls: AtomicUsize::new(0),
    });
    let pipeline = Pipeline::start(handler, vault.clone());

    let broken = WorkflowDefinition::new("broken")
        .with_task(WorkflowTask::new("fail-fast"))
        .with_task(WorkflowTask::new("after").depends_on("fail-fast"));
    let healthy = WorkflowDefinition::new("healthy")
        .with_task(WorkflowTask::new("only").with_parameter("value", 1));

    let first = pipeline.submission.submit(&broken, "alice").await.unwrap();
    let second = pipeline.submission.submit(&healthy, "alice").await.unwrap();

    assert_eq!(pipeline.wait(first.execution_id).await, ExecutionStatus::Failed);
    assert_eq!(
        pipeline.wait(second.execution_id).await,
        ExecutionStatus::Completed
    );
    let reason = pipeline.queue.failure_reason(first.execution_id).unwrap();
    assert!(reason.contains("fail-fast"));
    assert!(pipeline.orchestrator.report(first.execution_id).is_none());
    // 没有任务引用密钥，提供者不会被调用
    assert_eq!(vault.calls.load(Ordering::SeqCst), 0);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_invalid_workflow_is_rejected_before_queueing() {
    let pipeline = Pipeline::start(
        Arc::new(RecordingHandler::default()),
        Arc::new(CountingVault {
            calls: AtomicUsize::new(0),
        }),
    );
    let definition = WorkflowDefinition::new("dangling")
        .with_task(WorkflowTask::new("a").branch("$[true]", "nowhere"));

    let err = pipeline
        .submission
        .submit(&definition, "alice")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("nowhere"));
    assert_eq!(pipeline.queue.len_with_status(ExecutionStatus::Pending), 0);

    pipeline.stop().await;
}
