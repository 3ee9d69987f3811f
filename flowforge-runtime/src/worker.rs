//! # 工作流执行 Worker
//!
//! 从执行队列中逐个取出请求，交给编排器执行，并按请求 id 回报结果。

use crate::execution_queue::{ExecutionRequest, WorkflowExecutionQueue};
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 工作流编排器接口
#[async_trait]
pub trait WorkflowOrchestrator: Send + Sync {
    async fn execute_workflow(
        &self,
        user_id: &str,
        workflow_id: Uuid,
        execution_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// 执行 Worker
#[derive(Clone)]
pub struct WorkflowExecutionWorker {
    queue: Arc<dyn WorkflowExecutionQueue>,
    orchestrator: Arc<dyn WorkflowOrchestrator>,
}

impl WorkflowExecutionWorker {
    pub fn new(
        queue: Arc<dyn WorkflowExecutionQueue>,
        orchestrator: Arc<dyn WorkflowOrchestrator>,
    ) -> Self {
        Self {
            queue,
            orchestrator,
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// 持续处理请求直到 `shutdown` 被取消；单个工作流失败不会中断循环
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!("执行 Worker 已启动");
        let mut requests = self.queue.dequeue_all(shutdown.clone());
        let mut processed = 0usize;
        while let Some(request) = requests.next().await {
            self.process(request, &shutdown).await;
            processed += 1;
        }
        tracing::info!(processed = processed, "执行 Worker 已停止");
        Ok(())
    }

    #[tracing::instrument(
        name = "workflow_execution",
        skip(self, request, shutdown),
        fields(
            execution_id = %request.execution_id,
            workflow_id = %request.workflow_id,
            user_id = %request.user_id,
        )
    )]
    async fn process(&self, request: ExecutionRequest, shutdown: &CancellationToken) {
        let ExecutionRequest {
            execution_id,
            workflow_id,
            user_id,
            cancel,
        } = request;

        let run = self.orchestrator.execute_workflow(
            &user_id,
            workflow_id,
            execution_id,
            cancel.clone(),
        );
        let result = tokio::select! {
            result = run => result,
            _ = shutdown.cancelled() => {
                cancel.cancel();
                Err(anyhow::anyhow!("Worker shut down before the execution finished"))
            }
        };

        let reported = match result {
            Ok(()) => {
                tracing::info!("工作流执行完成");
                self.queue.complete(execution_id).await
            }
            Err(e) => {
                let reason = format!("{e:#}");
                tracing::error!(error = %reason, "工作流执行失败");
                self.queue.fail(execution_id, &reason).await
            }
        };
        if let Err(e) = reported {
            tracing::warn!(error = %e, "无法回报执行结果");
        }
    }
}
