//! # 工作流执行队列
//!
//! 执行请求的生命周期：Pending → Dequeued → Completed | Failed | Canceled，
//! 每个请求恰好经历一次终态转换。

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 执行请求
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub user_id: String,
    pub cancel: CancellationToken,
}

impl ExecutionRequest {
    pub fn new(workflow_id: Uuid, user_id: impl Into<String>) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            workflow_id,
            user_id: user_id.into(),
            cancel: CancellationToken::new(),
        }
    }
}

/// 执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    Pending,
    Dequeued,
    Completed,
    Failed,
    Canceled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

/// 执行队列接口
#[async_trait]
pub trait WorkflowExecutionQueue: Send + Sync {
    /// 提交执行请求
    async fn enqueue(&self, request: ExecutionRequest) -> Result<()>;

    /// 按 FIFO 顺序持续产出请求，`cancel` 取消后结束
    fn dequeue_all(&self, cancel: CancellationToken) -> BoxStream<'static, ExecutionRequest>;

    /// 标记执行成功
    async fn complete(&self, execution_id: Uuid) -> Result<()>;

    /// 标记执行失败
    async fn fail(&self, execution_id: Uuid, reason: &str) -> Result<()>;
}

#[derive(Debug)]
struct ExecutionRecord {
    status: ExecutionStatus,
    cancel: CancellationToken,
    failure: Option<String>,
}

struct InMemoryInner {
    sender: mpsc::UnboundedSender<ExecutionRequest>,
    receiver: Mutex<mpsc::UnboundedReceiver<ExecutionRequest>>,
    records: DashMap<Uuid, ExecutionRecord>,
}

impl InMemoryInner {
    /// 出队时转换状态；已取消的请求被跳过
    fn mark_dequeued(&self, request: &ExecutionRequest) -> bool {
        let Some(mut record) = self.records.get_mut(&request.execution_id) else {
            return false;
        };
        if record.status != ExecutionStatus::Pending {
            return false;
        }
        if request.cancel.is_cancelled() {
            record.status = ExecutionStatus::Canceled;
            tracing::debug!(execution_id = %request.execution_id, "跳过已取消的执行请求");
            return false;
        }
        record.status = ExecutionStatus::Dequeued;
        true
    }

    fn finish(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        failure: Option<String>,
    ) -> Result<()> {
        let mut record = self
            .records
            .get_mut(&execution_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown execution '{execution_id}'"))?;
        if record.status != ExecutionStatus::Dequeued {
            anyhow::bail!(
                "Execution '{execution_id}' cannot transition from {:?} to {status:?}",
                record.status
            );
        }
        record.status = status;
        record.failure = failure;
        Ok(())
    }
}

/// 内存执行队列
#[derive(Clone)]
pub struct InMemoryExecutionQueue {
    inner: Arc<InMemoryInner>,
}

impl Default for InMemoryExecutionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryExecutionQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(InMemoryInner {
                sender,
                receiver: Mutex::new(receiver),
                records: DashMap::new(),
            }),
        }
    }

    pub fn status(&self, execution_id: Uuid) -> Option<ExecutionStatus> {
        self.inner.records.get(&execution_id).map(|r| r.status)
    }

    pub fn failure_reason(&self, execution_id: Uuid) -> Option<String> {
        self.inner
            .records
            .get(&execution_id)
            .and_then(|r| r.failure.clone())
    }

    /// 取消执行：未出队的请求直接进入 Canceled，已出队的请求收到取消信号
    pub fn cancel(&self, execution_id: Uuid) -> bool {
        let Some(mut record) = self.inner.records.get_mut(&execution_id) else {
            return false;
        };
        match record.status {
            ExecutionStatus::Pending => {
                record.status = ExecutionStatus::Canceled;
                record.cancel.cancel();
                true
            }
            ExecutionStatus::Dequeued => {
                record.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn len_with_status(&self, status: ExecutionStatus) -> usize {
        self.inner
            .records
            .iter()
            .filter(|r| r.status == status)
            .count()
    }
}

#[async_trait]
impl WorkflowExecutionQueue for InMemoryExecutionQueue {
    async fn enqueue(&self, request: ExecutionRequest) -> Result<()> {
        let execution_id = request.execution_id;
        if self.inner.records.contains_key(&execution_id) {
            anyhow::bail!("Execution '{execution_id}' was already enqueued");
        }
        self.inner.records.insert(
            execution_id,
            ExecutionRecord {
                status: ExecutionStatus::Pending,
                cancel: request.cancel.clone(),
                failure: None,
            },
        );
        if self.inner.sender.send(request).is_err() {
            self.inner.records.remove(&execution_id);
            anyhow::bail!("Execution queue is closed");
        }
        tracing::debug!(execution_id = %execution_id, "执行请求已入队");
        Ok(())
    }

    fn dequeue_all(&self, cancel: CancellationToken) -> BoxStream<'static, ExecutionRequest> {
        let inner = self.inner.clone();
        stream::unfold((inner, cancel), |(inner, cancel)| async move {
            loop {
                let next = {
                    let mut receiver = inner.receiver.lock().await;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        request = receiver.recv() => request,
                    }
                };
                let request = next?;
                if inner.mark_dequeued(&request) {
                    return Some((request, (inner, cancel)));
                }
            }
        })
        .boxed()
    }

    async fn complete(&self, execution_id: Uuid) -> Result<()> {
        self.inner
            .finish(execution_id, ExecutionStatus::Completed, None)
    }

    async fn fail(&self, execution_id: Uuid, reason: &str) -> Result<()> {
        let canceled = self
            .inner
            .records
            .get(&execution_id)
            .is_some_and(|r| r.cancel.is_cancelled());
        let status = if canceled {
            ExecutionStatus::Canceled
        } else {
            ExecutionStatus::Failed
        };
        self.inner
            .finish(execution_id, status, Some(reason.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_and_lifecycle() {
        let queue = InMemoryExecutionQueue::new();
        let first = ExecutionRequest::new(Uuid::new_v4(), "alice");
        let second = ExecutionRequest::new(Uuid::new_v4(), "bob");
        queue.enqueue(first.clone()).await.unwrap();
        queue.enqueue(second.clone()).await.unwrap();
        assert_eq!(queue.status(first.execution_id), Some(ExecutionStatus::Pending));

        let mut stream = queue.dequeue_all(CancellationToken::new());
        let got = stream.next().await.unwrap();
        assert_eq!(got.execution_id, first.execution_id);
        assert_eq!(queue.status(first.execution_id), Some(ExecutionStatus::Dequeued));
        assert_eq!(stream.next().await.unwrap().execution_id, second.execution_id);

        queue.complete(first.execution_id).await.unwrap();
        queue.fail(second.execution_id, "boom").await.unwrap();
        assert_eq!(queue.status(first.execution_id), Some(ExecutionStatus::Completed));
        assert_eq!(queue.status(second.execution_id), Some(ExecutionStatus::Failed));
        assert_eq!(queue.failure_reason(second.execution_id).as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_terminal_transition_happens_once() {
        let queue = InMemoryExecutionQueue::new();
        let request = ExecutionRequest::new(Uuid::new_v4(), "alice");
        queue.enqueue(request.clone()).await.unwrap();

        // 未出队前不能完成
        assert!(queue.complete(request.execution_id).await.is_err());

        let mut stream = queue.dequeue_all(CancellationToken::new());
        stream.next().await.unwrap();
        queue.complete(request.execution_id).await.unwrap();
        assert!(queue.complete(request.execution_id).await.is_err());
        assert!(queue.fail(request.execution_id, "late").await.is_err());
        assert!(queue.enqueue(request).await.is_err());
    }

    #[tokio::test]
    async fn test_canceled_requests_are_skipped() {
        let queue = InMemoryExecutionQueue::new();
        let canceled = ExecutionRequest::new(Uuid::new_v4(), "alice");
        let kept = ExecutionRequest::new(Uuid::new_v4(), "alice");
        queue.enqueue(canceled.clone()).await.unwrap();
        queue.enqueue(kept.clone()).await.unwrap();
        assert!(queue.cancel(canceled.execution_id));

        let mut stream = queue.dequeue_all(CancellationToken::new());
        assert_eq!(stream.next().await.unwrap().execution_id, kept.execution_id);
        assert_eq!(
            queue.status(canceled.execution_id),
            Some(ExecutionStatus::Canceled)
        );
    }

    #[tokio::test]
    async fn test_stream_ends_on_cancel() {
        let queue = InMemoryExecutionQueue::new();
        let cancel = CancellationToken::new();
        let mut stream = queue.dequeue_all(cancel.clone());
        cancel.cancel();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_fail_after_cancel_is_recorded_as_canceled() {
        let queue = InMemoryExecutionQueue::new();
        let request = ExecutionRequest::new(Uuid::new_v4(), "alice");
        queue.enqueue(request.clone()).await.unwrap();
        let mut stream = queue.dequeue_all(CancellationToken::new());
        stream.next().await.unwrap();

        assert!(queue.cancel(request.execution_id));
        queue.fail(request.execution_id, "canceled").await.unwrap();
        assert_eq!(
            queue.status(request.execution_id),
            Some(ExecutionStatus::Canceled)
        );
    }
}
