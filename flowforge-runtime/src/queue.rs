//! # 作业队列
//!
//! 无界 FIFO 队列 + 单消费者服务。每个作业在入队时登记一个完成槽，
//! 消费者执行完成后按作业自身的 id 写入结果。
//! 无人取走的结果保留 `completed_job_ttl_ms` 后由消费者循环清除，
//! 之后再调用 `get_job_result` 返回 `UnknownJob`。

use crate::config::RuntimeConfig;
use anyhow::{Context, Result};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type JobId = Uuid;

/// 作业执行单元
pub type WorkUnit =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<Value>> + Send>;

/// 作业失败原因
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Job '{0}' is not known to the queue")]
    UnknownJob(JobId),

    #[error("Job '{0}' was canceled")]
    Canceled(JobId),

    #[error("Job '{id}' failed: {message}")]
    Faulted { id: JobId, message: String },

    #[error("Job queue is closed")]
    QueueClosed,
}

pub type JobResult = std::result::Result<Value, JobError>;

struct QueuedJob {
    id: JobId,
    unit: WorkUnit,
}

struct QueueInner {
    sender: mpsc::UnboundedSender<QueuedJob>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<QueuedJob>>>,
    slots: DashMap<JobId, watch::Sender<Option<JobResult>>>,
    /// 已写入结果的作业，按完成时间排序
    resolved: Mutex<VecDeque<(JobId, Instant)>>,
    paused: AtomicBool,
}

/// 作业队列
///
/// 克隆出的句柄共享同一个队列。
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("tracked_jobs", &self.tracked_jobs())
            .field("paused", &self.is_paused())
            .finish()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(QueueInner {
                sender,
                receiver: Mutex::new(Some(receiver)),
                slots: DashMap::new(),
                resolved: Mutex::new(VecDeque::new()),
                paused: AtomicBool::new(false),
            }),
        }
    }

    /// 入队作业，返回作业 id
    pub fn enqueue<F, Fut>(&self, work: F) -> std::result::Result<JobId, JobError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let (slot, _) = watch::channel(None);
        self.inner.slots.insert(id, slot);

        let unit: WorkUnit = Box::new(move |token| work(token).boxed());
        if self.inner.sender.send(QueuedJob { id, unit }).is_err() {
            self.inner.slots.remove(&id);
            return Err(JobError::QueueClosed);
        }

        tracing::debug!(job_id = %id, "作业已入队");
        Ok(id)
    }

    /// 等待作业结果
    ///
    /// 未知 id 立即失败；结果被取走后该 id 不再被跟踪。
    pub async fn get_job_result(&self, id: JobId) -> JobResult {
        let mut receiver = match self.inner.slots.get(&id) {
            Some(slot) => slot.subscribe(),
            None => return Err(JobError::UnknownJob(id)),
        };

        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone().unwrap_or(Err(JobError::QueueClosed)),
            Err(_) => Err(JobError::QueueClosed),
        };
        self.inner.slots.remove(&id);
        outcome
    }

    /// 作业是否仍在等待结果
    pub fn is_pending(&self, id: JobId) -> bool {
        self.inner
            .slots
            .get(&id)
            .is_some_and(|slot| slot.borrow().is_none())
    }

    /// 当前仍被跟踪（未完成或结果未取走）的作业数
    pub fn tracked_jobs(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<QueuedJob>> {
        self.inner.receiver.lock().ok()?.take()
    }

    /// 写入作业结果；已完成的槽不会被覆盖
    fn resolve(&self, id: JobId, outcome: JobResult) {
        let written = match self.inner.slots.get(&id) {
            Some(slot) => slot.send_if_modified(|current| {
                if current.is_some() {
                    return false;
                }
                *current = Some(outcome);
                true
            }),
            None => false,
        };
        if written {
            self.mark_resolved(id);
        }
    }

    fn mark_resolved(&self, id: JobId) {
        if let Ok(mut resolved) = self.inner.resolved.lock() {
            resolved.push_back((id, Instant::now()));
        }
    }

    /// 清除保留超过 `ttl` 且无人等待的结果，返回清除数量
    fn evict_expired(&self, ttl: Duration) -> usize {
        let Ok(mut resolved) = self.inner.resolved.lock() else {
            return 0;
        };
        let now = Instant::now();
        let mut evicted = 0;
        while let Some(&(id, at)) = resolved.front() {
            if now.duration_since(at) < ttl {
                break;
            }
            resolved.pop_front();
            let removed = self
                .inner
                .slots
                .remove_if(&id, |_, slot| slot.receiver_count() == 0);
            if removed.is_some() {
                evicted += 1;
            }
        }
        evicted
    }

    /// 取消所有尚未完成的作业
    fn cancel_pending(&self) -> usize {
        let mut canceled = 0;
        let mut canceled_ids = Vec::new();
        for entry in self.inner.slots.iter() {
            let id = *entry.key();
            let changed = entry.value().send_if_modified(|current| {
                if current.is_some() {
                    return false;
                }
                *current = Some(Err(JobError::Canceled(id)));
                true
            });
            if changed {
                canceled += 1;
                canceled_ids.push(id);
            }
        }
        for id in canceled_ids {
            self.mark_resolved(id);
        }
        canceled
    }
}

/// 作业队列服务：单消费者循环
pub struct JobQueueService {
    queue: JobQueue,
    pause_poll_interval: Duration,
    completed_job_ttl: Duration,
}

impl JobQueueService {
    pub fn new(queue: JobQueue) -> Self {
        Self::with_config(queue, &RuntimeConfig::default())
    }

    pub fn with_config(queue: JobQueue, config: &RuntimeConfig) -> Self {
        Self {
            queue,
            pause_poll_interval: config.pause_poll_duration(),
            completed_job_ttl: config.completed_job_ttl_duration(),
        }
    }

    /// 在后台任务中运行
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// 运行消费循环，直到 `shutdown` 被取消
    ///
    /// 每个队列只能有一个消费者。
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut receiver = self
            .queue
            .take_receiver()
            .context("Job queue already has a consumer")?;
        tracing::info!("作业队列服务已启动");

        let mut sweep = tokio::time::interval(self.completed_job_ttl.max(Duration::from_millis(1)));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        'consume: loop {
            while self.queue.is_paused() {
                tokio::select! {
                    _ = shutdown.cancelled() => break 'consume,
                    _ = tokio::time::sleep(self.pause_poll_interval) => {}
                }
            }

            let job = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = sweep.tick() => {
                    let evicted = self.queue.evict_expired(self.completed_job_ttl);
                    if evicted > 0 {
                        tracing::debug!(evicted = evicted, "已清除过期的作业结果");
                    }
                    continue;
                }
                job = receiver.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            self.execute(job, &shutdown).await;
        }

        receiver.close();
        while let Ok(job) = receiver.try_recv() {
            self.queue.resolve(job.id, Err(JobError::Canceled(job.id)));
        }
        let canceled = self.queue.cancel_pending();
        tracing::info!(canceled = canceled, "作业队列服务已停止");
        Ok(())
    }

    async fn execute(&self, job: QueuedJob, shutdown: &CancellationToken) {
        let QueuedJob { id, unit } = job;
        let token = shutdown.child_token();
        let unit_token = token.clone();
        let run = AssertUnwindSafe(async move { unit(unit_token).await }).catch_unwind();

        tracing::debug!(job_id = %id, "开始执行作业");
        let outcome = tokio::select! {
            result = run => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(_)) if token.is_cancelled() => Err(JobError::Canceled(id)),
                Ok(Err(e)) => Err(JobError::Faulted { id, message: format!("{e:#}") }),
                Err(panic) => Err(JobError::Faulted { id, message: panic_message(panic.as_ref()) }),
            },
            _ = shutdown.cancelled() => Err(JobError::Canceled(id)),
        };

        match &outcome {
            Ok(_) => tracing::debug!(job_id = %id, "作业完成"),
            Err(JobError::Canceled(_)) => tracing::info!(job_id = %id, "作业已取消"),
            Err(e) => tracing::warn!(job_id = %id, error = %e, "作业失败"),
        }
        self.queue.resolve(id, outcome);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
