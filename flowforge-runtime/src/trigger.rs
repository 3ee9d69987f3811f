//! # 触发器
//!
//! `TriggerProcessingService` 按固定周期运行所有触发处理器，
//! 每个周期有独立的 tracing span，处理器出错只记录日志。

use crate::config::RuntimeConfig;
use crate::execution_queue::{ExecutionRequest, WorkflowExecutionQueue};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// 触发处理器接口
#[async_trait]
pub trait TriggerProcessor: Send + Sync {
    fn name(&self) -> &str;

    /// 检查到期的触发器并提交执行请求，返回提交数量
    async fn process_triggers(
        &self,
        queue: &dyn WorkflowExecutionQueue,
        cancel: &CancellationToken,
    ) -> Result<usize>;
}

/// 固定间隔调度
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSchedule {
    pub workflow_id: Uuid,
    pub user_id: String,
    pub interval: Duration,
    next_run: Instant,
}

impl TimeSchedule {
    /// 立即到期，此后每隔 `interval` 触发一次
    pub fn every(workflow_id: Uuid, user_id: impl Into<String>, interval: Duration) -> Self {
        Self {
            workflow_id,
            user_id: user_id.into(),
            interval,
            next_run: Instant::now(),
        }
    }

    pub fn starting_at(mut self, at: Instant) -> Self {
        self.next_run = at;
        self
    }

    pub fn next_run(&self) -> Instant {
        self.next_run
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_run <= now
    }

    /// 推进到下一个晚于 `now` 的时刻，错过的周期不补发
    fn advance(&mut self, now: Instant) {
        if self.interval.is_zero() {
            self.next_run = now;
            return;
        }
        if self.next_run > now {
            return;
        }
        let missed = now.duration_since(self.next_run).as_nanos() / self.interval.as_nanos() + 1;
        let step = self.interval.as_nanos().saturating_mul(missed);
        let step = Duration::from_nanos(u64::try_from(step).unwrap_or(u64::MAX));
        if let Some(next) = self.next_run.checked_add(step) {
            self.next_run = next;
        }
    }
}

/// 基于时间的触发处理器
#[derive(Debug, Default)]
pub struct TimeBasedTriggerProcessor {
    schedules: Mutex<Vec<TimeSchedule>>,
}

impl TimeBasedTriggerProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schedule(mut self, schedule: TimeSchedule) -> Self {
        self.schedules.get_mut().push(schedule);
        self
    }

    pub async fn add_schedule(&self, schedule: TimeSchedule) {
        self.schedules.lock().await.push(schedule);
    }

    /// 移除某个工作流的全部调度，返回移除数量
    pub async fn remove_schedules(&self, workflow_id: Uuid) -> usize {
        let mut schedules = self.schedules.lock().await;
        let before = schedules.len();
        schedules.retain(|s| s.workflow_id != workflow_id);
        before - schedules.len()
    }

    pub async fn schedules(&self) -> Vec<TimeSchedule> {
        self.schedules.lock().await.clone()
    }
}

#[async_trait]
impl TriggerProcessor for TimeBasedTriggerProcessor {
    fn name(&self) -> &str {
        "time-based"
    }

    async fn process_triggers(
        &self,
        queue: &dyn WorkflowExecutionQueue,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let now = Instant::now();
        let mut schedules = self.schedules.lock().await;
        let mut fired = 0;
        for schedule in schedules.iter_mut().filter(|s| s.is_due(now)) {
            if cancel.is_cancelled() {
                break;
            }
            let request = ExecutionRequest::new(schedule.workflow_id, schedule.user_id.clone());
            tracing::debug!(
                workflow_id = %schedule.workflow_id,
                execution_id = %request.execution_id,
                "定时触发工作流"
            );
            queue.enqueue(request).await?;
            schedule.advance(now);
            fired += 1;
        }
        Ok(fired)
    }
}

/// 触发处理服务
#[derive(Clone)]
pub struct TriggerProcessingService {
    processors: Vec<Arc<dyn TriggerProcessor>>,
    queue: Arc<dyn WorkflowExecutionQueue>,
    interval: Duration,
}

impl TriggerProcessingService {
    pub fn new(queue: Arc<dyn WorkflowExecutionQueue>) -> Self {
        Self::with_config(queue, &RuntimeConfig::default())
    }

    pub fn with_config(queue: Arc<dyn WorkflowExecutionQueue>, config: &RuntimeConfig) -> Self {
        Self {
            processors: Vec::new(),
            queue,
            interval: config.trigger_interval_duration(),
        }
    }

    pub fn with_processor(mut self, processor: Arc<dyn TriggerProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// 周期运行，直到 `shutdown` 被取消
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "触发服务已启动");

        let mut cycle: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            cycle += 1;
            let span = tracing::info_span!("trigger_cycle", cycle = cycle);
            self.run_once(&shutdown).instrument(span).await;
        }

        tracing::info!(cycles = cycle, "触发服务已停止");
        Ok(())
    }

    /// 运行一个周期，返回提交的请求总数
    pub async fn run_once(&self, cancel: &CancellationToken) -> usize {
        let mut total = 0;
        for processor in &self.processors {
            match processor.process_triggers(self.queue.as_ref(), cancel).await {
                Ok(count) => {
                    tracing::debug!(processor = processor.name(), fired = count, "触发处理完成");
                    total += count;
                }
                Err(e) => {
                    tracing::error!(processor = processor.name(), error = %e, "触发处理失败");
                }
            }
        }
        total
    }
}
