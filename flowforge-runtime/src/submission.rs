//! # 工作流提交
//!
//! 校验 → 优化 → 存储 → 入队。校验失败的定义不会被存储或入队。

use crate::execution_queue::{ExecutionRequest, WorkflowExecutionQueue};
use crate::optimizer::WorkflowOptimizationService;
use crate::validator::{ValidationError, WorkflowValidator};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use flowforge_core::WorkflowDefinition;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// 工作流定义存储
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn save(&self, workflow_id: Uuid, definition: Arc<WorkflowDefinition>) -> Result<()>;

    async fn get(&self, workflow_id: Uuid) -> Result<Option<Arc<WorkflowDefinition>>>;
}

/// 内存定义存储
#[derive(Debug, Clone, Default)]
pub struct InMemoryDefinitionStore {
    definitions: Arc<DashMap<Uuid, Arc<WorkflowDefinition>>>,
}

impl InMemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitionStore {
    async fn save(&self, workflow_id: Uuid, definition: Arc<WorkflowDefinition>) -> Result<()> {
        self.definitions.insert(workflow_id, definition);
        Ok(())
    }

    async fn get(&self, workflow_id: Uuid) -> Result<Option<Arc<WorkflowDefinition>>> {
        Ok(self.definitions.get(&workflow_id).map(|d| d.value().clone()))
    }
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to store workflow definition: {0:#}")]
    Storage(anyhow::Error),

    #[error("Workflow '{0}' is not registered")]
    UnknownWorkflow(Uuid),

    #[error("Failed to enqueue workflow execution: {0:#}")]
    Enqueue(anyhow::Error),
}

/// 已注册的工作流
#[derive(Debug, Clone)]
pub struct RegisteredWorkflow {
    pub workflow_id: Uuid,
    pub definition: Arc<WorkflowDefinition>,
    pub explanation: String,
}

/// 一次提交的结果
#[derive(Debug, Clone)]
pub struct Submission {
    pub workflow: RegisteredWorkflow,
    pub execution_id: Uuid,
}

/// 工作流提交服务
#[derive(Clone)]
pub struct WorkflowSubmissionService {
    validator: WorkflowValidator,
    optimizer: WorkflowOptimizationService,
    store: Arc<dyn DefinitionStore>,
    queue: Arc<dyn WorkflowExecutionQueue>,
}

impl WorkflowSubmissionService {
    pub fn new(store: Arc<dyn DefinitionStore>, queue: Arc<dyn WorkflowExecutionQueue>) -> Self {
        Self {
            validator: WorkflowValidator::new(),
            optimizer: WorkflowOptimizationService::new(),
            store,
            queue,
        }
    }

    pub fn with_optimizer(mut self, optimizer: WorkflowOptimizationService) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// 校验、优化并存储，不入队
    #[tracing::instrument(level = "debug", skip(self, definition), fields(workflow = %definition.name))]
    pub async fn register(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<RegisteredWorkflow, SubmissionError> {
        self.validator.validate(definition)?;
        let optimized = self.optimizer.optimize(definition);

        let workflow_id = Uuid::new_v4();
        let definition = Arc::new(optimized.definition);
        self.store
            .save(workflow_id, definition.clone())
            .await
            .map_err(SubmissionError::Storage)?;

        tracing::info!(workflow = %definition.name, workflow_id = %workflow_id, "工作流已注册");
        Ok(RegisteredWorkflow {
            workflow_id,
            definition,
            explanation: optimized.explanation,
        })
    }

    /// 注册并立即提交一次执行
    pub async fn submit(
        &self,
        definition: &WorkflowDefinition,
        user_id: &str,
    ) -> Result<Submission, SubmissionError> {
        let workflow = self.register(definition).await?;
        let execution_id = self.enqueue(workflow.workflow_id, user_id).await?;
        Ok(Submission {
            workflow,
            execution_id,
        })
    }

    /// 为已注册的工作流提交一次执行
    pub async fn trigger(&self, workflow_id: Uuid, user_id: &str) -> Result<Uuid, SubmissionError> {
        let known = self
            .store
            .get(workflow_id)
            .await
            .map_err(SubmissionError::Storage)?;
        if known.is_none() {
            return Err(SubmissionError::UnknownWorkflow(workflow_id));
        }
        self.enqueue(workflow_id, user_id).await
    }

    async fn enqueue(&self, workflow_id: Uuid, user_id: &str) -> Result<Uuid, SubmissionError> {
        let request = ExecutionRequest::new(workflow_id, user_id);
        let execution_id = request.execution_id;
        self.queue
            .enqueue(request)
            .await
            .map_err(SubmissionError::Enqueue)?;
        tracing::info!(workflow_id = %workflow_id, execution_id = %execution_id, "执行请求已提交");
        Ok(execution_id)
    }
}
