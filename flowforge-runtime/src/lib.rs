//! # FlowForge Runtime
//!
//! 工作流的校验、优化、意图合成以及基于队列的异步执行：
//! 作业队列、执行 Worker、触发服务、提交服务和本地编排器

mod config;
mod execution_queue;
mod intent;
mod optimizer;
mod orchestrator;
mod queue;
mod submission;
mod trigger;
mod validator;
mod worker;


pub use config::RuntimeConfig;
pub use execution_queue::{
    ExecutionRequest, ExecutionStatus, InMemoryExecutionQueue, WorkflowExecutionQueue,
};
pub use intent::{
    AiProvider, SynthesisResult, WorkflowIntentService, FALLBACK_PLAN, FALLBACK_WORKFLOW_NAME,
};
pub use optimizer::{DagLevels, OptimizedWorkflow, WorkflowOptimizationService, NO_CHANGES_EXPLANATION};
pub use orchestrator::{ExecutionReport, LocalWorkflowOrchestrator, TaskHandler};
pub use queue::{JobError, JobId, JobQueue, JobQueueService, JobResult, WorkUnit};
pub use submission::{
    DefinitionStore, InMemoryDefinitionStore, RegisteredWorkflow, Submission, SubmissionError,
    WorkflowSubmissionService,
};
pub use trigger::{TimeBasedTriggerProcessor, TimeSchedule, TriggerProcessingService, TriggerProcessor};
pub use validator::{ValidationError, WorkflowValidator};
pub use worker::{WorkflowExecutionWorker, WorkflowOrchestrator};

/// Prelude module for runtime functionality
pub mod prelude {
    pub use crate::{
        ExecutionRequest, InMemoryDefinitionStore, InMemoryExecutionQueue, JobQueue,
        JobQueueService, LocalWorkflowOrchestrator, RuntimeConfig, TaskHandler,
        TriggerProcessingService, WorkflowExecutionQueue, WorkflowExecutionWorker,
        WorkflowIntentService, WorkflowOptimizationService, WorkflowOrchestrator,
        WorkflowSubmissionService, WorkflowValidator,
    };
}
