//! # FlowForge - Async Workflow Orchestration Engine
//!
//! Workflows are task DAGs whose fields may embed `$[...]` expressions that
//! resolve prior task outputs, workflow variables and secrets. Definitions are
//! validated, optimized and executed asynchronously through a queue/worker
//! pipeline driven by triggers.
//!
//! ## Features
//!
//! - `expression` (default): the `$[...]` expression language
//! - `runtime` (default): validation, optimization, intent synthesis and queued execution
//! - `logger` (default): tracing subscriber setup and context summaries
//! - `retry` (default): honour task retry policies in the local orchestrator
//!
//! ## Quick Start
//!
//! ```rust
//! use flowforge::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let definition = WorkflowDefinition::new("hello")
//!         .with_task(WorkflowTask::new("fetch"))
//!         .with_task(WorkflowTask::new("report").depends_on("fetch"));
//!
//!     WorkflowValidator::new().validate(&definition)?;
//!     let optimized = WorkflowOptimizationService::new().optimize(&definition);
//!     println!("{}", optimized.explanation);
//!
//!     let parser = ExpressionParser::new(ExecutionContext::default());
//!     assert_eq!(parser.parse("$[1 + 2]").await?, serde_json::json!(3.0));
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

// Re-export core functionality
pub use flowforge_context as context;
pub use flowforge_core::*;

#[cfg(feature = "expression")]
#[cfg_attr(docsrs, doc(cfg(feature = "expression")))]
pub use flowforge_expression as expression;

#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
pub use flowforge_runtime as runtime;

#[cfg(feature = "logger")]
#[cfg_attr(docsrs, doc(cfg(feature = "logger")))]
pub use flowforge_logger as logger;

/// Prelude module for easy imports
pub mod prelude {
    pub use flowforge_context::{ExecutionContext, Secret, SecretFactory, SecretProvider};
    pub use flowforge_core::prelude::*;

    #[cfg(feature = "expression")]
    #[cfg_attr(docsrs, doc(cfg(feature = "expression")))]
    pub use flowforge_expression::prelude::*;

    #[cfg(feature = "runtime")]
    #[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
    pub use flowforge_runtime::prelude::*;

    #[cfg(feature = "logger")]
    #[cfg_attr(docsrs, doc(cfg(feature = "logger")))]
    pub use flowforge_logger::Logger;
}
