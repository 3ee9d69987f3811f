//! # FlowForge Core
//!
//! 工作流定义模型、结构性错误以及定义加载器

mod definition;
mod error;
mod loader;

pub use definition::*;
pub use error::*;
pub use loader::*;

#[cfg(test)]
mod tests;

/// Prelude module for core functionality
pub mod prelude {
    pub use crate::{
        ConditionalBranch, DefinitionLoader, ErrorHandling,
        InvalidConfigurationError, RetryPolicy, WorkflowConfiguration,
        WorkflowDefinition, WorkflowError, WorkflowTask,
    };
}
