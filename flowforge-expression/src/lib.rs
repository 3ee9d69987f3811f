//! # FlowForge Expression
//!
//! `$[...]` 表达式语言：词法分析、递归下降解析、求值以及占位符替换

mod ast;
mod error;
mod evaluator;
mod functions;
mod lexer;
mod parser;
mod path;
mod placeholder;
mod value;

pub use ast::{BinaryOp, Expr, PathSegment, ResolverKind, UnaryOp};
pub use error::ExpressionError;
pub use evaluator::ExpressionParser;
pub use functions::{
    ClosureFunction, ExpressionFunction, FunctionRegistry, RegistrationError,
};
pub use path::PathAccessor;
pub use placeholder::PlaceholderReplacer;
pub use value::{is_truthy, stringify};

/// Prelude module for expression functionality
pub mod prelude {
    pub use crate::{
        ExpressionError, ExpressionFunction, ExpressionParser,
        FunctionRegistry, PathAccessor, PlaceholderReplacer,
    };
}
