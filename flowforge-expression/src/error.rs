use thiserror::Error;

/// 表达式求值错误
///
/// 语法错误与语义错误统一为一种错误，仅通过消息区分。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExpressionError {
    message: String,
}

impl ExpressionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn invalid(source: &str) -> Self {
        Self::new(format!("Invalid expression: {}", source.trim()))
    }

    pub(crate) fn unbalanced_brackets(source: &str) -> Self {
        Self::new(format!("Unbalanced brackets in expression: {source}"))
    }

    pub(crate) fn unbalanced_parentheses(source: &str) -> Self {
        Self::new(format!("Unbalanced parentheses in expression: {source}"))
    }
}
