use crate::ast::{BinaryOp, Expr, PathSegment, ResolverKind, UnaryOp};
use crate::error::ExpressionError;
use crate::functions::{ExpressionFunction, FunctionRegistry, RegistrationError};
use crate::parser::{parse_template, Segment, Template};
use crate::path::PathAccessor;
use crate::value::{as_number, is_truthy, loose_eq, number_value, stringify};
use flowforge_context::ExecutionContext;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

/// 表达式解析器
///
/// 一个实例对应一个执行上下文，密钥在首次需要时拉取一次。
#[derive(Debug, Clone)]
pub struct ExpressionParser {
    context: ExecutionContext,
    functions: FunctionRegistry,
}

impl ExpressionParser {
    /// 创建带内置函数的解析器
    pub fn new(context: ExecutionContext) -> Self {
        Self::with_functions(context, FunctionRegistry::with_builtins())
    }

    /// 使用指定函数注册表创建解析器
    pub fn with_functions(
        context: ExecutionContext,
        functions: FunctionRegistry,
    ) -> Self {
        Self { context, functions }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ExecutionContext {
        &mut self.context
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// 注册或覆盖函数（名称不区分大小写）
    pub fn register_function(
        &mut self,
        function: Arc<dyn ExpressionFunction>,
    ) -> Result<(), RegistrationError> {
        self.functions.register(function).map(|_| ())
    }

    /// 移除函数，返回是否存在
    pub fn unregister_function(&mut self, name: &str) -> bool {
        self.functions.unregister(name)
    }

    /// 仅做语法检查，不求值
    pub fn check_syntax(input: &str) -> Result<(), ExpressionError> {
        parse_template(input).map(|_| ())
    }

    /// 解析并求值输入
    ///
    /// - 不含 `$[` 的输入原样返回
    /// - 整个输入恰好是一个 span 时返回原始类型的值
    /// - 否则每个 span 的结果以文本形式内联替换
    pub async fn parse(&self, input: &str) -> Result<Value, ExpressionError> {
        let template = parse_template(input)?;
        if template.references_secrets() {
            self.load_secrets().await?;
        }
        self.render(input, &template)
    }

    /// 求值并按真值规则转换为布尔
    pub async fn evaluate_condition(&self, input: &str) -> Result<bool, ExpressionError> {
        let value = self.parse(input).await?;
        Ok(is_truthy(&value))
    }

    /// 拉取密钥（只会发生一次）
    pub(crate) async fn load_secrets(&self) -> Result<(), ExpressionError> {
        let cache = self.context.secrets();
        if let Err(e) = cache.load().await {
            let provider = cache.provider_name().unwrap_or("unknown");
            tracing::warn!(
                trace_id = %self.context.trace_id,
                provider = %provider,
                error = %e,
                "secret provider failed"
            );
            return Err(ExpressionError::new(format!(
                "Failed to load secrets from provider '{provider}': {e}"
            )));
        }
        Ok(())
    }

    /// 在密钥已就绪的前提下同步求值
    pub(crate) fn render(
        &self,
        input: &str,
        template: &Template,
    ) -> Result<Value, ExpressionError> {
        if !template.has_spans() {
            return Ok(Value::String(input.to_string()));
        }

        if template.whole_span {
            if let Some((source, expr)) = template.segments.iter().find_map(|s| match s {
                Segment::Span { source, expr } => Some((source, expr)),
                Segment::Text(_) => None,
            }) {
                return self.eval(expr, source);
            }
        }

        let mut out = String::with_capacity(input.len());
        for segment in &template.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Span { source, expr } => {
                    out.push_str(&stringify(&self.eval(expr, source)?))
                }
            }
        }
        Ok(Value::String(out))
    }

    fn eval(&self, expr: &Expr, source: &str) -> Result<Value, ExpressionError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Resolver { kind, key } => {
                let key = stringify(&self.eval(key, source)?);
                self.resolve(*kind, &key, source)
            }
            Expr::Call { name, args } => {
                let function = self
                    .functions
                    .get(name)
                    .ok_or_else(|| ExpressionError::invalid(source))?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, source))
                    .collect::<Result<Vec<_>, _>>()?;
                function.evaluate(&args)
            }
            Expr::Path { target, segments } => {
                let mut current = self.eval(target, source)?;
                for segment in segments {
                    current = match segment {
                        PathSegment::Property(name) => {
                            current.try_get_property(name).unwrap_or(Value::Null)
                        }
                        PathSegment::Index(index) => match literal_index(index) {
                            Some(i) => current.try_get_index(i).unwrap_or(Value::Null),
                            None => Value::Null,
                        },
                    };
                }
                Ok(current)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, source)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!is_truthy(&value))),
                    UnaryOp::Negate => match as_number(&value) {
                        Some(n) => number_value(-n),
                        None => Err(ExpressionError::new(format!(
                            "Cannot negate non-numeric value '{}' in expression: {}",
                            stringify(&value),
                            source.trim()
                        ))),
                    },
                }
            }
            Expr::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, source),
            Expr::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                if is_truthy(&self.eval(condition, source)?) {
                    self.eval(then_branch, source)
                } else {
                    self.eval(else_branch, source)
                }
            }
        }
    }

    fn resolve(
        &self,
        kind: ResolverKind,
        key: &str,
        source: &str,
    ) -> Result<Value, ExpressionError> {
        let found = match kind {
            ResolverKind::Outputs => self.context.output(key).cloned(),
            ResolverKind::Variables => self.context.variable(key).cloned(),
            ResolverKind::Secrets => {
                let secrets = self.context.secrets();
                let Some(provider) = secrets.provider_name() else {
                    return Err(ExpressionError::invalid(source));
                };
                return secrets
                    .lookup(key)
                    .map(|s| Value::String(s.value.clone()))
                    .ok_or_else(|| {
                        ExpressionError::new(format!(
                            "Secret '{key}' not found in secret provider '{provider}'"
                        ))
                    });
            }
        };
        found.ok_or_else(|| {
            ExpressionError::new(format!("{}('{key}') not found", kind.name()))
        })
    }

    fn binary(
        &self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        source: &str,
    ) -> Result<Value, ExpressionError> {
        let left = self.eval(lhs, source)?;

        // 逻辑运算短路
        match op {
            BinaryOp::And if !is_truthy(&left) => return Ok(Value::Bool(false)),
            BinaryOp::Or if is_truthy(&left) => return Ok(Value::Bool(true)),
            _ => {}
        }

        let right = self.eval(rhs, source)?;

        match op {
            BinaryOp::And | BinaryOp::Or => Ok(Value::Bool(is_truthy(&right))),
            BinaryOp::Equal => Ok(Value::Bool(loose_eq(&left, &right))),
            BinaryOp::NotEqual => Ok(Value::Bool(!loose_eq(&left, &right))),
            BinaryOp::Greater
            | BinaryOp::GreaterOrEqual
            | BinaryOp::Less
            | BinaryOp::LessOrEqual => {
                let ordering = compare(&left, &right).ok_or_else(|| {
                    operand_error(op, &left, &right, source)
                })?;
                let result = match op {
                    BinaryOp::Greater => ordering == Ordering::Greater,
                    BinaryOp::GreaterOrEqual => ordering != Ordering::Less,
                    BinaryOp::Less => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                };
                Ok(Value::Bool(result))
            }
            BinaryOp::Add => match (as_number(&left), as_number(&right)) {
                (Some(a), Some(b)) => number_value(a + b),
                _ if left.is_string() || right.is_string() => Ok(Value::String(
                    format!("{}{}", stringify(&left), stringify(&right)),
                )),
                _ => Err(operand_error(op, &left, &right, source)),
            },
            BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide => {
                let (Some(a), Some(b)) = (as_number(&left), as_number(&right)) else {
                    return Err(operand_error(op, &left, &right, source));
                };
                match op {
                    BinaryOp::Subtract => number_value(a - b),
                    BinaryOp::Multiply => number_value(a * b),
                    _ if b == 0.0 => Err(ExpressionError::new(format!(
                        "Division by zero in expression: {}",
                        source.trim()
                    ))),
                    _ => number_value(a / b),
                }
            }
        }
    }
}

/// 只有整数字面量才作为下标，其余一律返回 `None`
fn literal_index(index: &Expr) -> Option<usize> {
    match index {
        Expr::Literal(Value::Number(n)) => n.as_u64().and_then(|i| usize::try_from(i).ok()),
        _ => None,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (as_number(left), as_number(right)) {
        return a.partial_cmp(&b);
    }
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn operand_error(op: BinaryOp, left: &Value, right: &Value, source: &str) -> ExpressionError {
    ExpressionError::new(format!(
        "Operator '{}' cannot be applied to '{}' and '{}' in expression: {}",
        op.symbol(),
        stringify(left),
        stringify(right),
        source.trim()
    ))
}
