use crate::error::ExpressionError;
use crate::value::{as_number, loose_eq, number_value, stringify};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// 表达式函数
///
/// 名称不区分大小写；参数已完成求值。
pub trait ExpressionFunction: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, args: &[Value]) -> Result<Value, ExpressionError>;
}

/// 函数注册失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("Function name must not be empty")]
    EmptyName,
}

/// 由闭包构造的函数
pub struct ClosureFunction<F> {
    name: String,
    func: F,
}

impl<F> ClosureFunction<F>
where
    F: Fn(&[Value]) -> Result<Value, ExpressionError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> ExpressionFunction for ClosureFunction<F>
where
    F: Fn(&[Value]) -> Result<Value, ExpressionError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, args: &[Value]) -> Result<Value, ExpressionError> {
        (self.func)(args)
    }
}

/// 函数注册表
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn ExpressionFunction>>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.names();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

impl FunctionRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置 Min/Max/Sum/Avg/Count/Contains 的注册表
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: [Arc<dyn ExpressionFunction>; 6] = [
            Arc::new(Aggregate::new("Min", AggregateKind::Min)),
            Arc::new(Aggregate::new("Max", AggregateKind::Max)),
            Arc::new(Aggregate::new("Sum", AggregateKind::Sum)),
            Arc::new(Aggregate::new("Avg", AggregateKind::Avg)),
            Arc::new(CountFunction),
            Arc::new(ContainsFunction),
        ];
        for function in builtins {
            registry
                .functions
                .insert(function.name().to_lowercase(), function);
        }
        registry
    }

    /// 注册函数，同名（忽略大小写）时覆盖并返回旧函数
    pub fn register(
        &mut self,
        function: Arc<dyn ExpressionFunction>,
    ) -> Result<Option<Arc<dyn ExpressionFunction>>, RegistrationError> {
        let key = function.name().trim().to_lowercase();
        if key.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        tracing::debug!(function = %function.name(), "register expression function");
        Ok(self.functions.insert(key, function))
    }

    /// 移除函数，返回是否存在
    pub fn unregister(&mut self, name: &str) -> bool {
        self.functions
            .remove(&name.trim().to_lowercase())
            .is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExpressionFunction>> {
        self.functions.get(&name.to_lowercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        self.functions
            .values()
            .map(|f| f.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// 展开参数：数组参数与标量参数合并为一个序列
fn flatten(args: &[Value]) -> Vec<&Value> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Value::Array(items) => out.extend(flatten(items)),
            other => out.push(other),
        }
    }
    out
}

#[derive(Debug, Clone, Copy)]
enum AggregateKind {
    Min,
    Max,
    Sum,
    Avg,
}

struct Aggregate {
    name: &'static str,
    kind: AggregateKind,
}

impl Aggregate {
    fn new(name: &'static str, kind: AggregateKind) -> Self {
        Self { name, kind }
    }

    fn numbers(&self, args: &[Value]) -> Result<Vec<f64>, ExpressionError> {
        flatten(args)
            .into_iter()
            .map(|v| {
                as_number(v).ok_or_else(|| {
                    ExpressionError::new(format!(
                        "Function '{}' expects numeric arguments but got '{}'",
                        self.name,
                        stringify(v)
                    ))
                })
            })
            .collect()
    }
}

impl ExpressionFunction for Aggregate {
    fn name(&self) -> &str {
        self.name
    }

    fn evaluate(&self, args: &[Value]) -> Result<Value, ExpressionError> {
        let numbers = self.numbers(args)?;
        if numbers.is_empty() {
            return match self.kind {
                AggregateKind::Sum => number_value(0.0),
                _ => Err(ExpressionError::new(format!(
                    "Function '{}' requires at least one argument",
                    self.name
                ))),
            };
        }

        let result = match self.kind {
            AggregateKind::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
            AggregateKind::Max => {
                numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max)
            }
            AggregateKind::Sum => numbers.iter().sum(),
            AggregateKind::Avg => numbers.iter().sum::<f64>() / numbers.len() as f64,
        };
        number_value(result)
    }
}

struct CountFunction;

impl ExpressionFunction for CountFunction {
    fn name(&self) -> &str {
        "Count"
    }

    fn evaluate(&self, args: &[Value]) -> Result<Value, ExpressionError> {
        Ok(Value::from(flatten(args).len()))
    }
}

struct ContainsFunction;

impl ExpressionFunction for ContainsFunction {
    fn name(&self) -> &str {
        "Contains"
    }

    fn evaluate(&self, args: &[Value]) -> Result<Value, ExpressionError> {
        let [haystack, needle] = args else {
            return Err(ExpressionError::new(format!(
                "Function 'Contains' expects exactly 2 arguments but got {}",
                args.len()
            )));
        };

        let found = match haystack {
            Value::String(text) => text.contains(&stringify(needle)),
            Value::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
            Value::Object(map) => map.contains_key(&stringify(needle)),
            Value::Null => false,
            other => stringify(other).contains(&stringify(needle)),
        };
        Ok(Value::Bool(found))
    }
}
