use crate::error::ExpressionError;
use crate::evaluator::ExpressionParser;
use crate::parser::{parse_template, Template};
use flowforge_core::WorkflowTask;
use serde_json::{Map, Value};

/// 占位符替换器
///
/// 解析任务的 `description` 以及 `parameters` 中所有字符串叶子节点，
/// 返回替换后的任务副本，原任务保持不变。
pub struct PlaceholderReplacer<'a> {
    parser: &'a ExpressionParser,
}

impl<'a> PlaceholderReplacer<'a> {
    pub fn new(parser: &'a ExpressionParser) -> Self {
        Self { parser }
    }

    /// 替换任务中的全部占位符
    pub async fn replace_task(
        &self,
        task: &WorkflowTask,
    ) -> Result<WorkflowTask, ExpressionError> {
        let description = match &task.description {
            Some(text) => Some(parse_template(text)?),
            None => None,
        };
        let parameters = Value::Object(task.parameters.clone());

        let needs_secrets = description
            .as_ref()
            .is_some_and(Template::references_secrets)
            || references_secrets(&parameters)?;
        if needs_secrets {
            self.parser.load_secrets().await?;
        }

        let mut resolved = task.clone();
        if let (Some(text), Some(template)) = (&task.description, &description) {
            resolved.description = Some(stringify_field(
                self.parser.render(text, template)?,
            ));
        }
        resolved.parameters = match self.resolve_value(&parameters)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        tracing::debug!(
            trace_id = %self.parser.context().trace_id,
            task = %task.name,
            "resolved task placeholders"
        );
        Ok(resolved)
    }

    /// 替换单个 JSON 值中的占位符（递归处理数组与对象）
    pub async fn replace_value(&self, value: &Value) -> Result<Value, ExpressionError> {
        if references_secrets(value)? {
            self.parser.load_secrets().await?;
        }
        self.resolve_value(value)
    }

    fn resolve_value(&self, value: &Value) -> Result<Value, ExpressionError> {
        match value {
            Value::String(text) => {
                let template = parse_template(text)?;
                self.parser.render(text, &template)
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_value(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, item) in map {
                    out.insert(key.clone(), self.resolve_value(item)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }
}

/// 递归检查字符串叶子节点是否引用了密钥；同时校验语法
fn references_secrets(value: &Value) -> Result<bool, ExpressionError> {
    match value {
        Value::String(text) => Ok(parse_template(text)?.references_secrets()),
        Value::Array(items) => {
            for item in items {
                if references_secrets(item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Object(map) => {
            for item in map.values() {
                if references_secrets(item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Ok(false),
    }
}

/// description 是文本字段，非字符串结果转换为文本
fn stringify_field(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => crate::value::stringify(&other),
    }
}
