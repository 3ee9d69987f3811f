use crate::error::ExpressionError;
use serde_json::Value;

/// 尝试将值视为数字；数字字符串同样可以转换
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// 由 f64 构造 JSON 数字；NaN/无穷大不可表示
pub(crate) fn number_value(n: f64) -> Result<Value, ExpressionError> {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| ExpressionError::new(format!("Result {n} is not a finite number")))
}

/// 真值判定
///
/// - `null`、`false`、`0`、空字符串、`"false"`、空数组/对象为假
/// - 其余为真
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => {
            let s = s.trim();
            !s.is_empty() && !s.eq_ignore_ascii_case("false")
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// 将值转为内联替换时使用的文本
///
/// 整数值的浮点数按整数输出，`null` 输出为空字符串，
/// 数组与对象输出为紧凑 JSON。
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            (_, _, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// 宽松相等：两侧都能转为数字时按数值比较，否则比较 JSON 值，
/// 字符串与非字符串比较时按文本比较
pub(crate) fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_number(lhs), as_number(rhs)) {
        return a == b;
    }
    match (lhs, rhs) {
        (Value::String(a), b) | (b, Value::String(a)) if !b.is_string() => {
            !b.is_null() && *a == stringify(b)
        }
        _ => lhs == rhs,
    }
}
