use serde_json::{Map, Value};

/// 属性/下标访问能力
///
/// `.Name` 与 `[N]` 通过该 trait 作用在不同的值表示上，
/// 不存在的属性或越界下标返回 `None`。
pub trait PathAccessor {
    fn try_get_property(&self, name: &str) -> Option<Value>;

    fn try_get_index(&self, index: usize) -> Option<Value>;
}

impl PathAccessor for Map<String, Value> {
    fn try_get_property(&self, name: &str) -> Option<Value> {
        self.get(name)
            .or_else(|| {
                self.iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value)
            })
            .cloned()
    }

    fn try_get_index(&self, _index: usize) -> Option<Value> {
        None
    }
}

impl PathAccessor for [Value] {
    fn try_get_property(&self, name: &str) -> Option<Value> {
        match name {
            "Count" | "Length" | "count" | "length" => Some(Value::from(self.len())),
            _ => None,
        }
    }

    fn try_get_index(&self, index: usize) -> Option<Value> {
        self.get(index).cloned()
    }
}

impl PathAccessor for Value {
    fn try_get_property(&self, name: &str) -> Option<Value> {
        match self {
            Value::Object(map) => map.try_get_property(name),
            Value::Array(items) => items.as_slice().try_get_property(name),
            Value::String(text) => embedded_json(text)?.try_get_property(name),
            _ => None,
        }
    }

    fn try_get_index(&self, index: usize) -> Option<Value> {
        match self {
            Value::Array(items) => items.as_slice().try_get_index(index),
            Value::String(text) => embedded_json(text)?.try_get_index(index),
            _ => None,
        }
    }
}

/// 任务输出常以 JSON 文本形式保存，访问路径时按结构化值处理
fn embedded_json(text: &str) -> Option<Value> {
    let trimmed = text.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_property_lookup_prefers_exact_match() {
        let value = json!({"name": "lower", "Name": "upper"});
        assert_eq!(value.try_get_property("Name"), Some(json!("upper")));
        assert_eq!(value.try_get_property("name"), Some(json!("lower")));
        assert_eq!(value.try_get_property("missing"), None);

        let single = json!({"status": "ok"});
        assert_eq!(single.try_get_property("STATUS"), Some(json!("ok")));
    }

    #[test]
    fn test_index_on_arrays_only() {
        let value = json!([10, 20]);
        assert_eq!(value.try_get_index(1), Some(json!(20)));
        assert_eq!(value.try_get_index(2), None);
        assert_eq!(json!({"0": 1}).try_get_index(0), None);
        assert_eq!(value.try_get_property("Count"), Some(json!(2)));
    }

    #[test]
    fn test_json_text_is_navigable() {
        let value = json!("{\"user\": {\"id\": 7}}");
        let user = value.try_get_property("user").unwrap();
        assert_eq!(user.try_get_property("id"), Some(json!(7)));
        assert_eq!(json!("plain").try_get_property("len"), None);
    }
}
