use crate::definition::WorkflowDefinition;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// 工作流定义加载器，支持从文件或字符串加载
pub struct DefinitionLoader;

impl DefinitionLoader {
    /// 从 JSON 字符串加载工作流定义
    pub fn from_json_str(content: &str) -> Result<WorkflowDefinition> {
        serde_json::from_str(content)
            .with_context(|| "Failed to parse workflow JSON content")
    }

    /// 从 YAML 字符串加载工作流定义
    pub fn from_yaml_str(content: &str) -> Result<WorkflowDefinition> {
        serde_yaml::from_str(content)
            .with_context(|| "Failed to parse workflow YAML content")
    }

    /// 从文件加载，按扩展名选择格式（`.yaml`/`.yml` 为 YAML，其余按 JSON）
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<WorkflowDefinition> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).with_context(|| {
            format!("Failed to read workflow file: {path:?}")
        })?;

        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);

        let definition = if is_yaml {
            Self::from_yaml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
        .with_context(|| format!("Invalid workflow file: {path:?}"))?;

        tracing::debug!(
            workflow = %definition.name,
            tasks = definition.tasks.len(),
            "loaded workflow definition"
        );
        Ok(definition)
    }

    /// 序列化为格式化的 JSON
    pub fn to_json_string(definition: &WorkflowDefinition) -> Result<String> {
        serde_json::to_string_pretty(definition)
            .with_context(|| "Failed to serialize workflow to JSON")
    }

    /// 保存工作流定义到 JSON 文件
    pub fn save_to_json<P: AsRef<Path>>(
        definition: &WorkflowDefinition,
        path: P,
    ) -> Result<()> {
        let json_content = Self::to_json_string(definition)?;
        fs::write(&path, json_content).with_context(|| {
            format!("Failed to write JSON file: {:?}", path.as_ref())
        })?;
        Ok(())
    }

    /// 保存工作流定义到 YAML 文件
    pub fn save_to_yaml<P: AsRef<Path>>(
        definition: &WorkflowDefinition,
        path: P,
    ) -> Result<()> {
        let yaml_content = serde_yaml::to_string(definition)
            .with_context(|| "Failed to serialize workflow to YAML")?;
        fs::write(&path, yaml_content).with_context(|| {
            format!("Failed to write YAML file: {:?}", path.as_ref())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_json_str() {
        let json_content = r#"
{
  "name": "nightly-report",
  "description": "Builds the nightly report",
  "variables": { "threshold": 70 },
  "configuration": { "degreeOfParallelism": 4 },
  "tasks": [
    { "name": "extract" },
    {
      "name": "score",
      "dependencies": ["extract"],
      "conditionalBranches": [
        { "expression": "$[Outputs('extract') > 0]", "targetTaskName": "publish" }
      ],
      "errorHandling": { "retryPolicy": { "maxRetries": 2 } }
    },
    { "name": "publish", "timeoutMilliseconds": 5000 }
  ]
}
"#;

        let definition = DefinitionLoader::from_json_str(json_content).unwrap();
        assert_eq!(definition.name, "nightly-report");
        assert_eq!(definition.configuration.degree_of_parallelism, Some(4));
        assert_eq!(definition.configuration.timeout_milliseconds, None);
        assert_eq!(definition.tasks.len(), 3);
        assert_eq!(definition.tasks[1].dependencies, vec!["extract"]);
        assert_eq!(
            definition.tasks[1].conditional_branches[0].target_task_name,
            "publish"
        );
        assert_eq!(definition.tasks[1].error_handling.retry_policy.max_retries, 2);
        assert_eq!(definition.tasks[2].timeout_milliseconds, Some(5000));
        assert_eq!(definition.variables["threshold"], 70);
    }

    #[test]
    fn test_load_from_yaml_str() {
        let yaml_content = r#"
name: "yaml-flow"
tasks:
  - name: "a"
  - name: "b"
    dependencies: ["a"]
    parameters:
      greeting: "Hi $[Variables('Name')]!"
"#;

        let definition = DefinitionLoader::from_yaml_str(yaml_content).unwrap();
        assert_eq!(definition.name, "yaml-flow");
        assert_eq!(definition.tasks[1].dependencies, vec!["a"]);
        assert_eq!(
            definition.tasks[1].parameters["greeting"],
            "Hi $[Variables('Name')]!"
        );
    }

    #[test]
    fn test_invalid_json_reports_context() {
        let err = DefinitionLoader::from_json_str("{ not json").unwrap_err();
        assert!(err.to_string().contains("Failed to parse workflow JSON"));
    }

    #[test]
    fn test_json_uses_camel_case_on_the_wire() {
        let definition = WorkflowDefinition::new("wire").with_parallelism(3);
        let json = DefinitionLoader::to_json_string(&definition).unwrap();
        assert!(json.contains("degreeOfParallelism"));
        assert!(!json.contains("timeoutMilliseconds"));
    }
}
