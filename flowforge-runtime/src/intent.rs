//! # 意图合成服务
//!
//! 通过外部 AI 提供者把目标描述转换为工作流定义。

use anyhow::{Context, Result};
use async_trait::async_trait;
use flowforge_core::WorkflowDefinition;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// 无法得到计划文本时的默认值
pub const FALLBACK_PLAN: &str = "Proposed workflow generated from intent.";
/// 名称为空时的默认工作流名称
pub const FALLBACK_WORKFLOW_NAME: &str = "auto-generated-workflow";

/// AI 提供者接口
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// 根据目标和可选的能力描述生成工作流 JSON 文本
    async fn generate_workflow_json(
        &self,
        goal: &str,
        capabilities_json: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

/// 合成结果
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResult {
    pub definition: WorkflowDefinition,
    pub raw_json: String,
    pub plan: String,
}

/// 意图合成服务
#[derive(Clone)]
pub struct WorkflowIntentService {
    provider: Arc<dyn AiProvider>,
}

impl WorkflowIntentService {
    pub fn new(provider: Arc<dyn AiProvider>) -> Self {
        Self { provider }
    }

    /// 合成工作流
    ///
    /// 提供者的错误直接向上传播；返回内容无法解析时得到一个空定义，
    /// 名称和计划文本使用默认值。
    pub async fn synthesize(
        &self,
        goal: &str,
        capabilities_json: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SynthesisResult> {
        if goal.trim().is_empty() {
            anyhow::bail!("Goal must not be empty");
        }

        let raw_json = tokio::select! {
            result = self.provider.generate_workflow_json(goal, capabilities_json, cancel) => {
                result.context("AI provider failed to generate workflow")?
            }
            _ = cancel.cancelled() => anyhow::bail!("Workflow synthesis canceled"),
        };

        let body = strip_code_fences(&raw_json)?;
        let (mut definition, plan_field) = match serde_json::from_str::<Value>(&body) {
            Ok(value) => {
                let plan = value
                    .get("plan")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let definition = serde_json::from_value::<WorkflowDefinition>(value)
                    .unwrap_or_else(|e| {
                        tracing::warn!(error = %e, "AI 返回的 JSON 不是合法的工作流定义");
                        WorkflowDefinition::default()
                    });
                (definition, plan)
            }
            Err(e) => {
                tracing::warn!(error = %e, "AI 返回内容不是合法 JSON");
                (WorkflowDefinition::default(), None)
            }
        };

        if definition.name.trim().is_empty() {
            definition.name = FALLBACK_WORKFLOW_NAME.to_string();
        }

        let plan = plan_field
            .filter(|p| !p.trim().is_empty())
            .or_else(|| {
                Some(definition.description.clone()).filter(|d| !d.trim().is_empty())
            })
            .unwrap_or_else(|| FALLBACK_PLAN.to_string());

        tracing::info!(
            workflow = %definition.name,
            tasks = definition.tasks.len(),
            "工作流合成完成"
        );

        Ok(SynthesisResult {
            definition,
            raw_json,
            plan,
        })
    }
}

static CODE_FENCE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

fn code_fence_pattern() -> Result<&'static Regex> {
    CODE_FENCE
        .get_or_init(|| Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n?(.*?)\s*```\s*$"))
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Invalid Markdown code fence pattern: {e}"))
}

/// 去掉可选的 Markdown 代码块包裹
fn strip_code_fences(raw: &str) -> Result<String> {
    let re = code_fence_pattern().context("Failed to strip code fences from provider output")?;
    Ok(match re.captures(raw) {
        Some(caps) => caps[1].to_string(),
        None => raw.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedProvider(String);

    #[async_trait]
    impl AiProvider for CannedProvider {
        async fn generate_workflow_json(
            &self,
            _goal: &str,
            _capabilities_json: Option<&str>,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl AiProvider for FailingProvider {
        async fn generate_workflow_json(
            &self,
            _goal: &str,
            _capabilities_json: Option<&str>,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            anyhow::bail!("quota exceeded")
        }
    }

    struct PendingProvider;

    #[async_trait]
    impl AiProvider for PendingProvider {
        async fn generate_workflow_json(
            &self,
            _goal: &str,
            _capabilities_json: Option<&str>,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            futures::future::pending::<Result<String>>().await
        }
    }

    fn service(json: &str) -> WorkflowIntentService {
        WorkflowIntentService::new(Arc::new(CannedProvider(json.to_string())))
    }

    #[tokio::test]
    async fn test_plan_field_is_used() {
        let json = r#"{"name": "etl", "plan": "Extract then load", "tasks": [{"name": "extract"}]}"#;
        let result = service(json)
            .synthesize("load data", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.definition.name, "etl");
        assert_eq!(result.definition.tasks.len(), 1);
        assert_eq!(result.plan, "Extract then load");
        assert_eq!(result.raw_json, json);
    }

    #[tokio::test]
    async fn test_description_is_plan_fallback() {
        let result = service(r#"{"name": "etl", "description": "Nightly ETL"}"#)
            .synthesize("goal", Some("{}"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.plan, "Nightly ETL");
    }

    #[tokio::test]
    async fn test_defaults_for_blank_name_and_missing_plan() {
        let result = service(r#"{"name": "  ", "tasks": []}"#)
            .synthesize("goal", None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.definition.name, FALLBACK_WORKFLOW_NAME);
        assert_eq!(result.plan, FALLBACK_PLAN);
    }

    #[tokio::test]
    async fn test_invalid_json_falls_back() {
        let result = service("this is not json")
            .synthesize("goal", None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.definition.name, FALLBACK_WORKFLOW_NAME);
        assert!(result.definition.tasks.is_empty());
        assert_eq!(result.plan, FALLBACK_PLAN);
        assert_eq!(result.raw_json, "this is not json");
    }

    #[tokio::test]
    async fn test_code_fences_are_stripped() {
        let raw = "```json\n{\"name\": \"fenced\"}\n```";
        let result = service(raw)
            .synthesize("goal", None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.definition.name, "fenced");
        assert_eq!(result.raw_json, raw);
    }

    #[test]
    fn test_code_fence_pattern_is_compiled_once() {
        let first = code_fence_pattern().unwrap();
        let second = code_fence_pattern().unwrap();
        assert!(std::ptr::eq(first, second));
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```").unwrap(), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  {}  ").unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_blank_goal_is_rejected() {
        let err = service("{}")
            .synthesize("   ", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Goal"));
    }

    #[tokio::test]
    async fn test_provider_errors_propagate() {
        let service = WorkflowIntentService::new(Arc::new(FailingProvider));
        let err = service
            .synthesize("goal", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_synthesis() {
        let service = WorkflowIntentService::new(Arc::new(PendingProvider));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = service.synthesize("goal", None, &cancel).await.unwrap_err();
        assert!(err.to_string().contains("canceled"));
    }
}
