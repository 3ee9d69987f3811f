use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// 密钥条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub key: String,
    pub value: String,
}

impl Secret {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// 密钥提供者接口
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// 提供者名称，用于错误信息
    fn name(&self) -> &str;

    /// 拉取全部密钥
    async fn get_secrets(&self) -> Result<Vec<Secret>>;
}

/// 密钥提供者工厂
pub trait SecretFactory: Send + Sync {
    fn default_provider(&self) -> Option<Arc<dyn SecretProvider>>;
}

/// 密钥缓存：首次使用时拉取一次，之后复用
///
/// 克隆出的缓存共享同一份已拉取的数据。
#[derive(Clone)]
pub struct SecretCache {
    provider: Option<Arc<dyn SecretProvider>>,
    cache: Arc<OnceCell<Vec<Secret>>>,
}

impl std::fmt::Debug for SecretCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCache")
            .field("provider", &self.provider_name())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl SecretCache {
    pub fn new(provider: Arc<dyn SecretProvider>) -> Self {
        Self {
            provider: Some(provider),
            cache: Arc::new(OnceCell::new()),
        }
    }

    /// 未配置提供者的缓存
    pub fn disabled() -> Self {
        Self {
            provider: None,
            cache: Arc::new(OnceCell::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub fn is_loaded(&self) -> bool {
        self.cache.initialized()
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.provider.as_deref().map(|p| p.name())
    }

    /// 确保密钥已拉取；未配置提供者时返回 `Ok(None)`
    pub async fn load(&self) -> Result<Option<&[Secret]>> {
        let Some(provider) = &self.provider else {
            return Ok(None);
        };

        let secrets = self
            .cache
            .get_or_try_init(|| async {
                let secrets = provider.get_secrets().await?;
                tracing::debug!(
                    provider = %provider.name(),
                    count = secrets.len(),
                    "fetched secrets"
                );
                Ok::<_, anyhow::Error>(secrets)
            })
            .await?;

        Ok(Some(secrets.as_slice()))
    }

    /// 在已拉取的密钥中按名称查找（忽略大小写）
    pub fn lookup(&self, key: &str) -> Option<&Secret> {
        self.cache
            .get()?
            .iter()
            .find(|s| s.key.eq_ignore_ascii_case(key))
    }
}
