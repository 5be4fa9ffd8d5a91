use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::adapter::RegistryAdapter;
use super::backend::RegistryBackend;
use super::error::RegistryError;
use super::settings::RemoteSettings;
use super::types::{ConfigCacheEntry, ConfigCallback, WatchId};

impl RegistryAdapter {
    // 缓存优先；缓存条目不会自动过期，只会被 set_config 或监听循环更新
    pub(super) async fn cached_config(&self, key: &str) -> Result<Option<String>, RegistryError> {
        if let Some(entry) = self.config_cache.get(key) {
            tracing::debug!(key = %key, "Config served from cache");
            return Ok(entry.value.clone());
        }

        let value = self.backend.kv_get(key).await?;

        // 拉取期间可能有更新写入，已有条目优先
        let entry = self
            .config_cache
            .entry(key.to_string())
            .or_insert_with(|| ConfigCacheEntry::new(value));
        Ok(entry.value.clone())
    }

    /// 写入存储并更新本地缓存
    pub async fn set_config(&self, key: &str, value: &str) -> Result<(), RegistryError> {
        self.backend.kv_put(key, value).await?;
        self.config_cache.insert(
            key.to_string(),
            ConfigCacheEntry::new(Some(value.to_string())),
        );
        tracing::info!(key = %key, "Config updated");
        Ok(())
    }

    /// 读取前缀下的全部配置，直接访问存储
    pub async fn get_configs_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<BTreeMap<String, Option<String>>, RegistryError> {
        let keys = self.backend.kv_keys(prefix).await?;
        let mut configs = BTreeMap::new();
        for key in keys {
            let value = self.backend.kv_get(&key).await?;
            configs.insert(key, value);
        }
        Ok(configs)
    }

    /// 缓存中的条目（不访问存储）
    pub fn cached_entry(&self, key: &str) -> Option<ConfigCacheEntry> {
        self.config_cache.get(key).map(|entry| entry.value().clone())
    }

    /// 读取并解码启动配置文档。文档损坏时返回 `ConfigCorrupt`，调用方应中止启动
    pub async fn load_settings(&self, key: &str) -> Result<RemoteSettings, RegistryError> {
        match self.cached_config(key).await? {
            Some(raw) => {
                let settings = RemoteSettings::decode(key, &raw)?;
                tracing::info!(key = %key, "Loaded settings from registry");
                Ok(settings)
            }
            None => {
                tracing::warn!(key = %key, "No settings stored in registry, using local configuration");
                Ok(RemoteSettings::default())
            }
        }
    }

    pub(super) fn spawn_watch(
        &self,
        key: &str,
        callback: ConfigCallback,
        interval: Duration,
    ) -> WatchId {
        let id = WatchId::new(key);
        let watch = ConfigWatch {
            key: key.to_string(),
            interval,
            backend: self.backend.clone(),
            cache: self.config_cache.clone(),
            callback,
        };

        tracing::info!(key = %key, interval_secs = interval.as_secs(), "Watching config");
        self.supervisor
            .spawn(id.as_str(), move |token| watch.run(token));
        id
    }

    /// 停止监听，返回监听是否存在
    pub async fn unwatch_config(&self, id: &WatchId) -> bool {
        self.supervisor.stop(id.as_str()).await
    }
}

// 单个键的轮询监听，直接读取存储而不经过缓存
struct ConfigWatch {
    key: String,
    interval: Duration,
    backend: Arc<dyn RegistryBackend>,
    cache: Arc<DashMap<String, ConfigCacheEntry>>,
    callback: ConfigCallback,
}

impl ConfigWatch {
    async fn run(self, token: CancellationToken) {
        // 外层 None 表示尚未建立基线
        let mut last_seen: Option<Option<String>> = None;

        loop {
            match self.backend.kv_get(&self.key).await {
                Ok(value) => last_seen = Some(self.observe(last_seen, value)),
                Err(e) => {
                    tracing::error!(key = %self.key, error = %e, "Error watching config");
                }
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::debug!(key = %self.key, "Config watch stopped");
    }

    fn observe(&self, last_seen: Option<Option<String>>, value: Option<String>) -> Option<String> {
        match last_seen {
            None => {
                tracing::debug!(key = %self.key, "Config watch baseline established");
                self.cache
                    .insert(self.key.clone(), ConfigCacheEntry::new(value.clone()));
            }
            Some(previous) if previous != value => {
                tracing::info!(key = %self.key, "Config changed");
                // 监听结果同步写入缓存，get_config 与回调看到同一份数据
                self.cache
                    .insert(self.key.clone(), ConfigCacheEntry::new(value.clone()));
                (self.callback)(value.clone());
            }
            Some(_) => {}
        }
        value
    }
}
