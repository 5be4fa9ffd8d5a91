use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::backend::RegistryBackend;
use super::types::HeartbeatCounters;

/// 单个注册的 TTL 心跳循环
#[derive(Debug)]
pub(crate) struct HeartbeatTask {
    pub(crate) service_id: String,
    pub(crate) check_id: String,
    pub(crate) interval: Duration,
    pub(crate) max_failures: u32,
    pub(crate) backend: Arc<dyn RegistryBackend>,
    pub(crate) counters: Arc<HeartbeatCounters>,
}

impl HeartbeatTask {
    // 每个间隔上报一次通过，只在取消时退出
    pub(crate) async fn run(self, token: CancellationToken) {
        tracing::debug!(
            service_id = %self.service_id,
            interval = ?self.interval,
            "Heartbeat loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            // 上报过程中不响应取消，避免检查更新到一半
            self.beat().await;
        }

        tracing::debug!(service_id = %self.service_id, "Heartbeat loop stopped");
    }

    async fn beat(&self) {
        match self.backend.pass_ttl(&self.check_id).await {
            Ok(()) => {
                let previous = self.counters.snapshot().consecutive_failures;
                self.counters.record_pass();
                if previous > 0 {
                    tracing::info!(
                        service_id = %self.service_id,
                        previous_failures = previous,
                        "Heartbeat recovered"
                    );
                } else {
                    tracing::trace!(service_id = %self.service_id, "Heartbeat sent");
                }
            }
            Err(e) => {
                let failures = self.counters.record_failure();
                if failures >= self.max_failures {
                    // 注册被视为持久的，连续失败到上限后清零继续重试
                    tracing::warn!(
                        service_id = %self.service_id,
                        failures,
                        error = %e,
                        "Heartbeat failure streak reached limit, resetting counter and continuing"
                    );
                    self.counters.reset_streak();
                } else if failures == 1 {
                    tracing::warn!(
                        service_id = %self.service_id,
                        error = %e,
                        "Heartbeat failed"
                    );
                } else {
                    tracing::error!(
                        service_id = %self.service_id,
                        failures,
                        max_failures = self.max_failures,
                        error = %e,
                        "Heartbeat failed repeatedly"
                    );
                }
            }
        }
    }
}
