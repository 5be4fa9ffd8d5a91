use dashmap::DashMap;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

// 单个受管后台循环
#[derive(Debug)]
struct SupervisedLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// 后台循环监管器：持有每个循环的取消令牌，关闭时统一取消并等待退出
#[derive(Debug)]
pub struct LoopSupervisor {
    root: CancellationToken,
    tracker: TaskTracker,
    loops: DashMap<String, SupervisedLoop>,
}

impl Default for LoopSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopSupervisor {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            loops: DashMap::new(),
        }
    }

    /// 以 `key` 启动循环；同名循环已存在时先取消旧的
    pub fn spawn<F, Fut>(&self, key: impl Into<String>, make: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let token = self.root.child_token();
        let handle = self.tracker.spawn(make(token.clone()));

        if let Some(previous) = self.loops.insert(key.clone(), SupervisedLoop { token, handle }) {
            tracing::debug!(task = %key, "Replacing running background loop");
            previous.token.cancel();
        }
    }

    /// 取消并等待指定循环退出，返回该循环是否存在
    pub async fn stop(&self, key: &str) -> bool {
        let Some((_, supervised)) = self.loops.remove(key) else {
            return false;
        };

        supervised.token.cancel();
        if let Err(e) = supervised.handle.await {
            tracing::error!(task = %key, error = %e, "Background loop terminated abnormally");
        }
        true
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.loops
            .get(key)
            .map(|entry| !entry.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// 取消所有循环并等待它们全部退出
    pub async fn shutdown(&self) {
        let count = self.loops.len();
        self.root.cancel();
        self.loops.clear();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!(loops = count, "All background loops stopped");
    }
}

impl Drop for LoopSupervisor {
    fn drop(&mut self) {
        self.root.cancel();
        self.tracker.close();
    }
}
