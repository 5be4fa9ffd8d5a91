use std::sync::{Arc, Mutex};
use std::time::Duration;

use grpc_consul::services::registry::{
    ConfigCallback, DiscoveredNode, MemoryBackend, Protocol, RegistrationState, RegistryAdapter,
    RegistryBackend, RegistryClient, RegistryError, ServiceRegistration,
};

fn adapter_with(backend: &MemoryBackend) -> RegistryAdapter {
    RegistryAdapter::new(Arc::new(backend.clone()))
}

fn order_registration(id: &str) -> ServiceRegistration {
    ServiceRegistration::new("order.grpc", id, "10.0.0.5", 9002, Protocol::Grpc)
        .with_ttl(Duration::from_secs(10))
        .with_deregister_after(Duration::from_secs(30))
}

// 收集回调参数
fn recording_callback() -> (ConfigCallback, Arc<Mutex<Vec<Option<String>>>>) {
    let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: ConfigCallback = Arc::new(move |value: Option<String>| sink.lock().unwrap().push(value));
    (callback, seen)
}

#[tokio::test(start_paused = true)]
async fn test_register_then_discover() {
    let backend = MemoryBackend::new();
    let adapter = adapter_with(&backend);

    assert!(adapter.register_service(order_registration("order-1")).await);
    assert_eq!(adapter.registration_state("order-1"), RegistrationState::Active);
    assert!(adapter.is_heartbeat_running("order-1"));

    // 注册时立即上报一次，无需等待第一个心跳周期
    assert_eq!(backend.pass_count("order-1"), 1);
    assert_eq!(
        adapter.discover_service("order.grpc").await,
        vec![DiscoveredNode::new("10.0.0.5", 9002)]
    );
    assert!(adapter.discover_service("payment.grpc").await.is_empty());

    adapter.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_runs_every_half_ttl_until_deregistered() {
    let backend = MemoryBackend::new();
    let adapter = adapter_with(&backend);
    assert!(adapter.register_service(order_registration("order-1")).await);

    // 间隔 5s：在 5s 和 10s 各上报一次
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(backend.pass_count("order-1"), 3);
    assert_eq!(adapter.heartbeat_stats("order-1").unwrap().passes, 3);

    // TTL 在持续上报下不会过期
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(adapter.discover_service("order.grpc").await.len(), 1);

    assert!(adapter.deregister_service("order-1").await);
    assert_eq!(adapter.registration_state("order-1"), RegistrationState::Unregistered);
    assert!(!adapter.is_heartbeat_running("order-1"));
    assert!(adapter.heartbeat_stats("order-1").is_none());

    // 注销后不再有任何请求
    let requests = backend.request_count();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.request_count(), requests);
    assert!(adapter.discover_service("order.grpc").await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_failure_streak_resets_and_recovers() {
    let backend = MemoryBackend::new();
    let adapter = RegistryAdapter::with_max_failures(Arc::new(backend.clone()), 3);
    let registration = order_registration("order-1").with_ttl(Duration::from_secs(2));
    assert!(adapter.register_service(registration).await);

    backend.set_unavailable(true);
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let stats = adapter.heartbeat_stats("order-1").unwrap();
    assert_eq!(stats.consecutive_failures, 2);
    assert_eq!(stats.exhausted_streaks, 0);

    // 第三次失败达到上限：计数清零，循环继续
    tokio::time::sleep(Duration::from_secs(1)).await;
    let stats = adapter.heartbeat_stats("order-1").unwrap();
    assert_eq!(stats.consecutive_failures, 0);
    assert_eq!(stats.total_failures, 3);
    assert_eq!(stats.exhausted_streaks, 1);
    assert!(adapter.is_heartbeat_running("order-1"));

    backend.set_unavailable(false);
    tokio::time::sleep(Duration::from_secs(1)).await;
    let stats = adapter.heartbeat_stats("order-1").unwrap();
    assert_eq!(stats.passes, 2);
    assert_eq!(stats.consecutive_failures, 0);
    assert_eq!(adapter.registration_state("order-1"), RegistrationState::Active);

    adapter.shutdown().await;
}

#[tokio::test]
async fn test_register_failure_returns_false() {
    let backend = MemoryBackend::new();
    backend.set_unavailable(true);
    let adapter = adapter_with(&backend);

    assert!(!adapter.register_service(order_registration("order-1")).await);
    assert_eq!(adapter.registration_state("order-1"), RegistrationState::Unregistered);
    assert!(!adapter.is_heartbeat_running("order-1"));
    assert!(adapter.registered_ids().is_empty());
}

#[tokio::test]
async fn test_deregister_unknown_id_returns_false() {
    let backend = MemoryBackend::new();
    let adapter = adapter_with(&backend);

    assert!(!adapter.deregister_service("never-registered").await);

    backend.set_unavailable(true);
    assert!(!adapter.deregister_service("never-registered").await);
}

#[tokio::test]
async fn test_discover_returns_empty_when_registry_down() {
    let backend = MemoryBackend::new();
    let adapter = adapter_with(&backend);
    assert!(adapter.register_service(order_registration("order-1")).await);

    backend.set_unavailable(true);
    assert!(adapter.discover_service("order.grpc").await.is_empty());

    backend.set_unavailable(false);
    adapter.shutdown().await;
}

#[tokio::test]
async fn test_get_config_is_cache_first() {
    let backend = MemoryBackend::new();
    let adapter = adapter_with(&backend);
    backend.put_raw("app/feature", "on");

    assert_eq!(adapter.get_config("app/feature").await.unwrap().as_deref(), Some("on"));

    // 其他进程修改存储，本地缓存不受影响
    backend.put_raw("app/feature", "off");
    assert_eq!(adapter.get_config("app/feature").await.unwrap().as_deref(), Some("on"));

    // 缺失的键同样被缓存
    assert_eq!(adapter.get_config("app/missing").await.unwrap(), None);
    backend.put_raw("app/missing", "late");
    assert_eq!(adapter.get_config("app/missing").await.unwrap(), None);

    // 本地写入会更新缓存
    adapter.set_config("app/feature", "v2").await.unwrap();
    assert_eq!(adapter.get_config("app/feature").await.unwrap().as_deref(), Some("v2"));
    assert_eq!(
        adapter.backend().kv_get("app/feature").await.unwrap().as_deref(),
        Some("v2")
    );
}

#[tokio::test]
async fn test_get_config_store_error_is_not_cached() {
    let backend = MemoryBackend::new();
    let adapter = adapter_with(&backend);
    backend.put_raw("app/feature", "on");

    backend.set_unavailable(true);
    assert!(matches!(
        adapter.get_config("app/feature").await,
        Err(RegistryError::Unavailable)
    ));
    assert!(adapter.cached_entry("app/feature").is_none());

    backend.set_unavailable(false);
    assert_eq!(adapter.get_config("app/feature").await.unwrap().as_deref(), Some("on"));
}

#[tokio::test(start_paused = true)]
async fn test_watch_config_fires_only_on_change() {
    let backend = MemoryBackend::new();
    let adapter = adapter_with(&backend);
    backend.put_raw("app/limit", "10");

    let (callback, seen) = recording_callback();
    let watch_id = adapter.watch_config("app/limit", callback, Duration::from_secs(10));

    // 首次轮询立即执行，只建立基线
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(
        adapter.cached_entry("app/limit").unwrap().value.as_deref(),
        Some("10")
    );

    // 值不变时不回调
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(seen.lock().unwrap().is_empty());

    backend.put_raw("app/limit", "20");
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(*seen.lock().unwrap(), vec![Some("20".to_string())]);
    // 监听结果同步到缓存
    assert_eq!(adapter.get_config("app/limit").await.unwrap().as_deref(), Some("20"));

    backend.delete_raw("app/limit");
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(*seen.lock().unwrap(), vec![Some("20".to_string()), None]);

    assert!(adapter.unwatch_config(&watch_id).await);
    assert!(!adapter.unwatch_config(&watch_id).await);

    backend.put_raw("app/limit", "30");
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_watch_survives_store_errors() {
    let backend = MemoryBackend::new();
    let adapter = adapter_with(&backend);
    backend.put_raw("app/limit", "10");

    let (callback, seen) = recording_callback();
    adapter.watch_config("app/limit", callback, Duration::from_secs(5));
    tokio::time::sleep(Duration::from_millis(100)).await;

    backend.set_unavailable(true);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(seen.lock().unwrap().is_empty());

    backend.set_unavailable(false);
    backend.put_raw("app/limit", "15");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(*seen.lock().unwrap(), vec![Some("15".to_string())]);

    adapter.shutdown().await;
}

#[tokio::test]
async fn test_load_settings() {
    let backend = MemoryBackend::new();
    let adapter = adapter_with(&backend);

    // 键不存在时使用默认值
    let settings = adapter.load_settings("bsi/absent").await.unwrap();
    assert!(settings.service.is_none());

    backend.put_raw(
        "bsi/hello_rs",
        "service:\n  name: hello\n  grpc_port: 9100\napp_setting:\n  environment: staging\n",
    );
    let settings = adapter.load_settings("bsi/hello_rs").await.unwrap();
    let service = settings.service.unwrap();
    assert_eq!(service.name.as_deref(), Some("hello"));
    assert_eq!(service.grpc_port, Some(9100));

    backend.put_raw("bsi/broken", "service: [unclosed");
    let err = adapter.load_settings("bsi/broken").await.unwrap_err();
    assert!(matches!(err, RegistryError::ConfigCorrupt { ref key, .. } if key == "bsi/broken"));
}

#[tokio::test]
async fn test_get_configs_by_prefix() {
    let backend = MemoryBackend::new();
    let adapter = adapter_with(&backend);
    adapter.set_config("app/a", "1").await.unwrap();
    backend.put_raw("app/b", "2");
    backend.put_raw("other/c", "3");

    let configs = adapter.get_configs_by_prefix("app/").await.unwrap();
    assert_eq!(configs.len(), 2);
    assert_eq!(configs["app/a"].as_deref(), Some("1"));
    assert_eq!(configs["app/b"].as_deref(), Some("2"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_deregisters_and_stops_loops() {
    let backend = MemoryBackend::new();
    let adapter = adapter_with(&backend);
    assert!(adapter.register_service(order_registration("order-1")).await);
    assert!(adapter.register_service(order_registration("order-2")).await);
    let (callback, _seen) = recording_callback();
    adapter.watch_config("app/limit", callback, Duration::from_secs(5));
    tokio::time::sleep(Duration::from_millis(100)).await;

    adapter.shutdown().await;
    assert!(adapter.registered_ids().is_empty());
    assert!(backend.service_info("order-1").is_none());
    assert!(backend.service_info("order-2").is_none());

    let requests = backend.request_count();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(backend.request_count(), requests);
}

#[tokio::test(start_paused = true)]
async fn test_failed_reregister_keeps_active_registration() {
    let backend = MemoryBackend::new();
    let adapter = adapter_with(&backend);
    assert!(adapter.register_service(order_registration("order-1")).await);

    backend.set_unavailable(true);
    assert!(!adapter.register_service(order_registration("order-1")).await);
    backend.set_unavailable(false);

    // 原注册与心跳不受影响
    assert_eq!(adapter.registration_state("order-1"), RegistrationState::Active);
    assert!(adapter.is_heartbeat_running("order-1"));
    assert_eq!(adapter.registered_ids(), vec!["order-1".to_string()]);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(adapter.discover_service("order.grpc").await.len(), 1);

    adapter.shutdown().await;
    assert!(backend.service_info("order-1").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_reregister_updates_active_registration() {
    let backend = MemoryBackend::new();
    let adapter = adapter_with(&backend);
    assert!(adapter.register_service(order_registration("order-1")).await);

    let mut moved = order_registration("order-1");
    moved.port = 9003;
    assert!(adapter.register_service(moved).await);

    assert_eq!(adapter.registration("order-1").unwrap().port, 9003);
    assert_eq!(adapter.heartbeat_stats("order-1").unwrap().passes, 2);
    assert!(adapter.is_heartbeat_running("order-1"));

    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(
        adapter.discover_service("order.grpc").await,
        vec![DiscoveredNode::new("10.0.0.5", 9003)]
    );

    adapter.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_zero_ttl_heartbeat_is_rate_limited() {
    let backend = MemoryBackend::new();
    let adapter = adapter_with(&backend);
    let registration = order_registration("order-1").with_ttl(Duration::ZERO);
    assert!(adapter.register_service(registration).await);

    tokio::time::sleep(Duration::from_millis(2100)).await;
    // 注册 + 首次上报 + 每 500ms 一次心跳
    assert_eq!(backend.request_count(), 6);

    adapter.shutdown().await;
}
