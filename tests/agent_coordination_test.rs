// Agent coordination over a real shared directory
//
// Each "agent" gets its own FileStore handle on the same root, the way
// separate processes would.

use colony::agents::{AgentCoordinator, AgentRouter, AgentStatus, HealthMonitor, Registry};
use colony::locks::DistributedMutex;
use colony::messaging::{MessageBus, MessageType};
use colony::store::{encode_record, keys, FileStore, RecordStore};
use colony::tasks::{Task, TaskBoard, TaskStatus};
use colony::{AgentRegistry, ColonyConfig, Priority};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn store_at(root: &Path) -> Arc<dyn RecordStore> {
    let store = FileStore::new(root);
    store.ensure_root().unwrap();
    Arc::new(store)
}

fn config() -> ColonyConfig {
    let mut config = ColonyConfig::default();
    config.registry.max_attempts = 50;
    config.registry.base_delay_ms = 1;
    config.locks.poll_interval_ms = 5;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registrations_all_land() {
    let dir = TempDir::new().unwrap();
    let config = config();

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let registry = Registry::new(store_at(dir.path()), config.registry.clone());
            tokio::spawn(async move { registry.register(Some("worker")).await })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().id);
    }

    let snapshot = Registry::new(store_at(dir.path()), config.registry.clone())
        .snapshot()
        .await
        .unwrap();
    assert_eq!(snapshot.agents.len(), 12);
    assert_eq!(snapshot.lock_version, 12);
    for id in ids {
        assert!(snapshot.agents.contains_key(&id));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lock_serializes_read_modify_write() {
    let dir = TempDir::new().unwrap();
    let config = config();
    store_at(dir.path()).write("counter", b"0").await.unwrap();

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let store = store_at(dir.path());
            let mutex = DistributedMutex::new(store.clone(), config.locks.clone(), &format!("agent-{i}"));
            tokio::spawn(async move {
                for _ in 0..5 {
                    mutex
                        .with_lock("counter", Some(Duration::from_secs(20)), || async {
                            let raw = store.read("counter").await.unwrap().unwrap();
                            let value: u32 = String::from_utf8(raw).unwrap().parse().unwrap();
                            tokio::time::sleep(Duration::from_millis(1)).await;
                            store.write("counter", (value + 1).to_string().as_bytes()).await.unwrap();
                        })
                        .await
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    let raw = store_at(dir.path()).read("counter").await.unwrap().unwrap();
    assert_eq!(raw, b"30");
}

#[tokio::test]
async fn test_route_claim_and_finish_over_files() {
    let dir = TempDir::new().unwrap();
    let config = config();

    let mut writer = AgentCoordinator::new(store_at(dir.path()), config.clone());
    let mut reviewer = AgentCoordinator::new(store_at(dir.path()), config.clone());
    let writer_agent = writer.register(Some("writer")).await.unwrap();
    let reviewer_agent = reviewer.register(Some("reviewer")).await.unwrap();

    let board = TaskBoard::new(store_at(dir.path()), config.registry.retry_policy());
    let review = board
        .create(Task::new("Review parser").with_tags(["reviewer"]))
        .await
        .unwrap();
    let urgent = board
        .create(Task::new("Fix crash").with_priority(Priority::Critical))
        .await
        .unwrap();

    writer.update_status(AgentStatus::Idle, None).await.unwrap();

    let router = AgentRouter::new(store_at(dir.path()), config.clone(), None);
    let decisions = router.route().await.unwrap();
    assert_eq!(decisions.len(), 2);

    // The critical task goes first, to the idle writer; the reviewer gets its tagged task
    let by_task = |id: &str| decisions.iter().find(|d| d.task_id == id).unwrap().agent_id.clone();
    assert_eq!(decisions[0].task_id, urgent.id);
    assert_eq!(by_task(&review.id), reviewer_agent.id);
    assert_eq!(by_task(&urgent.id), writer_agent.id);

    let inbox = reviewer.read_messages(None).await.unwrap();
    let offer = inbox
        .iter()
        .find(|m| m.kind == MessageType::TaskAvailable)
        .unwrap();
    assert_eq!(offer.payload["task_id"], json!(review.id));

    let done = reviewer
        .finish_task(&review.id, TaskStatus::Completed, Some("lgtm".to_string()))
        .await
        .unwrap();
    assert_eq!(done.resolution.as_deref(), Some("lgtm"));
    assert_eq!(
        reviewer.registry().get(&reviewer_agent.id).await.unwrap().unwrap().status,
        AgentStatus::Idle
    );

    let stats = router.get_stats().await.unwrap();
    assert_eq!(stats.tasks_by_status[&TaskStatus::Completed], 1);
    assert_eq!(stats.tasks_by_status[&TaskStatus::InProgress], 1);
    assert_eq!(stats.registered_agents, 2);

    writer.unregister().await.unwrap();
    reviewer.unregister().await.unwrap();
    assert_eq!(router.get_stats().await.unwrap().registered_agents, 0);
}

#[tokio::test]
async fn test_rotation_writes_archive_files() {
    let dir = TempDir::new().unwrap();
    let mut config = config();
    config.bus.rotate_max_messages = 10;

    let bus = MessageBus::new(store_at(dir.path()), config.bus.clone(), "agent-a");
    for i in 0..11 {
        bus.send(MessageType::Broadcast, json!(i), None).await.unwrap();
    }

    let archives = bus.list_archives().await.unwrap();
    assert_eq!(archives.len(), 1);
    assert_eq!(archives[0].message_count, 11);
    assert!(dir.path().join(&archives[0].archive).is_file());
    assert!(bus.peek(100).await.unwrap().is_empty());

    bus.send(MessageType::Broadcast, json!("after"), None).await.unwrap();
    assert_eq!(bus.peek(100).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_dead_agents_are_cleaned_up() {
    let dir = TempDir::new().unwrap();
    let config = config();
    let store = store_at(dir.path());

    let mut seeded = AgentRegistry::default();
    let mut dead = colony::Agent::new(Some("worker"));
    dead.last_heartbeat = chrono::Utc::now() - chrono::Duration::hours(2);
    let fresh = colony::Agent::new(Some("worker"));
    seeded.agents.insert(dead.id.clone(), dead.clone());
    seeded.agents.insert(fresh.id.clone(), fresh.clone());
    store.write(keys::REGISTRY, &encode_record(&seeded).unwrap()).await.unwrap();

    let registry = Registry::new(store.clone(), config.registry.clone());
    let monitor = HealthMonitor::new(registry.clone(), config.health.clone());
    assert_eq!(monitor.status().await.unwrap().dead, 1);

    assert_eq!(monitor.cleanup_stale_agents().await, 1);
    assert_eq!(monitor.cleanup_stale_agents().await, 0);
    assert!(registry.get(&dead.id).await.unwrap().is_none());
    assert!(registry.get(&fresh.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_registration_evicts_long_silent_agents() {
    let dir = TempDir::new().unwrap();
    let config = config();
    let store = store_at(dir.path());

    let mut seeded = AgentRegistry::default();
    let mut silent = colony::Agent::new(None);
    silent.last_heartbeat = chrono::Utc::now() - chrono::Duration::minutes(6);
    seeded.agents.insert(silent.id.clone(), silent.clone());
    store.write(keys::REGISTRY, &encode_record(&seeded).unwrap()).await.unwrap();

    let registry = Registry::new(store, config.registry.clone());
    let newcomer = registry.register(Some("worker")).await.unwrap();

    let snapshot = registry.snapshot().await.unwrap();
    assert_eq!(snapshot.agents.keys().collect::<Vec<_>>(), vec![&newcomer.id]);
}
