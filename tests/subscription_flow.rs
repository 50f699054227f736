//! End-to-end subscription flow: a producer declares its menu, a user
//! manages filters over chat commands, and published intel reaches exactly
//! the matching subscribers while the backlog lands in the kv store.

use quanthub::adapters::dingtalk::DingNotifier;
use quanthub::adapters::kv::{KeyValueStore, MemoryStore};
use quanthub::config::DingConfig;
use quanthub::intel::types::Intel;
use quanthub::intel::{IntelMenu, IntelService};
use std::collections::BTreeMap;
use std::sync::Arc;

fn notifier() -> Arc<DingNotifier> {
    DingNotifier::new(DingConfig {
        agent_id: 1,
        key: "k".to_string(),
        secret: "s".to_string(),
        api_url: "http://127.0.0.1:1".to_string(),
    })
}

fn filter_path() -> String {
    std::env::temp_dir()
        .join(format!("quanthub-flow-{}.json", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .to_string()
}

fn intel(sub: &str) -> Intel {
    Intel {
        seq: 0,
        time: chrono::Utc::now(),
        level: 1,
        main_type: "test".to_string(),
        sub_type: sub.to_string(),
        ding_type: "txt".to_string(),
        title: "test-intel".to_string(),
        content: "payload".to_string(),
        tts: String::new(),
        url: String::new(),
    }
}

#[tokio::test]
async fn subscription_routing_end_to_end() {
    let kv: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let path = filter_path();
    let svc = IntelService::new(kv.clone(), notifier(), "13800000000", "secret", &path).await;

    let mut subtypes = BTreeMap::new();
    subtypes.insert("foo".to_string(), 0);
    subtypes.insert("bar".to_string(), 0);
    svc.handle_menu(IntelMenu {
        main_type: "test".to_string(),
        subtypes,
        subtype_uncertain: false,
        subtype_uncertain_reason: String::new(),
    });

    // user U subscribes the channel and excludes subtype `bar`
    assert_eq!(svc.handle_command("s test U nick").await, "subscribe [test] done");
    assert_eq!(
        svc.handle_command("xs test bar U nick").await,
        "[bar] added to [test]'s black list"
    );

    // `foo` matches, `bar` does not
    svc.process_intel(intel("foo")).await;
    svc.process_intel(intel("bar")).await;

    let backlog = kv.lrange("intel_list", 0, -1).await.unwrap();
    assert_eq!(backlog.len(), 2);
    let first: Intel = serde_json::from_str(&backlog[0]).unwrap();
    let second: Intel = serde_json::from_str(&backlog[1]).unwrap();
    assert_eq!(first.seq, 1);
    assert_eq!(second.seq, 2);
    assert_eq!(
        kv.hget("intel_status", "latest_seq").await.unwrap().as_deref(),
        Some("2")
    );

    // the match rule drives the recipient set directly
    assert_eq!(svc.filter.matched_users("test", "foo"), vec!["U".to_string()]);
    assert!(svc.filter.matched_users("test", "bar").is_empty());

    // undo the exclusion: `bar` matches again
    assert_eq!(
        svc.handle_command("uxs test bar U nick").await,
        "[bar] removed from [test]'s black list"
    );

    // unsubscribe restores the untouched state
    assert_eq!(svc.handle_command("us test U nick").await, "unsubscribe [test] done");
    let summary = svc.handle_command("my U nick").await;
    assert!(!summary.contains("*[test]"));

    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn sequence_resumes_from_store() {
    let kv: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    kv.hset("intel_status", "latest_seq", "41").await.unwrap();
    let path = filter_path();
    let svc = IntelService::new(kv.clone(), notifier(), "13800000000", "secret", &path).await;

    svc.process_intel(intel("foo")).await;
    assert_eq!(
        kv.hget("intel_status", "latest_seq").await.unwrap().as_deref(),
        Some("42")
    );
    std::fs::remove_file(&path).ok();
}
