//! Tests for the in-memory resource backend.

mod common;

use common::directive_resource;
use config_getter::cluster::memory::MemoryCluster;
use config_getter::cluster::{Informer, ResourceStore, StoreError};
use config_getter::model::{Notification, Resource, ResourceKey};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn update_bumps_version_and_is_recorded() {
    let cluster = MemoryCluster::with_resources([Resource::new("default", "a")]);
    let current = cluster.get(&ResourceKey::new("default", "a")).unwrap();

    let mut changed = current.clone();
    changed.set_datum("k", "v");
    let written = cluster.update(changed).await.unwrap();

    assert_ne!(written.resource_version, current.resource_version);
    let verbs: Vec<_> = cluster.actions().iter().map(|a| a.verb).collect();
    assert_eq!(verbs, vec!["update"]);
    assert!(cluster.get(&written.key()).unwrap().has_datum("k"));
}

#[tokio::test]
async fn stale_update_is_a_conflict() {
    let cluster = MemoryCluster::with_resources([Resource::new("default", "a")]);
    let stale = cluster.get(&ResourceKey::new("default", "a")).unwrap();

    // Someone else writes first.
    cluster.apply(stale.clone().datum("other", "writer"));

    let err = cluster.update(stale.datum("k", "v")).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }), "got {err:?}");
}

#[tokio::test]
async fn update_of_missing_resource_is_not_found() {
    let cluster = MemoryCluster::new();

    let err = cluster
        .update(Resource::new("default", "ghost"))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn informer_lists_then_streams_updates() {
    let cluster = MemoryCluster::with_resources([directive_resource("a", "k=example.com")]);
    let informer = Arc::new(cluster.informer());
    assert!(!informer.has_synced());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let stop = CancellationToken::new();
    let task = {
        let informer = Arc::clone(&informer);
        let stop = stop.clone();
        tokio::spawn(async move { informer.run(tx, stop).await })
    };

    let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert!(matches!(first, Notification::Added(ref r) if r.name == "a"));
    assert!(informer.has_synced());

    let key = ResourceKey::new("default", "a");
    let cached = informer.get_by_key(&key).unwrap().unwrap();
    cluster.apply(cached.clone().datum("k", "v"));

    match timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap() {
        Notification::Updated { old, new } => {
            assert_eq!(old.resource_version, cached.resource_version);
            assert!(new.has_datum("k"));
        }
        other => panic!("expected update, got {other:?}"),
    }
    assert!(informer.get_by_key(&key).unwrap().unwrap().has_datum("k"));

    cluster.apply(Resource::new("default", "b"));
    let added = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert!(matches!(added, Notification::Added(ref r) if r.name == "b"));

    cluster.delete(&key);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(informer.get_by_key(&key).unwrap().is_none());

    stop.cancel();
    timeout(Duration::from_secs(1), task).await.unwrap().unwrap();

    let verbs: Vec<_> = cluster.actions().iter().map(|a| a.verb).collect();
    assert_eq!(verbs, vec!["list", "watch"]);
}

#[test]
fn load_seed_reads_resource_tables() {
    let dir = std::env::temp_dir().join(format!("config-getter-seed-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("resources.toml");
    std::fs::write(
        &path,
        r#"
[[resource]]
name = "jokes"
[resource.annotations]
"x-k8s-io/curl-me-that" = "joke=curl-a-joke.herokuapp.com"

[[resource]]
namespace = "kube-system"
name = "plain"
[resource.data]
existing = "value"
"#,
    )
    .unwrap();

    let cluster = MemoryCluster::load_seed(&path).unwrap();

    let jokes = cluster.get(&ResourceKey::new("default", "jokes")).unwrap();
    assert_eq!(jokes.directive(), Some("joke=curl-a-joke.herokuapp.com"));
    assert!(jokes.data.is_none());
    assert!(!jokes.resource_version.is_empty());

    let plain = cluster.get(&ResourceKey::new("kube-system", "plain")).unwrap();
    assert!(plain.has_datum("existing"));
    assert!(cluster.actions().is_empty());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn load_seed_rejects_malformed_files() {
    let dir = std::env::temp_dir().join(format!("config-getter-bad-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("resources.toml");
    std::fs::write(&path, "[[resource]]\nnamespace = 3\n").unwrap();

    assert!(MemoryCluster::load_seed(&path).is_err());

    std::fs::remove_dir_all(&dir).ok();
}
