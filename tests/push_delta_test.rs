//! Push delta computation through the sync manager

mod common;

use serde_json::json;
use tempfile::TempDir;

use common::manager;
use shelfsync::index::{ClientManifest, UpsertStatus};
use shelfsync::media::hash_bytes;
use shelfsync::media::PutStatus;
use shelfsync::sync::ErrorClass;

fn manifest(value: serde_json::Value) -> ClientManifest {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_client_round_trip_converges() {
    let temp_dir = TempDir::new().unwrap();
    let manager = manager(&temp_dir).await;

    let request = manifest(json!({
        "json": {"games": ["a", "b"], "platforms": ["pc"]},
        "versions": {"games": {"a": "v1", "b": "v1"}},
        "mediaFolders": {"games/a": 2}
    }));

    let delta = manager.push_delta("laptop", &request).await.unwrap();
    assert_eq!(delta.to_upsert["games"], vec!["a", "b"]);
    assert_eq!(delta.to_upsert["platforms"], vec!["pc"]);
    assert_eq!(delta.media.upload_folders, vec!["games/a"]);

    // Client uploads what it was asked for
    for id in ["a", "b"] {
        let status = manager
            .upsert_entity("games", id, &json!({"Id": id, "MetadataVersion": "v1"}))
            .await
            .unwrap();
        assert_eq!(status, UpsertStatus::Created);
    }
    manager.upsert_entity("platforms", "pc", &json!({"Id": "pc"})).await.unwrap();
    manager.put_media("games/a/cover.jpg", b"cover", None).await.unwrap();
    manager.put_media("games/a/background.jpg", b"bg", None).await.unwrap();

    let delta = manager.push_delta("laptop", &request).await.unwrap();
    assert!(delta.is_empty(), "unexpected delta: {:?}", delta);
}

#[tokio::test]
async fn test_server_only_ids_are_reported_for_deletion() {
    let temp_dir = TempDir::new().unwrap();
    let manager = manager(&temp_dir).await;

    for id in ["a", "b", "c"] {
        manager.upsert_entity("games", id, &json!({"Id": id})).await.unwrap();
    }

    let delta = manager
        .push_delta("laptop", &manifest(json!({"json": {"games": ["b"]}})))
        .await
        .unwrap();
    assert!(delta.to_upsert["games"].is_empty());
    assert_eq!(delta.to_delete["games"], vec!["a", "c"]);

    // The delta is advisory; nothing was removed
    assert!(manager.read_entity("games", "a").await.unwrap().is_some());

    assert!(manager.delete_entity("games", "a").await.unwrap());
    assert!(!manager.delete_entity("games", "a").await.unwrap());
}

#[tokio::test]
async fn test_unknown_group_fails_whole_request() {
    let temp_dir = TempDir::new().unwrap();
    let manager = manager(&temp_dir).await;

    let request = manifest(json!({
        "json": {"games": ["a"]},
        "versions": {"secrets": {"x": "1"}}
    }));
    let err = manager.push_delta("laptop", &request).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::InvalidInput);
    assert_eq!(err.status_code(), 400);

    let err = manager
        .upsert_entity("secrets", "x", &json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::InvalidInput);
}

#[tokio::test]
async fn test_media_put_respects_hash() {
    let temp_dir = TempDir::new().unwrap();
    let manager = manager(&temp_dir).await;

    let created = manager.put_media("games/a/cover.jpg", b"AAAA", None).await.unwrap();
    assert_eq!(created.status, PutStatus::Created);

    // Same length, no hash: trusted as unchanged
    let skipped = manager.put_media("games/a/cover.jpg", b"BBBB", None).await.unwrap();
    assert_eq!(skipped.status, PutStatus::Unchanged);

    // Same length, hash differs: rewritten
    let hash = hash_bytes(b"BBBB");
    let updated = manager
        .put_media("games/a/cover.jpg", b"BBBB", Some(&hash))
        .await
        .unwrap();
    assert_eq!(updated.status, PutStatus::Updated);
    assert_eq!(manager.read_media("games/a/cover.jpg").await.unwrap().as_ref(), b"BBBB");

    let path = manager.get_media("games/a/cover.jpg").await.unwrap();
    assert!(path.starts_with(temp_dir.path()));

    let err = manager.get_media("../../etc/passwd").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::InvalidInput);
    let err = manager.get_media("games/a/missing.jpg").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotFound);
}
