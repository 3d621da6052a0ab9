#![allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]

use super::*;

async fn db() -> FleetDatabase {
    FleetDatabase::open_in_memory().await.unwrap()
}

async fn seed_instance(db: &FleetDatabase, id: &str) {
    db.create_instance(id, &format!("Home Assistant - {id}"), "12345678", unix_timestamp_ms())
        .await
        .unwrap();
}

#[tokio::test]
async fn open_creates_the_database_file_and_parent_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("fleet.db");

    let db = FleetDatabase::open(&path).await.unwrap();
    seed_instance(&db, "ha-1a2b").await;
    assert!(path.exists());

    // Reopening sees the persisted data.
    drop(db);
    let db = FleetDatabase::open(&path).await.unwrap();
    assert_eq!(db.list_instances().await.unwrap().len(), 1);
}

#[tokio::test]
async fn instance_lifecycle() {
    let db = db().await;
    seed_instance(&db, "ha-1a2b").await;

    let instance = db.get_instance("ha-1a2b").await.unwrap();
    assert_eq!(instance.status, "offline");
    assert!(instance.last_seen.is_none());

    db.update_instance_status("ha-1a2b", "online").await.unwrap();
    let instance = db.get_instance("ha-1a2b").await.unwrap();
    assert_eq!(instance.status, "online");
    assert!(instance.last_seen.is_some());

    assert_eq!(db.list_instances().await.unwrap().len(), 1);
}

#[tokio::test]
async fn instance_rows_serialize_for_the_operator_surface() {
    let db = db().await;
    seed_instance(&db, "ha-1a2b").await;

    let instance = db.get_instance("ha-1a2b").await.unwrap();
    let json = serde_json::to_value(&instance).unwrap();
    assert_eq!(json["id"], "ha-1a2b");
    assert_eq!(json["status"], "offline");
    assert!(json["last_seen"].is_null());
}

#[tokio::test]
async fn missing_instance_is_not_found() {
    let db = db().await;
    assert!(matches!(
        db.get_instance("ha-ffff").await.unwrap_err(),
        DatabaseError::NotFound(_)
    ));
}

#[tokio::test]
async fn delete_instance_removes_dependent_rows() {
    let db = db().await;
    seed_instance(&db, "ha-1a2b").await;

    db.insert_heartbeat("ha-1a2b", Some(40)).await.unwrap();
    db.create_refresh_token("rt-1", "ha-1a2b", "hash", None)
        .await
        .unwrap();
    db.upsert_system_info("ha-1a2b", &SystemInfoParams::default())
        .await
        .unwrap();
    db.insert_stats_report("ha-1a2b", unix_timestamp_ms(), &StatsParams::default())
        .await
        .unwrap();

    db.delete_instance("ha-1a2b").await.unwrap();

    assert!(db.get_instance("ha-1a2b").await.is_err());
    assert!(db.get_refresh_token("rt-1").await.is_err());
    assert!(db.get_system_info("ha-1a2b").await.unwrap().is_none());
    assert!(db.list_stats_reports("ha-1a2b").await.unwrap().is_empty());
    assert!(db
        .list_heartbeats_since("ha-1a2b", 0)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn consume_enrollment_code_is_single_use() {
    let db = db().await;
    db.create_enrollment_code("c1", "12345678", unix_timestamp_ms() + 60_000)
        .await
        .unwrap();

    let first = db.consume_enrollment_code("12345678").await.unwrap();
    assert_eq!(first.as_deref(), Some("c1"));

    // Second consumption of the same code finds nothing.
    assert!(db.consume_enrollment_code("12345678").await.unwrap().is_none());

    let record = db.get_enrollment_code("c1").await.unwrap();
    assert!(record.used_at.is_some());
}

#[tokio::test]
async fn expired_code_is_not_consumable() {
    let db = db().await;
    db.create_enrollment_code("c1", "12345678", unix_timestamp_ms() - 1)
        .await
        .unwrap();

    assert!(db.consume_enrollment_code("12345678").await.unwrap().is_none());

    // Still visible to the unfiltered lookup.
    assert!(db.find_enrollment_code("12345678").await.unwrap().is_some());
}

#[tokio::test]
async fn deactivation_excludes_used_codes() {
    let db = db().await;
    db.create_enrollment_code("c1", "11111111", unix_timestamp_ms() + 60_000)
        .await
        .unwrap();
    db.create_enrollment_code("c2", "22222222", unix_timestamp_ms() + 60_000)
        .await
        .unwrap();

    db.consume_enrollment_code("11111111").await.unwrap();

    assert!(!db.deactivate_enrollment_code("c1").await.unwrap());
    assert!(db.deactivate_enrollment_code("c2").await.unwrap());

    assert!(db.list_active_enrollment_codes().await.unwrap().is_empty());
    assert_eq!(db.list_all_enrollment_codes().await.unwrap().len(), 2);
}

#[tokio::test]
async fn refresh_token_lookup_filters_revoked_and_expired() {
    let db = db().await;
    seed_instance(&db, "ha-1a2b").await;

    db.create_refresh_token("rt-live", "ha-1a2b", "hash-live", None)
        .await
        .unwrap();
    db.create_refresh_token(
        "rt-expired",
        "ha-1a2b",
        "hash-expired",
        Some(unix_timestamp_ms() - 1),
    )
    .await
    .unwrap();
    db.create_refresh_token("rt-revoked", "ha-1a2b", "hash-revoked", None)
        .await
        .unwrap();
    db.revoke_refresh_token("rt-revoked").await.unwrap();

    let live = db
        .get_active_refresh_token_by_hash("hash-live")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.id, "rt-live");

    // Lookup stamps last_used_at.
    let live = db.get_refresh_token("rt-live").await.unwrap();
    assert!(live.last_used_at.is_some());

    assert!(db
        .get_active_refresh_token_by_hash("hash-expired")
        .await
        .unwrap()
        .is_none());
    assert!(db
        .get_active_refresh_token_by_hash("hash-revoked")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn rotation_revokes_old_and_activates_new() {
    let db = db().await;
    seed_instance(&db, "ha-1a2b").await;

    db.create_refresh_token("rt-old", "ha-1a2b", "hash-old", None)
        .await
        .unwrap();

    let new = db
        .rotate_refresh_token("rt-old", "rt-new", "ha-1a2b", "hash-new", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(new.id, "rt-new");
    assert!(new.revoked_at.is_none());

    let old = db.get_refresh_token("rt-old").await.unwrap();
    assert!(old.revoked_at.is_some());

    assert!(db
        .get_active_refresh_token_by_hash("hash-old")
        .await
        .unwrap()
        .is_none());
    assert!(db
        .get_active_refresh_token_by_hash("hash-new")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn rotating_an_already_revoked_record_is_refused() {
    let db = db().await;
    seed_instance(&db, "ha-1a2b").await;

    db.create_refresh_token("rt-old", "ha-1a2b", "hash-old", None)
        .await
        .unwrap();
    db.rotate_refresh_token("rt-old", "rt-a", "ha-1a2b", "hash-a", None)
        .await
        .unwrap()
        .unwrap();

    // A second rotation of the same record rolls back: no successor row.
    assert!(db
        .rotate_refresh_token("rt-old", "rt-b", "ha-1a2b", "hash-b", None)
        .await
        .unwrap()
        .is_none());
    assert!(db.get_refresh_token("rt-b").await.is_err());
    assert!(db
        .get_active_refresh_token_by_hash("hash-b")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn system_info_upsert_keeps_one_row_per_instance() {
    let db = db().await;
    seed_instance(&db, "ha-1a2b").await;

    let mut info = SystemInfoParams {
        hostname: "first".to_string(),
        ..SystemInfoParams::default()
    };
    db.upsert_system_info("ha-1a2b", &info).await.unwrap();

    info.hostname = "second".to_string();
    db.upsert_system_info("ha-1a2b", &info).await.unwrap();

    let stored = db.get_system_info("ha-1a2b").await.unwrap().unwrap();
    assert_eq!(stored.hostname.as_deref(), Some("second"));
}

#[tokio::test]
async fn heartbeats_are_filtered_by_cutoff() {
    let db = db().await;
    seed_instance(&db, "ha-1a2b").await;

    db.insert_heartbeat("ha-1a2b", Some(40)).await.unwrap();
    db.insert_heartbeat("ha-1a2b", None).await.unwrap();

    let all = db.list_heartbeats_since("ha-1a2b", 0).await.unwrap();
    assert_eq!(all.len(), 2);

    let none = db
        .list_heartbeats_since("ha-1a2b", unix_timestamp_ms() + 1_000)
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn update_snapshot_is_replaced_wholesale() {
    let db = db().await;
    seed_instance(&db, "ha-1a2b").await;

    let component = |ty: &str, available: bool| UpdateComponentParams {
        component_type: ty.to_string(),
        slug: String::new(),
        name: ty.to_string(),
        version: "1".to_string(),
        version_latest: "2".to_string(),
        update_available: available,
    };

    db.replace_reported_updates(
        "ha-1a2b",
        1_700_000_000,
        &[component("core", true), component("os", false)],
    )
    .await
    .unwrap();
    assert_eq!(db.list_reported_updates("ha-1a2b").await.unwrap().len(), 2);

    db.replace_reported_updates("ha-1a2b", 1_700_000_100, &[component("supervisor", true)])
        .await
        .unwrap();

    let stored = db.list_reported_updates("ha-1a2b").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].update_type, "supervisor");
    assert_eq!(stored[0].report_generated_at, Some(1_700_000_100));
}

#[tokio::test]
async fn connectivity_checks_share_the_report_public_ip() {
    let db = db().await;
    seed_instance(&db, "ha-1a2b").await;

    let checks = vec![
        ConnectivityCheckParams {
            target: "cloudflare-dns".to_string(),
            status: "reachable".to_string(),
            latency_ms: Some(12),
            error: None,
        },
        ConnectivityCheckParams {
            target: "github".to_string(),
            status: "unreachable".to_string(),
            latency_ms: None,
            error: Some("connection refused".to_string()),
        },
    ];
    db.insert_connectivity_checks("ha-1a2b", Some("203.0.113.7"), &checks)
        .await
        .unwrap();

    let stored = db.list_connectivity_checks("ha-1a2b").await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored
        .iter()
        .all(|c| c.public_ip.as_deref() == Some("203.0.113.7")));
}
