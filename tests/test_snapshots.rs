mod helpers;

use grc_acl::acl::{self, grants, Engine, Permission, SnapshotPair};
use helpers::{all_grants, grant_set, install, map, obj, GrantBuilder, TestDb};
use sea_orm::DatabaseConnection;
use serde_json::json;

/// Admin and Auditors are snapshot-eligible by default; Observers are not.
async fn audit_with_members(db: &DatabaseConnection, engine: &Engine, with_observers: bool) {
    let mut rules = json!({
        "Audit": {
            "Admin RUD": { "Snapshot RUD": {} },
            "Auditors RU": { "Snapshot R": {} }
        }
    });
    if with_observers {
        rules["Audit"]["Observers R"] = json!({ "Snapshot R": {} });
    }
    install(db, engine, rules).await;

    GrantBuilder::new(1).on(obj("Audit", 1)).create(db, engine).await;
    GrantBuilder::new(2)
        .role("Audit", "Auditors")
        .on(obj("Audit", 1))
        .create(db, engine)
        .await;
    if with_observers {
        GrantBuilder::new(3)
            .role("Audit", "Observers")
            .on(obj("Audit", 1))
            .create(db, engine)
            .await;
    }
    GrantBuilder::new(4).on(obj("Audit", 2)).create(db, engine).await;
}

#[tokio::test]
async fn test_seeding_copies_eligible_grants() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let engine = Engine::default();
    audit_with_members(db, &engine, true).await;

    let inserted = engine
        .seed_snapshots(
            db,
            &[
                SnapshotPair {
                    snapshot_id: 10,
                    parent: obj("Audit", 1),
                },
                SnapshotPair {
                    snapshot_id: 11,
                    parent: obj("Audit", 2),
                },
            ],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 3);

    let snapshot = obj("Snapshot", 10);
    assert!(acl::check(db, 1, &snapshot, Permission::Delete).await.unwrap());
    assert!(acl::check(db, 2, &snapshot, Permission::Read).await.unwrap());
    assert!(!acl::check(db, 2, &snapshot, Permission::Update).await.unwrap());
    // Observers are not snapshot-eligible
    assert!(!acl::check(db, 3, &snapshot, Permission::Read).await.unwrap());
    assert!(acl::check(db, 4, &obj("Snapshot", 11), Permission::Read).await.unwrap());
    assert!(!acl::check(db, 4, &snapshot, Permission::Read).await.unwrap());

    for grant in grants::for_object(db, &snapshot).await.unwrap() {
        let parent = grants::get(db, grant.parent_grant_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parent.object, obj("Audit", 1));
        assert_eq!(grant.base_grant_id, parent.base_grant_id);
    }
}

#[tokio::test]
async fn test_seeding_matches_mapping_expansion() {
    let engine = Engine::default();

    let seeded_db = TestDb::new().await;
    let seeded = seeded_db.connection();
    audit_with_members(seeded, &engine, false).await;
    engine
        .seed_snapshots(
            seeded,
            &[SnapshotPair {
                snapshot_id: 10,
                parent: obj("Audit", 1),
            }],
        )
        .await
        .unwrap();

    // Mapping the snapshot afterwards finds nothing left to create
    let before = all_grants(seeded).await;
    map(seeded, &engine, &obj("Audit", 1), &obj("Snapshot", 10)).await;
    assert_eq!(all_grants(seeded).await, before);

    let mapped_db = TestDb::new().await;
    let mapped = mapped_db.connection();
    audit_with_members(mapped, &engine, false).await;
    map(mapped, &engine, &obj("Audit", 1), &obj("Snapshot", 10)).await;

    assert_eq!(grant_set(seeded).await, grant_set(mapped).await);
}

#[tokio::test]
async fn test_seeding_twice_inserts_nothing() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let engine = Engine::default();
    audit_with_members(db, &engine, true).await;

    let pairs = [SnapshotPair {
        snapshot_id: 10,
        parent: obj("Audit", 1),
    }];
    assert_eq!(engine.seed_snapshots(db, &pairs).await.unwrap(), 2);
    assert_eq!(engine.seed_snapshots(db, &pairs).await.unwrap(), 0);
    assert_eq!(engine.seed_snapshots(db, &[]).await.unwrap(), 0);
}
