mod helpers;

use grc_acl::acl::{self, versions, AclError, Engine, Permission, RoleKey, RoleRegistry, RuleTree};
use helpers::{all_grants, grant_set, install, map, obj, tree, GrantBuilder, TestDb};
use serde_json::json;

fn without_comments() -> serde_json::Value {
    json!({ "Audit": { "Admin RUD": { "Assessment RUD": {} } } })
}

fn with_comments() -> serde_json::Value {
    json!({ "Audit": { "Admin RUD": { "Assessment RUD": { "Comment R": {} } } } })
}

async fn seeded(db: &sea_orm::DatabaseConnection, engine: &Engine) {
    install(db, engine, without_comments()).await;
    map(db, engine, &obj("Audit", 1), &obj("Assessment", 1)).await;
    map(db, engine, &obj("Assessment", 1), &obj("Comment", 1)).await;
    GrantBuilder::new(7).on(obj("Audit", 1)).create(db, engine).await;
}

#[tokio::test]
async fn test_added_branch_is_backfilled_and_removed_again() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let engine = Engine::default();
    seeded(db, &engine).await;

    let before = grant_set(db).await;
    assert_eq!(before.len(), 2);
    assert!(!acl::check(db, 7, &obj("Comment", 1), Permission::Read).await.unwrap());

    let forward = engine
        .diff_and_apply(db, &tree(without_comments()), &tree(with_comments()))
        .await
        .unwrap();
    assert!(!forward.already_applied);
    assert_eq!(forward.roles_added, 1);
    assert_eq!(forward.grants_created, 1);
    assert!(acl::check(db, 7, &obj("Comment", 1), Permission::Read).await.unwrap());

    let backward = engine
        .diff_and_apply(db, &tree(with_comments()), &tree(without_comments()))
        .await
        .unwrap();
    assert_eq!(backward.roles_removed, 1);
    assert_eq!(backward.grants_removed, 1);
    assert_eq!(grant_set(db).await, before);

    let registry = RoleRegistry::load(db).await.unwrap();
    assert!(registry
        .find(&RoleKey::new("Comment", "Admin*Audit*Assessment"))
        .is_none());
}

#[tokio::test]
async fn test_reapplying_a_change_is_a_no_op() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let engine = Engine::default();
    seeded(db, &engine).await;

    let old = tree(without_comments());
    let new = tree(with_comments());
    engine.diff_and_apply(db, &old, &new).await.unwrap();
    let after_first = all_grants(db).await;

    let again = engine.diff_and_apply(db, &old, &new).await.unwrap();
    assert!(again.already_applied);
    assert_eq!(again.grants_created, 0);
    assert_eq!(all_grants(db).await, after_first);
}

#[tokio::test]
async fn test_permission_change_rewrites_bits() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let engine = Engine::default();
    seeded(db, &engine).await;
    assert!(acl::check(db, 7, &obj("Assessment", 1), Permission::Delete).await.unwrap());

    let report = engine
        .diff_and_apply(
            db,
            &tree(without_comments()),
            &tree(json!({ "Audit": { "Admin RUD": { "Assessment R": {} } } })),
        )
        .await
        .unwrap();
    assert_eq!(report.roles_changed, 1);
    assert_eq!(report.grants_removed, 0);
    assert!(acl::check(db, 7, &obj("Assessment", 1), Permission::Read).await.unwrap());
    assert!(!acl::check(db, 7, &obj("Assessment", 1), Permission::Delete).await.unwrap());
}

#[tokio::test]
async fn test_unexpected_registry_is_rejected() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let engine = Engine::default();
    seeded(db, &engine).await;

    // Registry holds neither side of this change
    let old = tree(json!({ "Audit": { "Auditors RU": {} } }));
    let new = tree(json!({ "Audit": { "Auditors RU": { "Assessment R": {} } } }));
    let err = engine.diff_and_apply(db, &old, &new).await.unwrap_err();
    assert!(matches!(err, AclError::RuleTreeMismatch(_)));

    let registry = RoleRegistry::load(db).await.unwrap();
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn test_registry_with_roles_outside_old_tree_is_rejected() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let engine = Engine::default();
    install(db, &engine, json!({ "Audit": { "Admin RUD": {}, "Auditors RU": {} } })).await;

    let err = engine
        .diff_and_apply(
            db,
            &tree(json!({ "Audit": { "Admin RUD": {} } })),
            &tree(json!({ "Audit": { "Admin RUD": { "Assessment RUD": {} } } })),
        )
        .await
        .unwrap_err();
    match err {
        AclError::RuleTreeMismatch(why) => assert!(why.contains("Auditors"), "{why}"),
        other => panic!("expected RuleTreeMismatch, got {other:?}"),
    }
    assert_eq!(RoleRegistry::load(db).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_root_role_with_assignments_cannot_be_removed() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let engine = Engine::default();
    seeded(db, &engine).await;

    let err = engine
        .diff_and_apply(db, &tree(without_comments()), &RuleTree::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AclError::RootRoleInUse { grants: 1, .. }));
    assert_eq!(all_grants(db).await.len(), 2);

    let root = all_grants(db).await.into_iter().find(|g| g.is_root()).unwrap();
    engine.revoke_base_role(db, root.id).await.unwrap();
    let report = engine
        .diff_and_apply(db, &tree(without_comments()), &RuleTree::new())
        .await
        .unwrap();
    assert_eq!(report.roles_removed, 2);
    assert!(RoleRegistry::load(db).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rule_history_applies_once() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let engine = Engine::default();
    let history = versions::history();

    let applied = engine.apply_rule_history(db, &history).await.unwrap();
    assert_eq!(applied, history.len());
    assert_eq!(engine.apply_rule_history(db, &history).await.unwrap(), 0);

    let registry = RoleRegistry::load(db).await.unwrap();
    let latest = RuleTree::from_json(&versions::audit_propagation_v2()).unwrap();
    for spec in latest.flatten().unwrap() {
        assert!(registry.holds(&spec).is_ok(), "{}", spec.key);
    }
    assert!(registry
        .find(&RoleKey::new("Evidence", "Auditors*Audit*Assessment"))
        .is_some());
}
