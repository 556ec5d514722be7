//! PostgreSQL 存储集成测试
//!
//! 需要真实数据库：设置 TEST_DATABASE_URL 后运行
//! `cargo test --test postgres_tests -- --ignored`

mod common;

use common::setup_pg;
use maintenance_authz::{
    error::AppError,
    models::{audit::Actor, hierarchy::EntityKind, permission::Action},
    repository::{PermissionStore, RoleStore, Store, UserStore},
};
use serial_test::serial;

#[tokio::test]
#[ignore]
#[serial]
async fn test_pg_hierarchy_and_scoped_visibility() {
    let Some((ctx, _pool)) = setup_pg().await else {
        return;
    };

    ctx.register("Root").await;
    let tech = ctx.register("Tech").await;
    let (plant, area, sector, asset) = ctx.create_chain("Main").await;
    let sibling = ctx.create(EntityKind::Sector, "Main sector B", Some(&area)).await;

    ctx.grant(tech.id, &format!("sectors.view.{}", sector.id)).await;

    let authz = &ctx.state.authz;
    assert!(authz.can(tech.id, Action::View, sector.entity_ref()).await);
    assert!(authz.can(tech.id, Action::View, asset.entity_ref()).await);
    assert!(authz.can(tech.id, Action::View, plant.entity_ref()).await);
    assert!(!authz.can(tech.id, Action::View, sibling.entity_ref()).await);

    let sectors = ctx.state.hierarchy_service.list(EntityKind::Sector).await.unwrap();
    let visible = authz.filter_visible(tech.id, sectors).await;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, sector.id);

    let ancestors = ctx.state.hierarchy_service.ancestors(asset.entity_ref()).await.unwrap();
    assert_eq!(
        ancestors,
        vec![sector.entity_ref(), area.entity_ref(), plant.entity_ref()]
    );
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_pg_entity_lifecycle_purges_permissions() {
    let Some((ctx, _pool)) = setup_pg().await else {
        return;
    };

    ctx.register("Root").await;
    let tech = ctx.register("Tech").await;
    let (_, _, sector, asset) = ctx.create_chain("Purge").await;
    ctx.grant(tech.id, &format!("assets.manage.sector.{}", sector.id)).await;

    let result = ctx
        .state
        .hierarchy_service
        .delete(Actor::System, sector.entity_ref())
        .await;
    assert!(matches!(result, Err(AppError::HasChildren(_))));

    ctx.state
        .hierarchy_service
        .delete(Actor::System, asset.entity_ref())
        .await
        .unwrap();
    let purged = ctx
        .state
        .hierarchy_service
        .delete(Actor::System, sector.entity_ref())
        .await
        .unwrap();
    assert_eq!(purged, 9);

    let mut tx = ctx.store.begin().await.unwrap();
    assert!(tx.permissions_for_scope(sector.entity_ref()).await.unwrap().is_empty());
    assert!(tx.user_permission_names(tech.id).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_pg_last_administrator_guard() {
    let Some((ctx, _pool)) = setup_pg().await else {
        return;
    };

    let root = ctx.register("Root").await;
    let second = ctx.register("Second").await;
    ctx.make_admin(second.id).await;
    let manager = ctx.register("Manager").await;
    ctx.grant(manager.id, "system.manage-users").await;

    ctx.state.user_service.delete(root.id, second.id).await.unwrap();

    let result = ctx.state.user_service.delete(manager.id, root.id).await;
    match result {
        Err(AppError::LastAdministrator(message)) => {
            assert!(message.contains("last active administrator"))
        }
        other => panic!("expected LastAdministrator, got {:?}", other),
    }

    ctx.state
        .user_service
        .restore(Actor::User(manager.id), second.id)
        .await
        .unwrap();
    ctx.state.user_service.force_delete(manager.id, root.id).await.unwrap();
    assert_eq!(ctx.active_admins().await, 1);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_pg_concurrent_deletes_keep_one_administrator() {
    let Some((ctx, _pool)) = setup_pg().await else {
        return;
    };

    let root = ctx.register("Root").await;
    let second = ctx.register("Second").await;
    ctx.make_admin(second.id).await;
    let manager = ctx.register("Manager").await;
    ctx.grant(manager.id, "system.manage-users").await;

    let users = &ctx.state.user_service;
    let (first, other) = tokio::join!(
        users.delete(manager.id, root.id),
        users.delete(manager.id, second.id)
    );

    // 行锁让第二个事务看到第一个的提交；触发器拒绝同样算作保护生效
    let results = [first, other];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| match r {
        Err(AppError::LastAdministrator(_)) => true,
        Err(e) => e.is_last_admin_trigger(),
        Ok(_) => false,
    }));
    assert_eq!(ctx.active_admins().await, 1);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_pg_role_permission_revoke() {
    let Some((ctx, _pool)) = setup_pg().await else {
        return;
    };

    ctx.register("Root").await;
    let role_id = ctx.admin_role_id().await;

    let mut tx = ctx.store.begin().await.unwrap();
    let record = tx.find_permission("system.create-plants").await.unwrap().unwrap();
    tx.grant_to_role(role_id, record.id).await.unwrap();
    assert!(tx.revoke_from_role(role_id, record.id).await.unwrap());
    assert!(!tx.revoke_from_role(role_id, record.id).await.unwrap());
    assert!(!tx
        .role_permission_names(role_id)
        .await
        .unwrap()
        .contains(&"system.create-plants".to_string()));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_pg_trigger_rejects_bypassing_soft_delete() {
    let Some((ctx, _pool)) = setup_pg().await else {
        return;
    };

    let root = ctx.register("Root").await;

    // 绕过应用层检查直接写入，触发器兜底
    let mut tx = ctx.store.begin().await.unwrap();
    let error = tx.soft_delete_user(root.id).await.unwrap_err();
    assert!(error.is_last_admin_trigger());
    assert_eq!(error.code(), 409);
    drop(tx);

    let role_id = ctx.admin_role_id().await;
    let mut tx = ctx.store.begin().await.unwrap();
    let error = tx.remove_role(root.id, role_id).await.unwrap_err();
    assert!(error.is_last_admin_trigger());
    drop(tx);

    assert_eq!(ctx.active_admins().await, 1);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_pg_audit_log_is_persisted() {
    let Some((ctx, _pool)) = setup_pg().await else {
        return;
    };

    let root = ctx.register("Root").await;
    ctx.create(EntityKind::Plant, "Audited", None).await;

    let entries = ctx.state.audit_service.recent(10).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].action, "plant.create");
    assert_eq!(entries[0].actor_id, common::SYSTEM_ACTOR_ID);
    assert_eq!(entries[1].action, "user.create");
    assert_eq!(entries[1].target_id, Some(root.id));
}
