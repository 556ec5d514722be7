//! HTTP API 集成测试
//! 基于内存存储，通过 tower::ServiceExt::oneshot 直接驱动路由

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;
use common::{setup, TestContext};
use maintenance_authz::{models::hierarchy::EntityKind, routes::create_router};

/// 发送请求并解析 JSON 响应体（空响应体返回 Null）
async fn send(
    ctx: &TestContext,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let app = create_router(ctx.state.clone());

    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };

    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let ctx = setup();

    let (status, json) = send(&ctx, Method::GET, "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert!(json["uptime_secs"].is_number());
}

#[tokio::test]
async fn test_readiness_reflects_administrator_state() {
    let ctx = setup();

    // 空系统：零管理员
    let (status, json) = send(&ctx, Method::GET, "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ready"], false);
    assert_eq!(json["checks"][0]["name"], "administrators");
    assert_eq!(json["checks"][0]["status"], "unhealthy");
    assert!(json["checks"][0]["message"].is_string());

    ctx.register("Root").await;

    let (_, json) = send(&ctx, Method::GET, "/ready", None, None).await;
    assert_eq!(json["ready"], true);
    assert_eq!(json["checks"][0]["status"], "healthy");
    assert!(json["checks"][0].get("message").is_none());
}

#[tokio::test]
async fn test_requests_without_valid_token_are_rejected() {
    let ctx = setup();

    let (status, json) = send(&ctx, Method::GET, "/api/v1/hierarchy/plants", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["code"], 401);

    let (status, _) = send(
        &ctx,
        Method::GET,
        "/api/v1/hierarchy/plants",
        Some("not-a-jwt"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_entity_requires_permission() {
    let ctx = setup();
    let root = ctx.register("Root").await;
    let plain = ctx.register("Plain").await;

    let (status, json) = send(
        &ctx,
        Method::POST,
        "/api/v1/hierarchy/plants",
        Some(ctx.token(&root).as_str()),
        Some(json!({ "name": "North plant" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["name"], "North plant");
    assert_eq!(json["kind"], "plant");

    let (status, json) = send(
        &ctx,
        Method::POST,
        "/api/v1/hierarchy/plants",
        Some(ctx.token(&plain).as_str()),
        Some(json!({ "name": "Rogue plant" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"]["message"], "Access denied");

    // 区域必须带父级
    let (status, _) = send(
        &ctx,
        Method::POST,
        "/api/v1/hierarchy/areas",
        Some(ctx.token(&root).as_str()),
        Some(json!({ "name": "Orphan area" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &ctx,
        Method::GET,
        "/api/v1/hierarchy/rockets",
        Some(ctx.token(&root).as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_and_get_are_filtered_by_scope() {
    let ctx = setup();
    ctx.register("Root").await;
    let tech = ctx.register("Tech").await;
    let (plant, area, sector, _) = ctx.create_chain("Main").await;
    let sibling = ctx.create(EntityKind::Sector, "Main sector B", Some(&area)).await;

    ctx.grant(tech.id, &format!("sectors.view.{}", sector.id)).await;
    let token = ctx.token(&tech);

    let (status, json) = send(&ctx, Method::GET, "/api/v1/hierarchy/sectors", Some(token.as_str()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 1);
    assert_eq!(json["items"][0]["id"], sector.id);

    let (status, json) = send(
        &ctx,
        Method::GET,
        &format!("/api/v1/hierarchy/sectors/{}", sector.id),
        Some(token.as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["entity"]["id"], sector.id);
    assert_eq!(json["ancestors"].as_array().unwrap().len(), 2);

    // 上级可见，兄弟不可见
    let (status, _) = send(
        &ctx,
        Method::GET,
        &format!("/api/v1/hierarchy/plants/{}", plant.id),
        Some(token.as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &ctx,
        Method::GET,
        &format!("/api/v1/hierarchy/sectors/{}", sibling.id),
        Some(token.as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_delete_entity_with_children_conflicts() {
    let ctx = setup();
    let root = ctx.register("Root").await;
    let (_, _, sector, asset) = ctx.create_chain("Busy").await;
    let token = ctx.token(&root);

    let (status, json) = send(
        &ctx,
        Method::DELETE,
        &format!("/api/v1/hierarchy/sectors/{}", sector.id),
        Some(token.as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"]["message"].as_str().unwrap().contains("child"));

    let (status, json) = send(
        &ctx,
        Method::DELETE,
        &format!("/api/v1/hierarchy/assets/{}", asset.id),
        Some(token.as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["purged_permissions"], 5);
}

#[tokio::test]
async fn test_deleting_last_administrator_returns_conflict() {
    let ctx = setup();
    let root = ctx.register("Root").await;
    let manager = ctx.register("Manager").await;
    ctx.grant(manager.id, "system.manage-users").await;
    let token = ctx.token(&manager);

    let (status, json) = send(
        &ctx,
        Method::GET,
        &format!("/api/v1/users/{}/operations/delete", root.id),
        Some(token.as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["allowed"], false);
    assert!(json["message"]
        .as_str()
        .unwrap()
        .contains("last active administrator"));

    let (status, json) = send(
        &ctx,
        Method::DELETE,
        &format!("/api/v1/users/{}", root.id),
        Some(token.as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("last active administrator"));

    let (status, json) = send(&ctx, Method::GET, "/api/v1/admin/status", Some(token.as_str()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "last_admin_guarded");
    assert_eq!(json["active_administrators"], 1);
}

#[tokio::test]
async fn test_self_deletion_is_rejected() {
    let ctx = setup();
    let root = ctx.register("Root").await;
    let plain = ctx.register("Plain").await;

    for user in [&root, &plain] {
        let (status, json) = send(
            &ctx,
            Method::DELETE,
            &format!("/api/v1/users/{}", user.id),
            Some(ctx.token(user).as_str()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["message"], "You cannot delete your own account");
    }
}

#[tokio::test]
async fn test_user_management_requires_manager() {
    let ctx = setup();
    let root = ctx.register("Root").await;
    let plain = ctx.register("Plain").await;

    let (status, _) = send(&ctx, Method::GET, "/api/v1/users", Some(ctx.token(&plain).as_str()), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // 本人可以查看自己的详情
    let (status, json) = send(
        &ctx,
        Method::GET,
        &format!("/api/v1/users/{}", plain.id),
        Some(ctx.token(&plain).as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["is_administrator"], false);

    let (status, json) = send(
        &ctx,
        Method::POST,
        "/api/v1/users",
        Some(ctx.token(&root).as_str()),
        Some(json!({ "name": "Newcomer", "email": "newcomer@plant.test" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["email"], "newcomer@plant.test");

    let (status, _) = send(
        &ctx,
        Method::POST,
        "/api/v1/users",
        Some(ctx.token(&root).as_str()),
        Some(json!({ "name": "Broken", "email": "not-an-email" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_grant_and_check_ability() {
    let ctx = setup();
    let root = ctx.register("Root").await;
    let tech = ctx.register("Tech").await;
    let (_, _, sector, _) = ctx.create_chain("Checked").await;

    let check_uri = format!(
        "/api/v1/authz/check?ability=assets.create&kind=sector&id={}",
        sector.id
    );

    let (status, json) = send(&ctx, Method::GET, &check_uri, Some(ctx.token(&tech).as_str()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["allowed"], false);

    let (status, _) = send(
        &ctx,
        Method::POST,
        &format!("/api/v1/users/{}/permissions", tech.id),
        Some(ctx.token(&root).as_str()),
        Some(json!({ "permission": format!("assets.create.sector.{}", sector.id) })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, json) = send(&ctx, Method::GET, &check_uri, Some(ctx.token(&tech).as_str()), None).await;
    assert_eq!(json["allowed"], true);

    // 目录中不存在的权限
    let (status, _) = send(
        &ctx,
        Method::POST,
        &format!("/api/v1/users/{}/permissions", tech.id),
        Some(ctx.token(&root).as_str()),
        Some(json!({ "permission": "assets.create.sector.9999" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &ctx,
        Method::GET,
        "/api/v1/authz/check?ability=assets.create&kind=sector",
        Some(ctx.token(&tech).as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_recover_when_healthy_returns_nothing() {
    let ctx = setup();
    let root = ctx.register("Root").await;

    let (status, json) = send(
        &ctx,
        Method::POST,
        "/api/v1/admin/recover",
        Some(ctx.token(&root).as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["recovered"].is_null());

    let (status, json) = send(
        &ctx,
        Method::GET,
        "/api/v1/audit/logs?limit=10",
        Some(ctx.token(&root).as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["entries"][0]["action"], "user.create");
}

#[tokio::test]
async fn test_administrator_on_missing_entity() {
    let ctx = setup();
    let root = ctx.register("Root").await;
    let token = ctx.token(&root);

    let (status, _) = send(&ctx, Method::GET, "/api/v1/hierarchy/sectors/9999", Some(token.as_str()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&ctx, Method::DELETE, "/api/v1/hierarchy/assets/9999", Some(token.as_str()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = send(
        &ctx,
        Method::GET,
        "/api/v1/authz/check?ability=assets.create&kind=sector&id=9999",
        Some(token.as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["allowed"], false);
}

#[tokio::test]
async fn test_revoke_permission_from_role() {
    let ctx = setup();
    let root = ctx.register("Root").await;
    let lead = ctx.register("Lead").await;
    let (_, _, sector, _) = ctx.create_chain("Roles").await;
    let admin_token = ctx.token(&root);
    let name = format!("sectors.update.{}", sector.id);

    let (status, role) = send(
        &ctx,
        Method::POST,
        "/api/v1/roles",
        Some(admin_token.as_str()),
        Some(json!({ "name": "Sector editor", "is_administrator": false })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let role_id = role["id"].as_i64().unwrap();

    let (status, _) = send(
        &ctx,
        Method::POST,
        &format!("/api/v1/roles/{}/permissions", role_id),
        Some(admin_token.as_str()),
        Some(json!({ "permission": name })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &ctx,
        Method::POST,
        &format!("/api/v1/users/{}/roles", lead.id),
        Some(admin_token.as_str()),
        Some(json!({ "role_id": role_id })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let check_uri = format!(
        "/api/v1/authz/check?ability=sectors.update&kind=sector&id={}",
        sector.id
    );
    let (_, json) = send(&ctx, Method::GET, &check_uri, Some(ctx.token(&lead).as_str()), None).await;
    assert_eq!(json["allowed"], true);

    // 非用户管理者不能撤销
    let revoke_uri = format!("/api/v1/roles/{}/permissions/{}", role_id, name);
    let (status, _) = send(&ctx, Method::DELETE, &revoke_uri, Some(ctx.token(&lead).as_str()), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&ctx, Method::DELETE, &revoke_uri, Some(admin_token.as_str()), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, json) = send(&ctx, Method::GET, &check_uri, Some(ctx.token(&lead).as_str()), None).await;
    assert_eq!(json["allowed"], false);

    let (status, _) = send(&ctx, Method::DELETE, &revoke_uri, Some(admin_token.as_str()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, json) = send(&ctx, Method::GET, "/api/v1/audit/logs?limit=1", Some(admin_token.as_str()), None).await;
    assert_eq!(json["entries"][0]["action"], "role.permission.revoke");
}
