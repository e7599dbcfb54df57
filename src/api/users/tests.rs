use axum::http::{Method, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use crate::db::types::UserRole;
use crate::test_support;

#[tokio::test]
#[ignore = "requires PostgreSQL and Redis"]
async fn admin_can_create_and_update_user() {
    let ctx = test_support::setup_test_context().await;

    let admin = test_support::insert_user(ctx.state.db(), "admin001", UserRole::Admin).await;
    let token = test_support::bearer_token(&admin, ctx.state.settings());

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            "/api/v1/users",
            Some(&token),
            Some(json!({
                "username": "instructor1",
                "email": "instructor1@example.com",
                "password": "instructor-pass",
                "first_name": "Ada",
                "last_name": "Lovelace",
                "role": "instructor"
            })),
        ))
        .await
        .expect("create user");

    let status = response.status();
    let created = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::CREATED, "response: {created}");
    let user_id = created["id"].as_str().expect("user id").to_string();
    assert_eq!(created["role"], "instructor");
    assert_eq!(created["full_name"], "Ada Lovelace");

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::PATCH,
            &format!("/api/v1/users/{user_id}"),
            Some(&token),
            Some(json!({ "is_active": false, "last_name": "King" })),
        ))
        .await
        .expect("update user");

    let status = response.status();
    let updated = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {updated}");
    assert_eq!(updated["is_active"], false);
    assert_eq!(updated["full_name"], "Ada King");

    let response = ctx
        .app
        .oneshot(test_support::json_request(
            Method::GET,
            "/api/v1/users?role=instructor",
            Some(&token),
            None,
        ))
        .await
        .expect("list users");

    let status = response.status();
    let listed = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {listed}");
    assert_eq!(listed["total_count"], 1);
    assert_eq!(listed["items"][0]["id"], user_id);
}

#[tokio::test]
#[ignore = "requires PostgreSQL and Redis"]
async fn duplicate_username_is_conflict() {
    let ctx = test_support::setup_test_context().await;

    let admin = test_support::insert_user(ctx.state.db(), "admin001", UserRole::Admin).await;
    test_support::insert_user(ctx.state.db(), "taken", UserRole::Student).await;
    let token = test_support::bearer_token(&admin, ctx.state.settings());

    let response = ctx
        .app
        .oneshot(test_support::json_request(
            Method::POST,
            "/api/v1/users",
            Some(&token),
            Some(json!({
                "username": "taken",
                "email": "someone-else@example.com",
                "password": "long-enough"
            })),
        ))
        .await
        .expect("create user");

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
#[ignore = "requires PostgreSQL and Redis"]
async fn non_admin_cannot_list_users() {
    let ctx = test_support::setup_test_context().await;

    let instructor =
        test_support::insert_user(ctx.state.db(), "teacher1", UserRole::Instructor).await;
    let token = test_support::bearer_token(&instructor, ctx.state.settings());

    let response = ctx
        .app
        .oneshot(test_support::json_request(Method::GET, "/api/v1/users", Some(&token), None))
        .await
        .expect("list users");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
