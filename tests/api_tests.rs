mod common;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use serde_json::{json, Value};

use shopline::auth::Authentication;
use shopline::models::Role;
use shopline::routes;

macro_rules! app {
    () => {
        test::init_service(
            App::new()
                .wrap(Authentication::new(common::SECRET))
                .app_data(web::Data::new(common::state().await))
                .configure(routes::configure),
        )
        .await
    };
}

#[actix_web::test]
async fn health_reports_ok() {
    let app = app!();
    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
}

#[actix_web::test]
async fn protected_routes_need_a_token() {
    let app = app!();
    for uri in ["/api/cart", "/api/orders/my", "/api/profile", "/api/messages/conversations"] {
        let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Not authorized, no token");
    }
}

#[actix_web::test]
async fn bad_token_is_rejected() {
    let app = app!();
    let req = test::TestRequest::get()
        .uri("/api/cart")
        .insert_header(("Authorization", "Bearer not-a-jwt"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let forged = shopline::auth::create_jwt("u1", Role::Admin, "other-secret", 1).unwrap();
    let req = test::TestRequest::get()
        .uri("/api/orders")
        .insert_header(("Authorization", format!("Bearer {}", forged)))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn admin_routes_forbid_customers() {
    let app = app!();

    let req = test::TestRequest::get()
        .uri("/api/orders")
        .insert_header(common::bearer("u1", Role::User))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::get()
        .uri("/api/messages/stats")
        .insert_header(common::bearer("u1", Role::User))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::post()
        .uri("/api/products")
        .insert_header(common::bearer("u1", Role::User))
        .set_json(json!({
            "name": "Apples",
            "description": "Crisp",
            "price": 2.5,
            "category": "fruits",
            "unit": "kg",
            "stock": 10
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "Not authorized as an admin");
}

#[actix_web::test]
async fn register_validates_before_touching_storage() {
    let app = app!();
    let req = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({ "name": "Ann", "email": "not-an-email", "password": "secret1" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);

    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "email": "", "password": "" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn messaging_rules_checked_up_front() {
    let app = app!();

    let req = test::TestRequest::post()
        .uri("/api/messages")
        .insert_header(common::bearer("u1", Role::User))
        .set_json(json!({ "content": "" , "receiver_id": "a1" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post()
        .uri("/api/messages")
        .insert_header(common::bearer("u1", Role::User))
        .set_json(json!({ "content": "hello everyone" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::post()
        .uri("/api/messages")
        .insert_header(common::bearer("u1", Role::User))
        .set_json(json!({ "content": "hi me", "receiver_id": "u1" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn malformed_input_gets_a_json_error() {
    let app = app!();

    let req = test::TestRequest::post()
        .uri("/api/products")
        .insert_header(common::bearer("a1", Role::Admin))
        .set_json(json!({
            "name": "Blocks",
            "price": 9.5,
            "category": "toys",
            "unit": "piece"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("unknown variant"));

    let req = test::TestRequest::get()
        .uri("/api/orders/my?page=abc")
        .insert_header(common::bearer("u1", Role::User))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert!(body["message"].is_string());
}
