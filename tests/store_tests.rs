//! End-to-end flows against a real MongoDB. Each test gets its own database.

mod common;

use std::sync::{Arc, Mutex};

use actix::prelude::*;
use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceResponse};
use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use serde_json::{json, Value};
use testcontainers::clients::Cli;
use uuid::Uuid;

use shopline::app_state::AppState;
use shopline::auth::Authentication;
use shopline::chat_server::{user_room, Connect, Join, RoomSize, WsMessage};
use shopline::models::{Role, User};
use shopline::routes;

macro_rules! shop {
    ($state:expr) => {
        test::init_service(
            App::new()
                .wrap(Authentication::new(common::SECRET))
                .app_data(web::Data::new($state))
                .configure(routes::configure),
        )
        .await
    };
}

macro_rules! store_or_skip {
    ($docker:ident, $state:ident) => {
        let $docker = Cli::default();
        let store = match common::start_store(&$docker) {
            Some(store) => store,
            None => return,
        };
        let $state = common::state_on(&store.uri, &store.database()).await;
        $state.mongodb.ensure_indexes().await.unwrap();
    };
}

async fn call<S, R, B>(app: &S, req: R) -> (StatusCode, Value)
where
    S: Service<R, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let resp = test::call_service(app, req).await;
    let status = resp.status();
    let bytes = test::read_body(resp).await;
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn auth(req: test::TestRequest, token: &str) -> test::TestRequest {
    req.insert_header(("Authorization", format!("Bearer {}", token)))
}

macro_rules! register {
    ($app:expr, $name:expr, $email:expr) => {{
        let (status, body) = call(
            &$app,
            test::TestRequest::post()
                .uri("/api/auth/register")
                .set_json(json!({ "name": $name, "email": $email, "password": "secret99" }))
                .to_request(),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        (
            body["user"]["id"].as_str().unwrap().to_string(),
            body["token"].as_str().unwrap().to_string(),
        )
    }};
}

macro_rules! product {
    ($app:expr, $admin_token:expr, $stock:expr) => {{
        let (status, body) = call(
            &$app,
            auth(test::TestRequest::post().uri("/api/products"), &$admin_token)
                .set_json(json!({
                    "name": "Apples",
                    "description": "Crisp",
                    "price": 2.5,
                    "category": "fruits",
                    "unit": "kg",
                    "stock": $stock,
                    "max_order_quantity": 10
                }))
                .to_request(),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["_id"].as_str().unwrap().to_string()
    }};
}

/// Current stock and the change types recorded so far, oldest first.
macro_rules! stock_of {
    ($app:expr, $admin_token:expr, $product_id:expr) => {{
        let (_, product) = call(
            &$app,
            auth(
                test::TestRequest::get().uri(&format!("/api/products/{}", $product_id)),
                &$admin_token,
            )
            .to_request(),
        )
        .await;
        stock_summary(&product)
    }};
}

/// Admins are promoted in the database, never through the API.
async fn admin(state: &AppState, name: &str) -> (String, String) {
    let user = User::new(name, &format!("{}@shop.test", name.to_lowercase()), "x".into(), Role::Admin);
    state.mongodb.users().insert_one(&user).await.unwrap();
    let token = common::token(&user.id, Role::Admin);
    (user.id, token)
}

fn shipping() -> Value {
    json!({
        "street": "12 Elm St",
        "city": "Portland",
        "state": "OR",
        "postal_code": "97201",
        "country": "US"
    })
}

fn stock_summary(product: &Value) -> (u64, Vec<String>) {
    let kinds = product["stock_history"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["change_type"].as_str().unwrap().to_string())
        .collect();
    (product["stock"].as_u64().unwrap(), kinds)
}

#[actix_web::test]
async fn cart_checkout_moves_stock_and_empties_cart() {
    store_or_skip!(docker, state);
    let (_, admin_token) = admin(&state, "Ada").await;
    let app = shop!(state);
    let (_, token) = register!(app, "Cam", "cam@example.com");
    let apples = product!(app, admin_token, 10);

    let (status, cart) = call(
        &app,
        auth(test::TestRequest::post().uri("/api/cart/items"), &token)
            .set_json(json!({ "product_id": apples, "quantity": 3 }))
            .to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cart["total_price"], 7.5);

    let (status, order) = call(
        &app,
        auth(test::TestRequest::post().uri("/api/orders"), &token)
            .set_json(json!({ "payment_method": "cash_on_delivery", "shipping_address": shipping() }))
            .to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", order);
    assert_eq!(order["status"], "pending");
    assert_eq!(order["total_price"], 7.5);

    let (_, cart) = call(&app, auth(test::TestRequest::get().uri("/api/cart"), &token).to_request()).await;
    assert!(cart["items"].as_array().unwrap().is_empty());
    assert_eq!(stock_of!(app, admin_token, apples), (7, vec!["added".into(), "sold".into()]));

    let order_id = order["_id"].as_str().unwrap();
    let (status, cancelled) = call(
        &app,
        auth(test::TestRequest::put().uri(&format!("/api/orders/{}/cancel", order_id)), &token).to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(
        stock_of!(app, admin_token, apples),
        (10, vec!["added".into(), "sold".into(), "returned".into()])
    );
}

#[actix_web::test]
async fn owners_cannot_cancel_shipped_orders() {
    store_or_skip!(docker, state);
    let (_, admin_token) = admin(&state, "Ada").await;
    let app = shop!(state);
    let (_, token) = register!(app, "Cam", "cam@example.com");
    let (_, other_token) = register!(app, "Dee", "dee@example.com");
    let apples = product!(app, admin_token, 10);

    let (_, order) = call(
        &app,
        auth(test::TestRequest::post().uri("/api/orders"), &token)
            .set_json(json!({
                "items": [ { "product_id": apples, "quantity": 2 } ],
                "payment_method": "card",
                "shipping_address": shipping()
            }))
            .to_request(),
    )
    .await;
    let order_id = order["_id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &app,
        auth(test::TestRequest::get().uri(&format!("/api/orders/{}", order_id)), &other_token).to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &app,
        auth(test::TestRequest::put().uri(&format!("/api/orders/{}/status", order_id)), &admin_token)
            .set_json(json!({ "status": "shipped" }))
            .to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        auth(test::TestRequest::put().uri(&format!("/api/orders/{}/cancel", order_id)), &token).to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(stock_of!(app, admin_token, apples).0, 8);
}

#[actix_web::test]
async fn racing_orders_never_oversell() {
    store_or_skip!(docker, state);
    let (_, admin_token) = admin(&state, "Ada").await;
    let app = shop!(state);
    let (_, first) = register!(app, "Cam", "cam@example.com");
    let (_, second) = register!(app, "Dee", "dee@example.com");
    let apples = product!(app, admin_token, 4);

    let order = |token: &str| {
        auth(test::TestRequest::post().uri("/api/orders"), token)
            .set_json(json!({
                "items": [ { "product_id": apples, "quantity": 3 } ],
                "payment_method": "card",
                "shipping_address": shipping()
            }))
            .to_request()
    };
    let ((a, _), (b, _)) = futures::join!(call(&app, order(&first)), call(&app, order(&second)));

    let mut statuses = vec![a, b];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::BAD_REQUEST]);
    assert_eq!(stock_of!(app, admin_token, apples), (1, vec!["added".into(), "sold".into()]));

    let (_, all) = call(
        &app,
        auth(test::TestRequest::get().uri("/api/orders?limit=5"), &admin_token).to_request(),
    )
    .await;
    assert_eq!(all["total"], 1);
}

#[actix_web::test]
async fn duplicates_and_missing_entities() {
    store_or_skip!(docker, state);
    let (_, admin_token) = admin(&state, "Ada").await;
    let app = shop!(state);
    let (_, token) = register!(app, "Cam", "cam@example.com");
    let (_, other_token) = register!(app, "Dee", "dee@example.com");
    let apples = product!(app, admin_token, 5);

    let (status, body) = call(
        &app,
        test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({ "name": "Cam", "email": "CAM@example.com", "password": "secret99" }))
            .to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "User already exists");

    let review = || {
        auth(test::TestRequest::post().uri(&format!("/api/products/{}/reviews", apples)), &token)
            .set_json(json!({ "rating": 4, "comment": "good" }))
            .to_request()
    };
    assert_eq!(call(&app, review()).await.0, StatusCode::CREATED);
    let (status, body) = call(&app, review()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Product already reviewed");

    let missing = Uuid::new_v4();
    for uri in [format!("/api/products/{}", missing), format!("/api/orders/{}", missing)] {
        let (status, body) = call(&app, auth(test::TestRequest::get().uri(&uri), &token).to_request()).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(body["success"], false);
    }

    let (_, addresses) = call(
        &app,
        auth(test::TestRequest::post().uri("/api/profile/addresses"), &token)
            .set_json(json!({
                "street": "12 Elm St",
                "city": "Portland",
                "state": "OR",
                "postal_code": "97201",
                "country": "US",
                "coordinates": { "lat": 45.5, "lng": -122.6 }
            }))
            .to_request(),
    )
    .await;
    let address_id = addresses[0]["id"].as_str().unwrap();
    assert_eq!(addresses[0]["is_default"], true);

    let (status, _) = call(
        &app,
        auth(
            test::TestRequest::delete().uri(&format!("/api/profile/addresses/{}", address_id)),
            &other_token,
        )
        .to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Records every frame a chat session would receive.
struct Inbox {
    frames: Arc<Mutex<Vec<Value>>>,
}

impl Actor for Inbox {
    type Context = Context<Self>;
}

impl Handler<WsMessage> for Inbox {
    type Result = ();

    fn handle(&mut self, msg: WsMessage, _: &mut Context<Self>) {
        self.frames.lock().unwrap().push(serde_json::from_str(&msg.0).unwrap());
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct Drain;

impl Handler<Drain> for Inbox {
    type Result = ();

    fn handle(&mut self, _: Drain, _: &mut Context<Self>) {}
}

#[actix_web::test]
async fn support_inbox_is_shared_and_read_receipts_reach_the_customer() {
    store_or_skip!(docker, state);
    let (first_admin, _) = admin(&state, "Ada").await;
    let (_, second_token) = admin(&state, "Bo").await;
    let server = state.chat_server.clone();
    let app = shop!(state);
    let (customer, token) = register!(app, "Cam", "cam@example.com");

    let frames = Arc::new(Mutex::new(Vec::new()));
    let inbox = Inbox { frames: frames.clone() }.start();
    let session_id = Uuid::new_v4();
    server
        .send(Connect {
            session_id,
            addr: inbox.clone().recipient(),
        })
        .await
        .unwrap();
    server
        .send(Join {
            session_id,
            room: user_room(&customer),
        })
        .await
        .unwrap();

    let (status, _) = call(
        &app,
        auth(test::TestRequest::post().uri("/api/messages"), &token)
            .set_json(json!({ "receiver_id": first_admin, "content": "Where is my order?" }))
            .to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, unread) = call(
        &app,
        auth(test::TestRequest::get().uri("/api/messages/unread-count"), &second_token).to_request(),
    )
    .await;
    assert_eq!(unread["unread"], 1);

    let (_, thread) = call(
        &app,
        auth(
            test::TestRequest::get().uri(&format!("/api/messages/conversation/{}", customer)),
            &second_token,
        )
        .to_request(),
    )
    .await;
    assert_eq!(thread["total"], 1);
    let message_id = thread["items"][0]["_id"].as_str().unwrap().to_string();

    let (status, marked) = call(
        &app,
        auth(
            test::TestRequest::put().uri(&format!("/api/messages/conversation/{}/read", customer)),
            &second_token,
        )
        .to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(marked["updated"], 1);

    // Both mailboxes are FIFO: once these answer, the receipt has landed.
    server.send(RoomSize { room: user_room(&customer) }).await.unwrap();
    inbox.send(Drain).await.unwrap();

    let frames = frames.lock().unwrap().clone();
    let receipt = frames
        .iter()
        .find(|f| f["event"] == "messages_read")
        .expect("read receipt pushed to the customer");
    assert_eq!(receipt["data"]["message_ids"], json!([message_id]));
}
