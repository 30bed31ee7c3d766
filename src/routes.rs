// src/routes.rs

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::error::AppError;
use crate::{auth, cart, messages, orders, products, profile, ws};

// GET /health
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Extractor failures (bad JSON, unknown enum values, malformed query or
/// path segments) answer with the same JSON body as every other 400.
fn extractor_errors(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| AppError::validation(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| AppError::validation(err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _req| AppError::validation(err.to_string()).into()),
    );
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    extractor_errors(cfg);
    cfg.route("/health", web::get().to(health))
        .service(web::resource("/ws").route(web::get().to(ws::ws_index)))
        .service(
            web::scope("/api")
                .service(
                    web::scope("/auth")
                        .route("/register", web::post().to(auth::register))
                        .route("/login", web::post().to(auth::login))
                        .route("/me", web::get().to(auth::me)),
                )
                .service(
                    web::scope("/products")
                        .route("", web::get().to(products::list_products))
                        .route("", web::post().to(products::create_product))
                        .route("/{id}", web::get().to(products::get_product))
                        .route("/{id}", web::put().to(products::update_product))
                        .route("/{id}", web::delete().to(products::delete_product))
                        .route("/{id}/reviews", web::post().to(products::add_review))
                        .route("/{id}/stock", web::post().to(products::update_stock))
                        .route("/{id}/stock-history", web::get().to(products::stock_history)),
                )
                .service(
                    web::scope("/cart")
                        .route("", web::get().to(cart::get_cart))
                        .route("", web::delete().to(cart::clear_cart))
                        .route("/items", web::post().to(cart::add_item))
                        .route("/items/{product_id}", web::put().to(cart::update_item))
                        .route("/items/{product_id}", web::delete().to(cart::remove_item)),
                )
                .service(
                    web::scope("/orders")
                        .route("", web::post().to(orders::create_order))
                        .route("", web::get().to(orders::list_orders))
                        .route("/my", web::get().to(orders::my_orders))
                        .route("/{id}", web::get().to(orders::get_order))
                        .route("/{id}/cancel", web::put().to(orders::cancel_order))
                        .route("/{id}/status", web::put().to(orders::update_status))
                        .route("/{id}/payment", web::put().to(orders::update_payment)),
                )
                .service(
                    web::scope("/profile")
                        .route("", web::get().to(profile::get_profile))
                        .route("", web::put().to(profile::update_profile))
                        .route("/password", web::put().to(profile::change_password))
                        .route("/addresses", web::get().to(profile::list_addresses))
                        .route("/addresses", web::post().to(profile::add_address))
                        .route("/addresses/{address_id}", web::put().to(profile::update_address))
                        .route("/addresses/{address_id}", web::delete().to(profile::delete_address))
                        .route(
                            "/addresses/{address_id}/default",
                            web::put().to(profile::set_default_address),
                        ),
                )
                .service(
                    web::scope("/messages")
                        .route("", web::post().to(messages::send_message))
                        .route("/conversations", web::get().to(messages::list_conversations))
                        .route("/conversation/{user_id}", web::get().to(messages::get_conversation))
                        .route(
                            "/conversation/{user_id}/read",
                            web::put().to(messages::mark_conversation_read),
                        )
                        .route("/broadcasts", web::get().to(messages::list_broadcasts))
                        .route("/unread-count", web::get().to(messages::unread_count))
                        .route("/admins", web::get().to(messages::list_admins))
                        .route("/stats", web::get().to(messages::message_stats))
                        .route("/{id}/read", web::put().to(messages::mark_read))
                        .route("/{id}", web::delete().to(messages::delete_message)),
                ),
        );
}
