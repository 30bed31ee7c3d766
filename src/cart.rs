// src/cart.rs

use actix_web::{web, HttpResponse};
use log::debug;
use mongodb::bson::doc;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::models::Cart;
use crate::products::find_product;

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    pub quantity: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: u32,
}

/// The caller's stored cart, or a fresh unsaved one.
pub async fn load_cart(data: &AppState, user_id: &str) -> AppResult<Cart> {
    Ok(data
        .mongodb
        .carts()
        .find_one(doc! { "user_id": user_id })
        .await?
        .unwrap_or_else(|| Cart::new(user_id)))
}

pub async fn save_cart(data: &AppState, cart: &Cart) -> AppResult<()> {
    data.mongodb
        .carts()
        .replace_one(doc! { "user_id": &cart.user_id }, cart)
        .upsert(true)
        .await?;
    Ok(())
}

// GET /api/cart
pub async fn get_cart(data: web::Data<AppState>, auth: AuthUser) -> AppResult<HttpResponse> {
    let cart = load_cart(&data, &auth.id).await?;
    Ok(HttpResponse::Ok().json(cart))
}

// POST /api/cart/items
pub async fn add_item(
    data: web::Data<AppState>,
    auth: AuthUser,
    payload: web::Json<AddItemRequest>,
) -> AppResult<HttpResponse> {
    if payload.product_id.trim().is_empty() {
        return Err(AppError::validation("Product id is required"));
    }
    let product = find_product(&data, &payload.product_id).await?;
    if !product.is_active {
        return Err(AppError::not_found("Product"));
    }
    let quantity = payload.quantity.unwrap_or(product.min_order_quantity);

    let mut cart = load_cart(&data, &auth.id).await?;
    cart.add(&product, quantity)?;
    save_cart(&data, &cart).await?;
    debug!("User {} added {} x {} to cart", auth.id, quantity, product.id);
    Ok(HttpResponse::Ok().json(cart))
}

// PUT /api/cart/items/{product_id}
pub async fn update_item(
    data: web::Data<AppState>,
    auth: AuthUser,
    product_id: web::Path<String>,
    payload: web::Json<UpdateItemRequest>,
) -> AppResult<HttpResponse> {
    let mut cart = load_cart(&data, &auth.id).await?;
    if cart.item(&product_id).is_none() {
        return Err(AppError::not_found("Cart item"));
    }
    if payload.quantity == 0 {
        cart.remove(&product_id)?;
    } else {
        let product = find_product(&data, &product_id).await?;
        cart.set_quantity(&product, payload.quantity)?;
    }
    save_cart(&data, &cart).await?;
    Ok(HttpResponse::Ok().json(cart))
}

// DELETE /api/cart/items/{product_id}
pub async fn remove_item(
    data: web::Data<AppState>,
    auth: AuthUser,
    product_id: web::Path<String>,
) -> AppResult<HttpResponse> {
    let mut cart = load_cart(&data, &auth.id).await?;
    cart.remove(&product_id)?;
    save_cart(&data, &cart).await?;
    Ok(HttpResponse::Ok().json(cart))
}

// DELETE /api/cart
pub async fn clear_cart(data: web::Data<AppState>, auth: AuthUser) -> AppResult<HttpResponse> {
    let mut cart = load_cart(&data, &auth.id).await?;
    cart.clear();
    save_cart(&data, &cart).await?;
    Ok(HttpResponse::Ok().json(cart))
}
