// src/orders.rs

use std::collections::BTreeMap;

use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures::stream::TryStreamExt;
use log::{error, info, warn};
use mongodb::bson::{doc, Document};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::{AdminUser, AuthUser};
use crate::cart::{load_cart, save_cart};
use crate::error::{AppError, AppResult};
use crate::models::{
    Order, OrderItem, OrderStatus, Page, PageQuery, PaymentMethod, PaymentStatus,
    ShippingAddress, StockChangeType,
};
use crate::products::{adjust_stock, find_product};
use crate::validation;

#[derive(Debug, Clone, Deserialize)]
pub struct OrderLineRequest {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    /// Lines to order; the caller's cart is used when absent.
    pub items: Option<Vec<OrderLineRequest>>,
    pub address_id: Option<String>,
    pub shipping_address: Option<ShippingAddress>,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<OrderStatus>,
    pub user_id: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePaymentRequest {
    pub payment_status: PaymentStatus,
}

pub fn validate_shipping(address: &ShippingAddress) -> AppResult<()> {
    validation::text("Street", &address.street, 1, 200)?;
    validation::text("City", &address.city, 1, 100)?;
    validation::text("State", &address.state, 1, 100)?;
    validation::text("Postal code", &address.postal_code, 1, 20)?;
    validation::text("Country", &address.country, 1, 100)?;
    if let Some(coordinates) = &address.coordinates {
        coordinates.validate()?;
    }
    Ok(())
}

/// Folds repeated product ids into one line each, keeping first-seen order.
pub fn merge_lines(lines: Vec<OrderLineRequest>) -> AppResult<Vec<OrderLineRequest>> {
    let mut order: Vec<String> = Vec::new();
    let mut totals: BTreeMap<String, u32> = BTreeMap::new();
    for line in lines {
        if line.product_id.trim().is_empty() {
            return Err(AppError::validation("Product id is required"));
        }
        if line.quantity == 0 {
            return Err(AppError::validation("Quantity must be at least 1"));
        }
        let entry = totals.entry(line.product_id.clone()).or_insert_with(|| {
            order.push(line.product_id.clone());
            0
        });
        *entry = entry.saturating_add(line.quantity);
    }
    Ok(order
        .into_iter()
        .map(|product_id| {
            let quantity = totals[&product_id];
            OrderLineRequest {
                product_id,
                quantity,
            }
        })
        .collect())
}

async fn find_order(data: &AppState, order_id: &str) -> AppResult<Order> {
    data.mongodb
        .orders()
        .find_one(doc! { "_id": order_id })
        .await?
        .ok_or_else(|| AppError::not_found("Order"))
}

async fn save_order(data: &AppState, order: &Order) -> AppResult<()> {
    data.mongodb
        .orders()
        .replace_one(doc! { "_id": &order.id }, order)
        .await?;
    Ok(())
}

async fn resolve_shipping(
    data: &AppState,
    user_id: &str,
    payload: &CreateOrderRequest,
) -> AppResult<ShippingAddress> {
    if let Some(address) = &payload.shipping_address {
        validate_shipping(address)?;
        return Ok(address.clone());
    }
    let user = data
        .mongodb
        .users()
        .find_one(doc! { "_id": user_id })
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;
    let address = match &payload.address_id {
        Some(id) => user.address(id).ok_or_else(|| AppError::not_found("Address"))?,
        None => user
            .default_address()
            .ok_or_else(|| AppError::validation("Shipping address is required"))?,
    };
    Ok(ShippingAddress::from(address))
}

/// Returns `items` to stock. Failures are logged and skipped so the caller's
/// own outcome (a cancellation or a rejected order) stands.
async fn release_stock(data: &AppState, order_id: &str, items: &[OrderItem], note: &str, by: &str) {
    for item in items {
        if let Err(e) = adjust_stock(
            data,
            &item.product_id,
            StockChangeType::Returned,
            item.quantity,
            Some(note.to_string()),
            Some(by.to_string()),
        )
        .await
        {
            warn!("Could not restock {} for order {}: {}", item.product_id, order_id, e);
        }
    }
}

async fn restock(data: &AppState, order: &Order, by: &str) {
    let note = format!("Order {} cancelled", order.id);
    release_stock(data, &order.id, &order.items, &note, by).await;
}

/// Takes every line of `order` out of stock before it is stored. If any line
/// cannot be covered the lines already taken go back and the error is
/// returned, so an order is never stored without its stock.
async fn reserve_stock(data: &AppState, order: &Order, by: &str) -> AppResult<()> {
    for (taken, item) in order.items.iter().enumerate() {
        if let Err(e) = adjust_stock(
            data,
            &item.product_id,
            StockChangeType::Sold,
            item.quantity,
            Some(format!("Order {}", order.id)),
            Some(by.to_string()),
        )
        .await
        {
            let note = format!("Order {} not placed", order.id);
            release_stock(data, &order.id, &order.items[..taken], &note, by).await;
            return Err(e);
        }
    }
    Ok(())
}

async fn page_of_orders(data: &AppState, filter: Document, paging: PageQuery) -> AppResult<Page<Order>> {
    let orders = data.mongodb.orders();
    let total = orders.count_documents(filter.clone()).await?;
    let items: Vec<Order> = orders
        .find(filter)
        .sort(doc! { "created_at": -1 })
        .skip(paging.skip())
        .limit(paging.limit as i64)
        .await?
        .try_collect()
        .await?;
    Ok(Page::new(items, paging, total))
}

// POST /api/orders
pub async fn create_order(
    data: web::Data<AppState>,
    auth: AuthUser,
    payload: web::Json<CreateOrderRequest>,
) -> AppResult<HttpResponse> {
    let payload = payload.into_inner();
    let from_cart = payload.items.is_none();
    let requested = match &payload.items {
        Some(items) => items.clone(),
        None => load_cart(&data, &auth.id)
            .await?
            .items
            .into_iter()
            .map(|i| OrderLineRequest {
                product_id: i.product_id,
                quantity: i.quantity,
            })
            .collect(),
    };
    if requested.is_empty() {
        return Err(AppError::validation(if from_cart {
            "Cart is empty"
        } else {
            "Order must contain at least one item"
        }));
    }
    let lines = merge_lines(requested)?;
    if let Some(notes) = &payload.notes {
        if notes.chars().count() > 500 {
            return Err(AppError::validation("Notes must be at most 500 characters"));
        }
    }

    let shipping = resolve_shipping(&data, &auth.id, &payload).await?;

    let mut items = Vec::with_capacity(lines.len());
    for line in &lines {
        let product = find_product(&data, &line.product_id).await?;
        if !product.is_active {
            return Err(AppError::validation(format!(
                "{} is no longer available",
                product.name
            )));
        }
        product.check_quantity(line.quantity)?;
        items.push(OrderItem {
            product_id: product.id,
            name: product.name,
            price: product.price,
            quantity: line.quantity,
        });
    }

    let order = Order::new(
        &auth.id,
        items,
        shipping,
        payload.payment_method,
        payload.notes,
    )?;
    reserve_stock(&data, &order, &auth.id).await?;
    if let Err(e) = data.mongodb.orders().insert_one(&order).await {
        error!("Order {} not stored, returning its stock: {}", order.id, e);
        let note = format!("Order {} not placed", order.id);
        release_stock(&data, &order.id, &order.items, &note, &auth.id).await;
        return Err(e.into());
    }

    if from_cart {
        let mut cart = load_cart(&data, &auth.id).await?;
        cart.clear();
        save_cart(&data, &cart).await?;
    }

    info!("Order {} placed by {} ({:.2})", order.id, auth.id, order.total_price);
    Ok(HttpResponse::Created().json(order))
}

// GET /api/orders/my
pub async fn my_orders(
    data: web::Data<AppState>,
    auth: AuthUser,
    query: web::Query<OrderListQuery>,
) -> AppResult<HttpResponse> {
    let mut filter = doc! { "user_id": &auth.id };
    if let Some(status) = query.status {
        filter.insert("status", status.as_str());
    }
    let page = page_of_orders(&data, filter, PageQuery::new(query.page, query.limit)).await?;
    Ok(HttpResponse::Ok().json(page))
}

// GET /api/orders/{id}
pub async fn get_order(
    data: web::Data<AppState>,
    auth: AuthUser,
    order_id: web::Path<String>,
) -> AppResult<HttpResponse> {
    let order = find_order(&data, &order_id).await?;
    auth.ensure_owner_or_admin(&order.user_id)?;
    Ok(HttpResponse::Ok().json(order))
}

// PUT /api/orders/{id}/cancel
pub async fn cancel_order(
    data: web::Data<AppState>,
    auth: AuthUser,
    order_id: web::Path<String>,
) -> AppResult<HttpResponse> {
    let mut order = find_order(&data, &order_id).await?;
    auth.ensure_owner_or_admin(&order.user_id)?;
    if !auth.is_admin() && !order.status.cancellable_by_owner() {
        return Err(AppError::validation(format!(
            "Order cannot be cancelled once {}",
            order.status.as_str()
        )));
    }
    order.transition(OrderStatus::Cancelled)?;
    save_order(&data, &order).await?;
    restock(&data, &order, &auth.id).await;
    info!("Order {} cancelled by {}", order.id, auth.id);
    Ok(HttpResponse::Ok().json(order))
}

// GET /api/orders
pub async fn list_orders(
    data: web::Data<AppState>,
    _admin: AdminUser,
    query: web::Query<OrderListQuery>,
) -> AppResult<HttpResponse> {
    let mut filter = Document::new();
    if let Some(status) = query.status {
        filter.insert("status", status.as_str());
    }
    if let Some(user_id) = &query.user_id {
        filter.insert("user_id", user_id);
    }
    let page = page_of_orders(&data, filter, PageQuery::new(query.page, query.limit)).await?;
    Ok(HttpResponse::Ok().json(page))
}

// PUT /api/orders/{id}/status
pub async fn update_status(
    data: web::Data<AppState>,
    AdminUser(admin): AdminUser,
    order_id: web::Path<String>,
    payload: web::Json<UpdateStatusRequest>,
) -> AppResult<HttpResponse> {
    let mut order = find_order(&data, &order_id).await?;
    order.transition(payload.status)?;
    save_order(&data, &order).await?;
    if payload.status == OrderStatus::Cancelled {
        restock(&data, &order, &admin.id).await;
    }
    info!("Order {} moved to {} by {}", order.id, order.status.as_str(), admin.id);
    Ok(HttpResponse::Ok().json(order))
}

// PUT /api/orders/{id}/payment
pub async fn update_payment(
    data: web::Data<AppState>,
    AdminUser(admin): AdminUser,
    order_id: web::Path<String>,
    payload: web::Json<UpdatePaymentRequest>,
) -> AppResult<HttpResponse> {
    let mut order = find_order(&data, &order_id).await?;
    order.payment_status = payload.payment_status;
    order.updated_at = Utc::now();
    save_order(&data, &order).await?;
    info!("Order {} payment set by {}", order.id, admin.id);
    Ok(HttpResponse::Ok().json(order))
}
