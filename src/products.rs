// src/products.rs

use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures::stream::TryStreamExt;
use log::info;
use mongodb::bson::{doc, to_document, Document};
use mongodb::options::ReturnDocument;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::auth::{AdminUser, AuthUser};
use crate::error::{AppError, AppResult};
use crate::models::product::{DEFAULT_MAX_ORDER, DEFAULT_MIN_ORDER};
use crate::models::{
    new_id, timestamp, Category, Page, PageQuery, Product, StockChange, StockChangeType, Unit,
};
use crate::validation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
    Rating,
}

impl ProductSort {
    fn to_document(self) -> Document {
        match self {
            ProductSort::Newest => doc! { "created_at": -1 },
            ProductSort::PriceAsc => doc! { "price": 1, "created_at": -1 },
            ProductSort::PriceDesc => doc! { "price": -1, "created_at": -1 },
            ProductSort::Rating => doc! { "rating": -1, "num_reviews": -1 },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductQuery {
    pub category: Option<Category>,
    pub search: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub in_stock: Option<bool>,
    pub sort: Option<ProductSort>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl ProductQuery {
    /// Mongo filter for the listing. Inactive products are hidden unless the
    /// caller is an admin.
    pub fn to_filter(&self, include_inactive: bool) -> AppResult<Document> {
        let mut filter = Document::new();
        if !include_inactive {
            filter.insert("is_active", true);
        }
        if let Some(category) = self.category {
            filter.insert("category", category.as_str());
        }
        if let Some(term) = self.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            filter.insert(
                "name",
                doc! { "$regex": regex::escape(term), "$options": "i" },
            );
        }

        let mut price = Document::new();
        if let Some(min) = self.min_price {
            validation::non_negative_price("min_price", min)?;
            price.insert("$gte", min);
        }
        if let Some(max) = self.max_price {
            validation::non_negative_price("max_price", max)?;
            price.insert("$lte", max);
        }
        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max {
                return Err(AppError::validation("min_price cannot exceed max_price"));
            }
        }
        if !price.is_empty() {
            filter.insert("price", price);
        }

        if self.in_stock == Some(true) {
            filter.insert("stock", doc! { "$gt": 0 });
        }
        Ok(filter)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub category: Category,
    pub unit: Unit,
    pub image_url: Option<String>,
    pub stock: Option<u32>,
    pub min_order_quantity: Option<u32>,
    pub max_order_quantity: Option<u32>,
    pub is_active: Option<bool>,
}

impl CreateProductRequest {
    pub fn validate(&self) -> AppResult<()> {
        validation::text("Name", &self.name, 1, 200)?;
        validation::non_negative_price("Price", self.price)?;
        Product::validate_order_bounds(
            self.min_order_quantity.unwrap_or(DEFAULT_MIN_ORDER),
            self.max_order_quantity.unwrap_or(DEFAULT_MAX_ORDER),
        )
    }

    pub fn into_product(self, created_by: &str) -> AppResult<Product> {
        self.validate()?;
        let now = Utc::now();
        let mut product = Product {
            id: new_id(),
            name: self.name.trim().to_string(),
            description: self.description.unwrap_or_default(),
            price: self.price,
            category: self.category,
            unit: self.unit,
            image_url: self.image_url,
            stock: 0,
            min_order_quantity: self.min_order_quantity.unwrap_or(DEFAULT_MIN_ORDER),
            max_order_quantity: self.max_order_quantity.unwrap_or(DEFAULT_MAX_ORDER),
            is_active: self.is_active.unwrap_or(true),
            reviews: Vec::new(),
            rating: 0.0,
            num_reviews: 0,
            stock_history: Vec::new(),
            created_by: Some(created_by.to_string()),
            created_at: now,
            updated_at: now,
        };
        let initial = self.stock.unwrap_or(0);
        if initial > 0 {
            product.apply_stock_change(
                StockChangeType::Added,
                initial,
                Some("Initial stock".to_string()),
                Some(created_by.to_string()),
            )?;
        }
        Ok(product)
    }
}

/// Stock is deliberately absent: it only moves through the stock endpoint so
/// every change lands in the history log.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub category: Option<Category>,
    pub unit: Option<Unit>,
    pub image_url: Option<String>,
    pub min_order_quantity: Option<u32>,
    pub max_order_quantity: Option<u32>,
    pub is_active: Option<bool>,
}

impl UpdateProductRequest {
    pub fn apply(self, product: &mut Product) -> AppResult<()> {
        if let Some(name) = self.name {
            validation::text("Name", &name, 1, 200)?;
            product.name = name.trim().to_string();
        }
        if let Some(description) = self.description {
            product.description = description;
        }
        if let Some(price) = self.price {
            validation::non_negative_price("Price", price)?;
            product.price = price;
        }
        if let Some(category) = self.category {
            product.category = category;
        }
        if let Some(unit) = self.unit {
            product.unit = unit;
        }
        if let Some(image_url) = self.image_url {
            product.image_url = Some(image_url);
        }
        let min = self.min_order_quantity.unwrap_or(product.min_order_quantity);
        let max = self.max_order_quantity.unwrap_or(product.max_order_quantity);
        Product::validate_order_bounds(min, max)?;
        product.min_order_quantity = min;
        product.max_order_quantity = max;
        if let Some(is_active) = self.is_active {
            product.is_active = is_active;
        }
        product.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub rating: u8,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StockRequest {
    pub change_type: StockChangeType,
    pub quantity: u32,
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StockResponse {
    pub product_id: String,
    pub stock: u32,
    pub change: StockChange,
}

pub async fn find_product(data: &AppState, product_id: &str) -> AppResult<Product> {
    data.mongodb
        .products()
        .find_one(doc! { "_id": product_id })
        .await?
        .ok_or_else(|| AppError::not_found("Product"))
}

/// Writes only the listed top-level fields of `product`, leaving stock and
/// reviews to their own update paths.
async fn save_fields(data: &AppState, product: &Product, fields: &[&str]) -> AppResult<()> {
    let full = to_document(product)?;
    let mut set = Document::new();
    for field in fields.iter().copied().chain(["updated_at"]) {
        if let Some(value) = full.get(field) {
            set.insert(field, value.clone());
        }
    }
    let result = data
        .mongodb
        .products()
        .update_one(doc! { "_id": &product.id }, doc! { "$set": set })
        .await?;
    if result.matched_count == 0 {
        return Err(AppError::not_found("Product"));
    }
    Ok(())
}

const CATALOG_FIELDS: &[&str] = &[
    "name",
    "description",
    "price",
    "category",
    "unit",
    "image_url",
    "min_order_quantity",
    "max_order_quantity",
    "is_active",
];

const REVIEW_FIELDS: &[&str] = &["reviews", "rating", "num_reviews"];

/// Filter and update pipeline that move `stock` by one change and append
/// the matching history entry in a single server-side write. Decrements
/// only match while enough stock is on hand.
pub fn stock_update(
    product_id: &str,
    change_type: StockChangeType,
    quantity: u32,
    note: Option<&str>,
    changed_by: Option<&str>,
    at: &str,
) -> (Document, Vec<Document>) {
    let delta = change_type.delta(quantity);
    let mut filter = doc! { "_id": product_id };
    if delta < 0 {
        filter.insert("stock", doc! { "$gte": -delta });
    } else {
        filter.insert("stock", doc! { "$lte": i64::from(u32::MAX) - delta });
    }

    let new_stock = doc! { "$add": ["$stock", delta] };
    let entry = doc! {
        "change_type": change_type.as_str(),
        "quantity": i64::from(quantity),
        "previous_stock": "$stock",
        "new_stock": new_stock.clone(),
        // User text is wrapped so a leading `$` is never read as a field path.
        "note": { "$literal": note },
        "changed_by": { "$literal": changed_by },
        "created_at": at,
    };
    let pipeline = vec![doc! {
        "$set": {
            "stock": new_stock,
            "updated_at": at,
            "stock_history": {
                "$concatArrays": [ { "$ifNull": ["$stock_history", []] }, [entry] ],
            },
        }
    }];
    (filter, pipeline)
}

/// Moves stock for one product and records the change. The write is a single
/// atomic update, so concurrent orders and restocks never lose a movement.
pub async fn adjust_stock(
    data: &AppState,
    product_id: &str,
    change_type: StockChangeType,
    quantity: u32,
    note: Option<String>,
    changed_by: Option<String>,
) -> AppResult<(Product, StockChange)> {
    if quantity == 0 {
        return Err(AppError::validation("Quantity must be greater than 0"));
    }
    let at = timestamp::format(&Utc::now());
    let (filter, pipeline) = stock_update(
        product_id,
        change_type,
        quantity,
        note.as_deref(),
        changed_by.as_deref(),
        &at,
    );

    let updated = data
        .mongodb
        .products()
        .find_one_and_update(filter, pipeline)
        .return_document(ReturnDocument::After)
        .await?;
    let product = match updated {
        Some(product) => product,
        None => {
            let current = find_product(data, product_id).await?;
            return Err(AppError::validation(format!(
                "Insufficient stock for {}: requested {}, available {}",
                current.name, quantity, current.stock
            )));
        }
    };
    let change = product
        .stock_history
        .last()
        .cloned()
        .ok_or_else(|| AppError::Internal("Stock history entry missing".into()))?;
    Ok((product, change))
}

// GET /api/products
pub async fn list_products(
    data: web::Data<AppState>,
    auth: Option<AuthUser>,
    query: web::Query<ProductQuery>,
) -> AppResult<HttpResponse> {
    let include_inactive = auth.as_ref().is_some_and(AuthUser::is_admin);
    let filter = query.to_filter(include_inactive)?;
    let paging = PageQuery::new(query.page, query.limit);
    let products = data.mongodb.products();

    let total = products.count_documents(filter.clone()).await?;
    let items: Vec<Product> = products
        .find(filter)
        .sort(query.sort.unwrap_or_default().to_document())
        .skip(paging.skip())
        .limit(paging.limit as i64)
        .projection(doc! { "reviews": 0, "stock_history": 0 })
        .await?
        .try_collect()
        .await?;

    Ok(HttpResponse::Ok().json(Page::new(items, paging, total)))
}

// GET /api/products/{id}
pub async fn get_product(
    data: web::Data<AppState>,
    auth: Option<AuthUser>,
    product_id: web::Path<String>,
) -> AppResult<HttpResponse> {
    let mut product = find_product(&data, &product_id).await?;
    let is_admin = auth.as_ref().is_some_and(AuthUser::is_admin);
    if !is_admin {
        if !product.is_active {
            return Err(AppError::not_found("Product"));
        }
        product.stock_history.clear();
    }
    Ok(HttpResponse::Ok().json(product))
}

// POST /api/products
pub async fn create_product(
    data: web::Data<AppState>,
    AdminUser(admin): AdminUser,
    payload: web::Json<CreateProductRequest>,
) -> AppResult<HttpResponse> {
    let product = payload.into_inner().into_product(&admin.id)?;
    data.mongodb.products().insert_one(&product).await?;
    info!("Product {} created by {}", product.id, admin.id);
    Ok(HttpResponse::Created().json(product))
}

// PUT /api/products/{id}
pub async fn update_product(
    data: web::Data<AppState>,
    AdminUser(admin): AdminUser,
    product_id: web::Path<String>,
    payload: web::Json<UpdateProductRequest>,
) -> AppResult<HttpResponse> {
    let mut product = find_product(&data, &product_id).await?;
    payload.into_inner().apply(&mut product)?;
    save_fields(&data, &product, CATALOG_FIELDS).await?;
    info!("Product {} updated by {}", product.id, admin.id);
    Ok(HttpResponse::Ok().json(product))
}

// DELETE /api/products/{id}
pub async fn delete_product(
    data: web::Data<AppState>,
    AdminUser(admin): AdminUser,
    product_id: web::Path<String>,
) -> AppResult<HttpResponse> {
    let result = data
        .mongodb
        .products()
        .delete_one(doc! { "_id": &*product_id })
        .await?;
    if result.deleted_count == 0 {
        return Err(AppError::not_found("Product"));
    }
    info!("Product {} deleted by {}", product_id, admin.id);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Product removed" })))
}

// POST /api/products/{id}/reviews
pub async fn add_review(
    data: web::Data<AppState>,
    auth: AuthUser,
    product_id: web::Path<String>,
    payload: web::Json<ReviewRequest>,
) -> AppResult<HttpResponse> {
    let mut product = find_product(&data, &product_id).await?;
    if !product.is_active {
        return Err(AppError::not_found("Product"));
    }
    let user = data
        .mongodb
        .users()
        .find_one(doc! { "_id": &auth.id })
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    let comment = payload.comment.as_deref().unwrap_or_default();
    if comment.chars().count() > 1000 {
        return Err(AppError::validation("Comment must be at most 1000 characters"));
    }
    let review = product
        .add_review(&auth.id, &user.name, payload.rating, comment)?
        .clone();
    save_fields(&data, &product, REVIEW_FIELDS).await?;
    Ok(HttpResponse::Created().json(serde_json::json!({
        "review": review,
        "rating": product.rating,
        "num_reviews": product.num_reviews,
    })))
}

// POST /api/products/{id}/stock
pub async fn update_stock(
    data: web::Data<AppState>,
    AdminUser(admin): AdminUser,
    product_id: web::Path<String>,
    payload: web::Json<StockRequest>,
) -> AppResult<HttpResponse> {
    let payload = payload.into_inner();
    let (product, change) = adjust_stock(
        &data,
        &product_id,
        payload.change_type,
        payload.quantity,
        payload.note,
        Some(admin.id.clone()),
    )
    .await?;
    info!(
        "Stock of {} changed {} -> {} by {}",
        product.id, change.previous_stock, change.new_stock, admin.id
    );
    Ok(HttpResponse::Ok().json(StockResponse {
        product_id: product.id,
        stock: product.stock,
        change,
    }))
}

// GET /api/products/{id}/stock-history
pub async fn stock_history(
    data: web::Data<AppState>,
    _admin: AdminUser,
    product_id: web::Path<String>,
) -> AppResult<HttpResponse> {
    let product = find_product(&data, &product_id).await?;
    let mut history = product.stock_history;
    history.reverse();
    Ok(HttpResponse::Ok().json(history))
}
