use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::{new_id, timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Fruits,
    Vegetables,
    Dairy,
    Bakery,
    Meat,
    Seafood,
    Beverages,
    Snacks,
    Household,
    PersonalCare,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Fruits => "fruits",
            Category::Vegetables => "vegetables",
            Category::Dairy => "dairy",
            Category::Bakery => "bakery",
            Category::Meat => "meat",
            Category::Seafood => "seafood",
            Category::Beverages => "beverages",
            Category::Snacks => "snacks",
            Category::Household => "household",
            Category::PersonalCare => "personal_care",
            Category::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Piece,
    Kg,
    G,
    Liter,
    Ml,
    Pack,
    Dozen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockChangeType {
    Added,
    Removed,
    Sold,
    Returned,
}

impl StockChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            StockChangeType::Added => "added",
            StockChangeType::Removed => "removed",
            StockChangeType::Sold => "sold",
            StockChangeType::Returned => "returned",
        }
    }

    /// Signed stock movement for `quantity` units.
    pub fn delta(self, quantity: u32) -> i64 {
        match self {
            StockChangeType::Added | StockChangeType::Returned => i64::from(quantity),
            StockChangeType::Removed | StockChangeType::Sold => -i64::from(quantity),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub rating: u8,
    pub comment: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockChange {
    pub change_type: StockChangeType,
    pub quantity: u32,
    pub previous_stock: u32,
    pub new_stock: u32,
    pub note: Option<String>,
    pub changed_by: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    pub category: Category,
    pub unit: Unit,
    pub image_url: Option<String>,
    pub stock: u32,
    pub min_order_quantity: u32,
    pub max_order_quantity: u32,
    pub is_active: bool,
    #[serde(default)]
    pub reviews: Vec<Review>,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub num_reviews: u32,
    #[serde(default)]
    pub stock_history: Vec<StockChange>,
    pub created_by: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

pub const DEFAULT_MIN_ORDER: u32 = 1;
pub const DEFAULT_MAX_ORDER: u32 = 100;

impl Product {
    pub fn validate_order_bounds(min: u32, max: u32) -> AppResult<()> {
        if min < 1 {
            return Err(AppError::validation("Minimum order quantity must be at least 1"));
        }
        if max < min {
            return Err(AppError::validation(
                "Maximum order quantity cannot be less than minimum order quantity",
            ));
        }
        Ok(())
    }

    /// Checks a requested line quantity against the order bounds and the
    /// stock on hand.
    pub fn check_quantity(&self, quantity: u32) -> AppResult<()> {
        if quantity < self.min_order_quantity {
            return Err(AppError::validation(format!(
                "Minimum order quantity for {} is {}",
                self.name, self.min_order_quantity
            )));
        }
        if quantity > self.max_order_quantity {
            return Err(AppError::validation(format!(
                "Maximum order quantity for {} is {}",
                self.name, self.max_order_quantity
            )));
        }
        if quantity > self.stock {
            return Err(AppError::validation(format!(
                "Only {} of {} left in stock",
                self.stock, self.name
            )));
        }
        Ok(())
    }

    /// Applies a stock movement and records it in the history log.
    pub fn apply_stock_change(
        &mut self,
        change_type: StockChangeType,
        quantity: u32,
        note: Option<String>,
        changed_by: Option<String>,
    ) -> AppResult<&StockChange> {
        if quantity == 0 {
            return Err(AppError::validation("Quantity must be greater than 0"));
        }
        let previous_stock = self.stock;
        let new_stock = match change_type {
            StockChangeType::Added | StockChangeType::Returned => previous_stock
                .checked_add(quantity)
                .ok_or_else(|| AppError::validation("Stock overflow"))?,
            StockChangeType::Removed | StockChangeType::Sold => {
                previous_stock.checked_sub(quantity).ok_or_else(|| {
                    AppError::validation(format!(
                        "Insufficient stock: requested {}, available {}",
                        quantity, previous_stock
                    ))
                })?
            }
        };

        let now = Utc::now();
        self.stock = new_stock;
        self.updated_at = now;
        self.stock_history.push(StockChange {
            change_type,
            quantity,
            previous_stock,
            new_stock,
            note,
            changed_by,
            created_at: now,
        });
        Ok(&self.stock_history[self.stock_history.len() - 1])
    }

    pub fn add_review(&mut self, user_id: &str, user_name: &str, rating: u8, comment: &str) -> AppResult<&Review> {
        if !(1..=5).contains(&rating) {
            return Err(AppError::validation("Rating must be between 1 and 5"));
        }
        if self.reviews.iter().any(|r| r.user_id == user_id) {
            return Err(AppError::validation("Product already reviewed"));
        }
        self.reviews.push(Review {
            id: new_id(),
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            rating,
            comment: comment.trim().to_string(),
            created_at: Utc::now(),
        });
        self.recompute_rating();
        self.updated_at = Utc::now();
        Ok(&self.reviews[self.reviews.len() - 1])
    }

    pub fn recompute_rating(&mut self) {
        self.num_reviews = self.reviews.len() as u32;
        self.rating = if self.reviews.is_empty() {
            0.0
        } else {
            let sum: u32 = self.reviews.iter().map(|r| u32::from(r.rating)).sum();
            let avg = f64::from(sum) / self.reviews.len() as f64;
            (avg * 10.0).round() / 10.0
        };
    }
}
