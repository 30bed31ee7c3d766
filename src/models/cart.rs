use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::{new_id, round2, timestamp, Product, Unit};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: String,
    pub name: String,
    pub price: f64,
    pub unit: Unit,
    pub quantity: u32,
}

/// One cart document per user, line items embedded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub items: Vec<CartItem>,
    pub total_price: f64,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(user_id: &str) -> Self {
        Self {
            id: new_id(),
            user_id: user_id.to_string(),
            items: Vec::new(),
            total_price: 0.0,
            updated_at: Utc::now(),
        }
    }

    pub fn item(&self, product_id: &str) -> Option<&CartItem> {
        self.items.iter().find(|i| i.product_id == product_id)
    }

    /// Adds `quantity` of the product, merging with an existing line. The
    /// resulting line quantity is checked against the product bounds.
    pub fn add(&mut self, product: &Product, quantity: u32) -> AppResult<()> {
        if quantity == 0 {
            return Err(AppError::validation("Quantity must be at least 1"));
        }
        match self.items.iter_mut().find(|i| i.product_id == product.id) {
            Some(line) => {
                let merged = line.quantity.saturating_add(quantity);
                product.check_quantity(merged)?;
                line.quantity = merged;
                line.price = product.price;
                line.name = product.name.clone();
            }
            None => {
                product.check_quantity(quantity)?;
                self.items.push(CartItem {
                    product_id: product.id.clone(),
                    name: product.name.clone(),
                    price: product.price,
                    unit: product.unit,
                    quantity,
                });
            }
        }
        self.recompute();
        Ok(())
    }

    /// Sets the line quantity; zero removes the line.
    pub fn set_quantity(&mut self, product: &Product, quantity: u32) -> AppResult<()> {
        if quantity == 0 {
            return self.remove(&product.id);
        }
        product.check_quantity(quantity)?;
        let line = self
            .items
            .iter_mut()
            .find(|i| i.product_id == product.id)
            .ok_or_else(|| AppError::not_found("Cart item"))?;
        line.quantity = quantity;
        line.price = product.price;
        self.recompute();
        Ok(())
    }

    pub fn remove(&mut self, product_id: &str) -> AppResult<()> {
        let before = self.items.len();
        self.items.retain(|i| i.product_id != product_id);
        if self.items.len() == before {
            return Err(AppError::not_found("Cart item"));
        }
        self.recompute();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.recompute();
    }

    fn recompute(&mut self) {
        self.total_price = round2(
            self.items
                .iter()
                .map(|i| i.price * f64::from(i.quantity))
                .sum(),
        );
        self.updated_at = Utc::now();
    }
}
