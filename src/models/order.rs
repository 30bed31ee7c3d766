use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::{new_id, round2, timestamp, Address, GeoPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CashOnDelivery,
    Card,
    Upi,
    Wallet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Owners can only back out before the order is being worked on.
    pub fn cancellable_by_owner(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub name: String,
    pub price: f64,
    pub quantity: u32,
}

/// Copy of the delivery address taken when the order is placed, so later
/// profile edits do not rewrite order history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub coordinates: Option<GeoPoint>,
}

impl From<&Address> for ShippingAddress {
    fn from(a: &Address) -> Self {
        Self {
            street: a.street.clone(),
            city: a.city.clone(),
            state: a.state.clone(),
            postal_code: a.postal_code.clone(),
            country: a.country.clone(),
            coordinates: Some(a.coordinates),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub items: Vec<OrderItem>,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub status: OrderStatus,
    pub total_price: f64,
    pub notes: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "timestamp::option")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(
        user_id: &str,
        items: Vec<OrderItem>,
        shipping_address: ShippingAddress,
        payment_method: PaymentMethod,
        notes: Option<String>,
    ) -> AppResult<Self> {
        if items.is_empty() {
            return Err(AppError::validation("Order must contain at least one item"));
        }
        let now = Utc::now();
        let total_price = Self::total_of(&items);
        Ok(Self {
            id: new_id(),
            user_id: user_id.to_string(),
            items,
            shipping_address,
            payment_method,
            payment_status: PaymentStatus::Pending,
            status: OrderStatus::Pending,
            total_price,
            notes,
            created_at: now,
            updated_at: now,
            delivered_at: None,
            cancelled_at: None,
        })
    }

    pub fn total_of(items: &[OrderItem]) -> f64 {
        round2(items.iter().map(|i| i.price * f64::from(i.quantity)).sum())
    }

    /// Moves the order to `next`. Terminal states are final. Delivering a
    /// cash-on-delivery order settles its payment.
    pub fn transition(&mut self, next: OrderStatus) -> AppResult<()> {
        if self.status.is_terminal() {
            return Err(AppError::validation(format!(
                "Order is already {}",
                self.status.as_str()
            )));
        }
        let now = Utc::now();
        match next {
            OrderStatus::Delivered => {
                self.delivered_at = Some(now);
                if self.payment_method == PaymentMethod::CashOnDelivery {
                    self.payment_status = PaymentStatus::Paid;
                }
            }
            OrderStatus::Cancelled => self.cancelled_at = Some(now),
            _ => {}
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}
