use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::{new_id, timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn validate(&self) -> AppResult<()> {
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(AppError::validation("Latitude must be between -90 and 90"));
        }
        if !(-180.0..=180.0).contains(&self.lng) {
            return Err(AppError::validation("Longitude must be between -180 and 180"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub id: String,
    pub label: Option<String>,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub coordinates: GeoPoint,
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    /// Mirror of `role`, kept for clients that only look at a boolean.
    pub is_admin: bool,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub addresses: Vec<Address>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: &str, email: &str, password_hash: String, role: Role) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            name: name.trim().to_string(),
            email: normalize_email(email),
            password: password_hash,
            role,
            is_admin: role.is_admin(),
            phone: None,
            addresses: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_role(&mut self, role: Role) {
        self.role = role;
        self.is_admin = role.is_admin();
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn default_address(&self) -> Option<&Address> {
        self.addresses.iter().find(|a| a.is_default)
    }

    pub fn address(&self, address_id: &str) -> Option<&Address> {
        self.addresses.iter().find(|a| a.id == address_id)
    }

    /// Appends the address. The first address is always the default and a
    /// new default demotes the previous one.
    pub fn add_address(&mut self, mut address: Address) -> &Address {
        if address.id.is_empty() {
            address.id = new_id();
        }
        if self.addresses.is_empty() {
            address.is_default = true;
        }
        if address.is_default {
            for existing in &mut self.addresses {
                existing.is_default = false;
            }
        }
        self.addresses.push(address);
        self.touch();
        &self.addresses[self.addresses.len() - 1]
    }

    pub fn set_default_address(&mut self, address_id: &str) -> AppResult<()> {
        if self.address(address_id).is_none() {
            return Err(AppError::not_found("Address"));
        }
        for address in &mut self.addresses {
            address.is_default = address.id == address_id;
        }
        self.touch();
        Ok(())
    }

    /// Removes the address, promoting the first remaining one when the
    /// default goes away.
    pub fn remove_address(&mut self, address_id: &str) -> AppResult<Address> {
        let index = self
            .addresses
            .iter()
            .position(|a| a.id == address_id)
            .ok_or_else(|| AppError::not_found("Address"))?;
        let removed = self.addresses.remove(index);
        if removed.is_default {
            if let Some(first) = self.addresses.first_mut() {
                first.is_default = true;
            }
        }
        self.touch();
        Ok(removed)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// What the API exposes for a user: everything except the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_admin: bool,
    pub phone: Option<String>,
    pub addresses: Vec<Address>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            name: u.name,
            email: u.email,
            role: u.role,
            is_admin: u.is_admin,
            phone: u.phone,
            addresses: u.addresses,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}
