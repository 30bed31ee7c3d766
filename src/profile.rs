// src/profile.rs

use actix_web::{web, HttpResponse};
use log::info;
use mongodb::bson::doc;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::{hash_password, verify_password, AuthUser};
use crate::error::{AppError, AppResult};
use crate::models::{Address, GeoPoint, User, UserProfile};
use crate::validation;

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
}

impl UpdateProfileRequest {
    pub fn apply(self, user: &mut User) -> AppResult<()> {
        if let Some(name) = self.name {
            validation::text("Name", &name, 1, 100)?;
            user.name = name.trim().to_string();
        }
        if let Some(phone) = self.phone {
            let phone = phone.trim().to_string();
            if phone.is_empty() {
                user.phone = None;
            } else {
                validation::phone(&phone)?;
                user.phone = Some(phone);
            }
        }
        user.touch();
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct AddressRequest {
    pub label: Option<String>,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub coordinates: GeoPoint,
    #[serde(default)]
    pub is_default: bool,
}

impl AddressRequest {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(label) = &self.label {
            validation::text("Label", label, 0, 50)?;
        }
        validation::text("Street", &self.street, 1, 200)?;
        validation::text("City", &self.city, 1, 100)?;
        validation::text("State", &self.state, 1, 100)?;
        validation::text("Postal code", &self.postal_code, 1, 20)?;
        validation::text("Country", &self.country, 1, 100)?;
        self.coordinates.validate()
    }

    pub fn into_address(self, id: String) -> Address {
        Address {
            id,
            label: self.label.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()),
            street: self.street.trim().to_string(),
            city: self.city.trim().to_string(),
            state: self.state.trim().to_string(),
            postal_code: self.postal_code.trim().to_string(),
            country: self.country.trim().to_string(),
            coordinates: self.coordinates,
            is_default: self.is_default,
        }
    }
}

async fn load_user(data: &AppState, user_id: &str) -> AppResult<User> {
    data.mongodb
        .users()
        .find_one(doc! { "_id": user_id })
        .await?
        .ok_or_else(|| AppError::not_found("User"))
}

async fn save_user(data: &AppState, user: &User) -> AppResult<()> {
    let result = data
        .mongodb
        .users()
        .replace_one(doc! { "_id": &user.id }, user)
        .await?;
    if result.matched_count == 0 {
        return Err(AppError::not_found("User"));
    }
    Ok(())
}

// GET /api/profile
pub async fn get_profile(data: web::Data<AppState>, auth: AuthUser) -> AppResult<HttpResponse> {
    let user = load_user(&data, &auth.id).await?;
    Ok(HttpResponse::Ok().json(UserProfile::from(user)))
}

// PUT /api/profile
pub async fn update_profile(
    data: web::Data<AppState>,
    auth: AuthUser,
    payload: web::Json<UpdateProfileRequest>,
) -> AppResult<HttpResponse> {
    let mut user = load_user(&data, &auth.id).await?;
    payload.into_inner().apply(&mut user)?;
    save_user(&data, &user).await?;
    Ok(HttpResponse::Ok().json(UserProfile::from(user)))
}

// PUT /api/profile/password
pub async fn change_password(
    data: web::Data<AppState>,
    auth: AuthUser,
    payload: web::Json<ChangePasswordRequest>,
) -> AppResult<HttpResponse> {
    let payload = payload.into_inner();
    validation::password("New password", &payload.new_password)?;
    let mut user = load_user(&data, &auth.id).await?;
    if !verify_password(payload.current_password, user.password.clone()).await? {
        return Err(AppError::validation("Current password is incorrect"));
    }
    user.password = hash_password(payload.new_password, data.config.bcrypt_cost).await?;
    user.touch();
    save_user(&data, &user).await?;
    info!("User {} changed password", user.id);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Password updated" })))
}

// GET /api/profile/addresses
pub async fn list_addresses(data: web::Data<AppState>, auth: AuthUser) -> AppResult<HttpResponse> {
    let user = load_user(&data, &auth.id).await?;
    Ok(HttpResponse::Ok().json(user.addresses))
}

// POST /api/profile/addresses
pub async fn add_address(
    data: web::Data<AppState>,
    auth: AuthUser,
    payload: web::Json<AddressRequest>,
) -> AppResult<HttpResponse> {
    payload.validate()?;
    let mut user = load_user(&data, &auth.id).await?;
    if user.addresses.len() >= 20 {
        return Err(AppError::validation("Address book is full"));
    }
    user.add_address(payload.into_inner().into_address(String::new()));
    save_user(&data, &user).await?;
    Ok(HttpResponse::Created().json(user.addresses))
}

// PUT /api/profile/addresses/{address_id}
pub async fn update_address(
    data: web::Data<AppState>,
    auth: AuthUser,
    address_id: web::Path<String>,
    payload: web::Json<AddressRequest>,
) -> AppResult<HttpResponse> {
    payload.validate()?;
    let mut user = load_user(&data, &auth.id).await?;
    let payload = payload.into_inner();
    let make_default = payload.is_default;

    let slot = user
        .addresses
        .iter_mut()
        .find(|a| a.id == *address_id)
        .ok_or_else(|| AppError::not_found("Address"))?;
    // Clearing the flag on the current default is ignored so one default remains.
    let keep_default = slot.is_default;
    *slot = payload.into_address(address_id.to_string());
    slot.is_default = keep_default;

    if make_default {
        user.set_default_address(&address_id)?;
    } else {
        user.touch();
    }
    save_user(&data, &user).await?;
    Ok(HttpResponse::Ok().json(user.addresses))
}

// DELETE /api/profile/addresses/{address_id}
pub async fn delete_address(
    data: web::Data<AppState>,
    auth: AuthUser,
    address_id: web::Path<String>,
) -> AppResult<HttpResponse> {
    let mut user = load_user(&data, &auth.id).await?;
    user.remove_address(&address_id)?;
    save_user(&data, &user).await?;
    Ok(HttpResponse::Ok().json(user.addresses))
}

// PUT /api/profile/addresses/{address_id}/default
pub async fn set_default_address(
    data: web::Data<AppState>,
    auth: AuthUser,
    address_id: web::Path<String>,
) -> AppResult<HttpResponse> {
    let mut user = load_user(&data, &auth.id).await?;
    user.set_default_address(&address_id)?;
    save_user(&data, &user).await?;
    Ok(HttpResponse::Ok().json(user.addresses))
}
