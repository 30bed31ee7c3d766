use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform},
    http, web, Error, FromRequest, HttpMessage, HttpRequest, HttpResponse, ResponseError,
};
use bcrypt::{hash, verify};
use chrono::{Duration, Utc};
use futures::future::{ok, ready, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, info, warn};
use mongodb::bson::doc;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::db::is_duplicate_key;
use crate::error::{AppError, AppResult};
use crate::models::user::normalize_email;
use crate::models::{Role, User, UserProfile};
use crate::validation;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: usize,
}

/// Identity attached to a request (or socket) once its bearer token checks out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    /// Ownership check: the caller owns the resource or is an admin.
    pub fn ensure_owner_or_admin(&self, owner_id: &str) -> AppResult<()> {
        if self.id == owner_id || self.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden("Not authorized to access this resource"))
        }
    }
}

/// An authenticated caller whose token carries the admin role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

pub fn create_jwt(user_id: &str, role: Role, secret: &str, expiry_hours: i64) -> AppResult<String> {
    let expiration = Utc::now() + Duration::hours(expiry_hours);
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp: expiration.timestamp() as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?)
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

fn bearer_token(req: &ServiceRequest) -> Option<String> {
    let header = req.headers().get(http::header::AUTHORIZATION)?;
    let value = header.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

/// Verifies any bearer token on the request and stores the caller as an
/// [`AuthUser`] extension. Requests without a token pass through; the
/// extractors decide whether a route needs one.
#[derive(Clone)]
pub struct Authentication {
    secret: Rc<str>,
}

impl Authentication {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Rc::from(secret),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware {
            service,
            secret: self.secret.clone(),
        })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    secret: Rc<str>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if let Some(token) = bearer_token(&req) {
            match validate_jwt(&token, &self.secret) {
                Ok(claims) => {
                    req.extensions_mut().insert(AuthUser {
                        id: claims.sub,
                        role: claims.role,
                    });
                }
                Err(e) => {
                    debug!("Rejected bearer token: {}", e);
                    let resp = AppError::Unauthorized("Not authorized, token failed".into())
                        .error_response();
                    let (req_parts, _payload) = req.into_parts();
                    let srv_resp = ServiceResponse::new(req_parts, resp);
                    return Box::pin(async move { Ok(srv_resp) });
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthUser>()
                .cloned()
                .ok_or_else(|| AppError::Unauthorized("Not authorized, no token".into())),
        )
    }
}

impl FromRequest for AdminUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let user = match req.extensions().get::<AuthUser>().cloned() {
            Some(user) => user,
            None => return ready(Err(AppError::Unauthorized("Not authorized, no token".into()))),
        };
        if user.is_admin() {
            ready(Ok(AdminUser(user)))
        } else {
            ready(Err(AppError::forbidden("Not authorized as an admin")))
        }
    }
}

pub async fn hash_password(password: String, cost: u32) -> AppResult<String> {
    web::block(move || hash(password, cost))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(AppError::from)
}

pub async fn verify_password(password: String, hashed: String) -> AppResult<bool> {
    web::block(move || verify(password, &hashed))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(AppError::from)
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl RegisterRequest {
    pub fn validate(&self) -> AppResult<()> {
        validation::text("Name", &self.name, 1, 100)?;
        validation::email(&self.email)?;
        validation::password("Password", &self.password)
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProfile,
}

// POST /api/auth/register
pub async fn register(
    data: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> AppResult<HttpResponse> {
    payload.validate()?;
    let users = data.mongodb.users();
    let email = normalize_email(&payload.email);

    if users.find_one(doc! { "email": &email }).await?.is_some() {
        return Err(AppError::validation("User already exists"));
    }

    let hashed = hash_password(payload.password.clone(), data.config.bcrypt_cost).await?;
    let user = User::new(&payload.name, &email, hashed, Role::User);

    if let Err(e) = users.insert_one(&user).await {
        if is_duplicate_key(&e) {
            return Err(AppError::validation("User already exists"));
        }
        return Err(e.into());
    }

    info!("Registered user {}", user.id);
    let token = create_jwt(
        &user.id,
        user.role,
        &data.config.jwt_secret,
        data.config.jwt_expiry_hours,
    )?;
    Ok(HttpResponse::Created().json(AuthResponse {
        token,
        user: user.into(),
    }))
}

// POST /api/auth/login
pub async fn login(
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> AppResult<HttpResponse> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(AppError::validation("Email and password are required"));
    }
    let invalid = || AppError::Unauthorized("Invalid email or password".into());

    let user = data
        .mongodb
        .users()
        .find_one(doc! { "email": normalize_email(&payload.email) })
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(payload.password.clone(), user.password.clone()).await? {
        warn!("Failed login for {}", user.email);
        return Err(invalid());
    }

    let token = create_jwt(
        &user.id,
        user.role,
        &data.config.jwt_secret,
        data.config.jwt_expiry_hours,
    )?;
    Ok(HttpResponse::Ok().json(AuthResponse {
        token,
        user: user.into(),
    }))
}

// GET /api/auth/me
pub async fn me(data: web::Data<AppState>, auth: AuthUser) -> AppResult<HttpResponse> {
    let user = data
        .mongodb
        .users()
        .find_one(doc! { "_id": &auth.id })
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;
    Ok(HttpResponse::Ok().json(UserProfile::from(user)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_round_trip_keeps_role() {
        let token = create_jwt("u1", Role::Admin, "secret", 1).unwrap();
        let claims = validate_jwt(&token, "secret").unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.role, Role::Admin);
    }

    #[test]
    fn jwt_rejects_wrong_secret_and_expiry() {
        let token = create_jwt("u1", Role::User, "secret", 1).unwrap();
        assert!(validate_jwt(&token, "other").is_err());

        let expired = create_jwt("u1", Role::User, "secret", -2).unwrap();
        assert!(validate_jwt(&expired, "secret").is_err());
    }

    #[test]
    fn longest_configurable_expiry_still_validates() {
        let token =
            create_jwt("u1", Role::User, "secret", crate::config::MAX_JWT_EXPIRY_HOURS).unwrap();
        assert!(validate_jwt(&token, "secret").is_ok());
    }

    #[test]
    fn register_payload_rules() {
        let ok = RegisterRequest {
            name: "Ann".into(),
            email: "ann@example.com".into(),
            password: "hunter22".into(),
        };
        assert!(ok.validate().is_ok());

        let short = RegisterRequest {
            password: "abc".into(),
            ..ok
        };
        assert!(short.validate().is_err());
    }

    #[test]
    fn ownership() {
        let user = AuthUser {
            id: "u1".into(),
            role: Role::User,
        };
        assert!(user.ensure_owner_or_admin("u1").is_ok());
        assert!(matches!(
            user.ensure_owner_or_admin("u2"),
            Err(AppError::Forbidden(_))
        ));
        let admin = AuthUser {
            id: "a".into(),
            role: Role::Admin,
        };
        assert!(admin.ensure_owner_or_admin("u2").is_ok());
    }

    #[actix_web::test]
    async fn passwords_hash_and_verify() {
        let hashed = hash_password("hunter22".into(), 4).await.unwrap();
        assert!(verify_password("hunter22".into(), hashed.clone()).await.unwrap());
        assert!(!verify_password("wrong".into(), hashed).await.unwrap());
    }
}
