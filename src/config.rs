use std::env;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// One year; longer lifetimes overflow the expiry arithmetic.
pub const MAX_JWT_EXPIRY_HOURS: i64 = 8760;

#[derive(Clone, Debug)]
pub struct Config {
    pub mongo_uri: String,
    pub database_name: String,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub bind_addr: String,
    pub frontend_origin: String,
    pub bcrypt_cost: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup, so it can be exercised without
    /// touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let jwt_expiry_hours = match lookup("JWT_EXPIRY_HOURS") {
            Some(raw) => match raw.parse::<i64>() {
                Ok(h) if (1..=MAX_JWT_EXPIRY_HOURS).contains(&h) => h,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "JWT_EXPIRY_HOURS",
                        value: raw,
                    })
                }
            },
            None => 24,
        };

        let bcrypt_cost = match lookup("BCRYPT_COST") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(c) if (4..=31).contains(&c) => c,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "BCRYPT_COST",
                        value: raw,
                    })
                }
            },
            None => bcrypt::DEFAULT_COST,
        };

        Ok(Self {
            mongo_uri: required("MONGO_URI")?,
            database_name: lookup("DATABASE_NAME").unwrap_or_else(|| "shopline".to_string()),
            jwt_secret: required("JWT_SECRET")?,
            jwt_expiry_hours,
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            frontend_origin: lookup("FRONTEND_ORIGIN")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            bcrypt_cost,
        })
    }
}
