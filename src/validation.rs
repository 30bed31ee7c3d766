use std::sync::OnceLock;

use regex::Regex;

use crate::error::{AppError, AppResult};

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$")
            .expect("email pattern is valid")
    })
}

fn phone_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+?[0-9]{7,15}$").expect("phone pattern is valid"))
}

pub fn is_valid_email(email: &str) -> bool {
    email_regex().is_match(email)
}

pub fn is_valid_phone(phone: &str) -> bool {
    phone_regex().is_match(phone)
}

/// Trimmed length check on a required text field.
pub fn text(field: &str, value: &str, min: usize, max: usize) -> AppResult<()> {
    let len = value.trim().chars().count();
    if len < min {
        return Err(if min <= 1 {
            AppError::validation(format!("{} is required", field))
        } else {
            AppError::validation(format!("{} must be at least {} characters", field, min))
        });
    }
    if len > max {
        return Err(AppError::validation(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(())
}

/// Passwords are measured as typed; surrounding spaces count.
pub fn password(field: &str, value: &str) -> AppResult<()> {
    let len = value.chars().count();
    if len < 6 {
        return Err(AppError::validation(format!(
            "{} must be at least 6 characters",
            field
        )));
    }
    if len > 128 {
        return Err(AppError::validation(format!(
            "{} must be at most 128 characters",
            field
        )));
    }
    Ok(())
}

pub fn email(value: &str) -> AppResult<()> {
    if is_valid_email(value.trim()) {
        Ok(())
    } else {
        Err(AppError::validation("Please provide a valid email"))
    }
}

pub fn phone(value: &str) -> AppResult<()> {
    if is_valid_phone(value.trim()) {
        Ok(())
    } else {
        Err(AppError::validation("Please provide a valid phone number"))
    }
}

pub fn non_negative_price(field: &str, value: f64) -> AppResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(AppError::validation(format!("{} cannot be negative", field)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shapes() {
        assert!(is_valid_email("jane.doe+shop@example.co.uk"));
        assert!(!is_valid_email("jane@"));
        assert!(!is_valid_email("not an email"));
        assert!(!is_valid_email("a@b.c"));
    }

    #[test]
    fn phone_shapes() {
        assert!(is_valid_phone("+919876543210"));
        assert!(is_valid_phone("5551234"));
        assert!(!is_valid_phone("555-1234"));
        assert!(!is_valid_phone("123"));
    }

    #[test]
    fn text_bounds() {
        assert!(text("Name", "  ", 1, 10).is_err());
        assert!(text("Name", "Ann", 1, 10).is_ok());
        assert!(text("Password", "abc", 6, 128).is_err());
        assert!(text("Name", "abcdefghijk", 1, 10).is_err());
    }

    #[test]
    fn password_keeps_surrounding_spaces() {
        assert!(password("Password", "  abcd  ").is_ok());
        assert!(password("Password", "abcd").is_err());
        assert!(password("Password", &"x".repeat(129)).is_err());
    }

    #[test]
    fn prices() {
        assert!(non_negative_price("Price", 0.0).is_ok());
        assert!(non_negative_price("Price", -0.01).is_err());
        assert!(non_negative_price("Price", f64::NAN).is_err());
    }
}
