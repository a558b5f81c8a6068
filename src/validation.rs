//! Field validation shared by the create/update operations.

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::AdminError;

pub const MAX_NAME_LEN: usize = 100;

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9][0-9\- ]{5,19}$").expect("phone pattern compiles"));

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").expect("email pattern compiles")
});

/// Trimmed, non-empty, at most `MAX_NAME_LEN` characters.
pub fn required_text(field: &str, value: &str) -> Result<String, AdminError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AdminError::validation(format!("{} is required", field)));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(AdminError::validation(format!(
            "{} must be at most {} characters",
            field, MAX_NAME_LEN
        )));
    }
    Ok(trimmed.to_string())
}

/// Blank strings collapse to `None`.
pub fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn optional_phone(value: Option<&str>) -> Result<Option<String>, AdminError> {
    match optional_text(value) {
        Some(phone) if !PHONE_RE.is_match(&phone) => Err(AdminError::validation(format!(
            "'{}' is not a valid phone number",
            phone
        ))),
        other => Ok(other),
    }
}

pub fn optional_email(value: Option<&str>) -> Result<Option<String>, AdminError> {
    match optional_text(value) {
        Some(email) if !EMAIL_RE.is_match(&email) => Err(AdminError::validation(format!(
            "'{}' is not a valid email address",
            email
        ))),
        other => Ok(other),
    }
}

pub fn non_negative(field: &str, value: f64) -> Result<f64, AdminError> {
    if !value.is_finite() || value < 0.0 {
        return Err(AdminError::validation(format!(
            "{} must be a non-negative number",
            field
        )));
    }
    Ok(value)
}

pub fn positive(field: &str, value: i32) -> Result<i32, AdminError> {
    if value < 1 {
        return Err(AdminError::validation(format!("{} must be at least 1", field)));
    }
    Ok(value)
}

pub fn rating(value: Option<i32>) -> Result<Option<i32>, AdminError> {
    match value {
        Some(r) if !(1..=5).contains(&r) => Err(AdminError::validation(format!(
            "rating must be between 1 and 5, got {}",
            r
        ))),
        other => Ok(other),
    }
}

/// Round a currency amount to cents.
pub fn round_amount(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_text_trims_and_rejects_blank() {
        assert_eq!(required_text("name", "  Cardiology ").unwrap(), "Cardiology");
        assert!(required_text("name", "   ").is_err());
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(required_text("name", &long).is_err());
    }

    #[test]
    fn phone_numbers() {
        assert_eq!(
            optional_phone(Some("+86 138-0000-0000")).unwrap(),
            Some("+86 138-0000-0000".to_string())
        );
        assert_eq!(optional_phone(Some("010-6543210")).unwrap().as_deref(), Some("010-6543210"));
        assert_eq!(optional_phone(Some("  ")).unwrap(), None);
        assert_eq!(optional_phone(None).unwrap(), None);
        assert!(optional_phone(Some("call me")).is_err());
        assert!(optional_phone(Some("123")).is_err());
    }

    #[test]
    fn email_addresses() {
        assert!(optional_email(Some("li.na@hospital.cn")).unwrap().is_some());
        assert!(optional_email(Some("li.na@hospital")).is_err());
        assert!(optional_email(Some("@hospital.cn")).is_err());
    }

    #[test]
    fn numbers() {
        assert_eq!(non_negative("expenses", 0.0).unwrap(), 0.0);
        assert!(non_negative("expenses", -0.01).is_err());
        assert!(non_negative("expenses", f64::NAN).is_err());
        assert_eq!(positive("num", 3).unwrap(), 3);
        assert!(positive("num", 0).is_err());
    }

    #[test]
    fn ratings() {
        assert_eq!(rating(Some(5)).unwrap(), Some(5));
        assert_eq!(rating(None).unwrap(), None);
        assert!(rating(Some(0)).is_err());
        assert!(rating(Some(6)).is_err());
    }

    #[test]
    fn amounts_round_to_cents() {
        assert_eq!(round_amount(12.3456), 12.35);
        assert_eq!(round_amount(1999.0), 1999.0);
    }
}
