//! Field validators shared by baymodel and bay specs.

use std::net::Ipv4Addr;

use thiserror::Error;

/// Longest accepted value for any free-form string field.
pub const MAX_FIELD_LEN: usize = 255;

/// Lowest API server port a baymodel may request (privileged ports are refused).
pub const MIN_APISERVER_PORT: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Missing { field: &'static str },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("{field} is out of range: {value} (expected {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("{field} is not a valid IPv4 address: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0}")]
    Invalid(String),
}

/// A string field must be non-empty and at most [`MAX_FIELD_LEN`] characters.
pub fn check_string(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    if value.chars().count() > MAX_FIELD_LEN {
        return Err(ValidationError::TooLong {
            field,
            max: MAX_FIELD_LEN,
        });
    }
    Ok(())
}

/// Like [`check_string`], but `None` is accepted.
pub fn check_optional_string(
    field: &'static str,
    value: Option<&str>,
) -> Result<(), ValidationError> {
    match value {
        Some(v) => check_string(field, v),
        None => Ok(()),
    }
}

/// A required string field.
pub fn require_string<'a>(
    field: &'static str,
    value: Option<&'a str>,
) -> Result<&'a str, ValidationError> {
    let value = value.ok_or(ValidationError::Missing { field })?;
    check_string(field, value)?;
    Ok(value)
}

/// Dotted-quad IPv4 only; host names are refused.
pub fn check_ipv4(field: &'static str, value: &str) -> Result<(), ValidationError> {
    check_string(field, value)?;
    value
        .parse::<Ipv4Addr>()
        .map(|_| ())
        .map_err(|_| ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        })
}

pub fn check_range(field: &'static str, value: i64, min: i64, max: i64) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

pub fn check_apiserver_port(port: u32) -> Result<(), ValidationError> {
    check_range(
        "apiserver_port",
        i64::from(port),
        i64::from(MIN_APISERVER_PORT),
        i64::from(u16::MAX),
    )
}
