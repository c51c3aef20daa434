//! Runtime configuration.

use chrono::FixedOffset;

use crate::{driver::DeliveryConfig, error::ServerError};

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:8080")
    pub bind_address: String,
    /// Delivery core configuration
    pub delivery: DeliveryConfig,
    /// Bound of the delivery worker queue
    pub queue_capacity: usize,
    /// Bound of each connection's outbound queue
    pub outbound_capacity: usize,
    /// bcrypt cost factor for password hashes
    pub password_cost: u32,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            delivery: DeliveryConfig::default(),
            queue_capacity: 1024,
            outbound_capacity: 64,
            password_cost: bcrypt::DEFAULT_COST,
        }
    }
}

/// Parse a fixed UTC offset: `Z`, `UTC`, or `±HH:MM`.
///
/// # Errors
///
/// `ServerError::Config` for anything else, or an offset of 24 hours or more.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset, ServerError> {
    let raw = raw.trim();
    let invalid = || ServerError::Config(format!("invalid UTC offset {raw:?}, expected ±HH:MM"));

    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match raw.split_at_checked(1) {
        Some(("+", rest)) => (1, rest),
        Some(("-", rest)) => (-1, rest),
        _ => return Err(invalid()),
    };

    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let two_digits = |s: &str| s.len() == 2 && s.bytes().all(|b| b.is_ascii_digit());
    if !two_digits(hours) || !two_digits(minutes) {
        return Err(invalid());
    }

    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if minutes >= 60 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}
