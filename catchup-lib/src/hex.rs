//! Serde codec for `0x`-prefixed hex quantities.
//!
//! Chain nodes encode numbers as hex strings. Leading zeros are accepted
//! (`0x002a` decodes like `0x2a`); a missing prefix or an empty digit string
//! is an error.

use serde::{Deserialize, Deserializer, Serializer};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("hex string without 0x prefix")]
    MissingPrefix,
    #[error("hex string \"0x\"")]
    EmptyNumber,
    #[error("invalid hex digit")]
    InvalidDigit,
    #[error("hex number larger than 64 bits")]
    Overflow,
}

pub fn parse_quantity(raw: &str) -> Result<u64, QuantityError> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or(QuantityError::MissingPrefix)?;

    if digits.is_empty() {
        return Err(QuantityError::EmptyNumber);
    }

    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }

    u64::from_str_radix(digits, 16).map_err(|err| match err.kind() {
        std::num::IntErrorKind::PosOverflow => QuantityError::Overflow,
        _ => QuantityError::InvalidDigit,
    })
}

pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{value:#x}"))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_quantity(&raw).map_err(serde::de::Error::custom)
}
