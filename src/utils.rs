// TON address and amount helpers

use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Serialize, Serializer};

use crate::{
    constants::{NANO_PER_TON, TON_DECIMALS},
    error::{AppError, Result},
};

/// Accepts the three textual encodings the Mini-App hands us:
/// user-friendly `UQ...`, raw `0:<64 alnum>` and raw `-1:`/`0:` lowercase hex.
/// No checksum validation is performed.
pub fn is_valid_ton_address(address: &str) -> bool {
    is_user_friendly(address) || is_raw_alnum(address) || is_raw_hex(address)
}

fn is_user_friendly(address: &str) -> bool {
    let Some(body) = address.strip_prefix("UQ") else {
        return false;
    };
    (46..=48).contains(&body.len())
        && body
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_raw_alnum(address: &str) -> bool {
    let Some(body) = address.strip_prefix("0:") else {
        return false;
    };
    body.len() == 64 && body.chars().all(|c| c.is_ascii_alphanumeric())
}

fn is_raw_hex(address: &str) -> bool {
    let unsigned = address.strip_prefix('-').unwrap_or(address);
    let Some(body) = unsigned
        .strip_prefix("0:")
        .or_else(|| unsigned.strip_prefix("1:"))
    else {
        return false;
    };
    body.len() == 64
        && body
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Hex-only transaction hash, as accepted by the raw chain lookup.
pub fn is_hex_hash(hash: &str) -> bool {
    !hash.is_empty() && hash.chars().all(|c| c.is_ascii_hexdigit())
}

/// TON -> nanoTON. Exact: rejects amounts with more than 9 fractional digits.
pub fn ton_to_nano(amount: Decimal) -> Result<i64> {
    let scaled = amount
        .checked_mul(Decimal::from(NANO_PER_TON))
        .ok_or_else(|| AppError::BadRequest("Amount is out of range".to_string()))?;
    if !scaled.fract().is_zero() {
        return Err(AppError::BadRequest(format!(
            "Amount supports at most {} decimal places",
            TON_DECIMALS
        )));
    }
    scaled
        .to_i64()
        .ok_or_else(|| AppError::BadRequest("Amount is out of range".to_string()))
}

/// nanoTON -> TON
pub fn nano_to_ton(nano: i64) -> Decimal {
    Decimal::new(nano, TON_DECIMALS).normalize()
}

/// Parses a base-unit string as returned by explorers (`"50000000"`).
pub fn parse_nano(raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|e| AppError::BadRequest(format!("Invalid base-unit amount '{}': {}", raw, e)))
}

pub fn serialize_ton<S: Serializer>(nano: &i64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    Serialize::serialize(&nano_to_ton(*nano), serializer)
}

pub fn serialize_opt_ton<S: Serializer>(
    nano: &Option<i64>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    Serialize::serialize(&nano.map(nano_to_ton), serializer)
}

/// Opaque random token (hex, 64 chars).
pub fn random_token() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

pub fn new_referral_code() -> String {
    format!("NC{}", hex::encode(rand::random::<[u8; 4]>()).to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(raw: &str) -> Decimal {
        Decimal::from_str(raw).expect("decimal")
    }

    #[test]
    fn accepts_known_address_encodings() {
        assert!(is_valid_ton_address(
            "UQANJGqFrn96wqLaDQz4O2pVcTt1m-IRpf6aH-i-KpamjONa"
        ));
        assert!(is_valid_ton_address(&format!("0:{}", "A1".repeat(32))));
        assert!(is_valid_ton_address(&format!("-1:{}", "ab".repeat(32))));
        assert!(is_valid_ton_address(&format!("1:{}", "0f".repeat(32))));
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(!is_valid_ton_address("not-an-address"));
        assert!(!is_valid_ton_address("EQANJGqFrn96wqLaDQz4O2pVcTt1m-IRpf6aH-i-KpamjONa"));
        assert!(!is_valid_ton_address("UQshort"));
        assert!(!is_valid_ton_address(&format!("-1:{}", "AB".repeat(32))));
        assert!(!is_valid_ton_address(&format!("2:{}", "ab".repeat(32))));
        assert!(!is_valid_ton_address(""));
    }

    #[test]
    fn hex_hash_check() {
        assert!(is_hex_hash("abc123"));
        assert!(!is_hex_hash("xyz"));
        assert!(!is_hex_hash(""));
    }

    #[test]
    fn converts_ton_to_nano_exactly() {
        assert_eq!(ton_to_nano(dec("0.05")).unwrap(), 50_000_000);
        assert_eq!(ton_to_nano(dec("1")).unwrap(), 1_000_000_000);
        assert_eq!(ton_to_nano(dec("0.000000001")).unwrap(), 1);
        assert!(ton_to_nano(dec("0.0000000001")).is_err());
    }

    #[test]
    fn base_unit_round_trip_is_exact() {
        for raw in ["0.01", "0.05", "0.08", "12.345678901", "5", "0.1"] {
            let value = dec(raw);
            let nano = ton_to_nano(value).unwrap();
            assert_eq!(nano_to_ton(nano), value.normalize(), "round trip of {}", raw);
        }
    }

    #[test]
    fn parses_explorer_amounts() {
        assert_eq!(parse_nano(" 80000000 ").unwrap(), 80_000_000);
        assert!(parse_nano("0.08").is_err());
    }

    #[test]
    fn serializes_nano_fields_as_ton() {
        #[derive(Serialize)]
        struct Amount {
            #[serde(serialize_with = "serialize_ton")]
            amount: i64,
        }
        let json = serde_json::to_value(Amount { amount: 80_000_000 }).unwrap();
        assert_eq!(json["amount"], serde_json::json!(0.08));

        #[derive(Serialize)]
        struct Optional {
            #[serde(serialize_with = "serialize_opt_ton")]
            credited: Option<i64>,
        }
        let json = serde_json::to_value(Optional { credited: Some(1_500_000_000) }).unwrap();
        assert_eq!(json["credited"], serde_json::json!(1.5));
        let json = serde_json::to_value(Optional { credited: None }).unwrap();
        assert!(json["credited"].is_null());
    }

    #[test]
    fn referral_codes_are_prefixed() {
        let code = new_referral_code();
        assert!(code.starts_with("NC"));
        assert_eq!(code.len(), 10);
        assert_eq!(random_token().len(), 64);
    }
}
