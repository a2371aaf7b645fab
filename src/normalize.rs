//! Address and hash normalization
//!
//! Every address and hash that leaves the decoder is lowercase hex,
//! without the `0x` prefix, at its fixed length (40 chars for addresses,
//! 64 for hashes), whatever representation the node or caller used.

use crate::error::DecodeError;
use crate::types::HexField;

const ADDRESS_HEX_LEN: usize = 40;
const HASH_HEX_LEN: usize = 64;

/// Strip a leading `0x` / `0X` if present.
pub fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Normalize an address given as text.
pub fn normalize_address_str(s: &str) -> Result<String, DecodeError> {
    normalize_fixed_hex(s, ADDRESS_HEX_LEN, "address")
}

/// Normalize a 32-byte hash given as text.
pub fn normalize_hash_str(s: &str) -> Result<String, DecodeError> {
    normalize_fixed_hex(s, HASH_HEX_LEN, "hash")
}

/// Normalize an address in any wire representation. `None` (JSON null) is rejected.
pub fn normalize_address(field: Option<&HexField>) -> Result<String, DecodeError> {
    normalize_field(field, ADDRESS_HEX_LEN, "address")
}

/// Normalize a hash in any wire representation. `None` (JSON null) is rejected.
pub fn normalize_hash(field: Option<&HexField>) -> Result<String, DecodeError> {
    normalize_field(field, HASH_HEX_LEN, "hash")
}

/// Normalize an `address` parameter value.
///
/// A 40-char value is used as-is; a 64-char value is a topic word padded to
/// 32 bytes and only its last 20 bytes are kept.
pub fn normalize_address_param(value: &str) -> Result<String, DecodeError> {
    let stripped = strip_0x(value);
    let address = match stripped.len() {
        ADDRESS_HEX_LEN => stripped,
        HASH_HEX_LEN => stripped.get(HASH_HEX_LEN - ADDRESS_HEX_LEN..).ok_or_else(|| {
            DecodeError::validation(format!("address parameter is not hex: {}", value))
        })?,
        len => {
            return Err(DecodeError::validation(format!(
                "address parameter must be 40 or 64 hex chars, got {}",
                len
            )))
        }
    };
    normalize_address_str(address)
}

fn normalize_field(field: Option<&HexField>, len: usize, what: &str) -> Result<String, DecodeError> {
    match field {
        None => Err(DecodeError::validation(format!("{} is null", what))),
        Some(HexField::Raw(bytes)) => {
            if bytes.len() * 2 != len {
                return Err(DecodeError::validation(format!(
                    "{} must be {} bytes, got {}",
                    what,
                    len / 2,
                    bytes.len()
                )));
            }
            Ok(hex::encode(bytes))
        }
        Some(HexField::Text(s)) => normalize_fixed_hex(s, len, what),
    }
}

fn normalize_fixed_hex(s: &str, len: usize, what: &str) -> Result<String, DecodeError> {
    let stripped = strip_0x(s.trim());
    if stripped.len() != len {
        return Err(DecodeError::validation(format!(
            "{} must be {} hex chars, got {} ('{}')",
            what,
            len,
            stripped.len(),
            s
        )));
    }
    if !stripped.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DecodeError::validation(format!("{} is not hex: '{}'", what, s)));
    }
    Ok(stripped.to_ascii_lowercase())
}
