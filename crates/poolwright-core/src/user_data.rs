//! Cloud-init user data travels base64-encoded and size-limited.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::CoreError;

/// Maximum size of the encoded payload accepted by the API.
pub const MAX_ENCODED_LEN: usize = 32 * 1024;

pub fn encode(plain: &str) -> Result<String, CoreError> {
    let encoded = STANDARD.encode(plain.as_bytes());
    if encoded.len() > MAX_ENCODED_LEN {
        return Err(CoreError::UserDataTooLarge {
            size: encoded.len(),
            limit: MAX_ENCODED_LEN,
        });
    }
    Ok(encoded)
}

pub fn decode(encoded: &str) -> Result<String, CoreError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CoreError::InvalidUserData(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| CoreError::InvalidUserData(e.to_string()))
}
