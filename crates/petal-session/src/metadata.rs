//! Call metadata and its wire codec.
//!
//! Metadata is an ordered multi-map: keys may repeat and insertion order
//! within a key is preserved, so it is represented as a plain list of
//! pairs rather than a map.
//!
//! Keys ending in `-bin` carry binary data. At every API boundary that
//! is not the wire itself the value is base64 text; on the wire it is
//! raw bytes. All other keys carry header-safe ASCII text in both
//! representations.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::errors::MetadataError;

/// Reserved key suffix marking base64-encoded binary values.
pub const BINARY_SUFFIX: &str = "-bin";

/// Logical metadata as seen by the session consumer.
pub type Metadata = Vec<(String, String)>;

/// A single wire-side metadata value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireValue {
    /// Validated header-safe ASCII text.
    Ascii(String),
    /// Raw bytes, only legal under a `-bin` key.
    Binary(Vec<u8>),
}

/// Wire-side metadata handed to / received from the transport.
pub type WireMetadata = Vec<(String, WireValue)>;

/// Convert logical metadata into its wire representation.
///
/// `-bin` values are base64-decoded to raw bytes; all other values are
/// validated and passed through as text. Fails before the call is ever
/// started, so a bad header can never be silently dropped.
pub fn encode_metadata(entries: &[(String, String)]) -> Result<WireMetadata, MetadataError> {
    let mut wire = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        if !valid_key(key) {
            return Err(MetadataError::InvalidKey { key: key.clone() });
        }
        if key.ends_with(BINARY_SUFFIX) {
            let bytes = BASE64
                .decode(value.as_bytes())
                .map_err(|_| MetadataError::InvalidValue { key: key.clone() })?;
            wire.push((key.clone(), WireValue::Binary(bytes)));
        } else {
            if !valid_ascii_value(value) {
                return Err(MetadataError::InvalidValue { key: key.clone() });
            }
            wire.push((key.clone(), WireValue::Ascii(value.clone())));
        }
    }
    Ok(wire)
}

/// Convert wire metadata back into its logical representation.
///
/// Binary values are re-encoded as base64 text for presentation. This is
/// the inverse of [`encode_metadata`] for inputs that were valid to
/// begin with.
pub fn decode_metadata(entries: &[(String, WireValue)]) -> Metadata {
    entries
        .iter()
        .map(|(key, value)| {
            let text = match value {
                WireValue::Ascii(text) => text.clone(),
                WireValue::Binary(bytes) => BASE64.encode(bytes),
            };
            (key.clone(), text)
        })
        .collect()
}

/// Header keys: non-empty, lowercase alphanumerics plus `-`, `_` and `.`,
/// and no reserved `:` prefix.
fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_' | b'.'))
}

/// Text values: printable ASCII only. CR/LF or control bytes would break
/// the header framing.
fn valid_ascii_value(value: &str) -> bool {
    value.bytes().all(|b| (0x20..=0x7e).contains(&b))
}
