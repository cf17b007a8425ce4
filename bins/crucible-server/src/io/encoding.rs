// Base64 payload handling and memory-size parsing.

use std::sync::OnceLock;

use anyhow::{bail, Result};
use base64::{engine::general_purpose, Engine as _};
use regex::Regex;

use crate::error::EngineError;

/// Canonical RFC 4648 base64: full quartets with correct tail padding.
/// The empty string is valid (and decodes to no bytes).
fn base64_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:[A-Za-z0-9+/]{4})*(?:[A-Za-z0-9+/]{2}==|[A-Za-z0-9+/]{3}=)?$")
            .expect("base64 pattern is valid")
    })
}

pub fn is_valid_base64(s: &str) -> bool {
    base64_pattern().is_match(s)
}

/// Strictly validate and decode a base64 payload.
pub fn decode_base64(s: &str) -> Result<Vec<u8>, EngineError> {
    if !is_valid_base64(s) {
        let preview: String = s.chars().take(24).collect();
        return Err(EngineError::InvalidEncoding(preview));
    }
    general_purpose::STANDARD
        .decode(s)
        .map_err(|e| EngineError::InvalidEncoding(e.to_string()))
}

/// Decode a base64 payload into UTF-8 text, replacing invalid sequences.
pub fn decode_base64_text(s: &str) -> Result<String, EngineError> {
    Ok(String::from_utf8_lossy(&decode_base64(s)?).into_owned())
}

pub fn encode_base64(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

/// Parse a memory-size string into bytes: bare digits are bytes, a trailing
/// `K`/`M`/`G` (case-insensitive) scales by powers of 1024.
pub fn parse_memory_limit(s: &str) -> Result<i64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        bail!("empty memory limit");
    }

    let (digits, multiplier) = match trimmed.chars().last().unwrap() {
        'k' | 'K' => (&trimmed[..trimmed.len() - 1], 1024),
        'm' | 'M' => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        'g' | 'G' => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        c if c.is_ascii_digit() => (trimmed, 1),
        c => bail!("unsupported memory suffix '{c}'"),
    };

    let value: i64 = digits.parse()?;
    if value < 0 {
        bail!("memory limit must be non-negative");
    }
    Ok(value * multiplier)
}
