//! Address redaction chokepoint for log output.

/// Mask used for the hidden portion of an address.
pub const MASK: &str = "****";

/// Redact a phone-like address for logging.
///
/// Addresses shorter than four characters collapse to the fixed mask;
/// otherwise only the last four characters are shown.
pub fn redact_address(addr: &str) -> String {
    let chars: Vec<char> = addr.chars().collect();
    if chars.len() < 4 {
        return MASK.to_owned();
    }
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("{MASK}{tail}")
}
