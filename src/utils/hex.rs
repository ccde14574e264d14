use alloy::primitives::U256;

/// Clean a hex string by removing "0x" prefix and whitespace
pub fn clean_hex(s: &str) -> &str {
    let s = s.trim();
    if let Some(stripped) = s.strip_prefix("0x") {
        stripped
    } else {
        s
    }
}

/// Convert a quantity string (hex or decimal) to U256
pub fn to_u256(s: &str) -> Option<U256> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(hex) = s.strip_prefix("0x") {
        return U256::from_str_radix(hex, 16).ok();
    }

    if s.chars().all(|c| c.is_ascii_digit()) {
        return U256::from_str_radix(s, 10).ok();
    }

    None
}

/// Convert a JSON-RPC quantity (hex string or bare number) to u64.
/// txpool implementations disagree on the encoding, so both are accepted.
pub fn quantity_to_u64(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => {
            let cleaned = clean_hex(s);
            if s.trim().starts_with("0x") {
                u64::from_str_radix(cleaned, 16).ok()
            } else {
                cleaned.parse::<u64>().ok()
            }
        }
        _ => None,
    }
}
