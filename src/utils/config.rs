//! Environment-sourced configuration knobs.
//!
//! Everything here is optional with a safe default; required run parameters
//! come in through the CLI instead.

use std::env;

const DEFAULT_UID_DIVISOR: u128 = 10_000_000_000;
const DEFAULT_ZMQ_ENDPOINT: &str = "tcp://127.0.0.1:28332";

pub fn log_level() -> String {
    let raw = env::var("LOG_LEVEL").unwrap_or_default();
    match raw.trim().to_ascii_uppercase().as_str() {
        "DEBUG" => "debug".to_string(),
        "INFO" => "info".to_string(),
        "WARN" => "warn".to_string(),
        "ERROR" => "error".to_string(),
        _ => "info".to_string(),
    }
}

pub fn log_file_path() -> Option<String> {
    env::var("LOG_FILE_PATH")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn doge_zmq_endpoint() -> String {
    env::var("DOGE_ZMQ_ENDPOINT")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_ZMQ_ENDPOINT.to_string())
}

/// Divisor that maps an L2 withdrawal amount to its cross-chain `uid`.
/// Current deployments use 1e10 (wei -> satoshi scale); kept overridable
/// because test networks have shipped other scales.
pub fn uid_divisor() -> u128 {
    env::var("FLOOD_UID_DIVISOR")
        .ok()
        .and_then(|raw| raw.trim().parse::<u128>().ok())
        .filter(|v| *v >= 1)
        .unwrap_or(DEFAULT_UID_DIVISOR)
}

pub fn db_path() -> String {
    env::var("FLOOD_DB_PATH")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "floodgate.db".to_string())
}

pub fn erc20_artifact_path() -> Option<String> {
    env::var("FLOOD_ERC20_ARTIFACT")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn erc721_artifact_path() -> Option<String> {
    env::var("FLOOD_ERC721_ARTIFACT")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    #[test]
    fn log_level_accepts_spec_values_case_insensitively() {
        let _guard = env_lock().lock().expect("env lock");
        std::env::set_var("LOG_LEVEL", "warn");
        assert_eq!(log_level(), "warn");
        std::env::set_var("LOG_LEVEL", "ERROR");
        assert_eq!(log_level(), "error");
        std::env::set_var("LOG_LEVEL", "verbose");
        assert_eq!(log_level(), "info");
        std::env::remove_var("LOG_LEVEL");
    }

    #[test]
    fn uid_divisor_defaults_and_rejects_zero() {
        let _guard = env_lock().lock().expect("env lock");
        std::env::remove_var("FLOOD_UID_DIVISOR");
        assert_eq!(uid_divisor(), 10_000_000_000);
        std::env::set_var("FLOOD_UID_DIVISOR", "0");
        assert_eq!(uid_divisor(), 10_000_000_000);
        std::env::set_var("FLOOD_UID_DIVISOR", "100");
        assert_eq!(uid_divisor(), 100);
        std::env::remove_var("FLOOD_UID_DIVISOR");
    }

    #[test]
    fn zmq_endpoint_falls_back_to_local_default() {
        let _guard = env_lock().lock().expect("env lock");
        std::env::remove_var("DOGE_ZMQ_ENDPOINT");
        assert_eq!(doge_zmq_endpoint(), "tcp://127.0.0.1:28332");
        std::env::set_var("DOGE_ZMQ_ENDPOINT", " tcp://10.0.0.5:28332 ");
        assert_eq!(doge_zmq_endpoint(), "tcp://10.0.0.5:28332");
        std::env::remove_var("DOGE_ZMQ_ENDPOINT");
    }
}
