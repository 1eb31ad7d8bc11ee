use std::env;
use std::sync::OnceLock;

static ADJRS_LOG_LEVEL: OnceLock<u32> = OnceLock::new();
static ADJRS_CONTRACT_EDGES: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn parse_u32(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok()
}

/// Default diagnostic level for freshly constructed tapes: 0 in release
/// builds, 1 in debug builds, overridable through `ADJRS_LOG_LEVEL`.
pub(crate) fn default_log_level() -> u32 {
    *ADJRS_LOG_LEVEL.get_or_init(|| {
        env::var("ADJRS_LOG_LEVEL")
            .ok()
            .and_then(|v| parse_u32(&v))
            .unwrap_or(if cfg!(debug_assertions) { 1 } else { 0 })
    })
}

/// Default for the edge-contraction rewrite, overridable through
/// `ADJRS_CONTRACT_EDGES`.
pub(crate) fn default_contract_edges() -> bool {
    *ADJRS_CONTRACT_EDGES.get_or_init(|| match env::var("ADJRS_CONTRACT_EDGES") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => true,
    })
}
