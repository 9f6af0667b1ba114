use std::env;
use std::sync::OnceLock;

static IRPASS_MAX_ITERS: OnceLock<usize> = OnceLock::new();
static IRPASS_VERIFY_EACH: OnceLock<bool> = OnceLock::new();
static IRPASS_PASS_STATS: OnceLock<bool> = OnceLock::new();

const DEFAULT_MAX_ITERS: usize = 8;

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn bool_var(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => default,
    }
}

/// Iteration cap for fixed-point pipelines (`IRPASS_MAX_ITERS`).
pub(crate) fn max_iterations() -> usize {
    *IRPASS_MAX_ITERS.get_or_init(|| {
        env::var("IRPASS_MAX_ITERS")
            .ok()
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_ITERS)
    })
}

pub(crate) fn verify_each() -> bool {
    *IRPASS_VERIFY_EACH.get_or_init(|| bool_var("IRPASS_VERIFY_EACH", true))
}

pub(crate) fn pass_stats_enabled() -> bool {
    *IRPASS_PASS_STATS.get_or_init(|| bool_var("IRPASS_PASS_STATS", false))
}
