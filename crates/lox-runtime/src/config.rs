//! Collector tuning knobs.

/// Configuration for the garbage collector.
///
/// # Examples
///
/// ```
/// use lox_runtime::GcConfig;
///
/// // Collect before every allocation - the soundness torture mode.
/// let config = GcConfig {
///     stress: true,
///     ..Default::default()
/// };
/// assert!(config.stress);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct GcConfig {
    /// Collect before every allocation instead of waiting for the heap
    /// threshold. Execution slows drastically; output must not change.
    pub stress: bool,

    /// Print a one-line summary of every collection cycle to stderr.
    pub log: bool,
}

impl GcConfig {
    /// Build configuration from environment variables, overriding defaults:
    /// `LOX_GC_STRESS` and `LOX_GC_LOG` (set to `1` or `true`).
    pub fn from_env() -> Self {
        Self {
            stress: env_flag("LOX_GC_STRESS"),
            log: env_flag("LOX_GC_LOG"),
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
