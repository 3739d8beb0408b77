//! Logging setup.
//!
//! The library only emits `tracing` events; binaries call [`init_tracing`]
//! once to install a subscriber.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directive used when `RUST_LOG` is unset.
pub fn default_directive(default_level: &str) -> String {
    // The binary shares the library's target prefix.
    format!("{}={}", env!("CARGO_PKG_NAME").replace('-', "_"), default_level)
}

/// Install a fmt subscriber filtered by `RUST_LOG`, or by `default_level`
/// for this crate when `RUST_LOG` is unset.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(default_level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(default_level)));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_names_crate() {
        let directive = default_directive("debug");
        assert!(directive.starts_with("relic_session=debug"));
    }
}
