//! Tracing setup.

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, or by
/// `default_filter` when `RUST_LOG` is unset or invalid.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("tracing initialised");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_second_call_reports_existing_subscriber() {
        let _ = init("warn");
        assert!(!init("debug"));
    }
}
