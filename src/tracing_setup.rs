//! Structured logging setup
//!
//! Installs a `tracing_subscriber` fmt layer filtered by `RUST_LOG`
//! (default: info). The engine itself only emits through `tracing` macros;
//! hosts that already own a subscriber skip this entirely.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize console logging for the engine
///
/// Configuration via environment variables:
/// - RUST_LOG: Log level filter (default: info)
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Experiment engine logging initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        let _ = init_tracing();
        assert!(init_tracing().is_err());
    }
}
