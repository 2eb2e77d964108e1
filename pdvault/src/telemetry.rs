//! Telemetry initialization (tracing with a fmt subscriber).
//!
//! Log filtering follows the standard `RUST_LOG` environment variable and
//! defaults to `info`. Example:
//!
//! ```bash
//! RUST_LOG=pdvault=debug,info pdvault
//! ```

use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize tracing with console output.
pub fn init_telemetry() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    info!("Telemetry initialized");

    Ok(())
}
