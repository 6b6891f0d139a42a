use anyhow::{anyhow, Context};
use tracing_subscriber::EnvFilter;

use super::env::env_flag;

/// Used when `RUST_LOG` is unset. sqlx logs every statement at info, which drowns out chunk commits.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Install the global fmt subscriber shared by every binary.
///
/// `RUST_LOG` wins over `default_filter`. `LOG_COMPACT=1` switches to single-line output without
/// source locations, which reads better under a process supervisor.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .with_context(|| format!("invalid default log filter {default_filter:?}"))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if env_flag("LOG_COMPACT", false) {
        builder.compact().try_init()
    } else {
        builder.with_file(true).with_line_number(true).try_init()
    };
    installed.map_err(|e| anyhow!("failed to initialize tracing: {e}"))
}
