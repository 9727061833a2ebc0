use anyhow::{Context, Result};
use tracing::info_span;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Installs the stderr log subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set.
pub(crate) fn init_logging(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log level '{level}'"))?,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .context("failed to install the log subscriber")
}

/// Runs `f` inside a span named after a pipeline phase.
pub(crate) fn with_span<T, F>(phase: &'static str, unit: &str, f: F) -> T
where
    F: FnOnce() -> T,
{
    let span = info_span!("phase", name = phase, unit = unit);
    span.in_scope(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_helper_returns_closure_value() {
        let value = with_span("config", "spotbugsMain", || 42);

        assert_eq!(value, 42);
    }
}
