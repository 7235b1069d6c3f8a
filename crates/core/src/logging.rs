use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes a process-wide `tracing` subscriber: an `EnvFilter` seeded
/// with `default_directive` (overridable via `RUST_LOG`) feeding a plain
/// `fmt` layer. Mirrors the teacher's logging setup, trimmed to what a
/// library without its own HTTP API or CLI needs — no log-broadcast
/// layer, no reload handle, no JSON file sink.
pub fn init_logging(default_directive: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(default_directive.parse().context("invalid default directive")?)
        .from_env()
        .context("invalid RUST_LOG value")?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .context("tracing subscriber already initialized")
}
