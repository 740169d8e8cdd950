use crate::Result;

/// Initialize logging/tracing for the forwarder.
///
/// Defaults to `info` for our crates; override with `RUST_LOG`. Safe to call
/// more than once (later calls are no-ops), so tests can use it too.
pub fn init(service_name: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "info,tgfwd=info,tgfwd_core=info,{service_name}=info"
        ))
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init();

    Ok(())
}
