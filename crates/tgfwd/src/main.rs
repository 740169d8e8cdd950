use std::sync::Arc;

use tgfwd_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), tgfwd_core::Error> {
    tgfwd_core::logging::init("tgfwd")?;

    let cfg = Arc::new(Config::load()?);

    tgfwd_telegram::router::run_polling(cfg)
        .await
        .map_err(|e| tgfwd_core::Error::Channel(format!("forwarder failed: {e}")))?;

    Ok(())
}
