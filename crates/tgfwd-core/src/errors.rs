/// Core error type for the forwarder.
///
/// The adapter crate maps its client-specific errors into this type so the
/// relay loop can handle failures consistently (log-and-skip vs fatal config).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel error: {0}")]
    Channel(String),
}

pub type Result<T> = std::result::Result<T, Error>;
