use thiserror::Error;

/// Unified result type for the tklock crate.
pub type Result<T> = std::result::Result<T, TklockError>;

/// Errors surfaced by the lock controller and its collaborators.
#[derive(Debug, Error)]
pub enum TklockError {
    #[error("unsupported lock mode value {0}")]
    UnsupportedMode(u32),
    #[error("surface construction failed: {0}")]
    SurfaceCreation(String),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
