use thiserror::Error;

pub type Result<T> = std::result::Result<T, OverlayError>;

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("io failure: {0}")]
    IoFailure(#[from] std::io::Error),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("config error: {0}")]
    Config(String),
}

impl OverlayError {
    /// Classifies a raw I/O failure into `NotFound` when the kind indicates absence,
    /// so handlers don't have to re-derive this at every call site.
    pub fn from_io(path: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            OverlayError::NotFound(path.to_string())
        } else {
            OverlayError::IoFailure(err)
        }
    }
}
