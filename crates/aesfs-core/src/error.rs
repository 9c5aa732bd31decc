use thiserror::Error;

pub type AesfsResult<T> = Result<T, AesfsError>;

#[derive(Debug, Error)]
pub enum AesfsError {
    /// Unlocking or initializing the key material failed.
    #[error("key error: {0}")]
    Key(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
