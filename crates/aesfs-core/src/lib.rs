pub mod config;
pub mod error;

pub use config::AesfsConfig;
pub use error::{AesfsError, AesfsResult};
