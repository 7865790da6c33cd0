//! Shared types and errors for myssh.

pub mod error;
pub mod types;

pub use error::{MysshError, Result};
pub use types::*;
