use thiserror::Error;

#[derive(Error, Debug)]
pub enum MysshError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Profile already exists: {0}")]
    ProfileExists(String),

    #[error("Incomplete connection parameters: {0}")]
    IncompleteConnection(String),

    #[error("No usable credential for {0}: provide a password or a private key")]
    NoCredential(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, MysshError>;
