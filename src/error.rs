use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("filebrowser binary not found at {0}")]
    MissingBinary(PathBuf),

    #[error("{what} failed with exit status {code}")]
    Import { what: String, code: i32 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Password hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Server failed after {0} restart attempt(s)")]
    RestartsExhausted(u32),

    #[error("{0} is not supported by this build")]
    Unsupported(&'static str),
}
