use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load private key: {0}")]
    Credential(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Script discovery failed: {0}")]
    Discovery(String),

    // 감사 기록 실패는 배치를 중단시킴 (on_failure = "abort")
    #[error("Failed to write audit record for {filename}: {message}")]
    AuditWrite { filename: String, message: String },

    #[error("Audit trail incomplete: {failed}/{total} audit writes failed")]
    AuditIncomplete { failed: usize, total: usize },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, DeployError>;
