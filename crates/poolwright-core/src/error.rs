use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown pool state: {0}")]
    UnknownPhase(String),

    #[error("user data is {size} bytes once encoded, limit is {limit}")]
    UserDataTooLarge { size: usize, limit: usize },

    #[error("invalid user data: {0}")]
    InvalidUserData(String),

    #[error("invalid instance type: {0}")]
    InvalidInstanceType(String),
}
