use thiserror::Error;

/// Error kinds surfaced by every gateway call.
///
/// Only `Transient` is safe to retry blindly, and only for reads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("transient API failure: {0}")]
    Transient(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected API response: {0}")]
    Decode(String),

    #[error("operation {id} ended in state {state}: {message}")]
    OperationFailed {
        id: String,
        state: String,
        message: String,
    },

    #[error("operation {id} did not complete in time")]
    OperationTimeout { id: String },

    #[error("gateway configuration error: {0}")]
    Config(String),
}

impl ApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            404 => Self::NotFound(message),
            408 | 429 | 500..=599 => Self::Transient(format!("HTTP {status}: {message}")),
            _ => Self::Rejected { status, message },
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(format_err_chain(&err))
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), format_err_chain(&err))
        } else {
            Self::Transient(format_err_chain(&err))
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Walk the full error chain and join all causes into one string.
///
/// reqwest errors have terse `Display` impls (e.g. "error sending request")
/// but useful detail in the source chain.
pub fn format_err_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(ApiError::from_status(404, "gone".into()).is_not_found());
        assert!(ApiError::from_status(503, "busy".into()).is_transient());
        assert!(ApiError::from_status(429, "slow down".into()).is_transient());
        assert_eq!(
            ApiError::from_status(400, "bad disk size".into()),
            ApiError::Rejected {
                status: 400,
                message: "bad disk size".into()
            }
        );
    }
}
