use thiserror::Error;

#[derive(Error, Debug)]
pub enum UsageError {
    #[error("API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Server rejected credentials (status {status})")]
    Unauthorized { status: u16 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid build timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<UsageError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, UsageError>;

impl UsageError {
    /// Builds the error for a non-success HTTP status.
    ///
    /// 401 and 403 become [`UsageError::Unauthorized`]; everything else keeps
    /// the status and response body.
    pub fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        match status.as_u16() {
            401 | 403 => Self::Unauthorized {
                status: status.as_u16(),
            },
            code => Self::Api {
                status: code,
                message,
            },
        }
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Connection failures, timeouts, rate limiting (429) and server errors
    /// (5xx) are transient. Authentication failures, client errors and
    /// undecodable payloads are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Network(e) => {
                e.is_connect()
                    || e.is_timeout()
                    || e.is_request()
                    || e.status()
                        .is_some_and(|s| s.as_u16() == 429 || s.is_server_error())
            }
            _ => false,
        }
    }

    /// Whether the failure only costs the contribution of one work unit.
    pub fn is_unit_local(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn server_errors_and_rate_limits_are_transient() {
        for code in [429, 500, 502, 503, 504] {
            let status = StatusCode::from_u16(code).unwrap();
            let err = UsageError::from_status(status, String::new());
            assert!(err.is_transient(), "status {code} should be transient");
        }
    }

    #[test]
    fn auth_failures_are_unauthorized_and_permanent() {
        for code in [401, 403] {
            let status = StatusCode::from_u16(code).unwrap();
            let err = UsageError::from_status(status, "nope".to_string());
            assert!(matches!(err, UsageError::Unauthorized { status } if status == code));
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn not_found_is_permanent() {
        let err = UsageError::from_status(StatusCode::NOT_FOUND, "gone".to_string());
        assert!(matches!(err, UsageError::Api { status: 404, .. }));
        assert!(!err.is_transient());
        assert!(!err.is_unit_local());
    }

    #[test]
    fn only_exhausted_retries_are_unit_local() {
        let exhausted = UsageError::RetriesExhausted {
            operation: "fetch build".to_string(),
            attempts: 3,
            source: Box::new(UsageError::Api {
                status: 503,
                message: String::new(),
            }),
        };
        assert!(exhausted.is_unit_local());
        assert!(!exhausted.is_transient());
        assert!(!UsageError::Cancelled.is_unit_local());
        assert!(!UsageError::Unauthorized { status: 401 }.is_unit_local());
    }

    #[test]
    fn exhausted_message_names_operation_and_cause() {
        let err = UsageError::RetriesExhausted {
            operation: "list builds of 'app'".to_string(),
            attempts: 3,
            source: Box::new(UsageError::Api {
                status: 502,
                message: "bad gateway".to_string(),
            }),
        };
        let message = err.to_string();
        assert!(message.contains("list builds of 'app'"));
        assert!(message.contains("3 attempts"));
        assert!(message.contains("502"));
    }
}
