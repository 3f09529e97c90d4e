//! Graph API Error Types
//!
//! Structured error handling for drive API operations.
//! Maps HTTP status codes to specific error variants for retry decisions.

/// Drive API error types
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Access token rejected, token needs refresh")]
    AuthExpired,

    #[error("Rate limited, try again after backoff")]
    RateLimited,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Request error: {0}")]
    Request(String),
}

impl GraphError {
    /// Whether this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GraphError::RateLimited
                | GraphError::Timeout
                | GraphError::Network(_)
                | GraphError::Server(_, _)
        )
    }

    /// Create a GraphError from an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 => GraphError::AuthExpired,
            403 => GraphError::Forbidden(body.to_string()),
            404 => GraphError::NotFound(body.to_string()),
            408 => GraphError::Timeout,
            429 => GraphError::RateLimited,
            500..=599 => GraphError::Server(status, body.to_string()),
            _ => GraphError::Request(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for GraphError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GraphError::Timeout
        } else if e.is_decode() {
            GraphError::Decode(e.to_string())
        } else if e.is_connect() || e.is_request() {
            GraphError::Network(e.to_string())
        } else {
            GraphError::Request(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(GraphError::from_status(401, ""), GraphError::AuthExpired));
        assert!(matches!(GraphError::from_status(404, "gone"), GraphError::NotFound(b) if b == "gone"));
        assert!(matches!(GraphError::from_status(429, ""), GraphError::RateLimited));
        assert!(matches!(GraphError::from_status(503, "busy"), GraphError::Server(503, _)));
        assert!(matches!(GraphError::from_status(418, "teapot"), GraphError::Request(_)));
    }

    #[test]
    fn test_retryable() {
        assert!(GraphError::RateLimited.is_retryable());
        assert!(GraphError::Server(500, String::new()).is_retryable());
        assert!(GraphError::Timeout.is_retryable());
        assert!(!GraphError::AuthExpired.is_retryable());
        assert!(!GraphError::NotFound(String::new()).is_retryable());
    }
}
