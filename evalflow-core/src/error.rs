//! Error types for evalflow operations

/// Result type for evalflow operations
pub type Result<T> = std::result::Result<T, EvalFlowError>;

/// Error types for the evaluation harness
#[derive(Debug, thiserror::Error)]
pub enum EvalFlowError {
    /// Named prompt template is not registered and not on disk
    #[error("Prompt template not found: {0}")]
    TemplateNotFound(String),

    /// Model provider call failed
    ///
    /// The gateway converts these into degraded responses, so they only
    /// surface when a provider is used directly. `status` is the HTTP status
    /// when the provider answered; `None` for transport and decoding errors.
    #[error("Gateway error: {message}")]
    Gateway {
        message: String,
        status: Option<u16>,
    },

    /// A degraded response was rejected by the scoring policy
    #[error("Degraded model response: {reason}")]
    DegradedResponse { reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Reference dataset could not be loaded
    #[error("Reference data error: {0}")]
    Reference(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A pipeline step panicked
    #[error("Step panicked: {0}")]
    Panicked(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl EvalFlowError {
    /// Gateway error without an HTTP status
    pub fn gateway(message: impl Into<String>) -> Self {
        EvalFlowError::Gateway {
            message: message.into(),
            status: None,
        }
    }

    /// Gateway error carrying the HTTP status of the response
    pub fn gateway_status(status: u16, message: impl Into<String>) -> Self {
        EvalFlowError::Gateway {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Whether a retry may succeed.
    ///
    /// Gateway errors with a status are transient only when the status is in
    /// `retryable_statuses`; transport errors always are. Nothing else is.
    pub fn is_transient(&self, retryable_statuses: &[u16]) -> bool {
        match self {
            EvalFlowError::Gateway {
                status: Some(status),
                ..
            } => retryable_statuses.contains(status),
            EvalFlowError::Gateway { status: None, .. } => true,
            _ => false,
        }
    }
}

impl From<String> for EvalFlowError {
    fn from(s: String) -> Self {
        EvalFlowError::Other(s)
    }
}

impl From<&str> for EvalFlowError {
    fn from(s: &str) -> Self {
        EvalFlowError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for EvalFlowError {
    fn from(err: anyhow::Error) -> Self {
        EvalFlowError::Other(err.to_string())
    }
}
