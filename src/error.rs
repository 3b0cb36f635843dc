use thiserror::Error;

/// Error taxonomy for the gateway. Every failure carries a kind; callers
/// branch on the variant, never on message text.
#[derive(Debug, Error)]
pub enum LitGateError {
    /// Malformed query, bad identifier, or invalid request options.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Pipeline config rejected before any step ran.
    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// Retryable upstream failure (5xx, 429, timeout, connect).
    #[error("{api}: transient failure: {message}")]
    UpstreamTransient { api: String, message: String },

    /// Upstream still failing after retry exhaustion.
    #[error("{api}: unavailable: {message}")]
    UpstreamUnavailable { api: String, message: String },

    /// Upstream answered with a payload we could not parse.
    #[error("{api}: unexpected payload: {snippet}")]
    UpstreamParse { api: String, snippet: String },

    /// A step with on_error=abort reported an error.
    #[error("Pipeline aborted at step '{step_id}': {message}")]
    PipelineAborted { step_id: String, message: String },

    /// Programming bug: an invariant that validation should have enforced.
    #[error("Internal invariant broken: {0}")]
    Invariant(String),
}

/// Error message markers that indicate a retry is worth attempting even
/// when the transport-level classification was inconclusive.
const TRANSIENT_MARKERS: &[&str] = &[
    "service unavailable",
    "rate limit",
    "backend failed",
    "temporarily unavailable",
];

impl LitGateError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::UpstreamTransient { .. } => true,
            Self::UpstreamUnavailable { message, .. } => {
                let lower = message.to_ascii_lowercase();
                TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
            }
            _ => false,
        }
    }

    /// Demote a transient error to its terminal form after retries ran out.
    pub fn into_unavailable(self) -> Self {
        match self {
            Self::UpstreamTransient { api, message } => {
                Self::UpstreamUnavailable { api, message }
            }
            other => other,
        }
    }

    pub(crate) fn from_middleware(api: &str, err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(err) => Self::from_reqwest(api, err),
            reqwest_middleware::Error::Middleware(err) => Self::UpstreamTransient {
                api: api.to_string(),
                message: err.to_string(),
            },
        }
    }

    pub(crate) fn from_reqwest(api: &str, err: reqwest::Error) -> Self {
        let message = err.to_string();
        if err.is_timeout() || err.is_connect() {
            Self::UpstreamTransient {
                api: api.to_string(),
                message,
            }
        } else {
            Self::UpstreamUnavailable {
                api: api.to_string(),
                message,
            }
        }
    }
}
