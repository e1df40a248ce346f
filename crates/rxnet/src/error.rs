//! Error types
//!
//! `AjaxError` is what a stream delivers as its terminal error. `HostError`
//! is what host implementations report back to the executors.

use crate::envelope::ErrorEnvelope;
use crate::transport::PlatformEvent;

/// Failure classification carried by every delivered error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No compatible transport (or script document) at all
    TransportUnavailable,
    /// Cross-domain requested but no capable transport
    CorsUnsupported,
    /// Transport-level failure reported by the host
    NetworkError,
    /// Cancelled before completion
    Aborted,
    /// Unsupported response type, JSON unavailable
    Configuration,
    /// JSON parse failure on a JSON-typed body
    PayloadParse,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransportUnavailable => "transport-unavailable",
            ErrorKind::CorsUnsupported => "cors-unsupported",
            ErrorKind::NetworkError => "network-error",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Configuration => "configuration",
            ErrorKind::PayloadParse => "payload-parse",
        }
    }
}

/// Request errors delivered on a stream's error channel
#[derive(Debug, thiserror::Error)]
pub enum AjaxError {
    #[error("No compatible transport: {0}")]
    TransportUnavailable(#[source] HostError),

    #[error("Cross-origin requests are not supported by this host")]
    CorsUnsupported,

    #[error("Network error (status {})", .0.status)]
    Network(ErrorEnvelope),

    #[error("Request aborted (status {})", .0.status)]
    Aborted(ErrorEnvelope),

    #[error("Transport failure: {0}")]
    Host(#[source] HostError),

    #[error("Unsupported response type `{response_type}`")]
    UnsupportedResponseType {
        response_type: String,
        #[source]
        source: HostError,
    },

    #[error("JSON is not supported in this runtime")]
    JsonUnsupported,

    #[error("Payload parse error: {0}")]
    PayloadParse(#[from] serde_json::Error),
}

impl AjaxError {
    /// Taxonomy kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AjaxError::TransportUnavailable(_) => ErrorKind::TransportUnavailable,
            AjaxError::CorsUnsupported => ErrorKind::CorsUnsupported,
            AjaxError::Network(_) | AjaxError::Host(_) => ErrorKind::NetworkError,
            AjaxError::Aborted(_) => ErrorKind::Aborted,
            AjaxError::UnsupportedResponseType { .. } | AjaxError::JsonUnsupported => {
                ErrorKind::Configuration
            }
            AjaxError::PayloadParse(_) => ErrorKind::PayloadParse,
        }
    }

    /// Status code, when the failure came from a transport or script
    pub fn status(&self) -> Option<u16> {
        self.envelope().map(|envelope| envelope.status)
    }

    /// Platform event that triggered the failure
    pub fn original_event(&self) -> Option<&PlatformEvent> {
        self.envelope().map(|envelope| &envelope.original_event)
    }

    /// Envelope for network and abort failures
    pub fn envelope(&self) -> Option<&ErrorEnvelope> {
        match self {
            AjaxError::Network(envelope) | AjaxError::Aborted(envelope) => Some(envelope),
            _ => None,
        }
    }
}

/// Errors raised by host transports and documents
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("{0} is not supported by this host")]
    Unsupported(String),

    #[error("Invalid state")]
    InvalidState,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Response type `{0}` rejected")]
    ResponseTypeRejected(String),

    #[error("Host has no script document")]
    NoDocument,

    #[error("Network error: {0}")]
    Network(String),
}
