//! Error types for the publication client.

use thiserror::Error;

/// Main error type for client operations.
///
/// Cloneable so a single `nosub` failure can settle every pending
/// readiness future of a subscription.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ClientError {
    /// The provider refused or terminated a subscription (`nosub`).
    #[error("Publication `{publication}` failed: {message}")]
    Publication { publication: String, message: String },

    #[error("Subscription to `{publication}` is already stopped")]
    SubscriptionStopped { publication: String },

    /// Internal start logic ran on a subscription that was never reset.
    #[error("Subscription {id} is already started")]
    AlreadyStarted { id: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Client is disconnected")]
    Disconnected,
}

impl ClientError {
    /// Name of the publication this error belongs to, if any.
    pub fn publication(&self) -> Option<&str> {
        match self {
            ClientError::Publication { publication, .. }
            | ClientError::SubscriptionStopped { publication } => Some(publication),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Serialization(e.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
