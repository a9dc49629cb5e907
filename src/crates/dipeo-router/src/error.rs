//! Error type for connection registration, subscription lookup, and delivery.

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("connection {0} is not registered")]
    UnknownConnection(String),
    #[error("subscription {0} is not registered")]
    UnknownSubscription(String),
    #[error("delivery to connection {0} timed out")]
    SendTimeout(String),
    #[error("delivery to connection {0} failed: {1}")]
    SendFailed(String, String),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}
