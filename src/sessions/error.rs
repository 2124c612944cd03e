use thiserror::Error;

/// Failures surfaced by the session registry.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The id has no live handle in this process.
    #[error("session {0} is not connected")]
    NotConnected(String),

    /// The agent rejected or failed the operation.
    #[error("agent request failed: {0:#}")]
    Agent(#[source] anyhow::Error),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl SessionError {
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected(_))
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
