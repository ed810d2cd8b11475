//! Error types for platybridge

use thiserror::Error;

/// Result type for platybridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for platybridge
#[derive(Debug, Error)]
pub enum Error {
    /// The automation server answered with a non-empty error list
    #[error("Remote action error: {0}")]
    RemoteAction(String),

    /// Non-2xx HTTP status
    #[error("HTTP error {status} from {url}: {body}")]
    Http {
        url: String,
        status: u16,
        body: String,
    },

    /// Request could not be sent or the response could not be read
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    /// Message delivery across a context boundary failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The peer end of a channel went away before replying
    #[error("Channel '{0}' closed")]
    ChannelClosed(String),

    /// Timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A user script raised an error
    #[error("Script error: {0}")]
    Script(String),

    /// Script source that does not compile
    #[error("Invalid script: {0}")]
    InvalidScript(String),

    /// Unresolvable host/action/script reference or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persistent storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a transport error with context
    pub fn transport(context: impl Into<String>) -> Self {
        Self::Transport(context.into())
    }

    /// Create a remote action error from the first server-reported error
    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteAction(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a user-script error
    pub fn script(message: impl Into<String>) -> Self {
        Self::Script(message.into())
    }

    /// Check if this error came from crossing a context boundary
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::ChannelClosed(_) | Error::Timeout(_)
        )
    }

    /// Message suitable for a reply envelope or a user notification.
    ///
    /// Remote and script errors carry the bare message so the page sees exactly
    /// what the server or the script reported.
    pub fn reply_message(&self) -> String {
        match self {
            Error::RemoteAction(message) | Error::Script(message) => message.clone(),
            other => other.to_string(),
        }
    }
}
