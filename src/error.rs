//! Error types for the content store and its remote adapters.
//!
//! Nothing here is process-fatal. Read failures degrade to stale state,
//! write failures leave local state untouched, and image failures abort the
//! write they belong to.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Connection-level failure talking to the hosted service
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with a non-success status
    #[error("service responded {status}: {message}")]
    Service { status: u16, message: String },

    /// A row or frame could not be (de)serialized
    #[error("malformed data: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no row with id {id} in {table}")]
    NotFound { table: String, id: String },

    /// The inline image payload is not a base64 data URI
    #[error("invalid inline image: {0}")]
    InlineImage(String),

    #[error("image processing failed: {0}")]
    ImageCodec(#[from] image::ImageError),

    #[error("upload of {path} failed: {reason}")]
    Upload { path: String, reason: String },

    #[error("realtime channel error: {0}")]
    Realtime(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Coarse grouping of failures, used for logging and for deciding how the
/// store degrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection failures, dropped sockets
    Network,

    /// The service rejected the request
    Service,

    /// Rows that don't match the expected shape
    Data,

    /// Inline payload decoding, recompression or upload
    Image,

    Configuration,
}

impl SyncError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::Transport(_) | SyncError::WebSocket(_) | SyncError::Realtime(_) => {
                ErrorCategory::Network
            }
            SyncError::Service { .. } | SyncError::NotFound { .. } | SyncError::Task(_) => {
                ErrorCategory::Service
            }
            SyncError::Decode(_) => ErrorCategory::Data,
            SyncError::InlineImage(_) | SyncError::ImageCodec(_) | SyncError::Upload { .. } => {
                ErrorCategory::Image
            }
            SyncError::Config(_) | SyncError::UnknownCollection(_) => ErrorCategory::Configuration,
        }
    }

    /// Image failures abort the enclosing write before anything is persisted.
    pub fn is_image_failure(&self) -> bool {
        self.category() == ErrorCategory::Image
    }

    pub(crate) fn upload(path: impl Into<String>, reason: impl ToString) -> Self {
        SyncError::Upload {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
