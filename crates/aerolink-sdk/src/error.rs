//! SDK error types.

use crate::msglist::ThreadId;

/// Error type for all SDK operations.
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    /// Invalid or missing configuration (e.g. bad address, missing CA file).
    #[error("configuration error: {0}")]
    Config(String),

    /// TLS setup or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message failed model validation or encoding.
    #[error(transparent)]
    Model(#[from] aerolink_models::ModelError),

    /// The given thread id does not name a live thread.
    #[error("unknown message thread {id}")]
    UnknownThread {
        /// The id that failed to resolve.
        id: ThreadId,
    },

    /// An operation required a non-final thread but the thread has reached
    /// a final status.
    #[error("message thread {id} is in a final status")]
    ThreadFinal {
        /// The thread in question.
        id: ThreadId,
    },

    /// A per-thread message index was out of range.
    #[error("message index {index} out of range (thread holds {count})")]
    MessageIndex {
        /// The requested index.
        index: usize,
        /// Number of messages in the thread.
        count: usize,
    },
}

impl From<rustls::Error> for SdkError {
    fn from(e: rustls::Error) -> Self {
        SdkError::Tls(e.to_string())
    }
}
