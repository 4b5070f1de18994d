use std::time::Duration;

/// Machine-distinguishable failure categories reported by a remote adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Explicit flood control: the service asks us to wait this long.
    FloodWait(Duration),
    /// The account itself has been limited for spam-like behavior.
    PeerFlood,
    Timeout,
    Network,
    Forbidden,
    /// The peer's privacy settings reject the action.
    PrivacyRestricted,
    NotFound,
    BadRequest,
    Other,
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn flood_wait(wait: Duration) -> Self {
        Self::new(
            RemoteErrorKind::FloodWait(wait),
            format!("flood wait of {}s requested", wait.as_secs()),
        )
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Bytes of a downloaded media item.
#[derive(Clone, Debug)]
pub struct DownloadedMedia {
    pub bytes: Vec<u8>,
    pub file_name: Option<String>,
}
