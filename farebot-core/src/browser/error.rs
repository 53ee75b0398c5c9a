use thiserror::Error;

pub type SurfaceResult<T> = Result<T, SurfaceError>;

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[source] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("script failure: {0}")]
    Script(String),
    #[error("frame unreachable: {0}")]
    Frame(String),
    #[error("browser session closed")]
    SessionClosed,
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl SurfaceError {
    /// The operator closing the window surfaces as transport-level chatter,
    /// not a dedicated error code. Anything that smells like a dead
    /// connection is normalized to `SessionClosed` so the flow can treat it
    /// as a graceful exit.
    pub fn is_session_closed(&self) -> bool {
        matches!(self, SurfaceError::SessionClosed)
    }
}

impl From<chromiumoxide::error::CdpError> for SurfaceError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        let text = err.to_string().to_ascii_lowercase();
        let disconnected = text.contains("closed")
            || text.contains("disconnect")
            || text.contains("reset")
            || text.contains("receiver is gone")
            || text.contains("channel");
        if disconnected {
            SurfaceError::SessionClosed
        } else {
            SurfaceError::Cdp(err)
        }
    }
}

impl From<tokio::task::JoinError> for SurfaceError {
    fn from(err: tokio::task::JoinError) -> Self {
        SurfaceError::Unexpected(err.to_string())
    }
}
