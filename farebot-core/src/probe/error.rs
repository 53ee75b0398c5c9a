use thiserror::Error;

use crate::browser::SurfaceError;

pub type ProbeResult<T> = Result<T, ProbeError>;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("selection not found: {0}")]
    SelectionNotFound(String),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

impl ProbeError {
    pub fn is_session_closed(&self) -> bool {
        matches!(self, ProbeError::Surface(err) if err.is_session_closed())
    }
}
