use thiserror::Error;

use crate::browser::SurfaceError;
use crate::model::{Market, Stage};
use crate::probe::ProbeError;

/// Failures raised while driving the purchase flow.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("stage {stage} timed out waiting for {what}")]
    StageTimeout { stage: Stage, what: String },

    #[error("{market} payment gateway failed")]
    Gateway {
        market: Market,
        #[source]
        source: Box<FlowError>,
    },
}

impl FlowError {
    pub fn timeout(stage: Stage, what: impl Into<String>) -> Self {
        FlowError::StageTimeout {
            stage,
            what: what.into(),
        }
    }

    pub fn gateway(market: Market, source: FlowError) -> Self {
        FlowError::Gateway {
            market,
            source: Box::new(source),
        }
    }

    /// Whether the underlying cause is the browser going away, which ends
    /// the run cleanly instead of as a failure.
    pub fn is_session_closed(&self) -> bool {
        match self {
            FlowError::Probe(err) => err.is_session_closed(),
            FlowError::StageTimeout { .. } => false,
            FlowError::Gateway { source, .. } => source.is_session_closed(),
        }
    }
}

impl From<SurfaceError> for FlowError {
    fn from(err: SurfaceError) -> Self {
        FlowError::Probe(ProbeError::Surface(err))
    }
}

pub type FlowResult<T> = Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_error_names_the_market() {
        let inner = FlowError::Probe(ProbeError::ElementNotFound("card number field".into()));
        let err = FlowError::gateway(Market::Pe, inner);
        assert_eq!(err.to_string(), "PE payment gateway failed");
        assert!(!err.is_session_closed());
    }

    #[test]
    fn session_closed_is_detected_through_wrapping() {
        let inner = FlowError::Probe(ProbeError::Surface(SurfaceError::SessionClosed));
        let err = FlowError::gateway(Market::Ar, inner);
        assert!(err.is_session_closed());
    }

    #[test]
    fn stage_timeout_mentions_stage_and_condition() {
        let err = FlowError::timeout(Stage::Payment, "the Transbank portal");
        assert_eq!(
            err.to_string(),
            "stage payment timed out waiting for the Transbank portal"
        );
    }
}
