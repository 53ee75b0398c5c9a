//! Stage orchestration. The controller walks the purchase stages in
//! order and turns checkpoints, exploration mode, operator handoffs,
//! and a closed browser into terminal run outcomes.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::flow::error::FlowResult;
use crate::model::{RunConfig, Stage};

/// How a non-payment stage left the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Advanced,
    /// The stage could not finish on its own; the operator takes over.
    Handoff(String),
}

/// How the payment stage left the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The card was submitted to the gateway.
    Submitted,
    /// A checkpoint held the flow with the card filled but not submitted.
    Held,
    Handoff(String),
}

/// Terminal state of one purchase run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every stage ran and the payment was submitted.
    Completed,
    /// The configured checkpoint was reached and the run stopped there.
    CheckpointReached(Stage),
    /// Exploration-only mode stops right after the search is submitted.
    ExplorationOnly,
    /// A stage gave up and left the session to the operator.
    ManualHandoff { stage: Stage, reason: String },
    /// The operator closed the browser mid-run.
    BrowserClosed,
}

/// The stage executor the controller drives. Implemented over a live
/// browser by [`PurchaseDriver`](crate::flow::PurchaseDriver) and by
/// scripted doubles in tests.
#[async_trait(?Send)]
pub trait StageDriver {
    async fn run_search(&mut self) -> FlowResult<StageOutcome>;
    async fn run_fare_selection(&mut self) -> FlowResult<StageOutcome>;
    async fn run_passenger_data(&mut self) -> FlowResult<StageOutcome>;
    async fn run_checkout(&mut self) -> FlowResult<StageOutcome>;
    /// `hold_before_submit` keeps the gateway from pressing the final pay
    /// button so the payment checkpoint can inspect the filled form.
    async fn run_payment(&mut self, hold_before_submit: bool) -> FlowResult<PaymentOutcome>;
    async fn pause_for_checkpoint(&mut self, stage: Stage) -> FlowResult<()>;
}

pub struct FlowController<'a, D: StageDriver> {
    driver: &'a mut D,
    config: &'a RunConfig,
}

impl<'a, D: StageDriver> FlowController<'a, D> {
    pub fn new(driver: &'a mut D, config: &'a RunConfig) -> Self {
        FlowController { driver, config }
    }

    pub async fn run(&mut self) -> FlowResult<RunOutcome> {
        for stage in Stage::ALL {
            info!(stage = %stage, "stage starting");
            match self.run_stage(stage).await {
                Ok(None) => {}
                Ok(Some(outcome)) => return Ok(outcome),
                Err(err) if err.is_session_closed() => {
                    warn!(stage = %stage, "browser closed by the operator");
                    return Ok(RunOutcome::BrowserClosed);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(RunOutcome::Completed)
    }

    /// Runs one stage. `Some(outcome)` ends the run; `None` advances to
    /// the next stage.
    async fn run_stage(&mut self, stage: Stage) -> FlowResult<Option<RunOutcome>> {
        let outcome = match stage {
            Stage::Search => {
                let outcome = self.driver.run_search().await?;
                if self.config.exploration_only && matches!(outcome, StageOutcome::Advanced) {
                    info!("exploration-only run, stopping after search");
                    return Ok(Some(RunOutcome::ExplorationOnly));
                }
                outcome
            }
            Stage::FareSelection => self.driver.run_fare_selection().await?,
            Stage::PassengerData => self.driver.run_passenger_data().await?,
            Stage::Checkout => self.driver.run_checkout().await?,
            Stage::Payment => {
                let hold = self.config.checkpoint == Some(Stage::Payment);
                return match self.driver.run_payment(hold).await? {
                    PaymentOutcome::Submitted => Ok(None),
                    PaymentOutcome::Held => {
                        Ok(Some(RunOutcome::CheckpointReached(Stage::Payment)))
                    }
                    PaymentOutcome::Handoff(reason) => Ok(Some(self.handoff(stage, reason))),
                };
            }
        };

        if let StageOutcome::Handoff(reason) = outcome {
            return Ok(Some(self.handoff(stage, reason)));
        }
        if self.config.checkpoint == Some(stage) {
            self.driver.pause_for_checkpoint(stage).await?;
            return Ok(Some(RunOutcome::CheckpointReached(stage)));
        }
        Ok(None)
    }

    fn handoff(&self, stage: Stage, reason: String) -> RunOutcome {
        warn!(stage = %stage, reason = %reason, "handing control to the operator");
        RunOutcome::ManualHandoff { stage, reason }
    }
}
