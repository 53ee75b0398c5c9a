//! Live-browser stage driver. Builds each stage over a [`UiSurface`]
//! and owns the payment failure path: evidence screenshot, operator
//! suspend, handoff.

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{error, info};

use crate::browser::UiSurface;
use crate::diagnostics::{DiagnosticRecorder, DiagnosticSink};
use crate::flow::checkout::CheckoutStage;
use crate::flow::controller::{PaymentOutcome, StageDriver, StageOutcome};
use crate::flow::error::{FlowError, FlowResult};
use crate::flow::fares::FareStage;
use crate::flow::passengers::PassengerStage;
use crate::flow::search::SearchStage;
use crate::gateway::{self, GatewayContext};
use crate::model::{Passenger, RunConfig, Stage};
use crate::probe::Probe;

pub struct PurchaseDriver<'a> {
    surface: &'a dyn UiSurface,
    config: &'a RunConfig,
    passengers: &'a [Passenger],
    recorder: DiagnosticRecorder<'a>,
}

impl<'a> PurchaseDriver<'a> {
    pub fn new(
        surface: &'a dyn UiSurface,
        config: &'a RunConfig,
        passengers: &'a [Passenger],
        sink: Option<&'a dyn DiagnosticSink>,
    ) -> Self {
        let recorder = DiagnosticRecorder::new(surface, sink, config.exploration);
        PurchaseDriver {
            surface,
            config,
            passengers,
            recorder,
        }
    }

    fn probe(&self) -> Probe<'a> {
        Probe::new(self.surface).with_action_delay(self.config.action_delay)
    }

    /// Rides out the gateway redirects, then captures the full-page
    /// proof of purchase.
    async fn await_confirmation(&self) {
        info!(
            cooldown = ?self.config.success_cooldown,
            "payment submitted, waiting before the final capture"
        );
        sleep(self.config.success_cooldown).await;
        self.recorder.screenshot("purchase_confirmed", true).await;
    }
}

#[async_trait(?Send)]
impl StageDriver for PurchaseDriver<'_> {
    async fn run_search(&mut self) -> FlowResult<StageOutcome> {
        SearchStage::new(self.probe(), self.config, &self.recorder)
            .run()
            .await?;
        self.recorder.snapshot("search_submitted").await;
        Ok(StageOutcome::Advanced)
    }

    async fn run_fare_selection(&mut self) -> FlowResult<StageOutcome> {
        FareStage::new(self.probe(), self.config, &self.recorder)
            .run()
            .await?;
        Ok(StageOutcome::Advanced)
    }

    async fn run_passenger_data(&mut self) -> FlowResult<StageOutcome> {
        PassengerStage::new(self.probe(), self.passengers).run().await?;
        self.recorder.snapshot("passengers_completed").await;
        Ok(StageOutcome::Advanced)
    }

    async fn run_checkout(&mut self) -> FlowResult<StageOutcome> {
        CheckoutStage::new(self.probe(), self.passengers, &self.recorder)
            .run()
            .await
    }

    async fn run_payment(&mut self, hold_before_submit: bool) -> FlowResult<PaymentOutcome> {
        let gateway = gateway::for_market(self.config.market);
        info!(
            market = %self.config.market,
            gateway = gateway.label(),
            "starting payment"
        );
        let ctx = GatewayContext::new(self.probe(), self.config, self.passengers);
        match gateway.pay(&ctx, hold_before_submit).await {
            Ok(PaymentOutcome::Submitted) => {
                self.await_confirmation().await;
                Ok(PaymentOutcome::Submitted)
            }
            Ok(outcome) => Ok(outcome),
            Err(err) if err.is_session_closed() => Err(err),
            Err(err) => {
                let err = FlowError::gateway(self.config.market, err);
                error!(error = %err, "payment flow failed");
                self.recorder.screenshot("payment_error", false).await;
                self.surface.suspend_for_operator("payment failed").await?;
                Ok(PaymentOutcome::Handoff(err.to_string()))
            }
        }
    }

    async fn pause_for_checkpoint(&mut self, stage: Stage) -> FlowResult<()> {
        info!(stage = %stage, "checkpoint reached, suspending for the operator");
        self.surface
            .suspend_for_operator(&format!("checkpoint {stage}"))
            .await?;
        Ok(())
    }
}
