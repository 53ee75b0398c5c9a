//! Market payment gateways. Each market checks out through its own
//! acquirer: Webpay for CL, Niubiz for PE, Mercado Pago for AR and
//! Cielo for BR. The flow hands every gateway a checkout page with the
//! itinerary priced; the gateway drives brand selection, card entry,
//! and the final submission.

mod cielo;
mod mercadopago;
mod niubiz;
mod webpay;

pub use cielo::Cielo;
pub use mercadopago::MercadoPago;
pub use niubiz::Niubiz;
pub use webpay::Webpay;

use std::slice;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::browser::{Locator, UiNode};
use crate::flow::controller::PaymentOutcome;
use crate::flow::error::FlowResult;
use crate::flow::wait_ms;
use crate::model::{CardDetails, Market, Passenger, RunConfig};
use crate::probe::{PollBudget, Probe, ProbeError};

/// One market's acquirer flow, from brand selection to card submission.
#[async_trait(?Send)]
pub trait PaymentGateway {
    /// Name used in logs and handoff messages.
    fn label(&self) -> &'static str;

    /// Runs the full gateway flow. With `hold_before_submit` the card
    /// form is filled but the final pay click is withheld for the
    /// operator.
    async fn pay(
        &self,
        ctx: &GatewayContext<'_>,
        hold_before_submit: bool,
    ) -> FlowResult<PaymentOutcome>;
}

/// Picks the gateway that serves a market's checkout.
pub fn for_market(market: Market) -> Box<dyn PaymentGateway> {
    match market {
        Market::Cl => Box::new(Webpay),
        Market::Pe => Box::new(Niubiz),
        Market::Ar => Box::new(MercadoPago),
        Market::Br => Box::new(Cielo),
    }
}

/// Everything a gateway needs from the surrounding flow.
pub struct GatewayContext<'a> {
    pub probe: Probe<'a>,
    pub config: &'a RunConfig,
    pub passengers: &'a [Passenger],
}

impl<'a> GatewayContext<'a> {
    pub fn new(probe: Probe<'a>, config: &'a RunConfig, passengers: &'a [Passenger]) -> Self {
        GatewayContext {
            probe,
            config,
            passengers,
        }
    }

    pub fn card(&self) -> &CardDetails {
        &self.config.card
    }

    pub fn lead_passenger(&self) -> Option<&Passenger> {
        self.passengers.first()
    }

    /// Suspends the session for the operator and reports the handoff.
    pub async fn hand_to_operator(&self, reason: &str) -> FlowResult<PaymentOutcome> {
        warn!(reason, "handing the payment to the operator");
        self.probe.surface().suspend_for_operator(reason).await?;
        Ok(PaymentOutcome::Handoff(reason.to_string()))
    }

    /// Holds the flow with the card form filled when the payment
    /// checkpoint is configured. Returns true when the run should stop.
    pub async fn maybe_hold(&self, hold: bool) -> FlowResult<bool> {
        if !hold {
            return Ok(false);
        }
        info!("payment checkpoint: card form filled, submission held");
        self.probe
            .surface()
            .suspend_for_operator("checkpoint payment")
            .await?;
        Ok(true)
    }

    /// Clicks the brand tile on the payment method list. The brand name
    /// shows up in nested containers; the last visible one is the tile.
    pub async fn select_payment_brand(&self, brand: &str) -> FlowResult<()> {
        let tiles = self
            .probe
            .query_tick(&Locator::within("div", [brand]))
            .await?;
        let Some(tile) = tiles.into_iter().filter(|node| node.visible()).last() else {
            return Err(
                ProbeError::ElementNotFound(format!("the {brand} payment option")).into(),
            );
        };
        if let Err(err) = tile.scroll_into_view().await {
            if err.is_session_closed() {
                return Err(err.into());
            }
            debug!(error = %err, "brand tile scroll failed");
        }
        tile.force_click().await?;
        Ok(())
    }

    /// The checkout renders its own contact block next to the gateway
    /// form. Best effort: not every build shows it.
    pub async fn prefill_contact(&self) -> FlowResult<()> {
        let Some(lead) = self.lead_passenger() else {
            return Ok(());
        };
        let fields = [
            (
                Locator::within_exact("div", ["Nombre"]),
                lead.first_name.as_str(),
            ),
            (
                Locator::within_exact("div", ["Apellido"]),
                lead.last_name.as_str(),
            ),
            (
                Locator::within("div", ["Correo electrónico"]),
                lead.email.as_str(),
            ),
        ];
        for (locator, value) in fields {
            if let Err(err) = self.prefill_field(&locator, value).await {
                if err.is_session_closed() {
                    return Err(err);
                }
                debug!(field = %locator, error = %err, "contact prefill skipped");
            }
        }
        Ok(())
    }

    async fn prefill_field(&self, locator: &Locator, value: &str) -> FlowResult<()> {
        let containers = self.probe.query_tick(locator).await?;
        let Some(container) = containers.into_iter().filter(|node| node.visible()).last() else {
            return Err(ProbeError::ElementNotFound(format!("{locator}")).into());
        };
        let inputs = self
            .probe
            .query_within_tick(container.key(), &Locator::css("input.input"))
            .await?;
        let Some(input) = inputs.into_iter().next() else {
            return Err(
                ProbeError::ElementNotFound(format!("a contact input under {locator}")).into(),
            );
        };
        input.fill(value).await?;
        Ok(())
    }

    /// Finds the acquirer's card-number input wherever its widget put it
    /// and waits for the gateway session handshake to enable it.
    pub async fn find_card_field(&self) -> FlowResult<Box<dyn UiNode>> {
        let placeholder = Locator::placeholder([
            "Número de Tarjeta",
            "Card Number",
            "Número do Cartão",
        ]);
        let Some(mut field) = self
            .probe
            .find_in_any_frame(&placeholder, 20, Duration::from_secs(2))
            .await?
        else {
            return Err(ProbeError::ElementNotFound("the card number field".into()).into());
        };

        let deadline = Instant::now() + Duration::from_secs(30);
        while !field.editable() && Instant::now() < deadline {
            wait_ms(500).await;
            if let Some(fresh) = self
                .probe
                .find_in_any_frame(&placeholder, 1, Duration::ZERO)
                .await?
            {
                field = fresh;
            }
        }
        if !field.editable() {
            return Err(
                ProbeError::ElementNotFound("an editable card number field".into()).into(),
            );
        }
        Ok(field)
    }

    /// Card number entry shared by the widget-style gateways: safety
    /// pause, pointer click, then a wholesale fill.
    pub async fn fill_card_number(&self) -> FlowResult<()> {
        let field = self.find_card_field().await?;
        info!(pause = ?self.config.safety_pause, "card field ready");
        sleep(self.config.safety_pause).await;
        field.force_click().await?;
        field.fill(&self.card().number).await?;
        Ok(())
    }

    /// Ticks the terms checkbox and presses the pay button.
    pub async fn accept_terms_and_submit(&self, label: &str) -> FlowResult<()> {
        info!(button = label, "accepting terms and submitting");
        let boxes = self.probe.query_tick(&Locator::css(".checkbox_icon")).await?;
        let Some(checkbox) = boxes.into_iter().last() else {
            return Err(ProbeError::ElementNotFound("the terms checkbox".into()).into());
        };
        if let Err(err) = checkbox.scroll_into_view().await {
            if err.is_session_closed() {
                return Err(err.into());
            }
            debug!(error = %err, "terms checkbox scroll failed");
        }
        wait_ms(500).await;
        checkbox.click().await?;

        let button = self
            .probe
            .find_visible(
                label,
                slice::from_ref(&Locator::within("button", [label])),
                PollBudget::from_millis(5_000),
            )
            .await?;
        button.click().await?;
        info!("payment submitted");
        Ok(())
    }
}
