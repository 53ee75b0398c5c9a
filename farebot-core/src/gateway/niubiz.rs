//! Perú — Niubiz. The widget renders inline on the checkout; after the
//! card number is filled, the remaining fields are reached through the
//! widget's keyboard tab order.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::browser::Locator;
use crate::flow::controller::PaymentOutcome;
use crate::flow::error::FlowResult;
use crate::flow::wait_ms;
use crate::probe::PollBudget;

use super::{GatewayContext, PaymentGateway};

pub struct Niubiz;

#[async_trait(?Send)]
impl PaymentGateway for Niubiz {
    fn label(&self) -> &'static str {
        "Niubiz"
    }

    async fn pay(
        &self,
        ctx: &GatewayContext<'_>,
        hold_before_submit: bool,
    ) -> FlowResult<PaymentOutcome> {
        if !ctx
            .probe
            .wait_visible(&[Locator::text("Niubiz")], PollBudget::from_millis(45_000))
            .await?
        {
            warn!("the Niubiz option never appeared on the checkout");
            return ctx
                .hand_to_operator("the Niubiz payment option did not appear")
                .await;
        }
        ctx.select_payment_brand("Niubiz").await?;

        // Widget animation.
        wait_ms(5000).await;
        ctx.prefill_contact().await?;
        ctx.fill_card_number().await?;

        // Tab order inside the widget: number, holder first name, holder
        // last name, expiry, cvv.
        let surface = ctx.probe.surface();
        surface.press_key("Tab").await?;
        surface.press_key("Tab").await?;
        surface.press_key("Tab").await?;
        surface
            .type_text(&ctx.card().expiry_digits(), Duration::from_millis(100))
            .await?;
        surface.press_key("Tab").await?;
        surface
            .type_text(&ctx.card().cvv, Duration::from_millis(100))
            .await?;

        if ctx.maybe_hold(hold_before_submit).await? {
            return Ok(PaymentOutcome::Held);
        }
        ctx.accept_terms_and_submit("Ir a pagar").await?;
        Ok(PaymentOutcome::Submitted)
    }
}
