//! Brasil — Cielo. Same inline-widget shape as Niubiz but with the cvv
//! ahead of the expiry in the tab order, plus an optional card-kind
//! toggle and a 3DS challenge code after submission.

use std::slice;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::browser::Locator;
use crate::flow::controller::PaymentOutcome;
use crate::flow::error::FlowResult;
use crate::flow::wait_ms;
use crate::model::CardExtension;
use crate::probe::PollBudget;

use super::{GatewayContext, PaymentGateway};

pub struct Cielo;

#[async_trait(?Send)]
impl PaymentGateway for Cielo {
    fn label(&self) -> &'static str {
        "Cielo"
    }

    async fn pay(
        &self,
        ctx: &GatewayContext<'_>,
        hold_before_submit: bool,
    ) -> FlowResult<PaymentOutcome> {
        ctx.probe
            .find_visible(
                "the Cielo payment option",
                slice::from_ref(&Locator::text("Cielo")),
                PollBudget::from_millis(45_000),
            )
            .await?;
        ctx.select_payment_brand("Cielo").await?;

        // Widget animation.
        wait_ms(5000).await;
        ctx.prefill_contact().await?;
        ctx.fill_card_number().await?;

        // Tab order here puts the cvv before the expiry.
        let surface = ctx.probe.surface();
        surface.press_key("Tab").await?;
        surface
            .type_text(&ctx.card().cvv, Duration::from_millis(100))
            .await?;
        surface.press_key("Tab").await?;
        surface
            .type_text(&ctx.card().expiry_digits(), Duration::from_millis(100))
            .await?;

        let (card_kind, challenge_code) = match &ctx.card().extension {
            CardExtension::Cielo {
                card_kind,
                challenge_code,
            } => (card_kind.as_deref(), challenge_code.as_deref()),
            _ => (None, None),
        };

        // Crédito/Débito toggle, only on some card products.
        if let Some(kind) = card_kind {
            match ctx.probe.click_text(kind, false).await {
                Ok(true) => {}
                Ok(false) => warn!(kind, "card kind option not found"),
                Err(err) if err.is_session_closed() => return Err(err.into()),
                Err(err) => warn!(kind, error = %err, "card kind selection failed"),
            }
        }

        if ctx.maybe_hold(hold_before_submit).await? {
            return Ok(PaymentOutcome::Held);
        }
        ctx.accept_terms_and_submit("Pagar").await?;

        if let Some(code) = challenge_code {
            self.answer_challenge(ctx, code).await?;
        }
        Ok(PaymentOutcome::Submitted)
    }
}

impl Cielo {
    /// 3DS challenge after submission. Best effort: the issuer decides
    /// whether the challenge shows up at all.
    async fn answer_challenge(&self, ctx: &GatewayContext<'_>, code: &str) -> FlowResult<()> {
        info!("answering the 3DS challenge");
        wait_ms(3000).await;

        let field = Locator::css(
            "input[name*=\"code\"], input[placeholder*=\"ódigo\"], input[type=\"password\"]",
        );
        let submit = Locator::css("button[type=\"submit\"], input[type=\"submit\"]");

        match ctx.probe.try_find_visible(slice::from_ref(&field)).await {
            Ok(Some(input)) => {
                if let Err(err) = input.fill(code).await {
                    if err.is_session_closed() {
                        return Err(err.into());
                    }
                    warn!(error = %err, "challenge code fill failed");
                    return Ok(());
                }
            }
            Ok(None) => {
                warn!("challenge code field not found");
                return Ok(());
            }
            Err(err) if err.is_session_closed() => return Err(err.into()),
            Err(err) => {
                warn!(error = %err, "challenge code lookup failed");
                return Ok(());
            }
        }

        match ctx.probe.click_any(slice::from_ref(&submit), false).await {
            Ok(true) => info!("challenge code submitted"),
            Ok(false) => warn!("challenge submit button not found"),
            Err(err) if err.is_session_closed() => return Err(err.into()),
            Err(err) => warn!(error = %err, "challenge submit failed"),
        }
        Ok(())
    }
}
