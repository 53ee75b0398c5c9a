//! Chile — Webpay (Transbank). Brand selection and the terms click
//! happen on the checkout, then the storefront redirects to the
//! Transbank portal for card entry and to the bank authenticator for
//! RUT and password.

use std::slice;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::info;

use crate::browser::Locator;
use crate::flow::controller::PaymentOutcome;
use crate::flow::error::{FlowError, FlowResult};
use crate::flow::wait_ms;
use crate::model::{CardExtension, Stage};
use crate::probe::PollBudget;

use super::{GatewayContext, PaymentGateway};

/// Transbank's integration environment accepts this RUT/password pair
/// for any test card.
const FALLBACK_RUT: &str = "11.111.111-1";
const FALLBACK_PASSWORD: &str = "123";

fn transbank_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"transbank\.cl").expect("valid regex"))
}

fn authenticator_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("authenticator").expect("valid regex"))
}

pub struct Webpay;

#[async_trait(?Send)]
impl PaymentGateway for Webpay {
    fn label(&self) -> &'static str {
        "Webpay"
    }

    async fn pay(
        &self,
        ctx: &GatewayContext<'_>,
        hold_before_submit: bool,
    ) -> FlowResult<PaymentOutcome> {
        ctx.probe
            .find_visible(
                "the Webpay payment option",
                slice::from_ref(&Locator::text("Webpay")),
                PollBudget::from_millis(45_000),
            )
            .await?;
        ctx.select_payment_brand("Webpay").await?;

        // Card data lives on the Transbank side, so the hold happens
        // before leaving the storefront.
        if ctx.maybe_hold(hold_before_submit).await? {
            return Ok(PaymentOutcome::Held);
        }
        ctx.accept_terms_and_submit("Ir a pagar").await?;

        info!("waiting for the Transbank portal");
        if !ctx
            .probe
            .wait_for_url(transbank_pattern(), PollBudget::from_millis(30_000))
            .await?
        {
            return Err(FlowError::timeout(Stage::Payment, "the Transbank portal"));
        }
        wait_ms(2000).await;

        ctx.probe
            .click_required(
                "the card payment tab",
                &[Locator::css("button#tarjetas")],
                false,
            )
            .await?;
        wait_ms(2000).await;

        let number = ctx
            .probe
            .find_visible(
                "the card number input",
                slice::from_ref(&Locator::css("input#card-number")),
                PollBudget::from_millis(15_000),
            )
            .await?;
        number.click().await?;
        number.fill(&ctx.card().number).await?;

        // Click outside the field so the form validates the number.
        ctx.probe
            .click_any(slice::from_ref(&Locator::css("body")), false)
            .await?;
        wait_ms(1000).await;

        let expiry = ctx
            .probe
            .find_visible(
                "the expiry input",
                slice::from_ref(&Locator::css("input#card-exp")),
                PollBudget::from_millis(5_000),
            )
            .await?;
        expiry.click().await?;
        expiry
            .type_chars(&ctx.card().expiry_digits(), Duration::from_millis(80))
            .await?;

        let cvv = ctx
            .probe
            .find_visible(
                "the cvv input",
                slice::from_ref(&Locator::css("input#card-cvv")),
                PollBudget::from_millis(5_000),
            )
            .await?;
        cvv.click().await?;
        cvv.type_chars(&ctx.card().cvv, Duration::from_millis(80)).await?;

        // "Sin Cuotas" comes preselected; only the pay button is left.
        let pay = ctx
            .probe
            .find_visible(
                "the portal pay button",
                slice::from_ref(&Locator::text("Pagar")),
                PollBudget::from_millis(10_000),
            )
            .await?;
        // The button enables once the fields validate.
        wait_ms(1000).await;
        pay.click().await?;

        info!("waiting for the bank authenticator");
        if !ctx
            .probe
            .wait_for_url(authenticator_pattern(), PollBudget::from_millis(30_000))
            .await?
        {
            return Err(FlowError::timeout(Stage::Payment, "the bank authenticator"));
        }
        wait_ms(1000).await;

        let (rut, password) = match &ctx.card().extension {
            CardExtension::Webpay { rut, password } => (rut.as_str(), password.as_str()),
            _ => (FALLBACK_RUT, FALLBACK_PASSWORD),
        };
        ctx.probe
            .fill_any(
                "the RUT field",
                slice::from_ref(&Locator::css("input#rutClient")),
                rut,
                true,
            )
            .await?;
        ctx.probe
            .fill_any(
                "the card password field",
                slice::from_ref(&Locator::css("input#passwordClient")),
                password,
                true,
            )
            .await?;
        ctx.probe
            .click_required(
                "the authenticator accept button",
                &[Locator::css("input[type=\"submit\"][value=\"Aceptar\"]")],
                false,
            )
            .await?;

        // Confirmation screen. The approve option (TSY) is preselected;
        // setting it again keeps the flow deterministic.
        wait_ms(3000).await;
        ctx.probe
            .fill_any(
                "the confirmation choice",
                slice::from_ref(&Locator::css("select#vci")),
                "TSY",
                false,
            )
            .await?;
        ctx.probe
            .click_required(
                "the authenticator continue button",
                &[Locator::css("input[type=\"submit\"][value=\"Continuar\"]")],
                false,
            )
            .await?;

        info!("Transbank flow completed, returning to the storefront");
        Ok(PaymentOutcome::Submitted)
    }
}
