//! Argentina — Mercado Pago. Card number, expiry, and cvv live in
//! cross-origin secure-fields iframes that page scripts cannot reach.
//! A pointer click on the iframe focuses the input inside it, and
//! page-level typing is routed to the focused frame by the browser.
//! The remaining fields are regular storefront inputs.

use std::slice;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::browser::Locator;
use crate::flow::controller::PaymentOutcome;
use crate::flow::error::FlowResult;
use crate::flow::wait_ms;
use crate::model::CardExtension;
use crate::probe::{PollBudget, ProbeError};

use super::{GatewayContext, PaymentGateway};

/// Sandbox holder name that makes Mercado Pago approve the charge.
const DEFAULT_HOLDER: &str = "APRO";

pub struct MercadoPago;

#[async_trait(?Send)]
impl PaymentGateway for MercadoPago {
    fn label(&self) -> &'static str {
        "Mercado Pago"
    }

    async fn pay(
        &self,
        ctx: &GatewayContext<'_>,
        hold_before_submit: bool,
    ) -> FlowResult<PaymentOutcome> {
        let container = ctx
            .probe
            .find_visible(
                "the Mercado Pago payment option",
                slice::from_ref(&Locator::css(
                    "[data-test=\"IS-paymentMethodList-cardFop-mercado-pago\"]",
                )),
                PollBudget::from_millis(45_000),
            )
            .await?;
        let radios = ctx
            .probe
            .query_within_tick(
                container.key(),
                &Locator::css("[data-test=\"IS-cardFop-radioButton\"]"),
            )
            .await?;
        let Some(radio) = radios.into_iter().next() else {
            return Err(
                ProbeError::ElementNotFound("the Mercado Pago radio button".into()).into(),
            );
        };
        radio.click().await?;

        info!("waiting for the Mercado Pago form");
        wait_ms(5000).await;
        ctx.prefill_contact().await?;

        let card = ctx.card();
        let (doc_type, doc_number, email_override, installments) = match &card.extension {
            CardExtension::MercadoPago {
                document_type,
                document_number,
                email,
                installments_label,
            } => (
                document_type.as_str(),
                document_number.as_str(),
                email.as_deref(),
                installments_label.as_str(),
            ),
            _ => ("DNI", "", None, "1 cuota"),
        };

        self.type_secure_field(ctx, "cardNumber", &card.number).await?;
        wait_ms(1000).await;

        let holder = card.holder.as_deref().unwrap_or(DEFAULT_HOLDER);
        self.fill_form_input(
            ctx,
            "the cardholder field",
            "[data-test=\"IS-mercadoPagoForm-inputCardHolderName\"] input.input",
            holder,
        )
        .await?;
        wait_ms(500).await;

        // Expiry keeps its slash (MM/YY); the secure field expects it.
        self.type_secure_field(ctx, "expirationDate", &card.expiry).await?;
        wait_ms(500).await;
        self.type_secure_field(ctx, "securityCode", &card.cvv).await?;
        wait_ms(1000).await;

        info!(installments, "selecting installments");
        ctx.probe
            .click_required(
                "the installments dropdown",
                &[Locator::css(
                    "[data-test=\"IS-mercadoPagoForm-selectInstallment\"] .textfield_input",
                )],
                false,
            )
            .await?;
        wait_ms(1000).await;
        if !ctx.probe.click_text(installments, false).await? {
            return Err(ProbeError::SelectionNotFound(format!(
                "the \"{installments}\" installments option"
            ))
            .into());
        }
        wait_ms(500).await;

        ctx.probe
            .click_required(
                "the document type dropdown",
                &[Locator::css(
                    "[data-test=\"IS-mercadoPagoForm-selectDocType\"] .textfield_input",
                )],
                false,
            )
            .await?;
        wait_ms(500).await;
        if !ctx.probe.click_text(doc_type, true).await? {
            return Err(ProbeError::SelectionNotFound(format!(
                "the {doc_type} document type"
            ))
            .into());
        }
        wait_ms(500).await;

        self.fill_form_input(
            ctx,
            "the document number field",
            "[data-test=\"IS-mercadoPagoForm-inputDocNumber\"] input.input",
            doc_number,
        )
        .await?;

        let lead_email = ctx
            .lead_passenger()
            .map(|passenger| passenger.email.as_str())
            .unwrap_or_default();
        let email = email_override.unwrap_or(lead_email);
        self.fill_form_input(
            ctx,
            "the payer email field",
            "[data-test=\"IS-mercadoPagoForm-inputEmail\"] input.input",
            email,
        )
        .await?;

        if ctx.maybe_hold(hold_before_submit).await? {
            return Ok(PaymentOutcome::Held);
        }
        ctx.accept_terms_and_submit("Pagar").await?;
        Ok(PaymentOutcome::Submitted)
    }
}

impl MercadoPago {
    async fn type_secure_field(
        &self,
        ctx: &GatewayContext<'_>,
        name: &str,
        value: &str,
    ) -> FlowResult<()> {
        let locator = Locator::css(format!("iframe[name=\"{name}\"]"));
        let mut frame_element = None;
        for attempt in 0..15u32 {
            if let Some(node) = ctx.probe.try_find_visible(slice::from_ref(&locator)).await? {
                frame_element = Some(node);
                break;
            }
            if attempt % 5 == 0 {
                debug!(field = name, attempt = attempt + 1, "waiting for secure field");
            }
            wait_ms(1000).await;
        }
        let Some(frame_element) = frame_element else {
            return Err(ProbeError::ElementNotFound(format!("the {name} secure field")).into());
        };

        frame_element.force_click().await?;
        wait_ms(200).await;
        ctx.probe
            .surface()
            .type_text(value, Duration::from_millis(50))
            .await?;
        Ok(())
    }

    async fn fill_form_input(
        &self,
        ctx: &GatewayContext<'_>,
        what: &str,
        css: &str,
        value: &str,
    ) -> FlowResult<()> {
        let input = ctx
            .probe
            .find_visible(
                what,
                slice::from_ref(&Locator::css(css)),
                PollBudget::from_millis(5_000),
            )
            .await?;
        input.click().await?;
        input.fill(value).await?;
        Ok(())
    }
}
