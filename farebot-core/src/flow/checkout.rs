//! Checkout stage: pick the receipt contact, push past the summary
//! screens, and confirm the checkout URL before payment starts.

use std::slice;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::browser::Locator;
use crate::diagnostics::DiagnosticRecorder;
use crate::flow::controller::StageOutcome;
use crate::flow::error::FlowResult;
use crate::flow::wait_ms;
use crate::model::Passenger;
use crate::probe::{PollBudget, Probe};

const CONTACT_HEADING: &str = "Contacto para recibir el comprobante";
const CONTACT_BANNER: &str = "Indica quién será el contacto que recibirá el comprobante.";

fn checkout_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(".*checkout").expect("valid regex"))
}

pub struct CheckoutStage<'a> {
    probe: Probe<'a>,
    passengers: &'a [Passenger],
    recorder: &'a DiagnosticRecorder<'a>,
}

impl<'a> CheckoutStage<'a> {
    pub fn new(
        probe: Probe<'a>,
        passengers: &'a [Passenger],
        recorder: &'a DiagnosticRecorder<'a>,
    ) -> Self {
        CheckoutStage {
            probe,
            passengers,
            recorder,
        }
    }

    pub async fn run(&self) -> FlowResult<StageOutcome> {
        if !self.advance_to_checkout(Duration::from_secs(90)).await? {
            self.recorder.snapshot("post_confirmation").await;
            warn!("could not reach checkout automatically");
            return Ok(StageOutcome::Handoff(
                "the storefront would not advance to checkout".into(),
            ));
        }
        self.recorder.snapshot("post_confirmation").await;

        info!("checkout reached");
        self.recorder.snapshot("checkout").await;

        if !self
            .probe
            .wait_for_url(checkout_pattern(), PollBudget::from_millis(30_000))
            .await?
        {
            warn!("the checkout url did not settle within 30s");
            return Ok(StageOutcome::Handoff("the checkout page did not load".into()));
        }
        Ok(StageOutcome::Advanced)
    }

    /// Keeps pressing the continue buttons until the URL flips to checkout.
    /// Some builds interleave the receipt-contact block here, so it is
    /// retried on every pass.
    async fn advance_to_checkout(&self, timeout: Duration) -> FlowResult<bool> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.probe.url_contains("checkout").await? {
                return Ok(true);
            }

            self.fill_receipt_contact().await?;

            self.probe
                .click_any(
                    &[
                        Locator::within("button", ["Siguiente"]),
                        Locator::within("button", ["Ir al pago"]),
                    ],
                    true,
                )
                .await?;
            wait_ms(400).await;

            self.probe
                .click_any(
                    &[
                        Locator::within("button", ["Proceder al pago"]),
                        Locator::within("button", ["Proceed to payment"]),
                        Locator::within("button", ["Ir al pago"]),
                    ],
                    true,
                )
                .await?;
            wait_ms(1200).await;
        }

        self.recorder.html_debug("checkout_blocked").await;
        Ok(false)
    }

    /// The receipt-contact block demands a contact picked from a dropdown
    /// before the summary can advance. Returns true once its validation
    /// banner is gone (or the block never rendered).
    async fn fill_receipt_contact(&self) -> FlowResult<bool> {
        let section = Locator::text_contains(CONTACT_HEADING);
        let Some(section_node) = self.probe.try_find_visible(slice::from_ref(&section)).await?
        else {
            return Ok(true);
        };
        let Some(lead) = self.passengers.first() else {
            return Ok(true);
        };

        let banner = Locator::text_contains(CONTACT_BANNER);
        let heading = Locator::within("h3", [CONTACT_HEADING]);
        let dropdown = Locator::css(
            "[data-test=\"is-thirdStep-dropdownReservationName\"] .textfield_input",
        );
        let candidates: Vec<String> = [lead.full_name(), lead.first_name.clone()]
            .into_iter()
            .filter(|value| !value.trim().is_empty())
            .collect();

        for _ in 0..5 {
            if self.probe.try_find_visible(slice::from_ref(&banner)).await?.is_none() {
                return Ok(true);
            }

            if let Err(err) = section_node.scroll_into_view().await {
                if err.is_session_closed() {
                    return Err(err.into());
                }
                debug!(error = %err, "contact section scroll failed");
            }

            // The block collapses after passenger edits; the heading toggles it.
            if self
                .probe
                .try_find_visible(slice::from_ref(&dropdown))
                .await?
                .is_none()
            {
                self.probe.click_any(slice::from_ref(&heading), true).await?;
                wait_ms(200).await;
            }

            if !self.probe.click_any(slice::from_ref(&dropdown), true).await? {
                wait_ms(250).await;
                continue;
            }
            wait_ms(180).await;

            // First try keyboard selection over the open dropdown.
            self.probe.surface().press_key("ArrowDown").await?;
            self.probe.surface().press_key("Enter").await?;
            wait_ms(220).await;

            // Then click the contact name directly if the banner survived.
            if self
                .probe
                .try_find_visible(slice::from_ref(&banner))
                .await?
                .is_some()
            {
                for candidate in &candidates {
                    if self.probe.click_last_text(candidate, true, true).await? {
                        wait_ms(200).await;
                        break;
                    }
                }
            }

            self.probe
                .fill_any(
                    "the receipt email field",
                    &[Locator::css(
                        "[data-test=\"is-reservationManagerForm-textFieldEmail\"] input",
                    )],
                    &lead.email,
                    false,
                )
                .await?;
            self.probe
                .fill_any(
                    "the receipt phone field",
                    &[Locator::css(
                        "[data-test=\"is-reservationManagerForm-textFieldPhoneNumber\"] input",
                    )],
                    &lead.phone,
                    false,
                )
                .await?;
            self.probe
                .fill_any(
                    "the receipt phone prefix field",
                    &[Locator::css(
                        "[data-test=\"is-reservationManagerForm-textFieldPrefixPhoneNumber\"] input",
                    )],
                    &lead.phone_prefix,
                    false,
                )
                .await?;

            // Blur the block so its validation re-runs.
            self.probe.click_any(slice::from_ref(&heading), true).await?;
            wait_ms(250).await;
        }

        Ok(self
            .probe
            .try_find_visible(slice::from_ref(&banner))
            .await?
            .is_none())
    }
}
