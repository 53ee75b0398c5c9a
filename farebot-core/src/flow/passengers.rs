//! Passenger data stage: one storefront card per traveller, each opened,
//! filled, and saved before the flow moves toward checkout.

use std::slice;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::browser::{Locator, UiNode};
use crate::flow::error::{FlowError, FlowResult};
use crate::flow::fares::skip_upsell_screens;
use crate::flow::wait_ms;
use crate::model::{Passenger, Stage};
use crate::probe::{PollBudget, Probe, ProbeError};

fn passenger_page_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(".*passenger-detail").expect("valid regex"))
}

fn save_buttons() -> [Locator; 2] {
    [
        Locator::css("[data-test=\"is-passengerForm-saveButton\"]"),
        Locator::within("button", ["Guardar datos"]),
    ]
}

pub struct PassengerStage<'a> {
    probe: Probe<'a>,
    passengers: &'a [Passenger],
}

impl<'a> PassengerStage<'a> {
    pub fn new(probe: Probe<'a>, passengers: &'a [Passenger]) -> Self {
        PassengerStage { probe, passengers }
    }

    pub async fn run(&self) -> FlowResult<()> {
        info!(count = self.passengers.len(), "filling passenger data");
        self.wait_for_forms_or_checkout(Duration::from_secs(60)).await?;
        if self.probe.url_contains("checkout").await? {
            warn!("flow is already at checkout, skipping passenger forms");
            return Ok(());
        }
        if !self
            .probe
            .wait_for_url(passenger_page_pattern(), PollBudget::from_millis(20_000))
            .await?
        {
            return Err(FlowError::timeout(
                Stage::PassengerData,
                "the passenger detail page",
            ));
        }
        wait_ms(1500).await;

        let total = self.passengers.len();
        for (index, passenger) in self.passengers.iter().enumerate() {
            self.fill_passenger(passenger, index + 1, total).await?;
        }
        self.force_save_all().await?;

        info!("advancing from the passenger page");
        self.probe
            .click_any(
                &[
                    Locator::within("button", ["Siguiente"]),
                    Locator::within("button", ["Ir al pago"]),
                ],
                true,
            )
            .await?;
        Ok(())
    }

    /// The extras screens sometimes wedge between fares and passengers;
    /// keep skipping them until one of the target pages loads.
    async fn wait_for_forms_or_checkout(&self, timeout: Duration) -> FlowResult<()> {
        let start = Instant::now();
        let mut url = String::new();
        while start.elapsed() < timeout {
            url = self.probe.surface().current_url().await?;
            if url.contains("passenger-detail") || url.contains("checkout") {
                return Ok(());
            }
            skip_upsell_screens(&self.probe).await?;
            wait_ms(1200).await;
        }
        Err(FlowError::timeout(
            Stage::PassengerData,
            format!("the passenger or checkout page (stuck at {url})"),
        ))
    }

    async fn fill_passenger(
        &self,
        passenger: &Passenger,
        index: usize,
        total: usize,
    ) -> FlowResult<()> {
        info!(
            index,
            total,
            category = passenger.category.code(),
            "passenger form"
        );
        self.open_passenger_card(passenger, index).await?;
        wait_ms(800).await;

        self.probe
            .fill_any(
                "the first name field",
                &[
                    Locator::css("[data-test=\"is-passengerForm-textFieldNamePax\"] input"),
                    Locator::css("[data-test=\"is-passengerForm-textFieldName\"] input"),
                ],
                &passenger.first_name,
                true,
            )
            .await?;
        self.probe
            .fill_any(
                "the last name field",
                &[Locator::css("[data-test=\"is-passengerForm-textFieldLastname\"] input")],
                &passenger.last_name,
                true,
            )
            .await?;
        self.fill_birth_date(&passenger.birth_date).await?;

        self.pick_dropdown(
            "[data-test=\"is-thirdStep-dropdownGender\"]",
            &passenger.gender,
            "gender",
        )
        .await?;
        self.pick_dropdown(
            "[data-test=\"is-thirdStep-dropdownCountryIssue\"]",
            &passenger.issue_country,
            "issue country",
        )
        .await?;
        self.pick_dropdown(
            "[data-test=\"is-thirdStep-dropdownDocumentType\"]",
            &passenger.document_type,
            "document type",
        )
        .await?;

        self.probe
            .fill_any(
                "the document number field",
                &[
                    Locator::css("[data-test=\"is-passengerForm-textFieldDocumentNumber\"] input"),
                    Locator::css(".card-passenger__passenger-form--fourth-row input"),
                ],
                &passenger.document_number,
                true,
            )
            .await?;

        // Contact fields only render on adult cards.
        self.probe
            .fill_any(
                "the email field",
                &[Locator::css("[data-test=\"is-passengerForm-textFieldEmail\"] input")],
                &passenger.email,
                false,
            )
            .await?;
        self.probe
            .fill_any(
                "the phone prefix field",
                &[Locator::css("[data-test=\"is-passengerForm-textFieldPrefix\"] input")],
                &passenger.phone_prefix,
                false,
            )
            .await?;
        self.probe
            .fill_any(
                "the phone field",
                &[Locator::css("[data-test=\"is-passengerForm-textFieldPhone\"] input")],
                &passenger.phone,
                false,
            )
            .await?;

        if !self.probe.click_any(&save_buttons(), true).await? {
            return Err(ProbeError::ElementNotFound(format!(
                "the save button for passenger {index}"
            ))
            .into());
        }
        wait_ms(900).await;
        Ok(())
    }

    async fn pick_dropdown(&self, container_css: &str, value: &str, what: &str) -> FlowResult<()> {
        if self
            .probe
            .click_any(&[Locator::css(container_css)], false)
            .await?
        {
            if !self.probe.select_dropdown_option(value).await? {
                warn!(what, value, "dropdown option not selectable");
            }
        }
        Ok(())
    }

    /// The birth date renders either as three combobox selects or as three
    /// plain inputs, depending on the storefront build.
    async fn fill_birth_date(&self, date: &NaiveDate) -> FlowResult<()> {
        let field = Locator::css("[data-test=\"is-passengerForm-textFieldBirthdate\"]");
        let container = self
            .probe
            .try_find_visible(slice::from_ref(&field))
            .await?
            .ok_or_else(|| ProbeError::ElementNotFound("the birth date field".into()))?;

        let values = [
            date.day().to_string(),
            date.month().to_string(),
            date.year().to_string(),
        ];

        let selects = self
            .probe
            .query_within_tick(
                container.key(),
                &Locator::css(".ant-select-selector, [role=\"combobox\"]"),
            )
            .await?;
        if selects.len() >= 3 {
            for (part, value) in values.iter().enumerate() {
                let select = &selects[part];
                if !select.visible() {
                    continue;
                }
                if let Err(err) = self.pick_birth_part(select.as_ref(), value).await {
                    if err.is_session_closed() {
                        return Err(err);
                    }
                    debug!(part, error = %err, "birth date part selection failed");
                }
            }
            return Ok(());
        }

        let inputs = self
            .probe
            .query_within_tick(container.key(), &Locator::css("input"))
            .await?;
        let mut filled = 0;
        for input in inputs {
            if !input.visible() {
                continue;
            }
            match input.fill(&values[filled]).await {
                Ok(()) => {
                    filled += 1;
                    if filled == 3 {
                        break;
                    }
                }
                Err(err) if err.is_session_closed() => return Err(err.into()),
                Err(err) => debug!(error = %err, "birth date input fill failed"),
            }
        }
        if filled != 3 {
            return Err(ProbeError::ElementNotFound(format!(
                "birth date inputs (filled {filled} of 3)"
            ))
            .into());
        }
        Ok(())
    }

    async fn pick_birth_part(&self, select: &dyn UiNode, value: &str) -> FlowResult<()> {
        select.force_click().await?;
        wait_ms(150).await;
        if !self.probe.click_text(value, true).await? && !self.probe.click_text(value, false).await?
        {
            self.probe.surface().type_text(value, Duration::ZERO).await?;
            self.probe.surface().press_key("Enter").await?;
        }
        wait_ms(120).await;
        Ok(())
    }

    /// Cards collapse once saved; clicking the header text reopens them.
    async fn open_passenger_card(&self, passenger: &Passenger, index: usize) -> FlowResult<()> {
        let titles = [
            format!("Pasajero {index}"),
            passenger.full_name(),
            passenger.first_name.clone(),
        ];
        for title in &titles {
            if self.probe.click_text(title, false).await? {
                wait_ms(400).await;
                return Ok(());
            }
        }
        Ok(())
    }

    /// One more save pass over every card. Validation sometimes reopens a
    /// card after a later one is edited.
    async fn force_save_all(&self) -> FlowResult<()> {
        for (index, passenger) in self.passengers.iter().enumerate() {
            self.open_passenger_card(passenger, index + 1).await?;
            wait_ms(200).await;
            self.probe.click_any(&save_buttons(), true).await?;
            wait_ms(500).await;
        }
        Ok(())
    }
}
