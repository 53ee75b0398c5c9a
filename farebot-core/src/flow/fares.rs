//! Fare selection stage: pick a flight and fare bundle per leg, then skip
//! the seat and extras upsell screens.

use std::slice;

use tracing::{debug, info, warn};

use crate::browser::Locator;
use crate::diagnostics::DiagnosticRecorder;
use crate::flow::error::{FlowError, FlowResult};
use crate::flow::wait_ms;
use crate::model::{RunConfig, Stage, TripType};
use crate::probe::{PollBudget, Probe, ProbeError};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Leg {
    Outbound,
    Return,
}

impl Leg {
    fn as_str(self) -> &'static str {
        match self {
            Leg::Outbound => "outbound",
            Leg::Return => "return",
        }
    }
}

pub struct FareStage<'a> {
    probe: Probe<'a>,
    config: &'a RunConfig,
    recorder: &'a DiagnosticRecorder<'a>,
}

impl<'a> FareStage<'a> {
    pub fn new(
        probe: Probe<'a>,
        config: &'a RunConfig,
        recorder: &'a DiagnosticRecorder<'a>,
    ) -> Self {
        FareStage {
            probe,
            config,
            recorder,
        }
    }

    pub async fn run(&self) -> FlowResult<()> {
        self.select_flight_and_fare(Leg::Outbound).await?;
        if self.config.trip_type == TripType::RoundTrip {
            self.select_flight_and_fare(Leg::Return).await?;
            self.recorder.snapshot("return_flight_selected").await;
        } else {
            self.recorder.snapshot("outbound_flight_selected").await;
        }
        skip_upsell_screens(&self.probe).await?;
        self.recorder.snapshot("extras_skipped").await;
        Ok(())
    }

    async fn select_flight_and_fare(&self, leg: Leg) -> FlowResult<()> {
        info!(leg = leg.as_str(), "selecting flight");
        let list = [
            Locator::within("button", ["Elegir vuelo"]),
            Locator::css("[data-test^=\"is-itinerary-selectFlight\"]"),
        ];
        if !self
            .probe
            .wait_visible(&list, PollBudget::from_millis(30_000))
            .await?
        {
            return Err(FlowError::timeout(
                Stage::FareSelection,
                format!("the flight list for the {} leg", leg.as_str()),
            ));
        }
        wait_ms(2500).await;

        let mut flights = self.probe.query_tick(&list[0]).await?;
        if flights.is_empty() {
            flights = self.probe.query_tick(&list[1]).await?;
        }

        // Try each flight in listing order until one opens fare options.
        let mut selected = false;
        let rate_list = Locator::css("[data-test^=\"is-itinerary-selectRate\"]");
        for (index, flight) in flights.iter().enumerate() {
            let _ = flight.scroll_into_view().await;
            wait_ms(300).await;
            match flight.force_click().await {
                Ok(()) => {}
                Err(err) if err.is_session_closed() => return Err(err.into()),
                Err(err) => {
                    warn!(index, leg = leg.as_str(), error = %err, "flight click failed");
                    continue;
                }
            }
            if self
                .probe
                .wait_visible(slice::from_ref(&rate_list), PollBudget::from_millis(5_000))
                .await?
            {
                selected = true;
                break;
            }
            warn!(index, leg = leg.as_str(), "fare options did not appear after the click");
        }
        if !selected {
            return Err(ProbeError::SelectionNotFound(format!(
                "a flight for the {} leg",
                leg.as_str()
            ))
            .into());
        }

        let mut fares = self
            .probe
            .query_tick(&Locator::css("[data-test^=\"is-itinerary-selectRate\"] button"))
            .await?;
        if fares.is_empty() {
            fares = self
                .probe
                .query_tick(&Locator::within("button", ["Seleccionar", "Selecionar", "Select"]))
                .await?;
        }
        if fares.is_empty() {
            return Err(ProbeError::SelectionNotFound(format!(
                "fares for the {} leg",
                leg.as_str()
            ))
            .into());
        }
        // The second fare option is the bundle that can reach checkout.
        let pick = if fares.len() > 1 { 1 } else { 0 };
        fares[pick].click().await?;
        info!(leg = leg.as_str(), fare = pick, "fare selected");

        wait_ms(1000).await;
        let marketing = Locator::within("button", ["Seguir con mi tarifa actual"]);
        match self.probe.click_any(slice::from_ref(&marketing), false).await {
            Ok(true) => debug!("dismissed the keep-current-fare interstitial"),
            Ok(false) => {}
            Err(err) if err.is_session_closed() => return Err(err.into()),
            Err(err) => debug!(error = %err, "marketing interstitial click failed"),
        }
        Ok(())
    }
}

/// Clicks through the seat/extras interstitials between fares and the
/// passenger forms. Safe to call on any page; misses are ignored.
pub(crate) async fn skip_upsell_screens(probe: &Probe<'_>) -> FlowResult<()> {
    const GROUPS: [&[&str]; 3] = [
        &[
            "Continuar al siguiente vuelo",
            "Continuar ao próximo voo",
            "Continue to next flight",
        ],
        &[
            "Continuar sin elegir",
            "Continuar sin seleccionar asiento",
            "Continuar sin seleccionar",
            "Continuar sin asientos",
            "Continuar sem selecionar",
            "Continue without selecting",
            "Continue without seat selection",
        ],
        &[
            "Guardar y continuar",
            "Siguiente",
            "Continuar",
            "Continuar compra",
            "Continue",
        ],
    ];

    for group in GROUPS {
        let candidates: Vec<Locator> = group
            .iter()
            .map(|label| Locator::within("button", [*label]))
            .collect();
        match probe.click_any(&candidates, true).await {
            Ok(true) => wait_ms(600).await,
            Ok(false) => {}
            Err(err) if err.is_session_closed() => return Err(err.into()),
            Err(err) => warn!(error = %err, "upsell skip click failed"),
        }
    }
    Ok(())
}
