//! Search stage: from the storefront landing page to a submitted flight
//! search with trip type, cities, dates, and passenger counts applied.

use std::cmp::min;
use std::slice;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::browser::{Locator, UiNode};
use crate::diagnostics::DiagnosticRecorder;
use crate::flow::error::{FlowError, FlowResult};
use crate::flow::wait_ms;
use crate::model::{RunConfig, Stage, TripType};
use crate::probe::{Probe, ProbeError};

const HOME_READY_TIMEOUT: Duration = Duration::from_secs(45);

const ADULT_LABELS: &[&str] = &["Adulto", "Adultos", "Adult"];
const CHILD_LABELS: &[&str] = &[
    "Niño", "Niños", "Nino", "Ninos", "Child", "Children", "Criança", "Crianca",
];
const INFANT_LABELS: &[&str] = &["Infante", "Infantes", "Infant", "Bebê", "Bebe"];

/// Labels on the searchbox wrapper that opens the fare calendar, most
/// specific storefront wording first.
const CALENDAR_TRIGGER_LABELS: &[&str] = &[
    "Solo ida",
    "One way",
    "Somente ida",
    "Ida-Vuelta",
    "Ida y vuelta",
    "Round trip",
    "Ida e volta",
    "Fecha de ida",
    "Departure",
];

const ENABLED_DAY_CSS: &str = "div.vc-day-content[aria-disabled=\"false\"]";
const IN_MONTH_DAY_CSS: &str =
    "div.vc-day:not(.is-not-in-month) div.vc-day-content[aria-disabled=\"false\"]";

/// `<day> <month name> <year>` as the searchbox renders an applied date.
fn applied_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b\d{1,2}\s+[A-Za-zÁÉÍÓÚáéíóú]{3,}\s+\d{4}\b").expect("valid regex")
    })
}

fn trip_type_labels(trip: TripType) -> &'static [&'static str] {
    match trip {
        TripType::RoundTrip => &["Ida-Vuelta", "Ida y vuelta", "Round trip", "Ida e volta"],
        TripType::OneWay => &["Solo ida", "One way", "Somente ida"],
    }
}

fn search_buttons() -> [Locator; 3] {
    [
        Locator::within("button", ["Buscar vuelo"]),
        Locator::within("button", ["Buscar voo"]),
        Locator::within("button", ["Search"]),
    ]
}

/// Calendar cells are indexed from the first selectable day; a request past
/// the visible range settles on the last cell.
fn outbound_day_index(days_ahead: u32, available: usize) -> usize {
    min(days_ahead as usize, available - 1)
}

/// The return pick lands `return_offset` cells after the outbound one. A
/// clamp that falls on or before the outbound cell moves one forward when the
/// calendar still has room; otherwise the same-day pick stands.
fn return_day_index(outbound: usize, return_offset: u32, available: usize) -> usize {
    let index = min(outbound + return_offset as usize, available - 1);
    if index <= outbound && available > outbound + 1 {
        outbound + 1
    } else {
        index
    }
}

pub struct SearchStage<'a> {
    probe: Probe<'a>,
    config: &'a RunConfig,
    recorder: &'a DiagnosticRecorder<'a>,
}

impl<'a> SearchStage<'a> {
    pub fn new(
        probe: Probe<'a>,
        config: &'a RunConfig,
        recorder: &'a DiagnosticRecorder<'a>,
    ) -> Self {
        SearchStage {
            probe,
            config,
            recorder,
        }
    }

    pub async fn run(&self) -> FlowResult<()> {
        info!(url = %self.config.url, "opening the storefront");
        self.probe.surface().navigate(&self.config.url).await?;
        self.recorder.snapshot("landing").await;
        self.wait_for_search_form().await?;
        self.recorder.snapshot("landing_ready").await;

        self.select_trip_type().await?;
        self.recorder.snapshot("trip_type_selected").await;
        self.select_city("#origin-id", &self.config.origin).await?;
        self.select_city("#destination-id", &self.config.destination)
            .await?;
        self.pick_travel_dates().await?;
        self.configure_passenger_counts().await?;
        self.recorder.snapshot("search_configured").await;
        self.submit_search().await
    }

    /// Waits for origin, destination, and the search button to all render.
    async fn wait_for_search_form(&self) -> FlowResult<()> {
        let origin = [Locator::css("#origin-id input"), Locator::css("#origin-id")];
        let destination = [
            Locator::css("#destination-id input"),
            Locator::css("#destination-id"),
        ];
        let search = search_buttons();

        let start = Instant::now();
        while start.elapsed() < HOME_READY_TIMEOUT {
            let ready = self.probe.try_find_visible(&origin).await?.is_some()
                && self.probe.try_find_visible(&destination).await?.is_some()
                && self.probe.try_find_visible(&search).await?.is_some();
            if ready {
                return Ok(());
            }
            wait_ms(1000).await;
        }
        Err(FlowError::timeout(Stage::Search, "the search form"))
    }

    async fn select_trip_type(&self) -> FlowResult<()> {
        let labels = trip_type_labels(self.config.trip_type);
        let radios = [
            Locator::within("label.sky-radiobutton.radio-flight-type", labels.iter().copied()),
            Locator::within("label.sky-radiobutton", labels.iter().copied()),
        ];
        if self.probe.click_any(&radios, true).await? {
            return Ok(());
        }

        let mut fallback = Vec::new();
        for label in labels {
            fallback.push(Locator::within("button", [*label]));
            fallback.push(Locator::within("span", [*label]));
            fallback.push(Locator::within("div", [*label]));
        }
        if self.probe.click_any(&fallback, true).await? {
            return Ok(());
        }

        // One-way is usually the storefront default, so a missing control
        // is survivable there.
        if self.config.trip_type == TripType::OneWay {
            warn!("no explicit one-way control found, assuming the default");
            return Ok(());
        }
        Err(ProbeError::SelectionNotFound(format!("trip type {}", self.config.trip_type)).into())
    }

    async fn select_city(&self, container: &str, city: &str) -> FlowResult<()> {
        info!(container, city, "selecting city");
        self.probe
            .click_required(
                &format!("the {container} city selector"),
                &[Locator::css(container)],
                true,
            )
            .await?;
        wait_ms(250).await;

        let input = match self
            .editable_input(&format!("{container} input:not([readonly])"))
            .await?
        {
            Some(input) => Some(input),
            None => self.editable_input(&format!("{container} input")).await?,
        };
        let Some(input) = input else {
            return Err(
                ProbeError::ElementNotFound(format!("an editable input for city {city}")).into(),
            );
        };
        input.fill(city).await?;
        wait_ms(500).await;

        // Exact autocomplete entry first, then a partial match such as
        // "La Serena (LSC)".
        if self.probe.click_text(city, true).await? {
            return Ok(());
        }
        if self.probe.click_text(city, false).await? {
            return Ok(());
        }
        Err(ProbeError::SelectionNotFound(format!("an autocomplete option for {city}")).into())
    }

    async fn editable_input(&self, css: &str) -> FlowResult<Option<Box<dyn UiNode>>> {
        let nodes = self.probe.query_tick(&Locator::css(css)).await?;
        Ok(nodes.into_iter().find(|n| n.visible() && n.editable()))
    }

    async fn pick_travel_dates(&self) -> FlowResult<()> {
        wait_ms(600).await;
        self.open_calendar().await?;

        let days = self.available_days().await?;
        if days.is_empty() {
            return Err(
                ProbeError::SelectionNotFound("selectable days in the fare calendar".into()).into(),
            );
        }
        let target = outbound_day_index(self.config.days_ahead, days.len());
        let outbound = self.click_calendar_day(&days, target, "outbound").await?;
        info!(index = outbound, "outbound date picked");

        if self.config.trip_type == TripType::RoundTrip {
            wait_ms(300).await;
            let return_days = self.available_days().await?;
            if return_days.is_empty() {
                return Err(ProbeError::SelectionNotFound(
                    "selectable days for the return date".into(),
                )
                .into());
            }
            let index = return_day_index(outbound, self.config.return_offset, return_days.len());
            let picked = self.click_calendar_day(&return_days, index, "return").await?;
            info!(index = picked, "return date picked");
        }

        if !self.dates_applied().await? {
            return Err(ProbeError::SelectionNotFound(
                "an applied travel date in the search box".into(),
            )
            .into());
        }
        self.close_calendar_if_open().await
    }

    async fn open_calendar(&self) -> FlowResult<()> {
        let triggers: Vec<Locator> = CALENDAR_TRIGGER_LABELS
            .iter()
            .map(|label| Locator::within("div.wrapper", [*label]))
            .collect();
        if !self.probe.click_any(&triggers, true).await? {
            return Err(ProbeError::ElementNotFound("the date calendar trigger".into()).into());
        }

        let days = Locator::css(ENABLED_DAY_CSS);
        for _ in 0..20 {
            if self.probe.try_find_visible(slice::from_ref(&days)).await?.is_some() {
                return Ok(());
            }
            wait_ms(150).await;
        }
        Err(ProbeError::ElementNotFound("enabled days in the calendar".into()).into())
    }

    /// Day cells of the month in view, falling back to every enabled cell
    /// when the month filter matches nothing visible.
    async fn available_days(&self) -> FlowResult<Vec<Box<dyn UiNode>>> {
        let filtered = self.probe.query_tick(&Locator::css(IN_MONTH_DAY_CSS)).await?;
        if filtered.iter().any(|day| day.visible()) {
            return Ok(filtered);
        }
        self.probe
            .query_tick(&Locator::css(ENABLED_DAY_CSS))
            .await
            .map_err(Into::into)
    }

    async fn click_calendar_day(
        &self,
        days: &[Box<dyn UiNode>],
        index: usize,
        leg: &str,
    ) -> FlowResult<usize> {
        if days.is_empty() {
            return Err(
                ProbeError::SelectionNotFound(format!("a calendar day for the {leg} date")).into(),
            );
        }
        let real = min(index, days.len() - 1);
        match self.probe.click_escalating(days[real].as_ref()).await {
            Ok(()) => Ok(real),
            Err(err) if err.is_session_closed() => Err(err.into()),
            Err(err) => {
                debug!(error = %err, index = real, "all calendar day click attempts failed");
                Err(ProbeError::SelectionNotFound(format!(
                    "calendar day {real} for the {leg} date"
                ))
                .into())
            }
        }
    }

    /// Checks the searchbox wrappers for a rendered date, either as an
    /// input value or as inline text.
    async fn dates_applied(&self) -> FlowResult<bool> {
        let pattern = applied_date_pattern();
        let wrappers = [
            Locator::css("div.wrapper.width-min-calendar"),
            Locator::css("div.wrapper:has(.sky-layout-calendar)"),
            Locator::css("div.wrapper:has(.inner-component-calendar)"),
            Locator::within("div.wrapper", ["Fecha de ida"]),
            Locator::within("div.wrapper", ["Fecha de ida y vuelta"]),
            Locator::within("div.wrapper", ["Departure"]),
        ];
        for locator in &wrappers {
            for wrapper in self.probe.query_tick(locator).await? {
                if !wrapper.visible() {
                    continue;
                }
                let inputs = self
                    .probe
                    .query_within_tick(wrapper.key(), &Locator::css("input"))
                    .await?;
                for input in inputs {
                    if !input.visible() {
                        continue;
                    }
                    match input.input_value().await {
                        Ok(value) => {
                            let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
                            if pattern.is_match(&value) {
                                return Ok(true);
                            }
                        }
                        Err(err) if err.is_session_closed() => return Err(err.into()),
                        Err(err) => debug!(error = %err, "input value read failed"),
                    }
                }
                if pattern.is_match(wrapper.text()) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn close_calendar_if_open(&self) -> FlowResult<()> {
        let days = Locator::css(ENABLED_DAY_CSS);
        for _ in 0..4 {
            if self.probe.try_find_visible(slice::from_ref(&days)).await?.is_none() {
                return Ok(());
            }
            self.probe.surface().press_key("Escape").await?;
            self.probe.surface().click_at(20.0, 20.0).await?;
            wait_ms(150).await;
        }
        Ok(())
    }

    async fn configure_passenger_counts(&self) -> FlowResult<()> {
        let seats = &self.config.seats;
        if seats.total() <= 1 && seats.children == 0 && seats.infants == 0 {
            return Ok(());
        }
        info!(
            adults = seats.adults,
            children = seats.children,
            infants = seats.infants,
            "configuring passenger counts"
        );

        if !self.open_passenger_selector().await? {
            return Err(ProbeError::SelectionNotFound("the passenger selector".into()).into());
        }

        let panel = Locator::css("div.searchbox-passenger_container");
        if self.probe.try_find_visible(slice::from_ref(&panel)).await?.is_none() {
            for _ in 0..3 {
                self.probe.surface().press_key("Escape").await?;
                wait_ms(150).await;
                if self.open_passenger_selector().await? {
                    wait_ms(250).await;
                }
                if self.probe.try_find_visible(slice::from_ref(&panel)).await?.is_some() {
                    break;
                }
            }
            if self.probe.try_find_visible(slice::from_ref(&panel)).await?.is_none() {
                return Err(
                    ProbeError::SelectionNotFound("the passenger selector panel".into()).into(),
                );
            }
        }
        self.recorder.snapshot("passenger_selector_open").await;

        for _ in 0..seats.adults.saturating_sub(1) {
            if !self.probe.click_counter_increment(ADULT_LABELS).await? {
                return Err(ProbeError::SelectionNotFound("the adult counter".into()).into());
            }
            wait_ms(150).await;
        }
        for _ in 0..seats.children {
            if !self.probe.click_counter_increment(CHILD_LABELS).await? {
                return Err(ProbeError::SelectionNotFound("the child counter".into()).into());
            }
            wait_ms(150).await;
        }
        for _ in 0..seats.infants {
            if !self.probe.click_counter_increment(INFANT_LABELS).await? {
                return Err(ProbeError::SelectionNotFound("the infant counter".into()).into());
            }
            self.accept_infant_modal().await?;
            wait_ms(150).await;
        }

        let _ = self.close_passenger_selector().await?;
        self.recorder.snapshot("passenger_selector_configured").await;
        Ok(())
    }

    async fn open_passenger_selector(&self) -> FlowResult<bool> {
        self.close_calendar_if_open().await?;
        if self.passenger_modal_open().await? {
            return Ok(true);
        }
        for _ in 0..4 {
            if self.try_passenger_triggers().await? {
                return Ok(true);
            }
            wait_ms(220).await;
        }
        Ok(false)
    }

    async fn try_passenger_triggers(&self) -> FlowResult<bool> {
        let wrapper_triggers: [(&str, Option<&str>); 5] = [
            ("Pasajeros", None),
            ("Pasajeros", Some(".textfield_icon")),
            ("Pasajeros", Some("input")),
            ("Passenger", None),
            ("Passageiros", None),
        ];
        for (needle, child) in wrapper_triggers {
            if self.click_wrapper_child(needle, child).await? {
                wait_ms(220).await;
                if self.passenger_modal_open().await? {
                    return Ok(true);
                }
            }
        }

        let direct = [
            Locator::css("#passengers-id"),
            Locator::css("[data-test*=\"passenger\"]"),
            Locator::within("button", ["Pasajeros"]),
            Locator::within("button", ["Passageiros"]),
            Locator::within("button", ["Passenger"]),
        ];
        for locator in direct {
            if self.probe.click_any(slice::from_ref(&locator), true).await? {
                wait_ms(220).await;
                if self.passenger_modal_open().await? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Clicks a `div.wrapper` labelled with `needle`, or a child of it when
    /// `child_css` is given.
    async fn click_wrapper_child(
        &self,
        needle: &str,
        child_css: Option<&str>,
    ) -> FlowResult<bool> {
        let wrappers = self
            .probe
            .query_tick(&Locator::within("div.wrapper", [needle]))
            .await?;
        for wrapper in wrappers {
            if !wrapper.visible() {
                continue;
            }
            match child_css {
                None => {
                    let _ = wrapper.scroll_into_view().await;
                    wrapper.force_click().await?;
                    return Ok(true);
                }
                Some(css) => {
                    let children = self
                        .probe
                        .query_within_tick(wrapper.key(), &Locator::css(css))
                        .await?;
                    if let Some(child) = children.into_iter().find(|c| c.visible()) {
                        let _ = child.scroll_into_view().await;
                        child.force_click().await?;
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    async fn passenger_modal_open(&self) -> FlowResult<bool> {
        let markers = [
            Locator::css("div.searchbox-passenger_container"),
            Locator::within("button", ["Confirmar"]),
        ];
        Ok(self.probe.try_find_visible(&markers).await?.is_some())
    }

    async fn infant_modal_open(&self) -> FlowResult<bool> {
        let modal = Locator::within(
            ".ant-modal-body",
            ["Infante", "Acepto y entiendo las condiciones"],
        );
        Ok(self.probe.try_find_visible(slice::from_ref(&modal)).await?.is_some())
    }

    /// The infant fare conditions modal pops over the selector and has to
    /// be acknowledged before anything else is clickable.
    async fn accept_infant_modal(&self) -> FlowResult<bool> {
        if !self.infant_modal_open().await? {
            return Ok(true);
        }
        let accept = [
            Locator::within("button", ["Acepto y entiendo las condiciones"]),
            Locator::within("button", ["Acepto y entiendo"]),
            Locator::within("button", ["Acepto"]),
        ];
        for _ in 0..8 {
            if !self.infant_modal_open().await? {
                return Ok(true);
            }
            if self.probe.click_any(&accept, true).await? {
                wait_ms(250).await;
                continue;
            }
            wait_ms(250).await;
        }
        Ok(!self.infant_modal_open().await?)
    }

    async fn close_passenger_selector(&self) -> FlowResult<bool> {
        let done = [
            Locator::within("button", ["Aplicar"]),
            Locator::within("button", ["Listo"]),
            Locator::within("button", ["Hecho"]),
            Locator::within("button", ["Done"]),
            Locator::within("button", ["Confirmar"]),
        ];
        for _ in 0..12 {
            self.accept_infant_modal().await?;
            if self.infant_modal_open().await? {
                wait_ms(200).await;
                continue;
            }
            if self.probe.click_any(&done, true).await? {
                return Ok(true);
            }
            wait_ms(180).await;
        }
        Ok(false)
    }

    async fn submit_search(&self) -> FlowResult<()> {
        self.probe
            .click_required("the search button", &search_buttons(), true)
            .await?;
        info!("search submitted");
        wait_ms(1500).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applied_date_pattern_matches_rendered_dates() {
        let pattern = applied_date_pattern();
        assert!(pattern.is_match("12 Mayo 2026"));
        assert!(pattern.is_match("Vuelta 3 Enero 2027"));
        assert!(!pattern.is_match("12/05/2026"));
        assert!(!pattern.is_match("12 My 2026"));
    }

    #[test]
    fn trip_labels_cover_both_directions() {
        assert!(trip_type_labels(TripType::RoundTrip).contains(&"Ida y vuelta"));
        assert!(trip_type_labels(TripType::OneWay).contains(&"Solo ida"));
    }

    #[test]
    fn outbound_index_follows_the_offset_until_the_calendar_ends() {
        assert_eq!(outbound_day_index(16, 30), 16);
        assert_eq!(outbound_day_index(16, 10), 9);
        assert_eq!(outbound_day_index(0, 30), 0);
    }

    #[test]
    fn return_index_adds_the_offset_on_a_long_calendar() {
        assert_eq!(return_day_index(16, 4, 30), 20);
        assert_eq!(return_day_index(0, 1, 30), 1);
        // Short calendar: clamp to the last cell, still past the outbound.
        assert_eq!(return_day_index(5, 4, 7), 6);
    }

    #[test]
    fn return_index_never_lands_before_the_outbound_when_room_remains() {
        // A zero offset moves one cell forward when the calendar has room.
        assert_eq!(return_day_index(5, 0, 30), 6);
        // The outbound pick sits on the last cell: the same-day pick stands.
        assert_eq!(return_day_index(9, 4, 10), 9);
        assert_eq!(return_day_index(0, 4, 1), 0);
    }
}
