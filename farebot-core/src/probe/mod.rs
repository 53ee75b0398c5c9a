//! Element probing over a [`UiSurface`].
//!
//! Everything here polls: the storefront renders asynchronously, so a
//! lookup that fails right now may succeed a tick later. Transient surface
//! errors during a tick are swallowed and the lookup retried; only budget
//! exhaustion or a closed session surfaces to the caller.

mod error;

use std::time::Duration;

use regex::Regex;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::browser::{Locator, UiNode, UiSurface};

pub use error::{ProbeError, ProbeResult};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long and how often to re-check a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub timeout: Duration,
    pub interval: Duration,
}

impl PollBudget {
    pub fn new(timeout: Duration) -> Self {
        PollBudget {
            timeout,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn from_millis(timeout_ms: u64) -> Self {
        PollBudget::new(Duration::from_millis(timeout_ms))
    }
}

/// Whether an optional fill actually touched the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    Applied,
    NotApplicable,
}

impl FillOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, FillOutcome::Applied)
    }
}

/// Stateless helper bundling the lookup patterns every stage action uses.
#[derive(Clone, Copy)]
pub struct Probe<'a> {
    surface: &'a dyn UiSurface,
    action_delay: Duration,
}

impl<'a> Probe<'a> {
    pub fn new(surface: &'a dyn UiSurface) -> Self {
        Probe {
            surface,
            action_delay: Duration::ZERO,
        }
    }

    /// Extra pause after every click/fill, for watching a headful run.
    pub fn with_action_delay(mut self, delay: Duration) -> Self {
        self.action_delay = delay;
        self
    }

    pub fn surface(&self) -> &'a dyn UiSurface {
        self.surface
    }

    async fn settle(&self) {
        if !self.action_delay.is_zero() {
            sleep(self.action_delay).await;
        }
    }

    /// One query tick. Transient errors come back as an empty hit list so
    /// the enclosing poll loop keeps going; a closed session propagates.
    pub async fn query_tick(&self, locator: &Locator) -> ProbeResult<Vec<Box<dyn UiNode>>> {
        match self.surface.query(locator).await {
            Ok(nodes) => Ok(nodes),
            Err(err) if err.is_session_closed() => Err(err.into()),
            Err(err) => {
                debug!(locator = %locator, error = %err, "query tick failed");
                Ok(Vec::new())
            }
        }
    }

    /// [`Probe::query_tick`] scoped under a node key.
    pub async fn query_within_tick(
        &self,
        key: &str,
        locator: &Locator,
    ) -> ProbeResult<Vec<Box<dyn UiNode>>> {
        match self.surface.query_within(key, locator).await {
            Ok(nodes) => Ok(nodes),
            Err(err) if err.is_session_closed() => Err(err.into()),
            Err(err) => {
                debug!(locator = %locator, error = %err, "scoped query tick failed");
                Ok(Vec::new())
            }
        }
    }

    /// First visible element among `locators`, in list order, right now.
    pub async fn try_find_visible(
        &self,
        locators: &[Locator],
    ) -> ProbeResult<Option<Box<dyn UiNode>>> {
        for locator in locators {
            let nodes = self.query_tick(locator).await?;
            if let Some(node) = nodes.into_iter().find(|node| node.visible()) {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }

    /// Polls until some locator yields a visible element.
    pub async fn find_visible(
        &self,
        what: &str,
        locators: &[Locator],
        budget: PollBudget,
    ) -> ProbeResult<Box<dyn UiNode>> {
        let start = Instant::now();
        loop {
            if let Some(node) = self.try_find_visible(locators).await? {
                return Ok(node);
            }
            if start.elapsed() >= budget.timeout {
                return Err(ProbeError::ElementNotFound(format!(
                    "{what} (waited {:?})",
                    budget.timeout
                )));
            }
            sleep(budget.interval).await;
        }
    }

    /// Polls until a visible element appears, reporting only whether it did.
    pub async fn wait_visible(&self, locators: &[Locator], budget: PollBudget) -> ProbeResult<bool> {
        match self.find_visible("condition", locators, budget).await {
            Ok(_) => Ok(true),
            Err(ProbeError::ElementNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn click_node(&self, node: &dyn UiNode, force: bool) -> ProbeResult<()> {
        let _ = node.scroll_into_view().await;
        if force {
            node.force_click().await?;
        } else {
            node.click().await?;
        }
        self.settle().await;
        Ok(())
    }

    /// Clicks the first visible element among `locators`. `false` when
    /// nothing visible matched.
    pub async fn click_any(&self, locators: &[Locator], force: bool) -> ProbeResult<bool> {
        match self.try_find_visible(locators).await? {
            Some(node) => {
                self.click_node(node.as_ref(), force).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Like [`Probe::click_any`] but a miss is fatal.
    pub async fn click_required(
        &self,
        what: &str,
        locators: &[Locator],
        force: bool,
    ) -> ProbeResult<()> {
        if self.click_any(locators, force).await? {
            Ok(())
        } else {
            Err(ProbeError::ElementNotFound(what.to_string()))
        }
    }

    /// Clicks every visible, enabled element matching any locator. Used on
    /// interstitial screens where several "continue" buttons may coexist.
    pub async fn click_all(&self, locators: &[Locator], force: bool) -> ProbeResult<u32> {
        let mut clicked = 0;
        for locator in locators {
            let nodes = self.query_tick(locator).await?;
            for node in nodes {
                if !node.visible() || !node.enabled() {
                    continue;
                }
                match self.click_node(node.as_ref(), force).await {
                    Ok(()) => {
                        clicked += 1;
                        sleep(Duration::from_millis(120)).await;
                    }
                    Err(err) if err.is_session_closed() => return Err(err),
                    Err(err) => debug!(locator = %locator, error = %err, "bulk click failed"),
                }
            }
        }
        Ok(clicked)
    }

    /// Three-rung click ladder for controls behind overlays or mid
    /// transition: element click, then coordinates, then synthetic click.
    pub async fn click_escalating(&self, node: &dyn UiNode) -> ProbeResult<()> {
        let _ = node.scroll_into_view().await;
        match node.click().await {
            Ok(()) => {
                self.settle().await;
                return Ok(());
            }
            Err(err) if err.is_session_closed() => return Err(err.into()),
            Err(err) => debug!(error = %err, "plain click failed, escalating"),
        }
        match node.force_click().await {
            Ok(()) => {
                self.settle().await;
                return Ok(());
            }
            Err(err) if err.is_session_closed() => return Err(err.into()),
            Err(err) => debug!(error = %err, "coordinate click failed, escalating"),
        }
        node.dispatch_click().await?;
        self.settle().await;
        Ok(())
    }

    /// Fills the first visible element among `locators` if it is enabled
    /// and editable. With `required`, any obstacle is an
    /// [`ProbeError::ElementNotFound`]; without it, the fill reports
    /// [`FillOutcome::NotApplicable`] and moves on.
    pub async fn fill_any(
        &self,
        what: &str,
        locators: &[Locator],
        value: &str,
        required: bool,
    ) -> ProbeResult<FillOutcome> {
        let node = match self.try_find_visible(locators).await? {
            Some(node) => node,
            None => {
                if required {
                    return Err(ProbeError::ElementNotFound(what.to_string()));
                }
                return Ok(FillOutcome::NotApplicable);
            }
        };

        if !node.enabled() || !node.editable() {
            if required {
                return Err(ProbeError::ElementNotFound(format!("{what} is not editable")));
            }
            return Ok(FillOutcome::NotApplicable);
        }

        node.fill(value).await?;
        self.settle().await;
        Ok(FillOutcome::Applied)
    }

    /// Clicks the first visible element whose text matches `needle`.
    pub async fn click_text(&self, needle: &str, exact: bool) -> ProbeResult<bool> {
        let locator = if exact {
            Locator::text(needle)
        } else {
            Locator::text_contains(needle)
        };
        self.click_any(&[locator], false).await
    }

    /// Clicks the last visible text match. Dropdown panels render options
    /// in DOM order with the open panel's copy at the end.
    pub async fn click_last_text(&self, needle: &str, exact: bool, force: bool) -> ProbeResult<bool> {
        let locator = if exact {
            Locator::text(needle)
        } else {
            Locator::text_contains(needle)
        };
        let nodes = self.query_tick(&locator).await?;
        for node in nodes.into_iter().rev() {
            if !node.visible() {
                continue;
            }
            match self.click_node(node.as_ref(), force).await {
                Ok(()) => return Ok(true),
                Err(err) if err.is_session_closed() => return Err(err),
                Err(err) => debug!(error = %err, "last-text click failed"),
            }
        }
        Ok(false)
    }

    /// Picks a dropdown option by label: exact match first, then
    /// case-insensitive exact.
    pub async fn select_dropdown_option(&self, label: &str) -> ProbeResult<bool> {
        if self.click_text(label, true).await? {
            return Ok(true);
        }
        let nodes = self.query_tick(&Locator::text_contains(label)).await?;
        for node in nodes {
            if node.visible() && node.text().eq_ignore_ascii_case(label) {
                self.click_node(node.as_ref(), false).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Finds the counter row matching one of `row_labels` and clicks its
    /// increment button. Rows are ranked by specificity: fewest visible
    /// plus-buttons first, shortest row text as tie-break, so the row
    /// naming just one passenger type beats the whole selector panel.
    pub async fn click_counter_increment(&self, row_labels: &[&str]) -> ProbeResult<bool> {
        const ROW_CSS: &str = "div.searchbox-passenger_container, li, div, section";
        const PLUS_CSS: &str = "button.sky-select-number_button:has(.sky-select-number_button_icon[aria-label=\"more\"]), \
             button.sky-select-number_button:has(span[aria-label=\"plus\"]), \
             button[aria-label*=\"Aumentar\"], \
             button[aria-label*=\"Increase\"], \
             button[aria-label*=\"Adicionar\"], \
             button[aria-label*=\"Más\"], \
             button[aria-label*=\"Mas\"]";

        let rows = self
            .query_tick(&Locator::within(ROW_CSS, row_labels.iter().copied()))
            .await?;

        let mut candidates: Vec<(usize, usize, Box<dyn UiNode>)> = Vec::new();
        for row in rows {
            if !row.visible() {
                continue;
            }
            let mut buttons = Vec::new();
            for locator in [Locator::css(PLUS_CSS), Locator::within("button", ["+"])] {
                buttons.extend(self.query_within_tick(row.key(), &locator).await?);
            }
            let mut usable: Vec<Box<dyn UiNode>> =
                buttons.into_iter().filter(|b| b.visible() && b.enabled()).collect();
            if usable.is_empty() {
                continue;
            }
            let specificity = (usable.len(), row.text().len());
            candidates.push((specificity.0, specificity.1, usable.remove(0)));
        }

        candidates.sort_by_key(|(buttons, text_len, _)| (*buttons, *text_len));
        match candidates.into_iter().next() {
            Some((_, _, button)) => {
                self.click_node(button.as_ref(), false).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Unique normalized texts of visible matches, capped.
    pub async fn visible_texts(&self, locator: &Locator, cap: usize) -> ProbeResult<Vec<String>> {
        let nodes = self.query_tick(locator).await?;
        let mut values = Vec::new();
        for node in nodes.into_iter().take(cap) {
            if !node.visible() {
                continue;
            }
            let text = node.text().to_string();
            if !text.is_empty() && !values.contains(&text) {
                values.push(text);
            }
        }
        Ok(values)
    }

    /// Unique attribute values of visible matches, capped.
    pub async fn visible_attributes(
        &self,
        locator: &Locator,
        name: &str,
        cap: usize,
    ) -> ProbeResult<Vec<String>> {
        let nodes = self.query_tick(locator).await?;
        let mut values = Vec::new();
        for node in nodes.into_iter().take(cap) {
            if !node.visible() {
                continue;
            }
            match node.attribute(name).await {
                Ok(Some(value)) if !value.is_empty() => {
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
                Ok(_) => {}
                Err(err) if err.is_session_closed() => return Err(err.into()),
                Err(err) => debug!(error = %err, "attribute read failed"),
            }
        }
        Ok(values)
    }

    /// `true` when the current URL contains `fragment` right now.
    pub async fn url_contains(&self, fragment: &str) -> ProbeResult<bool> {
        Ok(self.surface.current_url().await?.contains(fragment))
    }

    /// Polls the URL against `pattern`. `false` means the budget ran out.
    pub async fn wait_for_url(&self, pattern: &Regex, budget: PollBudget) -> ProbeResult<bool> {
        let start = Instant::now();
        loop {
            let url = self.surface.current_url().await?;
            if pattern.is_match(&url) {
                return Ok(true);
            }
            if start.elapsed() >= budget.timeout {
                debug!(url, pattern = %pattern, "url wait exhausted");
                return Ok(false);
            }
            sleep(budget.interval).await;
        }
    }

    /// Polls the frame list for a frame named `name` and scopes into it.
    pub async fn frame_by_name(
        &self,
        name: &str,
        attempts: u32,
        spacing: Duration,
    ) -> ProbeResult<Option<Box<dyn UiSurface>>> {
        for attempt in 0..attempts {
            match self.surface.frame_names().await {
                Ok(names) => {
                    if names.iter().any(|candidate| candidate == name) {
                        return Ok(Some(self.surface.frame(name)));
                    }
                }
                Err(err) if err.is_session_closed() => return Err(err.into()),
                Err(err) => debug!(error = %err, "frame list poll failed"),
            }
            if attempt % 5 == 0 {
                debug!(frame = name, attempt = attempt + 1, "waiting for frame");
            }
            sleep(spacing).await;
        }
        Ok(None)
    }

    /// Searches the top document and every reachable named frame for a
    /// visible match, re-polling up to `attempts` times. Gateways park the
    /// card field inside whatever iframe their widget happens to use.
    pub async fn find_in_any_frame(
        &self,
        locator: &Locator,
        attempts: u32,
        spacing: Duration,
    ) -> ProbeResult<Option<Box<dyn UiNode>>> {
        for attempt in 0..attempts {
            if let Some(node) = self.try_find_visible(std::slice::from_ref(locator)).await? {
                return Ok(Some(node));
            }

            let names = match self.surface.frame_names().await {
                Ok(names) => names,
                Err(err) if err.is_session_closed() => return Err(err.into()),
                Err(err) => {
                    debug!(error = %err, "frame enumeration failed");
                    Vec::new()
                }
            };
            for name in names {
                let frame = self.surface.frame(&name);
                match frame.query(locator).await {
                    Ok(nodes) => {
                        if let Some(node) = nodes.into_iter().find(|node| node.visible()) {
                            return Ok(Some(node));
                        }
                    }
                    Err(err) if err.is_session_closed() => return Err(err.into()),
                    Err(err) => debug!(frame = %name, error = %err, "frame query failed"),
                }
            }

            if attempt % 5 == 0 {
                debug!(locator = %locator, attempt = attempt + 1, "still searching frames");
            }
            sleep(spacing).await;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_defaults_to_standard_interval() {
        let budget = PollBudget::from_millis(4_000);
        assert_eq!(budget.timeout, Duration::from_secs(4));
        assert_eq!(budget.interval, DEFAULT_POLL_INTERVAL);
        let tight = budget.with_interval(Duration::from_millis(50));
        assert_eq!(tight.interval, Duration::from_millis(50));
    }

    #[test]
    fn fill_outcome_reports_applied() {
        assert!(FillOutcome::Applied.applied());
        assert!(!FillOutcome::NotApplicable.applied());
    }
}
