//! Evidence capture for exploration runs.
//!
//! The recorder surveys the live page (visible headings, labels, buttons,
//! counter hints) and forwards the result to a [`DiagnosticSink`]. Capture
//! never interrupts a run: anything that goes wrong is logged and dropped.

use async_trait::async_trait;
use tracing::warn;

use crate::browser::{Locator, UiSurface};
use crate::probe::Probe;

/// Per-list cap keeping snapshot reports readable.
pub const SNAPSHOT_LIST_CAP: usize = 25;

const INCREMENT_BUTTON_CSS: &str = "button[aria-label*=\"Aumentar\"], \
     button[aria-label*=\"Increase\"], \
     button[aria-label*=\"Adicionar\"], \
     button[aria-label*=\"Más\"], \
     button[aria-label*=\"Mas\"]";

/// What the page looked like at one labelled point of the run.
#[derive(Debug, Clone, Default)]
pub struct PageSnapshot {
    pub label: String,
    pub url: String,
    pub headings: Vec<String>,
    pub labels: Vec<String>,
    pub buttons: Vec<String>,
    /// aria-labels of the passenger counter increment buttons, the most
    /// useful clue when the selector panel changes markup.
    pub increment_hints: Vec<String>,
    pub screenshot: Option<Vec<u8>>,
}

/// Destination for captured evidence. The CLI ships a filesystem sink;
/// tests plug in collecting fakes.
#[async_trait(?Send)]
pub trait DiagnosticSink {
    async fn record_snapshot(&self, snapshot: &PageSnapshot) -> std::io::Result<()>;
    async fn record_screenshot(&self, label: &str, png: &[u8]) -> std::io::Result<()>;
    async fn record_html(&self, label: &str, html: &str) -> std::io::Result<()>;
}

/// Observer handle the flow threads through its stages.
pub struct DiagnosticRecorder<'a> {
    surface: &'a dyn UiSurface,
    sink: Option<&'a dyn DiagnosticSink>,
    exploration: bool,
}

impl<'a> DiagnosticRecorder<'a> {
    pub fn new(
        surface: &'a dyn UiSurface,
        sink: Option<&'a dyn DiagnosticSink>,
        exploration: bool,
    ) -> Self {
        DiagnosticRecorder {
            surface,
            sink,
            exploration,
        }
    }

    /// Full page survey, taken only on exploration runs.
    pub async fn snapshot(&self, label: &str) {
        if !self.exploration {
            return;
        }
        let Some(sink) = self.sink else { return };
        let snapshot = self.collect(label).await;
        if let Err(err) = sink.record_snapshot(&snapshot).await {
            warn!(label, error = %err, "could not persist ui snapshot");
        }
    }

    /// One screenshot, taken regardless of exploration mode. Used for the
    /// payment failure and purchase confirmation captures.
    pub async fn screenshot(&self, label: &str, full_page: bool) {
        let Some(sink) = self.sink else { return };
        match self.surface.screenshot(full_page).await {
            Ok(png) => {
                if let Err(err) = sink.record_screenshot(label, &png).await {
                    warn!(label, error = %err, "could not persist screenshot");
                }
            }
            Err(err) => warn!(label, error = %err, "screenshot capture failed"),
        }
    }

    /// Dumps the page HTML, also ungated. Used when the flow gets stuck.
    pub async fn html_debug(&self, label: &str) {
        let Some(sink) = self.sink else { return };
        match self.surface.page_html().await {
            Ok(html) => {
                if let Err(err) = sink.record_html(label, &html).await {
                    warn!(label, error = %err, "could not persist html dump");
                }
            }
            Err(err) => warn!(label, error = %err, "html capture failed"),
        }
    }

    async fn collect(&self, label: &str) -> PageSnapshot {
        let probe = Probe::new(self.surface);
        let url = self.surface.current_url().await.unwrap_or_default();
        let headings = probe
            .visible_texts(&Locator::css("h1, h2, h3, h4"), SNAPSHOT_LIST_CAP)
            .await
            .unwrap_or_default();
        let labels = probe
            .visible_texts(&Locator::css("label"), SNAPSHOT_LIST_CAP)
            .await
            .unwrap_or_default();
        let buttons = probe
            .visible_texts(&Locator::css("button"), SNAPSHOT_LIST_CAP)
            .await
            .unwrap_or_default();
        let increment_hints = probe
            .visible_attributes(&Locator::css(INCREMENT_BUTTON_CSS), "aria-label", SNAPSHOT_LIST_CAP)
            .await
            .unwrap_or_default();
        let screenshot = match self.surface.screenshot(true).await {
            Ok(png) => Some(png),
            Err(err) => {
                warn!(label, error = %err, "snapshot screenshot failed");
                None
            }
        };
        PageSnapshot {
            label: label.to_string(),
            url,
            headings,
            labels,
            buttons,
            increment_hints,
            screenshot,
        }
    }
}
