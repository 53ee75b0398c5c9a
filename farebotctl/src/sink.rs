//! Filesystem sink for the evidence the flow captures.
//!
//! Exploration snapshots land in a per-run subdirectory so consecutive runs
//! never mix; one-off screenshots and HTML dumps go straight into the base
//! directory with a labelled, timestamped name.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use farebot_core::{DiagnosticSink, PageSnapshot};
use tokio::fs;

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub struct FsDiagnosticSink {
    base_dir: PathBuf,
    run_dir: PathBuf,
}

impl FsDiagnosticSink {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let run_dir = base_dir.join(format!("exploration_{}", Local::now().format(STAMP_FORMAT)));
        FsDiagnosticSink { base_dir, run_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn stamp() -> String {
        Local::now().format(STAMP_FORMAT).to_string()
    }

    fn report_text(snapshot: &PageSnapshot) -> String {
        let mut report = String::new();
        report.push_str(&format!("stage: {}\n", snapshot.label));
        report.push_str(&format!("url: {}\n\n", snapshot.url));
        push_section(&mut report, "visible_headings", &snapshot.headings);
        push_section(&mut report, "visible_labels", &snapshot.labels);
        push_section(&mut report, "visible_buttons", &snapshot.buttons);
        push_section(&mut report, "increment_aria_labels", &snapshot.increment_hints);
        report
    }
}

fn push_section(report: &mut String, title: &str, values: &[String]) {
    report.push_str(title);
    report.push_str(":\n");
    for value in values {
        report.push_str("- ");
        report.push_str(value);
        report.push('\n');
    }
    report.push('\n');
}

#[async_trait(?Send)]
impl DiagnosticSink for FsDiagnosticSink {
    async fn record_snapshot(&self, snapshot: &PageSnapshot) -> std::io::Result<()> {
        fs::create_dir_all(&self.run_dir).await?;
        let prefix = format!("{}_{}", Self::stamp(), snapshot.label);

        if let Some(png) = &snapshot.screenshot {
            fs::write(self.run_dir.join(format!("{prefix}.png")), png).await?;
        }
        fs::write(
            self.run_dir.join(format!("{prefix}.txt")),
            Self::report_text(snapshot),
        )
        .await
    }

    async fn record_screenshot(&self, label: &str, png: &[u8]) -> std::io::Result<()> {
        fs::create_dir_all(&self.base_dir).await?;
        let path = self
            .base_dir
            .join(format!("{label}_{}.png", Self::stamp()));
        fs::write(path, png).await
    }

    async fn record_html(&self, label: &str, html: &str) -> std::io::Result<()> {
        fs::create_dir_all(&self.base_dir).await?;
        let path = self
            .base_dir
            .join(format!("debug_{label}_{}.html", Self::stamp()));
        fs::write(path, html).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_snapshot(with_screenshot: bool) -> PageSnapshot {
        PageSnapshot {
            label: "landing".to_string(),
            url: "https://example.test/chile".to_string(),
            headings: vec!["Encuentra tu vuelo".to_string()],
            labels: vec!["Origen".to_string(), "Destino".to_string()],
            buttons: vec!["Buscar vuelos".to_string()],
            increment_hints: vec!["Aumentar adultos".to_string()],
            screenshot: with_screenshot.then(|| vec![0x89, 0x50, 0x4e, 0x47]),
        }
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn snapshot_writes_report_and_screenshot_into_run_dir() {
        let temp = TempDir::new().unwrap();
        let sink = FsDiagnosticSink::new(temp.path());

        sink.record_snapshot(&sample_snapshot(true)).await.unwrap();

        let names = files_in(&sink.run_dir);
        assert_eq!(names.len(), 2);
        assert!(names.iter().any(|n| n.ends_with("_landing.png")));
        let report_name = names
            .iter()
            .find(|n| n.ends_with("_landing.txt"))
            .unwrap();

        let report = std::fs::read_to_string(sink.run_dir.join(report_name)).unwrap();
        assert!(report.starts_with("stage: landing\nurl: https://example.test/chile\n"));
        assert!(report.contains("visible_buttons:\n- Buscar vuelos\n"));
        assert!(report.contains("increment_aria_labels:\n- Aumentar adultos\n"));
    }

    #[tokio::test]
    async fn snapshot_without_screenshot_writes_only_report() {
        let temp = TempDir::new().unwrap();
        let sink = FsDiagnosticSink::new(temp.path());

        sink.record_snapshot(&sample_snapshot(false)).await.unwrap();

        let names = files_in(&sink.run_dir);
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with("_landing.txt"));
    }

    #[tokio::test]
    async fn screenshot_and_html_land_in_base_dir() {
        let temp = TempDir::new().unwrap();
        let sink = FsDiagnosticSink::new(temp.path());

        sink.record_screenshot("payment_error", &[1, 2, 3])
            .await
            .unwrap();
        sink.record_html("checkout_blocked", "<html></html>")
            .await
            .unwrap();

        let names = files_in(temp.path());
        assert!(names.iter().any(|n| n.starts_with("payment_error_") && n.ends_with(".png")));
        let html_name = names
            .iter()
            .find(|n| n.starts_with("debug_checkout_blocked_"))
            .unwrap();
        let html = std::fs::read_to_string(temp.path().join(html_name)).unwrap();
        assert_eq!(html, "<html></html>");
    }
}
