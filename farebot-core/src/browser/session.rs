use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::{SurfaceError, SurfaceResult};

/// How the run's Chromium instance is launched. One session serves the
/// whole purchase; there is no pooling.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub executable_path: Option<PathBuf>,
    pub user_data_dir: Option<PathBuf>,
    pub headless: bool,
    pub sandbox: bool,
    pub width: u32,
    pub height: u32,
    pub request_timeout: Duration,
    /// Storefronts localize by browser language, so pin it per market.
    pub lang: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            executable_path: None,
            user_data_dir: None,
            headless: false,
            sandbox: true,
            width: 1366,
            height: 900,
            request_timeout: Duration::from_secs(45),
            lang: None,
        }
    }
}

impl SessionOptions {
    fn build_chromium_config(&self) -> SurfaceResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder().viewport(ChromiumViewport {
            width: self.width,
            height: self.height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: self.width >= self.height,
            has_touch: false,
        });

        if let Some(path) = &self.executable_path {
            builder = builder.chrome_executable(path);
        }
        if let Some(dir) = &self.user_data_dir {
            builder = builder.user_data_dir(dir);
        }
        if !self.headless {
            builder = builder.with_head();
        }
        if !self.sandbox {
            builder = builder.no_sandbox();
        }
        builder = builder.request_timeout(self.request_timeout);

        let mut args = vec![
            format!("--window-size={},{}", self.width, self.height),
            "--disable-background-timer-throttling".to_string(),
            "--no-first-run".to_string(),
            "--password-store=basic".to_string(),
        ];
        if let Some(lang) = &self.lang {
            args.push(format!("--lang={lang}"));
            args.push(format!("--accept-lang={lang}"));
        }
        builder = builder.args(args);

        builder.build().map_err(SurfaceError::Configuration)
    }
}

/// Launches Chromium and opens the single page the run drives. The handler
/// stream is drained on a background task for the session's lifetime.
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    headless: bool,
    handler_task: Option<JoinHandle<()>>,
}

impl BrowserSession {
    pub async fn launch(options: &SessionOptions) -> SurfaceResult<Self> {
        let chromium_config = options.build_chromium_config()?;
        info!(
            headless = options.headless,
            width = options.width,
            height = options.height,
            "launching chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| SurfaceError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        let params = CreateTargetParams::new("about:blank");
        let page = browser.new_page(params).await?;

        Ok(BrowserSession {
            browser,
            page,
            headless: options.headless,
            handler_task: Some(handler_task),
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn headless(&self) -> bool {
        self.headless
    }

    pub async fn shutdown(mut self) -> SurfaceResult<()> {
        info!("shutting down chromium instance");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("browser session dropped without explicit shutdown");
            }
        }
    }
}
