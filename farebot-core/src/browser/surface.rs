use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams, DispatchMouseEventType,
    MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, NavigateParams};
use chromiumoxide::page::{Page, ScreenshotParams};
use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, info};

use super::error::{SurfaceError, SurfaceResult};

/// Attribute stamped on every scan hit so follow-up actions can address the
/// exact element without holding DOM references across the wire.
const MARK_ATTR: &str = "data-fb-mark";

/// Upper bound on hits returned by one scan. The broadest container
/// locators can match most of the page; nothing downstream needs more.
const SCAN_LIMIT: usize = 120;

/// Where to look for elements. Text matching follows the storefront's
/// conventions: whitespace is collapsed before comparing, `exact` compares
/// the whole normalized text case-sensitively, and non-exact matching is a
/// case-insensitive substring test against any of the needles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Plain CSS selector.
    Css(String),
    /// The smallest elements whose normalized text matches a needle.
    Text { needles: Vec<String>, exact: bool },
    /// CSS-selected containers whose inner text contains a needle, or with
    /// `exact` whose whole normalized text equals one.
    Within {
        css: String,
        needles: Vec<String>,
        exact: bool,
    },
    /// Inputs whose placeholder contains a needle.
    Placeholder { needles: Vec<String> },
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn text(needle: impl Into<String>) -> Self {
        Locator::Text {
            needles: vec![needle.into()],
            exact: true,
        }
    }

    pub fn text_contains(needle: impl Into<String>) -> Self {
        Locator::Text {
            needles: vec![needle.into()],
            exact: false,
        }
    }

    pub fn any_text<I, S>(needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Locator::Text {
            needles: needles.into_iter().map(Into::into).collect(),
            exact: false,
        }
    }

    pub fn within<I, S>(css: impl Into<String>, needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Locator::Within {
            css: css.into(),
            needles: needles.into_iter().map(Into::into).collect(),
            exact: false,
        }
    }

    pub fn within_exact<I, S>(css: impl Into<String>, needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Locator::Within {
            css: css.into(),
            needles: needles.into_iter().map(Into::into).collect(),
            exact: true,
        }
    }

    pub fn placeholder<I, S>(needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Locator::Placeholder {
            needles: needles.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(selector) => f.write_str(selector),
            Locator::Text { needles, exact } => {
                let sep = if *exact { "=" } else { "~" };
                write!(f, "text{sep}\"{}\"", needles.join("|"))
            }
            Locator::Within { css, needles, exact } => {
                let sep = if *exact { "=" } else { "~" };
                write!(f, "within({css}, {sep}\"{}\")", needles.join("|"))
            }
            Locator::Placeholder { needles } => {
                write!(f, "placeholder(\"{}\")", needles.join("|"))
            }
        }
    }
}

/// Handle to one element found by a query. Valid as long as the DOM keeps
/// the marked element around; callers re-query rather than caching nodes
/// across page transitions.
#[async_trait(?Send)]
pub trait UiNode {
    fn visible(&self) -> bool;
    fn enabled(&self) -> bool;
    fn editable(&self) -> bool;
    fn text(&self) -> &str;
    /// Stable handle usable with [`UiSurface::query_within`].
    fn key(&self) -> &str;
    async fn click(&self) -> SurfaceResult<()>;
    /// Coordinate click at the element's center, the way a real pointer
    /// would land on it. Gets past overlays that swallow element clicks.
    async fn force_click(&self) -> SurfaceResult<()>;
    /// Last resort: synthetic `el.click()` inside the document.
    async fn dispatch_click(&self) -> SurfaceResult<()>;
    /// Replaces the field's value wholesale and fires input/change, which
    /// is what framework-bound inputs listen for.
    async fn fill(&self, value: &str) -> SurfaceResult<()>;
    /// Focuses the element and types character by character.
    async fn type_chars(&self, value: &str, delay: Duration) -> SurfaceResult<()>;
    async fn focus(&self) -> SurfaceResult<()>;
    async fn scroll_into_view(&self) -> SurfaceResult<()>;
    async fn input_value(&self) -> SurfaceResult<String>;
    async fn attribute(&self, name: &str) -> SurfaceResult<Option<String>>;
}

impl fmt::Debug for dyn UiNode + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiNode")
            .field("key", &self.key())
            .field("visible", &self.visible())
            .finish()
    }
}

/// The capability set the purchase flow needs from a scripted browser.
/// Implemented over CDP for real runs and by scripted fakes in tests.
#[async_trait(?Send)]
pub trait UiSurface {
    async fn navigate(&self, url: &str) -> SurfaceResult<()>;
    async fn current_url(&self) -> SurfaceResult<String>;
    async fn query(&self, locator: &Locator) -> SurfaceResult<Vec<Box<dyn UiNode>>>;
    /// Query scoped under a previously returned node's [`UiNode::key`].
    async fn query_within(
        &self,
        key: &str,
        locator: &Locator,
    ) -> SurfaceResult<Vec<Box<dyn UiNode>>>;
    /// Same surface scoped into a same-origin child frame by `name`.
    fn frame(&self, name: &str) -> Box<dyn UiSurface>;
    /// Names of all frames below this surface, nested ones included.
    async fn frame_names(&self) -> SurfaceResult<Vec<String>>;
    async fn press_key(&self, key: &str) -> SurfaceResult<()>;
    /// Types into whatever currently holds focus, one character at a time.
    async fn type_text(&self, text: &str, delay: Duration) -> SurfaceResult<()>;
    async fn click_at(&self, x: f64, y: f64) -> SurfaceResult<()>;
    async fn screenshot(&self, full_page: bool) -> SurfaceResult<Vec<u8>>;
    async fn page_html(&self) -> SurfaceResult<String>;
    fn headless(&self) -> bool;
    /// Parks the run so a human can drive the page. Headful this blocks
    /// until the operator closes the browser; headless it logs and returns.
    async fn suspend_for_operator(&self, reason: &str) -> SurfaceResult<()>;
}

#[derive(Debug, Deserialize)]
struct ScanEnvelope {
    ok: bool,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    hits: Vec<ScanHit>,
}

#[derive(Debug, Deserialize)]
struct ScanHit {
    index: u32,
    visible: bool,
    enabled: bool,
    editable: bool,
    text: String,
}

#[derive(Debug, Deserialize)]
struct OpEnvelope {
    ok: bool,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct ValueEnvelope {
    ok: bool,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    present: bool,
}

#[derive(Debug, Deserialize)]
struct CenterEnvelope {
    ok: bool,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
}

/// Real surface over one Chromium page. Cheap to clone logically: frame
/// scoping hands out new values sharing the page and the marker sequence.
pub struct CdpSurface {
    page: Page,
    headless: bool,
    scope: Vec<String>,
    marker_seq: Rc<Cell<u64>>,
}

impl CdpSurface {
    pub fn new(page: Page, headless: bool) -> Self {
        CdpSurface {
            page,
            headless,
            scope: Vec::new(),
            marker_seq: Rc::new(Cell::new(0)),
        }
    }

    fn next_token(&self) -> String {
        let seq = self.marker_seq.get() + 1;
        self.marker_seq.set(seq);
        format!("fb{seq}")
    }

    async fn run_scan(
        &self,
        locator: &Locator,
        root_key: Option<&str>,
    ) -> SurfaceResult<Vec<Box<dyn UiNode>>> {
        let token = self.next_token();
        let script = scan_script(&self.scope, locator, &token, root_key);
        let envelope: ScanEnvelope = self
            .page
            .evaluate(script)
            .await?
            .into_value()
            .map_err(|err| SurfaceError::Script(format!("failed to decode scan payload: {err}")))?;
        if !envelope.ok {
            return Err(SurfaceError::Frame(envelope.reason));
        }
        let nodes = envelope
            .hits
            .into_iter()
            .map(|hit| {
                Box::new(CdpNode {
                    page: self.page.clone(),
                    scope: self.scope.clone(),
                    marker: format!("{token}-{}", hit.index),
                    visible: hit.visible,
                    enabled: hit.enabled,
                    editable: hit.editable,
                    text: hit.text,
                }) as Box<dyn UiNode>
            })
            .collect();
        Ok(nodes)
    }
}

#[async_trait(?Send)]
impl UiSurface for CdpSurface {
    async fn navigate(&self, url: &str) -> SurfaceResult<()> {
        info!(url, "navigating");
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(SurfaceError::Configuration)?;
        self.page.goto(params).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    async fn current_url(&self) -> SurfaceResult<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn query(&self, locator: &Locator) -> SurfaceResult<Vec<Box<dyn UiNode>>> {
        self.run_scan(locator, None).await
    }

    async fn query_within(
        &self,
        key: &str,
        locator: &Locator,
    ) -> SurfaceResult<Vec<Box<dyn UiNode>>> {
        self.run_scan(locator, Some(key)).await
    }

    fn frame(&self, name: &str) -> Box<dyn UiSurface> {
        let mut scope = self.scope.clone();
        scope.push(name.to_string());
        Box::new(CdpSurface {
            page: self.page.clone(),
            headless: self.headless,
            scope,
            marker_seq: Rc::clone(&self.marker_seq),
        })
    }

    async fn frame_names(&self) -> SurfaceResult<Vec<String>> {
        let script = frame_names_script(&self.scope);
        let names: Vec<String> = self
            .page
            .evaluate(script)
            .await?
            .into_value()
            .map_err(|err| {
                SurfaceError::Script(format!("failed to decode frame name list: {err}"))
            })?;
        Ok(names)
    }

    async fn press_key(&self, key: &str) -> SurfaceResult<()> {
        press_key(&self.page, key).await
    }

    async fn type_text(&self, text: &str, delay: Duration) -> SurfaceResult<()> {
        dispatch_chars(&self.page, text, delay).await
    }

    async fn click_at(&self, x: f64, y: f64) -> SurfaceResult<()> {
        mouse_click(&self.page, x, y).await
    }

    async fn screenshot(&self, full_page: bool) -> SurfaceResult<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(full_page)
            .build();
        Ok(self.page.screenshot(params).await?)
    }

    async fn page_html(&self) -> SurfaceResult<String> {
        Ok(self.page.content().await?)
    }

    fn headless(&self) -> bool {
        self.headless
    }

    async fn suspend_for_operator(&self, reason: &str) -> SurfaceResult<()> {
        if self.headless {
            info!(reason, "headless run: skipping manual handover");
            return Ok(());
        }
        info!(
            reason,
            "handing the page over; close the browser window to finish"
        );
        loop {
            sleep(Duration::from_secs(1)).await;
            match self.page.url().await {
                Ok(_) => continue,
                Err(err) => {
                    let err = SurfaceError::from(err);
                    if err.is_session_closed() {
                        info!("operator closed the browser");
                        return Ok(());
                    }
                    debug!(error = %err, "page poll failed during manual handover");
                    return Ok(());
                }
            }
        }
    }
}

/// One element addressed through its scan marker. Actions re-locate the
/// element on every call; state predicates are scan-time snapshots.
struct CdpNode {
    page: Page,
    scope: Vec<String>,
    marker: String,
    visible: bool,
    enabled: bool,
    editable: bool,
    text: String,
}

impl CdpNode {
    fn marker_selector(&self) -> String {
        format!("[{MARK_ATTR}='{}']", self.marker)
    }

    async fn run_op(&self, body: &str) -> SurfaceResult<()> {
        let script = node_script(&self.scope, &self.marker, body);
        let envelope: OpEnvelope = self
            .page
            .evaluate(script)
            .await?
            .into_value()
            .map_err(|err| SurfaceError::Script(format!("failed to decode op payload: {err}")))?;
        if envelope.ok {
            Ok(())
        } else {
            Err(SurfaceError::Script(envelope.reason))
        }
    }

    async fn resolve_center(&self) -> SurfaceResult<(f64, f64)> {
        let body = "const rect = el.getBoundingClientRect();\n\
             if (rect.width <= 0 || rect.height <= 0) return { ok: false, reason: 'element has no box' };\n\
             return { ok: true, x: rect.left + rect.width / 2 + ox, y: rect.top + rect.height / 2 + oy };";
        let script = node_script(&self.scope, &self.marker, body);
        let envelope: CenterEnvelope = self
            .page
            .evaluate(script)
            .await?
            .into_value()
            .map_err(|err| {
                SurfaceError::Script(format!("failed to decode center payload: {err}"))
            })?;
        if envelope.ok {
            Ok((envelope.x, envelope.y))
        } else {
            Err(SurfaceError::Script(envelope.reason))
        }
    }
}

#[async_trait(?Send)]
impl UiNode for CdpNode {
    fn visible(&self) -> bool {
        self.visible
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn editable(&self) -> bool {
        self.editable
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn key(&self) -> &str {
        &self.marker
    }

    async fn click(&self) -> SurfaceResult<()> {
        if self.scope.is_empty() {
            let element = self.page.find_element(self.marker_selector()).await?;
            element.scroll_into_view().await?;
            element.click().await?;
            Ok(())
        } else {
            // Framed elements are unreachable for element handles; a
            // synthetic click inside the frame document stands in.
            self.dispatch_click().await
        }
    }

    async fn force_click(&self) -> SurfaceResult<()> {
        self.scroll_into_view().await?;
        let (x, y) = self.resolve_center().await?;
        mouse_click(&self.page, x, y).await
    }

    async fn dispatch_click(&self) -> SurfaceResult<()> {
        self.run_op("el.click(); return { ok: true };").await
    }

    async fn fill(&self, value: &str) -> SurfaceResult<()> {
        let body = format!(
            "const view = doc.defaultView || window;\n\
             try {{\n\
               el.focus();\n\
               const tag = el.tagName;\n\
               if (tag === 'INPUT' || tag === 'TEXTAREA') {{\n\
                 const proto = tag === 'INPUT' ? view.HTMLInputElement.prototype : view.HTMLTextAreaElement.prototype;\n\
                 const desc = Object.getOwnPropertyDescriptor(proto, 'value');\n\
                 if (desc && desc.set) {{ desc.set.call(el, {value}); }} else {{ el.value = {value}; }}\n\
               }} else if (tag === 'SELECT') {{\n\
                 el.value = {value};\n\
               }} else if (el.isContentEditable) {{\n\
                 el.textContent = {value};\n\
               }} else {{\n\
                 return {{ ok: false, reason: 'element is not fillable' }};\n\
               }}\n\
               el.dispatchEvent(new Event('input', {{ bubbles: true }}));\n\
               el.dispatchEvent(new Event('change', {{ bubbles: true }}));\n\
               return {{ ok: true }};\n\
             }} catch (err) {{ return {{ ok: false, reason: String(err) }}; }}",
            value = js_str(value)
        );
        self.run_op(&body).await
    }

    async fn type_chars(&self, value: &str, delay: Duration) -> SurfaceResult<()> {
        self.focus().await?;
        dispatch_chars(&self.page, value, delay).await
    }

    async fn focus(&self) -> SurfaceResult<()> {
        self.run_op("el.focus(); return { ok: true };").await
    }

    async fn scroll_into_view(&self) -> SurfaceResult<()> {
        self.run_op(
            "el.scrollIntoView({ block: 'center', inline: 'nearest' }); return { ok: true };",
        )
        .await
    }

    async fn input_value(&self) -> SurfaceResult<String> {
        let body = "const value = el.value !== undefined ? el.value : (el.textContent || '');\n\
             return { ok: true, value: String(value), present: true };";
        let script = node_script(&self.scope, &self.marker, body);
        let envelope: ValueEnvelope = self
            .page
            .evaluate(script)
            .await?
            .into_value()
            .map_err(|err| SurfaceError::Script(format!("failed to decode value payload: {err}")))?;
        if envelope.ok {
            Ok(envelope.value)
        } else {
            Err(SurfaceError::Script(envelope.reason))
        }
    }

    async fn attribute(&self, name: &str) -> SurfaceResult<Option<String>> {
        let body = format!(
            "const value = el.getAttribute({name});\n\
             return {{ ok: true, value: value === null ? '' : String(value), present: value !== null }};",
            name = js_str(name)
        );
        let script = node_script(&self.scope, &self.marker, &body);
        let envelope: ValueEnvelope = self
            .page
            .evaluate(script)
            .await?
            .into_value()
            .map_err(|err| {
                SurfaceError::Script(format!("failed to decode attribute payload: {err}"))
            })?;
        if !envelope.ok {
            return Err(SurfaceError::Script(envelope.reason));
        }
        Ok(envelope.present.then_some(envelope.value))
    }
}

fn js_str(value: &str) -> String {
    json!(value).to_string()
}

fn js_str_list(values: &[String]) -> String {
    json!(values).to_string()
}

/// Walks `scope` down through same-origin frames, leaving `doc` bound to
/// the target document and `ox`/`oy` holding the accumulated frame offset
/// in top-page viewport coordinates.
fn frame_descent(scope: &[String]) -> String {
    let mut out = String::from("let doc = document;\nlet ox = 0, oy = 0;\n");
    for name in scope {
        let name = js_str(name);
        out.push_str(&format!(
            "{{\n\
               const holder = Array.from(doc.querySelectorAll('iframe')).find((f) => (f.name || f.getAttribute('name')) === {name});\n\
               if (!holder) return {{ ok: false, reason: 'frame ' + {name} + ' not found' }};\n\
               let inner = null;\n\
               try {{ inner = holder.contentDocument; }} catch (err) {{ inner = null; }}\n\
               if (!inner) return {{ ok: false, reason: 'frame ' + {name} + ' not reachable' }};\n\
               const fr = holder.getBoundingClientRect();\n\
               ox += fr.left; oy += fr.top;\n\
               doc = inner;\n\
             }}\n"
        ));
    }
    out
}

fn candidate_collection(locator: &Locator) -> String {
    match locator {
        Locator::Css(selector) => format!(
            "let candidates;\n\
             try {{ candidates = Array.from((root || doc).querySelectorAll({sel})); }}\n\
             catch (err) {{ return {{ ok: false, reason: 'bad selector: ' + err }}; }}\n",
            sel = js_str(selector)
        ),
        Locator::Text { needles, exact } => format!(
            "const needles = {needles};\n\
             const exact = {exact};\n\
             const matches = (el) => {{\n\
               const t = norm(el.textContent);\n\
               if (!t) return false;\n\
               return needles.some((n) => exact ? t === n : t.toLowerCase().includes(n.toLowerCase()));\n\
             }};\n\
             const all = Array.from((root || doc).querySelectorAll('*'));\n\
             const candidates = all.filter((el) => matches(el) && !Array.from(el.children).some(matches));\n",
            needles = js_str_list(needles),
            exact = exact,
        ),
        Locator::Within { css, needles, exact } => format!(
            "const needles = {needles};\n\
             const exact = {exact};\n\
             let containers;\n\
             try {{ containers = Array.from((root || doc).querySelectorAll({sel})); }}\n\
             catch (err) {{ return {{ ok: false, reason: 'bad selector: ' + err }}; }}\n\
             const candidates = containers.filter((el) => {{\n\
               const t = norm(el.textContent);\n\
               if (exact) return needles.some((n) => t === n);\n\
               const lower = t.toLowerCase();\n\
               return needles.some((n) => lower.includes(n.toLowerCase()));\n\
             }});\n",
            needles = js_str_list(needles),
            exact = exact,
            sel = js_str(css),
        ),
        Locator::Placeholder { needles } => format!(
            "const needles = {needles}.map((n) => n.toLowerCase());\n\
             const candidates = Array.from((root || doc).querySelectorAll('input, textarea')).filter((el) => {{\n\
               const p = (el.getAttribute('placeholder') || '').toLowerCase();\n\
               return needles.some((n) => p.includes(n));\n\
             }});\n",
            needles = js_str_list(needles),
        ),
    }
}

fn scan_script(scope: &[String], locator: &Locator, token: &str, root_key: Option<&str>) -> String {
    let descent = frame_descent(scope);
    let root = match root_key {
        Some(key) => format!(
            "let root = doc.querySelector(\"[{MARK_ATTR}='{key}']\");\n\
             if (!root) return {{ ok: false, reason: 'scope element vanished' }};\n"
        ),
        None => "let root = null;\n".to_string(),
    };
    let collection = candidate_collection(locator);
    format!(
        "(() => {{\n\
           {descent}\
           const norm = (t) => (t || '').replace(/\\s+/g, ' ').trim();\n\
           {root}\
           {collection}\
           const view = doc.defaultView || window;\n\
           const hits = [];\n\
           candidates.slice(0, {SCAN_LIMIT}).forEach((el, index) => {{\n\
             el.setAttribute('{MARK_ATTR}', '{token}-' + index);\n\
             let visible = false;\n\
             try {{\n\
               const style = view.getComputedStyle(el);\n\
               const rect = el.getBoundingClientRect();\n\
               visible = style.visibility !== 'hidden' && style.display !== 'none' && rect.width > 0 && rect.height > 0;\n\
             }} catch (err) {{}}\n\
             const tag = el.tagName;\n\
             const enabled = !el.disabled && el.getAttribute('aria-disabled') !== 'true';\n\
             const editable = (tag === 'INPUT' || tag === 'TEXTAREA' || tag === 'SELECT')\n\
               ? (!el.disabled && !el.readOnly)\n\
               : el.isContentEditable === true;\n\
             const text = norm(el.innerText || el.textContent).slice(0, 200);\n\
             hits.push({{ index, visible, enabled, editable, text }});\n\
           }});\n\
           return {{ ok: true, hits }};\n\
         }})()"
    )
}

fn node_script(scope: &[String], marker: &str, body: &str) -> String {
    let descent = frame_descent(scope);
    format!(
        "(() => {{\n\
           {descent}\
           const el = doc.querySelector(\"[{MARK_ATTR}='{marker}']\");\n\
           if (!el) return {{ ok: false, reason: 'marked element vanished' }};\n\
           {body}\n\
         }})()"
    )
}

fn frame_names_script(scope: &[String]) -> String {
    let descent = frame_descent(scope);
    format!(
        "(() => {{\n\
           {descent}\
           const names = [];\n\
           const walk = (d) => {{\n\
             if (!d) return;\n\
             d.querySelectorAll('iframe').forEach((f) => {{\n\
               const name = f.name || f.getAttribute('name') || '';\n\
               if (name) names.push(name);\n\
               try {{ walk(f.contentDocument); }} catch (err) {{}}\n\
             }});\n\
           }};\n\
           walk(doc);\n\
           return names;\n\
         }})()"
    )
}

async fn mouse_click(page: &Page, x: f64, y: f64) -> SurfaceResult<()> {
    let down = DispatchMouseEventParams::builder()
        .r#type(DispatchMouseEventType::MousePressed)
        .x(x)
        .y(y)
        .button(MouseButton::Left)
        .click_count(1)
        .build()
        .map_err(SurfaceError::Configuration)?;
    page.execute(down).await?;
    sleep(Duration::from_millis(40)).await;
    let up = DispatchMouseEventParams::builder()
        .r#type(DispatchMouseEventType::MouseReleased)
        .x(x)
        .y(y)
        .button(MouseButton::Left)
        .click_count(1)
        .build()
        .map_err(SurfaceError::Configuration)?;
    page.execute(up).await?;
    Ok(())
}

async fn dispatch_chars(page: &Page, text: &str, delay: Duration) -> SurfaceResult<()> {
    for ch in text.chars() {
        let params = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::Char)
            .text(ch.to_string())
            .build()
            .map_err(SurfaceError::Configuration)?;
        page.execute(params).await?;
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
    Ok(())
}

async fn press_key(page: &Page, key: &str) -> SurfaceResult<()> {
    let (code, text, virtual_key_code) = match key {
        "Enter" => ("Enter", Some("\r"), Some(13)),
        "Tab" => ("Tab", Some("\t"), Some(9)),
        "Escape" => ("Escape", None, Some(27)),
        "Backspace" => ("Backspace", None, Some(8)),
        "ArrowUp" => ("ArrowUp", None, Some(38)),
        "ArrowDown" => ("ArrowDown", None, Some(40)),
        "ArrowLeft" => ("ArrowLeft", None, Some(37)),
        "ArrowRight" => ("ArrowRight", None, Some(39)),
        "Space" => ("Space", Some(" "), Some(32)),
        other => (other, None, None),
    };

    let mut down = DispatchKeyEventParams::builder()
        .r#type(DispatchKeyEventType::KeyDown)
        .key(key.to_string())
        .code(code.to_string());
    if let Some(vk) = virtual_key_code {
        down = down.windows_virtual_key_code(vk).native_virtual_key_code(vk);
    }
    page.execute(down.build().map_err(SurfaceError::Configuration)?)
        .await?;

    if let Some(text) = text {
        let char_event = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::Char)
            .key(key.to_string())
            .code(code.to_string())
            .text(text.to_string())
            .build()
            .map_err(SurfaceError::Configuration)?;
        page.execute(char_event).await?;
    }

    let mut up = DispatchKeyEventParams::builder()
        .r#type(DispatchKeyEventType::KeyUp)
        .key(key.to_string())
        .code(code.to_string());
    if let Some(vk) = virtual_key_code {
        up = up.windows_virtual_key_code(vk).native_virtual_key_code(vk);
    }
    page.execute(up.build().map_err(SurfaceError::Configuration)?)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_display_is_compact() {
        assert_eq!(Locator::css("button#tarjetas").to_string(), "button#tarjetas");
        assert_eq!(Locator::text("Niubiz").to_string(), "text=\"Niubiz\"");
        assert_eq!(
            Locator::any_text(["Adulto", "Adult"]).to_string(),
            "text~\"Adulto|Adult\""
        );
        assert_eq!(
            Locator::placeholder(["Card Number"]).to_string(),
            "placeholder(\"Card Number\")"
        );
        assert_eq!(
            Locator::within("div.wrapper", ["Pasajeros"]).to_string(),
            "within(div.wrapper, ~\"Pasajeros\")"
        );
        assert_eq!(
            Locator::within_exact("div", ["Nombre"]).to_string(),
            "within(div, =\"Nombre\")"
        );
    }

    #[test]
    fn within_exact_compares_whole_text() {
        let script = scan_script(&[], &Locator::within_exact("div", ["Nombre"]), "fb5", None);
        assert!(script.contains("const exact = true"));
        assert!(script.contains("t === n"));
        let script = scan_script(&[], &Locator::within("div", ["Niubiz"]), "fb6", None);
        assert!(script.contains("const exact = false"));
        assert!(script.contains("lower.includes"));
    }

    #[test]
    fn scan_script_embeds_marker_token() {
        let script = scan_script(&[], &Locator::css("button"), "fb7", None);
        assert!(script.contains("'fb7-' + index"));
        assert!(script.contains("querySelectorAll(\"button\")"));
        assert!(script.contains("return { ok: true, hits };"));
    }

    #[test]
    fn scan_script_descends_named_frames() {
        let scope = vec!["cardNumber".to_string()];
        let script = scan_script(&scope, &Locator::css("input"), "fb1", None);
        assert!(script.contains("\"cardNumber\""));
        assert!(script.contains("contentDocument"));
        assert!(script.contains("not reachable"));
    }

    #[test]
    fn scan_script_scopes_under_root_key() {
        let script = scan_script(&[], &Locator::css("button"), "fb2", Some("fb1-3"));
        assert!(script.contains("[data-fb-mark='fb1-3']"));
        assert!(script.contains("scope element vanished"));
    }

    #[test]
    fn text_locator_filters_to_smallest_match() {
        let locator = Locator::text("Continuar");
        let script = scan_script(&[], &locator, "fb3", None);
        assert!(script.contains("el.children"));
        assert!(script.contains("t === n"));
    }

    #[test]
    fn needles_are_json_escaped() {
        let locator = Locator::any_text(["He leído y \"acepto\""]);
        let script = scan_script(&[], &locator, "fb4", None);
        assert!(script.contains("\\\"acepto\\\""));
    }
}
