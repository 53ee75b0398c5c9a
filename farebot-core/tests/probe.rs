use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use farebot_core::{
    Locator, PollBudget, Probe, ProbeError, SurfaceError, SurfaceResult, UiNode, UiSurface,
};
use regex::Regex;

/// Scripted element for the fake surface below.
#[derive(Clone)]
struct NodeSpec {
    key: String,
    selectors: Vec<String>,
    text: String,
    placeholder: Option<String>,
    visible: bool,
    /// Element stays hidden until the surface has served this many queries,
    /// simulating a late render.
    visible_from: Option<u32>,
    enabled: bool,
    editable: bool,
    fail_plain_click: bool,
    children: Vec<NodeSpec>,
}

impl NodeSpec {
    fn new(key: &str) -> Self {
        NodeSpec {
            key: key.to_string(),
            selectors: Vec::new(),
            text: String::new(),
            placeholder: None,
            visible: true,
            visible_from: None,
            enabled: true,
            editable: false,
            fail_plain_click: false,
            children: Vec::new(),
        }
    }

    fn selector(mut self, css: &str) -> Self {
        self.selectors.push(css.to_string());
        self
    }

    fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    fn placeholder(mut self, text: &str) -> Self {
        self.placeholder = Some(text.to_string());
        self
    }

    fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn editable(mut self) -> Self {
        self.editable = true;
        self
    }

    fn appears_after(mut self, queries: u32) -> Self {
        self.visible_from = Some(queries);
        self
    }

    fn failing_plain_click(mut self) -> Self {
        self.fail_plain_click = true;
        self
    }

    fn child(mut self, child: NodeSpec) -> Self {
        self.children.push(child);
        self
    }
}

#[derive(Default)]
struct SurfaceState {
    nodes: RefCell<Vec<NodeSpec>>,
    urls: RefCell<Vec<String>>,
    url_cursor: Cell<usize>,
    query_count: Cell<u32>,
    frames: RefCell<BTreeMap<String, FakeSurface>>,
    closed: Cell<bool>,
    log: Rc<RefCell<Vec<String>>>,
}

/// Scripted [`UiSurface`]: answers queries from registered [`NodeSpec`]s
/// and records every action it is asked to perform.
#[derive(Clone, Default)]
struct FakeSurface {
    state: Rc<SurfaceState>,
}

impl FakeSurface {
    fn add(&self, spec: NodeSpec) {
        self.state.nodes.borrow_mut().push(spec);
    }

    fn set_urls(&self, urls: &[&str]) {
        *self.state.urls.borrow_mut() = urls.iter().map(|u| u.to_string()).collect();
        self.state.url_cursor.set(0);
    }

    fn add_frame(&self, name: &str) -> FakeSurface {
        let child = FakeSurface::default();
        self.state
            .frames
            .borrow_mut()
            .insert(name.to_string(), child.clone());
        child
    }

    fn close(&self) {
        self.state.closed.set(true);
    }

    fn log(&self) -> Vec<String> {
        self.state.log.borrow().clone()
    }

    fn queries(&self) -> u32 {
        self.state.query_count.get()
    }

    fn ensure_open(&self) -> SurfaceResult<()> {
        if self.state.closed.get() {
            Err(SurfaceError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn select(&self, specs: &[NodeSpec], locator: &Locator, tick: u32) -> Vec<Box<dyn UiNode>> {
        specs
            .iter()
            .filter(|spec| matches_locator(spec, locator))
            .map(|spec| {
                let mut resolved = spec.clone();
                resolved.visible =
                    spec.visible && spec.visible_from.map_or(true, |from| tick >= from);
                Box::new(FakeNode {
                    spec: resolved,
                    log: Rc::clone(&self.state.log),
                }) as Box<dyn UiNode>
            })
            .collect()
    }
}

fn matches_locator(spec: &NodeSpec, locator: &Locator) -> bool {
    match locator {
        Locator::Css(css) => css_match(spec, css),
        Locator::Text { needles, exact } => text_match(&spec.text, needles, *exact),
        Locator::Within { css, needles, exact } => {
            css_match(spec, css) && text_match(&spec.text, needles, *exact)
        }
        Locator::Placeholder { needles } => match &spec.placeholder {
            Some(placeholder) => {
                let lower = placeholder.to_lowercase();
                needles.iter().any(|needle| lower.contains(&needle.to_lowercase()))
            }
            None => false,
        },
    }
}

fn css_match(spec: &NodeSpec, css: &str) -> bool {
    css.split(',')
        .map(str::trim)
        .any(|fragment| spec.selectors.iter().any(|selector| selector == fragment))
}

fn text_match(text: &str, needles: &[String], exact: bool) -> bool {
    if exact {
        needles.iter().any(|needle| needle == text)
    } else {
        let lower = text.to_lowercase();
        needles.iter().any(|needle| lower.contains(&needle.to_lowercase()))
    }
}

fn find_spec<'a>(specs: &'a [NodeSpec], key: &str) -> Option<&'a NodeSpec> {
    for spec in specs {
        if spec.key == key {
            return Some(spec);
        }
        if let Some(found) = find_spec(&spec.children, key) {
            return Some(found);
        }
    }
    None
}

struct FakeNode {
    spec: NodeSpec,
    log: Rc<RefCell<Vec<String>>>,
}

impl FakeNode {
    fn record(&self, entry: String) {
        self.log.borrow_mut().push(entry);
    }
}

#[async_trait(?Send)]
impl UiNode for FakeNode {
    fn visible(&self) -> bool {
        self.spec.visible
    }

    fn enabled(&self) -> bool {
        self.spec.enabled
    }

    fn editable(&self) -> bool {
        self.spec.editable
    }

    fn text(&self) -> &str {
        &self.spec.text
    }

    fn key(&self) -> &str {
        &self.spec.key
    }

    async fn click(&self) -> SurfaceResult<()> {
        if self.spec.fail_plain_click {
            return Err(SurfaceError::Script("click intercepted by overlay".to_string()));
        }
        self.record(format!("click {}", self.spec.key));
        Ok(())
    }

    async fn force_click(&self) -> SurfaceResult<()> {
        self.record(format!("force_click {}", self.spec.key));
        Ok(())
    }

    async fn dispatch_click(&self) -> SurfaceResult<()> {
        self.record(format!("dispatch_click {}", self.spec.key));
        Ok(())
    }

    async fn fill(&self, value: &str) -> SurfaceResult<()> {
        self.record(format!("fill {}={}", self.spec.key, value));
        Ok(())
    }

    async fn type_chars(&self, value: &str, _delay: Duration) -> SurfaceResult<()> {
        self.record(format!("type {}={}", self.spec.key, value));
        Ok(())
    }

    async fn focus(&self) -> SurfaceResult<()> {
        Ok(())
    }

    async fn scroll_into_view(&self) -> SurfaceResult<()> {
        Ok(())
    }

    async fn input_value(&self) -> SurfaceResult<String> {
        Ok(String::new())
    }

    async fn attribute(&self, _name: &str) -> SurfaceResult<Option<String>> {
        Ok(None)
    }
}

#[async_trait(?Send)]
impl UiSurface for FakeSurface {
    async fn navigate(&self, url: &str) -> SurfaceResult<()> {
        self.state.log.borrow_mut().push(format!("navigate {url}"));
        Ok(())
    }

    async fn current_url(&self) -> SurfaceResult<String> {
        self.ensure_open()?;
        let urls = self.state.urls.borrow();
        if urls.is_empty() {
            return Ok("about:blank".to_string());
        }
        let cursor = self.state.url_cursor.get();
        let index = cursor.min(urls.len() - 1);
        self.state.url_cursor.set(cursor + 1);
        Ok(urls[index].clone())
    }

    async fn query(&self, locator: &Locator) -> SurfaceResult<Vec<Box<dyn UiNode>>> {
        self.ensure_open()?;
        let tick = self.state.query_count.get() + 1;
        self.state.query_count.set(tick);
        Ok(self.select(&self.state.nodes.borrow(), locator, tick))
    }

    async fn query_within(
        &self,
        key: &str,
        locator: &Locator,
    ) -> SurfaceResult<Vec<Box<dyn UiNode>>> {
        self.ensure_open()?;
        let tick = self.state.query_count.get();
        let nodes = self.state.nodes.borrow();
        match find_spec(&nodes, key) {
            Some(parent) => Ok(self.select(&parent.children, locator, tick)),
            None => Ok(Vec::new()),
        }
    }

    fn frame(&self, name: &str) -> Box<dyn UiSurface> {
        let frames = self.state.frames.borrow();
        match frames.get(name) {
            Some(child) => Box::new(child.clone()),
            None => Box::<FakeSurface>::default(),
        }
    }

    async fn frame_names(&self) -> SurfaceResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.state.frames.borrow().keys().cloned().collect())
    }

    async fn press_key(&self, key: &str) -> SurfaceResult<()> {
        self.state.log.borrow_mut().push(format!("press {key}"));
        Ok(())
    }

    async fn type_text(&self, text: &str, _delay: Duration) -> SurfaceResult<()> {
        self.state.log.borrow_mut().push(format!("type_text {text}"));
        Ok(())
    }

    async fn click_at(&self, x: f64, y: f64) -> SurfaceResult<()> {
        self.state
            .log
            .borrow_mut()
            .push(format!("click_at {x},{y}"));
        Ok(())
    }

    async fn screenshot(&self, _full_page: bool) -> SurfaceResult<Vec<u8>> {
        Ok(vec![0u8; 4])
    }

    async fn page_html(&self) -> SurfaceResult<String> {
        Ok("<html></html>".to_string())
    }

    fn headless(&self) -> bool {
        false
    }

    async fn suspend_for_operator(&self, reason: &str) -> SurfaceResult<()> {
        self.state.log.borrow_mut().push(format!("suspend {reason}"));
        Ok(())
    }
}

#[tokio::test]
async fn find_visible_skips_hidden_matches() {
    let surface = FakeSurface::default();
    surface.add(
        NodeSpec::new("hidden-continue")
            .selector("button")
            .text("Continuar")
            .hidden(),
    );
    surface.add(
        NodeSpec::new("visible-continue")
            .selector("button")
            .text("Continuar"),
    );

    let probe = Probe::new(&surface);
    let node = probe
        .find_visible(
            "the continue button",
            &[Locator::within("button", ["Continuar"])],
            PollBudget::from_millis(500),
        )
        .await
        .unwrap();

    assert_eq!(node.key(), "visible-continue");
    assert_eq!(surface.queries(), 1);
}

#[tokio::test(start_paused = true)]
async fn find_visible_reports_budget_exhaustion() {
    let surface = FakeSurface::default();
    let probe = Probe::new(&surface);

    let err = probe
        .find_visible(
            "the save button",
            &[Locator::css("#save")],
            PollBudget::from_millis(2_000),
        )
        .await
        .unwrap_err();

    match err {
        ProbeError::ElementNotFound(what) => {
            assert!(what.contains("the save button"), "got: {what}");
            assert!(what.contains("2s"), "got: {what}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn find_visible_picks_up_late_renders() {
    let surface = FakeSurface::default();
    surface.add(NodeSpec::new("spinner-gated").selector("#pay").appears_after(4));

    let probe = Probe::new(&surface);
    let node = probe
        .find_visible(
            "the pay button",
            &[Locator::css("#pay")],
            PollBudget::from_millis(5_000),
        )
        .await
        .unwrap();

    assert_eq!(node.key(), "spinner-gated");
    assert!(surface.queries() >= 4);
}

#[tokio::test]
async fn fill_any_skips_uneditable_fields_unless_required() {
    let surface = FakeSurface::default();
    surface.add(
        NodeSpec::new("email")
            .selector("input#email")
            .editable()
            .disabled(),
    );
    surface.add(NodeSpec::new("name").selector("input#name").editable());

    let probe = Probe::new(&surface);
    let skipped = probe
        .fill_any("the email field", &[Locator::css("input#email")], "a@b.cl", false)
        .await
        .unwrap();
    assert!(!skipped.applied());
    assert!(surface.log().is_empty());

    let err = probe
        .fill_any("the email field", &[Locator::css("input#email")], "a@b.cl", true)
        .await
        .unwrap_err();
    assert!(matches!(err, ProbeError::ElementNotFound(what) if what.contains("not editable")));

    let applied = probe
        .fill_any("the name field", &[Locator::css("input#name")], "Juan", true)
        .await
        .unwrap();
    assert!(applied.applied());
    assert_eq!(surface.log(), vec!["fill name=Juan".to_string()]);
}

#[tokio::test]
async fn click_required_fails_when_nothing_is_visible() {
    let surface = FakeSurface::default();
    surface.add(NodeSpec::new("buy").selector("#buy").hidden());

    let probe = Probe::new(&surface);
    assert!(!probe.click_any(&[Locator::css("#buy")], false).await.unwrap());

    let err = probe
        .click_required("the buy button", &[Locator::css("#buy")], false)
        .await
        .unwrap_err();
    assert!(matches!(err, ProbeError::ElementNotFound(what) if what == "the buy button"));
    assert!(surface.log().is_empty());
}

#[tokio::test]
async fn click_escalating_falls_back_to_coordinates() {
    let surface = FakeSurface::default();
    surface.add(
        NodeSpec::new("covered")
            .selector("#covered")
            .failing_plain_click(),
    );

    let probe = Probe::new(&surface);
    let nodes = probe.query_tick(&Locator::css("#covered")).await.unwrap();
    probe.click_escalating(nodes[0].as_ref()).await.unwrap();

    assert_eq!(surface.log(), vec!["force_click covered".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn wait_for_url_sees_late_navigation() {
    let pattern = Regex::new(".*checkout").unwrap();

    let surface = FakeSurface::default();
    surface.set_urls(&[
        "https://store.test/flights",
        "https://store.test/flights",
        "https://store.test/checkout?step=1",
    ]);
    let probe = Probe::new(&surface);
    assert!(probe
        .wait_for_url(&pattern, PollBudget::from_millis(2_000))
        .await
        .unwrap());

    let stuck = FakeSurface::default();
    stuck.set_urls(&["https://store.test/flights"]);
    let probe = Probe::new(&stuck);
    assert!(!probe
        .wait_for_url(&pattern, PollBudget::from_millis(1_000))
        .await
        .unwrap());
}

#[tokio::test]
async fn counter_increment_prefers_the_specific_row() {
    let surface = FakeSurface::default();
    surface.add(
        NodeSpec::new("panel")
            .selector("div")
            .text("Pasajeros Adultos Niños Infantes")
            .child(NodeSpec::new("plus-panel-1").selector("button").text("+"))
            .child(NodeSpec::new("plus-panel-2").selector("button").text("+"))
            .child(NodeSpec::new("plus-panel-3").selector("button").text("+")),
    );
    surface.add(
        NodeSpec::new("adults-row")
            .selector("li")
            .text("Adultos")
            .child(NodeSpec::new("plus-adults").selector("button").text("+")),
    );

    let probe = Probe::new(&surface);
    assert!(probe.click_counter_increment(&["Adultos"]).await.unwrap());
    assert_eq!(surface.log(), vec!["click plus-adults".to_string()]);
}

#[tokio::test]
async fn dropdown_selection_falls_back_to_case_insensitive_match() {
    let surface = FakeSurface::default();
    surface.add(NodeSpec::new("opt-dni").selector("li").text("DNI"));

    let probe = Probe::new(&surface);
    assert!(probe.select_dropdown_option("dni").await.unwrap());
    assert_eq!(surface.log(), vec!["click opt-dni".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn card_field_is_found_across_frames() {
    let surface = FakeSurface::default();
    let frame = surface.add_frame("gateway-widget");
    frame.add(
        NodeSpec::new("card-number")
            .placeholder("Número de Tarjeta")
            .editable(),
    );

    let probe = Probe::new(&surface);
    let found = probe
        .find_in_any_frame(
            &Locator::placeholder(["Número de Tarjeta", "Card Number"]),
            5,
            Duration::from_millis(200),
        )
        .await
        .unwrap();

    assert_eq!(found.unwrap().key(), "card-number");
}

#[tokio::test]
async fn closed_session_stops_polling_immediately() {
    let surface = FakeSurface::default();
    surface.close();

    let probe = Probe::new(&surface);
    let err = probe
        .find_visible(
            "anything",
            &[Locator::css("#x")],
            PollBudget::from_millis(10_000),
        )
        .await
        .unwrap_err();

    assert!(err.is_session_closed());
}
