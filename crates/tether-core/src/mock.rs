//! In-memory driver.
//!
//! Implements the capability traits over a simulated element tree so the
//! engine, pool, and tool surface can be exercised without a browser:
//! attribute mutation, late-appearing elements, crash and disconnect
//! injection, dialog events, cookies, and local storage all behave enough
//! like the real thing for the integration suites.

use crate::driver::{
    Browser, BrowserContext, BrowserEvent, Cookie, DialogPolicy, Driver, DriverError, LoadState,
    Locator, Page, PageEvent, WaitState,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

const POLL: Duration = Duration::from_millis(10);

/// One simulated element.
#[derive(Debug, Clone)]
pub struct MockElement {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub role: Option<String>,
    pub name: Option<String>,
    pub label: Option<String>,
    pub test_id: Option<String>,
    pub text: String,
    pub value: String,
    pub checked: bool,
    pub visible: bool,
    pub inner_html: String,
    pub attributes: HashMap<String, String>,
    pub on_click: Vec<ClickEffect>,
}

impl MockElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            id: None,
            classes: Vec::new(),
            role: None,
            name: None,
            label: None,
            test_id: None,
            text: String::new(),
            value: String::new(),
            checked: false,
            visible: true,
            inner_html: String::new(),
            attributes: HashMap::new(),
            on_click: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_test_id(mut self, test_id: &str) -> Self {
        self.test_id = Some(test_id.to_string());
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = value.to_string();
        self
    }

    pub fn with_inner_html(mut self, html: &str) -> Self {
        self.inner_html = html.to_string();
        self
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn on_click(mut self, effect: ClickEffect) -> Self {
        self.on_click.push(effect);
        self
    }

    fn attr(&self, name: &str) -> Option<String> {
        match name {
            "id" => self.id.clone(),
            "class" => {
                if self.classes.is_empty() {
                    self.attributes.get(name).cloned()
                } else {
                    Some(self.classes.join(" "))
                }
            }
            "data-testid" => self
                .test_id
                .clone()
                .or_else(|| self.attributes.get(name).cloned()),
            "aria-label" => self.attributes.get(name).cloned(),
            _ => self.attributes.get(name).cloned(),
        }
    }

    fn describe(&self) -> String {
        match &self.id {
            Some(id) => format!("#{id}"),
            None => self.tag.clone(),
        }
    }
}

/// Side effects a click applies to the page model.
#[derive(Debug, Clone)]
pub enum ClickEffect {
    SetText { selector: String, text: String },
    SetValue { selector: String, value: String },
    Navigate { url: String },
    RemoveElement { selector: String },
    AddElement(MockElement),
}

struct PageModel {
    url: String,
    title: String,
    ready_state: String,
    elements: Vec<MockElement>,
    local_storage: HashMap<String, String>,
    history: Vec<String>,
    history_pos: usize,
    scroll: (i64, i64),
    clicks: Vec<String>,
    pressed: Vec<String>,
    crashed: bool,
    closed: bool,
}

/// Shared registry so tests can reach pages/browsers the runtime created.
#[derive(Default)]
pub struct MockHub {
    pages: Mutex<Vec<Arc<MockPage>>>,
    browsers: Mutex<Vec<Arc<MockBrowser>>>,
    documents: Mutex<HashMap<String, Vec<MockElement>>>,
}

impl MockHub {
    pub fn pages(&self) -> Vec<Arc<MockPage>> {
        self.pages.lock().unwrap().clone()
    }

    pub fn last_page(&self) -> Option<Arc<MockPage>> {
        self.pages.lock().unwrap().last().cloned()
    }

    pub fn browsers(&self) -> Vec<Arc<MockBrowser>> {
        self.browsers.lock().unwrap().clone()
    }

    /// Seed the element tree that `goto(url)` loads.
    pub fn register_document(&self, url: &str, elements: Vec<MockElement>) {
        self.documents
            .lock()
            .unwrap()
            .insert(url.to_string(), elements);
    }
}

pub struct MockPage {
    model: Mutex<PageModel>,
    events: broadcast::Sender<PageEvent>,
    dialog: Mutex<DialogPolicy>,
    programmed: Mutex<Vec<(String, Value)>>,
    hub: Arc<MockHub>,
    weak: std::sync::OnceLock<std::sync::Weak<MockPage>>,
}

impl MockPage {
    fn new(hub: Arc<MockHub>) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        let page = Arc::new(Self {
            model: Mutex::new(PageModel {
                url: "about:blank".to_string(),
                title: String::new(),
                ready_state: "complete".to_string(),
                elements: Vec::new(),
                local_storage: HashMap::new(),
                history: vec!["about:blank".to_string()],
                history_pos: 0,
                scroll: (0, 0),
                clicks: Vec::new(),
                pressed: Vec::new(),
                crashed: false,
                closed: false,
            }),
            events,
            dialog: Mutex::new(DialogPolicy::default()),
            programmed: Mutex::new(Vec::new()),
            hub: Arc::clone(&hub),
            weak: std::sync::OnceLock::new(),
        });
        let _ = page.weak.set(Arc::downgrade(&page));
        hub.pages.lock().unwrap().push(Arc::clone(&page));
        page
    }

    fn arc(&self) -> Arc<MockPage> {
        // Set in `new`; every MockPage lives behind an Arc.
        self.weak
            .get()
            .and_then(std::sync::Weak::upgrade)
            .expect("mock page outlived its arc")
    }

    // ----- test helpers -----

    pub fn add_element(&self, element: MockElement) {
        self.model.lock().unwrap().elements.push(element);
    }

    pub fn remove_matching(&self, css: &str) -> usize {
        let mut model = self.model.lock().unwrap();
        let before = model.elements.len();
        model.elements.retain(|el| !css_matches(el, css));
        before - model.elements.len()
    }

    pub fn set_attr(&self, css: &str, name: &str, value: Option<&str>) {
        let mut model = self.model.lock().unwrap();
        for el in model.elements.iter_mut().filter(|el| css_matches(el, css)) {
            match (name, value) {
                ("id", v) => el.id = v.map(str::to_string),
                ("data-testid", v) => el.test_id = v.map(str::to_string),
                (_, Some(v)) => {
                    el.attributes.insert(name.to_string(), v.to_string());
                }
                (_, None) => {
                    el.attributes.remove(name);
                }
            }
        }
    }

    pub fn set_element_text(&self, css: &str, text: &str) {
        let mut model = self.model.lock().unwrap();
        for el in model.elements.iter_mut().filter(|el| css_matches(el, css)) {
            el.text = text.to_string();
        }
    }

    pub fn element_value(&self, css: &str) -> Option<String> {
        let model = self.model.lock().unwrap();
        model
            .elements
            .iter()
            .find(|el| css_matches(el, css))
            .map(|el| el.value.clone())
    }

    pub fn element_text(&self, css: &str) -> Option<String> {
        let model = self.model.lock().unwrap();
        model
            .elements
            .iter()
            .find(|el| css_matches(el, css))
            .map(|el| el.text.clone())
    }

    pub fn clicks(&self) -> Vec<String> {
        self.model.lock().unwrap().clicks.clone()
    }

    pub fn scroll_position(&self) -> (i64, i64) {
        self.model.lock().unwrap().scroll
    }

    pub fn pressed_keys(&self) -> Vec<String> {
        self.model.lock().unwrap().pressed.clone()
    }

    pub fn local_storage(&self) -> HashMap<String, String> {
        self.model.lock().unwrap().local_storage.clone()
    }

    pub fn set_local_storage(&self, key: &str, value: &str) {
        self.model
            .lock()
            .unwrap()
            .local_storage
            .insert(key.to_string(), value.to_string());
    }

    /// Program an evaluate response: the first entry whose needle is a
    /// substring of the script wins.
    pub fn program_eval(&self, needle: &str, value: Value) {
        self.programmed
            .lock()
            .unwrap()
            .push((needle.to_string(), value));
    }

    pub fn emit_crash(&self) {
        {
            let mut model = self.model.lock().unwrap();
            model.crashed = true;
        }
        let _ = self.events.send(PageEvent::Crashed);
    }

    pub fn emit_dialog(&self, kind: &str, message: &str) {
        let _ = self.events.send(PageEvent::DialogOpened {
            kind: kind.to_string(),
            message: message.to_string(),
        });
    }

    pub fn dialog_policy(&self) -> DialogPolicy {
        *self.dialog.lock().unwrap()
    }

    // ----- internals -----

    fn guard(&self) -> Result<(), DriverError> {
        let model = self.model.lock().unwrap();
        if model.crashed || model.closed {
            return Err(DriverError::Closed);
        }
        Ok(())
    }

    fn apply_effects(&self, effects: Vec<ClickEffect>) {
        for effect in effects {
            match effect {
                ClickEffect::SetText { selector, text } => {
                    self.set_element_text(&selector, &text);
                }
                ClickEffect::SetValue { selector, value } => {
                    let mut model = self.model.lock().unwrap();
                    for el in model
                        .elements
                        .iter_mut()
                        .filter(|el| css_matches(el, &selector))
                    {
                        el.value = value.clone();
                    }
                }
                ClickEffect::Navigate { url } => {
                    let mut model = self.model.lock().unwrap();
                    let pos = model.history_pos + 1;
                    model.history.truncate(pos);
                    model.history.push(url.clone());
                    model.history_pos = model.history.len() - 1;
                    model.url = url;
                }
                ClickEffect::RemoveElement { selector } => {
                    self.remove_matching(&selector);
                }
                ClickEffect::AddElement(element) => {
                    self.add_element(element);
                }
            }
        }
    }

    fn eval_builtin(&self, script: &str) -> Value {
        {
            let programmed = self.programmed.lock().unwrap();
            if let Some((_, value)) = programmed
                .iter()
                .find(|(needle, _)| script.contains(needle.as_str()))
            {
                return value.clone();
            }
        }

        if script.contains("document.readyState") {
            return Value::String(self.model.lock().unwrap().ready_state.clone());
        }
        if script.contains("MutationObserver") {
            return Value::Bool(true);
        }
        if script.contains("localStorage.setItem") {
            if let Some(data) = extract_payload(script) {
                if let Ok(map) = serde_json::from_str::<HashMap<String, String>>(&data) {
                    self.model.lock().unwrap().local_storage.extend(map);
                }
            }
            return Value::Bool(true);
        }
        if script.contains("localStorage.key(") {
            let model = self.model.lock().unwrap();
            return json!(model.local_storage);
        }
        if script.contains("cloneNode") {
            let model = self.model.lock().unwrap();
            let text = model
                .elements
                .iter()
                .filter(|el| el.visible && !el.text.is_empty())
                .map(|el| el.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            return Value::String(text.split_whitespace().collect::<Vec<_>>().join(" "));
        }
        if script.contains("window.scrollBy") || script.contains("window.scrollTo") {
            let mut model = self.model.lock().unwrap();
            model.scroll.1 += 1;
            return Value::Null;
        }
        if script.starts_with("!!(") {
            return Value::Bool(false);
        }
        Value::Null
    }
}

// The restore script embeds its payload as `const data = {...};`.
fn extract_payload(script: &str) -> Option<String> {
    for line in script.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("const data = ") {
            return Some(rest.trim_end_matches(';').to_string());
        }
    }
    None
}

#[async_trait]
impl Page for MockPage {
    fn url(&self) -> String {
        self.model.lock().unwrap().url.clone()
    }

    async fn goto(
        &self,
        url: &str,
        _wait_until: LoadState,
        _timeout: Duration,
    ) -> Result<Option<u16>, DriverError> {
        self.guard()?;
        let document = self.hub.documents.lock().unwrap().get(url).cloned();
        let mut model = self.model.lock().unwrap();
        let pos = model.history_pos + 1;
        model.history.truncate(pos);
        model.history.push(url.to_string());
        model.history_pos = model.history.len() - 1;
        model.url = url.to_string();
        model.ready_state = "complete".to_string();
        model.elements = document.unwrap_or_default();
        Ok(Some(200))
    }

    async fn reload(&self, _timeout: Duration) -> Result<Option<u16>, DriverError> {
        self.guard()?;
        Ok(Some(200))
    }

    async fn go_back(&self, _timeout: Duration) -> Result<Option<u16>, DriverError> {
        self.guard()?;
        let mut model = self.model.lock().unwrap();
        if model.history_pos == 0 {
            return Err(DriverError::Navigation("no back entry".into()));
        }
        model.history_pos -= 1;
        model.url = model.history[model.history_pos].clone();
        Ok(Some(200))
    }

    async fn go_forward(&self, _timeout: Duration) -> Result<Option<u16>, DriverError> {
        self.guard()?;
        let mut model = self.model.lock().unwrap();
        if model.history_pos + 1 >= model.history.len() {
            return Err(DriverError::Navigation("no forward entry".into()));
        }
        model.history_pos += 1;
        model.url = model.history[model.history_pos].clone();
        Ok(Some(200))
    }

    async fn title(&self) -> Result<String, DriverError> {
        self.guard()?;
        Ok(self.model.lock().unwrap().title.clone())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, DriverError> {
        self.guard()?;
        Ok(self.eval_builtin(script))
    }

    fn locator(&self, css: &str) -> Arc<dyn Locator> {
        self.make_locator(Query::Css(css.to_string()))
    }

    fn by_role(&self, role: &str, name: Option<&str>) -> Arc<dyn Locator> {
        self.make_locator(Query::Role {
            role: role.to_string(),
            name: name.map(str::to_string),
        })
    }

    fn by_label(&self, text: &str) -> Arc<dyn Locator> {
        self.make_locator(Query::Label(text.to_string()))
    }

    fn by_text(&self, text: &str, exact: bool) -> Arc<dyn Locator> {
        self.make_locator(Query::Text {
            text: text.to_string(),
            exact,
        })
    }

    fn by_test_id(&self, id: &str) -> Arc<dyn Locator> {
        self.make_locator(Query::TestId(id.to_string()))
    }

    fn by_xpath(&self, expression: &str) -> Arc<dyn Locator> {
        self.make_locator(Query::Xpath(expression.to_string()))
    }

    async fn screenshot(&self, _full_page: bool) -> Result<Vec<u8>, DriverError> {
        self.guard()?;
        Ok(b"\x89PNG-mock".to_vec())
    }

    async fn pdf(&self) -> Result<Vec<u8>, DriverError> {
        self.guard()?;
        Ok(b"%PDF-mock".to_vec())
    }

    async fn wait_for_url(&self, fragment: &str, timeout: Duration) -> Result<(), DriverError> {
        let started = std::time::Instant::now();
        loop {
            self.guard()?;
            if self.url().contains(fragment) {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(DriverError::Timeout(format!("url fragment {fragment}")));
            }
            tokio::time::sleep(POLL).await;
        }
    }

    async fn wait_for_load_state(
        &self,
        _state: LoadState,
        _timeout: Duration,
    ) -> Result<(), DriverError> {
        self.guard()?;
        Ok(())
    }

    fn set_dialog_policy(&self, policy: DialogPolicy) {
        *self.dialog.lock().unwrap() = policy;
    }

    fn events(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    fn is_closed(&self) -> bool {
        let model = self.model.lock().unwrap();
        model.closed || model.crashed
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.model.lock().unwrap().closed = true;
        let _ = self.events.send(PageEvent::Closed);
        Ok(())
    }
}

impl MockPage {
    fn make_locator(&self, query: Query) -> Arc<dyn Locator> {
        Arc::new(MockLocator {
            page: self.arc(),
            query,
            index: None,
        })
    }
}

#[derive(Debug, Clone)]
enum Query {
    Css(String),
    Role { role: String, name: Option<String> },
    Label(String),
    Text { text: String, exact: bool },
    TestId(String),
    Xpath(String),
}

struct MockLocator {
    page: Arc<MockPage>,
    query: Query,
    index: Option<usize>,
}

impl MockLocator {
    fn matches(&self) -> Vec<usize> {
        let model = self.page.model.lock().unwrap();
        model
            .elements
            .iter()
            .enumerate()
            .filter(|(_, el)| query_matches(el, &self.query))
            .map(|(i, _)| i)
            .collect()
    }

    fn target(&self) -> Option<usize> {
        let matches = self.matches();
        matches.get(self.index.unwrap_or(0)).copied()
    }

    fn with_element<R>(
        &self,
        f: impl FnOnce(&mut MockElement) -> R,
    ) -> Result<R, DriverError> {
        let position = self
            .target()
            .ok_or_else(|| DriverError::Detached(format!("{:?}", self.query)))?;
        let mut model = self.page.model.lock().unwrap();
        let element = model
            .elements
            .get_mut(position)
            .ok_or_else(|| DriverError::Detached(format!("{:?}", self.query)))?;
        Ok(f(element))
    }

    fn state_satisfied(&self, state: WaitState) -> bool {
        let model = self.page.model.lock().unwrap();
        let mut matched = model
            .elements
            .iter()
            .filter(|el| query_matches(el, &self.query));
        match state {
            WaitState::Visible => matched.any(|el| el.visible),
            WaitState::Hidden => !matched.any(|el| el.visible),
            WaitState::Attached => matched.next().is_some(),
            WaitState::Detached => matched.next().is_none(),
        }
    }
}

#[async_trait]
impl Locator for MockLocator {
    async fn count(&self) -> Result<usize, DriverError> {
        self.page.guard()?;
        Ok(self.matches().len())
    }

    async fn wait_for(&self, state: WaitState, timeout: Duration) -> Result<(), DriverError> {
        let started = std::time::Instant::now();
        loop {
            self.page.guard()?;
            if self.state_satisfied(state) {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(DriverError::Timeout(format!(
                    "{:?} did not reach {state:?}",
                    self.query
                )));
            }
            tokio::time::sleep(POLL).await;
        }
    }

    async fn click(&self) -> Result<(), DriverError> {
        self.page.guard()?;
        let (effects, description) = self.with_element(|el| {
            if !el.visible {
                return Err(DriverError::Other(format!(
                    "element not visible: {}",
                    el.describe()
                )));
            }
            Ok((el.on_click.clone(), el.describe()))
        })??;
        self.page.model.lock().unwrap().clicks.push(description);
        self.page.apply_effects(effects);
        Ok(())
    }

    async fn fill(&self, text: &str) -> Result<(), DriverError> {
        self.page.guard()?;
        self.with_element(|el| el.value = text.to_string())
    }

    async fn type_text(&self, text: &str, delay: Duration) -> Result<(), DriverError> {
        self.page.guard()?;
        // Bounded sleep; per-keystroke pacing is irrelevant in the mock.
        tokio::time::sleep(delay.min(Duration::from_millis(20))).await;
        self.with_element(|el| {
            el.value.push_str(text);
        })
    }

    async fn press(&self, key: &str) -> Result<(), DriverError> {
        self.page.guard()?;
        self.page.model.lock().unwrap().pressed.push(key.to_string());
        Ok(())
    }

    async fn set_checked(&self, checked: bool) -> Result<(), DriverError> {
        self.page.guard()?;
        self.with_element(|el| el.checked = checked)
    }

    async fn select_option(&self, value: &str) -> Result<(), DriverError> {
        self.page.guard()?;
        self.with_element(|el| el.value = value.to_string())
    }

    async fn hover(&self) -> Result<(), DriverError> {
        self.page.guard()?;
        self.with_element(|_| ())
    }

    async fn drag_to(&self, _target: Arc<dyn Locator>) -> Result<(), DriverError> {
        self.page.guard()?;
        self.with_element(|_| ())
    }

    async fn scroll_into_view(&self) -> Result<(), DriverError> {
        self.page.guard()?;
        self.with_element(|_| ())
    }

    async fn text_content(&self) -> Result<Option<String>, DriverError> {
        self.page.guard()?;
        self.with_element(|el| Some(el.text.clone()))
    }

    async fn inner_html(&self) -> Result<String, DriverError> {
        self.page.guard()?;
        self.with_element(|el| el.inner_html.clone())
    }

    async fn input_value(&self) -> Result<String, DriverError> {
        self.page.guard()?;
        self.with_element(|el| el.value.clone())
    }

    async fn get_attribute(&self, name: &str) -> Result<Option<String>, DriverError> {
        self.page.guard()?;
        self.with_element(|el| el.attr(name))
    }

    async fn is_visible(&self) -> Result<bool, DriverError> {
        self.page.guard()?;
        Ok(self
            .target()
            .map(|pos| {
                let model = self.page.model.lock().unwrap();
                model.elements.get(pos).is_some_and(|el| el.visible)
            })
            .unwrap_or(false))
    }

    async fn evaluate(&self, script: &str) -> Result<Value, DriverError> {
        self.page.guard()?;
        if script.contains("el.tagName") {
            return self.with_element(|el| Value::String(el.tag.clone()));
        }
        if script.contains("el.checked") {
            return self.with_element(|el| Value::Bool(el.checked));
        }
        if script.contains("getOwnPropertyDescriptor") || script.contains("ClipboardEvent") {
            if let Some(payload) = script
                .lines()
                .find_map(|l| l.trim().strip_prefix("const text = "))
            {
                let text: String =
                    serde_json::from_str(payload.trim_end_matches(';')).unwrap_or_default();
                return self.with_element(|el| {
                    el.value = text.clone();
                    Value::String(el.value.clone())
                });
            }
        }
        Ok(Value::Null)
    }

    fn nth(&self, index: usize) -> Arc<dyn Locator> {
        Arc::new(MockLocator {
            page: Arc::clone(&self.page),
            query: self.query.clone(),
            index: Some(index),
        })
    }
}

fn implicit_role(tag: &str) -> Option<&'static str> {
    match tag {
        "button" => Some("button"),
        "a" => Some("link"),
        "option" => Some("option"),
        "select" => Some("combobox"),
        "input" => Some("textbox"),
        "textarea" => Some("textbox"),
        _ => None,
    }
}

fn query_matches(el: &MockElement, query: &Query) -> bool {
    match query {
        Query::Css(selector) => css_matches(el, selector),
        Query::Role { role, name } => {
            let actual = el.role.as_deref().or_else(|| implicit_role(&el.tag));
            if actual != Some(role.as_str()) {
                return false;
            }
            match name {
                None => true,
                Some(expected) => {
                    el.name.as_deref() == Some(expected.as_str())
                        || el.text.trim() == expected.as_str()
                }
            }
        }
        Query::Label(text) => el.label.as_deref() == Some(text.as_str()),
        Query::Text { text, exact } => {
            if *exact {
                el.text.trim() == text.as_str()
            } else {
                el.text.contains(text.as_str())
            }
        }
        Query::TestId(id) => el.test_id.as_deref() == Some(id.as_str()),
        // XPath has no mock implementation; strategies using it never match.
        Query::Xpath(_) => false,
    }
}

/// Minimal CSS matching: comma lists, descendant chains (only the last
/// simple selector is checked), `tag`, `#id`, `.class`, and `[attr='v']` /
/// `[attr*='v']` filters.
pub fn css_matches(el: &MockElement, selector: &str) -> bool {
    split_outside_brackets(selector, ',')
        .iter()
        .any(|part| simple_matches(el, last_segment(part)))
}

fn last_segment(part: &str) -> &str {
    split_outside_brackets(part, ' ')
        .into_iter()
        .filter(|s| !s.is_empty())
        .last()
        .unwrap_or(part)
}

fn split_outside_brackets(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '\'' | '"' => in_quote = !in_quote,
            '[' if !in_quote => depth += 1,
            ']' if !in_quote => depth = depth.saturating_sub(1),
            c if c == separator && depth == 0 && !in_quote => {
                parts.push(input[start..i].trim());
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(input[start..].trim());
    parts
}

fn simple_matches(el: &MockElement, selector: &str) -> bool {
    let selector = selector.trim();
    if selector.is_empty() {
        return false;
    }

    let (base, filters) = split_attr_filters(selector);
    if !base_matches(el, base) {
        return false;
    }
    filters.iter().all(|filter| attr_filter_matches(el, filter))
}

fn split_attr_filters(selector: &str) -> (&str, Vec<&str>) {
    match selector.find('[') {
        None => (selector, Vec::new()),
        Some(first) => {
            let base = &selector[..first];
            let mut filters = Vec::new();
            let mut rest = &selector[first..];
            while let Some(open) = rest.find('[') {
                let Some(close) = rest[open..].find(']') else {
                    break;
                };
                filters.push(&rest[open + 1..open + close]);
                rest = &rest[open + close + 1..];
            }
            (base, filters)
        }
    }
}

fn base_matches(el: &MockElement, base: &str) -> bool {
    if base.is_empty() || base == "*" {
        return true;
    }
    let mut tag = String::new();
    let mut id = None;
    let mut classes = Vec::new();
    let mut mode = 't';
    let mut current = String::new();
    for c in base.chars() {
        match c {
            '#' | '.' => {
                flush(&mut mode, &mut current, &mut tag, &mut id, &mut classes);
                mode = if c == '#' { 'i' } else { 'c' };
            }
            ':' => break, // pseudo-classes are ignored
            c => current.push(c),
        }
    }
    flush(&mut mode, &mut current, &mut tag, &mut id, &mut classes);

    if !tag.is_empty() && tag != el.tag {
        return false;
    }
    if let Some(id) = id {
        if el.id.as_deref() != Some(id.as_str()) {
            return false;
        }
    }
    classes
        .iter()
        .all(|class| el.classes.iter().any(|c| c == class))
}

fn flush(
    mode: &mut char,
    current: &mut String,
    tag: &mut String,
    id: &mut Option<String>,
    classes: &mut Vec<String>,
) {
    if current.is_empty() {
        return;
    }
    match mode {
        't' => *tag = current.clone(),
        'i' => *id = Some(current.clone()),
        _ => classes.push(current.clone()),
    }
    current.clear();
}

fn attr_filter_matches(el: &MockElement, filter: &str) -> bool {
    let (name, op, expected) = if let Some(pos) = filter.find("*=") {
        (&filter[..pos], '*', &filter[pos + 2..])
    } else if let Some(pos) = filter.find('=') {
        (&filter[..pos], '=', &filter[pos + 1..])
    } else {
        // Bare [attr] presence check.
        return el.attr(filter.trim()).is_some();
    };
    let expected = expected.trim().trim_matches('\'').trim_matches('"');
    let Some(actual) = el.attr(name.trim()) else {
        return false;
    };
    match op {
        '*' => actual.contains(expected),
        _ => actual == expected,
    }
}

pub struct MockContext {
    pages: Mutex<Vec<Arc<MockPage>>>,
    cookies: Mutex<Vec<Cookie>>,
    closed: AtomicBool,
    hub: Arc<MockHub>,
}

#[async_trait]
impl BrowserContext for MockContext {
    async fn new_page(&self) -> Result<Arc<dyn Page>, DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        let page = MockPage::new(Arc::clone(&self.hub));
        self.pages.lock().unwrap().push(Arc::clone(&page));
        Ok(page)
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, DriverError> {
        Ok(self.cookies.lock().unwrap().clone())
    }

    async fn add_cookies(&self, cookies: Vec<Cookie>) -> Result<(), DriverError> {
        self.cookies.lock().unwrap().extend(cookies);
        Ok(())
    }

    async fn clear_cookies(&self) -> Result<(), DriverError> {
        self.cookies.lock().unwrap().clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.closed.store(true, Ordering::SeqCst);
        let pages: Vec<Arc<MockPage>> = self.pages.lock().unwrap().clone();
        for page in pages {
            let _ = page.close().await;
        }
        Ok(())
    }
}

pub struct MockBrowser {
    contexts: Mutex<Vec<Arc<MockContext>>>,
    events: broadcast::Sender<BrowserEvent>,
    hub: Arc<MockHub>,
}

impl MockBrowser {
    pub fn emit_disconnected(&self) {
        let _ = self.events.send(BrowserEvent::Disconnected);
    }
}

#[async_trait]
impl Browser for MockBrowser {
    async fn new_context(&self) -> Result<Arc<dyn BrowserContext>, DriverError> {
        let context = Arc::new(MockContext {
            pages: Mutex::new(Vec::new()),
            cookies: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            hub: Arc::clone(&self.hub),
        });
        self.contexts.lock().unwrap().push(Arc::clone(&context));
        Ok(context)
    }

    fn events(&self) -> broadcast::Receiver<BrowserEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> Result<(), DriverError> {
        let contexts: Vec<Arc<MockContext>> = self.contexts.lock().unwrap().clone();
        for context in contexts {
            let _ = context.close().await;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockDriver {
    hub: Arc<MockHub>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hub(&self) -> Arc<MockHub> {
        Arc::clone(&self.hub)
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn launch(&self) -> Result<Arc<dyn Browser>, DriverError> {
        let (events, _) = broadcast::channel(16);
        let browser = Arc::new(MockBrowser {
            contexts: Mutex::new(Vec::new()),
            events,
            hub: Arc::clone(&self.hub),
        });
        self.hub.browsers.lock().unwrap().push(Arc::clone(&browser));
        Ok(browser)
    }
}
