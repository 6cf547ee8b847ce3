//! Page drivers behind the browser traits
//!
//! [`HtmlBrowser`] fetches pages with `reqwest` and queries them with
//! `scraper`. There is no script runtime: documents are complete once
//! fetched, so element waits return at once and their timeouts do not
//! apply. Clicking follows links and submits forms, which covers
//! server-rendered result lists ("load more" as a next-page link) and the
//! CAPTCHA form, but not controls wired up by JavaScript. The live site
//! needs [`ChromeBrowser`] (feature `browser`).
//!
//! `scraper::Html` is not `Send`, so only the raw markup is stored and every
//! operation re-parses it inside a synchronous scope.

#[cfg(feature = "browser")]
mod chrome;

#[cfg(feature = "browser")]
pub use chrome::{ChromeBrowser, ChromeOptions, ChromePage};

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use ego_tree::NodeId;
use reqwest::{Client, Url};
use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;

use crate::extract::normalize_text;
use crate::traits::{BrowserPage, BrowserSession, ElementHandle};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

const BLOCK_TAGS: [&str; 16] = [
    "address", "article", "br", "dd", "div", "dl", "dt", "footer", "h1", "h2", "h3", "h4", "li",
    "p", "section", "tr",
];

/// Opens [`HtmlPage`]s sharing one cookie jar
#[derive(Clone)]
pub struct HtmlBrowser {
    client: Client,
}

impl HtmlBrowser {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl BrowserSession for HtmlBrowser {
    async fn open_page(&self) -> Result<Box<dyn BrowserPage>> {
        Ok(Box::new(HtmlPage::new(self.client.clone())))
    }
}

#[derive(Default)]
struct PageState {
    url: Option<Url>,
    html: String,
    removed: HashSet<NodeId>,
    filled: HashMap<NodeId, String>,
}

enum ClickAction {
    Navigate(Url),
    Submit {
        url: Url,
        post: bool,
        fields: Vec<(String, String)>,
    },
}

pub struct HtmlPage {
    client: Client,
    state: Mutex<PageState>,
}

impl HtmlPage {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            state: Mutex::new(PageState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(&self, url: Url, html: String) {
        let mut state = self.state();
        state.url = Some(url);
        state.html = html;
        state.removed.clear();
        state.filled.clear();
    }

    async fn fetch(&self, request: reqwest::RequestBuilder) -> Result<()> {
        let response = request.send().await?;
        if !response.status().is_success() {
            bail!(
                "Failed to fetch {}: {}",
                response.url(),
                response.status()
            );
        }

        let url = response.url().clone();
        let html = response.text().await?;
        debug!("Loaded {} ({} bytes)", url, html.len());
        self.load(url, html);
        Ok(())
    }

    /// Run `f` against the parsed document and the page's DOM edits
    fn with_document<T>(&self, f: impl FnOnce(&Html, &PageState) -> Result<T>) -> Result<T> {
        let state = self.state();
        let document = Html::parse_document(&state.html);
        f(&document, &state)
    }

    fn with_element<T>(
        &self,
        handle: &ElementHandle,
        f: impl FnOnce(ElementRef<'_>, &PageState) -> T,
    ) -> Result<Option<T>> {
        self.with_document(|document, state| {
            Ok(resolve(document, handle)?
                .filter(|element| !state.removed.contains(&element.id()))
                .map(|element| f(element, state)))
        })
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow!("Failed to parse selector {selector}: {e:?}"))
}

fn resolve<'a>(document: &'a Html, handle: &ElementHandle) -> Result<Option<ElementRef<'a>>> {
    let selector = parse_selector(&handle.selector)?;
    let found = match &handle.scope {
        Some(parent) => resolve(document, parent)?
            .and_then(|parent| parent.select(&selector).nth(handle.index)),
        None => document.select(&selector).nth(handle.index),
    };
    Ok(found)
}

fn is_rendered(element: ElementRef<'_>, removed: &HashSet<NodeId>) -> bool {
    std::iter::once(element)
        .chain(element.ancestors().filter_map(ElementRef::wrap))
        .all(|el| {
            let value = el.value();
            let hidden_style = value.attr("style").is_some_and(|style| {
                style
                    .to_lowercase()
                    .replace(' ', "")
                    .contains("display:none")
            });
            let hidden_input =
                value.name() == "input" && value.attr("type") == Some("hidden");

            !removed.contains(&el.id())
                && value.attr("hidden").is_none()
                && !hidden_style
                && !hidden_input
        })
}

/// Text content with line breaks at block boundaries, similar to `innerText`
fn inner_text(element: ElementRef<'_>) -> String {
    let mut text = String::new();
    for node in element.descendants() {
        match node.value() {
            Node::Text(t) => text.push_str(t),
            Node::Element(e) if BLOCK_TAGS.contains(&e.name()) => text.push('\n'),
            _ => {}
        }
    }
    text
}

fn submit_action(
    state: &PageState,
    button: ElementRef<'_>,
    base: &Url,
) -> Result<ClickAction> {
    let form = button
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "form")
        .ok_or_else(|| anyhow!("element is neither a link nor inside a form"))?;

    let action = form.value().attr("action").unwrap_or_default();
    let url = if action.is_empty() {
        base.clone()
    } else {
        base.join(action)?
    };
    let post = form
        .value()
        .attr("method")
        .is_some_and(|m| m.eq_ignore_ascii_case("post"));

    let field_selector = parse_selector("input[name], textarea[name], select[name]")?;
    let mut fields = Vec::new();
    for field in form.select(&field_selector) {
        let value = field.value();
        let Some(name) = value.attr("name") else {
            continue;
        };
        let kind = value.attr("type").unwrap_or("text").to_ascii_lowercase();
        let is_button = matches!(kind.as_str(), "submit" | "button" | "image" | "reset");
        if is_button && field.id() != button.id() {
            continue;
        }
        if matches!(kind.as_str(), "checkbox" | "radio") && value.attr("checked").is_none() {
            continue;
        }

        let entered = state
            .filled
            .get(&field.id())
            .cloned()
            .or_else(|| value.attr("value").map(str::to_string))
            .unwrap_or_else(|| {
                if value.name() == "textarea" {
                    inner_text(field)
                } else {
                    String::new()
                }
            });
        fields.push((name.to_string(), entered));
    }

    // A named <button> contributes its own value, like a browser submit
    if button.value().name() == "button"
        && let Some(name) = button.value().attr("name")
    {
        let value = button.value().attr("value").unwrap_or_default();
        fields.push((name.to_string(), value.to_string()));
    }

    Ok(ClickAction::Submit { url, post, fields })
}

#[async_trait]
impl BrowserPage for HtmlPage {
    async fn navigate(&self, url: &str) -> Result<()> {
        let url = Url::parse(url)?;
        self.fetch(self.client.get(url)).await
    }

    fn current_url(&self) -> Option<String> {
        self.state().url.as_ref().map(Url::to_string)
    }

    async fn find_visible(&self, selector: &str, _timeout: Duration) -> Result<Option<ElementHandle>> {
        self.with_document(|document, state| {
            let parsed = parse_selector(selector)?;
            Ok(document
                .select(&parsed)
                .position(|el| is_rendered(el, &state.removed))
                .map(|index| ElementHandle::new(selector, index)))
        })
    }

    async fn find_visible_with_text(
        &self,
        selector: &str,
        text: &str,
        _timeout: Duration,
    ) -> Result<Option<ElementHandle>> {
        self.with_document(|document, state| {
            let parsed = parse_selector(selector)?;
            Ok(document
                .select(&parsed)
                .position(|el| is_rendered(el, &state.removed) && inner_text(el).contains(text))
                .map(|index| ElementHandle::new(selector, index)))
        })
    }

    async fn query_all(
        &self,
        scope: Option<&ElementHandle>,
        selector: &str,
    ) -> Result<Vec<ElementHandle>> {
        self.with_document(|document, state| {
            let parsed = parse_selector(selector)?;
            let matches: Vec<ElementRef<'_>> = match scope {
                Some(parent) => match resolve(document, parent)? {
                    Some(parent) => parent.select(&parsed).collect(),
                    None => Vec::new(),
                },
                None => document.select(&parsed).collect(),
            };

            Ok(matches
                .into_iter()
                .enumerate()
                .filter(|(_, el)| !state.removed.contains(&el.id()))
                .map(|(index, _)| match scope {
                    Some(parent) => ElementHandle::within(parent, selector, index),
                    None => ElementHandle::new(selector, index),
                })
                .collect())
        })
    }

    async fn text(&self, element: &ElementHandle) -> Result<Option<String>> {
        Ok(self
            .with_element(element, |el, _| normalize_text(&inner_text(el)))?
            .flatten())
    }

    async fn attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        Ok(self
            .with_element(element, |el, _| el.value().attr(name).map(str::to_string))?
            .flatten())
    }

    async fn click(&self, element: &ElementHandle) -> Result<()> {
        let action = self.with_document(|document, state| {
            let el = resolve(document, element)?
                .ok_or_else(|| anyhow!("cannot click missing element {}", element.selector))?;
            let base = state
                .url
                .clone()
                .ok_or_else(|| anyhow!("no document loaded"))?;

            if let Some(href) = el.value().attr("href") {
                return Ok(ClickAction::Navigate(base.join(href)?));
            }
            submit_action(state, el, &base)
        })?;

        match action {
            ClickAction::Navigate(url) => self.fetch(self.client.get(url)).await,
            ClickAction::Submit { url, post, fields } => {
                let request = if post {
                    self.client.post(url).form(&fields)
                } else {
                    self.client.get(url).query(&fields)
                };
                self.fetch(request).await
            }
        }
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<()> {
        let id = self
            .with_element(element, |el, _| el.id())?
            .ok_or_else(|| anyhow!("cannot fill missing element {}", element.selector))?;
        self.state().filled.insert(id, value.to_string());
        Ok(())
    }

    async fn is_visible(&self, element: &ElementHandle) -> Result<bool> {
        Ok(self
            .with_element(element, |el, state| is_rendered(el, &state.removed))?
            .unwrap_or(false))
    }

    async fn remove_from_dom(&self, element: &ElementHandle) -> Result<()> {
        if let Some(id) = self.with_element(element, |el, _| el.id())? {
            self.state().removed.insert(id);
        }
        Ok(())
    }

    async fn bring_to_front(&self) -> Result<()> {
        Ok(())
    }
}
