//! Chromium driver over the DevTools protocol
//!
//! Every page operation runs a short script against the live DOM. Elements
//! are located again by selector and index on each call, so handles stay
//! valid while the result list grows. Removed elements are hidden and tagged
//! instead of detached, which keeps the indices of their siblings stable.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::BringToFrontParams;
use chromiumoxide::handler::HandlerConfig;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::extract::normalize_text;
use crate::traits::{BrowserPage, BrowserSession, ElementHandle};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const LOAD_TIMEOUT: Duration = Duration::from_secs(15);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Helpers defined in front of every script
const PRELUDE: &str = r#"
const REMOVED = "data-harvester-removed";
const locate = (h) => {
  const root = h.scope ? locate(h.scope) : document;
  return root ? root.querySelectorAll(h.selector)[h.index] || null : null;
};
const rendered = (el) => {
  if (!el || el.closest("[" + REMOVED + "]")) return false;
  const style = window.getComputedStyle(el);
  return style.visibility !== "hidden" && style.display !== "none" && el.getClientRects().length > 0;
};
"#;

const FIND_VISIBLE: &str = r#"
const all = document.querySelectorAll(args.selector);
for (let i = 0; i < all.length; i++) {
  if (rendered(all[i]) && (args.text === null || (all[i].innerText || "").includes(args.text))) {
    return i;
  }
}
return null;
"#;

const QUERY_ALL: &str = r#"
const root = args.scope ? locate(args.scope) : document;
if (!root) return [];
const found = [];
root.querySelectorAll(args.selector).forEach((el, i) => {
  if (!el.hasAttribute(REMOVED)) found.push(i);
});
return found;
"#;

const TEXT: &str = r#"
const el = locate(args.handle);
return el && !el.closest("[" + REMOVED + "]") ? el.innerText : null;
"#;

const ATTRIBUTE: &str = r#"
const el = locate(args.handle);
return el && !el.hasAttribute(REMOVED) ? el.getAttribute(args.name) : null;
"#;

const CLICK: &str = r#"
const el = locate(args.handle);
if (!el) return false;
el.scrollIntoView({ block: "center" });
el.click();
return true;
"#;

const FILL: &str = r#"
const el = locate(args.handle);
if (!el) return false;
el.focus();
el.value = args.value;
el.dispatchEvent(new Event("input", { bubbles: true }));
el.dispatchEvent(new Event("change", { bubbles: true }));
return true;
"#;

const IS_VISIBLE: &str = "return rendered(locate(args.handle));";

const REMOVE: &str = r#"
const el = locate(args.handle);
if (el) {
  el.setAttribute(REMOVED, "");
  el.style.display = "none";
}
return true;
"#;

const READY: &str = r#"return document.readyState === "complete";"#;

#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub headless: bool,
    /// DevTools endpoint of an already running browser, e.g. `ws://localhost:9222`
    pub remote_url: Option<String>,
}

impl Default for ChromeOptions {
    fn default() -> Self {
        Self {
            headless: true,
            remote_url: None,
        }
    }
}

/// Opens tabs of one Chromium instance; tabs share cookies and the site session
pub struct ChromeBrowser {
    browser: Arc<tokio::sync::Mutex<Browser>>,
}

impl ChromeBrowser {
    /// Launch a local Chromium, or attach to `remote_url` when set
    pub async fn launch(options: &ChromeOptions) -> Result<Self> {
        let (browser, mut handler) = match &options.remote_url {
            Some(remote_url) => {
                let ws_url = websocket_url(remote_url).await?;
                info!("Connecting to remote browser at {}", ws_url);

                let config = HandlerConfig {
                    request_timeout: REQUEST_TIMEOUT,
                    ..HandlerConfig::default()
                };
                Browser::connect_with_config(ws_url, config)
                    .await
                    .context("Failed to connect to remote browser")?
            }
            None => {
                info!("Launching browser (headless={})", options.headless);

                let mut builder = BrowserConfig::builder().request_timeout(REQUEST_TIMEOUT);
                if !options.headless {
                    builder = builder.with_head();
                }
                let config = builder
                    .arg("--disable-blink-features=AutomationControlled")
                    .arg("--disable-dev-shm-usage")
                    .arg("--no-first-run")
                    .arg("--no-sandbox")
                    .build()
                    .map_err(|e| anyhow!("Failed to build browser config: {}", e))?;

                Browser::launch(config)
                    .await
                    .context("Failed to launch browser")?
            }
        };

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(tokio::sync::Mutex::new(browser)),
        })
    }
}

/// Resolve the browser WebSocket URL from the `/json/version` endpoint
async fn websocket_url(remote_url: &str) -> Result<String> {
    let http_url = remote_url
        .replace("ws://", "http://")
        .replace("wss://", "https://");
    let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

    let version: Value = reqwest::get(&version_url)
        .await
        .context("Failed to reach remote browser")?
        .json()
        .await
        .context("Failed to parse browser version info")?;

    version
        .get("webSocketDebuggerUrl")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("No webSocketDebuggerUrl in {}", version_url))
}

#[async_trait]
impl BrowserSession for ChromeBrowser {
    async fn open_page(&self) -> Result<Box<dyn BrowserPage>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .context("Failed to open a browser tab")?;
        Ok(Box::new(ChromePage::new(page)))
    }
}

#[derive(Deserialize)]
struct Reply<T> {
    value: Option<T>,
}

/// JSON locator the page scripts resolve with `locate`
fn locator(handle: &ElementHandle) -> Value {
    json!({
        "selector": handle.selector,
        "index": handle.index,
        "scope": handle.scope.as_deref().map(locator)
    })
}

/// Wrap `body` so it sees `args` and returns its result as a JSON string
fn script(args: &Value, body: &str) -> String {
    format!(
        "(() => {{ {PRELUDE} const args = {args}; \
         return JSON.stringify({{ value: (() => {{ {body} }})() }}); }})()"
    )
}

pub struct ChromePage {
    page: Page,
    url: Mutex<Option<String>>,
}

impl ChromePage {
    pub fn new(page: Page) -> Self {
        Self {
            page,
            url: Mutex::new(None),
        }
    }

    async fn eval<T: DeserializeOwned>(&self, args: Value, body: &str) -> Result<Option<T>> {
        let raw: String = self
            .page
            .evaluate(script(&args, body))
            .await?
            .into_value()?;
        let reply: Reply<T> = serde_json::from_str(&raw)?;
        Ok(reply.value)
    }

    async fn on_element<T: DeserializeOwned>(
        &self,
        handle: &ElementHandle,
        extra: Value,
        body: &str,
    ) -> Result<Option<T>> {
        let mut args = json!({ "handle": locator(handle) });
        if let (Value::Object(args), Value::Object(extra)) = (&mut args, extra) {
            args.extend(extra);
        }
        self.eval(args, body).await
    }

    async fn refresh_url(&self) -> Result<()> {
        let url = self.page.url().await?;
        *self.url.lock().unwrap_or_else(PoisonError::into_inner) = url;
        Ok(())
    }

    async fn wait_until_loaded(&self) {
        let deadline = Instant::now() + LOAD_TIMEOUT;
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            // Evaluation fails while a navigation swaps the document
            match self.eval::<bool>(json!({}), READY).await {
                Ok(Some(true)) => return,
                Ok(_) => {}
                Err(e) => debug!("Page not ready yet: {:#}", e),
            }
            if Instant::now() >= deadline {
                warn!("Page did not finish loading within {:?}", LOAD_TIMEOUT);
                return;
            }
        }
    }

    async fn wait_for(
        &self,
        selector: &str,
        text: Option<&str>,
        timeout: Duration,
    ) -> Result<Option<ElementHandle>> {
        let deadline = Instant::now() + timeout;
        loop {
            let args = json!({ "selector": selector, "text": text });
            if let Some(index) = self.eval::<usize>(args, FIND_VISIBLE).await? {
                return Ok(Some(ElementHandle::new(selector, index)));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl BrowserPage for ChromePage {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .with_context(|| format!("Failed to open {url}"))?;
        self.wait_until_loaded().await;
        self.refresh_url().await
    }

    fn current_url(&self) -> Option<String> {
        self.url
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn find_visible(&self, selector: &str, timeout: Duration) -> Result<Option<ElementHandle>> {
        self.wait_for(selector, None, timeout).await
    }

    async fn find_visible_with_text(
        &self,
        selector: &str,
        text: &str,
        timeout: Duration,
    ) -> Result<Option<ElementHandle>> {
        self.wait_for(selector, Some(text), timeout).await
    }

    async fn query_all(
        &self,
        scope: Option<&ElementHandle>,
        selector: &str,
    ) -> Result<Vec<ElementHandle>> {
        let args = json!({ "scope": scope.map(locator), "selector": selector });
        let indices: Vec<usize> = self.eval(args, QUERY_ALL).await?.unwrap_or_default();

        Ok(indices
            .into_iter()
            .map(|index| match scope {
                Some(parent) => ElementHandle::within(parent, selector, index),
                None => ElementHandle::new(selector, index),
            })
            .collect())
    }

    async fn text(&self, element: &ElementHandle) -> Result<Option<String>> {
        let text: Option<String> = self.on_element(element, json!({}), TEXT).await?;
        Ok(text.as_deref().and_then(normalize_text))
    }

    async fn attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        self.on_element(element, json!({ "name": name }), ATTRIBUTE)
            .await
    }

    async fn click(&self, element: &ElementHandle) -> Result<()> {
        let clicked: Option<bool> = self.on_element(element, json!({}), CLICK).await?;
        if clicked != Some(true) {
            bail!("cannot click missing element {}", element.selector);
        }

        // A click may submit a form or follow a link
        self.wait_until_loaded().await;
        self.refresh_url().await
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<()> {
        let filled: Option<bool> = self
            .on_element(element, json!({ "value": value }), FILL)
            .await?;
        if filled != Some(true) {
            bail!("cannot fill missing element {}", element.selector);
        }
        Ok(())
    }

    async fn is_visible(&self, element: &ElementHandle) -> Result<bool> {
        Ok(self
            .on_element(element, json!({}), IS_VISIBLE)
            .await?
            .unwrap_or(false))
    }

    async fn remove_from_dom(&self, element: &ElementHandle) -> Result<()> {
        self.on_element::<bool>(element, json!({}), REMOVE).await?;
        Ok(())
    }

    async fn bring_to_front(&self) -> Result<()> {
        self.page.execute(BringToFrontParams::default()).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.page.clone().close().await?;
        Ok(())
    }
}
