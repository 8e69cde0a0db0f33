//! Web page backend over the W3C WebDriver protocol
//!
//! Talks to a running driver endpoint (chromedriver, geckodriver, ...) with
//! blocking `reqwest` calls moved off the executor by `smol::unblock`. The
//! page is captured by a snapshot script that tags every visible element
//! with a `data-unpal-node` attribute and returns a [`UiElement`] tree; the
//! tag doubles as the handle used to click the element later.

use async_trait::async_trait;
use reqwest::blocking::Client;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{Navigator, UiDriver};
use crate::error::{DriverError, DriverResult, NavigationError};
use crate::tree::{NodeId, UiElement, UiSurface};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebDriverConfig {
	/// Driver endpoint, e.g. a local chromedriver
	pub endpoint: String,
	/// `browserName` capability
	pub browser: String,
	/// Present the page with a mobile user agent when set
	pub user_agent: Option<String>,
	pub headless: bool,
}

impl Default for WebDriverConfig {
	fn default() -> Self {
		Self {
			endpoint: "http://localhost:9515".to_string(),
			browser: "chrome".to_string(),
			user_agent: None,
			headless: false,
		}
	}
}

impl WebDriverConfig {
	/// New-session request body for this configuration
	pub fn capabilities(&self) -> Value {
		let mut always = json!({ "browserName": self.browser });
		match self.browser.as_str() {
			"firefox" => {
				let mut prefs = serde_json::Map::new();
				if let Some(ua) = &self.user_agent {
					prefs.insert("general.useragent.override".into(), json!(ua));
				}
				let args: Vec<&str> = if self.headless { vec!["-headless"] } else { Vec::new() };
				always["moz:firefoxOptions"] = json!({ "args": args, "prefs": prefs });
			}
			_ => {
				let mut args = Vec::new();
				if let Some(ua) = &self.user_agent {
					args.push(format!("--user-agent={ua}"));
				}
				if self.headless {
					args.push("--headless=new".to_string());
				}
				always["goog:chromeOptions"] = json!({ "args": args });
			}
		}
		json!({ "capabilities": { "alwaysMatch": always } })
	}
}

const SNAPSHOT_SCRIPT: &str = r#"
const SKIP = new Set(['SCRIPT', 'STYLE', 'NOSCRIPT', 'TEMPLATE', 'META', 'LINK']);
window.__unpalSeq = window.__unpalSeq || 0;
function visible(el) {
	const style = window.getComputedStyle(el);
	return style.display !== 'none' && style.visibility !== 'hidden';
}
function ownText(el) {
	let text = '';
	for (const child of el.childNodes) {
		if (child.nodeType === Node.TEXT_NODE) text += child.textContent;
	}
	text = text.trim();
	return text.length ? text : null;
}
function actionable(el) {
	const tag = el.tagName;
	const role = el.getAttribute('role');
	return tag === 'BUTTON' || tag === 'A' || role === 'button' || role === 'menuitem'
		|| typeof el.onclick === 'function' || el.hasAttribute('onclick');
}
function editable(el) {
	return el.tagName === 'INPUT' || el.tagName === 'TEXTAREA' || el.isContentEditable;
}
function walk(el) {
	if (SKIP.has(el.tagName) || !visible(el)) return null;
	let handle = el.getAttribute('data-unpal-node');
	if (!handle) {
		handle = String(++window.__unpalSeq);
		el.setAttribute('data-unpal-node', handle);
	}
	const children = [];
	for (const child of el.children) {
		const node = walk(child);
		if (node) children.push(node);
	}
	return {
		class_name: el.tagName.toLowerCase(),
		text: ownText(el),
		description: el.getAttribute('aria-label') || el.getAttribute('title') || el.getAttribute('alt'),
		actionable: actionable(el),
		editable: editable(el),
		handle: handle,
		children: children,
	};
}
const root = document.body ? walk(document.body) : null;
return root ? [root] : [];
"#;

const CLICK_SCRIPT: &str = r#"
const el = document.querySelector('[data-unpal-node="' + arguments[0] + '"]');
if (!el) return null;
el.scrollIntoView({ block: 'center' });
el.click();
return true;
"#;

/// Live WebDriver session
#[derive(Debug)]
pub struct WebDriverBackend {
	client: Client,
	endpoint: String,
	session_id: String,
}

impl WebDriverBackend {
	/// Open a new browser session on `config.endpoint`
	pub async fn connect(config: &WebDriverConfig) -> DriverResult<Self> {
		let client = Client::builder().build()?;
		let endpoint = config.endpoint.trim_end_matches('/').to_string();
		let value = send(&client, Method::POST, format!("{endpoint}/session"), Some(config.capabilities())).await?;
		let session_id = value
			.get("sessionId")
			.and_then(Value::as_str)
			.ok_or_else(|| DriverError::Protocol("new session response has no sessionId".to_string()))?
			.to_string();
		info!("WebDriver: session {session_id} on {endpoint} ({})", config.browser);
		Ok(Self {
			client,
			endpoint,
			session_id,
		})
	}

	pub fn session_id(&self) -> &str {
		&self.session_id
	}

	/// End the browser session
	pub async fn close(&self) -> DriverResult<()> {
		self.command(Method::DELETE, "", None).await?;
		info!("WebDriver: session {} closed", self.session_id);
		Ok(())
	}

	async fn command(&self, method: Method, path: &str, body: Option<Value>) -> DriverResult<Value> {
		let url = format!("{}/session/{}{}", self.endpoint, self.session_id, path);
		send(&self.client, method, url, body).await
	}

	async fn execute(&self, script: &str, args: Vec<Value>) -> DriverResult<Value> {
		self.command(
			Method::POST,
			"/execute/sync",
			Some(json!({ "script": script, "args": args })),
		)
		.await
	}
}

async fn send(client: &Client, method: Method, url: String, body: Option<Value>) -> DriverResult<Value> {
	let client = client.clone();
	let (status, payload) = smol::unblock(move || -> DriverResult<(u16, Value)> {
		let mut request = client.request(method, &url);
		if let Some(body) = body {
			request = request.json(&body);
		}
		let response = request.send()?;
		let status = response.status().as_u16();
		let payload: Value = response.json()?;
		Ok((status, payload))
	})
	.await?;
	parse_response(status, payload)
}

/// Unwrap a W3C `{"value": ...}` response, mapping protocol errors.
fn parse_response(status: u16, payload: Value) -> DriverResult<Value> {
	let value = payload.get("value").cloned().unwrap_or(Value::Null);
	let error = value.get("error").and_then(Value::as_str);
	if status < 400 && error.is_none() {
		return Ok(value);
	}
	let code = error.unwrap_or("unknown error");
	let message = value
		.get("message")
		.and_then(Value::as_str)
		.unwrap_or_default()
		.to_string();
	Err(match code {
		"invalid session id" | "no such window" | "session not created" => DriverError::Interrupted {
			reason: format!("{code}: {message}"),
		},
		"stale element reference" | "no such element" => DriverError::StaleNode { handle: message },
		_ => DriverError::Protocol(format!("{code} (HTTP {status}): {message}")),
	})
}

#[async_trait]
impl UiDriver for WebDriverBackend {
	async fn surfaces(&self) -> DriverResult<Vec<UiSurface>> {
		let value = self.execute(SNAPSHOT_SCRIPT, Vec::new()).await?;
		let roots: Vec<UiElement> = serde_json::from_value(value)?;
		Ok(UiSurface::from_roots(&roots))
	}

	async fn perform_action(&self, surface: &UiSurface, node: NodeId) -> DriverResult<bool> {
		let handle = surface
			.get(node)
			.and_then(|n| n.handle.clone())
			.ok_or_else(|| DriverError::StaleNode {
				handle: format!("{}:{}", surface.id, node.index()),
			})?;
		let clicked = self.execute(CLICK_SCRIPT, vec![json!(handle)]).await?;
		if clicked.is_null() {
			return Err(DriverError::StaleNode { handle });
		}
		debug!("WebDriver: clicked node {handle}");
		Ok(true)
	}

	async fn automation_permitted(&self) -> bool {
		match self.command(Method::GET, "/url", None).await {
			Ok(_) => true,
			Err(err) => {
				warn!("WebDriver: session not usable: {err}");
				false
			}
		}
	}

	fn name(&self) -> &'static str {
		"webdriver"
	}
}

#[async_trait]
impl Navigator for WebDriverBackend {
	async fn open(&self, url: &str) -> Result<(), NavigationError> {
		self.command(Method::POST, "/url", Some(json!({ "url": url })))
			.await?;
		debug!("WebDriver: navigated to {url}");
		Ok(())
	}

	fn name(&self) -> &'static str {
		"webdriver"
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_success_value() {
		let value = parse_response(200, json!({ "value": { "sessionId": "abc" } })).unwrap();
		assert_eq!(value["sessionId"], "abc");

		let null = parse_response(200, json!({ "value": null })).unwrap();
		assert!(null.is_null());
	}

	#[test]
	fn test_parse_error_mapping() {
		let gone = parse_response(
			404,
			json!({ "value": { "error": "invalid session id", "message": "session deleted" } }),
		)
		.unwrap_err();
		assert!(gone.is_interruption());

		let stale = parse_response(
			404,
			json!({ "value": { "error": "stale element reference", "message": "node 4" } }),
		)
		.unwrap_err();
		assert!(matches!(stale, DriverError::StaleNode { .. }));

		let other = parse_response(500, json!({ "value": { "error": "javascript error" } })).unwrap_err();
		assert!(matches!(other, DriverError::Protocol(_)));
	}

	#[test]
	fn test_capabilities_per_browser() {
		let chrome = WebDriverConfig {
			user_agent: Some("Mobile UA".to_string()),
			headless: true,
			..WebDriverConfig::default()
		};
		let caps = chrome.capabilities();
		let args = &caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"];
		assert_eq!(args[0], "--user-agent=Mobile UA");
		assert_eq!(args[1], "--headless=new");

		let firefox = WebDriverConfig {
			browser: "firefox".to_string(),
			user_agent: Some("Mobile UA".to_string()),
			..WebDriverConfig::default()
		};
		let caps = firefox.capabilities();
		let opts = &caps["capabilities"]["alwaysMatch"]["moz:firefoxOptions"];
		assert_eq!(opts["prefs"]["general.useragent.override"], "Mobile UA");
		assert_eq!(caps["capabilities"]["alwaysMatch"]["browserName"], "firefox");
	}

	#[test]
	fn test_snapshot_shape_deserializes() {
		let value = json!([{
			"class_name": "body",
			"text": null,
			"description": null,
			"actionable": false,
			"editable": false,
			"handle": "1",
			"children": [{
				"class_name": "button",
				"text": "Following",
				"description": null,
				"actionable": true,
				"editable": false,
				"handle": "2",
				"children": []
			}]
		}]);
		let roots: Vec<UiElement> = serde_json::from_value(value).unwrap();
		let surfaces = UiSurface::from_roots(&roots);
		let hit = surfaces[0].find_by_text("following")[0];
		assert_eq!(surfaces[0].node(hit).handle.as_deref(), Some("2"));
	}
}
