use super::{BrowserDriver, DriverError, ElementRef, ELEMENT_KEY};
use crate::config::BrowserConfig;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// W3C WebDriver client talking to a remote endpoint (Selenium hub, chromedriver)
pub struct WebDriverClient {
    client: reqwest::Client,
    endpoint: String,
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    value: Value,
    /// Pre-W3C Selenium servers put the session id at the top level
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: String,
    #[serde(default)]
    message: String,
}

impl WebDriverClient {
    /// Open a new browser session on the configured endpoint
    pub async fn connect(config: &BrowserConfig) -> Result<Self, DriverError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| DriverError::Transport(e.to_string()))?;

        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        let capabilities = session_capabilities(config);

        debug!("Creating WebDriver session at {}", endpoint);
        let response = send(&client, Method::POST, &format!("{}/session", endpoint), Some(capabilities)).await?;

        let session_id = response
            .value
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(response.session_id)
            .ok_or_else(|| DriverError::Protocol("session response without sessionId".to_string()))?;

        info!("🌐 Browser session {} opened at {}", session_id, endpoint);

        Ok(Self {
            client,
            endpoint,
            session_id,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, DriverError> {
        let url = format!("{}/session/{}{}", self.endpoint, self.session_id, path);
        send(&self.client, method, &url, body).await.map(|r| r.value)
    }
}

/// Chrome capabilities for a harvesting session
pub fn session_capabilities(config: &BrowserConfig) -> Value {
    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--window-size=1920,1080".to_string(),
        "--disable-gpu".to_string(),
        "--ignore-certificate-errors".to_string(),
        "--disable-extensions".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
    ];
    if config.headless {
        args.insert(0, "--headless=new".to_string());
    }
    args.extend(config.extra_args.iter().cloned());

    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": {
                    "args": args,
                    "excludeSwitches": ["enable-automation"],
                    "useAutomationExtension": false
                }
            }
        }
    })
}

async fn send(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<WireResponse, DriverError> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            DriverError::Timeout(e.to_string())
        } else {
            DriverError::Transport(e.to_string())
        }
    })?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| DriverError::Transport(e.to_string()))?;

    let parsed: WireResponse = serde_json::from_str(&text).map_err(|e| {
        DriverError::Protocol(format!("HTTP {} with unreadable body ({}): {}", status, e, text))
    })?;

    if !status.is_success() {
        return match serde_json::from_value::<WireError>(parsed.value) {
            Ok(err) => Err(DriverError::from_w3c(&err.error, err.message)),
            Err(_) => Err(DriverError::Protocol(format!("HTTP {}: {}", status, text))),
        };
    }

    Ok(parsed)
}

#[async_trait]
impl BrowserDriver for WebDriverClient {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn title(&self) -> Result<String, DriverError> {
        let value = self.command(Method::GET, "/title", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn execute_script(&self, script: &str, args: Vec<Value>) -> Result<Value, DriverError> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    async fn find_elements(&self, css: &str) -> Result<Vec<ElementRef>, DriverError> {
        let value = self
            .command(
                Method::POST,
                "/elements",
                Some(json!({ "using": "css selector", "value": css })),
            )
            .await?;

        Ok(value
            .as_array()
            .map(|items| items.iter().filter_map(ElementRef::from_json).collect())
            .unwrap_or_default())
    }

    async fn click(&self, element: &ElementRef) -> Result<(), DriverError> {
        self.command(Method::POST, &format!("/element/{}/click", element.0), Some(json!({})))
            .await
            .map(|_| ())
    }

    async fn pointer_click(&self, element: &ElementRef) -> Result<(), DriverError> {
        let actions = json!({
            "actions": [{
                "type": "pointer",
                "id": "mouse",
                "parameters": { "pointerType": "mouse" },
                "actions": [
                    { "type": "pointerMove", "duration": 100, "origin": { ELEMENT_KEY: element.0 }, "x": 0, "y": 0 },
                    { "type": "pointerDown", "button": 0 },
                    { "type": "pointerUp", "button": 0 }
                ]
            }]
        });
        let result = self.command(Method::POST, "/actions", Some(actions)).await;

        // Release input state even when the chain failed
        if let Err(e) = self.command(Method::DELETE, "/actions", None).await {
            debug!("Could not release input state: {}", e);
        }
        result.map(|_| ())
    }

    async fn switch_to_frame(&self, frame: Option<&ElementRef>) -> Result<(), DriverError> {
        let id = frame.map(ElementRef::to_json).unwrap_or(Value::Null);
        self.command(Method::POST, "/frame", Some(json!({ "id": id })))
            .await
            .map(|_| ())
    }

    async fn switch_to_parent_frame(&self) -> Result<(), DriverError> {
        self.command(Method::POST, "/frame/parent", Some(json!({})))
            .await
            .map(|_| ())
    }

    async fn window_handles(&self) -> Result<Vec<String>, DriverError> {
        let value = self.command(Method::GET, "/window/handles", None).await?;
        Ok(value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn current_window(&self) -> Result<String, DriverError> {
        let value = self.command(Method::GET, "/window", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DriverError::Protocol("window handle is not a string".to_string()))
    }

    async fn switch_to_window(&self, handle: &str) -> Result<(), DriverError> {
        self.command(Method::POST, "/window", Some(json!({ "handle": handle })))
            .await
            .map(|_| ())
    }

    async fn close_window(&self) -> Result<(), DriverError> {
        self.command(Method::DELETE, "/window", None).await.map(|_| ())
    }

    async fn quit(&self) -> Result<(), DriverError> {
        let url = format!("{}/session/{}", self.endpoint, self.session_id);
        match send(&self.client, Method::DELETE, &url, None).await {
            Ok(_) => {
                info!("👋 Browser session {} closed", self.session_id);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to close browser session {}: {}", self.session_id, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::mpsc;
    use std::thread;

    /// Minimal WebDriver endpoint: one session, one element, everything else 404
    fn spawn_endpoint() -> (String, mpsc::Sender<()>, thread::JoinHandle<Vec<String>>) {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start webdriver stub");
        let base_url = format!("http://{}", server.server_addr());
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }
                let mut request = match server.recv_timeout(Duration::from_millis(20)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);
                let line = format!("{} {}", request.method(), request.url());
                seen.push(line.clone());

                let (status, payload) = match line.as_str() {
                    "POST /session" => {
                        assert!(body.contains("--headless=new"));
                        (200, json!({"value": {"sessionId": "s1", "capabilities": {}}}))
                    }
                    "POST /session/s1/elements" => {
                        if body.contains("video") {
                            (200, json!({"value": [{ELEMENT_KEY: "e1"}]}))
                        } else {
                            (200, json!({"value": []}))
                        }
                    }
                    "POST /session/s1/element/e1/click" => (
                        400,
                        json!({"value": {"error": "element click intercepted", "message": "covered", "stacktrace": ""}}),
                    ),
                    "GET /session/s1/window/handles" => (200, json!({"value": ["w1", "w2"]})),
                    "DELETE /session/s1" => (200, json!({"value": null})),
                    _ => (
                        404,
                        json!({"value": {"error": "unknown command", "message": line, "stacktrace": ""}}),
                    ),
                };

                let _ = request.respond(
                    tiny_http::Response::from_string(payload.to_string()).with_status_code(status),
                );
            }
            seen
        });

        (base_url, shutdown_tx, handle)
    }

    #[tokio::test]
    async fn test_session_commands_and_error_mapping() {
        let (base_url, shutdown_tx, handle) = spawn_endpoint();
        let config = BrowserConfig {
            endpoint: format!("{}/", base_url),
            headless: true,
            extra_args: vec![],
            request_timeout_seconds: 5,
        };

        let driver = WebDriverClient::connect(&config).await.unwrap();
        assert_eq!(driver.session_id(), "s1");

        let videos = driver.find_elements("video").await.unwrap();
        assert_eq!(videos, vec![ElementRef("e1".to_string())]);
        assert!(driver.find_elements("div.none").await.unwrap().is_empty());

        let err = driver.click(&videos[0]).await.unwrap_err();
        assert_eq!(err, DriverError::ClickIntercepted("covered".to_string()));

        assert_eq!(driver.window_handles().await.unwrap(), vec!["w1", "w2"]);
        assert!(matches!(driver.title().await, Err(DriverError::Protocol(_))));
        driver.quit().await.unwrap();

        shutdown_tx.send(()).unwrap();
        let seen = handle.join().unwrap();
        assert_eq!(seen.first().map(String::as_str), Some("POST /session"));
        assert_eq!(seen.last().map(String::as_str), Some("DELETE /session/s1"));
    }

    #[test]
    fn test_capabilities_follow_headless_flag() {
        let mut config = crate::config::Config::default().browser;
        config.headless = false;
        config.extra_args = vec!["--proxy-server=http://p:1".to_string()];
        let caps = session_capabilities(&config);
        let args = caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"]
            .as_array()
            .unwrap();
        assert!(!args.iter().any(|a| a == "--headless=new"));
        assert!(args.iter().any(|a| a == "--proxy-server=http://p:1"));
    }
}
