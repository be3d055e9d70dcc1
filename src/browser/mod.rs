pub mod scripts;
pub mod webdriver;

pub use webdriver::WebDriverClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// W3C key under which element references travel in JSON
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52f-4a5b8c6da6a2";

/// Browser endpoint errors, mapped from the W3C WebDriver error codes
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("element not found: {0}")]
    NotFound(String),

    #[error("stale element reference: {0}")]
    StaleElement(String),

    #[error("click intercepted: {0}")]
    ClickIntercepted(String),

    #[error("browser command timed out: {0}")]
    Timeout(String),

    #[error("browser session is no longer valid: {0}")]
    InvalidSession(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl DriverError {
    /// Map a W3C `error` code and message to a driver error
    pub fn from_w3c(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "no such element" | "no such frame" | "no such window" => Self::NotFound(message),
            "stale element reference" | "detached shadow root" => Self::StaleElement(message),
            "element click intercepted" | "element not interactable" => {
                Self::ClickIntercepted(message)
            }
            "timeout" | "script timeout" => Self::Timeout(message),
            "invalid session id" | "session not created" => Self::InvalidSession(message),
            "javascript error" => Self::Script(message),
            _ => Self::Protocol(format!("{}: {}", code, message)),
        }
    }

    /// Errors the overlay and start loops swallow before trying the next candidate
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::StaleElement(_) | Self::ClickIntercepted(_) | Self::Script(_)
        )
    }
}

/// Opaque reference to an element in the remote browser
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementRef(pub String);

impl ElementRef {
    /// JSON form used as a script argument or command parameter
    pub fn to_json(&self) -> Value {
        serde_json::json!({ ELEMENT_KEY: self.0 })
    }

    /// Parse an element reference returned by the endpoint
    pub fn from_json(value: &Value) -> Option<Self> {
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(|id| Self(id.to_string()))
    }
}

/// Remote browser operations used by the playback controller
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Load a URL in the current window
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// Document title of the current page
    async fn title(&self) -> Result<String, DriverError>;

    /// Run a synchronous script; `args` are exposed as `arguments[i]`
    async fn execute_script(&self, script: &str, args: Vec<Value>) -> Result<Value, DriverError>;

    /// All elements matching a CSS selector in the current browsing context
    async fn find_elements(&self, css: &str) -> Result<Vec<ElementRef>, DriverError>;

    /// Native element click
    async fn click(&self, element: &ElementRef) -> Result<(), DriverError>;

    /// Simulated mouse: move onto the element, press and release
    async fn pointer_click(&self, element: &ElementRef) -> Result<(), DriverError>;

    /// Enter an iframe, or return to the top-level document with `None`
    async fn switch_to_frame(&self, frame: Option<&ElementRef>) -> Result<(), DriverError>;

    /// Leave the current iframe
    async fn switch_to_parent_frame(&self) -> Result<(), DriverError>;

    async fn window_handles(&self) -> Result<Vec<String>, DriverError>;

    async fn current_window(&self) -> Result<String, DriverError>;

    async fn switch_to_window(&self, handle: &str) -> Result<(), DriverError>;

    /// Close the current window
    async fn close_window(&self) -> Result<(), DriverError>;

    /// End the session
    async fn quit(&self) -> Result<(), DriverError>;
}

/// Click an element through a script, which bypasses most interception layers
pub async fn script_click(
    driver: &dyn BrowserDriver,
    element: &ElementRef,
) -> Result<(), DriverError> {
    driver
        .execute_script(scripts::CLICK_ELEMENT, vec![element.to_json()])
        .await
        .map(|_| ())
}

/// Remove an element from the DOM
pub async fn remove_element(
    driver: &dyn BrowserDriver,
    element: &ElementRef,
) -> Result<(), DriverError> {
    driver
        .execute_script(scripts::REMOVE_ELEMENT, vec![element.to_json()])
        .await
        .map(|_| ())
}

/// Whether an element is rendered and takes up space
pub async fn is_displayed(
    driver: &dyn BrowserDriver,
    element: &ElementRef,
) -> Result<bool, DriverError> {
    let value = driver
        .execute_script(scripts::IS_DISPLAYED, vec![element.to_json()])
        .await?;
    Ok(value.as_bool().unwrap_or(false))
}
