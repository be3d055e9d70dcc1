use crate::browser::{script_click, scripts, BrowserDriver, DriverError};
use std::fmt;

/// One way of getting the player to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartStrategy {
    /// `video.play()` from a page script
    ScriptPlay,
    /// Script click on the `<video>` element
    VideoClick,
    /// Simulated mouse move and click on the `<video>` element
    PointerClick,
    /// Script click on the first element matching a CSS selector
    CssButton(String),
}

impl fmt::Display for StartStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScriptPlay => write!(f, "script-play"),
            Self::VideoClick => write!(f, "video-click"),
            Self::PointerClick => write!(f, "pointer-click"),
            Self::CssButton(selector) => write!(f, "css:{}", selector),
        }
    }
}

impl StartStrategy {
    /// Perform one attempt. A missing target is reported as `NotFound`.
    pub async fn attempt(&self, driver: &dyn BrowserDriver) -> Result<(), DriverError> {
        match self {
            Self::ScriptPlay => {
                let found = driver
                    .execute_script(scripts::PLAY_VIDEO, Vec::new())
                    .await?;
                if found.as_bool() == Some(true) {
                    Ok(())
                } else {
                    Err(DriverError::NotFound("video".to_string()))
                }
            }
            Self::VideoClick => {
                let video = first_match(driver, "video").await?;
                script_click(driver, &video).await
            }
            Self::PointerClick => {
                let video = first_match(driver, "video").await?;
                driver.pointer_click(&video).await
            }
            Self::CssButton(selector) => {
                let button = first_match(driver, selector).await?;
                script_click(driver, &button).await
            }
        }
    }

    pub fn is_css_button(&self) -> bool {
        matches!(self, Self::CssButton(_))
    }
}

async fn first_match(
    driver: &dyn BrowserDriver,
    selector: &str,
) -> Result<crate::browser::ElementRef, DriverError> {
    driver
        .find_elements(selector)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| DriverError::NotFound(selector.to_string()))
}

/// Priority-ordered start strategies with promote-on-success.
///
/// Scoped to one playback session; a fresh queue starts from the default order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyQueue {
    order: Vec<StartStrategy>,
}

impl StrategyQueue {
    /// Script play, video click, pointer click, then the given CSS buttons
    pub fn with_buttons(selectors: &[String]) -> Self {
        let mut order = vec![
            StartStrategy::ScriptPlay,
            StartStrategy::VideoClick,
            StartStrategy::PointerClick,
        ];
        order.extend(selectors.iter().cloned().map(StartStrategy::CssButton));
        Self { order }
    }

    pub fn strategies(&self) -> &[StartStrategy] {
        &self.order
    }

    pub fn front(&self) -> Option<&StartStrategy> {
        self.order.first()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Move a strategy to the front, keeping the relative order of the rest
    pub fn promote(&mut self, strategy: &StartStrategy) {
        if let Some(index) = self.order.iter().position(|s| s == strategy) {
            let promoted = self.order.remove(index);
            self.order.insert(0, promoted);
        }
    }
}
