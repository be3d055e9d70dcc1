use crate::browser::{
    is_displayed, remove_element, script_click, scripts, BrowserDriver, DriverError, ElementRef,
};
use crate::config::PlaybackConfig;
use futures::future::BoxFuture;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Which elements a rule applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayMatcher {
    /// Elements matching a CSS selector
    Selector(String),
    /// `<body>` elements other than the document's own body
    SecondaryBodies,
    /// Block elements covering the viewport (high z-index or large fixed/absolute boxes)
    CoveringLayers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayAction {
    Click,
    Remove,
}

/// One dismissal rule: a matcher plus what to do with each visible match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayRule {
    pub name: String,
    pub matcher: OverlayMatcher,
    pub action: OverlayAction,
}

impl OverlayRule {
    pub fn click(selector: &str) -> Self {
        Self {
            name: format!("click {}", selector),
            matcher: OverlayMatcher::Selector(selector.to_string()),
            action: OverlayAction::Click,
        }
    }

    pub fn remove(selector: &str) -> Self {
        Self {
            name: format!("remove {}", selector),
            matcher: OverlayMatcher::Selector(selector.to_string()),
            action: OverlayAction::Remove,
        }
    }

    pub fn remove_matching(name: &str, matcher: OverlayMatcher) -> Self {
        Self {
            name: name.to_string(),
            matcher,
            action: OverlayAction::Remove,
        }
    }

    async fn candidates(&self, driver: &dyn BrowserDriver) -> Result<Vec<ElementRef>, DriverError> {
        match &self.matcher {
            OverlayMatcher::Selector(css) => driver.find_elements(css).await,
            OverlayMatcher::SecondaryBodies => {
                let main = driver
                    .execute_script(scripts::MAIN_BODY, Vec::new())
                    .await?;
                let main = ElementRef::from_json(&main);
                let bodies = driver.find_elements("body").await?;
                Ok(bodies
                    .into_iter()
                    .filter(|body| Some(body) != main.as_ref())
                    .collect())
            }
            OverlayMatcher::CoveringLayers => {
                let found = driver
                    .execute_script(scripts::FIND_COVERING_LAYERS, Vec::new())
                    .await?;
                Ok(elements_from_value(&found))
            }
        }
    }

    /// Apply the rule to every visible match, returning how many were handled.
    /// Missing or stale elements are skipped.
    pub async fn apply(&self, driver: &dyn BrowserDriver) -> Result<usize, DriverError> {
        let candidates = match self.candidates(driver).await {
            Ok(found) => found,
            Err(e) if e.is_recoverable() => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut handled = 0;
        for element in candidates {
            match self.apply_one(driver, &element).await {
                Ok(true) => handled += 1,
                Ok(false) => {}
                Err(e) if e.is_recoverable() => {
                    debug!("Overlay rule '{}' skipped an element: {}", self.name, e)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(handled)
    }

    async fn apply_one(&self, driver: &dyn BrowserDriver, element: &ElementRef) -> Result<bool, DriverError> {
        if !is_displayed(driver, element).await? {
            return Ok(false);
        }

        match self.action {
            OverlayAction::Click => {
                script_click(driver, element).await?;
            }
            OverlayAction::Remove => {
                let holds_video = driver
                    .execute_script(scripts::CONTAINS_VIDEO, vec![element.to_json()])
                    .await?;
                if holds_video.as_bool() == Some(true) {
                    return Ok(false);
                }
                remove_element(driver, element).await?;
            }
        }
        debug!("Overlay rule '{}' applied", self.name);
        Ok(true)
    }
}

fn elements_from_value(value: &Value) -> Vec<ElementRef> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(ElementRef::from_json).collect())
        .unwrap_or_default()
}

/// Default top-level rules, clicks first
pub fn default_rules() -> Vec<OverlayRule> {
    let mut rules: Vec<OverlayRule> = [
        ".fc-button.fc-cta-consent.fc-primary-button",
        "button[aria-label='Close']",
        ".close-button",
        "div.player-overlay-content button.player-overlay-close",
        "button.ch-cookie-consent-button.ch-cookie-consent-button--accept",
        "div.vjs-overlay-play-button",
        "button[title='Close']",
        "a[title='Close']",
    ]
    .into_iter()
    .map(OverlayRule::click)
    .collect();

    rules.extend(
        [
            "div.ch-cookie-consent-container",
            "div.ab-overlay-container",
            "div[id^='ad']",
            "div[class*='overlay']",
            "div[class*='popup']",
            "div[data-qa-tag='modal']",
        ]
        .into_iter()
        .map(OverlayRule::remove),
    );

    rules.push(OverlayRule::remove_matching(
        "secondary body",
        OverlayMatcher::SecondaryBodies,
    ));
    rules.push(OverlayRule::remove_matching(
        "covering layer",
        OverlayMatcher::CoveringLayers,
    ));
    rules
}

/// Rules applied inside an entered iframe
pub fn default_inner_rules() -> Vec<OverlayRule> {
    let mut rules: Vec<OverlayRule> = ["div[id*='ad']", "body > div[id*='cpm']", "body > div[id*='pop']"]
        .into_iter()
        .map(OverlayRule::remove)
        .collect();

    rules.extend(
        [
            "button[aria-label='Play']",
            ".vjs-big-play-button",
            ".close-button",
            ".jw-icon-playback",
            "video",
        ]
        .into_iter()
        .map(OverlayRule::click),
    );
    rules
}

/// What one dismissal pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayPassStats {
    pub handled: usize,
    pub frames_removed: usize,
    pub frames_entered: usize,
    pub popups_closed: usize,
}

/// Ordered overlay rules plus the iframe pass and pop-up window cleanup
#[derive(Debug, Clone)]
pub struct OverlayDismisser {
    rules: Vec<OverlayRule>,
    inner_rules: Vec<OverlayRule>,
    iframe_allow_list: Vec<String>,
    max_iframe_depth: usize,
}

impl OverlayDismisser {
    pub fn new(config: &PlaybackConfig) -> Self {
        Self {
            rules: default_rules(),
            inner_rules: default_inner_rules(),
            iframe_allow_list: config.iframe_allow_list.clone(),
            max_iframe_depth: config.max_iframe_depth,
        }
    }

    /// One full pass: top-level rules, iframes, then pop-up windows.
    /// Safe to repeat; every step tolerates elements that are already gone.
    pub async fn dismiss(
        &self,
        driver: &dyn BrowserDriver,
        main_window: &str,
    ) -> Result<OverlayPassStats, DriverError> {
        let mut stats = OverlayPassStats::default();

        driver.switch_to_frame(None).await?;
        for rule in &self.rules {
            stats.handled += rule.apply(driver).await?;
        }

        let (removed, entered) = self.iframe_pass(driver, 1).await?;
        stats.frames_removed = removed;
        stats.frames_entered = entered;
        driver.switch_to_frame(None).await?;

        stats.popups_closed = close_popups(driver, main_window).await?;

        if stats != OverlayPassStats::default() {
            debug!(
                "Overlay pass: {} handled, {} iframes removed, {} entered, {} pop-ups closed",
                stats.handled, stats.frames_removed, stats.frames_entered, stats.popups_closed
            );
        }
        Ok(stats)
    }

    fn is_allowed_frame(&self, src: &str) -> bool {
        self.iframe_allow_list
            .iter()
            .any(|allowed| src.contains(allowed.as_str()))
    }

    fn iframe_pass<'a>(
        &'a self,
        driver: &'a dyn BrowserDriver,
        depth: usize,
    ) -> BoxFuture<'a, Result<(usize, usize), DriverError>> {
        Box::pin(async move {
            let mut removed = 0;
            let mut entered = 0;

            for frame in driver.find_elements("iframe").await? {
                match self.handle_frame(driver, &frame, depth).await {
                    Ok(FrameOutcome::Removed) => removed += 1,
                    Ok(FrameOutcome::Entered(inner_removed, inner_entered)) => {
                        entered += 1 + inner_entered;
                        removed += inner_removed;
                    }
                    Ok(FrameOutcome::Skipped) => {}
                    Err(e) if e.is_recoverable() => debug!("Iframe skipped: {}", e),
                    Err(e) => return Err(e),
                }
            }
            Ok((removed, entered))
        })
    }

    async fn handle_frame(
        &self,
        driver: &dyn BrowserDriver,
        frame: &ElementRef,
        depth: usize,
    ) -> Result<FrameOutcome, DriverError> {
        let src = driver
            .execute_script(scripts::ELEMENT_SRC, vec![frame.to_json()])
            .await?;
        let src = src.as_str().unwrap_or_default().to_string();

        if self.is_allowed_frame(&src) || !is_displayed(driver, frame).await? {
            return Ok(FrameOutcome::Skipped);
        }

        let covering = driver
            .execute_script(scripts::IS_COVERING_LAYER, vec![frame.to_json()])
            .await?;
        if covering.as_bool() == Some(true) {
            debug!("Removing covering iframe {}", src);
            remove_element(driver, frame).await?;
            return Ok(FrameOutcome::Removed);
        }

        if depth > self.max_iframe_depth {
            return Ok(FrameOutcome::Skipped);
        }

        debug!("Entering iframe {} (depth {})", src, depth);
        driver.switch_to_frame(Some(frame)).await?;
        let inside = self.work_inside_frame(driver, depth).await;
        // Always return to the parent context, whatever happened inside
        let back = driver.switch_to_parent_frame().await;

        let (inner_removed, inner_entered) = inside?;
        back?;
        Ok(FrameOutcome::Entered(inner_removed, inner_entered))
    }

    async fn work_inside_frame(
        &self,
        driver: &dyn BrowserDriver,
        depth: usize,
    ) -> Result<(usize, usize), DriverError> {
        for rule in &self.inner_rules {
            let handled = rule.apply(driver).await?;
            if handled > 0 && rule.action == OverlayAction::Click {
                let running = driver
                    .execute_script(scripts::VIDEO_RUNNING, Vec::new())
                    .await?;
                if running.as_bool() == Some(true) {
                    debug!("Video inside iframe is running");
                    break;
                }
            }
        }
        self.iframe_pass(driver, depth + 1).await
    }
}

enum FrameOutcome {
    Skipped,
    Removed,
    Entered(usize, usize),
}

/// Close every window except `main_window` and focus it again
pub async fn close_popups(driver: &dyn BrowserDriver, main_window: &str) -> Result<usize, DriverError> {
    let handles = driver.window_handles().await?;
    let popups: Vec<String> = handles.into_iter().filter(|h| h != main_window).collect();
    if popups.is_empty() {
        return Ok(0);
    }

    tracing::info!("🪟 Closing {} pop-up window(s)", popups.len());
    let mut closed = 0;
    for handle in &popups {
        let result = async {
            driver.switch_to_window(handle).await?;
            driver.close_window().await
        }
        .await;
        match result {
            Ok(()) => closed += 1,
            Err(e) => tracing::warn!("Could not close pop-up window {}: {}", handle, e),
        }
    }
    driver.switch_to_window(main_window).await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    Ok(closed)
}
