//! Playback Session Controller.
//!
//! Drives one browser session through
//! `Navigate -> DismissOverlays -> AttemptPlaybackStart -> Monitoring`
//! and ends in `Finished`, `Stalled`, a safety stop, or a typed failure.
//! Every wait is a bounded `tokio::time` sleep or timeout.

pub mod overlays;
pub mod strategies;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod fake;

pub use overlays::{OverlayAction, OverlayDismisser, OverlayMatcher, OverlayRule};
pub use strategies::{StartStrategy, StrategyQueue};
pub use telemetry::PlayerState;

use crate::browser::{scripts, BrowserDriver, DriverError};
use crate::config::PlaybackConfig;
use crate::error::{HarvestError, Result};
use crate::models::SegmentSet;
use crate::output::clean_page_title;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

const READY_POLL: Duration = Duration::from_millis(500);
const PASS_PAUSE: Duration = Duration::from_secs(1);
const RESUME_PAUSE: Duration = Duration::from_secs(1);
/// Consecutive failed monitoring polls tolerated before the session is given up
const MONITOR_ERROR_BUDGET: u32 = 5;

/// How monitoring ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEnd {
    /// Position reached the end of the stream
    Finished,
    /// Position stopped advancing; harvested URIs are partial
    Stalled,
    /// Duration never became known, or the monitoring ceiling was hit
    SafetyStop,
}

/// Result of one successful playback session
#[derive(Debug, Clone)]
pub struct PlaybackReport {
    pub url: String,
    /// Cleaned page title
    pub title: String,
    pub segments: SegmentSet,
    pub end: PlaybackEnd,
    /// Strategy that started playback; `None` when the page was already playing
    pub strategy: Option<StartStrategy>,
    pub start_attempts: u32,
    pub monitored: Duration,
}

/// Controller for one browser session; episodes are processed one at a time
pub struct PlaybackController {
    driver: Arc<dyn BrowserDriver>,
    config: PlaybackConfig,
    overlays: OverlayDismisser,
}

struct StartOutcome {
    strategy: Option<StartStrategy>,
    attempts: u32,
    queue: StrategyQueue,
}

impl PlaybackController {
    pub fn new(driver: Arc<dyn BrowserDriver>, config: PlaybackConfig) -> Self {
        let overlays = OverlayDismisser::new(&config);
        Self {
            driver,
            config,
            overlays,
        }
    }

    /// Run the full state machine for one hosting page
    pub async fn run(&self, url: &str) -> Result<PlaybackReport> {
        let driver = self.driver.as_ref();
        let mut segments = SegmentSet::new();

        info!("🧭 Navigating to {}", url);
        self.navigate(url).await?;
        let main_window = driver.current_window().await?;

        self.dismiss_overlays(&main_window).await?;

        let title = match driver.title().await {
            Ok(raw) => clean_page_title(&raw),
            Err(e) => {
                warn!("Could not read page title: {}", e);
                String::new()
            }
        };
        if !title.is_empty() {
            info!("📺 Page title: {}", title);
        }

        let start = self
            .attempt_playback_start(url, &main_window, &mut segments)
            .await?;
        match &start.strategy {
            Some(strategy) => info!(
                "▶️ Playback started via {} after {} attempt(s)",
                strategy, start.attempts
            ),
            None => info!("▶️ Playback already running"),
        }

        let monitor_started = Instant::now();
        let end = self.monitor(&start.queue, &mut segments).await?;
        let monitored = monitor_started.elapsed();

        // Final drain so requests made just before the end are not lost
        match telemetry::harvest_resources(driver).await {
            Ok(names) => {
                segments.merge(names);
            }
            Err(e) => warn!("Final telemetry drain failed: {}", e),
        }

        info!(
            "📦 Monitoring ended ({:?}) after {}s with {} segment URI(s)",
            end,
            monitored.as_secs(),
            segments.len()
        );

        if segments.is_empty() {
            return Err(HarvestError::NoSegmentsHarvested {
                url: url.to_string(),
            });
        }

        Ok(PlaybackReport {
            url: url.to_string(),
            title,
            segments,
            end,
            strategy: start.strategy,
            start_attempts: start.attempts,
            monitored,
        })
    }

    /// Load the page and wait for DOM readiness
    async fn navigate(&self, url: &str) -> Result<()> {
        let driver = self.driver.as_ref();
        let limit = self.config.dom_ready_timeout();

        let ready = timeout(limit, async {
            driver.navigate(url).await?;
            loop {
                match driver.execute_script(scripts::DOCUMENT_READY, Vec::new()).await {
                    Ok(value) if value.as_bool() == Some(true) => return Ok(()),
                    Ok(_) => {}
                    Err(e) if e.is_recoverable() => debug!("Readiness check failed: {}", e),
                    Err(e) => return Err(e),
                }
                sleep(READY_POLL).await;
            }
        })
        .await;

        match ready {
            Ok(Ok(())) => Ok(()),
            Ok(Err(DriverError::Timeout(_))) | Err(_) => Err(HarvestError::NavigationTimeout {
                url: url.to_string(),
                timeout_secs: limit.as_secs(),
            }),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn dismiss_overlays(&self, main_window: &str) -> Result<()> {
        match self.overlays.dismiss(self.driver.as_ref(), main_window).await {
            Ok(_) => Ok(()),
            Err(e @ DriverError::InvalidSession(_)) => Err(e.into()),
            Err(e) => {
                debug!("Overlay pass interrupted: {}", e);
                Ok(())
            }
        }
    }

    /// Walk the strategy queue until the player runs or the start window closes
    async fn attempt_playback_start(
        &self,
        url: &str,
        main_window: &str,
        segments: &mut SegmentSet,
    ) -> Result<StartOutcome> {
        let driver = self.driver.as_ref();
        let mut queue = StrategyQueue::with_buttons(&self.config.play_button_selectors);
        let window = self.config.start_window();
        let started = Instant::now();
        let mut attempts = 0u32;

        while started.elapsed() < window {
            debug!(
                "Start pass at {}s/{}s",
                started.elapsed().as_secs(),
                window.as_secs()
            );

            for strategy in queue.strategies().to_vec() {
                if telemetry::read_player_state(driver).await?.is_playing() {
                    return Ok(StartOutcome {
                        strategy: None,
                        attempts,
                        queue,
                    });
                }

                for attempt in 1..=self.config.attempts_per_strategy {
                    if started.elapsed() >= window {
                        break;
                    }
                    attempts += 1;
                    debug!(
                        "Trying {} ({}/{})",
                        strategy, attempt, self.config.attempts_per_strategy
                    );

                    match strategy.attempt(driver).await {
                        Ok(()) => {}
                        Err(e @ DriverError::InvalidSession(_)) => return Err(e.into()),
                        Err(e) => debug!("{} failed: {}", strategy, e),
                    }
                    sleep(self.config.settle()).await;

                    let mut state = telemetry::read_player_state(driver).await?;
                    if strategy.is_css_button() && state.paused && state.duration_known() {
                        match driver.execute_script(scripts::PLAY_VIDEO, Vec::new()).await {
                            Ok(_) => {}
                            Err(e @ DriverError::InvalidSession(_)) => return Err(e.into()),
                            Err(e) => debug!("Direct play after {} failed: {}", strategy, e),
                        }
                        sleep(self.config.settle()).await;
                        state = telemetry::read_player_state(driver).await?;
                    }

                    segments.merge(telemetry::harvest_resources(driver).await?);

                    if state.is_playing() {
                        queue.promote(&strategy);
                        return Ok(StartOutcome {
                            strategy: Some(strategy),
                            attempts,
                            queue,
                        });
                    }

                    self.dismiss_overlays(main_window).await?;
                }

                if started.elapsed() >= window {
                    break;
                }
            }

            sleep(PASS_PAUSE).await;
        }

        warn!(
            "❌ Playback did not start within {}s ({} attempts)",
            window.as_secs(),
            attempts
        );
        Err(HarvestError::PlaybackStartExhausted {
            url: url.to_string(),
            attempts,
            elapsed_secs: started.elapsed().as_secs(),
        })
    }

    /// Poll the player and telemetry until the stream ends, stalls or hits a ceiling
    async fn monitor(&self, queue: &StrategyQueue, segments: &mut SegmentSet) -> Result<PlaybackEnd> {
        let driver = self.driver.as_ref();
        let started = Instant::now();
        let mut last_position: Option<f64> = None;
        let mut last_advance = Instant::now();
        let mut polls = 0u64;
        let mut failed_polls = 0u32;

        loop {
            let (new_uris, state) = match poll(driver, segments).await {
                Ok(observed) => {
                    failed_polls = 0;
                    observed
                }
                Err(e @ DriverError::InvalidSession(_)) => return Err(e.into()),
                Err(e) => {
                    failed_polls += 1;
                    warn!(
                        "Monitoring poll failed ({}/{}): {}",
                        failed_polls, MONITOR_ERROR_BUDGET, e
                    );
                    if failed_polls >= MONITOR_ERROR_BUDGET {
                        warn!(
                            "⚠️ Browser stopped answering, keeping {} harvested URI(s)",
                            segments.len()
                        );
                        return Ok(PlaybackEnd::Stalled);
                    }
                    sleep(self.config.poll_interval()).await;
                    continue;
                }
            };
            polls += 1;

            if new_uris > 0 || polls % 20 == 0 {
                debug!(
                    "⏱️ {:.1}/{:.1}s paused={} (+{} URIs, {} total)",
                    state.position,
                    state.duration,
                    state.paused,
                    new_uris,
                    segments.len()
                );
            }

            if state.is_near_end(self.config.finish_threshold_seconds) {
                return Ok(PlaybackEnd::Finished);
            }

            if state.paused {
                debug!("Player paused, resuming");
                if let Some(strategy) = queue.front() {
                    if let Err(e) = strategy.attempt(driver).await {
                        if let DriverError::InvalidSession(_) = e {
                            return Err(e.into());
                        }
                        debug!("Resume via {} failed: {}", strategy, e);
                    }
                }
                sleep(RESUME_PAUSE).await;
            }

            match last_position {
                Some(previous) if previous == state.position && state.position > 0.1 => {
                    if last_advance.elapsed() > self.config.stall_threshold() {
                        warn!(
                            "⚠️ Playback stalled at {:.1}s for over {}s",
                            state.position,
                            self.config.stall_threshold().as_secs()
                        );
                        return Ok(PlaybackEnd::Stalled);
                    }
                }
                _ => {
                    last_position = Some(state.position);
                    last_advance = Instant::now();
                }
            }

            if !state.duration_known() && started.elapsed() > self.config.unknown_duration_ceiling() {
                warn!("⚠️ Duration still unknown after {}s, stopping", started.elapsed().as_secs());
                return Ok(PlaybackEnd::SafetyStop);
            }

            if started.elapsed() > self.config.max_monitoring() {
                warn!("⚠️ Monitoring ceiling reached, stopping");
                return Ok(PlaybackEnd::SafetyStop);
            }

            sleep(self.config.poll_interval()).await;
        }
    }
}

/// One monitoring observation: URIs harvested since the last poll, then the player state
async fn poll(
    driver: &dyn BrowserDriver,
    segments: &mut SegmentSet,
) -> std::result::Result<(usize, PlayerState), DriverError> {
    let new_uris = segments.merge(telemetry::harvest_resources(driver).await?);
    let state = telemetry::read_player_state(driver).await?;
    Ok((new_uris, state))
}
