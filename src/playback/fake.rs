//! Scripted in-memory browser for controller and pipeline tests.
//! Playback position follows tokio's clock, so paused-time tests run instantly.

use crate::browser::{scripts, BrowserDriver, DriverError, ElementRef, ELEMENT_KEY};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::time::Instant;

const MAIN_WINDOW: &str = "main-window";
const VIDEO_ID: &str = "video-el";
const START_BUTTON_ID: &str = "play-btn";

#[derive(Debug, Clone)]
pub struct FakeVideo {
    duration: Option<f64>,
    freeze_at: Option<f64>,
    pause_at: Option<f64>,
    duration_lost_at: Option<f64>,
    start_selector: Option<String>,
}

impl FakeVideo {
    /// Starts on script play or a click on the video
    pub fn playable(duration: f64) -> Self {
        Self {
            duration: Some(duration),
            freeze_at: None,
            pause_at: None,
            duration_lost_at: None,
            start_selector: None,
        }
    }

    /// Metadata never loads, so the duration stays unknown
    pub fn never_loads() -> Self {
        Self {
            duration: None,
            freeze_at: None,
            pause_at: None,
            duration_lost_at: None,
            start_selector: None,
        }
    }

    /// Only a click on the element matching `selector` starts playback
    pub fn started_only_by(mut self, selector: &str) -> Self {
        self.start_selector = Some(selector.to_string());
        self
    }

    /// Position stops advancing at `position` while the player keeps claiming to play
    pub fn freezes_at(mut self, position: f64) -> Self {
        self.freeze_at = Some(position);
        self
    }

    /// The player pauses itself once when it reaches `position`
    pub fn pauses_at(mut self, position: f64) -> Self {
        self.pause_at = Some(position);
        self
    }

    /// From `position` on the player stops reporting a duration but keeps playing
    pub fn duration_lost_at(mut self, position: f64) -> Self {
        self.duration_lost_at = Some(position);
        self
    }
}

struct FakeIframe {
    id: String,
    src: String,
    covering: bool,
}

struct FakeState {
    video: FakeVideo,
    playing_since: Option<Instant>,
    played: f64,
    paused_once: bool,
    resumes: u32,
    ready: bool,
    segments: bool,
    dead_links: HashSet<String>,
    harvests: u32,
    failing_harvests: Option<(u32, u32)>,
    session_lost_after: Option<String>,
    elements: HashMap<String, Vec<String>>,
    iframes: Vec<FakeIframe>,
    windows: Vec<String>,
    current_window: String,
    frame_depth: usize,
    navigations: Vec<String>,
    clicked: Vec<String>,
    removed: Vec<String>,
    closed_windows: Vec<String>,
    entered_frames: Vec<String>,
}

impl FakeState {
    fn position(&self) -> f64 {
        let mut position = self.played;
        if let Some(since) = self.playing_since {
            position += since.elapsed().as_secs_f64();
        }
        if let Some(duration) = self.video.duration {
            position = position.min(duration);
        }
        if let Some(freeze) = self.video.freeze_at {
            position = position.min(freeze);
        }
        position
    }

    fn start(&mut self) {
        if self.playing_since.is_none() {
            if self.paused_once {
                self.resumes += 1;
            }
            self.playing_since = Some(Instant::now());
        }
    }

    /// Apply the one-off self pause once its position is reached
    fn maybe_pause(&mut self) {
        let Some(pause_at) = self.video.pause_at else {
            return;
        };
        if self.paused_once || self.playing_since.is_none() {
            return;
        }
        let position = self.position();
        if position >= pause_at {
            self.played = position;
            self.playing_since = None;
            self.paused_once = true;
        }
    }

    fn reported_duration(&self) -> Option<f64> {
        match self.video.duration_lost_at {
            Some(lost_at) if self.position() >= lost_at => None,
            _ => self.video.duration,
        }
    }

    fn harvest_fails(&self) -> bool {
        match self.failing_harvests {
            Some((from, count)) => self.harvests >= from && self.harvests < from + count,
            None => false,
        }
    }

    fn click(&mut self, id: &str) {
        self.clicked.push(id.to_string());
        let starts = match &self.video.start_selector {
            None => id == VIDEO_ID,
            Some(_) => id == START_BUTTON_ID,
        };
        if starts {
            self.start();
        }
    }
}

pub struct FakeBrowser {
    state: Mutex<FakeState>,
}

fn element_arg(args: &[Value]) -> String {
    args.first()
        .and_then(|v| v.get(ELEMENT_KEY))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

impl FakeBrowser {
    pub fn new(video: FakeVideo) -> Self {
        let mut elements = HashMap::new();
        elements.insert("video".to_string(), vec![VIDEO_ID.to_string()]);
        elements.insert("body".to_string(), vec!["main-body".to_string()]);
        if let Some(selector) = &video.start_selector {
            elements.insert(selector.clone(), vec![START_BUTTON_ID.to_string()]);
        }

        Self {
            state: Mutex::new(FakeState {
                video,
                playing_since: None,
                played: 0.0,
                paused_once: false,
                resumes: 0,
                ready: true,
                segments: true,
                dead_links: HashSet::new(),
                harvests: 0,
                failing_harvests: None,
                session_lost_after: None,
                elements,
                iframes: Vec::new(),
                windows: vec![MAIN_WINDOW.to_string()],
                current_window: MAIN_WINDOW.to_string(),
                frame_depth: 0,
                navigations: Vec::new(),
                clicked: Vec::new(),
                removed: Vec::new(),
                closed_windows: Vec::new(),
                entered_frames: Vec::new(),
            }),
        }
    }

    pub fn never_ready(self) -> Self {
        self.state.lock().unwrap().ready = false;
        self
    }

    pub fn without_segments(self) -> Self {
        self.state.lock().unwrap().segments = false;
        self
    }

    /// Navigating to `url` times out at the endpoint
    pub fn with_dead_link(self, url: &str) -> Self {
        self.state.lock().unwrap().dead_links.insert(url.to_string());
        self
    }

    /// Resource harvests number `from` .. `from + count` fail with a protocol error
    pub fn with_failing_harvests(self, from: u32, count: u32) -> Self {
        self.state.lock().unwrap().failing_harvests = Some((from, count));
        self
    }

    /// Once element `id` has been clicked, the direct play script reports a dead session
    pub fn with_session_lost_after_click(self, id: &str) -> Self {
        self.state.lock().unwrap().session_lost_after = Some(id.to_string());
        self
    }

    pub fn with_elements(self, selector: &str, ids: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .elements
            .insert(selector.to_string(), ids.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_iframe(self, id: &str, src: &str, covering: bool) -> Self {
        self.state.lock().unwrap().iframes.push(FakeIframe {
            id: id.to_string(),
            src: src.to_string(),
            covering,
        });
        self
    }

    pub fn with_popup(self, handle: &str) -> Self {
        self.state.lock().unwrap().windows.push(handle.to_string());
        self
    }

    /// Times the player was started again after pausing itself
    pub fn resumes(&self) -> u32 {
        self.state.lock().unwrap().resumes
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().unwrap().navigations.clone()
    }

    pub fn clicked(&self) -> Vec<String> {
        self.state.lock().unwrap().clicked.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn closed_windows(&self) -> Vec<String> {
        self.state.lock().unwrap().closed_windows.clone()
    }

    pub fn entered_frames(&self) -> Vec<String> {
        self.state.lock().unwrap().entered_frames.clone()
    }

    pub fn frame_depth(&self) -> usize {
        self.state.lock().unwrap().frame_depth
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        state.navigations.push(url.to_string());
        if state.dead_links.contains(url) {
            return Err(DriverError::Timeout(format!("page load timed out: {url}")));
        }
        state.playing_since = None;
        state.played = 0.0;
        state.paused_once = false;
        state.frame_depth = 0;
        Ok(())
    }

    async fn title(&self) -> Result<String, DriverError> {
        Ok("Episode One | FakeHost - Watch".to_string())
    }

    async fn execute_script(&self, script: &str, args: Vec<Value>) -> Result<Value, DriverError> {
        let mut state = self.state.lock().unwrap();
        let element = element_arg(&args);

        let value = if script == scripts::DOCUMENT_READY {
            json!(state.ready)
        } else if script == scripts::PLAYER_STATE {
            state.maybe_pause();
            let position = state.position();
            json!({
                "position": position,
                "duration": state.reported_duration(),
                "paused": state.playing_since.is_none(),
            })
        } else if script == scripts::HARVEST_RESOURCES {
            state.harvests += 1;
            if state.harvest_fails() {
                return Err(DriverError::Protocol(
                    "unknown error: cannot determine loading status".to_string(),
                ));
            }
            let mut names = vec![json!("https://host.example/app.js")];
            if state.segments && state.playing_since.is_some() {
                names.push(json!(format!("https://cdn.example/hls/seg-{}.ts", state.harvests)));
            }
            Value::Array(names)
        } else if script == scripts::PLAY_VIDEO {
            if let Some(id) = &state.session_lost_after {
                if state.clicked.contains(id) {
                    return Err(DriverError::InvalidSession("session deleted".to_string()));
                }
            }
            if state.video.start_selector.is_none() || state.paused_once {
                state.start();
            }
            json!(true)
        } else if script == scripts::CLICK_ELEMENT {
            state.click(&element);
            Value::Null
        } else if script == scripts::REMOVE_ELEMENT {
            state.removed.push(element);
            Value::Null
        } else if script == scripts::IS_DISPLAYED {
            json!(!state.removed.contains(&element))
        } else if script == scripts::MAIN_BODY {
            json!({ ELEMENT_KEY: "main-body" })
        } else if script == scripts::ELEMENT_SRC {
            let src = state
                .iframes
                .iter()
                .find(|f| f.id == element)
                .map(|f| f.src.clone())
                .unwrap_or_default();
            json!(src)
        } else if script == scripts::IS_COVERING_LAYER {
            json!(state.iframes.iter().any(|f| f.id == element && f.covering))
        } else if script == scripts::FIND_COVERING_LAYERS {
            json!([])
        } else {
            // CONTAINS_VIDEO, VIDEO_RUNNING and anything else
            json!(false)
        };
        Ok(value)
    }

    async fn find_elements(&self, css: &str) -> Result<Vec<ElementRef>, DriverError> {
        let state = self.state.lock().unwrap();
        if state.frame_depth > 0 {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = if css == "iframe" {
            state.iframes.iter().map(|f| f.id.clone()).collect()
        } else {
            state.elements.get(css).cloned().unwrap_or_default()
        };

        Ok(ids
            .into_iter()
            .filter(|id| !state.removed.contains(id))
            .map(ElementRef)
            .collect())
    }

    async fn click(&self, element: &ElementRef) -> Result<(), DriverError> {
        self.state.lock().unwrap().click(&element.0);
        Ok(())
    }

    async fn pointer_click(&self, element: &ElementRef) -> Result<(), DriverError> {
        self.state.lock().unwrap().click(&element.0);
        Ok(())
    }

    async fn switch_to_frame(&self, frame: Option<&ElementRef>) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        match frame {
            Some(frame) => {
                state.entered_frames.push(frame.0.clone());
                state.frame_depth += 1;
            }
            None => state.frame_depth = 0,
        }
        Ok(())
    }

    async fn switch_to_parent_frame(&self) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        state.frame_depth = state.frame_depth.saturating_sub(1);
        Ok(())
    }

    async fn window_handles(&self) -> Result<Vec<String>, DriverError> {
        Ok(self.state.lock().unwrap().windows.clone())
    }

    async fn current_window(&self) -> Result<String, DriverError> {
        Ok(self.state.lock().unwrap().current_window.clone())
    }

    async fn switch_to_window(&self, handle: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        if !state.windows.iter().any(|w| w == handle) {
            return Err(DriverError::NotFound(handle.to_string()));
        }
        state.current_window = handle.to_string();
        Ok(())
    }

    async fn close_window(&self) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        let current = state.current_window.clone();
        state.windows.retain(|w| w != &current);
        state.closed_windows.push(current);
        Ok(())
    }

    async fn quit(&self) -> Result<(), DriverError> {
        Ok(())
    }
}
