use crate::browser::{scripts, BrowserDriver, DriverError};
use serde_json::Value;

/// Snapshot of the page's `<video>` element
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerState {
    pub position: f64,
    pub duration: f64,
    pub paused: bool,
}

impl PlayerState {
    /// State reported when there is no video or its values are unknown
    pub fn absent() -> Self {
        Self {
            position: 0.0,
            duration: 0.0,
            paused: true,
        }
    }

    /// Playback counts as running: known duration, moved past the start, not paused
    pub fn is_playing(&self) -> bool {
        self.duration > 0.0 && self.position > 0.1 && !self.paused
    }

    pub fn duration_known(&self) -> bool {
        self.duration > 0.0
    }

    /// Within `threshold` seconds of the end of a known duration
    pub fn is_near_end(&self, threshold: f64) -> bool {
        self.duration_known() && self.position >= self.duration - threshold
    }

    fn from_script_value(value: Value) -> Self {
        if value.is_null() {
            return Self::absent();
        }
        let position = value.get("position").and_then(Value::as_f64);
        let duration = value.get("duration").and_then(Value::as_f64);
        match (position, duration) {
            (Some(position), Some(duration)) => Self {
                position,
                duration,
                paused: value.get("paused").and_then(Value::as_bool).unwrap_or(true),
            },
            _ => Self::absent(),
        }
    }
}

/// Read the player state. Recoverable endpoint errors read as "no video".
pub async fn read_player_state(driver: &dyn BrowserDriver) -> Result<PlayerState, DriverError> {
    match driver.execute_script(scripts::PLAYER_STATE, Vec::new()).await {
        Ok(value) => Ok(PlayerState::from_script_value(value)),
        Err(e) if e.is_recoverable() || matches!(e, DriverError::Timeout(_)) => {
            tracing::debug!("Player state unavailable: {}", e);
            Ok(PlayerState::absent())
        }
        Err(e) => Err(e),
    }
}

/// Drain the resource-timing buffer, returning every requested resource name
pub async fn harvest_resources(driver: &dyn BrowserDriver) -> Result<Vec<String>, DriverError> {
    match driver.execute_script(scripts::HARVEST_RESOURCES, Vec::new()).await {
        Ok(value) => Ok(value
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| match entry {
                        Value::String(name) => Some(name.clone()),
                        other => other.get("name").and_then(Value::as_str).map(str::to_string),
                    })
                    .collect()
            })
            .unwrap_or_default()),
        Err(e) if e.is_recoverable() || matches!(e, DriverError::Timeout(_)) => {
            tracing::debug!("Resource timing unavailable: {}", e);
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}
