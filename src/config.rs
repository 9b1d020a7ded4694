use crate::error::{AccessError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for the recognition worker's slot wait, so it keeps noticing
/// the stop signal.
pub const MAX_SLOT_TIMEOUT_MS: u64 = 150;

/// Upper bound for joining the recognition worker, so cleanup paths such as
/// signal handlers never hang.
pub const MAX_JOIN_TIMEOUT_MS: u64 = 1000;

/// Ceiling for every configured duration in seconds (one day).
pub const MAX_DURATION_SECS: f64 = 86_400.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub window: usize,
    pub min_live: usize,
    pub min_match: usize,
    pub min_quality: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        // 15 frames is roughly two seconds at 7-8 fps
        GateConfig {
            window: 15,
            min_live: 12,
            min_match: 12,
            min_quality: 12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_attempts: u32,
    pub timeout_secs: f64,
    pub frame_interval_ms: u64,
    pub anti_spoofing: bool,
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            max_attempts: 30,
            timeout_secs: 15.0,
            frame_interval_ms: 100,
            anti_spoofing: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub debounce_secs: f64,
    pub cooldown_secs: f64,
    /// Key that acts as the door button when the keyboard input is active
    /// (`"space"`, `"enter"`, `"f1"`..`"f12"`).
    pub keyboard_key: Option<String>,
}

impl TriggerConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_secs_f64(self.debounce_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_secs)
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        TriggerConfig {
            debounce_secs: 0.5,
            cooldown_secs: 3.0,
            keyboard_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// GPIO line driving the relay, `None` runs the actuator in simulation mode.
    pub gpio_pin: Option<u32>,
    pub active_high: bool,
    pub unlock_duration_secs: f64,
    /// Longest unlock a manual `unlock` command may ask for.
    pub max_manual_unlock_secs: f64,
}

impl LockConfig {
    pub fn unlock_duration(&self) -> Duration {
        Duration::from_secs_f64(self.unlock_duration_secs)
    }

    pub fn max_manual_unlock(&self) -> Duration {
        Duration::from_secs_f64(self.max_manual_unlock_secs)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            gpio_pin: None,
            active_high: false,
            unlock_duration_secs: 5.0,
            max_manual_unlock_secs: 600.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RfidInput {
    /// Reader enumerates as a tty and writes to stdin.
    Stdin,
    /// Reader enumerates as a HID keyboard; keys are captured globally.
    Keyboard,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RfidConfig {
    pub input: RfidInput,
    pub window_secs: f64,
    pub queue_capacity: usize,
}

impl RfidConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs_f64(self.window_secs)
    }
}

impl Default for RfidConfig {
    fn default() -> Self {
        RfidConfig {
            input: RfidInput::Stdin,
            window_secs: 30.0,
            queue_capacity: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run inference on a dedicated worker thread instead of inline.
    pub threaded: bool,
    pub slot_timeout_ms: u64,
    pub join_timeout_ms: u64,
    pub health_log_secs: u64,
}

impl PipelineConfig {
    pub fn slot_timeout(&self) -> Duration {
        Duration::from_millis(self.slot_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            threaded: true,
            slot_timeout_ms: 100,
            join_timeout_ms: 1000,
            health_log_secs: 30,
        }
    }
}

/// Geometric bounds a face box must respect to count as a quality sample.
/// Ratios are relative to the frame dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityBounds {
    /// Face narrower than this is too far away.
    pub min_face_ratio: f32,
    /// Face wider than this is too close to the lens.
    pub max_face_ratio: f32,
    /// Minimum gap between the box and every frame edge.
    pub edge_margin_ratio: f32,
}

impl Default for QualityBounds {
    fn default() -> Self {
        QualityBounds {
            min_face_ratio: 0.10,
            max_face_ratio: 0.75,
            edge_margin_ratio: 0.02,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub max_consecutive_failures: u32,
    pub recovery_delay_ms: u64,
}

impl CameraConfig {
    pub fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_delay_ms)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig {
            device_index: 0,
            width: 320,
            height: 240,
            max_consecutive_failures: 5,
            recovery_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub buzzer_pin: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub persons_file: PathBuf,
    pub cards_file: PathBuf,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        CredentialsConfig {
            persons_file: PathBuf::from("authorized_persons.json"),
            cards_file: PathBuf::from("authorized_rfid_cards.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub lock_id: String,
    pub gate: GateConfig,
    pub session: SessionConfig,
    pub trigger: TriggerConfig,
    pub lock: LockConfig,
    pub rfid: RfidConfig,
    pub pipeline: PipelineConfig,
    pub quality: QualityBounds,
    pub camera: CameraConfig,
    pub feedback: FeedbackConfig,
    pub credentials: CredentialsConfig,
    pub audit_log: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            lock_id: String::from("front-door"),
            gate: GateConfig::default(),
            session: SessionConfig::default(),
            trigger: TriggerConfig::default(),
            lock: LockConfig::default(),
            rfid: RfidConfig::default(),
            pipeline: PipelineConfig::default(),
            quality: QualityBounds::default(),
            camera: CameraConfig::default(),
            feedback: FeedbackConfig::default(),
            credentials: CredentialsConfig::default(),
            audit_log: None,
        }
    }
}

impl Config {
    /// Load and validate a JSON config file. Absent fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AccessError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(raw)
            .map_err(|e| AccessError::configuration(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let gate = &self.gate;
        if gate.window == 0 {
            return Err(AccessError::configuration("gate.window must be at least 1"));
        }
        for (name, min) in [
            ("min_live", gate.min_live),
            ("min_match", gate.min_match),
            ("min_quality", gate.min_quality),
        ] {
            if min > gate.window {
                return Err(AccessError::configuration(format!(
                    "gate.{} ({}) exceeds the window ({}) and could never pass",
                    name, min, gate.window
                )));
            }
        }

        if self.session.max_attempts == 0 {
            return Err(AccessError::configuration("session.max_attempts must be positive"));
        }
        for (name, secs) in [
            ("session.timeout_secs", self.session.timeout_secs),
            ("rfid.window_secs", self.rfid.window_secs),
            ("lock.unlock_duration_secs", self.lock.unlock_duration_secs),
            ("lock.max_manual_unlock_secs", self.lock.max_manual_unlock_secs),
        ] {
            if !(secs > 0.0 && secs <= MAX_DURATION_SECS) {
                return Err(AccessError::configuration(format!(
                    "{} must be within (0, {}]",
                    name, MAX_DURATION_SECS
                )));
            }
        }
        for (name, secs) in [
            ("trigger.debounce_secs", self.trigger.debounce_secs),
            ("trigger.cooldown_secs", self.trigger.cooldown_secs),
        ] {
            if !(0.0..=MAX_DURATION_SECS).contains(&secs) {
                return Err(AccessError::configuration(format!(
                    "{} must be within [0, {}]",
                    name, MAX_DURATION_SECS
                )));
            }
        }
        if self.pipeline.slot_timeout_ms == 0 || self.pipeline.slot_timeout_ms > MAX_SLOT_TIMEOUT_MS
        {
            return Err(AccessError::configuration(format!(
                "pipeline.slot_timeout_ms must be within 1..={}",
                MAX_SLOT_TIMEOUT_MS
            )));
        }
        if self.pipeline.join_timeout_ms == 0 || self.pipeline.join_timeout_ms > MAX_JOIN_TIMEOUT_MS
        {
            return Err(AccessError::configuration(format!(
                "pipeline.join_timeout_ms must be within 1..={}",
                MAX_JOIN_TIMEOUT_MS
            )));
        }
        if self.session.frame_interval_ms == 0 {
            return Err(AccessError::configuration("session.frame_interval_ms must be at least 1"));
        }
        if self.rfid.queue_capacity == 0 {
            return Err(AccessError::configuration("rfid.queue_capacity must be at least 1"));
        }

        let q = &self.quality;
        if !(0.0..1.0).contains(&q.min_face_ratio)
            || q.max_face_ratio <= q.min_face_ratio
            || q.max_face_ratio > 1.0
            || !(0.0..0.5).contains(&q.edge_margin_ratio)
        {
            return Err(AccessError::configuration("quality bounds are inconsistent"));
        }
        if self.lock_id.is_empty() {
            return Err(AccessError::configuration("lock_id cannot be empty"));
        }
        Ok(())
    }
}

/// Returns a version as specified in Cargo.toml
pub fn app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

/// Process-unique name for one physical lock, used for the control socket.
pub fn app_id(lock_id: &str) -> String {
    format!("{}.{}", app_name(), lock_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gate.window, 15);
        assert_eq!(config.trigger.debounce(), Duration::from_millis(500));
        assert_eq!(config.trigger.cooldown(), Duration::from_secs(3));
        assert_eq!(config.rfid.window(), Duration::from_secs(30));
        assert_eq!(config.lock.unlock_duration(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = Config::from_json(
            r#"{ "lock_id": "lab", "gate": { "min_live": 10 }, "rfid": { "input": "keyboard" } }"#,
        )
        .unwrap();

        assert_eq!(config.lock_id, "lab");
        assert_eq!(config.gate.min_live, 10);
        assert_eq!(config.gate.min_match, 12);
        assert_eq!(config.rfid.input, RfidInput::Keyboard);
        assert_eq!(config.session.max_attempts, 30);
    }

    #[test]
    fn test_threshold_above_window_rejected() {
        let err = Config::from_json(r#"{ "gate": { "window": 5, "min_match": 6 } }"#).unwrap_err();
        assert!(matches!(err, AccessError::Configuration(_)));
    }

    #[test]
    fn test_slot_timeout_bound() {
        let mut config = Config::default();
        config.pipeline.slot_timeout_ms = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_join_timeout_bound() {
        let mut config = Config::default();
        config.pipeline.join_timeout_ms = 1000;
        assert!(config.validate().is_ok());
        config.pipeline.join_timeout_ms = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_or_invalid_durations_rejected() {
        for raw in [
            r#"{ "lock": { "unlock_duration_secs": 1e30 } }"#,
            r#"{ "lock": { "max_manual_unlock_secs": 1e300 } }"#,
            r#"{ "session": { "timeout_secs": 1e20 } }"#,
            r#"{ "rfid": { "window_secs": -1.0 } }"#,
            r#"{ "trigger": { "cooldown_secs": 1e30 } }"#,
        ] {
            assert!(
                matches!(Config::from_json(raw), Err(AccessError::Configuration(_))),
                "{} accepted",
                raw
            );
        }
    }

    #[test]
    fn test_malformed_json_is_configuration_error() {
        assert!(matches!(
            Config::from_json("{ not json"),
            Err(AccessError::Configuration(_))
        ));
    }

    #[test]
    fn test_app_id_is_per_lock() {
        assert_ne!(app_id("front"), app_id("back"));
        assert!(app_id("front").ends_with(".front"));
    }
}
