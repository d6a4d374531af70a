use astitva_core::liveness::LivenessConfig;
use astitva_core::types::DEFAULT_MATCHER_THRESHOLD;
use astitva_core::VerificationPolicy;
use astitva_hw::Resolution;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming a TOML config file.
pub const CONFIG_PATH_ENV: &str = "ASTITVA_CONFIG";

/// Upper bound on registration stills per student.
pub const MAX_CAPTURE_TARGET: usize = 16;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Scanner configuration.
///
/// Defaults, then an optional TOML file, then `ASTITVA_*` environment
/// variables, each layer overriding the one before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Attendance backend base URL.
    pub backend_url: String,
    /// Bearer token sent with every backend request.
    pub backend_token: Option<String>,
    pub backend_timeout_secs: u64,
    /// V4L2 device used for the front (user-facing) camera.
    pub front_camera: String,
    /// V4L2 device used for the rear camera, if the machine has one.
    pub rear_camera: Option<String>,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Detection poll period.
    pub poll_interval_ms: u64,
    /// Verification sampling period.
    pub verify_tick_ms: u64,
    /// Camera stays open this long after a scan finishes.
    pub release_grace_secs: u64,
    /// Whole-scan deadline.
    pub scan_timeout_secs: u64,
    pub blink_threshold: f32,
    pub blink_debounce_ms: u64,
    pub required_blinks: u32,
    pub max_attempts: u32,
    /// Finalize early once confidence is strictly above this.
    pub finalize_confidence: u32,
    /// Matches at or above this distance are rejected.
    pub accept_distance: f32,
    /// Gallery matcher reports "unknown" at or above this distance.
    pub matcher_threshold: f32,
    /// Stills collected per registration.
    pub capture_target: usize,
    pub jpeg_quality: u8,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let liveness = LivenessConfig::default();
        let policy = VerificationPolicy::default();
        let resolution = Resolution::default();
        Self {
            backend_url: "http://localhost:8000".to_string(),
            backend_token: None,
            backend_timeout_secs: 15,
            front_camera: "/dev/video0".to_string(),
            rear_camera: None,
            frame_width: resolution.width,
            frame_height: resolution.height,
            poll_interval_ms: 100,
            verify_tick_ms: 500,
            release_grace_secs: 5,
            scan_timeout_secs: 30,
            blink_threshold: liveness.blink_threshold,
            blink_debounce_ms: liveness.debounce.as_millis() as u64,
            required_blinks: liveness.required_blinks,
            max_attempts: policy.max_attempts,
            finalize_confidence: policy.finalize_above,
            accept_distance: policy.accept_distance,
            matcher_threshold: DEFAULT_MATCHER_THRESHOLD,
            capture_target: astitva_core::capture::DEFAULT_CAPTURE_TARGET,
            jpeg_quality: astitva_hw::frame::STILL_JPEG_QUALITY,
        }
    }
}

impl ScanConfig {
    /// Load the full stack: defaults, the TOML file at `path` (or
    /// `$ASTITVA_CONFIG`), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));

        let base = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                tracing::debug!(path = %path.display(), "loaded config file");
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };

        let config = base.with_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ASTITVA_*` overrides read through `lookup`.
    pub fn with_overrides<L>(self, lookup: L) -> Self
    where
        L: Fn(&str) -> Option<String>,
    {
        let env = &lookup;
        Self {
            backend_url: env("ASTITVA_BACKEND_URL").unwrap_or(self.backend_url),
            backend_token: env("ASTITVA_BACKEND_TOKEN").or(self.backend_token),
            backend_timeout_secs: parsed(&env, "ASTITVA_BACKEND_TIMEOUT_SECS", self.backend_timeout_secs),
            front_camera: env("ASTITVA_FRONT_CAMERA").unwrap_or(self.front_camera),
            rear_camera: env("ASTITVA_REAR_CAMERA").or(self.rear_camera),
            frame_width: parsed(&env, "ASTITVA_FRAME_WIDTH", self.frame_width),
            frame_height: parsed(&env, "ASTITVA_FRAME_HEIGHT", self.frame_height),
            poll_interval_ms: parsed(&env, "ASTITVA_POLL_INTERVAL_MS", self.poll_interval_ms),
            verify_tick_ms: parsed(&env, "ASTITVA_VERIFY_TICK_MS", self.verify_tick_ms),
            release_grace_secs: parsed(&env, "ASTITVA_RELEASE_GRACE_SECS", self.release_grace_secs),
            scan_timeout_secs: parsed(&env, "ASTITVA_SCAN_TIMEOUT_SECS", self.scan_timeout_secs),
            blink_threshold: parsed(&env, "ASTITVA_BLINK_THRESHOLD", self.blink_threshold),
            blink_debounce_ms: parsed(&env, "ASTITVA_BLINK_DEBOUNCE_MS", self.blink_debounce_ms),
            required_blinks: parsed(&env, "ASTITVA_REQUIRED_BLINKS", self.required_blinks),
            max_attempts: parsed(&env, "ASTITVA_MAX_ATTEMPTS", self.max_attempts),
            finalize_confidence: parsed(&env, "ASTITVA_FINALIZE_CONFIDENCE", self.finalize_confidence),
            accept_distance: parsed(&env, "ASTITVA_ACCEPT_DISTANCE", self.accept_distance),
            matcher_threshold: parsed(&env, "ASTITVA_MATCHER_THRESHOLD", self.matcher_threshold),
            capture_target: parsed(&env, "ASTITVA_CAPTURE_TARGET", self.capture_target),
            jpeg_quality: parsed(&env, "ASTITVA_JPEG_QUALITY", self.jpeg_quality),
        }
    }

    /// Reject values that would stall or trivially pass a scan.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.poll_interval_ms == 0 {
            return invalid("poll_interval_ms must be greater than zero");
        }
        if self.verify_tick_ms == 0 {
            return invalid("verify_tick_ms must be greater than zero");
        }
        if self.required_blinks == 0 {
            return invalid("required_blinks must be at least 1");
        }
        if self.max_attempts == 0 {
            return invalid("max_attempts must be at least 1");
        }
        if self.capture_target == 0 || self.capture_target > MAX_CAPTURE_TARGET {
            return Err(ConfigError::Invalid(format!(
                "capture_target must be within 1..={MAX_CAPTURE_TARGET}"
            )));
        }
        if self.scan_timeout_secs == 0 {
            return invalid("scan_timeout_secs must be greater than zero");
        }
        if not_positive(self.blink_threshold) {
            return invalid("blink_threshold must be positive");
        }
        if not_positive(self.accept_distance) || not_positive(self.matcher_threshold) {
            return invalid("distance thresholds must be positive");
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return invalid("frame size must be non-zero");
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return invalid("jpeg_quality must be within 1..=100");
        }
        Ok(())
    }

    pub fn liveness(&self) -> LivenessConfig {
        LivenessConfig {
            blink_threshold: self.blink_threshold,
            debounce: Duration::from_millis(self.blink_debounce_ms),
            required_blinks: self.required_blinks,
        }
    }

    pub fn policy(&self) -> VerificationPolicy {
        VerificationPolicy {
            max_attempts: self.max_attempts,
            finalize_above: self.finalize_confidence,
            accept_distance: self.accept_distance,
            ..VerificationPolicy::default()
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.frame_width,
            height: self.frame_height,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn verify_tick(&self) -> Duration {
        Duration::from_millis(self.verify_tick_ms)
    }

    pub fn release_grace(&self) -> Duration {
        Duration::from_secs(self.release_grace_secs)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }
}

fn not_positive(value: f32) -> bool {
    value.is_nan() || value <= 0.0
}

fn parsed<T, E>(env: &E, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    E: Fn(&str) -> Option<String>,
{
    match env(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparsable config override");
                default
            }
        },
        None => default,
    }
}
