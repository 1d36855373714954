//! Settings of the rig and of the tracking loop, stored as RON.
//!
//! Every field has a default, so a config file only needs the values that
//! differ:
//!
//! ```text
//! (
//!     camera_fps: 15.0,
//!     recovery_dir: "/var/lib/optisphere/recovery",
//!     tracker: (search_radius: 48),
//! )
//! ```

use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    fmt,
    fs::{self, File},
    io::Read,
    path::{Path, PathBuf},
};

use crate::{
    centering::DEFAULT_PIX_DEG_RATIO,
    frame::FrameDimension,
    roi_tracker::TrackerParams,
    rotation_channel::DEFAULT_BAUD_RATE,
    session::{SessionParams, TrackingMode},
    session_machine::DEFAULT_MIN_PERSISTED_POINTS,
    tracking_sample::DEFAULT_RADIUS,
};

#[derive(Debug)]
pub enum ConfigError {
    /// Returned when io fails when reading or writing the file.
    IoError(std::io::Error),

    /// Returned when serialization of the config fails.
    RonError(ron::Error),

    /// Returned when the file is not valid RON for a config.
    RonSpannedError(ron::de::SpannedError),

    /// A value is out of its meaningful range.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ConfigError as CE;
        let msg = match self {
            CE::IoError(error) => Cow::from(format!("io error: {}", error)),
            CE::RonError(error) => Cow::from(format!("ron error: {}", error)),
            CE::RonSpannedError(error) => Cow::from(format!("ron spanning error: {}", error)),
            CE::Invalid(why) => Cow::from(format!("invalid config: {}", why)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SphereConfig {
    /// Frames per second pulled from the camera.
    pub camera_fps: f64,
    /// Pixels of target offset per degree of correction.
    pub pix_deg_ratio: f64,
    /// Radius written into every sample.
    pub radius: f64,
    /// Sessions with fewer samples are discarded on stop.
    pub min_persisted_points: usize,
    /// Where finished sessions are written.
    pub recovery_dir: PathBuf,
    /// Mode recorded with new sessions.
    pub mode: TrackingMode,
    /// Size of the region selected when none is given explicitly.
    pub roi_size: (u32, u32),
    /// Size of the frames the simulated camera renders.
    pub frame_size: (u32, u32),
    /// Grey levels of sensor noise the simulated camera adds.
    pub camera_noise: u8,
    pub tracker: TrackerParams,
    pub baud_rate: u32,
    /// Slew rate of the simulated rig, in degrees per second.
    pub rig_speed: f64,
}

impl Default for SphereConfig {
    fn default() -> Self {
        Self {
            camera_fps: 30.0,
            pix_deg_ratio: DEFAULT_PIX_DEG_RATIO,
            radius: DEFAULT_RADIUS,
            min_persisted_points: DEFAULT_MIN_PERSISTED_POINTS,
            recovery_dir: PathBuf::from("recovery"),
            mode: TrackingMode::default(),
            roi_size: (64, 64),
            frame_size: (640, 480),
            camera_noise: 3,
            tracker: TrackerParams::default(),
            baud_rate: DEFAULT_BAUD_RATE,
            rig_speed: 6.0,
        }
    }
}

impl SphereConfig {
    /// Reads and validates a config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut handle = File::open(path).map_err(ConfigError::IoError)?;
        let mut text = String::new();
        handle
            .read_to_string(&mut text)
            .map_err(ConfigError::IoError)?;
        text.parse()
    }

    /// Reads `path` if one is given, or falls back to the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_path(path),
            None => Ok(Self::default()),
        }
    }

    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(ConfigError::RonError)?;
        fs::write(path, text).map_err(ConfigError::IoError)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{} must be positive, got {}", name, v)))
            }
        };
        positive("camera_fps", self.camera_fps)?;
        positive("pix_deg_ratio", self.pix_deg_ratio)?;
        positive("radius", self.radius)?;
        positive("rig_speed", self.rig_speed)?;

        if !self.frame_dimension().is_valid() {
            return Err(ConfigError::Invalid(format!(
                "frame_size {} is empty",
                self.frame_dimension()
            )));
        }
        if self.roi_size.0 == 0 || self.roi_size.1 == 0 {
            return Err(ConfigError::Invalid("roi_size must not be empty".into()));
        }
        if !(-1.0..=1.0).contains(&self.tracker.min_confidence) {
            return Err(ConfigError::Invalid(format!(
                "tracker.min_confidence must be within [-1, 1], got {}",
                self.tracker.min_confidence
            )));
        }
        if !(0.0..=1.0).contains(&self.tracker.learning_rate) {
            return Err(ConfigError::Invalid(format!(
                "tracker.learning_rate must be within [0, 1], got {}",
                self.tracker.learning_rate
            )));
        }
        Ok(())
    }

    pub fn frame_dimension(&self) -> FrameDimension {
        FrameDimension::new(self.frame_size.0, self.frame_size.1)
    }

    pub fn session_params(&self) -> SessionParams {
        SessionParams {
            pix_deg_ratio: self.pix_deg_ratio,
            radius: self.radius,
        }
    }
}

impl std::str::FromStr for SphereConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: SphereConfig = ron::from_str(s).map_err(ConfigError::RonSpannedError)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: SphereConfig = "(camera_fps: 15.0, tracker: (search_radius: 48))"
            .parse()
            .unwrap();
        assert_eq!(config.camera_fps, 15.0);
        assert_eq!(config.tracker.search_radius, 48);
        assert_eq!(config.tracker.min_confidence, 0.5);
        assert_eq!(config.pix_deg_ratio, 100.0);
        assert_eq!(config.min_persisted_points, 3);
        assert_eq!(config.recovery_dir, PathBuf::from("recovery"));
        assert_eq!(config.baud_rate, 115200);
    }

    #[test]
    fn empty_struct_is_default() {
        assert_eq!("()".parse::<SphereConfig>().unwrap(), SphereConfig::default());
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(matches!(
            "(camera_fps: 0.0)".parse::<SphereConfig>(),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            "(tracker: (learning_rate: 2.0))".parse::<SphereConfig>(),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            "(camera_fps: \"fast\")".parse::<SphereConfig>(),
            Err(ConfigError::RonSpannedError(_))
        ));
    }

    #[test]
    fn written_config_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sphere.ron");
        let config = SphereConfig {
            camera_fps: 12.5,
            recovery_dir: dir.path().join("out"),
            ..SphereConfig::default()
        };

        config.to_path(&path).unwrap();

        assert_eq!(SphereConfig::load(Some(&path)).unwrap(), config);
        assert_eq!(SphereConfig::load(None).unwrap(), SphereConfig::default());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            SphereConfig::from_path(dir.path().join("nope.ron")),
            Err(ConfigError::IoError(_))
        ));
    }
}
