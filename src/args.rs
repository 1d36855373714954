// Commandline argument parser using clap for OptiSphere

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::{config::SphereConfig, frame::BoundingBox, session::TrackingMode};

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct SphereArgs {
    #[command(subcommand, long_about)]
    /// Which task to perform
    pub command: CommandTask,

    /// RON file with the rig and tracking settings, defaults are used for
    /// anything it leaves out
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Directory finished sessions are saved under, overrides the config file
    #[arg(short = 'r', long = "recovery", global = true)]
    pub recovery_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CommandTask {
    /// Keep a region of the camera picture centered by turning the rig
    #[command(about)]
    Track(TrackCommand),

    /// Print a saved session
    #[command(about)]
    Inspect(InspectCommand),

    /// List the serial devices a rig could be attached to
    #[command(about)]
    Ports,
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct TrackCommand {
    /// Serial device of the rig, asked for interactively when omitted
    #[arg(short = 'd', long = "device", conflicts_with = "simulate")]
    pub device: Option<PathBuf>,

    /// Drive a simulated rig instead of real hardware
    #[arg(short = 's', long = "simulate")]
    pub simulate: bool,

    /// Directory of PNG frames to replay instead of the simulated camera
    #[arg(short = 'f', long = "frames")]
    pub frames: Option<PathBuf>,

    /// Frames per second pulled from the camera, overrides the config file
    #[arg(long = "fps")]
    pub fps: Option<f64>,

    /// Initial region as x y width height, centered in the frame by default
    #[arg(long = "roi", num_args = 4, value_names = ["X", "Y", "WIDTH", "HEIGHT"])]
    pub roi: Option<Vec<u32>>,

    /// Where the simulated target sits, as theta and phi in degrees
    #[arg(
        long = "target",
        num_args = 2,
        value_names = ["THETA", "PHI"],
        allow_negative_numbers = true,
        default_values_t = [2.5, 1.5]
    )]
    pub target: Vec<f64>,

    /// Degrees the simulated target moves per frame, as theta and phi
    #[arg(
        long = "drift",
        num_args = 2,
        value_names = ["THETA", "PHI"],
        allow_negative_numbers = true
    )]
    pub drift: Option<Vec<f64>>,

    /// Tracking mode recorded with the sessions
    #[arg(short = 'm', long = "mode")]
    pub mode: Option<TrackingMode>,

    /// Free text recorded with the sessions
    #[arg(long = "description", default_value = "")]
    pub description: String,
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct InspectCommand {
    /// Directory of the saved session, the one holding CONFIG.INI
    pub directory: PathBuf,
}

impl SphereArgs {
    /// Folds the command line overrides into `config`.
    pub fn apply(&self, config: &mut SphereConfig) {
        if let Some(dir) = &self.recovery_dir {
            config.recovery_dir = dir.clone();
        }
        if let CommandTask::Track(track) = &self.command {
            if let Some(fps) = track.fps {
                config.camera_fps = fps;
            }
            if let Some(mode) = track.mode {
                config.mode = mode;
            }
        }
    }
}

impl TrackCommand {
    /// The region given with `--roi`, if any.
    pub fn roi(&self) -> Option<BoundingBox> {
        match self.roi.as_deref() {
            Some(&[x, y, width, height]) => Some(BoundingBox::new(x, y, width, height)),
            _ => None,
        }
    }

    pub fn target(&self) -> (f64, f64) {
        pair(&self.target)
    }

    pub fn drift(&self) -> (f64, f64) {
        self.drift.as_deref().map(pair).unwrap_or((0.0, 0.0))
    }
}

fn pair(values: &[f64]) -> (f64, f64) {
    match values {
        [a, b, ..] => (*a, *b),
        [a] => (*a, 0.0),
        [] => (0.0, 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_overrides_config() {
        let args = SphereArgs::parse_from([
            "optisphere",
            "--recovery",
            "/tmp/sessions",
            "track",
            "--simulate",
            "--fps",
            "10",
            "--roi",
            "10",
            "20",
            "64",
            "48",
            "--target",
            "-1.5",
            "0.5",
            "--mode",
            "Surface Mode",
        ]);
        let mut config = SphereConfig::default();
        args.apply(&mut config);

        assert_eq!(config.camera_fps, 10.0);
        assert_eq!(config.recovery_dir, PathBuf::from("/tmp/sessions"));
        let CommandTask::Track(track) = args.command else {
            panic!("expected the track command");
        };
        assert!(track.simulate);
        assert_eq!(track.roi(), Some(BoundingBox::new(10, 20, 64, 48)));
        assert_eq!(track.target(), (-1.5, 0.5));
        assert_eq!(track.drift(), (0.0, 0.0));
    }

    #[test]
    fn device_and_simulate_conflict() {
        assert!(SphereArgs::try_parse_from([
            "optisphere",
            "track",
            "--simulate",
            "--device",
            "/dev/ttyACM0",
        ])
        .is_err());
    }

    #[test]
    fn inspect_takes_a_directory() {
        let args = SphereArgs::parse_from(["optisphere", "inspect", "recovery/track_x"]);
        assert!(matches!(
            args.command,
            CommandTask::Inspect(InspectCommand { directory }) if directory == PathBuf::from("recovery/track_x")
        ));
    }
}
