//! A single spatiotemporal observation of the rig, and the trajectory that a
//! tracking session accumulates out of them.

use chrono::{Local, NaiveDateTime, SubsecRound};
use std::fmt::{self, Display};

use crate::orientation::{Degree, Radian, Rotation};

/// Format used for every timestamp that leaves the process.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// The leading "radius" of a sample. The rig's coordinate system always puts
/// observations on a sphere of this radius.
pub const DEFAULT_RADIUS: f64 = 2.0;

/// The orientation of the rig at the time of an observation, in spherical
/// form, along with the wall-clock time it was observed at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingSample {
    coords: (f64, Radian, Radian),
    timestamp: NaiveDateTime,
}

impl TrackingSample {
    /// Builds a sample from an orientation in degrees, stamped with the
    /// current local time.
    pub fn now(radius: f64, rotation: Rotation) -> Self {
        Self::at(radius, rotation, Local::now().naive_local())
    }

    /// Builds a sample from an orientation in degrees and an explicit time.
    /// Anything below a microsecond is dropped so the sample survives a trip
    /// through [TIMESTAMP_FORMAT] unchanged.
    pub fn at(radius: f64, rotation: Rotation, timestamp: NaiveDateTime) -> Self {
        Self::from_parts(
            (radius, rotation.theta.to_radians(), rotation.phi.to_radians()),
            timestamp,
        )
    }

    /// Builds a sample from already-converted spherical coordinates.
    pub fn from_parts(coords: (f64, Radian, Radian), timestamp: NaiveDateTime) -> Self {
        Self {
            coords,
            timestamp: timestamp.trunc_subsecs(6),
        }
    }

    /// `(radius, theta, phi)`, angles in radians.
    pub fn coords(&self) -> (f64, Radian, Radian) {
        self.coords
    }

    /// Theta converted back to degrees.
    pub fn theta_degrees(&self) -> Degree {
        self.coords.1.to_degrees()
    }

    /// Phi converted back to degrees.
    pub fn phi_degrees(&self) -> Degree {
        self.coords.2.to_degrees()
    }

    /// When the observation was made.
    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    /// The timestamp rendered with [TIMESTAMP_FORMAT].
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

impl Display for TrackingSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (r, theta, phi) = self.coords;
        write!(
            f,
            "({r}, {theta:.4}, {phi:.4}) @ {}",
            self.formatted_timestamp()
        )
    }
}

/// The append-only, chronologically ordered list of samples recorded during
/// a tracking session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    samples: Vec<TrackingSample>,
}

impl Trajectory {
    /// An empty trajectory.
    pub fn new() -> Self {
        Self::default()
    }

    /// A trajectory that already holds its seed sample.
    pub fn seeded(seed: TrackingSample) -> Self {
        Self {
            samples: vec![seed],
        }
    }

    /// Appends a sample to the end of the trajectory.
    pub fn append(&mut self, sample: TrackingSample) {
        self.samples.push(sample);
    }

    /// Number of recorded samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The samples, oldest first.
    pub fn samples(&self) -> &[TrackingSample] {
        &self.samples
    }

    /// The most recent sample, if any.
    pub fn last(&self) -> Option<&TrackingSample> {
        self.samples.last()
    }
}

impl From<Vec<TrackingSample>> for Trajectory {
    fn from(samples: Vec<TrackingSample>) -> Self {
        Self { samples }
    }
}
