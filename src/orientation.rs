//! The in-process model of where the sphere is currently pointing.
//!
//! There is exactly one [OrientationStore] per rig. It is cloned into every
//! workflow that reads or moves the rig (tracking, manual rotation), each clone
//! being a handle onto the same shared value. Only one workflow is allowed to
//! move the rig at a time, see [crate::workflow].

use std::{
    fmt::{self, Display},
    sync::{Arc, Mutex, MutexGuard},
};

pub type Radian = f64;
pub type Degree = f64;

/// Orientation of the sphere, in degrees, around its three axes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rotation {
    pub theta: Degree,
    pub phi: Degree,
    pub roll: Degree,
}

impl Rotation {
    /// Builds a rotation from its three components.
    pub fn new(theta: Degree, phi: Degree, roll: Degree) -> Self {
        Self { theta, phi, roll }
    }

    /// Returns this rotation moved by `d_theta` and `d_phi`, leaving roll alone.
    pub fn offset_by(self, d_theta: Degree, d_phi: Degree) -> Self {
        Self {
            theta: self.theta + d_theta,
            phi: self.phi + d_phi,
            ..self
        }
    }

    /// `(theta, phi, roll)`
    pub fn as_tuple(&self) -> (Degree, Degree, Degree) {
        (self.theta, self.phi, self.roll)
    }
}

impl From<(Degree, Degree, Degree)> for Rotation {
    fn from((theta, phi, roll): (Degree, Degree, Degree)) -> Self {
        Self { theta, phi, roll }
    }
}

impl Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}°, {:.1}°, {:.1}°)", self.theta, self.phi, self.roll)
    }
}

/// A cloneable handle onto the shared rig orientation.
#[derive(Debug, Clone, Default)]
pub struct OrientationStore {
    rotation: Arc<Mutex<Rotation>>,
}

impl OrientationStore {
    /// A store for a rig resting at `(0, 0, 0)`.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store for a rig resting at `initial`.
    pub fn with_rotation(initial: Rotation) -> Self {
        Self {
            rotation: Arc::new(Mutex::new(initial)),
        }
    }

    /// The orientation the rig was last told to take.
    pub fn get_rotation(&self) -> Rotation {
        *self.lock()
    }

    /// Records a new orientation for the rig.
    pub fn set_rotation(&self, rotation: impl Into<Rotation>) {
        *self.lock() = rotation.into();
    }

    // A panic elsewhere while holding the lock cannot leave a `Rotation` half
    // written, so a poisoned lock is still safe to read.
    fn lock(&self) -> MutexGuard<'_, Rotation> {
        self.rotation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
