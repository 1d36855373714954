//! Moving the rig by hand.
//!
//! Manual moves go through the same [RotationChannel] as the tracking loop,
//! so the orientation model stays the single source of truth. They are only
//! allowed while no other workflow owns the rig.

use log::info;
use std::{
    borrow::Cow,
    fmt::{self, Display},
};

use crate::{
    orientation::{Degree, Rotation},
    rotation_channel::{RotationChannel, TransportError},
    workflow::{Workflow, WorkflowBusy, WorkflowLock},
};

#[derive(Debug)]
pub enum ManualRotationError {
    /// Another workflow is driving the rig.
    Busy(WorkflowBusy),
    /// The instruction never reached the transport.
    Transport(TransportError),
}

impl Display for ManualRotationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            ManualRotationError::Busy(e) => Cow::from(e.to_string()),
            ManualRotationError::Transport(e) => Cow::from(format!("transport error: {}", e)),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for ManualRotationError {}

impl From<WorkflowBusy> for ManualRotationError {
    fn from(value: WorkflowBusy) -> Self {
        Self::Busy(value)
    }
}

impl From<TransportError> for ManualRotationError {
    fn from(value: TransportError) -> Self {
        Self::Transport(value)
    }
}

/// The manual rotation workflow. Every move claims the rig, holding it until
/// [ManualRotation::finish] is called.
#[derive(Debug, Clone)]
pub struct ManualRotation {
    lock: WorkflowLock,
}

impl ManualRotation {
    pub fn new(lock: WorkflowLock) -> Self {
        Self { lock }
    }

    /// Whether manual moves are currently possible.
    pub fn is_available(&self) -> bool {
        self.lock.is_available(Workflow::Rotation)
    }

    /// Sends the rig to an absolute orientation.
    pub fn rotate_to(
        &self,
        channel: &RotationChannel,
        rotation: Rotation,
    ) -> Result<Rotation, ManualRotationError> {
        self.lock.acquire(Workflow::Rotation)?;
        channel.rotate_to(rotation)?;
        info!("rig manually rotated to {}", rotation);
        Ok(rotation)
    }

    /// Turns the rig by `(d_theta, d_phi)` degrees from where it is now.
    pub fn nudge(
        &self,
        channel: &RotationChannel,
        d_theta: Degree,
        d_phi: Degree,
    ) -> Result<Rotation, ManualRotationError> {
        let target = channel.get_rotation().offset_by(d_theta, d_phi);
        self.rotate_to(channel, target)
    }

    /// Homes the rig.
    pub fn calibrate(&self, channel: &RotationChannel) -> Result<(), ManualRotationError> {
        self.lock.acquire(Workflow::Rotation)?;
        channel.calibrate()?;
        info!("rig calibrated");
        Ok(())
    }

    /// Hands the rig back to the other workflows.
    pub fn finish(&self) {
        if self.lock.active() == Workflow::Rotation {
            self.lock.release(Workflow::Rotation);
        }
    }
}
