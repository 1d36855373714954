//! Which of the rig workflows currently owns the rig.
//!
//! Manual rotation, tracking and scanning all move the sphere, so at most one
//! of them may be active. Each claims the rig through the shared
//! [WorkflowLock] before issuing commands and releases it when done.

use log::{debug, warn};
use std::{
    fmt::{self, Display},
    sync::{Arc, Mutex, MutexGuard},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Workflow {
    /// Nobody is driving the rig.
    #[default]
    None,
    /// The user moves the rig by hand.
    Rotation,
    /// The tracking loop recenters the rig on a target.
    Tracking,
    /// A frame-by-frame scan is sweeping the rig.
    Scanning,
}

impl Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Workflow::None => "none",
            Workflow::Rotation => "rotation",
            Workflow::Tracking => "tracking",
            Workflow::Scanning => "scanning",
        };
        write!(f, "{}", name)
    }
}

/// Returned when a workflow asks for the rig while another one holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowBusy {
    pub requested: Workflow,
    pub active: Workflow,
}

impl Display for WorkflowBusy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot start {} while {} is active",
            self.requested, self.active
        )
    }
}

impl std::error::Error for WorkflowBusy {}

/// Shared, cloneable arbiter of the active [Workflow].
#[derive(Debug, Clone, Default)]
pub struct WorkflowLock {
    active: Arc<Mutex<Workflow>>,
}

impl WorkflowLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The workflow currently holding the rig.
    pub fn active(&self) -> Workflow {
        *self.lock()
    }

    /// Whether `workflow` could be started right now.
    pub fn is_available(&self, workflow: Workflow) -> bool {
        let active = self.active();
        active == Workflow::None || active == workflow
    }

    /// Claims the rig for `workflow`. Claiming it again for the workflow that
    /// already holds it succeeds.
    pub fn acquire(&self, workflow: Workflow) -> Result<(), WorkflowBusy> {
        let mut active = self.lock();
        match *active {
            Workflow::None => {
                debug!("{} workflow acquired the rig", workflow);
                *active = workflow;
                Ok(())
            }
            current if current == workflow => Ok(()),
            current => Err(WorkflowBusy {
                requested: workflow,
                active: current,
            }),
        }
    }

    /// Gives the rig back, if `workflow` is the one holding it.
    pub fn release(&self, workflow: Workflow) {
        let mut active = self.lock();
        if *active == workflow {
            debug!("{} workflow released the rig", workflow);
            *active = Workflow::None;
        } else {
            warn!(
                "{} workflow tried to release the rig held by {}",
                workflow, *active
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, Workflow> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
