//! The thread that owns the [SessionMachine] while the monitor is up.
//!
//! Frames arrive from the frame worker, user commands from the terminal. User
//! commands are always drained first, so a stop or cancel wins over any frame
//! that is already queued.

use log::{debug, warn};
use std::{
    ops::ControlFlow,
    sync::{mpsc, Arc, Mutex, MutexGuard},
    thread,
    time::Duration,
};

use crate::{
    centering::{CenteringAction, Deadband},
    frame::{BoundingBox, FrameDimension},
    manual_rotation::ManualRotation,
    orientation::{Degree, Rotation},
    recorder::PersistedRecord,
    session::{FrameOutcome, SessionMetadata},
    session_machine::{Event, Outcome, SessionMachine, StateKind, StopOutcome},
    tracking_sample::Trajectory,
    workflow::Workflow,
};

const POLL: Duration = Duration::from_millis(16);

/// What the terminal asks the dispatcher to do.
#[derive(Debug, Clone)]
pub enum Command {
    Session(Event),
    /// Turn the rig by hand, in degrees.
    Nudge(Degree, Degree),
    Calibrate,
    /// Wind down: end any session and hand back the summary.
    Stop,
}

/// Snapshot of the pipeline, refreshed after every event.
#[derive(Debug, Clone, Default)]
pub struct MonitorStatus {
    pub state: StateKind,
    pub workflow: Workflow,
    pub rotation: Rotation,
    pub dimension: Option<FrameDimension>,
    pub bbox: Option<BoundingBox>,
    pub deadband: Option<Deadband>,
    pub samples: usize,
    pub frames: u64,
    pub lost_frames: u64,
    pub corrections: u64,
    pub message: String,
    pub saved: Vec<String>,
}

/// Everything the sessions of one monitor run produced.
#[derive(Debug, Default)]
pub struct MonitorSummary {
    pub saved: Vec<(String, PersistedRecord)>,
    /// Sessions that could not be written, kept so they are not lost.
    pub unsaved: Vec<(SessionMetadata, Trajectory)>,
}

pub struct Dispatcher {
    machine: SessionMachine,
    manual: ManualRotation,
    status: Arc<Mutex<MonitorStatus>>,
    summary: MonitorSummary,
}

impl Dispatcher {
    pub fn new(machine: SessionMachine, manual: ManualRotation) -> Self {
        let dispatcher = Self {
            machine,
            manual,
            status: Arc::new(Mutex::new(MonitorStatus::default())),
            summary: MonitorSummary::default(),
        };
        dispatcher.refresh();
        dispatcher
    }

    /// Shared view of the status, for whoever draws it.
    pub fn status_handle(&self) -> Arc<Mutex<MonitorStatus>> {
        self.status.clone()
    }

    pub fn machine(&self) -> &SessionMachine {
        &self.machine
    }

    /// Handles one command. Breaks once the dispatcher should wind down.
    pub fn apply(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Session(event) => self.dispatch(event),
            Command::Nudge(d_theta, d_phi) => {
                let result = self.manual.nudge(self.machine.channel(), d_theta, d_phi);
                // Give the rig back right away so tracking can start any time.
                self.manual.finish();
                match result {
                    Ok(rotation) => self.set_message(format!("rig moved to {}", rotation)),
                    Err(e) => self.set_message(e.to_string()),
                }
            }
            Command::Calibrate => {
                let result = self.manual.calibrate(self.machine.channel());
                self.manual.finish();
                match result {
                    Ok(()) => self.set_message("rig calibrated".to_string()),
                    Err(e) => self.set_message(e.to_string()),
                }
            }
            Command::Stop => {
                self.dispatch(Event::Cancel);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Feeds one event to the machine and records what came of it.
    pub fn dispatch(&mut self, event: Event) {
        let is_frame = matches!(event, Event::FrameAvailable(_));
        match self.machine.handle(event) {
            Ok(outcome) => self.record(outcome, is_frame),
            Err(e) => {
                warn!("{}", e);
                self.set_message(e.to_string());
            }
        }
        self.refresh();
    }

    /// Runs until told to stop, then hands back what the sessions produced.
    pub fn run(
        mut self,
        events: mpsc::Receiver<Event>,
        commands: mpsc::Receiver<Command>,
    ) -> MonitorSummary {
        let mut frames_open = true;
        loop {
            loop {
                match commands.try_recv() {
                    Ok(command) => {
                        if self.apply(command).is_break() {
                            return self.summary;
                        }
                    }
                    Err(mpsc::TryRecvError::Empty) => break,
                    Err(mpsc::TryRecvError::Disconnected) => {
                        debug!("terminal went away, stopping");
                        self.apply(Command::Stop);
                        return self.summary;
                    }
                }
            }

            if frames_open {
                match events.recv_timeout(POLL) {
                    Ok(event) => self.dispatch(event),
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        self.set_message("camera stopped delivering frames".to_string());
                        frames_open = false;
                    }
                }
            } else {
                thread::sleep(POLL);
            }
        }
    }

    fn record(&mut self, outcome: Outcome, is_frame: bool) {
        let mut status = lock(&self.status);
        if is_frame {
            status.frames += 1;
        }
        match &outcome {
            Outcome::Frame(FrameOutcome::Lost(_)) => status.lost_frames += 1,
            Outcome::Frame(FrameOutcome::Tracked {
                action: CenteringAction::Rotated { .. },
                ..
            }) => status.corrections += 1,
            _ => {}
        }
        if let Some(message) = describe(&outcome) {
            status.message = message;
        }
        drop(status);

        let stopped = match outcome {
            Outcome::Stopped { outcome, .. } | Outcome::Aborted { outcome, .. } => outcome,
            _ => return,
        };
        match stopped {
            StopOutcome::Persisted { title, record } => {
                lock(&self.status)
                    .saved
                    .push(format!("{}  {}", title, record.directory.display()));
                self.summary.saved.push((title, record));
            }
            StopOutcome::PersistenceFailed {
                metadata, track, ..
            } => self.summary.unsaved.push((metadata, track)),
            StopOutcome::Discarded { .. } => {}
        }
    }

    fn set_message(&self, message: String) {
        lock(&self.status).message = message;
    }

    fn refresh(&self) {
        let mut status = lock(&self.status);
        status.state = self.machine.kind();
        status.workflow = self.machine.workflow_lock().active();
        status.rotation = self.machine.channel().get_rotation();
        if let Some(frame) = self.machine.latest_frame() {
            status.dimension = Some(FrameDimension::of(frame));
        }
        match self.machine.session() {
            Some(session) => {
                status.bbox = session.bbox();
                status.deadband = Some(session.controller().deadband());
                status.samples = session.track().len();
            }
            None => {
                status.bbox = None;
                status.deadband = None;
                status.samples = 0;
            }
        }
    }
}

fn lock(status: &Mutex<MonitorStatus>) -> MutexGuard<'_, MonitorStatus> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One line for the user about `outcome`, if it is worth one.
pub fn describe(outcome: &Outcome) -> Option<String> {
    match outcome {
        Outcome::Ignored => None,
        Outcome::Transitioned(StateKind::SelectingRoi) => {
            Some("select a region, then press <Enter>".to_string())
        }
        Outcome::Transitioned(StateKind::Armed) => {
            Some("region selected, press <T> to track".to_string())
        }
        Outcome::Transitioned(state) => Some(format!("now {}", state)),
        Outcome::Started(bbox) => Some(format!("tracking {}", bbox)),
        Outcome::Frame(FrameOutcome::Tracked {
            action: CenteringAction::Rotated { delta, .. },
            ..
        }) => Some(format!("rotating by ({:.1}, {:.1})", delta.0, delta.1)),
        Outcome::Frame(FrameOutcome::Lost(lost)) => Some(format!("target lost: {}", lost)),
        Outcome::Frame(_) => None,
        Outcome::Stopped { outcome, .. } => Some(describe_stop(outcome)),
        Outcome::Aborted {
            expected,
            got,
            outcome,
        } => Some(format!(
            "frame size changed from {} to {}, {}",
            expected,
            got,
            describe_stop(outcome)
        )),
    }
}

fn describe_stop(outcome: &StopOutcome) -> String {
    match outcome {
        StopOutcome::Persisted { title, record } => format!(
            "{} saved to {} ({} points)",
            title,
            record.directory.display(),
            record.nb_points
        ),
        StopOutcome::Discarded { nb_points } => {
            format!("session discarded, only {} samples", nb_points)
        }
        StopOutcome::PersistenceFailed { error, track, .. } => format!(
            "could not save the session ({} samples kept): {}",
            track.len(),
            error
        ),
    }
}
