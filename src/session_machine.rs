//! The owner of the tracking pipeline.
//!
//! Everything that can change what the tracking loop does arrives as an
//! [Event] and goes through [SessionMachine::handle], one event at a time.
//! Frames, user requests and camera changes are therefore serialized, and a
//! stop or cancel always takes effect before the next frame is looked at.
//!
//! ```text
//! Idle --select_roi--> SelectingRoi --roi_selected--> Armed --start--> Tracking
//!  ^                                                                      |
//!  +------------------------------ stop / cancel -------------------------+
//! ```

use chrono::Local;
use log::{debug, error, info, warn};
use std::{
    borrow::Cow,
    fmt::{self, Display},
    mem,
};

use crate::{
    frame::{BoundingBox, Frame, FrameDimension},
    recorder::{PersistedRecord, RecordError, TrajectoryRecorder},
    roi_tracker::{RoiTracker, TrackerError},
    rotation_channel::RotationChannel,
    session::{FrameOutcome, Session, SessionMetadata, SessionParams},
    tracking_sample::Trajectory,
    workflow::{Workflow, WorkflowBusy, WorkflowLock},
};

/// Sessions with fewer samples than this are not worth keeping.
pub const DEFAULT_MIN_PERSISTED_POINTS: usize = 3;

/// Builds a fresh tracker for every session.
pub type TrackerFactory = Box<dyn FnMut() -> Box<dyn RoiTracker> + Send>;

#[derive(Debug)]
pub enum SessionError {
    /// Tracking was requested before a region was selected.
    NoRoiSelected,
    /// The tracker refused the selected region.
    TrackerInit(TrackerError),
    /// Another workflow is driving the rig.
    WorkflowBusy(WorkflowBusy),
    /// No frame has been received from the current camera yet.
    NoFrame,
}

impl Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use SessionError as SE;
        let msg = match self {
            SE::NoRoiSelected => Cow::from("No ROI selected"),
            SE::TrackerInit(e) => Cow::from(format!("tracker initialization failed: {}", e)),
            SE::WorkflowBusy(e) => Cow::from(e.to_string()),
            SE::NoFrame => Cow::from("no frame received from the camera yet"),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for SessionError {}

impl From<TrackerError> for SessionError {
    fn from(value: TrackerError) -> Self {
        Self::TrackerInit(value)
    }
}

impl From<WorkflowBusy> for SessionError {
    fn from(value: WorkflowBusy) -> Self {
        Self::WorkflowBusy(value)
    }
}

/// Everything the session owner reacts to.
#[derive(Debug, Clone)]
pub enum Event {
    SelectRoi,
    RoiSelected(BoundingBox),
    StartTracking,
    FrameAvailable(Frame),
    StopTracking,
    Cancel,
    CameraSourceChanged,
}

pub enum SessionState {
    Idle,
    SelectingRoi,
    Armed(BoundingBox),
    Tracking(Session),
}

/// [SessionState] without its payload, for display and comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateKind {
    #[default]
    Idle,
    SelectingRoi,
    Armed,
    Tracking,
}

impl Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateKind::Idle => "idle",
            StateKind::SelectingRoi => "selecting ROI",
            StateKind::Armed => "armed",
            StateKind::Tracking => "tracking",
        };
        write!(f, "{}", name)
    }
}

impl SessionState {
    pub fn kind(&self) -> StateKind {
        match self {
            SessionState::Idle => StateKind::Idle,
            SessionState::SelectingRoi => StateKind::SelectingRoi,
            SessionState::Armed(_) => StateKind::Armed,
            SessionState::Tracking(_) => StateKind::Tracking,
        }
    }
}

/// How a tracking session ended.
#[derive(Debug)]
pub enum StopOutcome {
    /// The session was written to disk and surfaced under `title`.
    Persisted {
        title: String,
        record: PersistedRecord,
    },
    /// Too few samples to be worth keeping.
    Discarded { nb_points: usize },
    /// Writing failed. The recording is handed back so it is not lost.
    PersistenceFailed {
        error: RecordError,
        metadata: SessionMetadata,
        track: Trajectory,
    },
}

/// What handling one [Event] did.
#[derive(Debug)]
pub enum Outcome {
    /// The event does not apply to the current state.
    Ignored,
    /// Moved to a new state without ending a session.
    Transitioned(StateKind),
    /// A session started on the given box.
    Started(BoundingBox),
    /// A frame went through the active session.
    Frame(FrameOutcome),
    /// The active session ended, the machine now sits in `state`.
    Stopped { outcome: StopOutcome, state: StateKind },
    /// A frame did not match the session's frozen dimension, so the session
    /// was ended.
    Aborted {
        expected: FrameDimension,
        got: FrameDimension,
        outcome: StopOutcome,
    },
}

pub struct SessionMachine {
    state: SessionState,
    latest_frame: Option<Frame>,
    metadata: SessionMetadata,
    params: SessionParams,
    min_points: usize,
    persisted: usize,
    channel: RotationChannel,
    lock: WorkflowLock,
    recorder: TrajectoryRecorder,
    tracker_factory: TrackerFactory,
}

impl SessionMachine {
    pub fn new(
        channel: RotationChannel,
        lock: WorkflowLock,
        recorder: TrajectoryRecorder,
        tracker_factory: TrackerFactory,
        params: SessionParams,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            latest_frame: None,
            metadata: SessionMetadata::default(),
            params,
            min_points: DEFAULT_MIN_PERSISTED_POINTS,
            persisted: 0,
            channel,
            lock,
            recorder,
            tracker_factory,
        }
    }

    /// Overrides how many samples a session needs to be persisted.
    pub fn with_min_points(mut self, min_points: usize) -> Self {
        self.min_points = min_points;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn kind(&self) -> StateKind {
        self.state.kind()
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.state, SessionState::Tracking(_))
    }

    /// The active session, if any.
    pub fn session(&self) -> Option<&Session> {
        match &self.state {
            SessionState::Tracking(session) => Some(session),
            _ => None,
        }
    }

    /// Metadata for the next session. A running session keeps the copy it was
    /// started with.
    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    pub fn set_metadata(&mut self, metadata: SessionMetadata) {
        self.metadata = metadata;
    }

    pub fn channel(&self) -> &RotationChannel {
        &self.channel
    }

    pub fn workflow_lock(&self) -> &WorkflowLock {
        &self.lock
    }

    pub fn latest_frame(&self) -> Option<&Frame> {
        self.latest_frame.as_ref()
    }

    /// Single entry point for everything that can happen to the session.
    pub fn handle(&mut self, event: Event) -> Result<Outcome, SessionError> {
        match event {
            Event::SelectRoi => Ok(self.select_roi()),
            Event::RoiSelected(bbox) => Ok(self.roi_selected(bbox)),
            Event::StartTracking => self.start_tracking(),
            Event::FrameAvailable(frame) => Ok(self.frame_available(frame)),
            Event::StopTracking => Ok(self.stop_tracking()),
            Event::Cancel => Ok(self.cancel()),
            Event::CameraSourceChanged => Ok(self.camera_source_changed()),
        }
    }

    /// Waits for the user to draw a new region, ending any active session
    /// first.
    pub fn select_roi(&mut self) -> Outcome {
        match mem::replace(&mut self.state, SessionState::SelectingRoi) {
            SessionState::Tracking(session) => {
                info!("stopping the active session to select a new region");
                Outcome::Stopped {
                    outcome: self.finish(session),
                    state: StateKind::SelectingRoi,
                }
            }
            _ => Outcome::Transitioned(StateKind::SelectingRoi),
        }
    }

    /// Only the first box after a [Self::select_roi] counts.
    pub fn roi_selected(&mut self, bbox: BoundingBox) -> Outcome {
        match self.state {
            SessionState::SelectingRoi => {
                info!("region {} selected", bbox);
                self.state = SessionState::Armed(bbox);
                Outcome::Transitioned(StateKind::Armed)
            }
            _ => {
                debug!("ignoring region {} outside of selection", bbox);
                Outcome::Ignored
            }
        }
    }

    pub fn start_tracking(&mut self) -> Result<Outcome, SessionError> {
        let bbox = match self.state {
            SessionState::Armed(bbox) => bbox,
            SessionState::Tracking(_) => return Ok(Outcome::Ignored),
            _ => {
                warn!("No ROI selected");
                return Err(SessionError::NoRoiSelected);
            }
        };
        let frame = self.latest_frame.as_ref().ok_or_else(|| {
            warn!("cannot start tracking before the first frame");
            SessionError::NoFrame
        })?;

        self.lock.acquire(Workflow::Tracking)?;

        let tracker = (self.tracker_factory)();
        match Session::start(
            tracker,
            frame,
            bbox,
            self.metadata.clone(),
            self.params,
            &self.channel,
        ) {
            Ok(session) => {
                self.state = SessionState::Tracking(session);
                Ok(Outcome::Started(bbox))
            }
            Err(e) => {
                warn!("could not start tracking {}: {}", bbox, e);
                self.lock.release(Workflow::Tracking);
                Err(e.into())
            }
        }
    }

    /// Runs the active session on `frame` and keeps it as the latest frame.
    pub fn frame_available(&mut self, frame: Frame) -> Outcome {
        let got = FrameDimension::of(&frame);
        let outcome = match self.session().map(Session::dimension) {
            Some(expected) if expected != got => {
                error!(
                    "frame is {} but the session runs on {}, aborting it",
                    got, expected
                );
                self.end_session(StateKind::Idle)
                    .map(|outcome| Outcome::Aborted {
                        expected,
                        got,
                        outcome,
                    })
                    .unwrap_or(Outcome::Ignored)
            }
            Some(_) => match &mut self.state {
                SessionState::Tracking(session) => {
                    Outcome::Frame(session.process_frame(&frame, &self.channel))
                }
                _ => Outcome::Ignored,
            },
            None => Outcome::Ignored,
        };
        self.latest_frame = Some(frame);
        outcome
    }

    pub fn stop_tracking(&mut self) -> Outcome {
        self.end_session(StateKind::Idle)
            .map(|outcome| Outcome::Stopped {
                outcome,
                state: StateKind::Idle,
            })
            .unwrap_or(Outcome::Ignored)
    }

    /// Returns to [StateKind::Idle] from anywhere. A pending selection is
    /// dropped, an active session is stopped the usual way.
    pub fn cancel(&mut self) -> Outcome {
        if let Some(outcome) = self.end_session(StateKind::Idle) {
            return Outcome::Stopped {
                outcome,
                state: StateKind::Idle,
            };
        }
        match mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Idle => Outcome::Ignored,
            previous => {
                info!("cancelled while {}", previous.kind());
                Outcome::Transitioned(StateKind::Idle)
            }
        }
    }

    /// Frames from the old camera are meaningless for the new one, so any
    /// session and any selection made on them is dropped.
    pub fn camera_source_changed(&mut self) -> Outcome {
        self.latest_frame = None;
        self.cancel()
    }

    fn end_session(&mut self, next: StateKind) -> Option<StopOutcome> {
        if !self.is_tracking() {
            return None;
        }
        let next = match next {
            StateKind::SelectingRoi => SessionState::SelectingRoi,
            _ => SessionState::Idle,
        };
        match mem::replace(&mut self.state, next) {
            SessionState::Tracking(session) => Some(self.finish(session)),
            _ => None,
        }
    }

    fn finish(&mut self, session: Session) -> StopOutcome {
        self.lock.release(Workflow::Tracking);
        let (metadata, track) = session.into_parts();

        if track.len() < self.min_points {
            info!(
                "discarding session with {} samples, {} needed",
                track.len(),
                self.min_points
            );
            return StopOutcome::Discarded {
                nb_points: track.len(),
            };
        }

        match self
            .recorder
            .finalize(&metadata, &track, Local::now().naive_local())
        {
            Ok(record) => {
                self.persisted += 1;
                let title = format!("track{}", self.persisted);
                info!("{} saved as {}", title, record.name);
                StopOutcome::Persisted { title, record }
            }
            Err(error) => {
                error!("could not save the session: {}", error);
                StopOutcome::PersistenceFailed {
                    error,
                    metadata,
                    track,
                }
            }
        }
    }
}
