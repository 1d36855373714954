//! One tracking session: from the moment the tracker locks onto the selected
//! region until tracking is stopped.

use chrono::{Local, NaiveDateTime};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display},
    str::FromStr,
};

use crate::{
    centering::{CenteringAction, CenteringController},
    frame::{BoundingBox, Frame, FrameDimension},
    roi_tracker::{RoiTracker, TrackerError, TrackingLost},
    rotation_channel::RotationChannel,
    tracking_sample::{TrackingSample, Trajectory},
};

/// How the target is being followed. The rig currently only offers one mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackingMode {
    /// The target moves on the surface facing the camera.
    #[default]
    Surface,
}

impl TrackingMode {
    /// The label stored alongside persisted tracks.
    pub fn label(&self) -> &'static str {
        match self {
            TrackingMode::Surface => "Surface Mode",
        }
    }
}

impl Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for TrackingMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Surface Mode" | "surface" => Ok(TrackingMode::Surface),
            other => Err(format!("unknown tracking mode {:?}", other)),
        }
    }
}

/// Free-form information describing a session. Editable until the session
/// starts, frozen afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMetadata {
    pub mode: TrackingMode,
    pub description: String,
}

/// Parameters a session is started with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionParams {
    pub pix_deg_ratio: f64,
    pub radius: f64,
}

/// What happened with one frame of an active session.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// The target was found at `bbox` and the controller reacted with `action`.
    Tracked {
        bbox: BoundingBox,
        action: CenteringAction,
    },
    /// The tracker could not find the target, the frame was skipped.
    Lost(TrackingLost),
}

pub struct Session {
    tracker: Box<dyn RoiTracker>,
    controller: CenteringController,
    bbox: Option<BoundingBox>,
    track: Trajectory,
    metadata: SessionMetadata,
    started_at: NaiveDateTime,
}

impl Session {
    /// Seeds `tracker` with `bbox` on `frame` and records where the rig is
    /// pointing as the first sample of the session.
    pub fn start(
        mut tracker: Box<dyn RoiTracker>,
        frame: &Frame,
        bbox: BoundingBox,
        metadata: SessionMetadata,
        params: SessionParams,
        channel: &RotationChannel,
    ) -> Result<Self, TrackerError> {
        tracker.initialize(frame, bbox)?;

        let dimension = FrameDimension::of(frame);
        let controller = CenteringController::new(dimension, params.pix_deg_ratio, params.radius);
        let seed = TrackingSample::now(params.radius, channel.get_rotation());
        info!(
            "tracking {} in {} frames, deadband {} px",
            bbox,
            dimension,
            controller.tracking_offset()
        );

        Ok(Self {
            tracker,
            controller,
            bbox: None,
            track: Trajectory::seeded(seed),
            metadata,
            started_at: Local::now().naive_local(),
        })
    }

    /// Runs the tracker on `frame` and lets the controller react to the
    /// result. A lost target leaves the session untouched.
    pub fn process_frame(&mut self, frame: &Frame, channel: &RotationChannel) -> FrameOutcome {
        match self.tracker.update(frame) {
            Ok(bbox) => {
                self.bbox = Some(bbox);
                let action = self.controller.on_box(&bbox, channel, &mut self.track);
                FrameOutcome::Tracked { bbox, action }
            }
            Err(lost) => {
                debug!("tracking lost for this frame: {}", lost);
                FrameOutcome::Lost(lost)
            }
        }
    }

    /// Frame dimension captured when the session started.
    pub fn dimension(&self) -> FrameDimension {
        self.controller.dimension()
    }

    /// The last box the tracker reported.
    pub fn bbox(&self) -> Option<BoundingBox> {
        self.bbox
    }

    pub fn controller(&self) -> &CenteringController {
        &self.controller
    }

    pub fn track(&self) -> &Trajectory {
        &self.track
    }

    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    pub fn started_at(&self) -> NaiveDateTime {
        self.started_at
    }

    /// Ends the session, handing back what it recorded.
    pub fn into_parts(self) -> (SessionMetadata, Trajectory) {
        (self.metadata, self.track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        instruction::Instruction,
        orientation::{OrientationStore, Rotation},
    };
    use image::Luma;
    use std::sync::mpsc;

    /// Tracker that replays a fixed list of results.
    struct Scripted(Vec<Result<BoundingBox, TrackingLost>>);

    impl RoiTracker for Scripted {
        fn initialize(&mut self, _: &Frame, bbox: BoundingBox) -> Result<(), TrackerError> {
            if bbox.is_empty() {
                return Err(TrackerError::EmptyBox(bbox));
            }
            Ok(())
        }

        fn update(&mut self, _: &Frame) -> Result<BoundingBox, TrackingLost> {
            self.0.remove(0)
        }
    }

    const PARAMS: SessionParams = SessionParams {
        pix_deg_ratio: 100.0,
        radius: 2.0,
    };

    #[test]
    fn mode_labels_round_trip() {
        assert_eq!(TrackingMode::Surface.to_string(), "Surface Mode");
        assert_eq!("Surface Mode".parse::<TrackingMode>(), Ok(TrackingMode::Surface));
        assert!("Volume Mode".parse::<TrackingMode>().is_err());
    }

    #[test]
    fn start_seeds_track_with_current_orientation() {
        let (tx, _rx) = mpsc::channel::<Instruction>();
        let store = OrientationStore::with_rotation(Rotation::new(90.0, 0.0, 0.0));
        let channel = RotationChannel::new(Box::new(tx), store);
        let frame = Frame::from_pixel(640, 480, Luma([0]));

        let session = Session::start(
            Box::new(Scripted(vec![])),
            &frame,
            BoundingBox::new(300, 220, 40, 40),
            SessionMetadata::default(),
            PARAMS,
            &channel,
        )
        .unwrap();

        assert_eq!(session.dimension(), FrameDimension::new(640, 480));
        assert_eq!(session.controller().tracking_offset(), 160);
        assert_eq!(session.track().len(), 1);
        let (_, theta, _) = session.track().samples()[0].coords();
        assert!((theta - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn lost_frames_are_skipped() {
        let (tx, rx) = mpsc::channel::<Instruction>();
        let channel = RotationChannel::new(Box::new(tx), OrientationStore::new());
        let frame = Frame::from_pixel(640, 480, Luma([0]));
        let mut session = Session::start(
            Box::new(Scripted(vec![
                Err(TrackingLost::LowConfidence { score: 0.1 }),
                Ok(BoundingBox::new(580, 220, 40, 40)),
            ])),
            &frame,
            BoundingBox::new(300, 220, 40, 40),
            SessionMetadata::default(),
            PARAMS,
            &channel,
        )
        .unwrap();

        assert!(matches!(
            session.process_frame(&frame, &channel),
            FrameOutcome::Lost(_)
        ));
        assert_eq!(session.track().len(), 1);
        assert!(rx.try_recv().is_err());

        assert!(matches!(
            session.process_frame(&frame, &channel),
            FrameOutcome::Tracked {
                action: CenteringAction::Rotated { .. },
                ..
            }
        ));
        assert_eq!(session.track().len(), 2);
        assert!(matches!(rx.try_recv(), Ok(Instruction::Rot(_))));
    }
}
