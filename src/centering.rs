//! Keeping the tracked target in the middle of the frame.
//!
//! Every tracked box is compared against the frame center. When the target
//! drifts out of the deadband, the rig is turned by an amount proportional to
//! the pixel offset, and the controller then holds off until the target has
//! come back inside the deadband. That hold-off leaves the motors time to
//! respond before another correction is computed from a stale picture.

use log::{debug, error};

use crate::{
    frame::{BoundingBox, FrameDimension},
    orientation::{Degree, Rotation},
    rotation_channel::{RotationChannel, TransportError},
    tracking_sample::{TrackingSample, Trajectory},
};

/// Pixels of offset that translate into one degree of correction.
pub const DEFAULT_PIX_DEG_RATIO: f64 = 100.0;

/// The tolerance zone around the frame center, in pixels from the center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deadband {
    pub horizontal: f64,
    pub vertical: f64,
}

impl Deadband {
    /// Whether an offset from the frame center lies inside the zone. The
    /// boundary itself counts as inside.
    pub fn contains(&self, dx: f64, dy: f64) -> bool {
        dx.abs() <= self.horizontal && dy.abs() <= self.vertical
    }
}

/// What the controller did with a tracked box.
#[derive(Debug, Clone, PartialEq)]
pub enum CenteringAction {
    /// The rig was sent to `rotation`, `delta` degrees away from where it was.
    Rotated {
        delta: (Degree, Degree),
        rotation: Rotation,
    },
    /// The target came back inside the deadband, corrections are allowed again.
    Settled,
    /// Nothing to do: centered and idle, or waiting for the rig to settle.
    Hold,
    /// A correction was due but could not be handed to the transport.
    DispatchFailed,
}

/// Rounds to one decimal, the resolution of the rig's commands.
fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[derive(Debug, Clone)]
pub struct CenteringController {
    dimension: FrameDimension,
    tracking_offset: u32,
    pix_deg_ratio: f64,
    radius: f64,
    can_rotate: bool,
}

impl CenteringController {
    /// A controller for frames of `dimension`. The vertical deadband is a
    /// third of the frame height.
    pub fn new(dimension: FrameDimension, pix_deg_ratio: f64, radius: f64) -> Self {
        let tracking_offset = dimension.height * 2 / 6;
        Self::with_offset(dimension, tracking_offset, pix_deg_ratio, radius)
    }

    /// A controller with an explicit vertical deadband.
    pub fn with_offset(
        dimension: FrameDimension,
        tracking_offset: u32,
        pix_deg_ratio: f64,
        radius: f64,
    ) -> Self {
        Self {
            dimension,
            tracking_offset,
            pix_deg_ratio,
            radius,
            can_rotate: true,
        }
    }

    pub fn dimension(&self) -> FrameDimension {
        self.dimension
    }

    pub fn tracking_offset(&self) -> u32 {
        self.tracking_offset
    }

    pub fn pix_deg_ratio(&self) -> f64 {
        self.pix_deg_ratio
    }

    /// Whether a new correction may be issued.
    pub fn can_rotate(&self) -> bool {
        self.can_rotate
    }

    /// The horizontal band is scaled by the aspect ratio so the tolerance is
    /// the same angle on both axes.
    pub fn deadband(&self) -> Deadband {
        let offset = self.tracking_offset as f64;
        Deadband {
            horizontal: offset * self.dimension.width as f64 / self.dimension.height as f64,
            vertical: offset,
        }
    }

    /// Signed offset of the box center from the frame center, with up being
    /// positive on the vertical axis.
    pub fn offset_from_center(&self, bbox: &BoundingBox) -> (f64, f64) {
        let (x, y) = bbox.center();
        (
            x - self.dimension.width as f64 / 2.0,
            self.dimension.height as f64 / 2.0 - y,
        )
    }

    /// Feeds one tracked box to the controller. When a correction is issued it
    /// goes out through `channel` and the new orientation is appended to
    /// `track`.
    pub fn on_box(
        &mut self,
        bbox: &BoundingBox,
        channel: &RotationChannel,
        track: &mut Trajectory,
    ) -> CenteringAction {
        let (dx, dy) = self.offset_from_center(bbox);
        let inside = self.deadband().contains(dx, dy);

        if self.can_rotate && !inside {
            let delta = (round1(dx / self.pix_deg_ratio), round1(dy / self.pix_deg_ratio));
            let rotation = channel.get_rotation().offset_by(delta.0, delta.1);
            if let Err(e) = self.dispatch(channel, rotation) {
                error!("could not send correction to {}: {}", rotation, e);
                return CenteringAction::DispatchFailed;
            }
            self.can_rotate = false;
            track.append(TrackingSample::now(self.radius, rotation));
            debug!(
                "target off by ({dx:.0}, {dy:.0}) px, rotating by ({:.1}, {:.1})",
                delta.0, delta.1
            );
            CenteringAction::Rotated { delta, rotation }
        } else if !self.can_rotate && inside {
            debug!("target back within deadband");
            self.can_rotate = true;
            CenteringAction::Settled
        } else {
            CenteringAction::Hold
        }
    }

    fn dispatch(&self, channel: &RotationChannel, rotation: Rotation) -> Result<(), TransportError> {
        channel.rotate_to(rotation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{instruction::Instruction, orientation::OrientationStore};
    use std::sync::mpsc::{self, Receiver};

    const VGA: FrameDimension = FrameDimension {
        width: 640,
        height: 480,
    };

    fn setup() -> (CenteringController, RotationChannel, Receiver<Instruction>, Trajectory) {
        let (tx, rx) = mpsc::channel::<Instruction>();
        let channel = RotationChannel::new(Box::new(tx), OrientationStore::new());
        let controller = CenteringController::new(VGA, DEFAULT_PIX_DEG_RATIO, 2.0);
        (controller, channel, rx, Trajectory::new())
    }

    /// A 40x40 box centered on `(cx, cy)`.
    fn box_at(cx: u32, cy: u32) -> BoundingBox {
        BoundingBox::new(cx - 20, cy - 20, 40, 40)
    }

    #[test]
    fn deadband_is_aspect_scaled() {
        let (controller, ..) = setup();
        assert_eq!(controller.tracking_offset(), 160);
        let band = controller.deadband();
        assert_eq!(band.vertical, 160.0);
        assert!((band.horizontal - 213.333).abs() < 1e-3);
    }

    #[test]
    fn horizontal_offset_within_scaled_band_does_not_rotate() {
        let (mut controller, channel, rx, mut track) = setup();
        // dx = 180, above the vertical band but below the horizontal one
        let action = controller.on_box(&box_at(500, 240), &channel, &mut track);
        assert_eq!(action, CenteringAction::Hold);
        assert!(rx.try_recv().is_err());
        assert!(track.is_empty());
    }

    #[test]
    fn horizontal_offset_beyond_band_rotates_theta_only() {
        let (mut controller, channel, rx, mut track) = setup();
        let action = controller.on_box(&box_at(540, 240), &channel, &mut track);
        assert_eq!(
            action,
            CenteringAction::Rotated {
                delta: (2.2, 0.0),
                rotation: Rotation::new(2.2, 0.0, 0.0)
            }
        );
        assert_eq!(
            rx.try_recv(),
            Ok(Instruction::Rot(Rotation::new(2.2, 0.0, 0.0)))
        );
        assert_eq!(track.len(), 1);
        assert!(!controller.can_rotate());
    }

    #[test]
    fn vertical_offset_within_band_does_not_rotate() {
        let (mut controller, channel, rx, mut track) = setup();
        // dy = 140
        let action = controller.on_box(&box_at(320, 100), &channel, &mut track);
        assert_eq!(action, CenteringAction::Hold);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn vertical_offset_beyond_band_rotates_phi_only() {
        let (mut controller, channel, _rx, mut track) = setup();
        // dy = 240 - 60 = 180, target above center
        let action = controller.on_box(&box_at(320, 60), &channel, &mut track);
        assert_eq!(
            action,
            CenteringAction::Rotated {
                delta: (0.0, 1.8),
                rotation: Rotation::new(0.0, 1.8, 0.0)
            }
        );
        // below center goes the other way
        let (mut controller, channel, _rx, mut track) = setup();
        let action = controller.on_box(&box_at(320, 440), &channel, &mut track);
        assert!(matches!(
            action,
            CenteringAction::Rotated { delta: (d_theta, d_phi), .. } if d_theta == 0.0 && d_phi == -2.0
        ));
    }

    #[test]
    fn corrections_accumulate_on_current_rotation() {
        let (tx, _rx) = mpsc::channel::<Instruction>();
        let store = OrientationStore::with_rotation(Rotation::new(10.0, -5.0, 30.0));
        let channel = RotationChannel::new(Box::new(tx), store.clone());
        let mut controller = CenteringController::new(VGA, DEFAULT_PIX_DEG_RATIO, 2.0);
        let mut track = Trajectory::new();

        controller.on_box(&box_at(20, 20), &channel, &mut track);

        // dx = -300, dy = 220
        assert_eq!(store.get_rotation(), Rotation::new(7.0, -2.8, 30.0));
        let (r, theta, phi) = track.last().unwrap().coords();
        assert_eq!(r, 2.0);
        assert!((theta - 7.0f64.to_radians()).abs() < 1e-12);
        assert!((phi - (-2.8f64).to_radians()).abs() < 1e-12);
    }

    #[test]
    fn centered_box_is_idempotent() {
        let (mut controller, channel, rx, mut track) = setup();
        for _ in 0..50 {
            assert_eq!(
                controller.on_box(&box_at(330, 250), &channel, &mut track),
                CenteringAction::Hold
            );
        }
        assert!(rx.try_recv().is_err());
        assert!(track.is_empty());
        assert!(controller.can_rotate());
    }

    #[test]
    fn no_second_correction_until_settled() {
        let (mut controller, channel, rx, mut track) = setup();
        let far = box_at(600, 240);

        assert!(matches!(
            controller.on_box(&far, &channel, &mut track),
            CenteringAction::Rotated { .. }
        ));
        for _ in 0..10 {
            assert_eq!(
                controller.on_box(&far, &channel, &mut track),
                CenteringAction::Hold
            );
        }
        assert_eq!(rx.try_iter().count(), 1);

        // dx = 200 is inside the horizontal band, which is what counts
        assert_eq!(
            controller.on_box(&box_at(520, 240), &channel, &mut track),
            CenteringAction::Settled
        );
        assert!(matches!(
            controller.on_box(&far, &channel, &mut track),
            CenteringAction::Rotated { .. }
        ));
        assert_eq!(rx.try_iter().count(), 1);
        assert_eq!(track.len(), 2);
    }

    #[test]
    fn failed_dispatch_keeps_gate_open() {
        let (tx, rx) = mpsc::channel::<Instruction>();
        drop(rx);
        let channel = RotationChannel::new(Box::new(tx), OrientationStore::new());
        let mut controller = CenteringController::new(VGA, DEFAULT_PIX_DEG_RATIO, 2.0);
        let mut track = Trajectory::new();

        assert_eq!(
            controller.on_box(&box_at(620, 240), &channel, &mut track),
            CenteringAction::DispatchFailed
        );
        assert!(controller.can_rotate());
        assert!(track.is_empty());
    }
}
