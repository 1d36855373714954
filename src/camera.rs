//! Where frames come from.
//!
//! A [FrameSource] hands out frames on demand. The [FrameWorker] polls one at
//! the camera's frame rate on its own thread and forwards every frame as an
//! [Event::FrameAvailable] to whoever owns the session.

use image::Luma;
use log::{debug, info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    borrow::Cow,
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use crate::{
    frame::{Frame, FrameDimension},
    orientation::{Degree, OrientationStore},
    session_machine::Event,
};

const MIN_FPS: f64 = 0.1;
const MAX_FPS: f64 = 1000.0;

/// Grey level of everything that is not the target in synthetic frames.
pub const BACKGROUND: u8 = 20;

#[derive(Debug)]
pub enum CameraError {
    /// Returned when io fails while listing or reading frames.
    IoError(io::Error),
    /// A frame file could not be decoded.
    ImageError(image::ImageError),
    /// There is nothing to replay in the given directory.
    EmptySequence(PathBuf),
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            CameraError::IoError(e) => Cow::from(format!("io error: {}", e)),
            CameraError::ImageError(e) => Cow::from(format!("image error: {}", e)),
            CameraError::EmptySequence(dir) => {
                Cow::from(format!("no frames found in {}", dir.display()))
            }
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for CameraError {}

impl From<io::Error> for CameraError {
    fn from(value: io::Error) -> Self {
        Self::IoError(value)
    }
}

impl From<image::ImageError> for CameraError {
    fn from(value: image::ImageError) -> Self {
        Self::ImageError(value)
    }
}

/// A camera, real or not.
pub trait FrameSource: Send {
    /// Size of the frames this source produces.
    fn dimension(&self) -> FrameDimension;

    /// The next frame, or `None` once the source has run dry.
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError>;
}

/// Draws a textured square of `size` pixels centered on `center` over a
/// uniform background. Parts falling outside the frame are clipped.
pub fn render_target(dimension: FrameDimension, center: (f64, f64), size: u32) -> Frame {
    let mut frame = Frame::from_pixel(dimension.width, dimension.height, Luma([BACKGROUND]));
    let left = (center.0 - size as f64 / 2.0).round() as i64;
    let top = (center.1 - size as f64 / 2.0).round() as i64;
    let cell = (size / 4).max(1);

    for dy in 0..size {
        for dx in 0..size {
            let (px, py) = (left + dx as i64, top + dy as i64);
            if px < 0 || py < 0 || px >= dimension.width as i64 || py >= dimension.height as i64 {
                continue;
            }
            let v = if (dx / cell + dy / cell) % 2 == 0 { 230 } else { 150 };
            frame.put_pixel(px as u32, py as u32, Luma([v]));
        }
    }
    frame
}

/// A camera bolted to the rig, looking at a single target.
///
/// The target sits at a fixed orientation (optionally drifting every frame)
/// and appears wherever that orientation falls relative to where the rig is
/// currently pointing, so rotating the rig moves the target in the picture.
pub struct SyntheticScene {
    dimension: FrameDimension,
    rig: OrientationStore,
    pix_deg_ratio: f64,
    target: (Degree, Degree),
    drift: (Degree, Degree),
    target_size: u32,
    noise: u8,
    rng: StdRng,
}

impl SyntheticScene {
    /// A scene seen by a camera following `rig`, with the target at
    /// `target` (theta, phi) in degrees.
    pub fn new(
        dimension: FrameDimension,
        rig: OrientationStore,
        pix_deg_ratio: f64,
        target: (Degree, Degree),
    ) -> Self {
        Self {
            dimension,
            rig,
            pix_deg_ratio,
            target,
            drift: (0.0, 0.0),
            target_size: 16,
            noise: 0,
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// Adds uniform sensor noise of up to `amplitude` grey levels to every
    /// pixel. The same `seed` gives the same noise.
    pub fn with_noise(mut self, amplitude: u8, seed: u64) -> Self {
        self.noise = amplitude;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Moves the target by `drift` degrees after every frame.
    pub fn with_drift(mut self, drift: (Degree, Degree)) -> Self {
        self.drift = drift;
        self
    }

    pub fn with_target_size(mut self, size: u32) -> Self {
        self.target_size = size;
        self
    }

    /// Where the target is in the picture, given the rig's orientation.
    pub fn target_center(&self) -> (f64, f64) {
        let rig = self.rig.get_rotation();
        (
            self.dimension.width as f64 / 2.0 + (self.target.0 - rig.theta) * self.pix_deg_ratio,
            self.dimension.height as f64 / 2.0 - (self.target.1 - rig.phi) * self.pix_deg_ratio,
        )
    }
}

impl FrameSource for SyntheticScene {
    fn dimension(&self) -> FrameDimension {
        self.dimension
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        let mut frame = render_target(self.dimension, self.target_center(), self.target_size);
        if self.noise > 0 {
            let amplitude = self.noise as i16;
            for pixel in frame.pixels_mut() {
                let noisy = pixel[0] as i16 + self.rng.gen_range(-amplitude..=amplitude);
                pixel[0] = noisy.clamp(0, 255) as u8;
            }
        }
        self.target.0 += self.drift.0;
        self.target.1 += self.drift.1;
        Ok(Some(frame))
    }
}

/// Replays the PNG files of a directory, in file name order.
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    next: usize,
    looping: bool,
    dimension: FrameDimension,
}

impl ImageSequence {
    pub fn open(directory: impl AsRef<Path>, looping: bool) -> Result<Self, CameraError> {
        let directory = directory.as_ref();
        let mut paths = fs::read_dir(directory)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("png"))
                    .unwrap_or(false)
            })
            .collect::<Vec<_>>();
        paths.sort();

        let first = paths
            .first()
            .ok_or_else(|| CameraError::EmptySequence(directory.to_path_buf()))?;
        let dimension = FrameDimension::of(&load(first)?);
        info!(
            "replaying {} frames of {} from {}",
            paths.len(),
            dimension,
            directory.display()
        );

        Ok(Self {
            paths,
            next: 0,
            looping,
            dimension,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn load(path: &Path) -> Result<Frame, CameraError> {
    Ok(image::open(path)?.to_luma8())
}

impl FrameSource for ImageSequence {
    fn dimension(&self) -> FrameDimension {
        self.dimension
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        if self.next >= self.paths.len() {
            if !self.looping {
                return Ok(None);
            }
            self.next = 0;
        }
        let path = &self.paths[self.next];
        self.next += 1;
        load(path).map(Some)
    }
}

enum Signal {
    Stop,
}

/// Polls a [FrameSource] at a fixed rate on a background thread.
pub struct FrameWorker {
    handle: Option<thread::JoinHandle<()>>,
    tx: mpsc::Sender<Signal>,
}

impl FrameWorker {
    /// Starts pulling `fps` frames per second out of `source`, sending each
    /// one to `events`. The worker ends on [FrameWorker::stop], when the
    /// source runs dry or when nobody listens on `events` any more.
    pub fn start(mut source: Box<dyn FrameSource>, fps: f64, events: mpsc::Sender<Event>) -> Self {
        let (tx, rx) = mpsc::channel::<Signal>();
        let period = Duration::from_secs_f64(1.0 / fps.clamp(MIN_FPS, MAX_FPS));

        let handle = thread::spawn(move || {
            let mut deadline = Instant::now();
            loop {
                match rx.try_recv() {
                    Ok(Signal::Stop) | Err(mpsc::TryRecvError::Disconnected) => break,
                    Err(mpsc::TryRecvError::Empty) => {}
                }

                match source.next_frame() {
                    Ok(Some(frame)) => {
                        if events.send(Event::FrameAvailable(frame)).is_err() {
                            debug!("nobody is listening for frames");
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("frame source ran dry");
                        break;
                    }
                    Err(e) => warn!("could not grab a frame: {}", e),
                }

                deadline += period;
                let now = Instant::now();
                if deadline > now {
                    spin_sleep::sleep(deadline - now);
                } else {
                    // Running late, do not try to catch up with a burst.
                    deadline = now;
                }
            }
            debug!("frame worker stopped");
        });

        Self {
            handle: Some(handle),
            tx,
        }
    }

    pub fn stop(&mut self) {
        let _ = self.tx.send(Signal::Stop);
        if let Some(thread) = self.handle.take() {
            if thread.join().is_err() {
                warn!("frame worker thread panicked");
            }
        }
    }
}

impl Drop for FrameWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        centering::CenteringAction,
        frame::BoundingBox,
        instruction::Instruction,
        orientation::Rotation,
        recorder::TrajectoryRecorder,
        roi_tracker::{CorrelationTracker, RoiTracker, TrackerParams},
        rotation_channel::RotationChannel,
        session::{FrameOutcome, SessionParams},
        session_machine::{Outcome, SessionMachine},
        workflow::WorkflowLock,
    };
    use tempfile::tempdir;

    const DIM: FrameDimension = FrameDimension {
        width: 160,
        height: 120,
    };

    /// Yields the frames it was given, then runs dry.
    struct Finite(Vec<Frame>);

    impl FrameSource for Finite {
        fn dimension(&self) -> FrameDimension {
            DIM
        }

        fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
            Ok(self.0.pop())
        }
    }

    #[test]
    fn target_is_drawn_where_asked() {
        let frame = render_target(DIM, (80.0, 60.0), 16);
        assert_eq!(frame.get_pixel(72, 52)[0], 230);
        assert_eq!(frame.get_pixel(76, 52)[0], 150);
        assert_eq!(frame.get_pixel(71, 52)[0], BACKGROUND);
        assert_eq!(frame.get_pixel(88, 68)[0], BACKGROUND);
    }

    #[test]
    fn target_is_clipped_at_the_border() {
        let frame = render_target(DIM, (0.0, 0.0), 16);
        assert_eq!(frame.get_pixel(0, 0)[0], 230);
        assert_eq!(frame.get_pixel(8, 8)[0], BACKGROUND);
    }

    #[test]
    fn scene_follows_rig_orientation() {
        let rig = OrientationStore::new();
        let scene = SyntheticScene::new(DIM, rig.clone(), 100.0, (0.3, 0.1));
        let (x, y) = scene.target_center();
        assert!((x - 110.0).abs() < 1e-9 && (y - 50.0).abs() < 1e-9);

        rig.set_rotation(Rotation::new(0.3, 0.1, 0.0));
        let (x, y) = scene.target_center();
        assert!((x - 80.0).abs() < 1e-9 && (y - 60.0).abs() < 1e-9);
    }

    #[test]
    fn scene_drifts_between_frames() {
        let rig = OrientationStore::new();
        let mut scene =
            SyntheticScene::new(DIM, rig, 100.0, (0.0, 0.0)).with_drift((0.1, 0.0));
        scene.next_frame().unwrap();
        let (x, _) = scene.target_center();
        assert!((x - 90.0).abs() < 1e-9);
    }

    #[test]
    fn noise_is_bounded_and_seeded() {
        let scene = |seed| {
            SyntheticScene::new(DIM, OrientationStore::new(), 100.0, (0.0, 0.0))
                .with_noise(5, seed)
        };
        let a = scene(7).next_frame().unwrap().unwrap();
        let b = scene(7).next_frame().unwrap().unwrap();
        let c = scene(8).next_frame().unwrap().unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        let background = a.get_pixel(0, 0)[0];
        assert!((BACKGROUND - 5..=BACKGROUND + 5).contains(&background));
    }

    #[test]
    fn tracker_sees_through_noise() {
        let rig = OrientationStore::new();
        let mut scene = SyntheticScene::new(DIM, rig.clone(), 100.0, (0.2, 0.0))
            .with_noise(12, 3)
            .with_drift((0.05, 0.0));
        let mut tracker = CorrelationTracker::default();

        let first = scene.next_frame().unwrap().unwrap();
        tracker
            .initialize(&first, BoundingBox::new(92, 52, 16, 16))
            .unwrap();
        for step in 1..=4u32 {
            let frame = scene.next_frame().unwrap().unwrap();
            assert_eq!(
                tracker.update(&frame).unwrap(),
                BoundingBox::new(92 + 5 * step, 52, 16, 16)
            );
        }
    }

    #[test]
    fn synthetic_scene_closes_the_loop() {
        let root = tempdir().unwrap();
        let (tx, rx) = mpsc::channel::<Instruction>();
        let rig = OrientationStore::new();
        let params = TrackerParams {
            search_radius: 80,
            ..TrackerParams::default()
        };
        let mut machine = SessionMachine::new(
            RotationChannel::new(Box::new(tx), rig.clone()),
            WorkflowLock::new(),
            TrajectoryRecorder::new(root.path()),
            Box::new(move || -> Box<dyn RoiTracker> { Box::new(CorrelationTracker::new(params)) }),
            SessionParams {
                pix_deg_ratio: 100.0,
                radius: 2.0,
            },
        );
        // 60 px right of center, past the 53 px horizontal band
        let mut scene = SyntheticScene::new(DIM, rig.clone(), 100.0, (0.6, 0.0));

        machine.handle(Event::FrameAvailable(scene.next_frame().unwrap().unwrap())).unwrap();
        machine.handle(Event::SelectRoi).unwrap();
        machine
            .handle(Event::RoiSelected(BoundingBox::new(132, 52, 16, 16)))
            .unwrap();
        machine.handle(Event::StartTracking).unwrap();

        let mut actions = vec![];
        for _ in 0..3 {
            let frame = scene.next_frame().unwrap().unwrap();
            if let Outcome::Frame(FrameOutcome::Tracked { action, .. }) =
                machine.handle(Event::FrameAvailable(frame)).unwrap()
            {
                actions.push(action);
            }
        }

        assert_eq!(
            actions,
            [
                CenteringAction::Rotated {
                    delta: (0.6, 0.0),
                    rotation: Rotation::new(0.6, 0.0, 0.0),
                },
                CenteringAction::Settled,
                CenteringAction::Hold,
            ]
        );
        assert_eq!(rx.try_iter().count(), 1);
        assert_eq!(
            machine.session().and_then(|s| s.bbox()),
            Some(BoundingBox::new(72, 52, 16, 16))
        );
    }

    #[test]
    fn worker_forwards_every_frame() {
        let frames = (0..5).map(|_| render_target(DIM, (80.0, 60.0), 16)).collect();
        let (tx, rx) = mpsc::channel();
        let mut worker = FrameWorker::start(Box::new(Finite(frames)), 500.0, tx);

        // The worker drops its sender once the source runs dry.
        let received = rx
            .iter()
            .filter(|e| matches!(e, Event::FrameAvailable(_)))
            .count();
        assert_eq!(received, 5);
        worker.stop();
    }

    #[test]
    fn worker_stops_on_request() {
        let scene = SyntheticScene::new(DIM, OrientationStore::new(), 100.0, (0.0, 0.0));
        let (tx, rx) = mpsc::channel();
        let mut worker = FrameWorker::start(Box::new(scene), 200.0, tx);

        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        worker.stop();
        // Whatever was queued before the stop drains, then the channel closes.
        while rx.recv_timeout(Duration::from_secs(2)).is_ok() {}
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn sequence_replays_pngs_in_order() {
        let dir = tempdir().unwrap();
        render_target(DIM, (20.0, 20.0), 16)
            .save(dir.path().join("frame_000.png"))
            .unwrap();
        render_target(DIM, (100.0, 60.0), 16)
            .save(dir.path().join("frame_001.png"))
            .unwrap();
        fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

        let mut sequence = ImageSequence::open(dir.path(), false).unwrap();
        assert_eq!(sequence.len(), 2);
        assert_eq!(sequence.dimension(), DIM);

        let first = sequence.next_frame().unwrap().unwrap();
        assert_eq!(first.get_pixel(12, 12)[0], 230);
        let second = sequence.next_frame().unwrap().unwrap();
        assert_eq!(second.get_pixel(12, 12)[0], BACKGROUND);
        assert!(sequence.next_frame().unwrap().is_none());
    }

    #[test]
    fn looping_sequence_starts_over() {
        let dir = tempdir().unwrap();
        render_target(DIM, (20.0, 20.0), 16)
            .save(dir.path().join("only.png"))
            .unwrap();

        let mut sequence = ImageSequence::open(dir.path(), true).unwrap();
        for _ in 0..3 {
            assert!(sequence.next_frame().unwrap().is_some());
        }
    }

    #[test]
    fn empty_directory_is_rejected() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            ImageSequence::open(dir.path(), false),
            Err(CameraError::EmptySequence(_))
        ));
    }
}
