//! Single-object ROI tracking.
//!
//! [RoiTracker] is the seam between the tracking session and whatever visual
//! tracker is in use. The session seeds it once with a box against a reference
//! frame and then feeds it every subsequent frame, one at a time.
//!
//! [CorrelationTracker] is the tracker the rig ships with. It keeps the seeded
//! patch as a template and, on each frame, looks for the position around the
//! previous box with the highest zero-mean normalized cross-correlation.

use log::debug;
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    fmt::{self, Display},
};

use crate::frame::{BoundingBox, Frame, FrameDimension};

/// Why a tracker refused to be seeded.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerError {
    /// The box has no width or no height.
    EmptyBox(BoundingBox),
    /// The box sticks out of the reference frame.
    OutOfBounds {
        bbox: BoundingBox,
        dimension: FrameDimension,
    },
    /// The reference frame has no pixels.
    InvalidFrame(FrameDimension),
    /// The region inside the box is uniform, there is nothing to lock onto.
    FeaturelessRegion(BoundingBox),
}

impl Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use TrackerError as TE;
        let msg = match self {
            TE::EmptyBox(bbox) => Cow::from(format!("box {bbox} has no area")),
            TE::OutOfBounds { bbox, dimension } => {
                Cow::from(format!("box {bbox} does not fit in a {dimension} frame"))
            }
            TE::InvalidFrame(dimension) => {
                Cow::from(format!("reference frame is {dimension}, which has no pixels"))
            }
            TE::FeaturelessRegion(bbox) => {
                Cow::from(format!("region {bbox} is uniform and cannot be tracked"))
            }
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for TrackerError {}

/// Why a tracker could not produce a box for a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingLost {
    /// `update` was called before a successful `initialize`.
    NotInitialized,
    /// The frame does not have the reference frame's dimension.
    FrameMismatch {
        expected: FrameDimension,
        got: FrameDimension,
    },
    /// The best match in the search window was not convincing enough.
    LowConfidence { score: f32 },
}

impl Display for TrackingLost {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TrackingLost::NotInitialized => write!(f, "tracker was never initialized"),
            TrackingLost::FrameMismatch { expected, got } => {
                write!(f, "expected a {expected} frame, got {got}")
            }
            TrackingLost::LowConfidence { score } => {
                write!(f, "best match score {score:.3} is too low")
            }
        }
    }
}

impl std::error::Error for TrackingLost {}

/// A visual tracker following a single region of interest across frames.
///
/// Implementations must be deterministic: the same internal state and the
/// same frame always produce the same result.
pub trait RoiTracker: Send {
    /// Seeds the tracker with `bbox` as it appears in `reference_frame`.
    /// Any previous state is discarded.
    fn initialize(&mut self, reference_frame: &Frame, bbox: BoundingBox) -> Result<(), TrackerError>;

    /// Locates the region in `frame`, which must have the reference frame's
    /// dimension.
    fn update(&mut self, frame: &Frame) -> Result<BoundingBox, TrackingLost>;
}

/// Tuning of the [CorrelationTracker].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParams {
    /// How far, in pixels, the region may move between two frames.
    pub search_radius: u32,
    /// Correlation score, in `[-1, 1]`, under which the region counts as lost.
    pub min_confidence: f32,
    /// How much of each new match is blended into the template, in `[0, 1]`.
    /// Zero keeps the seeded template forever.
    pub learning_rate: f32,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            search_radius: 32,
            min_confidence: 0.5,
            learning_rate: 0.0,
        }
    }
}

// Patches whose spread is below this are considered uniform.
const MIN_PATCH_NORM: f32 = 1e-3;

/// The template the tracker correlates against, kept in two forms: the raw
/// pixel values it was built from, and a zero-mean copy with its norm.
#[derive(Debug, Clone)]
struct Template {
    width: u32,
    height: u32,
    raw: Vec<f32>,
    zero_mean: Vec<f32>,
    norm: f32,
}

impl Template {
    fn from_raw(width: u32, height: u32, raw: Vec<f32>) -> Self {
        let mean = raw.iter().sum::<f32>() / raw.len() as f32;
        let zero_mean: Vec<f32> = raw.iter().map(|v| v - mean).collect();
        let norm = zero_mean.iter().map(|v| v * v).sum::<f32>().sqrt();
        Self {
            width,
            height,
            raw,
            zero_mean,
            norm,
        }
    }

    fn blend(&mut self, patch: &[f32], rate: f32) {
        let raw = self
            .raw
            .iter()
            .zip(patch)
            .map(|(t, p)| (1.0 - rate) * t + rate * p)
            .collect();
        *self = Template::from_raw(self.width, self.height, raw);
    }
}

/// Template tracker scoring candidate positions with zero-mean normalized
/// cross-correlation.
#[derive(Debug, Clone)]
pub struct CorrelationTracker {
    params: TrackerParams,
    reference: Option<FrameDimension>,
    template: Option<Template>,
    last: Option<BoundingBox>,
}

impl CorrelationTracker {
    pub fn new(params: TrackerParams) -> Self {
        Self {
            params,
            reference: None,
            template: None,
            last: None,
        }
    }

    /// The last box the tracker reported, or the seed box.
    pub fn last_box(&self) -> Option<BoundingBox> {
        self.last
    }

    fn extract_patch(frame: &Frame, bbox: &BoundingBox) -> Vec<f32> {
        let mut patch = Vec::with_capacity((bbox.width * bbox.height) as usize);
        for dy in 0..bbox.height {
            for dx in 0..bbox.width {
                patch.push(frame.get_pixel(bbox.x + dx, bbox.y + dy)[0] as f32);
            }
        }
        patch
    }

    fn score_at(frame: &Frame, template: &Template, x: u32, y: u32) -> f32 {
        let n = template.zero_mean.len() as f64;
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        let mut cross = 0.0f64;
        let mut taps = template.zero_mean.iter();
        for ty in 0..template.height {
            for tx in 0..template.width {
                let p = frame.get_pixel(x + tx, y + ty)[0] as f64;
                let t = taps.next().copied().unwrap_or_default() as f64;
                sum += p;
                sum_sq += p * p;
                // The template is zero-mean, so the patch mean drops out of
                // the cross term.
                cross += p * t;
            }
        }
        let patch_norm = (sum_sq - sum * sum / n).max(0.0).sqrt();
        if patch_norm < MIN_PATCH_NORM as f64 {
            return 0.0;
        }
        (cross / (patch_norm * template.norm as f64)) as f32
    }
}

impl Default for CorrelationTracker {
    fn default() -> Self {
        Self::new(TrackerParams::default())
    }
}

impl RoiTracker for CorrelationTracker {
    fn initialize(&mut self, reference_frame: &Frame, bbox: BoundingBox) -> Result<(), TrackerError> {
        let dimension = FrameDimension::of(reference_frame);
        if !dimension.is_valid() {
            return Err(TrackerError::InvalidFrame(dimension));
        }
        if bbox.is_empty() {
            return Err(TrackerError::EmptyBox(bbox));
        }
        if !dimension.contains(&bbox) {
            return Err(TrackerError::OutOfBounds { bbox, dimension });
        }

        let template = Template::from_raw(
            bbox.width,
            bbox.height,
            Self::extract_patch(reference_frame, &bbox),
        );
        if template.norm < MIN_PATCH_NORM {
            return Err(TrackerError::FeaturelessRegion(bbox));
        }

        self.reference = Some(dimension);
        self.template = Some(template);
        self.last = Some(bbox);
        Ok(())
    }

    fn update(&mut self, frame: &Frame) -> Result<BoundingBox, TrackingLost> {
        let (Some(reference), Some(template), Some(last)) =
            (self.reference, self.template.as_mut(), self.last)
        else {
            return Err(TrackingLost::NotInitialized);
        };

        let got = FrameDimension::of(frame);
        if got != reference {
            return Err(TrackingLost::FrameMismatch {
                expected: reference,
                got,
            });
        }

        let radius = self.params.search_radius;
        let max_x = reference.width - template.width;
        let max_y = reference.height - template.height;
        let x_range = last.x.saturating_sub(radius)..=(last.x.saturating_add(radius)).min(max_x);
        let y_range = last.y.saturating_sub(radius)..=(last.y.saturating_add(radius)).min(max_y);

        let mut best = (f32::NEG_INFINITY, last.x, last.y);
        for y in y_range {
            for x in x_range.clone() {
                let score = Self::score_at(frame, template, x, y);
                // Strictly greater keeps the first maximum in scan order.
                if score > best.0 {
                    best = (score, x, y);
                }
            }
        }

        let (score, x, y) = best;
        if score < self.params.min_confidence {
            debug!("correlation peak {score:.3} at ({x}, {y}) is below threshold");
            return Err(TrackingLost::LowConfidence { score });
        }

        let found = BoundingBox::new(x, y, template.width, template.height);
        if self.params.learning_rate > 0.0 {
            let patch = Self::extract_patch(frame, &found);
            template.blend(&patch, self.params.learning_rate.min(1.0));
        }
        self.last = Some(found);
        Ok(found)
    }
}
