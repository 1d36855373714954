//! Pixel-space types shared by the camera, the tracker and the controller.

use image::GrayImage;
use std::fmt::{self, Display};

/// A monochrome camera frame.
pub type Frame = GrayImage;

/// Width and height of a frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameDimension {
    pub width: u32,
    pub height: u32,
}

impl FrameDimension {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The dimension of an actual frame.
    pub fn of(frame: &Frame) -> Self {
        Self::new(frame.width(), frame.height())
    }

    /// Whether a frame with this dimension can be processed at all.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Whether `bbox` lies entirely inside a frame of this dimension.
    pub fn contains(&self, bbox: &BoundingBox) -> bool {
        bbox.x as u64 + bbox.width as u64 <= self.width as u64
            && bbox.y as u64 + bbox.height as u64 <= self.height as u64
    }
}

impl Display for FrameDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An axis-aligned rectangle in frame pixel coordinates, anchored at its
/// top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A `width` by `height` box centered in a frame of dimension `dim`,
    /// clamped so that it fits.
    pub fn centered_in(dim: FrameDimension, width: u32, height: u32) -> Self {
        let width = width.min(dim.width);
        let height = height.min(dim.height);
        Self::new((dim.width - width) / 2, (dim.height - height) / 2, width, height)
    }

    /// A box with no area cannot be tracked.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Center of the box, `(x, y)`.
    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }
}

impl Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}x{}]",
            self.x, self.y, self.width, self.height
        )
    }
}
